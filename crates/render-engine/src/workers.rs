//! Render worker pool.
//!
//! Workers pull frame indices from a shared [`FrameAllocator`], render them
//! with their own renderer instance and push the results into the
//! [`OrderingBuffer`]. Each index is claimed by exactly one worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use framecast_common::error::{FramecastError, FramecastResult};
use framecast_scene_model::ExportConfig;

use crate::cancel::StopSignal;
use crate::ordering::{BufferError, OrderingBuffer};
use crate::renderer::RendererFactory;
use crate::status::{FailureReason, WorkerSummary};

/// Hands out frame indices `0..total` in increasing order, each once.
#[derive(Debug)]
pub struct FrameAllocator {
    next: AtomicU64,
    total: u64,
}

impl FrameAllocator {
    pub fn new(total: u64) -> Self {
        Self {
            next: AtomicU64::new(0),
            total,
        }
    }

    /// Claim the next unrendered index, or `None` once all are taken.
    pub fn claim_next(&self) -> Option<u64> {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| {
                (next < self.total).then_some(next + 1)
            })
            .ok()
    }

    /// Number of indices handed out so far.
    pub fn claimed(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

/// State shared by every worker of one job.
#[derive(Clone)]
pub struct WorkerContext {
    pub config: Arc<ExportConfig>,
    pub factory: RendererFactory,
    pub allocator: Arc<FrameAllocator>,
    pub buffer: Arc<OrderingBuffer>,
    pub stop: Arc<StopSignal>,
}

/// A fixed set of render threads.
pub struct WorkerPool {
    handles: Vec<thread::JoinHandle<WorkerSummary>>,
    stop: Arc<StopSignal>,
    buffer: Arc<OrderingBuffer>,
}

impl WorkerPool {
    /// Spawn `size` workers. If any spawn fails, the ones already running are
    /// stopped and joined before the error is returned.
    pub fn start(size: usize, ctx: WorkerContext) -> FramecastResult<Self> {
        let mut pool = Self {
            handles: Vec::with_capacity(size),
            stop: Arc::clone(&ctx.stop),
            buffer: Arc::clone(&ctx.buffer),
        };

        for worker_id in 0..size {
            let worker_ctx = ctx.clone();
            let spawned = thread::Builder::new()
                .name(format!("framecast-worker-{worker_id}"))
                .spawn(move || run_worker(worker_id, worker_ctx));

            match spawned {
                Ok(handle) => pool.handles.push(handle),
                Err(err) => {
                    tracing::error!(worker_id, error = %err, "Failed to spawn render worker");
                    pool.request_stop();
                    pool.join();
                    return Err(FramecastError::internal(format!(
                        "failed to spawn render worker {worker_id}: {err}"
                    )));
                }
            }
        }

        tracing::debug!(workers = size, "Render workers started");
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Ask every worker to stop and wake any that are blocked on the buffer.
    pub fn request_stop(&self) {
        self.stop.stop();
        self.buffer.close();
    }

    /// Wait for every worker to exit.
    pub fn join(&mut self) -> Vec<WorkerSummary> {
        let mut summaries = Vec::with_capacity(self.handles.len());
        for (worker_id, handle) in self.handles.drain(..).enumerate() {
            match handle.join() {
                Ok(summary) => summaries.push(summary),
                Err(_) => {
                    self.stop.fail(FailureReason::internal(format!(
                        "render worker {worker_id} panicked"
                    )));
                    self.buffer.close();
                    summaries.push(WorkerSummary {
                        worker_id,
                        ..WorkerSummary::default()
                    });
                }
            }
        }
        summaries
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.request_stop();
            self.join();
        }
    }
}

/// Records a failure and releases blocked threads if a worker unwinds.
struct PanicGuard<'a> {
    worker_id: usize,
    ctx: &'a WorkerContext,
}

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            tracing::error!(worker_id = self.worker_id, "Render worker panicked");
            self.ctx.stop.fail(FailureReason::internal(format!(
                "render worker {} panicked",
                self.worker_id
            )));
            self.ctx.buffer.close();
        }
    }
}

fn run_worker(worker_id: usize, ctx: WorkerContext) -> WorkerSummary {
    let _guard = PanicGuard {
        worker_id,
        ctx: &ctx,
    };
    let mut summary = WorkerSummary {
        worker_id,
        ..WorkerSummary::default()
    };
    let mut renderer = (ctx.factory)();
    let frame_len = ctx.config.frame_len();
    tracing::trace!(worker_id, renderer = renderer.name(), "Worker started");

    loop {
        if ctx.stop.is_stopped() {
            break;
        }
        let Some(index) = ctx.allocator.claim_next() else {
            break;
        };

        let started = Instant::now();
        let rendered = renderer.render(index, &ctx.config);
        summary.render_secs += started.elapsed().as_secs_f64();

        let frame = match rendered {
            Ok(frame) => frame,
            Err(err) => {
                match FailureReason::from_error(&err) {
                    Some(reason) => {
                        tracing::error!(worker_id, frame = index, error = %err, "Frame render failed");
                        ctx.stop.fail(reason);
                    }
                    None => ctx.stop.stop(),
                }
                ctx.buffer.close();
                break;
            }
        };

        if frame.index() != index || frame.len() != frame_len {
            ctx.stop.fail(FailureReason::internal(format!(
                "renderer '{}' returned frame {} with {} bytes for frame {index} (expected {frame_len})",
                renderer.name(),
                frame.index(),
                frame.len()
            )));
            ctx.buffer.close();
            break;
        }
        summary.frames_rendered += 1;

        match ctx.buffer.push(frame) {
            Ok(()) => {}
            Err(BufferError::Stopped) => break,
            Err(err @ BufferError::Duplicate { .. }) => {
                ctx.stop.fail(FailureReason::internal(err.to_string()));
                ctx.buffer.close();
                break;
            }
        }
    }

    tracing::trace!(
        worker_id,
        frames = summary.frames_rendered,
        render_secs = summary.render_secs,
        "Worker finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::frame::RenderedFrame;
    use crate::renderer::FrameRenderer;
    use std::collections::HashSet;
    use std::path::PathBuf;

    struct IndexRenderer;

    impl FrameRenderer for IndexRenderer {
        fn render(&mut self, index: u64, config: &ExportConfig) -> FramecastResult<RenderedFrame> {
            Ok(RenderedFrame::new(index, vec![index as u8; config.frame_len()]))
        }

        fn name(&self) -> &str {
            "index"
        }
    }

    struct FailAt(u64);

    impl FrameRenderer for FailAt {
        fn render(&mut self, index: u64, config: &ExportConfig) -> FramecastResult<RenderedFrame> {
            if index == self.0 {
                return Err(FramecastError::render(index, "boom"));
            }
            Ok(RenderedFrame::new(index, vec![0; config.frame_len()]))
        }

        fn name(&self) -> &str {
            "fail-at"
        }
    }

    fn context(total: u64, threads: usize, factory: RendererFactory) -> WorkerContext {
        let config = ExportConfig {
            width: 4,
            height: 4,
            fps: 10,
            length_secs: total as f64 / 10.0,
            threads,
            quality: 50,
            output_path: PathBuf::from("out.mp4"),
            encoder_path: PathBuf::from("ffmpeg"),
            lookahead: None,
        };
        let window = config.lookahead_window();
        WorkerContext {
            config: Arc::new(config),
            factory,
            allocator: Arc::new(FrameAllocator::new(total)),
            buffer: Arc::new(OrderingBuffer::new(window, CancelToken::new())),
            stop: Arc::new(StopSignal::new()),
        }
    }

    #[test]
    fn test_allocator_hands_out_each_index_once() {
        let allocator = Arc::new(FrameAllocator::new(500));
        let claimed: Vec<u64> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let allocator = Arc::clone(&allocator);
                    scope.spawn(move || {
                        let mut mine = Vec::new();
                        while let Some(index) = allocator.claim_next() {
                            mine.push(index);
                        }
                        mine
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        assert_eq!(claimed.len(), 500);
        let unique: HashSet<u64> = claimed.into_iter().collect();
        assert_eq!(unique.len(), 500);
        assert_eq!(allocator.claimed(), 500);
        assert_eq!(allocator.claim_next(), None);
        assert_eq!(allocator.claimed(), 500);
    }

    #[test]
    fn test_pool_renders_every_frame_once() {
        let ctx = context(40, 4, Arc::new(|| Box::new(IndexRenderer) as Box<dyn FrameRenderer>));
        let buffer = Arc::clone(&ctx.buffer);
        let mut pool = WorkerPool::start(4, ctx).unwrap();
        assert_eq!(pool.size(), 4);

        for expected in 0..40 {
            assert_eq!(buffer.pop().unwrap().index(), expected);
        }
        let summaries = pool.join();
        assert_eq!(summaries.len(), 4);
        assert_eq!(summaries.iter().map(|s| s.frames_rendered).sum::<u64>(), 40);
    }

    #[test]
    fn test_render_error_records_failure_and_closes_buffer() {
        let ctx = context(30, 3, Arc::new(|| Box::new(FailAt(5)) as Box<dyn FrameRenderer>));
        let buffer = Arc::clone(&ctx.buffer);
        let stop = Arc::clone(&ctx.stop);
        let mut pool = WorkerPool::start(3, ctx).unwrap();

        let mut delivered = Vec::new();
        while let Ok(frame) = buffer.pop() {
            delivered.push(frame.index());
        }
        pool.join();

        assert!(delivered.iter().copied().eq(0..delivered.len() as u64));
        assert!(delivered.len() <= 5);
        assert!(matches!(
            stop.failure(),
            Some(FailureReason::Render { frame: 5, .. })
        ));
    }

    #[test]
    fn test_request_stop_unblocks_workers() {
        let ctx = context(1_000, 2, Arc::new(|| Box::new(IndexRenderer) as Box<dyn FrameRenderer>));
        let allocator = Arc::clone(&ctx.allocator);
        let mut pool = WorkerPool::start(2, ctx).unwrap();

        // Nobody pops, so the workers fill the window and block.
        thread::sleep(std::time::Duration::from_millis(50));
        pool.request_stop();
        pool.join();
        assert!(allocator.claimed() < 1_000);
    }
}
