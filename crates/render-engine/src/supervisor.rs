//! Export supervisor: owns one job from validation to teardown.
//!
//! ```text
//!   Idle ──start──▶ Running ──drained + clean encoder exit──▶ Succeeded
//!                      │──cancel token raised───────────────▶ Cancelled
//!                      └──render / encoder / internal fault──▶ Failed
//! ```
//!
//! Every exit path stops the workers, joins them and either closes or
//! aborts the sink before the report is produced.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use framecast_common::clock::{ExportClock, RateController};
use framecast_common::error::{FramecastError, FramecastResult};
use framecast_scene_model::{ExportConfig, Scene};

use crate::cancel::{CancelToken, StopSignal};
use crate::encoder::SubprocessSink;
use crate::ordering::{BufferError, OrderingBuffer};
use crate::renderer::{scene_renderer_factory, RendererFactory};
use crate::sink::{FrameSink, SinkConfig, SinkOpener};
use crate::status::{
    ExportProgress, ExportStage, FailureReason, JobReport, JobStatus, ProgressCallback,
};
use crate::workers::{FrameAllocator, WorkerContext, WorkerPool};

/// Default minimum spacing between progress callbacks.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Live view of a job, shared between the supervisor and its handles.
///
/// Only the supervisor thread writes to it.
#[derive(Debug)]
pub struct JobMonitor {
    status: Mutex<JobStatus>,
    frames_completed: AtomicU64,
    total_frames: AtomicU64,
    clock: OnceLock<ExportClock>,
}

impl Default for JobMonitor {
    fn default() -> Self {
        Self {
            status: Mutex::new(JobStatus::Idle),
            frames_completed: AtomicU64::new(0),
            total_frames: AtomicU64::new(0),
            clock: OnceLock::new(),
        }
    }
}

impl JobMonitor {
    fn lock(&self) -> MutexGuard<'_, JobStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> JobStatus {
        self.lock().clone()
    }

    pub fn frames_completed(&self) -> u64 {
        self.frames_completed.load(Ordering::SeqCst)
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames.load(Ordering::SeqCst)
    }

    /// Snapshot of the current progress.
    pub fn progress(&self) -> ExportProgress {
        let status = self.status();
        let done = self.frames_completed();
        let total = self.total_frames();
        let elapsed = self.clock.get().map_or(0.0, ExportClock::elapsed_secs);
        let stage = match status {
            JobStatus::Idle => ExportStage::Preparing,
            JobStatus::Running if total > 0 && done >= total => ExportStage::Finalizing,
            JobStatus::Running => ExportStage::Rendering,
            JobStatus::Succeeded => ExportStage::Complete,
            JobStatus::Cancelled => ExportStage::Cancelled,
            JobStatus::Failed { .. } => ExportStage::Failed,
        };
        ExportProgress::new(done, total, ExportClock::eta_secs(elapsed, done, total), stage)
    }

    fn begin(&self, total: u64, clock: &ExportClock) {
        let _ = self.clock.set(clock.clone());
        self.total_frames.store(total, Ordering::SeqCst);
        *self.lock() = JobStatus::Running;
    }

    fn record_frame(&self) -> u64 {
        self.frames_completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn finish(&self, status: JobStatus) {
        *self.lock() = status;
    }
}

/// Throttles the user's progress callback.
struct ProgressNotifier {
    callback: Option<ProgressCallback>,
    rate: RateController,
}

impl ProgressNotifier {
    fn emit(&mut self, clock: &ExportClock, progress: ExportProgress, force: bool) {
        let Some(callback) = self.callback.as_ref() else {
            return;
        };
        if self.rate.should_tick(clock.elapsed_ns()) || force {
            callback(progress);
        }
    }
}

/// How the consume loop ended.
enum Consumed {
    /// Every frame was handed to the sink.
    Drained,
    /// The cancel token was raised.
    Cancelled,
    /// The buffer was closed by a failing worker.
    WorkerStopped,
    /// The sink rejected a frame.
    SinkFailed(FramecastError),
}

/// Runs one export job.
pub struct ExportSupervisor {
    config: ExportConfig,
    factory: RendererFactory,
    sink_opener: SinkOpener,
    cancel: CancelToken,
    monitor: Arc<JobMonitor>,
    progress_callback: Option<ProgressCallback>,
    progress_interval: Duration,
}

impl ExportSupervisor {
    /// Render `scene` and stream it to the configured encoder executable.
    pub fn new(config: ExportConfig, scene: Scene) -> Self {
        Self::with_renderer(config, scene_renderer_factory(scene))
    }

    /// Use a custom renderer. Frames still go to the encoder subprocess
    /// unless a sink opener is supplied.
    pub fn with_renderer(config: ExportConfig, factory: RendererFactory) -> Self {
        Self {
            config,
            factory,
            sink_opener: Box::new(|sink_config: &SinkConfig, cancel: &CancelToken| {
                let sink = SubprocessSink::open(sink_config, cancel)?;
                Ok(Box::new(sink) as Box<dyn FrameSink>)
            }),
            cancel: CancelToken::new(),
            monitor: Arc::new(JobMonitor::default()),
            progress_callback: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_sink_opener(mut self, opener: SinkOpener) -> Self {
        self.sink_opener = opener;
        self
    }

    /// Share an externally owned cancel token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn on_progress(mut self, callback: impl Fn(ExportProgress) + Send + 'static) -> Self {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn monitor(&self) -> Arc<JobMonitor> {
        Arc::clone(&self.monitor)
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Run the job on the calling thread.
    ///
    /// Invalid configuration is returned as `Err` before anything starts.
    /// Every other outcome, including failure and cancellation, is reported
    /// through [`JobReport::status`].
    pub fn run(self) -> FramecastResult<JobReport> {
        let total = self.config.validate()?;
        Ok(self.drive(total))
    }

    /// Run the job on a background thread.
    pub fn start(self) -> FramecastResult<ExportHandle> {
        let total = self.config.validate()?;
        let cancel = self.cancel.clone();
        let monitor = Arc::clone(&self.monitor);
        let thread = thread::Builder::new()
            .name("framecast-supervisor".to_string())
            .spawn(move || self.drive(total))
            .map_err(|e| FramecastError::internal(format!("failed to spawn supervisor: {e}")))?;

        Ok(ExportHandle {
            cancel,
            monitor,
            thread: Some(thread),
        })
    }

    fn drive(self, total: u64) -> JobReport {
        let ExportSupervisor {
            config,
            factory,
            sink_opener,
            cancel,
            monitor,
            progress_callback,
            progress_interval,
        } = self;

        let clock = ExportClock::start();
        let window = config.lookahead_window();
        let mut notifier = ProgressNotifier {
            callback: progress_callback,
            rate: RateController::with_interval(progress_interval),
        };
        monitor.begin(total, &clock);
        tracing::info!(
            total_frames = total,
            threads = config.threads,
            window,
            width = config.width,
            height = config.height,
            fps = config.fps,
            output = %config.output_path.display(),
            "Export started"
        );
        notifier.emit(&clock, monitor.progress(), true);

        let config = Arc::new(config);
        let buffer = Arc::new(OrderingBuffer::new(window, cancel.clone()));
        let stop = Arc::new(StopSignal::new());
        let mut workers = Vec::new();

        let status = 'job: {
            let sink_config = SinkConfig::from_export(&config, total);
            let mut sink = match sink_opener(&sink_config, &cancel) {
                Ok(sink) => sink,
                Err(err) => {
                    tracing::error!(error = %err, "Failed to open sink");
                    break 'job status_for_error(&err);
                }
            };

            let ctx = WorkerContext {
                config: Arc::clone(&config),
                factory,
                allocator: Arc::new(FrameAllocator::new(total)),
                buffer: Arc::clone(&buffer),
                stop: Arc::clone(&stop),
            };
            let mut pool = match WorkerPool::start(config.threads, ctx) {
                Ok(pool) => pool,
                Err(err) => {
                    sink.abort();
                    break 'job status_for_error(&err);
                }
            };

            let consumed = consume(
                &buffer,
                sink.as_mut(),
                &cancel,
                &stop,
                &monitor,
                &mut notifier,
                &clock,
                total,
            );

            match consumed {
                Consumed::Drained => {
                    workers = pool.join();
                    if let Some(reason) = stop.failure() {
                        sink.abort();
                        break 'job JobStatus::Failed { reason };
                    }
                    notifier.emit(&clock, monitor.progress(), true);
                    tracing::debug!(sink = sink.name(), "All frames written, closing sink");
                    match sink.close() {
                        Ok(exit) => {
                            tracing::debug!(exit_code = ?exit.exit_code, frames = exit.frames_written, "Sink closed");
                            JobStatus::Succeeded
                        }
                        Err(err) => {
                            sink.abort();
                            status_for_error(&err)
                        }
                    }
                }
                Consumed::Cancelled => {
                    pool.request_stop();
                    sink.abort();
                    workers = pool.join();
                    JobStatus::Cancelled
                }
                Consumed::WorkerStopped => {
                    pool.request_stop();
                    sink.abort();
                    workers = pool.join();
                    match stop.failure() {
                        Some(reason) => JobStatus::Failed { reason },
                        None if cancel.is_cancelled() => JobStatus::Cancelled,
                        None => JobStatus::Failed {
                            reason: FailureReason::internal("ordering buffer closed unexpectedly"),
                        },
                    }
                }
                Consumed::SinkFailed(err) => {
                    pool.request_stop();
                    workers = pool.join();
                    sink.abort();
                    status_for_error(&err)
                }
            }
        };

        let frames_completed = monitor.frames_completed();
        let elapsed_secs = clock.elapsed_secs();
        match &status {
            JobStatus::Succeeded => tracing::info!(
                frames = frames_completed,
                elapsed_secs,
                peak_buffered = buffer.high_water(),
                "Export succeeded"
            ),
            JobStatus::Cancelled => tracing::warn!(
                frames = frames_completed,
                total_frames = total,
                next_frame = buffer.next_expected(),
                elapsed_secs,
                "Export cancelled"
            ),
            JobStatus::Failed { reason } => tracing::error!(
                reason = %reason,
                frames = frames_completed,
                total_frames = total,
                "Export failed"
            ),
            JobStatus::Idle | JobStatus::Running => {}
        }

        monitor.finish(status.clone());
        notifier.emit(&clock, monitor.progress(), true);

        JobReport {
            status,
            frames_completed,
            total_frames: total,
            elapsed_secs,
            started_at: clock.epoch_wall().to_string(),
            output_path: config.output_path.clone(),
            peak_buffered_frames: buffer.high_water(),
            lookahead_window: window,
            workers,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn consume(
    buffer: &OrderingBuffer,
    sink: &mut dyn FrameSink,
    cancel: &CancelToken,
    stop: &StopSignal,
    monitor: &JobMonitor,
    notifier: &mut ProgressNotifier,
    clock: &ExportClock,
    total: u64,
) -> Consumed {
    let mut written = 0u64;
    loop {
        // Checked before cancellation so a cancel racing the last frame
        // cannot turn a complete export into a cancelled one.
        if written == total {
            return Consumed::Drained;
        }
        if cancel.is_cancelled() {
            return Consumed::Cancelled;
        }

        let frame = match buffer.pop() {
            Ok(frame) => frame,
            Err(BufferError::Stopped) => {
                if stop.failure().is_none() && cancel.is_cancelled() {
                    return Consumed::Cancelled;
                }
                return Consumed::WorkerStopped;
            }
            Err(err @ BufferError::Duplicate { .. }) => {
                stop.fail(FailureReason::internal(err.to_string()));
                return Consumed::WorkerStopped;
            }
        };

        if cancel.is_cancelled() {
            return Consumed::Cancelled;
        }
        match sink.write(frame) {
            Ok(()) => {
                written = monitor.record_frame();
                notifier.emit(clock, monitor.progress(), false);
            }
            Err(err) if err.is_cancelled() => return Consumed::Cancelled,
            Err(err) => {
                tracing::error!(error = %err, frame = written, "Sink rejected frame");
                return Consumed::SinkFailed(err);
            }
        }
    }
}

fn status_for_error(err: &FramecastError) -> JobStatus {
    match FailureReason::from_error(err) {
        Some(reason) => JobStatus::Failed { reason },
        None => JobStatus::Cancelled,
    }
}

/// Handle to a job started with [`ExportSupervisor::start`].
///
/// Dropping the handle cancels the job and waits for it to tear down.
pub struct ExportHandle {
    cancel: CancelToken,
    monitor: Arc<JobMonitor>,
    thread: Option<JoinHandle<JobReport>>,
}

impl ExportHandle {
    pub fn progress(&self) -> ExportProgress {
        self.monitor.progress()
    }

    pub fn status(&self) -> JobStatus {
        self.monitor.status()
    }

    /// Request cancellation. Safe to call any number of times from any
    /// thread; has no effect once the job has finished.
    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Block until the job reaches a terminal state.
    pub fn wait(mut self) -> FramecastResult<JobReport> {
        let thread = self
            .thread
            .take()
            .ok_or_else(|| FramecastError::internal("export job already joined"))?;
        thread
            .join()
            .map_err(|_| FramecastError::internal("export supervisor panicked"))
    }
}

impl Drop for ExportHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.cancel.cancel();
            let _ = thread.join();
        }
    }
}
