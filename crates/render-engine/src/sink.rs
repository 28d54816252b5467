//! Frame sinks: the consumer end of the export pipeline.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use framecast_common::error::{FramecastError, FramecastResult};
use framecast_scene_model::ExportConfig;

use crate::cancel::CancelToken;
use crate::frame::RenderedFrame;

/// Configuration handed to a sink when it is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub quality: u8,
    pub output_path: PathBuf,
    pub encoder_path: PathBuf,
    /// Exact byte length of every frame.
    pub frame_len: usize,
    pub total_frames: u64,
}

impl SinkConfig {
    pub fn from_export(config: &ExportConfig, total_frames: u64) -> Self {
        Self {
            width: config.width,
            height: config.height,
            fps: config.fps,
            quality: config.quality,
            output_path: config.output_path.clone(),
            encoder_path: config.encoder_path.clone(),
            frame_len: config.frame_len(),
            total_frames,
        }
    }
}

/// How a sink finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkExit {
    pub exit_code: Option<i32>,
    pub frames_written: u64,
}

/// Consumes frames in strictly increasing index order.
///
/// Only the supervisor calls into a sink, from a single thread.
pub trait FrameSink: Send {
    /// Hand over one frame. May block while the consumer is busy; must return
    /// `Err(Cancelled)` promptly once the job's cancel token is raised.
    fn write(&mut self, frame: RenderedFrame) -> FramecastResult<()>;

    /// Signal end of input and wait for the consumer to finish.
    fn close(&mut self) -> FramecastResult<SinkExit>;

    /// Tear down without finishing the output. Idempotent.
    fn abort(&mut self);

    fn name(&self) -> &str;
}

/// Opens the sink for a job.
pub type SinkOpener =
    Box<dyn FnOnce(&SinkConfig, &CancelToken) -> FramecastResult<Box<dyn FrameSink>> + Send>;

/// What an [`InMemorySink`] recorded for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub index: u64,
    pub checksum: u64,
    /// Pixel data, kept only when the sink was built with `keep_pixels`.
    pub pixels: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct CaptureState {
    frames: Vec<CapturedFrame>,
    closed: bool,
    aborted: bool,
}

/// Read handle onto an [`InMemorySink`]'s recording. Stays valid after the
/// sink itself has been dropped by the pipeline.
#[derive(Debug, Clone, Default)]
pub struct FrameCapture {
    state: Arc<Mutex<CaptureState>>,
}

impl FrameCapture {
    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Indices in the order they were written.
    pub fn indices(&self) -> Vec<u64> {
        self.lock().frames.iter().map(|f| f.index).collect()
    }

    pub fn frames(&self) -> Vec<CapturedFrame> {
        self.lock().frames.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn was_aborted(&self) -> bool {
        self.lock().aborted
    }
}

type WriteHook = Box<dyn FnMut(u64) + Send>;

/// Sink that records frames in memory. Used by tests and dry runs.
pub struct InMemorySink {
    capture: FrameCapture,
    cancel: Option<CancelToken>,
    fail_at: Option<u64>,
    write_delay: Option<Duration>,
    keep_pixels: bool,
    on_write: Option<WriteHook>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self {
            capture: FrameCapture::default(),
            cancel: None,
            fail_at: None,
            write_delay: None,
            keep_pixels: false,
            on_write: None,
        }
    }

    /// Reject the frame with this index as if the encoder had exited.
    pub fn failing_at(mut self, index: u64) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Sleep before accepting each frame, to simulate a slow encoder.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    pub fn keep_pixels(mut self) -> Self {
        self.keep_pixels = true;
        self
    }

    /// Run `hook` with each index after the frame is recorded.
    pub fn on_write(mut self, hook: impl FnMut(u64) + Send + 'static) -> Self {
        self.on_write = Some(Box::new(hook));
        self
    }

    /// Observe cancellation while blocked in a write delay.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn capture(&self) -> FrameCapture {
        self.capture.clone()
    }

    /// Wrap this sink in a [`SinkOpener`] that wires in the job's cancel token.
    pub fn into_opener(self) -> SinkOpener {
        Box::new(move |_config, cancel| {
            Ok(Box::new(self.with_cancel_token(cancel.clone())) as Box<dyn FrameSink>)
        })
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSink for InMemorySink {
    fn write(&mut self, frame: RenderedFrame) -> FramecastResult<()> {
        {
            let state = self.capture.lock();
            if state.closed || state.aborted {
                return Err(FramecastError::internal("write to a finished sink"));
            }
        }
        if let Some(delay) = self.write_delay {
            std::thread::sleep(delay);
        }
        if self.cancelled() {
            return Err(FramecastError::Cancelled);
        }
        let index = frame.index();
        if self.fail_at == Some(index) {
            return Err(FramecastError::encoder(
                Some(1),
                format!("simulated encoder failure at frame {index}"),
            ));
        }

        let captured = CapturedFrame {
            index,
            checksum: frame.checksum(),
            pixels: self.keep_pixels.then(|| frame.into_pixels()),
        };
        self.capture.lock().frames.push(captured);

        if let Some(hook) = self.on_write.as_mut() {
            hook(index);
        }
        Ok(())
    }

    fn close(&mut self) -> FramecastResult<SinkExit> {
        let mut state = self.capture.lock();
        state.closed = true;
        Ok(SinkExit {
            exit_code: Some(0),
            frames_written: state.frames.len() as u64,
        })
    }

    fn abort(&mut self) {
        let mut state = self.capture.lock();
        if !state.closed {
            state.aborted = true;
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}
