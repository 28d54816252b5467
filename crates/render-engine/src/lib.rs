//! Framecast Render Engine
//!
//! Parallel frame rendering with strictly ordered delivery to an external
//! encoder process.
//!
//! # Pipeline Architecture
//!
//! ```text
//!             ┌── worker 0 ──┐
//! allocator ──┼── worker 1 ──┼──▶ OrderingBuffer ──▶ consume loop ──▶ FrameSink
//! (0..total)  └── worker N ──┘    (window W)          (supervisor)     (encoder stdin)
//! ```
//!
//! Workers render out of order; the buffer releases frames by index and
//! blocks producers that run more than `W` frames ahead of the encoder.

pub mod cancel;
pub mod encoder;
pub mod frame;
pub mod ordering;
pub mod renderer;
pub mod sink;
pub mod status;
pub mod supervisor;
pub mod workers;

pub use cancel::CancelToken;
pub use encoder::{encoder_version, SubprocessSink};
pub use frame::RenderedFrame;
pub use ordering::{BufferError, OrderingBuffer};
pub use renderer::{scene_renderer_factory, FrameRenderer, RendererFactory, SceneRenderer};
pub use sink::{FrameCapture, FrameSink, InMemorySink, SinkConfig, SinkExit, SinkOpener};
pub use status::*;
pub use supervisor::{ExportHandle, ExportSupervisor, JobMonitor};
pub use workers::{FrameAllocator, WorkerPool};
