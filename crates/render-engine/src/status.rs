//! Job status, progress snapshots, and final reports.

use std::path::{Path, PathBuf};

use framecast_common::error::{FramecastError, FramecastResult};
use serde::Serialize;

/// Lifecycle of an export job.
///
/// `Succeeded`, `Cancelled` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Running,
    Succeeded,
    Cancelled,
    Failed { reason: FailureReason },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Cancelled | JobStatus::Failed { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Failed { .. } => "failed",
        }
    }
}

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("frame {frame} could not be rendered: {message}")]
    Render { frame: u64, message: String },

    #[error("the encoder failed ({}): {message}", describe_exit(.exit_code))]
    Encoder {
        exit_code: Option<i32>,
        message: String,
    },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl FailureReason {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classify a pipeline error. Cancellation is not a failure and maps to
    /// `None`.
    pub fn from_error(err: &FramecastError) -> Option<Self> {
        match err {
            FramecastError::Cancelled => None,
            FramecastError::Render { frame, message } => Some(Self::Render {
                frame: *frame,
                message: message.clone(),
            }),
            FramecastError::Encoder { exit_code, message } => Some(Self::Encoder {
                exit_code: *exit_code,
                message: message.clone(),
            }),
            other => Some(Self::internal(other.to_string())),
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code".to_string(),
    }
}

/// Stages of the export process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStage {
    Preparing,
    Rendering,
    Finalizing,
    Complete,
    Cancelled,
    Failed,
}

/// Export progress report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportProgress {
    /// Current progress [0.0, 1.0].
    pub progress: f64,

    /// Frames handed to the encoder so far.
    pub frames_completed: u64,

    /// Total frames to render.
    pub total_frames: u64,

    /// Estimated time remaining in seconds.
    pub eta_secs: f64,

    /// Current stage.
    pub stage: ExportStage,
}

impl ExportProgress {
    pub fn new(frames_completed: u64, total_frames: u64, eta_secs: f64, stage: ExportStage) -> Self {
        let progress = if total_frames == 0 {
            0.0
        } else {
            (frames_completed as f64 / total_frames as f64).clamp(0.0, 1.0)
        };
        Self {
            progress,
            frames_completed,
            total_frames,
            eta_secs,
            stage,
        }
    }
}

/// Progress callback for export rendering.
pub type ProgressCallback = Box<dyn Fn(ExportProgress) + Send>;

/// Per-worker statistics collected when the pool is joined.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkerSummary {
    pub worker_id: usize,
    pub frames_rendered: u64,
    pub render_secs: f64,
}

/// Final outcome of an export job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub status: JobStatus,
    pub frames_completed: u64,
    pub total_frames: u64,
    pub elapsed_secs: f64,
    /// Job start (RFC 3339).
    pub started_at: String,
    pub output_path: PathBuf,
    /// Highest number of out-of-order frames held by the ordering buffer.
    pub peak_buffered_frames: usize,
    pub lookahead_window: usize,
    pub workers: Vec<WorkerSummary>,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        self.status == JobStatus::Succeeded
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> FramecastResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
