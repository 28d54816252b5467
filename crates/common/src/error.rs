//! Error types shared across Framecast crates.

use std::path::PathBuf;

/// Top-level error type for Framecast operations.
#[derive(Debug, thiserror::Error)]
pub enum FramecastError {
    /// Export parameters rejected before any thread or process starts.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The scene description could not be loaded or is malformed.
    #[error("Scene error: {message}")]
    Scene { message: String },

    /// A frame could not be rendered. Fatal to the whole job.
    #[error("Render error on frame {frame}: {message}")]
    Render { frame: u64, message: String },

    /// The encoder subprocess failed or closed its input early.
    #[error("Encoder failure (exit code {}): {message}", display_exit_code(.exit_code))]
    Encoder {
        exit_code: Option<i32>,
        message: String,
    },

    /// The job was cancelled on request.
    #[error("Export cancelled")]
    Cancelled,

    /// An internal invariant was broken (worker panic, ordering fault).
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using FramecastError.
pub type FramecastResult<T> = Result<T, FramecastError>;

impl FramecastError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn scene(msg: impl Into<String>) -> Self {
        Self::Scene {
            message: msg.into(),
        }
    }

    pub fn render(frame: u64, msg: impl Into<String>) -> Self {
        Self::Render {
            frame,
            message: msg.into(),
        }
    }

    pub fn encoder(exit_code: Option<i32>, msg: impl Into<String>) -> Self {
        Self::Encoder {
            exit_code,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
        }
    }

    /// Whether this error is the cancellation outcome rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

fn display_exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_error_message_includes_exit_code() {
        let err = FramecastError::encoder(Some(1), "broken pipe");
        assert_eq!(err.to_string(), "Encoder failure (exit code 1): broken pipe");

        let killed = FramecastError::encoder(None, "terminated by signal");
        assert!(killed.to_string().contains("exit code none"));
    }

    #[test]
    fn test_render_error_names_frame() {
        let err = FramecastError::render(42, "palette 'warm' is not defined");
        assert_eq!(
            err.to_string(),
            "Render error on frame 42: palette 'warm' is not defined"
        );
        assert!(!err.is_cancelled());
        assert!(FramecastError::Cancelled.is_cancelled());
    }
}
