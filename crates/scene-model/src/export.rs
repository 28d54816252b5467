//! Export configuration.

use std::path::PathBuf;

use framecast_common::config::{hardware_concurrency, ExportDefaults};
use framecast_common::error::{FramecastError, FramecastResult};
use serde::{Deserialize, Serialize};

/// Bytes per pixel of every rendered frame (packed RGB24).
pub const BYTES_PER_PIXEL: usize = 3;

/// Largest accepted output edge in pixels.
pub const MAX_DIMENSION: u32 = 16_384;

/// Largest accepted frame rate.
pub const MAX_FPS: u32 = 240;

/// Largest accepted quality value.
pub const MAX_QUALITY: u8 = 100;

/// Worker ceiling never drops below this, so configs stay portable
/// between machines with different core counts.
pub const MIN_THREAD_LIMIT: usize = 8;

/// Default look-ahead window as a multiple of the worker count.
pub const DEFAULT_LOOKAHEAD_FACTOR: usize = 3;

/// Parameters of one export job. Immutable once handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Output resolution (width x height in pixels).
    pub width: u32,
    pub height: u32,

    /// Output frame rate.
    pub fps: u32,

    /// Export length in seconds.
    pub length_secs: f64,

    /// Number of render worker threads.
    pub threads: usize,

    /// Quality on the 0–100 scale. Mapped to encoder units by the sink.
    pub quality: u8,

    /// Output video path.
    pub output_path: PathBuf,

    /// Encoder executable.
    pub encoder_path: PathBuf,

    /// Look-ahead window override. `None` = threads × 3.
    #[serde(default)]
    pub lookahead: Option<usize>,
}

impl ExportConfig {
    /// Build a config from persisted defaults.
    pub fn from_defaults(defaults: &ExportDefaults, output_path: impl Into<PathBuf>) -> Self {
        let threads = defaults.resolved_threads();
        Self {
            width: defaults.width,
            height: defaults.height,
            fps: defaults.fps,
            length_secs: defaults.length_secs,
            threads,
            quality: defaults.quality,
            output_path: output_path.into(),
            encoder_path: defaults.encoder_path.clone(),
            lookahead: Some(threads.saturating_mul(defaults.lookahead_factor.max(1))),
        }
    }

    /// Number of frames in the export: `round(length × fps)`.
    pub fn total_frames(&self) -> u64 {
        let frames = (self.length_secs * self.fps as f64).round();
        if frames.is_finite() && frames > 0.0 {
            frames as u64
        } else {
            0
        }
    }

    /// Size of one raw frame in bytes.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    /// Maximum number of out-of-order frames the ordering buffer may hold.
    pub fn lookahead_window(&self) -> usize {
        self.lookahead
            .unwrap_or(self.threads.saturating_mul(DEFAULT_LOOKAHEAD_FACTOR))
            .max(1)
    }

    /// Presentation time of a frame.
    pub fn frame_time_secs(&self, index: u64) -> f64 {
        index as f64 / self.fps.max(1) as f64
    }

    /// Upper bound accepted for `threads` on this machine.
    pub fn thread_limit() -> usize {
        hardware_concurrency().max(MIN_THREAD_LIMIT)
    }

    /// Check every invariant. Returns the total frame count on success.
    pub fn validate(&self) -> FramecastResult<u64> {
        if self.width == 0 || self.height == 0 {
            return Err(FramecastError::config(format!(
                "output size must be positive (got {}x{})",
                self.width, self.height
            )));
        }
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            return Err(FramecastError::config(format!(
                "output size {}x{} exceeds the {MAX_DIMENSION}px limit",
                self.width, self.height
            )));
        }
        if self.fps == 0 || self.fps > MAX_FPS {
            return Err(FramecastError::config(format!(
                "fps must be between 1 and {MAX_FPS} (got {})",
                self.fps
            )));
        }
        if !self.length_secs.is_finite() || self.length_secs <= 0.0 {
            return Err(FramecastError::config(format!(
                "length must be a positive number of seconds (got {})",
                self.length_secs
            )));
        }
        let limit = Self::thread_limit();
        if self.threads == 0 || self.threads > limit {
            return Err(FramecastError::config(format!(
                "thread count must be between 1 and {limit} (got {})",
                self.threads
            )));
        }
        if self.quality > MAX_QUALITY {
            return Err(FramecastError::config(format!(
                "quality must be between 0 and {MAX_QUALITY} (got {})",
                self.quality
            )));
        }
        if let Some(window) = self.lookahead {
            if window < self.threads {
                return Err(FramecastError::config(format!(
                    "look-ahead window ({window}) must be at least the thread count ({})",
                    self.threads
                )));
            }
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(FramecastError::config("output path is empty"));
        }
        if self.encoder_path.as_os_str().is_empty() {
            return Err(FramecastError::config("encoder path is empty"));
        }

        let total = self.total_frames();
        if total == 0 {
            return Err(FramecastError::config(format!(
                "{}s at {} fps yields no frames",
                self.length_secs, self.fps
            )));
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn base_config() -> ExportConfig {
        ExportConfig {
            width: 320,
            height: 240,
            fps: 30,
            length_secs: 2.0,
            threads: 4,
            quality: 50,
            output_path: PathBuf::from("out.mp4"),
            encoder_path: PathBuf::from("ffmpeg"),
            lookahead: None,
        }
    }

    #[test]
    fn test_reference_config_has_sixty_frames() {
        let config = base_config();
        assert_eq!(config.validate().unwrap(), 60);
        assert_eq!(config.frame_len(), 320 * 240 * 3);
        assert_eq!(config.lookahead_window(), 12);
        assert!((config.frame_time_secs(15) - 0.5).abs() < 1e-12);
    }

    fn assert_rejected(label: &str, mutate: impl FnOnce(&mut ExportConfig)) {
        let mut config = base_config();
        mutate(&mut config);
        let err = config.validate().unwrap_err();
        assert!(
            matches!(err, FramecastError::Config { .. }),
            "{label}: expected config error, got {err:?}"
        );
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        assert_rejected("zero width", |c| c.width = 0);
        assert_rejected("huge height", |c| c.height = MAX_DIMENSION + 1);
        assert_rejected("zero fps", |c| c.fps = 0);
        assert_rejected("negative length", |c| c.length_secs = -1.0);
        assert_rejected("nan length", |c| c.length_secs = f64::NAN);
        assert_rejected("zero threads", |c| c.threads = 0);
        assert_rejected("too many threads", |c| {
            c.threads = ExportConfig::thread_limit() + 1
        });
        assert_rejected("quality", |c| c.quality = 101);
        assert_rejected("small window", |c| c.lookahead = Some(2));
        assert_rejected("no output", |c| c.output_path = PathBuf::new());
        assert_rejected("rounds to zero", |c| c.length_secs = 0.01);
    }

    #[test]
    fn test_from_defaults_sizes_window_from_threads() {
        let defaults = ExportDefaults {
            threads: 2,
            lookahead_factor: 4,
            ..ExportDefaults::default()
        };
        let config = ExportConfig::from_defaults(&defaults, "clip.webm");
        assert_eq!(config.threads, 2);
        assert_eq!(config.lookahead_window(), 8);
        assert_eq!(config.output_path, PathBuf::from("clip.webm"));
    }

    proptest! {
        #[test]
        fn prop_total_frames_matches_rounded_product(
            fps in 1u32..=MAX_FPS,
            length_ms in 1u32..600_000,
        ) {
            let config = ExportConfig {
                fps,
                length_secs: length_ms as f64 / 1000.0,
                ..base_config()
            };
            let expected = (config.length_secs * fps as f64).round() as u64;
            prop_assert_eq!(config.total_frames(), expected);
            match config.validate() {
                Ok(total) => prop_assert!(total > 0 && total == expected),
                Err(_) => prop_assert_eq!(expected, 0),
            }
        }

        #[test]
        fn prop_default_window_covers_every_worker(threads in 1usize..=MIN_THREAD_LIMIT) {
            let config = ExportConfig { threads, ..base_config() };
            prop_assert!(config.lookahead_window() >= threads);
        }
    }
}
