//! Clock utilities for export progress reporting.
//!
//! Every export job is anchored to a monotonic epoch recorded when the
//! job starts. This module provides:
//! - The job clock (elapsed time, wall-clock start stamp)
//! - ETA estimation from completed/total work
//! - A rate controller that throttles progress notifications

use std::time::{Duration, Instant};

/// A job clock that provides monotonic timestamps relative to the
/// moment an export started.
#[derive(Debug, Clone)]
pub struct ExportClock {
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339 string).
    epoch_wall: String,
}

impl ExportClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Nanoseconds elapsed since the job started.
    pub fn elapsed_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Seconds elapsed since the job started.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at job start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }

    /// Estimated seconds remaining after `elapsed_secs`, given `done` of `total` units.
    pub fn eta_secs(elapsed_secs: f64, done: u64, total: u64) -> f64 {
        if done == 0 || total == 0 || done >= total {
            return 0.0;
        }
        let per_unit = elapsed_secs / done as f64;
        (per_unit * (total - done) as f64).max(0.0)
    }
}

/// Throttle for periodic notifications (progress callbacks, log lines).
#[derive(Debug)]
pub struct RateController {
    target_interval_ns: u64,
    last_tick_ns: Option<u64>,
}

impl RateController {
    /// Create a controller that fires at most once per `interval`.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            target_interval_ns: interval.as_nanos() as u64,
            last_tick_ns: None,
        }
    }

    /// Check if enough time has passed for the next tick.
    /// Returns true and updates internal state if ready.
    /// The first call always returns true.
    pub fn should_tick(&mut self, current_ns: u64) -> bool {
        match self.last_tick_ns {
            None => {
                self.last_tick_ns = Some(current_ns);
                true
            }
            Some(last) if current_ns >= last.saturating_add(self.target_interval_ns) => {
                self.last_tick_ns = Some(current_ns);
                true
            }
            _ => false,
        }
    }
}
