//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration.
///
/// Every policy knob is env-overridable; the defaults are placeholders for
/// deployments that don't care to tune them.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker slots: maximum concurrently running encodes
    pub worker_slots: usize,
    /// Maximum encode attempts per job
    pub max_attempts: u32,
    /// Wall-clock ceiling per encode attempt
    pub attempt_timeout: Duration,
    /// Base delay for retry backoff (doubles each attempt)
    pub backoff_base: Duration,
    /// Maximum retry backoff delay
    pub backoff_cap: Duration,
    /// Scratch directory for per-attempt working files
    pub work_dir: PathBuf,
    /// Graceful shutdown ceiling
    pub shutdown_timeout: Duration,
    /// Encoder binary
    pub ffmpeg_bin: String,
    /// Probe binary
    pub ffprobe_bin: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_slots: 2,
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(1800), // 30 minutes
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(60),
            work_dir: PathBuf::from("/tmp/subburn/work"),
            shutdown_timeout: Duration::from_secs(30),
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            worker_slots: std::env::var("BURN_WORKER_SLOTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            max_attempts: std::env::var("BURN_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            attempt_timeout: Duration::from_secs(
                std::env::var("BURN_ATTEMPT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1800),
            ),
            backoff_base: Duration::from_millis(
                std::env::var("BURN_BACKOFF_BASE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2000),
            ),
            backoff_cap: Duration::from_millis(
                std::env::var("BURN_BACKOFF_CAP_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60_000),
            ),
            work_dir: std::env::var("BURN_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/subburn/work")),
            shutdown_timeout: Duration::from_secs(
                std::env::var("BURN_SHUTDOWN_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            ffmpeg_bin: std::env::var("BURN_FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_bin: std::env::var("BURN_FFPROBE_BIN")
                .unwrap_or_else(|_| "ffprobe".to_string()),
        }
    }

    /// Backoff delay before re-dispatching after the given attempt number.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff_base.saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.backoff_cap)
    }
}
