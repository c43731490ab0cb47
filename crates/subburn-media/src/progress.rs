//! FFmpeg progress parsing.

use serde::{Deserialize, Serialize};

/// Progress information from FFmpeg's `-progress` output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Completion percentage given the input duration in milliseconds.
    pub fn percentage(&self, total_duration_ms: i64) -> f64 {
        if total_duration_ms <= 0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / total_duration_ms as f64) * 100.0).min(100.0)
    }
}

/// Incremental parser for `-progress` key=value lines.
///
/// FFmpeg emits a block of `key=value` lines per reporting interval,
/// terminated by a `progress=continue` (or `progress=end`) line. Fields
/// accumulate across lines; a percentage estimate is produced only on the
/// terminating line, so each returned value reflects one whole report.
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    total_duration_ms: i64,
    current: FfmpegProgress,
}

impl ProgressEstimator {
    /// Create an estimator for an input of the given duration.
    ///
    /// A zero or unknown duration disables percentage estimation until the
    /// final `progress=end` report, which always maps to 100.
    pub fn new(total_duration_ms: i64) -> Self {
        Self {
            total_duration_ms,
            current: FfmpegProgress::default(),
        }
    }

    /// Feed one line of encoder output.
    ///
    /// Returns an estimated completion percentage when the line completes a
    /// progress report, `None` for every other line.
    pub fn parse_line(&mut self, line: &str) -> Option<u8> {
        let line = line.trim();
        let (key, value) = line.split_once('=')?;

        match key {
            "out_time_ms" | "out_time_us" => {
                // Despite the name, recent FFmpeg reports out_time_ms in
                // microseconds; both keys carry the same unit.
                if let Ok(us) = value.parse::<i64>() {
                    self.current.out_time_ms = us / 1000;
                }
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    self.current.frame = frame;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    self.current.fps = fps;
                }
            }
            "speed" => {
                if value != "N/A" {
                    if let Some(speed_str) = value.strip_suffix('x') {
                        if let Ok(speed) = speed_str.parse() {
                            self.current.speed = speed;
                        }
                    }
                }
            }
            "progress" => {
                if value == "end" {
                    self.current.is_complete = true;
                    return Some(100);
                }
                return Some(self.current.percentage(self.total_duration_ms) as u8);
            }
            _ => {}
        }

        None
    }

    /// Last accumulated progress snapshot.
    pub fn snapshot(&self) -> &FfmpegProgress {
        &self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        let progress = FfmpegProgress {
            out_time_ms: 5000,
            ..Default::default()
        };

        assert!((progress.percentage(10000) - 50.0).abs() < 0.01);
        assert!((progress.percentage(5000) - 100.0).abs() < 0.01);
        assert_eq!(progress.percentage(0), 0.0);
    }

    #[test]
    fn test_report_accumulates_until_progress_key() {
        let mut est = ProgressEstimator::new(10_000);

        assert_eq!(est.parse_line("frame=120"), None);
        assert_eq!(est.parse_line("fps=30.0"), None);
        assert_eq!(est.parse_line("out_time_ms=5000000"), None);
        assert_eq!(est.parse_line("speed=1.5x"), None);

        let pct = est.parse_line("progress=continue");
        assert_eq!(pct, Some(50));

        let snap = est.snapshot();
        assert_eq!(snap.frame, 120);
        assert_eq!(snap.out_time_ms, 5000);
        assert!((snap.speed - 1.5).abs() < 0.01);
    }

    #[test]
    fn test_end_reports_hundred() {
        let mut est = ProgressEstimator::new(0);
        assert_eq!(est.parse_line("progress=end"), Some(100));
        assert!(est.snapshot().is_complete);
    }

    #[test]
    fn test_unrecognized_lines_ignored() {
        let mut est = ProgressEstimator::new(10_000);
        assert_eq!(est.parse_line(""), None);
        assert_eq!(est.parse_line("size=N/A"), None);
        assert_eq!(est.parse_line("not a progress line"), None);
        assert_eq!(est.parse_line("speed=N/A"), None);
    }

    #[test]
    fn test_percentage_clamped() {
        let mut est = ProgressEstimator::new(1_000);
        est.parse_line("out_time_ms=5000000");
        assert_eq!(est.parse_line("progress=continue"), Some(100));
    }
}
