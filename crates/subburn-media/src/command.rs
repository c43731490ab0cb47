//! Burn command builder and encode process runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::ProgressEstimator;

/// Lines of stderr retained for diagnostics.
const DIAGNOSTIC_TAIL_LINES: usize = 64;

/// Builder for a single subtitle-burn FFmpeg invocation.
#[derive(Debug, Clone)]
pub struct BurnCommand {
    /// Input video path
    input: PathBuf,
    /// Subtitle track path (extension selects the demuxer)
    subtitle: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Video codec
    video_codec: String,
    /// Constant rate factor (quality)
    crf: Option<u8>,
    /// Encoder preset
    preset: Option<String>,
    /// Copy the audio stream instead of re-encoding
    copy_audio: bool,
    /// Log level
    log_level: String,
}

impl BurnCommand {
    /// Create a new burn command.
    pub fn new(
        input: impl AsRef<Path>,
        subtitle: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            subtitle: subtitle.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            video_codec: "libx264".to_string(),
            crf: None,
            preset: None,
            copy_audio: true,
            log_level: "error".to_string(),
        }
    }

    /// Set the video codec.
    pub fn video_codec(mut self, codec: impl Into<String>) -> Self {
        self.video_codec = codec.into();
        self
    }

    /// Set CRF (quality).
    pub fn crf(mut self, crf: u8) -> Self {
        self.crf = Some(crf);
        self
    }

    /// Set encoder preset.
    pub fn preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = Some(preset.into());
        self
    }

    /// Re-encode audio instead of stream-copying it.
    pub fn reencode_audio(mut self) -> Self {
        self.copy_audio = false;
        self
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Declared output path.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build the argument list.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        // Overwrite output
        args.push("-y".to_string());

        // Log level
        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        // Input file
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        // Burn filter
        args.push("-vf".to_string());
        args.push(format!("subtitles='{}'", escape_filter_path(&self.subtitle)));

        // Video codec
        args.push("-c:v".to_string());
        args.push(self.video_codec.clone());

        if let Some(crf) = self.crf {
            args.push("-crf".to_string());
            args.push(crf.to_string());
        }

        if let Some(ref preset) = self.preset {
            args.push("-preset".to_string());
            args.push(preset.clone());
        }

        // Audio
        args.push("-c:a".to_string());
        args.push(if self.copy_audio { "copy" } else { "aac" }.to_string());

        // Output file
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Escape a path for use inside a single-quoted filter argument.
///
/// Backslashes become forward slashes and colons are escaped, since `:`
/// separates filter options. Quotes are escaped too because the filter
/// string is single-quoted.
pub fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

/// Outcome of one successful encode invocation.
#[derive(Debug, Clone)]
pub struct EncodeReport {
    /// Process exit code
    pub exit_code: Option<i32>,
    /// Captured diagnostic tail from stderr
    pub diagnostics: String,
    /// Wall-clock duration of the attempt
    pub elapsed: Duration,
}

/// Runner for encode commands with progress tracking and cancellation.
///
/// Exactly one external process is spawned per `run` call. The call
/// suspends until process exit, cancellation, or timeout; the child is
/// killed and reaped on every non-success path.
pub struct FfmpegRunner {
    /// Encoder binary name or path
    binary: String,
    /// Cancellation signal receiver
    cancel_rx: Option<watch::Receiver<bool>>,
    /// Per-attempt wall-clock ceiling
    timeout: Option<Duration>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    /// Create a new runner for the default `ffmpeg` binary.
    pub fn new() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            cancel_rx: None,
            timeout: None,
        }
    }

    /// Use a different encoder binary.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run a burn command, streaming progress percentages into the sink.
    ///
    /// `total_duration_ms` is the probed input duration used to scale
    /// progress reports. Succeeds only when the process exits 0 and the
    /// declared output file exists and is non-empty.
    pub async fn run<F>(
        &self,
        cmd: &BurnCommand,
        total_duration_ms: i64,
        on_progress: F,
    ) -> MediaResult<EncodeReport>
    where
        F: FnMut(u8) + Send + 'static,
    {
        let resolved = which::which(&self.binary)
            .map_err(|_| MediaError::EncoderNotFound(self.binary.clone()))?;

        if let Some(ref rx) = self.cancel_rx {
            if *rx.borrow() {
                return Err(MediaError::Cancelled);
            }
        }

        let args = cmd.build_args();
        debug!("Running encoder: {} {}", self.binary, args.join(" "));

        let started = Instant::now();
        let mut child = Command::new(&resolved)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::launch_failed(e.to_string()))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::launch_failed("stderr not captured"))?;

        let reader = tokio::spawn(read_encoder_output(
            stderr,
            ProgressEstimator::new(total_duration_ms),
            on_progress,
        ));

        let outcome = self.supervise(&mut child).await;

        // The pipe closes once the child is dead, so this join is bounded.
        let diagnostics = reader.await.unwrap_or_default();
        let elapsed = started.elapsed();

        let status = outcome?;

        if !status.success() {
            return Err(MediaError::encode_failed(
                "Encoder exited with non-zero status",
                Some(diagnostics),
                status.code(),
            ));
        }

        match tokio::fs::metadata(cmd.output()).await {
            Ok(meta) if meta.len() > 0 => {}
            _ => return Err(MediaError::EmptyOutput(cmd.output().to_path_buf())),
        }

        Ok(EncodeReport {
            exit_code: status.code(),
            diagnostics,
            elapsed,
        })
    }

    /// Await child exit, cancellation, or timeout, whichever comes first.
    async fn supervise(&self, child: &mut Child) -> MediaResult<std::process::ExitStatus> {
        let mut cancel_rx = self.cancel_rx.clone();
        let cancelled = async {
            match cancel_rx.as_mut() {
                Some(rx) => loop {
                    if *rx.borrow() {
                        break;
                    }
                    if rx.changed().await.is_err() {
                        // Sender gone: cancellation can never arrive.
                        std::future::pending::<()>().await;
                    }
                },
                None => std::future::pending().await,
            }
        };

        let deadline = async {
            match self.timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            status = child.wait() => Ok(status?),
            _ = cancelled => {
                warn!("Encode cancelled, killing process");
                let _ = child.kill().await;
                Err(MediaError::Cancelled)
            }
            _ = deadline => {
                let secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
                warn!("Encode timed out after {} seconds, killing process", secs);
                let _ = child.kill().await;
                Err(MediaError::Timeout(secs))
            }
        }
    }
}

/// Drain encoder stderr: progress reports go to the sink, everything else
/// into a bounded diagnostic tail.
async fn read_encoder_output<F>(
    stderr: ChildStderr,
    mut estimator: ProgressEstimator,
    mut on_progress: F,
) -> String
where
    F: FnMut(u8) + Send + 'static,
{
    let mut lines = BufReader::new(stderr).lines();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(DIAGNOSTIC_TAIL_LINES);

    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(pct) = estimator.parse_line(&line) {
            on_progress(pct);
        } else if !is_progress_noise(&line) && !line.trim().is_empty() {
            if tail.len() == DIAGNOSTIC_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }

    tail.into_iter().collect::<Vec<_>>().join("\n")
}

/// Progress blocks carry key=value lines we don't track (bitrate,
/// total_size, dup_frames, ...). Real diagnostics never look like a bare
/// lowercase key assignment.
fn is_progress_noise(line: &str) -> bool {
    line.split_once('=')
        .map(|(key, _)| {
            !key.is_empty()
                && key
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'.')
        })
        .unwrap_or(false)
}

/// Resolve an external binary, failing if it is not on PATH.
pub fn check_binary(name: &str) -> MediaResult<PathBuf> {
    which::which(name).map_err(|_| MediaError::EncoderNotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn write_stub(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn collected_progress() -> (Arc<Mutex<Vec<u8>>>, impl FnMut(u8) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |pct| sink.lock().unwrap().push(pct))
    }

    #[test]
    fn test_build_args() {
        let cmd = BurnCommand::new("in.mp4", "track.vtt", "out.mp4")
            .crf(23)
            .preset("fast");
        let args = cmd.build_args();

        assert_eq!(args[0], "-y");
        assert!(args.contains(&"-i".to_string()));
        assert!(args.contains(&"subtitles='track.vtt'".to_string()));
        assert!(args.contains(&"-c:v".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"-crf".to_string()));
        assert!(args.contains(&"copy".to_string()));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_escape_filter_path() {
        assert_eq!(
            escape_filter_path(Path::new("C:\\media\\track.vtt")),
            "C\\:/media/track.vtt"
        );
        assert_eq!(escape_filter_path(Path::new("/tmp/a.srt")), "/tmp/a.srt");
        assert_eq!(escape_filter_path(Path::new("it's.vtt")), "it\\'s.vtt");
    }

    #[test]
    fn test_progress_noise_detection() {
        assert!(is_progress_noise("bitrate=1200.1kbits/s"));
        assert!(is_progress_noise("total_size=123456"));
        assert!(!is_progress_noise("[libx264 @ 0x5594] broken header"));
        assert!(!is_progress_noise("Error opening input"));
    }

    #[tokio::test]
    async fn test_run_success_streams_progress() {
        let dir = TempDir::new().unwrap();
        let stub = write_stub(
            &dir,
            "ffmpeg",
            r#"for a in "$@"; do out="$a"; done
printf 'out_time_ms=2500000\nprogress=continue\nprogress=end\n' 1>&2
printf 'burned' > "$out""#,
        );

        let out = dir.path().join("out.mp4");
        let cmd = BurnCommand::new("in.mp4", "track.vtt", &out);
        let (seen, sink) = collected_progress();

        let report = FfmpegRunner::new()
            .with_binary(stub.to_string_lossy())
            .run(&cmd, 5_000, sink)
            .await
            .unwrap();

        assert_eq!(report.exit_code, Some(0));
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![50, 100]);
    }

    #[tokio::test]
    async fn test_run_nonzero_exit_carries_diagnostics() {
        let dir = TempDir::new().unwrap();
        let stub = write_stub(
            &dir,
            "ffmpeg",
            r#"echo 'Error: moov atom not found' 1>&2
exit 3"#,
        );

        let cmd = BurnCommand::new("in.mp4", "track.vtt", dir.path().join("out.mp4"));
        let err = FfmpegRunner::new()
            .with_binary(stub.to_string_lossy())
            .run(&cmd, 5_000, |_| {})
            .await
            .unwrap_err();

        match err {
            MediaError::EncodeFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert!(stderr.unwrap().contains("moov atom not found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_empty_output_fails() {
        let dir = TempDir::new().unwrap();
        let stub = write_stub(&dir, "ffmpeg", "exit 0");

        let cmd = BurnCommand::new("in.mp4", "track.vtt", dir.path().join("out.mp4"));
        let err = FfmpegRunner::new()
            .with_binary(stub.to_string_lossy())
            .run(&cmd, 5_000, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::EmptyOutput(_)));
    }

    #[tokio::test]
    async fn test_run_timeout_kills_process() {
        let dir = TempDir::new().unwrap();
        let stub = write_stub(&dir, "ffmpeg", "sleep 30");

        let cmd = BurnCommand::new("in.mp4", "track.vtt", dir.path().join("out.mp4"));
        let started = Instant::now();
        let err = FfmpegRunner::new()
            .with_binary(stub.to_string_lossy())
            .with_timeout(Duration::from_millis(200))
            .run(&cmd, 5_000, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_run_cancel_kills_process() {
        let dir = TempDir::new().unwrap();
        let stub = write_stub(&dir, "ffmpeg", "sleep 30");

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cmd = BurnCommand::new("in.mp4", "track.vtt", dir.path().join("out.mp4"));

        let runner = FfmpegRunner::new()
            .with_binary(stub.to_string_lossy())
            .with_cancel(cancel_rx);

        let started = Instant::now();
        let run = tokio::spawn(async move { runner.run(&cmd, 5_000, |_| {}).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel_tx.send(true).unwrap();

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, MediaError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let cmd = BurnCommand::new("in.mp4", "track.vtt", "out.mp4");
        let err = FfmpegRunner::new()
            .with_binary("/nonexistent/encoder-binary")
            .run(&cmd, 5_000, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::EncoderNotFound(_)));
    }
}
