//! Engine error types and failure classification.

use thiserror::Error;

use subburn_ledger::LedgerError;
use subburn_media::MediaError;
use subburn_store::StorageError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Output not ready")]
    NotReady,

    #[error("Scheduler stopped")]
    Stopped,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// True for unknown-job-id errors, whichever layer raised them.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::Ledger(LedgerError::NotFound(_)))
            || matches!(self, EngineError::Storage(StorageError::NotFound(_)))
    }
}

/// Whether a failed encode attempt may succeed on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Expected to possibly succeed on retry (resource contention, timeout)
    Transient,
    /// The input or request itself is invalid; retrying cannot help
    Permanent,
}

/// Encoder diagnostic signatures that mark an attempt as non-retryable.
///
/// Matched case-insensitively against the encoder's stderr tail. These all
/// describe the input rather than the machine it ran on.
const PERMANENT_SIGNATURES: &[&str] = &[
    "invalid data found when processing input",
    "moov atom not found",
    "unknown encoder",
    "unsupported codec",
    "codec not currently supported",
    "error initializing filter",
    "unable to parse option value",
    "invalid argument",
    "error opening input",
    "no such file or directory",
];

/// Classify an attempt failure for retry accounting.
pub fn classify_failure(err: &EngineError) -> FailureKind {
    match err {
        EngineError::Media(media) => classify_media_failure(media),
        // Artifact I/O hiccups are retried within the attempt budget.
        EngineError::Storage(_) | EngineError::Io(_) => FailureKind::Transient,
        _ => FailureKind::Permanent,
    }
}

fn classify_media_failure(err: &MediaError) -> FailureKind {
    match err {
        MediaError::Timeout(_) => FailureKind::Transient,
        // An unstartable or missing binary never heals by retrying the job.
        MediaError::EncoderNotFound(_)
        | MediaError::ProbeNotFound(_)
        | MediaError::LaunchFailed { .. } => FailureKind::Permanent,
        // Probe rejections mean the input is not a usable video.
        MediaError::ProbeFailed { .. } | MediaError::InvalidVideo(_) => FailureKind::Permanent,
        MediaError::EncodeFailed {
            message, stderr, ..
        } => {
            let mut haystack = message.to_lowercase();
            if let Some(s) = stderr {
                haystack.push('\n');
                haystack.push_str(&s.to_lowercase());
            }
            if PERMANENT_SIGNATURES.iter().any(|sig| haystack.contains(sig)) {
                FailureKind::Permanent
            } else {
                FailureKind::Transient
            }
        }
        _ => FailureKind::Transient,
    }
}

/// Human-readable failure detail for the job record.
///
/// Callers see this instead of raw process output, so the diagnostic tail
/// is trimmed to its most useful end.
pub fn failure_detail(err: &EngineError) -> String {
    const MAX_DETAIL: usize = 500;

    let detail = match err {
        EngineError::Media(media) => match media.diagnostics() {
            Some(diag) if !diag.is_empty() => {
                format!("{}: {}", media, diag.lines().last().unwrap_or(diag))
            }
            _ => media.to_string(),
        },
        other => other.to_string(),
    };

    if detail.len() > MAX_DETAIL {
        let mut end = MAX_DETAIL;
        while !detail.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &detail[..end])
    } else {
        detail
    }
}
