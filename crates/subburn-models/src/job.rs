//! Burn job definitions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{ArtifactRef, SubtitleFormat};

/// Unique identifier for a burn job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a burn job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job is waiting for a worker slot
    #[default]
    Queued,
    /// An encode attempt is in flight
    Running,
    /// Output artifact stored, job finished
    Done,
    /// Job failed (terminal once retries are exhausted)
    Failed,
    /// Job was canceled before or during an encode
    Canceled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Canceled => "canceled",
        }
    }

    /// Terminal states never transition again.
    ///
    /// `Failed` is only conditionally terminal (a retry moves it back to
    /// `Queued` while attempts remain), so it is not listed here; the
    /// ledger gates that edge on the attempt budget.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Canceled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A subtitle-burn job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Input video in the artifact store
    pub input_video: ArtifactRef,

    /// Subtitle track in the artifact store
    pub subtitle: ArtifactRef,

    /// Subtitle format, sniffed at submission
    pub subtitle_format: SubtitleFormat,

    /// Burned output; present if and only if the job is `Done`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<ArtifactRef>,

    /// Job state
    #[serde(default)]
    pub state: JobState,

    /// Progress (0-100), non-decreasing over the job's lifetime
    #[serde(default)]
    pub progress_percent: u8,

    /// Number of encode attempts started so far
    #[serde(default)]
    pub attempt_count: u32,

    /// Maximum encode attempts allowed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Error message (set only when `Failed`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// First dispatch timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Terminal-state timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

fn default_max_attempts() -> u32 {
    3
}

impl Job {
    /// Create a new queued job.
    pub fn new(
        input_video: ArtifactRef,
        subtitle: ArtifactRef,
        subtitle_format: SubtitleFormat,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: JobId::new(),
            input_video,
            subtitle,
            subtitle_format,
            output: None,
            state: JobState::Queued,
            progress_percent: 0,
            attempt_count: 0,
            max_attempts,
            error_detail: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Check whether another encode attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.state == JobState::Failed && self.attempt_count < self.max_attempts
    }

    /// Poll-friendly status view of this job.
    pub fn status(&self) -> JobStatus {
        JobStatus {
            id: self.id.clone(),
            state: self.state,
            progress_percent: self.progress_percent,
            error_detail: self.error_detail.clone(),
        }
    }
}

/// Status snapshot returned to pollers.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobStatus {
    /// Job ID
    pub id: JobId,
    /// Job state
    pub state: JobState,
    /// Progress (0-100)
    pub progress_percent: u8,
    /// Error message, present only for failed jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}
