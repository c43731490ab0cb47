//! In-process job ledger implementation.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use tracing::{debug, info};

use subburn_models::{ArtifactRef, Job, JobId, JobState, SubtitleFormat};

use crate::error::{LedgerError, LedgerResult};

/// Ledger of all submitted burn jobs.
///
/// One entry per submission, retained until an external retention policy
/// purges it. A single mutex serializes transitions per job; readers get
/// clone-out snapshots.
#[derive(Debug, Default)]
pub struct JobLedger {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl JobLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new queued job.
    pub fn create(
        &self,
        input_video: ArtifactRef,
        subtitle: ArtifactRef,
        subtitle_format: SubtitleFormat,
        max_attempts: u32,
    ) -> Job {
        let job = Job::new(input_video, subtitle, subtitle_format, max_attempts);
        info!(job_id = %job.id, "Job created");

        let mut jobs = self.jobs.lock().expect("ledger lock poisoned");
        jobs.insert(job.id.clone(), job.clone());
        job
    }

    /// Snapshot of a job.
    pub fn get(&self, job_id: &JobId) -> LedgerResult<Job> {
        let jobs = self.jobs.lock().expect("ledger lock poisoned");
        jobs.get(job_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(job_id.clone()))
    }

    /// Number of recorded jobs.
    pub fn len(&self) -> usize {
        self.jobs.lock().expect("ledger lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatch claimed a slot: start an encode attempt.
    ///
    /// Increments the attempt counter; the first attempt stamps
    /// `started_at`.
    pub fn mark_running(&self, job_id: &JobId) -> LedgerResult<Job> {
        self.apply(job_id, JobState::Running, |job| {
            job.attempt_count += 1;
            if job.started_at.is_none() {
                job.started_at = Some(Utc::now());
            }
        })
    }

    /// Encode succeeded and the output artifact is stored.
    pub fn mark_done(&self, job_id: &JobId, output: ArtifactRef) -> LedgerResult<Job> {
        self.apply(job_id, JobState::Done, |job| {
            job.output = Some(output);
            job.progress_percent = 100;
            job.finished_at = Some(Utc::now());
        })
    }

    /// Encode attempt failed.
    pub fn mark_failed(&self, job_id: &JobId, error: impl Into<String>) -> LedgerResult<Job> {
        self.apply(job_id, JobState::Failed, |job| {
            job.error_detail = Some(error.into());
            job.finished_at = Some(Utc::now());
        })
    }

    /// Re-queue a failed job for another attempt.
    ///
    /// Permitted only while the attempt budget is not exhausted; the
    /// failure detail is cleared since the job is live again.
    pub fn requeue(&self, job_id: &JobId) -> LedgerResult<Job> {
        self.apply(job_id, JobState::Queued, |job| {
            job.error_detail = None;
            job.finished_at = None;
        })
    }

    /// Explicit cancellation.
    pub fn mark_canceled(&self, job_id: &JobId) -> LedgerResult<Job> {
        self.apply(job_id, JobState::Canceled, |job| {
            job.finished_at = Some(Utc::now());
        })
    }

    /// Record a progress report.
    ///
    /// Accepted only while the job is `Running`; out-of-order or
    /// regressive reports are discarded. Returns the effective percent.
    pub fn set_progress(&self, job_id: &JobId, percent: u8) -> LedgerResult<u8> {
        let mut jobs = self.jobs.lock().expect("ledger lock poisoned");
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| LedgerError::NotFound(job_id.clone()))?;

        if job.state == JobState::Running && percent.min(100) > job.progress_percent {
            job.progress_percent = percent.min(100);
        }
        Ok(job.progress_percent)
    }

    /// Validate and apply one state transition atomically.
    fn apply(
        &self,
        job_id: &JobId,
        to: JobState,
        mutate: impl FnOnce(&mut Job),
    ) -> LedgerResult<Job> {
        let mut jobs = self.jobs.lock().expect("ledger lock poisoned");
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| LedgerError::NotFound(job_id.clone()))?;

        let from = job.state;
        if !transition_allowed(job, to) {
            return Err(LedgerError::InvalidTransition {
                job_id: job_id.clone(),
                from,
                to,
            });
        }

        mutate(job);
        job.state = to;
        debug!(job_id = %job_id, from = %from, to = %to, attempt = job.attempt_count, "Job state transition");
        Ok(job.clone())
    }
}

/// The job state machine.
///
/// queued -> running -> {done, failed}; failed -> queued while attempts
/// remain; queued/running -> canceled on explicit request.
fn transition_allowed(job: &Job, to: JobState) -> bool {
    match (job.state, to) {
        (JobState::Queued, JobState::Running) => true,
        (JobState::Running, JobState::Done) => true,
        (JobState::Running, JobState::Failed) => true,
        (JobState::Failed, JobState::Queued) => job.attempt_count < job.max_attempts,
        (JobState::Queued, JobState::Canceled) => true,
        (JobState::Running, JobState::Canceled) => true,
        _ => false,
    }
}
