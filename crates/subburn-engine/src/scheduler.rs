//! Bounded-concurrency job dispatcher.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::fs;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, error, info, warn};

use subburn_ledger::{JobLedger, LedgerError};
use subburn_media::{probe_video, BurnCommand, FfmpegRunner, MediaError};
use subburn_models::{ArtifactRef, Job, JobId, JobState};
use subburn_store::ArtifactStore;

use crate::config::EngineConfig;
use crate::error::{classify_failure, failure_detail, EngineError, EngineResult, FailureKind};

/// FIFO dispatcher that drives queued jobs through the encoder.
///
/// A single dispatch loop owns every slot-claim decision: it pops job ids
/// in submission order, waits for a free worker slot, and spawns one
/// attempt task per claim. Retries re-enter the queue at the back after a
/// backoff delay, so a persistently failing job never starves fresh
/// submissions.
#[derive(Debug)]
pub struct Scheduler {
    config: EngineConfig,
    ledger: Arc<JobLedger>,
    store: Arc<ArtifactStore>,
    queue_tx: mpsc::UnboundedSender<JobId>,
    slots: Arc<Semaphore>,
    cancels: Mutex<HashMap<JobId, watch::Sender<bool>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    /// Create a new scheduler.
    pub fn new(
        config: EngineConfig,
        ledger: Arc<JobLedger>,
        store: Arc<ArtifactStore>,
        queue_tx: mpsc::UnboundedSender<JobId>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.worker_slots));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            ledger,
            store,
            queue_tx,
            slots,
            cancels: Mutex::new(HashMap::new()),
            shutdown_tx,
        }
    }

    /// Dispatch loop. Runs until shutdown.
    pub(crate) async fn run(self: Arc<Self>, mut queue_rx: mpsc::UnboundedReceiver<JobId>) {
        info!(
            worker_slots = self.config.worker_slots,
            max_attempts = self.config.max_attempts,
            "Scheduler started"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping dispatch");
                        break;
                    }
                }
                next = queue_rx.recv() => {
                    let Some(job_id) = next else { break };

                    // A job canceled while queued is skipped here and
                    // never reaches the invoker.
                    if !self.is_dispatchable(&job_id) {
                        continue;
                    }

                    // Waiting for a slot must still observe shutdown.
                    let permit = tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        acquired = Arc::clone(&self.slots).acquire_owned() => match acquired {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                    };

                    // Re-check after the possible wait for a slot.
                    if !self.is_dispatchable(&job_id) {
                        continue;
                    }

                    let scheduler = Arc::clone(&self);
                    tokio::spawn(async move {
                        let _permit = permit;
                        scheduler.run_attempt(job_id).await;
                    });
                }
            }
        }
    }

    fn is_dispatchable(&self, job_id: &JobId) -> bool {
        matches!(
            self.ledger.get(job_id),
            Ok(Job {
                state: JobState::Queued,
                ..
            })
        )
    }

    /// Execute one encode attempt end to end.
    async fn run_attempt(&self, job_id: JobId) {
        // Register the cancel signal before the job becomes Running, so a
        // cancel request always finds either a Queued job or a live signal.
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancels
            .lock()
            .expect("cancel registry lock poisoned")
            .insert(job_id.clone(), cancel_tx);

        let job = match self.ledger.mark_running(&job_id) {
            Ok(job) => job,
            Err(e) => {
                debug!(job_id = %job_id, "Skipping dispatch: {}", e);
                self.unregister_cancel(&job_id);
                return;
            }
        };

        info!(job_id = %job_id, attempt = job.attempt_count, "Encode attempt started");

        let outcome = self.execute(&job, cancel_rx).await;
        self.unregister_cancel(&job_id);

        match outcome {
            Ok(output) => {
                info!(job_id = %job_id, output = %output, "Job completed");
                if let Err(e) = self.ledger.mark_done(&job_id, output) {
                    error!(job_id = %job_id, "Failed to record completion: {}", e);
                }
            }
            Err(EngineError::Media(MediaError::Cancelled)) => {
                info!(job_id = %job_id, "Job canceled during encode");
                if let Err(e) = self.ledger.mark_canceled(&job_id) {
                    debug!(job_id = %job_id, "Cancel already recorded: {}", e);
                }
            }
            Err(err) => self.handle_failure(&job_id, job.attempt_count, err),
        }
    }

    /// Run one attempt inside a scratch directory, cleaning it up on every
    /// exit path. The stored output survives the cleanup: it is linked
    /// into the artifact store before the directory goes away.
    async fn execute(
        &self,
        job: &Job,
        cancel_rx: watch::Receiver<bool>,
    ) -> EngineResult<ArtifactRef> {
        let work_dir = self
            .config
            .work_dir
            .join(job.id.as_str())
            .join(format!("attempt-{}", job.attempt_count));
        fs::create_dir_all(&work_dir).await?;

        let result = self.execute_in(&work_dir, job, cancel_rx).await;

        if let Err(e) = fs::remove_dir_all(&work_dir).await {
            warn!(job_id = %job.id, "Failed to clean work dir: {}", e);
        }

        result
    }

    async fn execute_in(
        &self,
        work_dir: &std::path::Path,
        job: &Job,
        cancel_rx: watch::Receiver<bool>,
    ) -> EngineResult<ArtifactRef> {
        let input = self
            .store
            .materialize(&job.input_video, work_dir, "input.mp4")
            .await?;
        let track_name = format!("track.{}", job.subtitle_format.extension());
        let track = self
            .store
            .materialize(&job.subtitle, work_dir, &track_name)
            .await?;

        let info = probe_video(&self.config.ffprobe_bin, &input).await?;
        debug!(
            job_id = %job.id,
            duration = info.duration,
            codec = %info.codec,
            "Probed input video"
        );

        let output = work_dir.join("output.mp4");
        let cmd = BurnCommand::new(&input, &track, &output);

        let ledger = Arc::clone(&self.ledger);
        let job_id = job.id.clone();
        let report = FfmpegRunner::new()
            .with_binary(self.config.ffmpeg_bin.as_str())
            .with_cancel(cancel_rx)
            .with_timeout(self.config.attempt_timeout)
            .run(&cmd, info.duration_ms(), move |pct| {
                let _ = ledger.set_progress(&job_id, pct);
            })
            .await?;

        debug!(job_id = %job.id, elapsed = ?report.elapsed, "Encode finished");

        let artifact = self.store.put_file(&output).await?;
        Ok(artifact)
    }

    /// Apply the retry policy after a failed attempt.
    fn handle_failure(&self, job_id: &JobId, attempt: u32, err: EngineError) {
        let detail = failure_detail(&err);
        let retryable = classify_failure(&err) == FailureKind::Transient;

        if retryable && attempt < self.config.max_attempts {
            warn!(
                job_id = %job_id,
                attempt,
                error = %err,
                "Attempt failed, will retry"
            );

            let requeued = self
                .ledger
                .mark_failed(job_id, &detail)
                .and_then(|_| self.ledger.requeue(job_id));
            match requeued {
                Ok(_) => {
                    let delay = self.config.backoff_delay(attempt);
                    debug!(job_id = %job_id, delay = ?delay, "Backing off before re-dispatch");

                    let tx = self.queue_tx.clone();
                    let job_id = job_id.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(job_id);
                    });
                }
                Err(e) => {
                    // Canceled while the failure was being recorded.
                    debug!(job_id = %job_id, "Retry abandoned: {}", e);
                }
            }
        } else {
            error!(
                job_id = %job_id,
                attempt,
                retryable,
                error = %err,
                "Job failed"
            );
            if let Err(e) = self.ledger.mark_failed(job_id, detail) {
                debug!(job_id = %job_id, "Failure already recorded: {}", e);
            }
        }
    }

    /// Request cancellation of a job.
    ///
    /// Queued jobs are canceled in the ledger and never dispatched; a
    /// running job gets a forced-termination signal and transitions once
    /// the process is dead. Terminal jobs are a no-op.
    pub fn cancel(&self, job_id: &JobId) -> EngineResult<()> {
        // Signal first: if an encode is in flight this kills it promptly.
        self.signal_cancel(job_id);

        let job = self.ledger.get(job_id)?;
        match job.state {
            JobState::Queued => match self.ledger.mark_canceled(job_id) {
                Ok(_) => {
                    info!(job_id = %job_id, "Job canceled before dispatch");
                    Ok(())
                }
                Err(LedgerError::InvalidTransition { .. }) => {
                    // Dispatched while we looked: the signal path covers it.
                    self.signal_cancel(job_id);
                    Ok(())
                }
                Err(e) => Err(e.into()),
            },
            JobState::Running => Ok(()),
            // Idempotent on finished jobs.
            _ => Ok(()),
        }
    }

    fn signal_cancel(&self, job_id: &JobId) {
        if let Some(tx) = self
            .cancels
            .lock()
            .expect("cancel registry lock poisoned")
            .get(job_id)
        {
            let _ = tx.send(true);
        }
    }

    fn unregister_cancel(&self, job_id: &JobId) {
        self.cancels
            .lock()
            .expect("cancel registry lock poisoned")
            .remove(job_id);
    }

    /// Stop dispatching and wait (bounded) for in-flight attempts.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let all_slots = self.config.worker_slots as u32;
        match tokio::time::timeout(
            self.config.shutdown_timeout,
            self.slots.acquire_many(all_slots),
        )
        .await
        {
            Ok(_) => info!("Scheduler stopped"),
            Err(_) => warn!(
                "Shutdown timed out after {:?} with encodes still in flight",
                self.config.shutdown_timeout
            ),
        }
    }
}
