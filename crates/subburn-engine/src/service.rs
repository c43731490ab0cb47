//! Service facade over the scheduler, ledger, and store.

use std::sync::Arc;

use tokio::fs;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use subburn_ledger::JobLedger;
use subburn_media::check_binary;
use subburn_models::{Job, JobId, JobState, JobStatus, SubtitleFormat};
use subburn_store::ArtifactStore;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::scheduler::Scheduler;

/// The subtitle-burn engine, as seen by its (out-of-scope) HTTP layer.
///
/// Submissions are durable in the ledger before `submit_job` returns;
/// encoding happens in the background on the scheduler's worker pool.
#[derive(Debug)]
pub struct BurnService {
    ledger: Arc<JobLedger>,
    store: Arc<ArtifactStore>,
    scheduler: Arc<Scheduler>,
    queue_tx: mpsc::UnboundedSender<JobId>,
    max_attempts: u32,
    dispatch: JoinHandle<()>,
}

impl BurnService {
    /// Start the engine.
    ///
    /// A missing encoder or probe binary is an unrecoverable configuration
    /// error: the service refuses to start rather than fail every job
    /// later.
    pub async fn start(config: EngineConfig, store: ArtifactStore) -> EngineResult<Self> {
        check_binary(&config.ffmpeg_bin)?;
        check_binary(&config.ffprobe_bin)?;

        store.init().await?;
        fs::create_dir_all(&config.work_dir).await?;

        let ledger = Arc::new(JobLedger::new());
        let store = Arc::new(store);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        let scheduler = Arc::new(Scheduler::new(
            config.clone(),
            Arc::clone(&ledger),
            Arc::clone(&store),
            queue_tx.clone(),
        ));
        let dispatch = tokio::spawn(Arc::clone(&scheduler).run(queue_rx));

        info!("Burn service started");

        Ok(Self {
            ledger,
            store,
            scheduler,
            queue_tx,
            max_attempts: config.max_attempts,
            dispatch,
        })
    }

    /// Start with configuration and store both read from the environment.
    pub async fn start_from_env() -> EngineResult<Self> {
        Self::start(EngineConfig::from_env(), ArtifactStore::from_env()).await
    }

    /// Submit a burn job. Returns once the job is recorded and enqueued.
    pub async fn submit_job(&self, video: Vec<u8>, subtitle: Vec<u8>) -> EngineResult<JobId> {
        let format = SubtitleFormat::sniff(&subtitle);
        let input_video = self.store.put_bytes(&video).await?;
        let track = self.store.put_bytes(&subtitle).await?;

        let job = self
            .ledger
            .create(input_video, track, format, self.max_attempts);
        self.queue_tx
            .send(job.id.clone())
            .map_err(|_| EngineError::Stopped)?;

        info!(job_id = %job.id, format = ?format, "Job submitted");
        Ok(job.id)
    }

    /// Poll-friendly status for a job.
    pub fn job_status(&self, job_id: &JobId) -> EngineResult<JobStatus> {
        Ok(self.ledger.get(job_id)?.status())
    }

    /// Full job record.
    pub fn job(&self, job_id: &JobId) -> EngineResult<Job> {
        Ok(self.ledger.get(job_id)?)
    }

    /// Fetch the burned output bytes of a finished job.
    pub async fn get_output(&self, job_id: &JobId) -> EngineResult<Vec<u8>> {
        let job = self.ledger.get(job_id)?;
        match (job.state, job.output) {
            (JobState::Done, Some(output)) => Ok(self.store.get_bytes(&output).await?),
            _ => Err(EngineError::NotReady),
        }
    }

    /// Request cancellation of a job.
    pub fn cancel_job(&self, job_id: &JobId) -> EngineResult<()> {
        self.scheduler.cancel(job_id)
    }

    /// Stop dispatching, wait (bounded) for in-flight encodes, and tear
    /// down the dispatch task.
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;
        self.dispatch.abort();
        let _ = self.dispatch.await;
        info!("Burn service stopped");
    }
}
