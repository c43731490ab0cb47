//! End-to-end engine tests against stub encoder binaries.
//!
//! Each test builds a scratch workspace with a stub `ffmpeg` (a shell
//! script whose behavior the test picks) and a stub `ffprobe` that reports
//! a 5 second input, then drives the full service: store ingest, ledger,
//! dispatch, retry, cancellation.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::TempDir;

use subburn_engine::{BurnService, EngineConfig, EngineError};
use subburn_models::{JobId, JobState};
use subburn_store::{ArtifactStore, StoreConfig};

const PROBE_JSON: &str = r#"{"format": {"duration": "5.000000", "size": "1024"}, "streams": [{"codec_type": "video", "codec_name": "h264", "width": 320, "height": 240}]}"#;

/// Stub ffmpeg that reports progress and writes a deterministic output.
/// Sleeps briefly between reports so pollers can observe the running job.
const ENCODER_OK: &str = r#"for a in "$@"; do out="$a"; done
printf 'out_time_ms=1000000\nprogress=continue\n' 1>&2
sleep 0.05
printf 'out_time_ms=2500000\nprogress=continue\n' 1>&2
sleep 0.05
printf 'progress=end\n' 1>&2
printf 'burned-output' > "$out""#;

const ENCODER_HANG: &str = "sleep 30";

const ENCODER_TRANSIENT: &str = r#"echo 'Cannot allocate memory' 1>&2
exit 1"#;

const ENCODER_PERMANENT: &str = r#"echo 'Invalid data found when processing input' 1>&2
exit 1"#;

struct TestEngine {
    dir: TempDir,
    service: BurnService,
    invocation_log: PathBuf,
}

impl TestEngine {
    /// Timestamps (ns) of every encoder invocation, in order.
    fn invocations(&self) -> Vec<u128> {
        match std::fs::read_to_string(&self.invocation_log) {
            Ok(content) => content
                .lines()
                .filter_map(|l| l.trim().parse().ok())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn write_stub(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

async fn start_engine(encoder_body: &str, tune: impl FnOnce(&mut EngineConfig)) -> TestEngine {
    start_engine_with_probe(encoder_body, &format!("printf '%s' '{}'", PROBE_JSON), tune).await
}

async fn start_engine_with_probe(
    encoder_body: &str,
    probe_body: &str,
    tune: impl FnOnce(&mut EngineConfig),
) -> TestEngine {
    let dir = TempDir::new().unwrap();
    let invocation_log = dir.path().join("invocations.log");

    // Every encoder run stamps a nanosecond timestamp first.
    let logged_body = format!(
        "date +%s%N >> \"{}\"\n{}",
        invocation_log.display(),
        encoder_body
    );
    let ffmpeg = write_stub(dir.path(), "ffmpeg", &logged_body);
    let ffprobe = write_stub(dir.path(), "ffprobe", probe_body);

    let mut config = EngineConfig {
        worker_slots: 2,
        max_attempts: 3,
        attempt_timeout: Duration::from_secs(60),
        backoff_base: Duration::from_millis(50),
        backoff_cap: Duration::from_secs(5),
        work_dir: dir.path().join("work"),
        shutdown_timeout: Duration::from_secs(5),
        ffmpeg_bin: ffmpeg.to_string_lossy().to_string(),
        ffprobe_bin: ffprobe.to_string_lossy().to_string(),
    };
    tune(&mut config);

    let store = ArtifactStore::new(StoreConfig {
        root: dir.path().join("store"),
    });
    let service = BurnService::start(config, store).await.unwrap();

    TestEngine {
        dir,
        service,
        invocation_log,
    }
}

async fn wait_for_terminal(service: &BurnService, job_id: &JobId, ceiling: Duration) -> JobState {
    let deadline = Instant::now() + ceiling;
    loop {
        let status = service.job_status(job_id).unwrap();
        if matches!(
            status.state,
            JobState::Done | JobState::Failed | JobState::Canceled
        ) {
            return status.state;
        }
        assert!(
            Instant::now() < deadline,
            "job {} stuck in {:?}",
            job_id,
            status.state
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_state(service: &BurnService, job_id: &JobId, state: JobState, ceiling: Duration) {
    let deadline = Instant::now() + ceiling;
    loop {
        if service.job_status(job_id).unwrap().state == state {
            return;
        }
        assert!(Instant::now() < deadline, "job never reached {:?}", state);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn video(tag: &str) -> Vec<u8> {
    format!("fake-video-bytes-{}", tag).into_bytes()
}

fn vtt() -> Vec<u8> {
    b"WEBVTT\n\n00:00:01.000 --> 00:00:04.000\nHello World\n".to_vec()
}

#[tokio::test]
async fn submit_runs_to_done_with_monotone_progress() {
    let engine = start_engine(ENCODER_OK, |_| {}).await;

    let job_id = engine
        .service
        .submit_job(video("happy"), vtt())
        .await
        .unwrap();

    // Poll the whole lifecycle, recording every observation.
    let mut states = Vec::new();
    let mut progress = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = engine.service.job_status(&job_id).unwrap();
        states.push(status.state);
        progress.push(status.progress_percent);
        if matches!(status.state, JobState::Done | JobState::Failed) {
            break;
        }
        assert!(Instant::now() < deadline, "job never finished");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(*states.last().unwrap(), JobState::Done);
    assert!(states.contains(&JobState::Running));
    assert!(
        progress.windows(2).all(|w| w[0] <= w[1]),
        "progress regressed: {:?}",
        progress
    );
    assert_eq!(*progress.last().unwrap(), 100);

    let output = engine.service.get_output(&job_id).await.unwrap();
    assert_eq!(output, b"burned-output");

    let job = engine.service.job(&job_id).unwrap();
    assert_eq!(job.attempt_count, 1);
    assert!(job.output.is_some());
    assert!(job.started_at.is_some());
    assert!(job.finished_at.is_some());
    assert_eq!(job.error_detail, None);
}

#[tokio::test]
async fn running_jobs_never_exceed_worker_slots() {
    let engine = start_engine("sleep 0.3\nfor a in \"$@\"; do out=\"$a\"; done\nprintf 'x' > \"$out\"", |c| {
        c.worker_slots = 2;
    })
    .await;

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(
            engine
                .service
                .submit_job(video(&format!("slot-{i}")), vtt())
                .await
                .unwrap(),
        );
    }

    let mut max_running = 0usize;
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let statuses: Vec<_> = ids
            .iter()
            .map(|id| engine.service.job_status(id).unwrap())
            .collect();
        let running = statuses
            .iter()
            .filter(|s| s.state == JobState::Running)
            .count();
        max_running = max_running.max(running);

        if statuses.iter().all(|s| s.state == JobState::Done) {
            break;
        }
        assert!(Instant::now() < deadline, "jobs never drained");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(max_running >= 1);
    assert!(
        max_running <= 2,
        "observed {} concurrently running jobs",
        max_running
    );
}

#[tokio::test]
async fn single_slot_dispatch_is_fifo() {
    let engine = start_engine(
        "sleep 0.1\nfor a in \"$@\"; do out=\"$a\"; done\nprintf 'x' > \"$out\"",
        |c| c.worker_slots = 1,
    )
    .await;

    let mut ids = Vec::new();
    for i in 0..3 {
        ids.push(
            engine
                .service
                .submit_job(video(&format!("fifo-{i}")), vtt())
                .await
                .unwrap(),
        );
    }

    for id in &ids {
        assert_eq!(
            wait_for_terminal(&engine.service, id, Duration::from_secs(10)).await,
            JobState::Done
        );
    }

    // Earlier submissions finish before later ones start.
    for pair in ids.windows(2) {
        let earlier = engine.service.job(&pair[0]).unwrap();
        let later = engine.service.job(&pair[1]).unwrap();
        assert!(earlier.finished_at.unwrap() <= later.started_at.unwrap());
    }
}

#[tokio::test]
async fn cancel_before_dispatch_never_invokes_encoder() {
    // One slot, and the first job hangs long enough to hold it.
    let engine = start_engine(
        "sleep 0.5\nfor a in \"$@\"; do out=\"$a\"; done\nprintf 'x' > \"$out\"",
        |c| c.worker_slots = 1,
    )
    .await;

    let blocker = engine
        .service
        .submit_job(video("blocker"), vtt())
        .await
        .unwrap();
    let victim = engine
        .service
        .submit_job(video("victim"), vtt())
        .await
        .unwrap();

    engine.service.cancel_job(&victim).unwrap();

    assert_eq!(
        wait_for_terminal(&engine.service, &blocker, Duration::from_secs(10)).await,
        JobState::Done
    );
    assert_eq!(
        wait_for_terminal(&engine.service, &victim, Duration::from_secs(5)).await,
        JobState::Canceled
    );

    // The canceled job was never dispatched.
    let job = engine.service.job(&victim).unwrap();
    assert!(job.started_at.is_none());
    assert_eq!(job.attempt_count, 0);
    assert_eq!(engine.invocations().len(), 1);
}

#[tokio::test]
async fn cancel_running_job_kills_encode() {
    let engine = start_engine(ENCODER_HANG, |_| {}).await;

    let job_id = engine
        .service
        .submit_job(video("cancel-me"), vtt())
        .await
        .unwrap();
    wait_for_state(
        &engine.service,
        &job_id,
        JobState::Running,
        Duration::from_secs(5),
    )
    .await;

    let started = Instant::now();
    engine.service.cancel_job(&job_id).unwrap();

    assert_eq!(
        wait_for_terminal(&engine.service, &job_id, Duration::from_secs(5)).await,
        JobState::Canceled
    );
    assert!(started.elapsed() < Duration::from_secs(5));

    // Cancellation is not a failed attempt.
    let job = engine.service.job(&job_id).unwrap();
    assert_eq!(job.error_detail, None);
    assert_eq!(job.attempt_count, 1);
}

#[tokio::test]
async fn cancel_is_idempotent_and_unknown_ids_are_not_found() {
    let engine = start_engine(ENCODER_OK, |_| {}).await;

    let job_id = engine
        .service
        .submit_job(video("idem"), vtt())
        .await
        .unwrap();
    assert_eq!(
        wait_for_terminal(&engine.service, &job_id, Duration::from_secs(10)).await,
        JobState::Done
    );

    // Canceling a finished job is a no-op.
    engine.service.cancel_job(&job_id).unwrap();
    assert_eq!(
        engine.service.job_status(&job_id).unwrap().state,
        JobState::Done
    );

    let missing = JobId::new();
    assert!(engine.service.job_status(&missing).unwrap_err().is_not_found());
    assert!(engine.service.cancel_job(&missing).unwrap_err().is_not_found());
}

#[tokio::test]
async fn non_retryable_failure_fails_after_one_attempt() {
    let engine = start_engine(ENCODER_PERMANENT, |_| {}).await;

    let job_id = engine
        .service
        .submit_job(video("bad-input"), vtt())
        .await
        .unwrap();

    assert_eq!(
        wait_for_terminal(&engine.service, &job_id, Duration::from_secs(10)).await,
        JobState::Failed
    );

    let job = engine.service.job(&job_id).unwrap();
    assert_eq!(job.attempt_count, 1);
    assert!(job
        .error_detail
        .as_deref()
        .unwrap()
        .contains("Invalid data found"));
    assert_eq!(engine.invocations().len(), 1);
}

#[tokio::test]
async fn transient_failure_retries_until_budget_with_increasing_backoff() {
    let engine = start_engine(ENCODER_TRANSIENT, |c| {
        c.max_attempts = 3;
        c.backoff_base = Duration::from_millis(50);
    })
    .await;

    let job_id = engine
        .service
        .submit_job(video("flaky"), vtt())
        .await
        .unwrap();

    assert_eq!(
        wait_for_terminal(&engine.service, &job_id, Duration::from_secs(15)).await,
        JobState::Failed
    );

    let job = engine.service.job(&job_id).unwrap();
    assert_eq!(job.attempt_count, 3);
    assert!(job
        .error_detail
        .as_deref()
        .unwrap()
        .to_lowercase()
        .contains("non-zero"));

    let stamps = engine.invocations();
    assert_eq!(stamps.len(), 3);

    // Backoff doubles: the second gap is meaningfully wider than the first.
    let gap1 = stamps[1] - stamps[0];
    let gap2 = stamps[2] - stamps[1];
    assert!(
        gap2 > gap1,
        "backoff did not increase: gap1={}ns gap2={}ns",
        gap1,
        gap2
    );
}

#[tokio::test]
async fn timeout_is_transient_and_kills_each_attempt() {
    let engine = start_engine(ENCODER_HANG, |c| {
        c.max_attempts = 2;
        c.attempt_timeout = Duration::from_millis(150);
        c.backoff_base = Duration::from_millis(10);
    })
    .await;

    let job_id = engine
        .service
        .submit_job(video("slowpoke"), vtt())
        .await
        .unwrap();

    let started = Instant::now();
    assert_eq!(
        wait_for_terminal(&engine.service, &job_id, Duration::from_secs(15)).await,
        JobState::Failed
    );
    assert!(started.elapsed() < Duration::from_secs(10));

    let job = engine.service.job(&job_id).unwrap();
    assert_eq!(job.attempt_count, 2);
    assert!(job.error_detail.as_deref().unwrap().contains("timed out"));
    assert_eq!(engine.invocations().len(), 2);
}

#[tokio::test]
async fn probe_rejection_is_permanent() {
    let engine = start_engine_with_probe(
        ENCODER_OK,
        "echo 'not a video' 1>&2\nexit 1",
        |_| {},
    )
    .await;

    let job_id = engine
        .service
        .submit_job(video("not-a-video"), vtt())
        .await
        .unwrap();

    assert_eq!(
        wait_for_terminal(&engine.service, &job_id, Duration::from_secs(10)).await,
        JobState::Failed
    );

    let job = engine.service.job(&job_id).unwrap();
    assert_eq!(job.attempt_count, 1);
    // The encoder itself never ran.
    assert_eq!(engine.invocations().len(), 0);
}

#[tokio::test]
async fn identical_submissions_share_stored_artifacts() {
    let engine = start_engine(ENCODER_OK, |_| {}).await;

    let a = engine
        .service
        .submit_job(video("same"), vtt())
        .await
        .unwrap();
    let b = engine
        .service
        .submit_job(video("same"), vtt())
        .await
        .unwrap();
    assert_ne!(a, b, "every submission gets its own job id");

    assert_eq!(
        wait_for_terminal(&engine.service, &a, Duration::from_secs(10)).await,
        JobState::Done
    );
    assert_eq!(
        wait_for_terminal(&engine.service, &b, Duration::from_secs(10)).await,
        JobState::Done
    );

    let job_a = engine.service.job(&a).unwrap();
    let job_b = engine.service.job(&b).unwrap();
    assert_eq!(job_a.input_video, job_b.input_video);
    assert_eq!(job_a.subtitle, job_b.subtitle);
    // Deterministic encode: the outputs deduplicate too.
    assert_eq!(job_a.output, job_b.output);
}

#[tokio::test]
async fn output_is_not_ready_before_done() {
    let engine = start_engine(ENCODER_HANG, |_| {}).await;

    let job_id = engine
        .service
        .submit_job(video("eager"), vtt())
        .await
        .unwrap();

    let err = engine.service.get_output(&job_id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotReady));

    engine.service.cancel_job(&job_id).unwrap();
    wait_for_terminal(&engine.service, &job_id, Duration::from_secs(5)).await;
}

#[tokio::test]
async fn missing_encoder_binary_fails_startup() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        ffmpeg_bin: dir
            .path()
            .join("no-such-encoder")
            .to_string_lossy()
            .to_string(),
        work_dir: dir.path().join("work"),
        ..Default::default()
    };
    let store = ArtifactStore::new(StoreConfig {
        root: dir.path().join("store"),
    });

    let err = BurnService::start(config, store).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Media(subburn_media::MediaError::EncoderNotFound(_))
    ));
}

#[tokio::test]
async fn work_dir_is_cleaned_after_attempts() {
    let engine = start_engine(ENCODER_OK, |_| {}).await;

    let job_id = engine
        .service
        .submit_job(video("tidy"), vtt())
        .await
        .unwrap();
    assert_eq!(
        wait_for_terminal(&engine.service, &job_id, Duration::from_secs(10)).await,
        JobState::Done
    );

    let job_work_dir = engine.dir.path().join("work").join(job_id.as_str());
    assert!(
        !job_work_dir.exists(),
        "scratch space left behind at {}",
        job_work_dir.display()
    );
}
