//! End-to-end self check: synthesize a clip, burn a subtitle track into it
//! through the full engine, and verify the output.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use subburn_engine::{BurnService, EngineConfig};
use subburn_models::JobState;
use subburn_store::{ArtifactStore, StoreConfig};

const DUMMY_VTT: &str = "WEBVTT\n\n\
00:00:01.000 --> 00:00:02.500\nHello World\n\n\
00:00:03.000 --> 00:00:04.500\nSecond cue\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = EngineConfig::from_env();
    info!("subburn-selfcheck: starting with {:?}", config);

    let scratch = tempfile::tempdir()?;
    let store = ArtifactStore::new(StoreConfig {
        root: scratch.path().join("store"),
    });

    let service = BurnService::start(config.clone(), store).await?;

    let clip = synthesize_clip(&config.ffmpeg_bin, scratch.path()).await?;
    info!("Synthesized {} byte test clip", clip.len());

    let job_id = service
        .submit_job(clip.clone(), DUMMY_VTT.as_bytes().to_vec())
        .await?;
    info!("Submitted job {}", job_id);

    let mut last_progress = 0u8;
    let terminal = loop {
        let status = service.job_status(&job_id)?;
        if status.progress_percent > last_progress {
            info!("Progress: {}%", status.progress_percent);
            last_progress = status.progress_percent;
        }
        match status.state {
            JobState::Done | JobState::Failed | JobState::Canceled => break status,
            _ => tokio::time::sleep(Duration::from_millis(200)).await,
        }
    };

    if terminal.state != JobState::Done {
        anyhow::bail!(
            "job ended {} ({})",
            terminal.state,
            terminal.error_detail.unwrap_or_default()
        );
    }

    let output = service.get_output(&job_id).await?;
    if output.is_empty() {
        anyhow::bail!("output artifact is empty");
    }
    info!("Burned output: {} bytes", output.len());

    // Submitting identical inputs again must dedupe in the store.
    let job = service.job(&job_id)?;
    let rerun = service
        .submit_job(clip, DUMMY_VTT.as_bytes().to_vec())
        .await?;
    let rerun_job = service.job(&rerun)?;
    if rerun_job.input_video != job.input_video {
        anyhow::bail!("identical input did not deduplicate");
    }
    service.cancel_job(&rerun)?;

    service.shutdown().await;
    println!("subburn-selfcheck: ok");
    Ok(())
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("subburn=info".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
}

/// Generate a 5 second test clip with the encoder's lavfi source.
async fn synthesize_clip(ffmpeg_bin: &str, dir: &std::path::Path) -> anyhow::Result<Vec<u8>> {
    let path = dir.join("dummy_video.mp4");

    let status = Command::new(ffmpeg_bin)
        .args([
            "-y",
            "-f",
            "lavfi",
            "-i",
            "color=c=blue:s=320x240:d=5",
            "-c:v",
            "libx264",
            "-t",
            "5",
        ])
        .arg(&path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    if !status.success() {
        anyhow::bail!("failed to synthesize test clip: {:?}", status);
    }

    Ok(tokio::fs::read(&path).await?)
}
