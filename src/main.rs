use anyhow::Context;
use clap::Parser;
use ip_camcorder::display::{spawn_display, FrameRateLogger};
use ip_camcorder::{init_logging, PipelineConfig, PipelineEvent, SessionController};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;

/// Watch an IP camera's MJPEG stream and optionally record it
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Camera address, e.g. 192.168.1.100:8080/video
    url: String,

    /// Record for this many seconds after the stream comes up
    #[arg(long)]
    record_secs: Option<u64>,

    /// Directory for recordings (default: Downloads)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// How long to wait for the first frame
    #[arg(long)]
    probe_timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    let mut config = PipelineConfig::default();
    if let Some(dir) = args.output_dir {
        config.recording.output_dir = dir;
    }
    if let Some(timeout) = args.probe_timeout_ms {
        config.stream.probe_timeout_ms = timeout;
    }
    tracing::debug!("Config: {}", serde_json::to_string(&config)?);

    let mut controller = SessionController::new(config).context("Failed to set up pipeline")?;
    let display = spawn_display(controller.subscribe(), FrameRateLogger::default());
    let reporter = tokio::spawn(report_events(controller.subscribe()));

    if let Err(e) = controller.start_streaming(&args.url).await {
        controller.shutdown().await;
        let _ = tokio::join!(display, reporter);
        return Err(e).context("Could not start streaming");
    }

    if let Some(secs) = args.record_secs {
        let path = controller.start_recording()?;
        println!("Recording to {}", path.display());

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            _ = tokio::signal::ctrl_c() => {}
        }

        if controller.state().is_recording() {
            let summary = controller.stop_recording()?;
            println!(
                "Saved {} ({} frames, {:.1}s)",
                summary.path.display(),
                summary.frames_written,
                summary.duration_ms as f64 / 1000.0
            );
        }
    }

    if controller.state().is_streaming() {
        println!("Streaming, press Ctrl-C to stop");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
    }

    controller.shutdown().await;
    let _ = tokio::join!(display, reporter);
    Ok(())
}

/// Log notifications a UI would surface
async fn report_events(mut events: broadcast::Receiver<PipelineEvent>) {
    loop {
        match events.recv().await {
            Ok(PipelineEvent::StateChanged(state)) => tracing::info!("State: {}", state),
            Ok(PipelineEvent::RecordingSaved(summary)) => {
                tracing::info!("Recording saved: {:?}", summary.path)
            }
            Ok(PipelineEvent::Error(error)) => {
                tracing::error!("{}: {}", error.code, error.message)
            }
            Ok(PipelineEvent::ShutdownComplete) => break,
            Ok(PipelineEvent::FrameReady(_)) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
