use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use ptt_capture::audio::{CaptureSession, CpalBackend};
use ptt_capture::config::Config;
use ptt_capture::input::{GlobalHotkeySource, KeyChordMonitor};
use ptt_capture::{permissions, telemetry, ControllerEvent, PushToTalkController};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    telemetry::init(&config.telemetry)?;
    info!("ptt-capture starting");

    permissions::note_microphone_permission();

    let chord = config.hotkey.chord()?;
    let destination = config.capture.output_path()?;
    let mut backend = CpalBackend::new();
    if let Some(device) = &config.capture.device {
        backend = backend.with_device(device.clone());
    }
    let session = Arc::new(CaptureSession::new(Box::new(backend), destination));
    let controller = PushToTalkController::spawn(session, config.capture.max_duration());
    let mut events = controller.subscribe();

    let source = GlobalHotkeySource::new().context("failed to initialize global hotkeys")?;
    let mut monitor = KeyChordMonitor::new(source);
    let mut subscription = controller
        .attach(&mut monitor, chord)
        .with_context(|| format!("failed to listen for {chord}"))?;

    info!(%chord, "hold the chord to record (Ctrl+C to exit)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => report(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    subscription.unsubscribe();
    controller.shutdown().await;
    Ok(())
}

fn report(event: &ControllerEvent) {
    match event {
        ControllerEvent::StateChanged(state) => info!(?state, "state changed"),
        ControllerEvent::RecordingStarted => info!("listening"),
        ControllerEvent::ForcedStop { limit } => {
            warn!(limit_secs = limit.as_secs(), "recording cut off");
        }
        ControllerEvent::RecordingFinished {
            reason,
            elapsed,
            artifact,
        } => match artifact {
            Some(artifact) => info!(
                ?reason,
                elapsed_ms = elapsed.as_millis(),
                path = %artifact.path.display(),
                duration_ms = artifact.duration.as_millis(),
                "recording saved"
            ),
            None => warn!(?reason, "recording finished without an artifact"),
        },
        ControllerEvent::Error(notice) => error!(kind = ?notice.kind, "{}", notice.message),
    }
}
