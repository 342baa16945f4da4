//! Push-to-talk state machine.
//!
//! All transitions run on a single actor task that owns [`CaptureState`].
//! Chord edges and manual stops arrive from different threads as commands on
//! one bounded queue, so a chord release can never act before the preceding
//! press has fully started capture. Safety-deadline expiry has its own
//! unbounded channel and is never dropped, even when the command queue is
//! full. Device open and finalize run on the blocking pool; the
//! event-delivery path only enqueues.

use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::audio::{Artifact, CaptureError, CaptureSession};
use crate::input::{ChordSpec, InputError, KeyChordMonitor, KeyEventSource, Subscription};
use crate::timer::SafetyTimer;

/// Capacity of the controller's command queue
pub const COMMAND_QUEUE_CAPACITY: usize = 32;

/// Capacity of the published event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Observable capture state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CaptureState {
    /// Not capturing
    #[default]
    Idle,
    /// Capture session open
    Recording,
}

/// Why a recording ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Chord released
    Released,
    /// Explicit `stop()` call
    Manual,
    /// Safety cutoff elapsed
    Forced,
    /// Controller shutting down
    Shutdown,
}

/// Category of a published error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input monitoring or microphone access refused
    PermissionDenied,
    /// Input device could not be opened; the next chord press retries
    DeviceUnavailable,
    /// Artifact could not be created or written
    Io,
}

/// Error surfaced to presentation layers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    /// Category
    pub kind: ErrorKind,
    /// Human readable detail
    pub message: String,
}

impl From<&CaptureError> for ErrorNotice {
    fn from(error: &CaptureError) -> Self {
        let kind = match error {
            CaptureError::DeviceUnavailable(_) | CaptureError::Worker(_) => {
                ErrorKind::DeviceUnavailable
            }
            CaptureError::Io { .. } | CaptureError::Encode(_) => ErrorKind::Io,
        };
        Self {
            kind,
            message: error.to_string(),
        }
    }
}

/// Discrete notifications published by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// State transition
    StateChanged(CaptureState),
    /// Capture opened and safety deadline armed
    RecordingStarted,
    /// Safety cutoff triggered the stop (informational)
    ForcedStop {
        /// Configured cutoff
        limit: Duration,
    },
    /// Capture closed; `artifact` is `None` if finalizing failed
    RecordingFinished {
        /// What ended the recording
        reason: StopReason,
        /// Time spent recording
        elapsed: Duration,
        /// Finished artifact, disposal is up to the receiver
        artifact: Option<Artifact>,
    },
    /// Failure that left the controller idle
    Error(ErrorNotice),
}

#[derive(Debug)]
enum Command {
    ChordDown,
    ChordUp,
    Stop,
    Shutdown(oneshot::Sender<()>),
}

/// Orchestrates chord events, the capture session and the safety timer
pub struct PushToTalkController {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<CaptureState>,
    events: broadcast::Sender<ControllerEvent>,
    actor: Option<JoinHandle<()>>,
}

impl PushToTalkController {
    /// Start the controller actor on the current tokio runtime
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime
    pub fn spawn(session: Arc<CaptureSession>, max_duration: Duration) -> Self {
        let runtime = Handle::current();
        let (commands, receiver) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (state_tx, state) = watch::channel(CaptureState::Idle);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (expiry, expired) = mpsc::unbounded_channel();

        let actor = Actor {
            session,
            timer: SafetyTimer::new(runtime.clone()),
            expiry,
            state: state_tx,
            events: events.clone(),
            max_duration,
            generation: 0,
            started_at: None,
        };
        let actor = runtime.spawn(actor.run(receiver, expired));

        info!(
            max_duration_secs = max_duration.as_secs(),
            "push-to-talk controller started"
        );
        Self {
            commands,
            state,
            events,
            actor: Some(actor),
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> CaptureState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<CaptureState> {
        self.state.clone()
    }

    /// Subscribe to published events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// Chord pressed
    pub fn chord_down(&self) {
        dispatch(&self.commands, Command::ChordDown);
    }

    /// Chord released
    pub fn chord_up(&self) {
        dispatch(&self.commands, Command::ChordUp);
    }

    /// Stop recording without a chord release
    pub fn stop(&self) {
        dispatch(&self.commands, Command::Stop);
    }

    /// Route a monitor's chord edges into this controller
    ///
    /// # Errors
    /// Returns the monitor's error; `PermissionDenied` is also published
    pub fn attach<S: KeyEventSource>(
        &self,
        monitor: &mut KeyChordMonitor<S>,
        chord: ChordSpec,
    ) -> Result<Subscription, InputError> {
        let down = self.commands.clone();
        let up = self.commands.clone();
        let result = monitor.subscribe(
            chord,
            move || dispatch(&down, Command::ChordDown),
            move || dispatch(&up, Command::ChordUp),
        );

        if let Err(e) = &result {
            error!(error = %e, %chord, "failed to attach chord monitor");
            if matches!(e, InputError::PermissionDenied(_)) {
                let _ = self.events.send(ControllerEvent::Error(ErrorNotice {
                    kind: ErrorKind::PermissionDenied,
                    message: e.to_string(),
                }));
            }
        }
        result
    }

    /// Stop any in-flight recording and end the actor
    pub async fn shutdown(mut self) {
        let (done, finished) = oneshot::channel();
        if self.commands.send(Command::Shutdown(done)).await.is_ok() {
            let _ = finished.await;
        }
        if let Some(actor) = self.actor.take() {
            if let Err(e) = actor.await {
                warn!(error = ?e, "controller actor panicked");
            }
        }
    }
}

fn dispatch(commands: &mpsc::Sender<Command>, command: Command) {
    match commands.try_send(command) {
        Ok(()) => {}
        Err(TrySendError::Full(command)) => {
            warn!(?command, "controller queue full, dropping command");
        }
        Err(TrySendError::Closed(command)) => {
            debug!(?command, "controller stopped, dropping command");
        }
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, CaptureError>
where
    F: FnOnce() -> Result<T, CaptureError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CaptureError::Worker(format!("capture task failed: {e}")))?
}

/// State-owning task; the only place transitions happen
struct Actor {
    session: Arc<CaptureSession>,
    timer: SafetyTimer,
    /// Deadline callbacks report the generation they were armed for
    expiry: mpsc::UnboundedSender<u64>,
    state: watch::Sender<CaptureState>,
    events: broadcast::Sender<ControllerEvent>,
    max_duration: Duration,
    /// Bumped per recording so a stale deadline cannot stop a later one
    generation: u64,
    started_at: Option<Instant>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut expired: mpsc::UnboundedReceiver<u64>,
    ) {
        loop {
            tokio::select! {
                biased;
                // The actor keeps a sender alive, so this never yields None
                Some(generation) = expired.recv() => self.expire(generation).await,
                command = commands.recv() => match command {
                    Some(Command::ChordDown) => self.begin().await,
                    Some(Command::ChordUp) => self.end(StopReason::Released).await,
                    Some(Command::Stop) => self.end(StopReason::Manual).await,
                    Some(Command::Shutdown(done)) => {
                        self.end(StopReason::Shutdown).await;
                        let _ = done.send(());
                        break;
                    }
                    None => break,
                },
            }
        }

        // Every exit path releases the device
        self.end(StopReason::Shutdown).await;
        info!("push-to-talk controller stopped");
    }

    async fn expire(&mut self, generation: u64) {
        if generation == self.generation {
            self.end(StopReason::Forced).await;
        } else {
            debug!(
                generation,
                current = self.generation,
                "stale safety deadline (ignored)"
            );
        }
    }

    fn current(&self) -> CaptureState {
        *self.state.borrow()
    }

    fn transition(&self, next: CaptureState) {
        self.state.send_replace(next);
        self.publish(ControllerEvent::StateChanged(next));
    }

    fn publish(&self, event: ControllerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn begin(&mut self) {
        if self.current() == CaptureState::Recording {
            debug!("chord down while recording (ignored)");
            return;
        }

        let session = Arc::clone(&self.session);
        match run_blocking(move || session.start()).await {
            Ok(()) => {
                self.generation += 1;
                let generation = self.generation;
                let expiry = self.expiry.clone();
                self.timer.arm(self.max_duration, move || {
                    if expiry.send(generation).is_err() {
                        debug!(generation, "controller stopped before safety deadline");
                    }
                });
                self.started_at = Some(Instant::now());
                self.transition(CaptureState::Recording);
                self.publish(ControllerEvent::RecordingStarted);
                info!(generation, "Idle → Recording");
            }
            Err(e) => {
                warn!(error = %e, "capture start failed, staying idle");
                self.publish(ControllerEvent::Error(ErrorNotice::from(&e)));
            }
        }
    }

    async fn end(&mut self, reason: StopReason) {
        if self.current() == CaptureState::Idle {
            debug!(?reason, "stop while idle (ignored)");
            return;
        }

        self.timer.cancel();
        let elapsed = self
            .started_at
            .take()
            .map_or(Duration::ZERO, |started| started.elapsed());

        let session = Arc::clone(&self.session);
        let result = run_blocking(move || session.stop()).await;
        self.transition(CaptureState::Idle);

        if reason == StopReason::Forced {
            warn!(
                limit_secs = self.max_duration.as_secs(),
                "safety cutoff reached, capture forced to stop"
            );
            self.publish(ControllerEvent::ForcedStop {
                limit: self.max_duration,
            });
        }

        let artifact = match result {
            Ok(artifact) => artifact,
            Err(e) => {
                error!(error = %e, "failed to finalize capture");
                self.publish(ControllerEvent::Error(ErrorNotice::from(&e)));
                None
            }
        };

        info!(
            ?reason,
            elapsed_ms = elapsed.as_millis(),
            has_artifact = artifact.is_some(),
            "Recording → Idle"
        );
        self.publish(ControllerEvent::RecordingFinished {
            reason,
            elapsed,
            artifact,
        });
    }
}
