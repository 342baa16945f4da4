use global_hotkey::{hotkey::HotKey, GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::source::EVENT_QUEUE_CAPACITY;
use super::{ChordSpec, HostKeyEvent, InputError, KeyEventSource};
use crate::permissions;

/// How often the forwarder checks whether its source was dropped
const FORWARDER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of one bounded wait on the host hotkey stream
enum Polled {
    Event(GlobalHotKeyEvent),
    Idle,
    Closed,
}

/// Key-event source backed by a `global-hotkey` registration
///
/// The host reports press/release of the registered chord only, so every
/// forwarded event already carries the chord's key and modifiers. The manager
/// must live on the thread that runs the platform event loop.
pub struct GlobalHotkeySource {
    manager: GlobalHotKeyManager,
    registered: Option<HotKey>,
    stop: Arc<AtomicBool>,
}

impl GlobalHotkeySource {
    /// Create the platform hotkey manager
    ///
    /// # Errors
    /// Returns `Registration` if the platform manager cannot be created
    pub fn new() -> Result<Self, InputError> {
        let manager = GlobalHotKeyManager::new()
            .map_err(|e| InputError::Registration(format!("failed to create manager: {e}")))?;
        Ok(Self {
            manager,
            registered: None,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    const fn translate(chord: &ChordSpec, state: HotKeyState) -> HostKeyEvent {
        match state {
            HotKeyState::Pressed => HostKeyEvent::down(chord.key(), chord.modifiers()),
            HotKeyState::Released => HostKeyEvent::up(chord.key(), chord.modifiers()),
        }
    }
}

impl KeyEventSource for GlobalHotkeySource {
    fn check_permission(&self) -> Result<(), InputError> {
        permissions::check_input_monitoring_permission()
    }

    fn open(&mut self, chord: &ChordSpec) -> Result<mpsc::Receiver<HostKeyEvent>, InputError> {
        if self.registered.is_some() {
            return Err(InputError::Registration(
                "a chord is already registered on this source".to_owned(),
            ));
        }

        let hotkey = HotKey::new(Some(chord.modifiers()), chord.key());
        self.manager
            .register(hotkey)
            .map_err(|e| InputError::Registration(format!("{chord}: {e}")))?;
        self.registered = Some(hotkey);
        info!(%chord, "registered global hotkey");

        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let receiver = GlobalHotKeyEvent::receiver().clone();
        let stop = Arc::clone(&self.stop);
        let hotkey_id = hotkey.id();
        let chord = *chord;

        // Blocks on a crossbeam receiver, so this runs on a plain OS thread
        // instead of the runtime's blocking pool
        std::thread::Builder::new()
            .name("hotkey-forwarder".to_owned())
            .spawn(move || {
                let poll = |timeout| match receiver.recv_timeout(timeout) {
                    Ok(event) => Polled::Event(event),
                    Err(e) if e.is_timeout() => Polled::Idle,
                    Err(_) => Polled::Closed,
                };
                forward_events(poll, hotkey_id, chord, &stop, &tx);
            })
            .map_err(|e| InputError::Registration(format!("failed to spawn forwarder: {e}")))?;

        Ok(rx)
    }
}

/// Forward press/release of `hotkey_id` until the source is dropped or
/// either end of the stream closes
fn forward_events<P>(
    mut poll: P,
    hotkey_id: u32,
    chord: ChordSpec,
    stop: &AtomicBool,
    tx: &mpsc::Sender<HostKeyEvent>,
) where
    P: FnMut(Duration) -> Polled,
{
    while !stop.load(Ordering::Relaxed) {
        match poll(FORWARDER_POLL_INTERVAL) {
            Polled::Event(event) if event.id == hotkey_id => {
                if tx
                    .blocking_send(GlobalHotkeySource::translate(&chord, event.state))
                    .is_err()
                {
                    break;
                }
            }
            Polled::Event(_) | Polled::Idle => {}
            Polled::Closed => break,
        }
    }
    debug!("hotkey forwarder stopped");
}

impl Drop for GlobalHotkeySource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(hotkey) = self.registered.take() {
            if let Err(e) = self.manager.unregister(hotkey) {
                error!(error = %e, "failed to unregister hotkey");
            }
        }
    }
}
