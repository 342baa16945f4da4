use global_hotkey::hotkey::{Code, Modifiers};
use tokio::sync::mpsc;

use super::{ChordSpec, InputError};

/// Capacity of the bounded channel between a host source and the monitor
pub const EVENT_QUEUE_CAPACITY: usize = 64;

/// Raw key event as delivered by the host input stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyEvent {
    /// A key went down (`pressed`) or up, with the modifiers held at that moment
    Key {
        /// Physical key
        key: Code,
        /// Modifiers held when the event was generated
        modifiers: Modifiers,
        /// `true` for key-down (including auto-repeat), `false` for key-up
        pressed: bool,
    },
    /// Modifier flags changed without a primary key event
    ModifiersChanged(Modifiers),
}

impl HostKeyEvent {
    /// Key-down helper
    #[must_use]
    pub const fn down(key: Code, modifiers: Modifiers) -> Self {
        Self::Key {
            key,
            modifiers,
            pressed: true,
        }
    }

    /// Key-up helper
    #[must_use]
    pub const fn up(key: Code, modifiers: Modifiers) -> Self {
        Self::Key {
            key,
            modifiers,
            pressed: false,
        }
    }
}

/// A host mechanism that delivers global key events
///
/// The monitor consumes the returned receiver in delivery order; the source
/// decides how events reach it (OS hook, hotkey registration, in-process feed).
pub trait KeyEventSource {
    /// Query the host permission gate for global input monitoring
    ///
    /// # Errors
    /// Returns `PermissionDenied` if the host refuses monitoring
    fn check_permission(&self) -> Result<(), InputError>;

    /// Start delivering events relevant to `chord`
    ///
    /// # Errors
    /// Returns error if the host cannot deliver events for this chord
    fn open(&mut self, chord: &ChordSpec) -> Result<mpsc::Receiver<HostKeyEvent>, InputError>;
}

/// In-process event source fed through a bounded channel
///
/// Used by hosts that already own an input loop and by tests.
pub struct ChannelKeySource {
    receiver: Option<mpsc::Receiver<HostKeyEvent>>,
    permission_granted: bool,
}

impl ChannelKeySource {
    /// Create a source and the sender that feeds it
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<HostKeyEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                receiver: Some(rx),
                permission_granted: true,
            },
            tx,
        )
    }

    /// Make `check_permission` fail, as a host without monitoring access would
    #[must_use]
    pub fn with_permission_denied(mut self) -> Self {
        self.permission_granted = false;
        self
    }
}

impl KeyEventSource for ChannelKeySource {
    fn check_permission(&self) -> Result<(), InputError> {
        if self.permission_granted {
            Ok(())
        } else {
            Err(InputError::PermissionDenied(
                "channel source configured without monitoring access".to_owned(),
            ))
        }
    }

    fn open(&mut self, _chord: &ChordSpec) -> Result<mpsc::Receiver<HostKeyEvent>, InputError> {
        self.receiver
            .take()
            .ok_or_else(|| InputError::Registration("channel source already opened".to_owned()))
    }
}
