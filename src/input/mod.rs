use thiserror::Error;

/// Chord definition and config parsing
pub mod chord;
/// `global-hotkey` backed event source
pub mod hotkey;
/// Chord edge detection over a host event stream
pub mod monitor;
/// Host key-event stream abstraction
pub mod source;

pub use chord::ChordSpec;
pub use hotkey::GlobalHotkeySource;
pub use monitor::{ChordEdge, ChordTracker, KeyChordMonitor, Subscription};
pub use source::{ChannelKeySource, HostKeyEvent, KeyEventSource};

/// Errors raised while setting up global input monitoring
#[derive(Debug, Error)]
pub enum InputError {
    /// Host refused global input-monitoring access
    #[error("input monitoring permission denied: {0}")]
    PermissionDenied(String),

    /// Chord could not be registered with the host
    #[error("failed to register chord: {0}")]
    Registration(String),

    /// Chord definition is malformed
    #[error("invalid chord: {0}")]
    InvalidChord(String),
}
