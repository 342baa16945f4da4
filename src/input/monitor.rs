use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{ChordSpec, HostKeyEvent, InputError, KeyEventSource};

/// Edge transition of the configured chord
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChordEdge {
    /// First key-down since the last release
    Down,
    /// Chord released
    Up,
}

/// Edge detector for a single chord (pure, testable)
///
/// Tracks whether the chord is currently held so auto-repeat key-downs are
/// swallowed and releases are reported once.
#[derive(Debug, Clone)]
pub struct ChordTracker {
    chord: ChordSpec,
    held: bool,
}

impl ChordTracker {
    /// New tracker with the chord released
    #[must_use]
    pub const fn new(chord: ChordSpec) -> Self {
        Self { chord, held: false }
    }

    /// Whether the chord is currently down
    #[must_use]
    pub const fn is_held(&self) -> bool {
        self.held
    }

    /// Classify one host event, returning the edge it produces, if any
    pub fn classify(&mut self, event: &HostKeyEvent) -> Option<ChordEdge> {
        match *event {
            HostKeyEvent::Key {
                key,
                modifiers,
                pressed: true,
            } if key == self.chord.key() && self.chord.modifiers_held(modifiers) => {
                if self.held {
                    None
                } else {
                    self.held = true;
                    Some(ChordEdge::Down)
                }
            }
            HostKeyEvent::Key {
                key,
                pressed: false,
                ..
            } if self.held && key == self.chord.key() => {
                self.held = false;
                Some(ChordEdge::Up)
            }
            // Releasing a required modifier before the key still ends the press
            HostKeyEvent::ModifiersChanged(modifiers)
                if self.held && !self.chord.modifiers_held(modifiers) =>
            {
                self.held = false;
                Some(ChordEdge::Up)
            }
            _ => None,
        }
    }
}

/// Watches a host key-event source for one chord
pub struct KeyChordMonitor<S> {
    source: S,
}

impl<S: KeyEventSource> KeyChordMonitor<S> {
    /// Wrap an event source
    pub const fn new(source: S) -> Self {
        Self { source }
    }

    /// Register chord callbacks
    ///
    /// `on_down` fires on the first matching key-down since the last release,
    /// `on_up` on the matching release. Callbacks run on the monitor task in
    /// source delivery order and should return quickly. Must be called from
    /// within a tokio runtime.
    ///
    /// # Errors
    /// Returns `PermissionDenied` if the host denies input monitoring, or the
    /// source's error if it cannot deliver events
    pub fn subscribe<D, U>(
        &mut self,
        chord: ChordSpec,
        mut on_down: D,
        mut on_up: U,
    ) -> Result<Subscription, InputError>
    where
        D: FnMut() + Send + 'static,
        U: FnMut() + Send + 'static,
    {
        self.source.check_permission()?;
        let mut events = self.source.open(&chord)?;

        let active = Arc::new(AtomicBool::new(true));
        let task_active = Arc::clone(&active);
        let mut tracker = ChordTracker::new(chord);

        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !task_active.load(Ordering::Acquire) {
                    break;
                }
                match tracker.classify(&event) {
                    Some(ChordEdge::Down) => {
                        debug!(%chord, "chord down");
                        on_down();
                    }
                    Some(ChordEdge::Up) => {
                        debug!(%chord, "chord up");
                        on_up();
                    }
                    None => {}
                }
            }
            debug!(%chord, "key event stream ended");
        });

        info!(%chord, "chord subscription active");
        Ok(Subscription {
            active,
            task: Some(task),
        })
    }

    /// Borrow the underlying source
    pub const fn source(&self) -> &S {
        &self.source
    }
}

/// Live chord subscription; delivery stops on `unsubscribe` or drop
pub struct Subscription {
    active: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Stop callback delivery (idempotent)
    pub fn unsubscribe(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
            info!("chord subscription removed");
        }
    }

    /// Whether callbacks may still be delivered
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
