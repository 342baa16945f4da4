use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// Maximum capture length before a forced stop
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(30);

/// One-shot deadline that runs a callback unless cancelled first
///
/// At most one deadline is pending; arming again replaces it. The callback
/// fires at most once per `arm`, and never after a `cancel` that completed
/// before the deadline elapsed.
pub struct SafetyTimer {
    runtime: Handle,
    pending: Option<Pending>,
}

struct Pending {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SafetyTimer {
    /// Timer whose deadlines run on `runtime`
    #[must_use]
    pub const fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            pending: None,
        }
    }

    /// Schedule `on_expire` after `duration`, replacing any pending deadline
    pub fn arm<F>(&mut self, duration: Duration, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();

        let (cancel, mut cancelled) = oneshot::channel::<()>();
        let task = self.runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = &mut cancelled => {
                    debug!("safety deadline cancelled");
                }
                () = tokio::time::sleep(duration) => {
                    debug!(secs = duration.as_secs(), "safety deadline expired");
                    on_expire();
                }
            }
        });

        debug!(secs = duration.as_secs(), "safety deadline armed");
        self.pending = Some(Pending { cancel, task });
    }

    /// Drop the pending deadline, if any (idempotent)
    pub fn cancel(&mut self) {
        if let Some(Pending { cancel, task }) = self.pending.take() {
            // Fails only if the deadline already fired or was torn down
            if cancel.send(()).is_err() {
                debug!("safety deadline already consumed");
            }
            drop(task);
        }
    }

    /// Whether a deadline is armed and has not yet run
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|pending| !pending.task.is_finished())
    }
}

impl Drop for SafetyTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
