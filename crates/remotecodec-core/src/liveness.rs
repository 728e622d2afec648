//! Peer liveness watches.
//!
//! The side hosting a resource holds a [`LivenessGuard`]; everyone talking to
//! it holds a [`LivenessWatch`]. The peer is considered dead once the guard is
//! marked dead or dropped. Death is a one-way transition, so a watch fires at
//! most once per guard.

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Create a connected guard/watch pair. The peer starts alive.
pub fn pair() -> (LivenessGuard, LivenessWatch) {
    let (tx, rx) = watch::channel(true);
    (LivenessGuard { tx }, LivenessWatch { rx })
}

/// Owned by the live side. Dropping it declares the peer dead.
#[derive(Debug)]
pub struct LivenessGuard {
    tx: watch::Sender<bool>,
}

impl LivenessGuard {
    /// Declare the peer dead without dropping the guard.
    pub fn mark_dead(&self) {
        self.tx.send_if_modified(|alive| std::mem::replace(alive, false));
    }

    pub fn watch(&self) -> LivenessWatch {
        LivenessWatch {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observer side of a liveness pair.
#[derive(Debug, Clone)]
pub struct LivenessWatch {
    rx: watch::Receiver<bool>,
}

impl LivenessWatch {
    pub fn is_alive(&self) -> bool {
        self.rx.has_changed().is_ok() && *self.rx.borrow()
    }

    /// Resolve once the peer is dead. Returns immediately if it already is.
    pub async fn died(&self) {
        let mut rx = self.rx.clone();
        // Err means the guard was dropped, which is also death.
        let _ = rx.wait_for(|alive| !*alive).await;
    }

    /// Run `notify` once when the peer dies.
    ///
    /// The returned subscription unlinks the callback when cancelled or
    /// dropped. Must be called from within a tokio runtime.
    pub fn on_death<F>(&self, notify: F) -> DeathSubscription
    where
        F: FnOnce() + Send + 'static,
    {
        let watch = self.clone();
        let task = tokio::spawn(async move {
            watch.died().await;
            notify();
        });
        DeathSubscription { task }
    }
}

/// Registration returned by [`LivenessWatch::on_death`].
#[derive(Debug)]
pub struct DeathSubscription {
    task: JoinHandle<()>,
}

impl DeathSubscription {
    /// Unlink without waiting for death.
    pub fn cancel(self) {
        self.task.abort();
    }

    /// Whether the death callback already ran (or the subscription was cancelled).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for DeathSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
