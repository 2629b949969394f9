//! Process-wide shutdown signal
//!
//! One [`ShutdownTrigger`] fans out to any number of [`Shutdown`] listeners
//! through a `tokio::sync::watch` channel. Tasks check it at loop boundaries.

use tokio::sync::watch;

/// Create a trigger and its first listener
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownTrigger { sender }, Shutdown { receiver })
}

/// Sending half, owned by whoever handles process signals
#[derive(Debug)]
pub struct ShutdownTrigger {
    sender: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Signal every listener; calling it again is a no-op
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Listening half, cloned into every task
#[derive(Debug, Clone)]
pub struct Shutdown {
    receiver: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once shutdown has been signalled
    ///
    /// A dropped trigger counts as shutdown.
    pub async fn triggered(&mut self) {
        let _ = self.receiver.wait_for(|stop| *stop).await;
    }
}
