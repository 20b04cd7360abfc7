//! Server-wide shutdown signal.

use std::sync::Arc;
use tokio::sync::watch;

/// Triggers shutdown of a server and all of its sessions.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Request shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// Create a listener for this handle.
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener side of a [`ShutdownHandle`].
#[derive(Clone, Debug)]
pub struct Shutdown {
    receiver: watch::Receiver<bool>,
}

impl Shutdown {
    /// Wait until shutdown is requested.
    ///
    /// Returns immediately if it already was, or if the handle is gone.
    pub async fn recv(&mut self) {
        let _ = self.receiver.wait_for(|&stop| stop).await;
    }
}
