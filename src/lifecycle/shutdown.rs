//! Shutdown coordination.

use tokio::sync::{broadcast, watch};

/// Coordinator for graceful shutdown.
///
/// Long-running tasks (the accept loop, the server) subscribe and stop when
/// the signal fires.
#[derive(Debug)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once `draining` turns `true`. Never resolves if the sender is
/// dropped without draining.
pub(crate) async fn drain_requested(draining: &mut watch::Receiver<bool>) {
    loop {
        if *draining.borrow_and_update() {
            return;
        }
        if draining.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
