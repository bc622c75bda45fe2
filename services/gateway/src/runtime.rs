//! Shared runtime record.
//!
//! The supervisor assembles the cache, the metrics, and the shutdown channel
//! once and hands explicit clones to every task.  Nothing here is global;
//! tests build their own `Runtime` and stay hermetic.

use crate::cache::{IdentifierCache, SharedCache};
use crate::metrics::Metrics;
use std::sync::Arc;
use tokio::sync::watch;

pub struct Runtime {
    pub cache: SharedCache,
    pub metrics: Arc<Metrics>,
    shutdown_tx: watch::Sender<bool>,
}

impl Runtime {
    pub fn new(huge_differential_ms: f64) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            cache: IdentifierCache::shared(),
            metrics: Arc::new(Metrics::new(huge_differential_ms)),
            shutdown_tx,
        }
    }

    /// A fresh shutdown receiver for a task about to be spawned.
    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Broadcast cancellation to every task.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_reaches_late_subscribers() {
        let runtime = Runtime::new(60_000.0);
        let mut rx = runtime.shutdown_rx();
        runtime.request_shutdown();
        assert!(rx.changed().await.is_ok());
        assert!(*rx.borrow());
    }
}
