//! The single shared snapshot between the refresher and exporters
//!
//! Backed by a `tokio::sync::watch` channel: `publish` swaps in a whole new
//! snapshot, `read` clones the current one. Readers never see a mix of two
//! snapshots and never see an older one after a newer one was published.

use crate::models::MetricsSnapshot;
use std::sync::Arc;
use tokio::sync::watch;

/// Holder of the most recent `MetricsSnapshot`.
///
/// Clones share the same snapshot. Only the refresher should call `publish`.
#[derive(Debug, Clone)]
pub struct SampleStore {
    tx: Arc<watch::Sender<MetricsSnapshot>>,
}

impl SampleStore {
    pub fn new(initial: MetricsSnapshot) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the current snapshot
    pub fn publish(&self, snapshot: MetricsSnapshot) {
        self.tx.send_replace(snapshot);
    }

    /// Latest published snapshot, however stale
    pub fn read(&self) -> MetricsSnapshot {
        self.tx.borrow().clone()
    }

    /// Receiver that is notified on every publish
    pub fn subscribe(&self) -> watch::Receiver<MetricsSnapshot> {
        self.tx.subscribe()
    }
}
