//! Producer-facing entry point
//!
//! `Feed` ties the snapshot store to the live channel. The producer calls
//! [`Feed::publish`] once per tick; HTTP handlers and WebSocket sessions
//! read through the same handle.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::aggregator::{performance_report, PerformanceReport};
use crate::channel::{BroadcastOutcome, ConsumerId, LiveChannel, Outbound};
use crate::store::{HistoryPage, SnapshotStore, StoreStats};
use crate::types::Snapshot;

#[derive(Clone)]
pub struct Feed {
    store: Arc<RwLock<SnapshotStore>>,
    channel: LiveChannel,
}

impl Feed {
    pub fn new(capacity: usize, consumer_buffer: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(SnapshotStore::new(capacity))),
            channel: LiveChannel::new(consumer_buffer),
        }
    }

    /// Store one tick and push it to every connected client.
    ///
    /// The store lock is released before fan-out starts.
    pub async fn publish(&self, raw: Value) -> BroadcastOutcome {
        let snapshot = self.store.write().await.append(raw);
        let outcome = self.channel.broadcast(&snapshot).await;
        debug!(
            timestamp = snapshot.timestamp,
            delivered = outcome.delivered,
            dropped = outcome.dropped,
            "Published snapshot"
        );
        outcome
    }

    /// Register a new client, queueing the latest snapshot as its resync.
    ///
    /// The store read lock is held across registration so no append can
    /// land between reading `latest` and the client joining fan-out. A
    /// publish that appended before this lock was taken may still be
    /// broadcasting; the channel skips that update for this client since
    /// the resync already carries it.
    pub async fn connect(&self) -> (ConsumerId, mpsc::Receiver<Outbound>) {
        let store = self.store.read().await;
        let latest = store.latest();
        self.channel.register(latest.as_deref()).await
    }

    pub async fn latest(&self) -> Option<Arc<Snapshot>> {
        self.store.read().await.latest()
    }

    pub async fn page(&self, limit: usize, offset: usize) -> HistoryPage {
        self.store.read().await.page(limit, offset)
    }

    pub async fn stats(&self) -> StoreStats {
        self.store.read().await.stats()
    }

    pub async fn performance(&self) -> PerformanceReport {
        let store = self.store.read().await;
        performance_report(store.iter())
    }

    pub fn channel(&self) -> &LiveChannel {
        &self.channel
    }

    /// Close every client and stop the heartbeat
    pub async fn shutdown(&self) {
        self.channel.shutdown().await;
    }
}
