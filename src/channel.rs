//! Live push channel
//!
//! Keeps a registry of connected dashboard clients and fans every new
//! snapshot out to all of them. Each client owns a bounded outbound queue
//! drained by its own writer task, so a slow or broken client never holds
//! up the others: a full or closed queue gets that client dropped from the
//! registry on the spot.
//!
//! Liveness is checked by a heartbeat sweep. Every sweep evicts clients
//! that have not answered since the previous sweep, then marks the rest
//! unconfirmed and queues a ping. Any inbound frame confirms a client.

use axum::extract::ws::Utf8Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Mutex,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{current_time_ms, ClientMessage, Snapshot, WsMessage};

pub type ConsumerId = Uuid;

/// Default number of frames queued per client
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default heartbeat period
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Frames handed to a client's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Serialized JSON message, shared across all recipients
    Text(Utf8Bytes),
    /// Transport-level liveness ping (WebSocket ping)
    Ping,
    /// Close the connection and stop writing
    Close,
}

/// Result of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub dropped: usize,
}

/// Result of one heartbeat sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub pinged: usize,
    pub evicted: usize,
}

struct Consumer {
    tx: mpsc::Sender<Outbound>,
    /// Cleared by each sweep, set again by any inbound frame
    alive: bool,
    last_activity_ms: i64,
    /// Store sequence of the resync frame. Updates at or below it are
    /// already covered by the resync and are not sent again.
    resync_seq: Option<u64>,
}

struct ChannelInner {
    consumers: Mutex<HashMap<ConsumerId, Consumer>>,
    queue_capacity: usize,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

/// Registry of connected clients. Cheap to clone.
#[derive(Clone)]
pub struct LiveChannel {
    inner: Arc<ChannelInner>,
}

impl LiveChannel {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                consumers: Mutex::new(HashMap::new()),
                queue_capacity: queue_capacity.max(1),
                heartbeat: Mutex::new(None),
            }),
        }
    }

    /// Add a client. When `resync` is given, a full `snapshot` message is
    /// queued before the client becomes visible to fan-out, so it always
    /// precedes the first `update`. A later broadcast of the same snapshot
    /// (or an older one) is skipped for this client.
    pub async fn register(
        &self,
        resync: Option<&Snapshot>,
    ) -> (ConsumerId, mpsc::Receiver<Outbound>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);
        let resync_seq = resync.map(|snapshot| snapshot.sequence);

        if let Some(snapshot) = resync {
            match encode(&WsMessage::Snapshot { data: snapshot }) {
                Ok(frame) => {
                    // Fresh queue with capacity >= 1, cannot be full
                    let _ = tx.try_send(Outbound::Text(frame));
                }
                Err(e) => warn!(consumer = %id, error = %e, "Failed to serialize resync"),
            }
        }

        let mut consumers = self.inner.consumers.lock().await;
        consumers.insert(
            id,
            Consumer {
                tx,
                alive: true,
                last_activity_ms: current_time_ms(),
                resync_seq,
            },
        );
        debug!(consumer = %id, consumers = consumers.len(), "Consumer registered");

        (id, rx)
    }

    /// Remove a client. Returns false if it was already gone.
    pub async fn remove(&self, id: ConsumerId) -> bool {
        let removed = self.inner.consumers.lock().await.remove(&id).is_some();
        if removed {
            debug!(consumer = %id, "Consumer removed");
        }
        removed
    }

    /// Push a newly stored snapshot to every client.
    ///
    /// The message is serialized once and the same buffer is queued for
    /// every recipient. Clients whose queue is full or closed are dropped.
    pub async fn broadcast(&self, snapshot: &Snapshot) -> BroadcastOutcome {
        let message = WsMessage::Update {
            data: snapshot,
            timestamp: current_time_ms(),
        };
        let frame = match encode(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to serialize update");
                return BroadcastOutcome::default();
            }
        };

        let mut outcome = BroadcastOutcome::default();
        let mut consumers = self.inner.consumers.lock().await;
        let mut failed = Vec::new();

        for (id, consumer) in consumers.iter() {
            if consumer
                .resync_seq
                .is_some_and(|seen| snapshot.sequence <= seen)
            {
                // Already has it from the resync
                outcome.delivered += 1;
                continue;
            }
            match consumer.tx.try_send(Outbound::Text(frame.clone())) {
                Ok(()) => outcome.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(consumer = %id, "Consumer backlog full, disconnecting");
                    failed.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(consumer = %id, "Consumer connection closed");
                    failed.push(*id);
                }
            }
        }

        for id in &failed {
            consumers.remove(id);
        }
        outcome.dropped = failed.len();

        outcome
    }

    /// Queue a message for one client. Drops the client if its queue is
    /// full or closed.
    pub async fn send_to(&self, id: ConsumerId, message: &WsMessage<'_>) -> bool {
        let frame = match encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(consumer = %id, error = %e, "Failed to serialize message");
                return false;
            }
        };

        let mut consumers = self.inner.consumers.lock().await;
        let Some(consumer) = consumers.get(&id) else {
            return false;
        };
        if consumer.tx.try_send(Outbound::Text(frame)).is_ok() {
            return true;
        }

        warn!(consumer = %id, "Failed to queue reply, disconnecting");
        consumers.remove(&id);
        false
    }

    /// Mark a client alive after any inbound frame
    pub async fn touch(&self, id: ConsumerId) {
        if let Some(consumer) = self.inner.consumers.lock().await.get_mut(&id) {
            consumer.alive = true;
            consumer.last_activity_ms = current_time_ms();
        }
    }

    /// Handle an inbound text frame. Only `{"type":"ping"}` gets a reply;
    /// everything else, malformed or not, is ignored.
    pub async fn handle_inbound(&self, id: ConsumerId, text: &str) {
        self.touch(id).await;

        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Ping) => {
                let pong = WsMessage::Pong {
                    timestamp: current_time_ms(),
                };
                self.send_to(id, &pong).await;
            }
            Ok(ClientMessage::Unknown) => {}
            Err(e) => debug!(consumer = %id, error = %e, "Ignoring malformed client message"),
        }
    }

    /// One heartbeat round: evict clients that never answered the previous
    /// ping, then ping the rest.
    pub async fn sweep(&self) -> SweepOutcome {
        let mut consumers = self.inner.consumers.lock().await;
        let now = current_time_ms();

        let stale: Vec<ConsumerId> = consumers
            .iter()
            .filter(|(_, c)| !c.alive)
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            if let Some(consumer) = consumers.remove(id) {
                info!(
                    consumer = %id,
                    idle_ms = now - consumer.last_activity_ms,
                    "Consumer failed liveness check, closing"
                );
                let _ = consumer.tx.try_send(Outbound::Close);
            }
        }

        let mut unreachable = Vec::new();
        for (id, consumer) in consumers.iter_mut() {
            consumer.alive = false;
            if consumer.tx.try_send(Outbound::Ping).is_err() {
                unreachable.push(*id);
            }
        }
        for id in &unreachable {
            warn!(consumer = %id, "Could not queue liveness ping, disconnecting");
            consumers.remove(id);
        }

        SweepOutcome {
            pinged: consumers.len(),
            evicted: stale.len() + unreachable.len(),
        }
    }

    /// Start the periodic heartbeat. Replaces any running heartbeat.
    ///
    /// The first sweep runs one full `period` after start, so clients
    /// connecting right away get a whole interval to answer.
    pub async fn spawn_heartbeat(&self, period: Duration) {
        let weak: Weak<ChannelInner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let outcome = LiveChannel { inner }.sweep().await;
                if outcome.evicted > 0 {
                    info!(
                        evicted = outcome.evicted,
                        remaining = outcome.pinged,
                        "Heartbeat sweep"
                    );
                } else {
                    debug!(pinged = outcome.pinged, "Heartbeat sweep");
                }
            }
        });

        if let Some(previous) = self.inner.heartbeat.lock().await.replace(handle) {
            previous.abort();
        }
        info!(period_secs = period.as_secs_f64(), "Heartbeat started");
    }

    /// Stop the heartbeat and close every client. Safe to call twice.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.inner.heartbeat.lock().await.take() {
            handle.abort();
        }

        let mut consumers = self.inner.consumers.lock().await;
        let count = consumers.len();
        for (_, consumer) in consumers.drain() {
            let _ = consumer.tx.try_send(Outbound::Close);
        }
        if count > 0 {
            info!(consumers = count, "Closed live channel consumers");
        }
    }

    pub async fn consumer_count(&self) -> usize {
        self.inner.consumers.lock().await.len()
    }

    pub async fn is_registered(&self, id: ConsumerId) -> bool {
        self.inner.consumers.lock().await.contains_key(&id)
    }
}

impl Default for LiveChannel {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

fn encode(message: &WsMessage<'_>) -> Result<Utf8Bytes> {
    Ok(Utf8Bytes::from(serde_json::to_string(message)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn snapshot(value: i64) -> Snapshot {
        let mut snapshot = Snapshot::stamped(json!({ "value": value }), value);
        snapshot.sequence = value as u64;
        snapshot
    }

    fn parse(frame: Outbound) -> Value {
        match frame {
            Outbound::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_consumers() {
        let channel = LiveChannel::new(8);
        let (_a, mut rx_a) = channel.register(None).await;
        let (_b, mut rx_b) = channel.register(None).await;

        let outcome = channel.broadcast(&snapshot(1)).await;
        assert_eq!(outcome, BroadcastOutcome { delivered: 2, dropped: 0 });

        for rx in [&mut rx_a, &mut rx_b] {
            let msg = parse(rx.try_recv().unwrap());
            assert_eq!(msg["type"], "update");
            assert_eq!(msg["data"]["value"], 1);
            assert!(msg["timestamp"].is_i64());
        }
    }

    #[tokio::test]
    async fn test_failed_consumer_is_isolated() {
        let channel = LiveChannel::new(8);
        let (_a, mut rx_a) = channel.register(None).await;
        let (broken, rx_broken) = channel.register(None).await;
        let (_c, mut rx_c) = channel.register(None).await;

        // Writer side gone: every send to this consumer fails
        drop(rx_broken);

        let outcome = channel.broadcast(&snapshot(7)).await;
        assert_eq!(outcome, BroadcastOutcome { delivered: 2, dropped: 1 });
        assert_eq!(parse(rx_a.try_recv().unwrap())["data"]["value"], 7);
        assert_eq!(parse(rx_c.try_recv().unwrap())["data"]["value"], 7);

        assert!(!channel.is_registered(broken).await);
        assert_eq!(channel.consumer_count().await, 2);
    }

    #[tokio::test]
    async fn test_slow_consumer_disconnected_when_backlog_full() {
        let channel = LiveChannel::new(2);
        let (slow, mut rx_slow) = channel.register(None).await;
        let (_fast, mut rx_fast) = channel.register(None).await;

        for v in 0..3 {
            channel.broadcast(&snapshot(v)).await;
            // fast consumer keeps up
            rx_fast.try_recv().unwrap();
        }

        assert!(!channel.is_registered(slow).await);
        assert_eq!(channel.consumer_count().await, 1);

        // Backlog is bounded at the queue capacity, then the queue closes
        assert!(rx_slow.recv().await.is_some());
        assert!(rx_slow.recv().await.is_some());
        assert!(rx_slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_resync_precedes_updates() {
        let channel = LiveChannel::new(8);
        let latest = snapshot(41);
        let (_id, mut rx) = channel.register(Some(&latest)).await;

        channel.broadcast(&snapshot(42)).await;

        let first = parse(rx.try_recv().unwrap());
        assert_eq!(first["type"], "snapshot");
        assert_eq!(first["data"]["value"], 41);

        let second = parse(rx.try_recv().unwrap());
        assert_eq!(second["type"], "update");
        assert_eq!(second["data"]["value"], 42);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_update_already_sent_as_resync_is_skipped() {
        let channel = LiveChannel::new(8);
        let resynced = snapshot(5);
        let (_late, mut rx_late) = channel.register(Some(&resynced)).await;
        let (_early, mut rx_early) = channel.register(None).await;

        // Producer broadcasts the snapshot the late client already got
        let outcome = channel.broadcast(&resynced).await;
        assert_eq!(outcome, BroadcastOutcome { delivered: 2, dropped: 0 });
        channel.broadcast(&snapshot(6)).await;

        let first = parse(rx_late.try_recv().unwrap());
        assert_eq!(first["type"], "snapshot");
        assert_eq!(first["data"]["value"], 5);
        let second = parse(rx_late.try_recv().unwrap());
        assert_eq!(second["type"], "update");
        assert_eq!(second["data"]["value"], 6);
        assert!(rx_late.try_recv().is_err());

        assert_eq!(parse(rx_early.try_recv().unwrap())["data"]["value"], 5);
        assert_eq!(parse(rx_early.try_recv().unwrap())["data"]["value"], 6);
    }

    #[tokio::test]
    async fn test_no_resync_without_data() {
        let channel = LiveChannel::new(8);
        let (_id, mut rx) = channel.register(None).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ping_gets_pong() {
        let channel = LiveChannel::new(8);
        let (id, mut rx) = channel.register(None).await;

        channel.handle_inbound(id, r#"{"type":"ping"}"#).await;
        let reply = parse(rx.try_recv().unwrap());
        assert_eq!(reply["type"], "pong");
        assert!(reply["timestamp"].is_i64());
    }

    #[tokio::test]
    async fn test_other_inbound_ignored() {
        let channel = LiveChannel::new(8);
        let (id, mut rx) = channel.register(None).await;

        channel.handle_inbound(id, r#"{"type":"history","limit":5}"#).await;
        channel.handle_inbound(id, "{{not json").await;
        channel.handle_inbound(id, "").await;

        assert!(rx.try_recv().is_err());
        assert!(channel.is_registered(id).await);
    }

    #[tokio::test]
    async fn test_sweep_evicts_unresponsive_consumers() {
        let channel = LiveChannel::new(8);
        let (quiet, mut rx_quiet) = channel.register(None).await;
        let (chatty, mut rx_chatty) = channel.register(None).await;

        let first = channel.sweep().await;
        assert_eq!(first, SweepOutcome { pinged: 2, evicted: 0 });
        assert_eq!(rx_quiet.try_recv().unwrap(), Outbound::Ping);
        assert_eq!(rx_chatty.try_recv().unwrap(), Outbound::Ping);

        // Only one answers before the next sweep
        channel.touch(chatty).await;

        let second = channel.sweep().await;
        assert_eq!(second, SweepOutcome { pinged: 1, evicted: 1 });
        assert!(!channel.is_registered(quiet).await);
        assert!(channel.is_registered(chatty).await);
        assert_eq!(rx_quiet.try_recv().unwrap(), Outbound::Close);
        assert_eq!(rx_chatty.try_recv().unwrap(), Outbound::Ping);
    }

    #[tokio::test]
    async fn test_inbound_message_confirms_liveness() {
        let channel = LiveChannel::new(8);
        let (id, _rx) = channel.register(None).await;

        channel.sweep().await;
        channel.handle_inbound(id, "garbage").await;
        channel.sweep().await;

        assert!(channel.is_registered(id).await);
    }

    #[tokio::test]
    async fn test_remove_stops_delivery() {
        let channel = LiveChannel::new(8);
        let (id, mut rx) = channel.register(None).await;

        assert!(channel.remove(id).await);
        assert!(!channel.remove(id).await);

        let outcome = channel.broadcast(&snapshot(1)).await;
        assert_eq!(outcome, BroadcastOutcome::default());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_closes_everyone() {
        let channel = LiveChannel::new(8);
        channel.spawn_heartbeat(Duration::from_secs(60)).await;
        let (_a, mut rx_a) = channel.register(None).await;
        let (_b, mut rx_b) = channel.register(None).await;

        channel.shutdown().await;
        channel.shutdown().await;

        assert_eq!(channel.consumer_count().await, 0);
        assert_eq!(rx_a.recv().await, Some(Outbound::Close));
        assert_eq!(rx_b.recv().await, Some(Outbound::Close));
        assert!(rx_a.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_task_evicts_silent_consumer() {
        let channel = LiveChannel::new(8);
        let (id, mut rx) = channel.register(None).await;
        channel.spawn_heartbeat(Duration::from_secs(30)).await;

        // First sweep pings, second evicts
        assert_eq!(rx.recv().await, Some(Outbound::Ping));
        assert_eq!(rx.recv().await, Some(Outbound::Close));
        assert!(!channel.is_registered(id).await);

        channel.shutdown().await;
    }
}
