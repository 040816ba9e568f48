//! WebSocket handler for the live push channel.
//!
//! Clients connect to `/ws` and receive JSON messages:
//! - `{ "type": "snapshot", "data": { ... } }` once on connect, if any data exists
//! - `{ "type": "update", "data": { ... }, "timestamp": ... }` per new snapshot
//! - `{ "type": "pong", "timestamp": ... }` in reply to `{ "type": "ping" }`

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{Sink, SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::AppState;
use crate::channel::Outbound;

/// Longest a single socket write may block before the client is dropped
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket upgrade handler at GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Run one client session.
///
/// The writer task drains the client's outbound queue onto the socket;
/// the reader task feeds inbound frames to the channel. Whichever ends
/// first tears the session down.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let (id, outbound) = state.feed.connect().await;

    info!(consumer = %id, "WebSocket client connected");

    let mut send_task = tokio::spawn(async move {
        if !pump_outbound(sender, outbound, WRITE_TIMEOUT).await {
            warn!(consumer = %id, "WebSocket write stalled, dropping client");
        }
    });

    let channel = state.feed.channel().clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => channel.handle_inbound(id, text.as_str()).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {
                    // Pong, ping or binary: proof of life, nothing else
                    channel.touch(id).await;
                }
                Err(e) => {
                    debug!(consumer = %id, error = %e, "WebSocket read error");
                    break;
                }
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.feed.channel().remove(id).await;
    info!(consumer = %id, "WebSocket client disconnected");
}

/// Drain a client's outbound queue onto its socket until the queue closes,
/// a `Close` frame is written, or a write fails.
///
/// Every write is bounded by `write_timeout`. Returns false if a write
/// timed out, which ends the session while the registry entry is removed.
async fn pump_outbound<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Outbound>,
    write_timeout: Duration,
) -> bool
where
    S: Sink<Message> + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        let (message, last) = match frame {
            Outbound::Text(text) => (Message::Text(text), false),
            Outbound::Ping => (Message::Ping(Bytes::new()), false),
            Outbound::Close => (Message::Close(None), true),
        };
        match tokio::time::timeout(write_timeout, sink.send(message)).await {
            Ok(Ok(())) if !last => {}
            // Closed by us or by the client
            Ok(_) => break,
            Err(_) => return false,
        }
    }
    let _ = tokio::time::timeout(write_timeout, sink.close()).await;
    true
}
