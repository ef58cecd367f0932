//! Observer WebSocket endpoint
//!
//! Each upgraded socket joins the connection registry and runs one task that
//! forwards queued tally frames to the peer. Inbound frames are ignored apart
//! from close; pings are answered by the transport.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};

use super::connect_info::PeerAddr;
use super::AppState;

/// GET {wsPath}
pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    peer: PeerAddr,
) -> Response {
    ws.on_upgrade(move |socket| observe(socket, state, peer))
}

async fn observe(socket: WebSocket, state: AppState, peer: PeerAddr) {
    let registry = Arc::clone(state.engine.hub().registry());
    let metrics = Arc::clone(state.engine.metrics());

    let (handle, mut frames) = registry.join();
    metrics.ws_connections.inc();
    info!(connection_id = handle.id(), peer = %peer, "Observer connected");

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sink.send(Message::Text(frame.as_ref().into())).await {
                    debug!(connection_id = handle.id(), "Send failed: {}", e);
                    break;
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(connection_id = handle.id(), "Receive failed: {}", e);
                    break;
                }
            },
        }
    }

    registry.leave(&handle);
    metrics.ws_connections.dec();
    let _ = sink.close().await;
    info!(connection_id = handle.id(), peer = %peer, "Observer disconnected");
}
