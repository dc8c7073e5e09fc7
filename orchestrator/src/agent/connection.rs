//! WebSocket lifecycle for one agent connection.
//!
//! Order on every socket: authenticate (upgrade header or an initial `auth`
//! frame), then register, then steady state. A dedicated sender task drains
//! the outbound queue so frames reach the wire in dispatch order.

use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use stark_common::protocol::{AgentFrame, ServerFrame};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::ConnectionHandle;
use crate::metrics;
use crate::state::AppState;

/// Upgrade handler for `GET /ws`. The bearer token may ride on the upgrade
/// request; otherwise the first frame must be an `auth` frame.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let header_token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    ws.on_upgrade(move |socket| handle_socket(socket, state, header_token))
}

async fn sender_main(
    mut sink: SplitSink<WebSocket, Message>,
    rx: async_channel::Receiver<ServerFrame>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = rx.recv() => {
                let Ok(frame) = frame else { break };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("failed to serialize frame: {e}");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    tracing::debug!("agent send failed: {e}");
                    break;
                }
            }
        }
    }
    let _ = sink.close().await;
}

async fn handle_socket(socket: WebSocket, state: AppState, header_token: Option<String>) {
    let (mut sink, mut stream) = socket.split();
    let idle = Duration::from_secs(state.timing.connection_idle_secs);

    // Authentication comes before anything else touches the connection.
    let token = match header_token {
        Some(token) => Some(token),
        None => read_auth_frame(&mut stream, idle).await,
    };
    let principal = match token {
        Some(token) => state.auth.verify_token(&token).await,
        None => Err(stark_common::Error::Auth("no credentials presented".into())),
    };
    let principal = match principal {
        Ok(principal) => principal,
        Err(e) => {
            tracing::info!("agent auth refused: {e}");
            let refusal = ServerFrame::AuthRejected {
                reason: "authentication refused".into(),
            };
            if let Ok(text) = serde_json::to_string(&refusal) {
                let _ = sink.send(Message::Text(text.into())).await;
            }
            let _ = sink.close().await;
            return;
        }
    };

    let connection_id = Uuid::new_v4();
    let cancel = state.cancel.child_token();
    let (handle, outbound) = ConnectionHandle::new(
        connection_id,
        principal,
        state.timing.pending_request_ceiling,
    );
    state.connections.insert(handle.clone());
    metrics::agent_connected(state.connections.active_count());
    tracing::info!(
        connection_id = %connection_id,
        principal = %handle.principal.username,
        "agent connected"
    );

    let sender = tokio::spawn(sender_main(sink, outbound, cancel.clone()));
    let _ = handle.send(ServerFrame::AuthOk { connection_id }).await;

    let dispatcher = state.dispatcher.clone();
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            next = tokio::time::timeout(idle, stream.next()) => next,
        };
        let message = match message {
            Err(_) => {
                tracing::info!(connection_id = %connection_id, "agent connection idle, closing");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(connection_id = %connection_id, "websocket error: {e}");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };
        match message {
            Message::Text(text) => {
                let frame: AgentFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::debug!(connection_id = %connection_id, "bad frame: {e}");
                        let _ = handle
                            .send(ServerFrame::Error {
                                correlation_id: None,
                                code: "Validation".into(),
                                message: format!("unparseable frame: {e}"),
                            })
                            .await;
                        continue;
                    }
                };
                dispatcher.handle_frame(&handle, frame).await;
            }
            Message::Close(_) => break,
            // Ping/Pong are answered by the protocol layer.
            _ => {}
        }
    }

    teardown(&state, connection_id).await;
    cancel.cancel();
    let _ = sender.await;
}

/// Wait for the initial `auth` frame, tolerating nothing else.
async fn read_auth_frame(stream: &mut SplitStream<WebSocket>, idle: Duration) -> Option<String> {
    let first = tokio::time::timeout(idle, stream.next()).await.ok()??;
    let message = first.ok()?;
    let Message::Text(text) = message else {
        return None;
    };
    match serde_json::from_str(&text) {
        Ok(AgentFrame::Auth { token }) => Some(token),
        _ => None,
    }
}

async fn teardown(state: &AppState, connection_id: Uuid) {
    let Some(handle) = state.connections.remove(connection_id) else {
        return;
    };
    metrics::agent_disconnected(state.connections.active_count());
    tracing::info!(connection_id = %connection_id, "agent disconnected");
    if let Some(node_id) = handle.node_id() {
        state
            .registry
            .connection_closed(Uuid::new_v4(), node_id, connection_id)
            .await;
    }
}
