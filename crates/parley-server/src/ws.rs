//! Session-to-connection binder and push-channel pump.
//!
//! A live push connection is a WebSocket bound to exactly one
//! authenticated user for its lifetime.  The upgrade is gated on the same
//! session credential the REST surface uses; connections without a valid
//! token are rejected before any registry mutation.  Once bound, the
//! socket does nothing but pump [`ServerEvent`] frames from the
//! connection's channel to the client until either side disconnects.

use axum::extract::ws::{Message as WsFrame, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_shared::{ConnectionId, ServerEvent, UserId};

use crate::api::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Session token.  Browsers cannot set headers on WebSocket
    /// handshakes, so the credential rides in the query string.
    token: String,
}

/// `GET /ws?token=...` -- authenticate, then upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let Some(user_id) = state.sessions.resolve(&query.token) else {
        warn!("push connection rejected: invalid session token");
        return ApiError::Auth.into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

/// Drive one bound connection: register with the presence registry, pump
/// events out, unregister on any disconnect path.
async fn handle_socket(socket: WebSocket, state: AppState, user_id: UserId) {
    let connection_id = ConnectionId::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    state.presence.register(user_id, connection_id, tx);
    info!(user = %user_id, connection = %connection_id, "push connection bound");

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let frame = match event.to_json() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "failed to encode push frame");
                        continue;
                    }
                };
                if ws_tx.send(WsFrame::Text(frame)).await.is_err() {
                    break;
                }
            }

            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(WsFrame::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(other)) => {
                        // Clients never send application frames on the
                        // push channel; pings are answered by the
                        // transport.
                        debug!(frame = ?other, "ignoring client frame");
                    }
                }
            }
        }
    }

    state.presence.unregister(connection_id);
    info!(user = %user_id, connection = %connection_id, "push connection closed");
}
