use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use sketchroom_shared::{
    decode_binary, decode_text, encode_binary, encode_text, normalize_session_id, ClientMessage,
    ServerMessage,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::{Connection, ConnectionContext, RejectReason, RelayAction};
use crate::relay::{RelayHandle, RelayStopped};
use crate::state::AppState;

pub async fn ping_handler() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

#[derive(Serialize)]
pub struct NewSession {
    pub session_id: String,
    pub ws_path: String,
}

/// Hands out a fresh session id for clients that want to start a new board.
pub async fn root_handler() -> Json<NewSession> {
    let session_id = Uuid::now_v7().to_string();
    Json(NewSession {
        ws_path: format!("/ws/{session_id}"),
        session_id,
    })
}

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, None))
}

pub async fn ws_session_handler(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let session_id = match normalize_session_id(&session_id) {
        Some(id) => id,
        None => return StatusCode::NOT_FOUND.into_response(),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, Some(session_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, auto_join: Option<String>) {
    let (mut socket_sender, mut socket_receiver) = socket.split();
    let client_id = state.relay.next_client_id();
    let (connection, mut outbound) = Connection::open(client_id, state.outbound_capacity);
    let mut context = ConnectionContext::new(client_id);
    let binary = Arc::new(AtomicBool::new(false));

    if let Err(error) = connection.send(ServerMessage::Connected { client_id }) {
        warn!(client_id = %client_id, %error, "could not queue connected message");
        return;
    }
    if state.relay.register(connection.clone()).await.is_err() {
        warn!(client_id = %client_id, "relay unavailable, closing connection");
        return;
    }
    info!(client_id = %client_id, "WS connected");

    let send_binary = binary.clone();
    let send_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let frame = if send_binary.load(Ordering::Relaxed) {
                encode_binary(&message).map(Message::Binary)
            } else {
                encode_text(&message).map(Message::Text)
            };
            let frame = match frame {
                Ok(frame) => frame,
                Err(error) => {
                    warn!(client_id = %client_id, kind = message.kind(), %error, "WS encode failed");
                    continue;
                }
            };
            if socket_sender.send(frame).await.is_err() {
                break;
            }
        }
    });

    if let Some(session_id) = auto_join {
        let result = context.join(&session_id);
        if dispatch(&state.relay, &connection, result).await.is_err() {
            send_task.abort();
            return;
        }
    }

    let mut close_frame = None;
    while let Some(Ok(message)) = socket_receiver.next().await {
        let parsed = match message {
            Message::Text(text) => decode_text::<ClientMessage>(&text),
            Message::Binary(data) => {
                binary.store(true, Ordering::Relaxed);
                decode_binary::<ClientMessage>(&data)
            }
            Message::Close(frame) => {
                close_frame = frame;
                break;
            }
            _ => continue,
        };
        let client_message = match parsed {
            Ok(client_message) => client_message,
            Err(error) => {
                debug!(client_id = %client_id, %error, "WS message parse error");
                reply_error(&connection, format!("unreadable message: {error}"));
                continue;
            }
        };
        let result = context.accept(client_message);
        if dispatch(&state.relay, &connection, result).await.is_err() {
            break;
        }
    }

    context.close();
    if state.relay.disconnect(client_id).await.is_err() {
        warn!(client_id = %client_id, "relay unavailable during disconnect");
    }
    send_task.abort();
    info!(client_id = %client_id, "WS disconnected");
    if let Some(frame) = &close_frame {
        debug!(
            client_id = %client_id,
            code = frame.code,
            reason = %frame.reason,
            "WS close frame"
        );
    }
}

/// Queues an `error` reply. Returns false when it could not be queued.
fn reply_error(connection: &Connection, message: String) -> bool {
    match connection.send(ServerMessage::Error { message }) {
        Ok(()) => true,
        Err(error) => {
            debug!(client_id = %connection.client_id(), %error, "dropped error reply");
            false
        }
    }
}

async fn dispatch(
    relay: &RelayHandle,
    connection: &Connection,
    result: Result<RelayAction, RejectReason>,
) -> Result<(), RelayStopped> {
    let client_id = connection.client_id();
    match result {
        Ok(RelayAction::Join { session_id }) => relay.join(client_id, session_id).await,
        Ok(RelayAction::Leave { session_id }) => relay.leave(client_id, session_id).await,
        Ok(RelayAction::Publish(event)) => relay.publish(event).await,
        Err(reason) => {
            if reason.notify_sender() {
                debug!(client_id = %client_id, %reason, "rejected client message");
                reply_error(connection, reason.to_string());
            } else {
                debug!(client_id = %client_id, %reason, "dropped unroutable message");
            }
            Ok(())
        }
    }
}
