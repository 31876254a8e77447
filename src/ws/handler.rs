//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::util::rate_limit::SessionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{sanitize_name, ClientMsg, ServerMsg};

/// Outbound channel depth per connection; a client that cannot keep up
/// with one snapshot per tick starts losing frames rather than memory
const OUTBOUND_BUFFER: usize = 256;

/// WebSocket upgrade handler. Connections are anonymous: the handle is
/// minted server-side and lives until the socket closes.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    info!(conn_id = %conn_id, "New WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();

    let (tx, mut rx) = mpsc::channel::<ServerMsg>(OUTBOUND_BUFFER);
    state.matchmaking.register(conn_id, tx.clone());

    let welcome = ServerMsg::Welcome {
        conn_id,
        server_time: unix_millis(),
    };
    let _ = tx.try_send(welcome);

    // Writer task: outbound channel -> socket
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(conn_id = %conn_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    let rate_limiter = SessionRateLimiter::new();

    // Reader loop: socket -> session coordinator
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(conn_id = %conn_id, "Rate limited inbound message");
                    continue;
                }
                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => handle_client_msg(&state, conn_id, msg, &rate_limiter).await,
                    Err(e) => {
                        warn!(conn_id = %conn_id, error = %e, "Failed to parse client message");
                        let _ = tx.try_send(ServerMsg::Error {
                            code: "bad_message".to_string(),
                            message: "unrecognized message".to_string(),
                        });
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(conn_id = %conn_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(conn_id = %conn_id, "Client initiated close");
                break;
            }
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
    state.matchmaking.disconnect(conn_id).await;
    info!(conn_id = %conn_id, "WebSocket connection closed");
}

async fn handle_client_msg(
    state: &AppState,
    conn_id: Uuid,
    msg: ClientMsg,
    rate_limiter: &SessionRateLimiter,
) {
    match msg {
        ClientMsg::QueueJoin { name } => {
            let name = sanitize_name(name.as_deref());
            state.matchmaking.join_queue(conn_id, name).await;
        }
        ClientMsg::QueueLeave => {
            state.matchmaking.leave_queue(conn_id).await;
        }
        ClientMsg::InputMove { room_id, target_y } => {
            state.matchmaking.submit_input(conn_id, room_id, target_y);
        }
        ClientMsg::ChatSend { text } => {
            if rate_limiter.check_chat() {
                state.matchmaking.chat(conn_id, &text).await;
            } else {
                debug!(conn_id = %conn_id, "Chat cooldown active, message dropped");
            }
        }
        ClientMsg::Ping { t } => {
            state.matchmaking.send_to(conn_id, ServerMsg::Pong { t });
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
