//! WebSocket upgrade handler

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{GameHandle, Inbound};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::ClientMsg;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4();
    info!(session_id = %session_id, "New WebSocket connection");

    let game = state.game.clone();

    // Outbox first so the identification frame has somewhere to go
    let outbox = game.connections.register(session_id);
    if !game.send(Inbound::Connect { id: session_id }).await {
        error!(session_id = %session_id, "Game loop is not running");
        game.connections.unregister(session_id);
        return;
    }

    let (ws_sink, ws_stream) = socket.split();
    let rate_limiter = ConnectionRateLimiter::new(state.config.game.input_rate_limit);

    let mut writer = tokio::spawn(write_outbox(session_id, ws_sink, outbox));
    let mut reader = tokio::spawn(read_messages(
        session_id,
        ws_stream,
        game.clone(),
        rate_limiter,
    ));

    // Either side ending tears down the connection
    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    game.connections.unregister(session_id);
    game.send(Inbound::Disconnect { id: session_id }).await;

    info!(session_id = %session_id, "WebSocket connection closed");
}

/// Writer task: outbox -> WebSocket. Ends when the outbox is unregistered.
async fn write_outbox(
    session_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbox: mpsc::Receiver<Arc<str>>,
) {
    while let Some(frame) = outbox.recv().await {
        if let Err(e) = ws_sink.send(Message::Text(frame.to_string())).await {
            debug!(session_id = %session_id, error = %e, "WebSocket send failed");
            return;
        }
    }

    debug!(session_id = %session_id, "Outbox closed, closing socket");
    let _ = ws_sink.send(Message::Close(None)).await;
}

/// Reader loop: WebSocket -> game loop
async fn read_messages(
    session_id: Uuid,
    mut ws_stream: SplitStream<WebSocket>,
    game: GameHandle,
    rate_limiter: ConnectionRateLimiter,
) {
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(session_id = %session_id, "Rate limited input message");
                    continue;
                }

                match ClientMsg::parse(&text) {
                    Ok(msg) => {
                        if !game.send(Inbound::Message { id: session_id, msg }).await {
                            debug!(session_id = %session_id, "Inbound channel closed");
                            break;
                        }
                    }
                    Err(e) if e.is_malformed() => {
                        warn!(session_id = %session_id, error = %e, "Failed to parse client message");
                    }
                    Err(e) => {
                        debug!(session_id = %session_id, error = %e, "Ignoring invalid client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(session_id = %session_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(session_id = %session_id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(session_id = %session_id, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }
}
