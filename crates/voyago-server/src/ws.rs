//! WebSocket endpoint feeding the realtime gateway.
//!
//! The client connects to `GET /ws?userId=<id>`.  The identity comes from
//! the handshake query string; a missing value or the literal string
//! `"undefined"` keeps the connection open but unregistered.  Events flow
//! server-to-client only: inbound frames other than pings are drained and
//! ignored, since message sending happens over the REST surface.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::debug;

use crate::api::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket, query.user_id))
}

async fn handle_socket(state: AppState, socket: WebSocket, user_id: Option<String>) {
    let (connection, mut events) = state.gateway.connect(user_id.as_deref()).await;
    let (mut sink, mut stream) = socket.split();

    // Outbound pump: gateway events become JSON text frames.  Ends when the
    // gateway drops the sender or the socket refuses a write.
    let send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if sink.send(Message::Text(event.to_frame())).await.is_err() {
                break;
            }
        }
    });

    // Inbound pump: run until the client goes away, gracefully or not.
    while let Some(incoming) = stream.next().await {
        match incoming {
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Ok(other) => {
                debug!(connection = %connection, "ignoring inbound frame: {:?}", other);
            }
            Err(_) => break,
        }
    }

    state.gateway.disconnect(connection).await;
    send_task.abort();
}
