//! The display socket for one session.
//!
//! A display client connects to `/ws/visual/{session_id}` and receives each
//! show/hide directive as a JSON text frame. Frames from the client are
//! ignored apart from close.

use crate::state::AppState;
use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use vidya_core::channel::display_endpoint;

/// Axum handler to upgrade a display connection to a WebSocket.
pub async fn visual_ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_visual_socket(socket, state, session_id.to_string()))
}

#[instrument(name = "ws_visual", skip(socket, state))]
async fn handle_visual_socket(socket: WebSocket, state: Arc<AppState>, session_id: String) {
    let (mut socket_tx, mut socket_rx) = socket.split();
    let (endpoint, mut events) = display_endpoint();
    state.channel.register(&session_id, endpoint.clone()).await;

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                if let Err(e) = socket_tx.send(Message::Text(event.to_json().into())).await {
                    warn!(error = %e, "Failed to forward display event, closing.");
                    break;
                }
            },
            msg = socket_rx.next() => match msg {
                Some(Ok(Message::Close(_))) | None => {
                    info!("Display client closed the socket.");
                    break;
                }
                Some(Ok(_)) => debug!("Ignoring frame from display client."),
                Some(Err(e)) => {
                    warn!("Error receiving from display WebSocket: {:?}", e);
                    break;
                }
            },
        }
    }

    state.channel.release(&session_id, &endpoint).await;
}
