//! WebSocket handler — the synchronization channel.
//!
//! DESIGN
//! ======
//! On upgrade, each connection gets an id and a bounded event channel, then
//! enters a `select!` loop:
//! - Inbound client events → parse + dispatch against the joined board
//! - Broadcast events from board peers → forward to the socket
//!
//! Service functions mutate session state and report what happened; this
//! dispatch layer owns all outbound concerns — the snapshot reply to the
//! joiner and the delta broadcast to peers.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → connection id assigned, no board joined yet
//! 2. `join-board` → snapshot reply + `participant-joined` to peers
//! 3. Mutation events → applied in arrival order, deltas to peers
//! 4. Close (or slow-consumer eviction) → `participant-left` + part
//!
//! Malformed events and events for boards the connection never joined are
//! dropped with a diagnostic; they never tear down the connection or reach
//! other participants.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::services::board;
use crate::services::element;
use crate::state::{AppState, ClientHandle};

/// Outbound queue depth per connection. Cursor floods beyond this are
/// dropped; structural floods evict the lagging client.
const CLIENT_QUEUE_CAPACITY: usize = 256;

// =============================================================================
// UPGRADE / CONNECTION
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    let (client_tx, mut client_rx) = mpsc::channel::<ServerMessage>(CLIENT_QUEUE_CAPACITY);
    let shutdown = Arc::new(Notify::new());
    let handle = ClientHandle { tx: client_tx, shutdown: shutdown.clone() };

    info!(%connection_id, "ws: client connected");

    // The board this connection has joined, set by `join-board`.
    let mut current_board: Option<Uuid> = None;

    'conn: loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(
                            &state,
                            &mut current_board,
                            connection_id,
                            &handle,
                            text.as_str(),
                        )
                        .await;
                        for reply in replies {
                            if send_message(&mut socket, &reply).await.is_err() {
                                break 'conn;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            maybe = client_rx.recv() => {
                let Some(event) = maybe else { break };
                if send_message(&mut socket, &event).await.is_err() {
                    break;
                }
            }
            // Slow-consumer eviction: the session already dropped us; close
            // so the client reconnects for a fresh snapshot.
            () = shutdown.notified() => {
                info!(%connection_id, "ws: evicted as a slow consumer; closing");
                break;
            }
        }
    }

    // Notify peers before cleanup; part_board may evict the session.
    if let Some(board_id) = current_board {
        board::broadcast(
            &state,
            board_id,
            &ServerMessage::ParticipantLeft { participant_id: connection_id },
            Some(connection_id),
        )
        .await;
        board::part_board(&state, board_id, connection_id).await;
    }
    info!(%connection_id, "ws: client disconnected");
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Parse and apply one inbound text event, broadcasting deltas to peers.
/// Returns the events owed to the sender (only `board-data` today).
///
/// Split from the socket loop so tests can exercise dispatch without a
/// network connection.
async fn process_inbound_text(
    state: &AppState,
    current_board: &mut Option<Uuid>,
    connection_id: Uuid,
    handle: &ClientHandle,
    text: &str,
) -> Vec<ServerMessage> {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(%connection_id, error = %e, "ws: invalid inbound event; dropping");
            return Vec::new();
        }
    };

    match msg {
        ClientMessage::JoinBoard { board_id } => {
            // Joining a second board parts the first.
            if let Some(old_board) = current_board.take() {
                board::broadcast(
                    state,
                    old_board,
                    &ServerMessage::ParticipantLeft { participant_id: connection_id },
                    Some(connection_id),
                )
                .await;
                board::part_board(state, old_board, connection_id).await;
            }

            let snapshot = board::join_board(state, board_id, connection_id, handle.clone()).await;
            *current_board = Some(board_id);
            let presence = crate::protocol::Presence {
                display_name: snapshot.display_name.clone(),
                cursor: crate::protocol::Point::default(),
            };
            board::broadcast(
                state,
                board_id,
                &ServerMessage::ParticipantJoined { participant_id: connection_id, presence },
                Some(connection_id),
            )
            .await;

            vec![ServerMessage::BoardData {
                participant_id: connection_id,
                elements: snapshot.elements,
                participants: snapshot.participants,
                viewport: snapshot.viewport,
            }]
        }
        ClientMessage::ElementCreate { board_id, element } => {
            let Some(board_id) = guard_board(*current_board, board_id, connection_id, "element-create")
            else {
                return Vec::new();
            };
            match element::create_element(state, board_id, element).await {
                Ok(element) => {
                    board::broadcast(
                        state,
                        board_id,
                        &ServerMessage::ElementCreated { element },
                        Some(connection_id),
                    )
                    .await;
                }
                Err(e) => {
                    warn!(%board_id, %connection_id, error = %e, "ws: dropping element-create");
                }
            }
            Vec::new()
        }
        ClientMessage::ElementUpdate { board_id, element_id, updates } => {
            let Some(board_id) = guard_board(*current_board, board_id, connection_id, "element-update")
            else {
                return Vec::new();
            };
            match element::update_element(state, board_id, element_id, &updates).await {
                Ok(Some(_)) => {
                    board::broadcast(
                        state,
                        board_id,
                        &ServerMessage::ElementUpdated { element_id, updates },
                        Some(connection_id),
                    )
                    .await;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(%board_id, %connection_id, error = %e, "ws: dropping element-update");
                }
            }
            Vec::new()
        }
        ClientMessage::ElementDelete { board_id, element_id } => {
            let Some(board_id) = guard_board(*current_board, board_id, connection_id, "element-delete")
            else {
                return Vec::new();
            };
            match element::delete_element(state, board_id, element_id).await {
                Ok(true) => {
                    board::broadcast(
                        state,
                        board_id,
                        &ServerMessage::ElementDeleted { element_id },
                        Some(connection_id),
                    )
                    .await;
                }
                Ok(false) => {
                    debug!(%board_id, element_id, "ws: delete for absent element; no-op");
                }
                Err(e) => {
                    warn!(%board_id, %connection_id, error = %e, "ws: dropping element-delete");
                }
            }
            Vec::new()
        }
        ClientMessage::CursorMove { board_id, cursor } => {
            let Some(board_id) = guard_board(*current_board, board_id, connection_id, "cursor-move")
            else {
                return Vec::new();
            };
            if board::move_cursor(state, board_id, connection_id, cursor).await {
                board::broadcast(
                    state,
                    board_id,
                    &ServerMessage::CursorMoved { participant_id: connection_id, cursor },
                    Some(connection_id),
                )
                .await;
            }
            Vec::new()
        }
        ClientMessage::ViewportChange { board_id, viewport } => {
            let Some(board_id) = guard_board(*current_board, board_id, connection_id, "viewport-change")
            else {
                return Vec::new();
            };
            if board::change_viewport(state, board_id, connection_id, viewport).await {
                // Excludes the originator so it never re-applies its own
                // pan/zoom and feedback-loops.
                board::broadcast(
                    state,
                    board_id,
                    &ServerMessage::ViewportChanged { participant_id: connection_id, viewport },
                    Some(connection_id),
                )
                .await;
            }
            Vec::new()
        }
    }
}

/// Events must target the board this connection joined; anything else is
/// dropped with a diagnostic.
fn guard_board(
    current: Option<Uuid>,
    claimed: Uuid,
    connection_id: Uuid,
    event: &str,
) -> Option<Uuid> {
    match current {
        Some(board_id) if board_id == claimed => Some(board_id),
        Some(board_id) => {
            warn!(%connection_id, %claimed, joined = %board_id, event, "ws: event for an unjoined board; dropping");
            None
        }
        None => {
            warn!(%connection_id, event, "ws: event before join-board; dropping");
            None
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), ()> {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize event");
            return Err(());
        }
    };
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
