//! Board registry — session lifecycle, presence, and broadcast.
//!
//! DESIGN
//! ======
//! Sessions are created lazily on first join, hydrated from the store, and
//! kept in memory while any participant is connected. The registry lock is
//! the single serialization point for a board: every mutation acquires it,
//! so operations apply in a definite arrival order.
//!
//! Store I/O never happens under the lock. Join fetches its snapshot before
//! locking; eviction snapshots under the lock, writes without it, then
//! re-checks that nobody rejoined before removing the session.
//!
//! ERROR HANDLING
//! ==============
//! A failed eviction flush retains the session (still dirty) so the autosave
//! task can retry instead of losing the final state.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::Notify;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::element::Element;
use crate::protocol::{Point, Presence, ServerMessage, Viewport};
use crate::state::{AppState, ClientHandle, Session};

// =============================================================================
// JOIN / LEAVE
// =============================================================================

/// Everything a joining participant needs for its `board-data` snapshot.
pub struct JoinSnapshot {
    pub display_name: String,
    pub elements: Vec<Element>,
    pub participants: std::collections::HashMap<Uuid, Presence>,
    pub viewport: Viewport,
}

/// Join a board, creating or hydrating its session as needed. Never fails:
/// a store miss means a fresh empty board, and a failed load degrades to
/// one too so collaboration can start without the store.
pub async fn join_board(
    state: &AppState,
    board_id: Uuid,
    connection_id: Uuid,
    handle: ClientHandle,
) -> JoinSnapshot {
    // Fetch outside the lock; applied only if this turns out to be the
    // first live participant.
    let stored = match state.store.load(board_id).await {
        Ok(stored) => stored,
        Err(e) => {
            warn!(error = %e, %board_id, "board load failed; starting from an empty session");
            None
        }
    };

    let mut boards = state.boards.write().await;
    let session = boards.entry(board_id).or_insert_with(Session::new);

    // Hydrate on first join. A session retained after a failed flush is
    // dirty and newer than the store, so its elements are kept.
    if session.clients.is_empty() && !session.is_dirty() {
        if let Some(record) = stored {
            session.elements = record.elements;
            info!(%board_id, count = session.elements.len(), "hydrated board from store");
        }
    }

    let display_name = session.next_display_name();
    session.clients.insert(connection_id, handle);
    session.participants.insert(
        connection_id,
        Presence { display_name: display_name.clone(), cursor: Point::default() },
    );

    info!(%board_id, %connection_id, participants = session.clients.len(), "participant joined board");
    JoinSnapshot {
        display_name,
        elements: session.elements.clone(),
        participants: session.participants.clone(),
        viewport: session.viewport,
    }
}

/// Leave a board. When the last participant disconnects, flush the session
/// to the store and evict it from the registry.
pub async fn part_board(state: &AppState, board_id: Uuid, connection_id: Uuid) {
    let mut boards = state.boards.write().await;
    let Some(session) = boards.get_mut(&board_id) else {
        return;
    };

    session.clients.remove(&connection_id);
    session.participants.remove(&connection_id);
    info!(%board_id, %connection_id, remaining = session.clients.len(), "participant left board");

    if !session.clients.is_empty() {
        return;
    }

    if !session.is_dirty() {
        boards.remove(&board_id);
        info!(%board_id, "evicted board from memory");
        return;
    }

    // Final flush: snapshot under the lock, write without it.
    let elements = session.elements.clone();
    let revision = session.revision();
    drop(boards);
    let result = state.store.save(board_id, &elements, OffsetDateTime::now_utc()).await;

    let mut boards = state.boards.write().await;
    let Some(session) = boards.get_mut(&board_id) else {
        return;
    };
    if !session.clients.is_empty() {
        // Someone rejoined while the flush was in flight; the session lives on.
        return;
    }

    match result {
        Ok(()) => {
            session.ack_flush(revision);
            if session.is_dirty() {
                warn!(%board_id, "retaining board after final flush; newer edits exist");
            } else {
                boards.remove(&board_id);
                info!(%board_id, count = elements.len(), "flushed and evicted board");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, %board_id, "final flush failed; board retained for autosave retry");
        }
    }
}

// =============================================================================
// PRESENCE / VIEWPORT
// =============================================================================

/// Update a participant's live cursor. Returns false for unknown
/// board/participant combinations, which callers drop silently.
pub async fn move_cursor(
    state: &AppState,
    board_id: Uuid,
    connection_id: Uuid,
    cursor: Point,
) -> bool {
    let mut boards = state.boards.write().await;
    let Some(session) = boards.get_mut(&board_id) else {
        return false;
    };
    let Some(presence) = session.participants.get_mut(&connection_id) else {
        return false;
    };
    presence.cursor = cursor;
    true
}

/// Overwrite the shared viewport. Last writer wins; never persisted.
pub async fn change_viewport(
    state: &AppState,
    board_id: Uuid,
    connection_id: Uuid,
    viewport: Viewport,
) -> bool {
    let mut boards = state.boards.write().await;
    let Some(session) = boards.get_mut(&board_id) else {
        return false;
    };
    if !session.participants.contains_key(&connection_id) {
        return false;
    }
    session.viewport = viewport;
    true
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Deliver an event to every participant of a board except `exclude`.
///
/// Delivery is per-recipient isolated: one full or closed channel never
/// affects the others. Ephemeral events are dropped under backpressure;
/// a participant that cannot keep up with structural events is evicted
/// from the session so it reconnects for a fresh snapshot instead of
/// observing a gap in the delta stream.
pub async fn broadcast(
    state: &AppState,
    board_id: Uuid,
    message: &ServerMessage,
    exclude: Option<Uuid>,
) {
    let lagging: Vec<(Uuid, Arc<Notify>)> = {
        let boards = state.boards.read().await;
        let Some(session) = boards.get(&board_id) else {
            return;
        };

        let mut lagging = Vec::new();
        for (connection_id, handle) in &session.clients {
            if exclude == Some(*connection_id) {
                continue;
            }
            match handle.tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    if message.is_ephemeral() {
                        debug!(%board_id, %connection_id, "dropping ephemeral event for slow client");
                    } else {
                        lagging.push((*connection_id, handle.shutdown.clone()));
                    }
                }
                // A closed channel means the socket task is tearing down;
                // its own cleanup runs part_board.
                Err(TrySendError::Closed(_)) => {}
            }
        }
        lagging
    };

    for (connection_id, shutdown) in lagging {
        warn!(%board_id, %connection_id, "client cannot keep up with structural events; evicting");
        part_board(state, board_id, connection_id).await;
        // Wake the socket task; its teardown sends participant-left to
        // the remaining peers and closes the connection.
        shutdown.notify_one();
    }
}

#[cfg(test)]
#[path = "board_test.rs"]
mod tests;
