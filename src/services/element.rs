//! Element service — create, update, delete against a live session.
//!
//! DESIGN
//! ======
//! Mutations apply to in-memory state immediately and mark the session dirty
//! for the autosave flush. Merging is last-writer-wins at field level, well
//! defined because the registry lock gives every board a single arrival
//! order. No operation here sends anything; the dispatch layer owns all
//! outbound concerns.

use tracing::debug;
use uuid::Uuid;

use crate::element::{Element, ElementUpdate, InvalidElement};
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("board not loaded: {0}")]
    BoardNotLoaded(Uuid),
    #[error("duplicate element id: {0}")]
    DuplicateId(i64),
    #[error("invalid element draft: {0}")]
    InvalidDraft(#[from] InvalidElement),
}

/// Append a client-drawn element to the session.
///
/// The client proposes the id from its local counter; a colliding id means
/// the event was already applied (or raced another client's counter) and
/// the draft is rejected for the caller to drop.
///
/// # Errors
///
/// `BoardNotLoaded` when no session is live for the board, `InvalidDraft`
/// for degenerate or malformed geometry, `DuplicateId` on id collision.
pub async fn create_element(
    state: &AppState,
    board_id: Uuid,
    element: Element,
) -> Result<Element, SessionError> {
    element.validate()?;

    let mut boards = state.boards.write().await;
    let session = boards.get_mut(&board_id).ok_or(SessionError::BoardNotLoaded(board_id))?;

    if session.contains_element(element.id()) {
        return Err(SessionError::DuplicateId(element.id()));
    }

    session.elements.push(element.clone());
    session.mark_dirty();
    Ok(element)
}

/// Merge a partial-fields patch into a stored element. An unknown id is a
/// no-op (`Ok(None)`): the element may have been concurrently deleted and
/// the update is dropped, not queued.
///
/// # Errors
///
/// `BoardNotLoaded` when no session is live for the board.
pub async fn update_element(
    state: &AppState,
    board_id: Uuid,
    element_id: i64,
    updates: &ElementUpdate,
) -> Result<Option<Element>, SessionError> {
    let mut boards = state.boards.write().await;
    let session = boards.get_mut(&board_id).ok_or(SessionError::BoardNotLoaded(board_id))?;

    let Some(element) = session.find_element_mut(element_id) else {
        debug!(%board_id, element_id, "update for unknown element; dropping");
        return Ok(None);
    };

    element.apply(updates);
    let updated = element.clone();
    session.mark_dirty();
    Ok(Some(updated))
}

/// Remove an element by id. Idempotent: deleting an absent id is a no-op
/// and returns `false`.
///
/// # Errors
///
/// `BoardNotLoaded` when no session is live for the board.
pub async fn delete_element(
    state: &AppState,
    board_id: Uuid,
    element_id: i64,
) -> Result<bool, SessionError> {
    let mut boards = state.boards.write().await;
    let session = boards.get_mut(&board_id).ok_or(SessionError::BoardNotLoaded(board_id))?;

    let before = session.elements.len();
    session.elements.retain(|e| e.id() != element_id);
    let removed = session.elements.len() != before;
    if removed {
        session.mark_dirty();
    }
    Ok(removed)
}

#[cfg(test)]
#[path = "element_test.rs"]
mod tests;
