//! Synchronization protocol — the message contract between client and session.
//!
//! DESIGN
//! ======
//! Every message is a JSON object tagged by `event`, kebab-case on the wire,
//! camelCase payload fields. Client events carry the board id they target so
//! the dispatch layer can reject events for boards the connection never
//! joined. Server events omit it: a connection only ever receives events for
//! its joined board.
//!
//! ORDERING
//! ========
//! For one board, the sequence of structural server events any participant
//! observes is exactly the sequence the session applied. Cursor and viewport
//! events are ephemeral and may be dropped under backpressure.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::element::{Element, ElementUpdate};

// =============================================================================
// SHARED PAYLOAD TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Shared pan/zoom state. One last-writer-wins value per board, not
/// per-participant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, zoom: 1.0 }
    }
}

/// A connected participant's identity and live cursor. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub display_name: String,
    pub cursor: Point,
}

// =============================================================================
// CLIENT → SERVER
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    JoinBoard {
        board_id: Uuid,
    },
    ElementCreate {
        board_id: Uuid,
        element: Element,
    },
    ElementUpdate {
        board_id: Uuid,
        element_id: i64,
        updates: ElementUpdate,
    },
    ElementDelete {
        board_id: Uuid,
        element_id: i64,
    },
    CursorMove {
        board_id: Uuid,
        cursor: Point,
    },
    ViewportChange {
        board_id: Uuid,
        viewport: Viewport,
    },
}

// =============================================================================
// SERVER → CLIENT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Full snapshot, sent to a joining participant only.
    BoardData {
        participant_id: Uuid,
        elements: Vec<Element>,
        participants: HashMap<Uuid, Presence>,
        viewport: Viewport,
    },
    ParticipantJoined {
        participant_id: Uuid,
        presence: Presence,
    },
    ParticipantLeft {
        participant_id: Uuid,
    },
    ElementCreated {
        element: Element,
    },
    ElementUpdated {
        element_id: i64,
        updates: ElementUpdate,
    },
    ElementDeleted {
        element_id: i64,
    },
    CursorMoved {
        participant_id: Uuid,
        cursor: Point,
    },
    ViewportChanged {
        participant_id: Uuid,
        viewport: Viewport,
    },
}

impl ServerMessage {
    /// Ephemeral events may be dropped under backpressure; structural events
    /// must reach every connected participant or the recipient is evicted.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, ServerMessage::CursorMoved { .. } | ServerMessage::ViewportChanged { .. })
    }
}
