//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the persistence store and the registry of live board sessions. Each
//! session owns its element list, connected participants, and shared
//! viewport; nothing outside the session mutates them.
//!
//! All access to one board serializes through the registry lock, so every
//! mutation has a definite arrival order and last-writer-wins is well
//! defined. Store I/O never happens while the lock is held.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Notify, RwLock, mpsc};
use uuid::Uuid;

use crate::element::Element;
use crate::protocol::{Presence, ServerMessage, Viewport};
use crate::store::BoardStore;

// =============================================================================
// CLIENT HANDLE
// =============================================================================

/// The session's grip on one connected socket: the sender for outgoing
/// events plus a shutdown signal. The socket task holds its own sender for
/// the channel, so dropping `tx` alone cannot close it; eviction fires
/// `shutdown` and the socket task tears itself down.
#[derive(Clone)]
pub struct ClientHandle {
    pub tx: mpsc::Sender<ServerMessage>,
    pub shutdown: Arc<Notify>,
}

// =============================================================================
// SESSION
// =============================================================================

/// Per-board authoritative state. Created on first join, evicted (after a
/// final flush) when the last participant leaves.
pub struct Session {
    /// Elements in insertion order. Creation order, not z-order.
    pub elements: Vec<Element>,
    /// Connected participants: connection id -> handle for outgoing events.
    pub clients: HashMap<Uuid, ClientHandle>,
    /// Presence per connection. Removed on disconnect, never persisted.
    pub participants: HashMap<Uuid, Presence>,
    /// Shared pan/zoom, last writer wins.
    pub viewport: Viewport,
    /// Monotonic display-name counter. Never reset, so names are unique
    /// within the connected set even after participants leave.
    name_seq: u32,
    /// Bumped on every structural mutation.
    revision: u64,
    /// Revision last confirmed written to the store.
    saved_revision: u64,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::from_elements(Vec::new())
    }

    #[must_use]
    pub fn from_elements(elements: Vec<Element>) -> Self {
        Self {
            elements,
            clients: HashMap::new(),
            participants: HashMap::new(),
            viewport: Viewport::default(),
            name_seq: 0,
            revision: 0,
            saved_revision: 0,
        }
    }

    /// Assign the next sequential display name.
    pub fn next_display_name(&mut self) -> String {
        self.name_seq += 1;
        format!("User{}", self.name_seq)
    }

    /// Record a structural mutation that the store has not seen yet.
    pub fn mark_dirty(&mut self) {
        self.revision += 1;
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.saved_revision < self.revision
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Acknowledge a completed flush. Keeps the dirty state when the session
    /// mutated again after the flushed snapshot was taken.
    pub fn ack_flush(&mut self, flushed_revision: u64) {
        if self.saved_revision < flushed_revision {
            self.saved_revision = flushed_revision;
        }
    }

    #[must_use]
    pub fn find_element(&self, element_id: i64) -> Option<&Element> {
        self.elements.iter().find(|e| e.id() == element_id)
    }

    pub fn find_element_mut(&mut self, element_id: i64) -> Option<&mut Element> {
        self.elements.iter_mut().find(|e| e.id() == element_id)
    }

    #[must_use]
    pub fn contains_element(&self, element_id: i64) -> bool {
        self.find_element(element_id).is_some()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state. Clone is required by Axum; all inner fields are
/// Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BoardStore>,
    pub boards: Arc<RwLock<HashMap<Uuid, Session>>>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn BoardStore>) -> Self {
        Self { store, boards: Arc::new(RwLock::new(HashMap::new())) }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
