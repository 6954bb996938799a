//! Persistence store — durable board snapshots behind a narrow trait.
//!
//! DESIGN
//! ======
//! Sessions and the REST surface only ever see `BoardStore`. Production uses
//! the Postgres implementation; tests (and `DATABASE_URL`-less startup) use
//! the in-memory one. Every call is a self-contained transaction against
//! storage: there is no shared mutable state between the store and a live
//! session, and saves for different boards never block each other.
//!
//! Snapshots are full replacements of the element list, so whichever of
//! autosave and eviction writes last wins and the record stays consistent.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::element::Element;

// =============================================================================
// TYPES
// =============================================================================

/// Persisted snapshot for one board. Timestamps are RFC 3339 strings, the
/// shape the original record format used.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardRecord {
    pub elements: Vec<Element>,
    pub created: String,
    pub last_updated: String,
}

/// One row of the board-picker listing. Recomputed on each `list` call.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSummary {
    pub id: Uuid,
    pub created: String,
    pub last_updated: String,
    pub element_count: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("timestamp formatting failed: {0}")]
    Timestamp(#[from] time::error::Format),
}

// =============================================================================
// CONTRACT
// =============================================================================

#[async_trait]
pub trait BoardStore: Send + Sync {
    /// Fetch the last-flushed snapshot for a board, or `None` if the board
    /// was never created or saved.
    async fn load(&self, board_id: Uuid) -> Result<Option<BoardRecord>, StoreError>;

    /// Replace the stored snapshot for a board. Creates the record when it
    /// does not exist yet; preserves `created` when it does.
    async fn save(
        &self,
        board_id: Uuid,
        elements: &[Element],
        timestamp: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// List all boards for the board picker.
    async fn list(&self) -> Result<Vec<BoardSummary>, StoreError>;

    /// Initialize an empty record with matching created/updated timestamps.
    async fn create(&self, board_id: Uuid, timestamp: OffsetDateTime) -> Result<(), StoreError>;
}

/// Render a timestamp the way records store it.
///
/// # Errors
///
/// Returns a formatting error for timestamps outside the RFC 3339 range.
pub fn format_timestamp(timestamp: OffsetDateTime) -> Result<String, StoreError> {
    Ok(timestamp.format(&Rfc3339)?)
}
