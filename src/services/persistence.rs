//! Persistence service — periodic autosave of dirty sessions.
//!
//! DESIGN
//! ======
//! A background task wakes on a fixed interval, snapshots every dirty
//! session under the registry lock, releases it, then saves each board
//! independently. Flush acknowledgement compares revisions, so a board that
//! mutated while its snapshot was being written simply stays dirty for the
//! next cycle.
//!
//! Eviction's final flush goes through the same `BoardStore::save`. Both
//! writes are full snapshot replacements, so their ordering at the store
//! cannot corrupt a record.

use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use uuid::Uuid;

use crate::element::Element;
use crate::state::AppState;

const DEFAULT_AUTOSAVE_INTERVAL_MS: u64 = 30_000;

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Spawn the background autosave task. Returns a handle for shutdown.
pub fn spawn_autosave_task(state: AppState) -> JoinHandle<()> {
    let interval_ms = env_parse("AUTOSAVE_INTERVAL_MS", DEFAULT_AUTOSAVE_INTERVAL_MS);
    info!(interval_ms, "autosave configured");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            flush_all_dirty(&state).await;
        }
    })
}

struct DirtySnapshot {
    board_id: Uuid,
    elements: Vec<Element>,
    revision: u64,
}

async fn flush_all_dirty(state: &AppState) {
    // Snapshot dirty sessions under the lock, then write lock-free so a
    // slow save for one board cannot stall another board's collaboration.
    let snapshots: Vec<DirtySnapshot> = {
        let boards = state.boards.read().await;
        boards
            .iter()
            .filter(|(_, session)| session.is_dirty())
            .map(|(board_id, session)| DirtySnapshot {
                board_id: *board_id,
                elements: session.elements.clone(),
                revision: session.revision(),
            })
            .collect()
    };

    for snapshot in snapshots {
        match state
            .store
            .save(snapshot.board_id, &snapshot.elements, OffsetDateTime::now_utc())
            .await
        {
            Ok(()) => ack_flush(state, snapshot.board_id, snapshot.revision).await,
            Err(e) => {
                error!(
                    error = %e,
                    board_id = %snapshot.board_id,
                    count = snapshot.elements.len(),
                    "autosave flush failed"
                );
            }
        }
    }
}

async fn ack_flush(state: &AppState, board_id: Uuid, flushed_revision: u64) {
    let mut boards = state.boards.write().await;
    // The session may have been evicted between snapshot and ack.
    if let Some(session) = boards.get_mut(&board_id) {
        session.ack_flush(flushed_revision);
        // A session retained after a failed eviction flush has no clients;
        // once this save lands it is finished and leaves the registry.
        if session.clients.is_empty() && !session.is_dirty() {
            boards.remove(&board_id);
            info!(%board_id, "evicted idle board after autosave");
        }
    }
}

#[cfg(test)]
pub(crate) async fn flush_all_dirty_for_tests(state: &AppState) {
    flush_all_dirty(state).await;
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
