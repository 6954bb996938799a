//! In-memory store — process-lifetime durability.
//!
//! Used by tests and as the startup fallback when `DATABASE_URL` is unset.
//! Same contract as the Postgres store, including `created` preservation on
//! overwrite.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{BoardRecord, BoardStore, BoardSummary, StoreError, format_timestamp};
use crate::element::Element;

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Uuid, BoardRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BoardStore for MemoryStore {
    async fn load(&self, board_id: Uuid) -> Result<Option<BoardRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(&board_id).cloned())
    }

    async fn save(
        &self,
        board_id: Uuid,
        elements: &[Element],
        timestamp: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let rendered = format_timestamp(timestamp)?;
        let mut records = self.records.write().await;
        match records.get_mut(&board_id) {
            Some(record) => {
                record.elements = elements.to_vec();
                record.last_updated = rendered;
            }
            None => {
                records.insert(
                    board_id,
                    BoardRecord {
                        elements: elements.to_vec(),
                        created: rendered.clone(),
                        last_updated: rendered,
                    },
                );
            }
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<BoardSummary>, StoreError> {
        let records = self.records.read().await;
        let mut boards: Vec<BoardSummary> = records
            .iter()
            .map(|(id, record)| BoardSummary {
                id: *id,
                created: record.created.clone(),
                last_updated: record.last_updated.clone(),
                element_count: record.elements.len(),
            })
            .collect();
        // Newest first, same ordering the Postgres listing uses.
        boards.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(boards)
    }

    async fn create(&self, board_id: Uuid, timestamp: OffsetDateTime) -> Result<(), StoreError> {
        let rendered = format_timestamp(timestamp)?;
        let mut records = self.records.write().await;
        records.entry(board_id).or_insert_with(|| BoardRecord {
            elements: Vec::new(),
            created: rendered.clone(),
            last_updated: rendered,
        });
        Ok(())
    }
}
