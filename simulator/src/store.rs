use raffle_types::{RaffleId, RaffleRecord, RecordInvariant, RecordPatch};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

use crate::persistence::RecordPersistence;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("raffle {0} not found")]
    NotFound(RaffleId),
    #[error("invalid patch: {0}")]
    InvalidPatch(#[from] RecordInvariant),
}

/// In-memory record store with change notification.
///
/// Last writer wins; there is no version token. Changes are broadcast while the write lock is
/// held so every subscriber sees them in commit order.
pub struct RecordStore {
    records: RwLock<HashMap<RaffleId, RaffleRecord>>,
    changes: broadcast::Sender<RaffleRecord>,
    // Keep initial receiver alive to prevent channel closure when no subscribers exist.
    #[allow(dead_code)]
    _changes_rx: broadcast::Receiver<RaffleRecord>,
    persistence: Option<RecordPersistence>,
}

impl RecordStore {
    pub fn new(
        records: impl IntoIterator<Item = RaffleRecord>,
        capacity: usize,
        persistence: Option<RecordPersistence>,
    ) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.id(), record))
            .collect();
        let (changes, changes_rx) = broadcast::channel(capacity.max(1));
        Self {
            records: RwLock::new(records),
            changes,
            _changes_rx: changes_rx,
            persistence,
        }
    }

    pub async fn fetch_one(&self, id: RaffleId) -> Option<RaffleRecord> {
        self.records.read().await.get(&id).cloned()
    }

    /// Apply `patch` to the record with `id` and notify subscribers.
    pub async fn update_where(
        &self,
        id: RaffleId,
        patch: &RecordPatch,
    ) -> Result<RaffleRecord, StoreError> {
        let mut records = self.records.write().await;
        let current = records.get(&id).ok_or(StoreError::NotFound(id))?;
        let next = current.apply(patch)?;
        records.insert(id, next.clone());
        tracing::info!(
            raffle = %id,
            state = %next.state(),
            winner = next.winner().map(|winner| winner.as_str()).unwrap_or("-"),
            "record updated"
        );
        self.commit(next.clone());
        Ok(next)
    }

    /// Insert `record` unless one with the same id already exists.
    pub async fn insert_if_absent(&self, record: RaffleRecord) -> RaffleRecord {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&record.id()) {
            return existing.clone();
        }
        records.insert(record.id(), record.clone());
        tracing::info!(raffle = %record.id(), "record created");
        self.commit(record.clone());
        record
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RaffleRecord> {
        self.changes.subscribe()
    }

    fn commit(&self, record: RaffleRecord) {
        if let Some(persistence) = &self.persistence {
            persistence.persist_record(record.clone());
        }
        // Only the kept-alive receiver may exist; sending never fails while it is held.
        let _ = self.changes.send(record);
    }
}
