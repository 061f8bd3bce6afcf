//! Ledger metadata and the coordination-service seam

use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use dashmap::DashMap;
use ledgerio_common::{BookieId, DigestType, INVALID_ENTRY_ID, LedgerId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Durable description of a ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMetadata {
    pub ledger_id: LedgerId,
    pub ensemble_size: usize,
    pub write_quorum: usize,
    pub ack_quorum: usize,
    pub digest_type: DigestType,
    /// Bookies in ensemble order
    pub ensemble: Vec<BookieId>,
    pub closed: bool,
    /// Last entry of a closed ledger, -1 if empty
    pub last_entry_id: i64,
    /// Total payload length of a closed ledger
    pub length: u64,
}

impl LedgerMetadata {
    /// Metadata for a new, open ledger; the store assigns the id
    #[must_use]
    pub const fn new(
        ensemble: Vec<BookieId>,
        write_quorum: usize,
        ack_quorum: usize,
        digest_type: DigestType,
    ) -> Self {
        Self {
            ledger_id: 0,
            ensemble_size: ensemble.len(),
            write_quorum,
            ack_quorum,
            digest_type,
            ensemble,
            closed: false,
            last_entry_id: INVALID_ENTRY_ID,
            length: 0,
        }
    }
}

/// Ledger directory kept by the coordination service
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Persist a new ledger and assign its id
    async fn create_ledger(&self, metadata: LedgerMetadata) -> ClientResult<LedgerMetadata>;

    async fn read_ledger(&self, ledger_id: LedgerId) -> ClientResult<LedgerMetadata>;

    /// Seal a ledger at `last_entry_id`
    ///
    /// Closing an already closed ledger at the same point succeeds.
    async fn close_ledger(
        &self,
        ledger_id: LedgerId,
        last_entry_id: i64,
        length: u64,
    ) -> ClientResult<()>;

    /// Ordered bookies holding the ledger
    async fn resolve_ensemble(&self, ledger_id: LedgerId) -> ClientResult<Vec<BookieId>> {
        Ok(self.read_ledger(ledger_id).await?.ensemble)
    }
}

/// Metadata store held in process memory
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    next_id: AtomicU64,
    ledgers: DashMap<LedgerId, LedgerMetadata>,
}

impl InMemoryMetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every ledger as JSON
    ///
    /// # Errors
    /// Returns a metadata error if serialization fails.
    pub fn dump_json(&self) -> ClientResult<String> {
        let mut ledgers: Vec<LedgerMetadata> =
            self.ledgers.iter().map(|e| e.value().clone()).collect();
        ledgers.sort_by_key(|m| m.ledger_id);
        serde_json::to_string_pretty(&ledgers).map_err(|e| ClientError::metadata(e.to_string()))
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn create_ledger(&self, mut metadata: LedgerMetadata) -> ClientResult<LedgerMetadata> {
        metadata.ledger_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.ledgers.insert(metadata.ledger_id, metadata.clone());
        info!(
            "Created ledger {} on ensemble {:?}",
            metadata.ledger_id, metadata.ensemble
        );
        Ok(metadata)
    }

    async fn read_ledger(&self, ledger_id: LedgerId) -> ClientResult<LedgerMetadata> {
        self.ledgers
            .get(&ledger_id)
            .map(|m| m.value().clone())
            .ok_or(ClientError::NoSuchLedger(ledger_id))
    }

    async fn close_ledger(
        &self,
        ledger_id: LedgerId,
        last_entry_id: i64,
        length: u64,
    ) -> ClientResult<()> {
        let mut metadata = self
            .ledgers
            .get_mut(&ledger_id)
            .ok_or(ClientError::NoSuchLedger(ledger_id))?;
        if metadata.closed {
            if metadata.last_entry_id == last_entry_id {
                return Ok(());
            }
            return Err(ClientError::metadata(format!(
                "ledger {ledger_id} already closed at {}",
                metadata.last_entry_id
            )));
        }
        metadata.closed = true;
        metadata.last_entry_id = last_entry_id;
        metadata.length = length;
        info!("Closed ledger {} at entry {}", ledger_id, last_entry_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ensemble(n: usize) -> Vec<BookieId> {
        (0..n).map(|i| BookieId::new(format!("bookie-{i}"))).collect()
    }

    #[tokio::test]
    async fn test_create_assigns_ids() {
        let store = InMemoryMetadataStore::new();
        let a = store
            .create_ledger(LedgerMetadata::new(ensemble(3), 2, 2, DigestType::Crc32c))
            .await
            .unwrap();
        let b = store
            .create_ledger(LedgerMetadata::new(ensemble(3), 2, 2, DigestType::Crc32c))
            .await
            .unwrap();

        assert_ne!(a.ledger_id, b.ledger_id);
        assert_eq!(store.resolve_ensemble(b.ledger_id).await.unwrap(), ensemble(3));
        assert!(matches!(
            store.read_ledger(99).await,
            Err(ClientError::NoSuchLedger(99))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_at_same_point() {
        let store = InMemoryMetadataStore::new();
        let m = store
            .create_ledger(LedgerMetadata::new(ensemble(1), 1, 1, DigestType::Dummy))
            .await
            .unwrap();

        store.close_ledger(m.ledger_id, 4, 100).await.unwrap();
        store.close_ledger(m.ledger_id, 4, 100).await.unwrap();
        assert!(store.close_ledger(m.ledger_id, 5, 120).await.is_err());

        let closed = store.read_ledger(m.ledger_id).await.unwrap();
        assert!(closed.closed);
        assert_eq!(closed.last_entry_id, 4);
        assert!(store.dump_json().unwrap().contains("\"last_entry_id\": 4"));
    }
}
