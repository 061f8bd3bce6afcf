//! Client ledger coordinator
//!
//! Creates ledgers on an ensemble chosen by the placement policy, hands out
//! write handles, and recovers ledgers left open by a failed writer.

use crate::bookie_client::BookieClient;
use crate::error::{ClientError, ClientResult};
use crate::ledger::{Explicit, LedgerHandle, Sequential, WriteMode};
use crate::metadata::{LedgerMetadata, MetadataStore};
use crate::placement::{PlacementPolicy, RoundRobinPlacement};
use crate::quorum::{
    ReplicaWrite, coverage_quorum, read_for_recovery, read_from_replicas, replicate,
    uncovered_write_set, write_set,
};
use futures::future::join_all;
use ledgerio_common::config::ClientConfig;
use ledgerio_common::{
    BookieId, DigestManager, DigestType, EntryHeader, EntryId, INVALID_ENTRY_ID, LedgerId,
    MasterKey,
};
use ledgerio_proto::Flags;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Check `1 <= ack_quorum <= write_quorum <= ensemble_size`
///
/// # Errors
/// `InvalidQuorum` if the sizes are inconsistent.
pub fn validate_quorum(
    ensemble_size: usize,
    write_quorum: usize,
    ack_quorum: usize,
) -> ClientResult<()> {
    if ack_quorum == 0 || ack_quorum > write_quorum || write_quorum > ensemble_size {
        return Err(ClientError::InvalidQuorum {
            ensemble_size,
            write_quorum,
            ack_quorum,
        });
    }
    Ok(())
}

/// Entry point for ledger writers and readers
pub struct Client {
    config: ClientConfig,
    metadata: Arc<dyn MetadataStore>,
    placement: Arc<dyn PlacementPolicy>,
    bookies: RwLock<HashMap<BookieId, Arc<dyn BookieClient>>>,
}

impl Client {
    /// Create a client with round-robin placement
    pub fn new(config: ClientConfig, metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            config,
            metadata,
            placement: Arc::new(RoundRobinPlacement::new()),
            bookies: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_placement(mut self, placement: Arc<dyn PlacementPolicy>) -> Self {
        self.placement = placement;
        self
    }

    /// Make a bookie available for new ensembles and for resolution
    pub fn register_bookie(&self, bookie: Arc<dyn BookieClient>) {
        debug!("Registered bookie {}", bookie.id());
        self.bookies.write().insert(bookie.id().clone(), bookie);
    }

    /// Ids of every registered bookie
    pub fn bookies(&self) -> Vec<BookieId> {
        self.bookies.read().keys().cloned().collect()
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn metadata_store(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// Create a ledger whose entry ids are assigned sequentially
    ///
    /// # Errors
    /// `InvalidQuorum` before any other work; `NotEnoughBookies` if the
    /// placement policy cannot fill the ensemble; metadata failures.
    pub async fn create_ledger(
        &self,
        ensemble_size: usize,
        write_quorum: usize,
        ack_quorum: usize,
        digest_type: DigestType,
        password: &[u8],
    ) -> ClientResult<LedgerHandle<Sequential>> {
        self.create(ensemble_size, write_quorum, ack_quorum, digest_type, password)
            .await
    }

    /// Create a ledger whose entry ids are supplied by the caller
    ///
    /// # Errors
    /// As [`Self::create_ledger`].
    pub async fn create_ledger_adv(
        &self,
        ensemble_size: usize,
        write_quorum: usize,
        ack_quorum: usize,
        digest_type: DigestType,
        password: &[u8],
    ) -> ClientResult<LedgerHandle<Explicit>> {
        self.create(ensemble_size, write_quorum, ack_quorum, digest_type, password)
            .await
    }

    async fn create<M: WriteMode>(
        &self,
        ensemble_size: usize,
        write_quorum: usize,
        ack_quorum: usize,
        digest_type: DigestType,
        password: &[u8],
    ) -> ClientResult<LedgerHandle<M>> {
        validate_quorum(ensemble_size, write_quorum, ack_quorum)?;

        let ensemble = self
            .placement
            .select_ensemble(&self.bookies(), ensemble_size)?;
        let metadata = self
            .metadata
            .create_ledger(LedgerMetadata::new(
                ensemble,
                write_quorum,
                ack_quorum,
                digest_type,
            ))
            .await?;
        self.handle(metadata, password)
    }

    fn handle<M: WriteMode>(
        &self,
        metadata: LedgerMetadata,
        password: &[u8],
    ) -> ClientResult<LedgerHandle<M>> {
        let digest = DigestManager::new(metadata.ledger_id, password, metadata.digest_type)?;
        let bookies = self.resolve(&metadata.ensemble)?;
        Ok(LedgerHandle::new(
            metadata,
            digest,
            MasterKey::from_password(password),
            bookies,
            Arc::clone(&self.metadata),
            self.config.clone(),
        ))
    }

    fn resolve(&self, ensemble: &[BookieId]) -> ClientResult<Vec<Arc<dyn BookieClient>>> {
        let bookies = self.bookies.read();
        ensemble
            .iter()
            .map(|id| {
                bookies
                    .get(id)
                    .cloned()
                    .ok_or_else(|| ClientError::UnknownBookie(id.clone()))
            })
            .collect()
    }

    /// Open a ledger for reading, recovering it first if it is still open
    ///
    /// Recovery fences the ledger on its ensemble so the previous writer can
    /// no longer add entries, re-replicates every entry past the last
    /// confirmed one that a replica still holds, then closes the ledger.
    ///
    /// # Errors
    /// `NoSuchLedger` for unknown ids; `FenceQuorumNotReached` if some write
    /// set could not be fenced on enough bookies; replica or metadata failures.
    pub async fn open_ledger(
        &self,
        ledger_id: LedgerId,
        password: &[u8],
    ) -> ClientResult<LedgerHandle<Sequential>> {
        let metadata = self.metadata.read_ledger(ledger_id).await?;
        if metadata.closed {
            return self.handle(metadata, password);
        }

        info!("Recovering ledger {}", ledger_id);
        let digest = DigestManager::new(ledger_id, password, metadata.digest_type)?;
        let master_key = MasterKey::from_password(password);
        let bookies = self.resolve(&metadata.ensemble)?;

        let (last_add_confirmed, highest) = self
            .fence_ensemble(&metadata, &bookies, &digest, &master_key)
            .await?;
        let (last, length) = self
            .recover_entries(
                &metadata,
                &bookies,
                &digest,
                &master_key,
                last_add_confirmed,
                highest,
            )
            .await?;

        self.metadata.close_ledger(ledger_id, last, length).await?;
        info!(
            "Recovered ledger {}: last entry {}, length {}",
            ledger_id, last, length
        );
        let metadata = self.metadata.read_ledger(ledger_id).await?;
        self.handle(metadata, password)
    }

    /// Fence every ensemble member and collect the last entries they hold
    ///
    /// Returns the highest last-add-confirmed recorded in those entries and
    /// the highest entry id seen.
    async fn fence_ensemble(
        &self,
        metadata: &LedgerMetadata,
        bookies: &[Arc<dyn BookieClient>],
        digest: &DigestManager,
        master_key: &MasterKey,
    ) -> ClientResult<(i64, i64)> {
        let ledger_id = metadata.ledger_id;
        let timeout = self.config.read_entry_timeout();
        let fences = bookies.iter().map(|bookie| async move {
            let result = tokio::time::timeout(
                timeout,
                bookie.fence_and_read_last(ledger_id, master_key.clone()),
            )
            .await
            .unwrap_or_else(|_| {
                Err(ClientError::Timeout(format!(
                    "fence ledger {} on {}",
                    ledger_id,
                    bookie.id()
                )))
            });
            (bookie.id().clone(), result)
        });

        let mut responded = vec![false; bookies.len()];
        let mut last_add_confirmed = INVALID_ENTRY_ID;
        let mut highest = INVALID_ENTRY_ID;
        let mut failure = None;
        for (position, (bookie, result)) in join_all(fences).await.into_iter().enumerate() {
            let data = match result {
                Ok(data) => data,
                Err(e) => {
                    warn!("Could not fence ledger {} on {}: {}", ledger_id, bookie, e);
                    if failure.is_none() {
                        failure = Some(e);
                    }
                    continue;
                }
            };
            responded[position] = true;
            let Some(data) = data else {
                continue;
            };
            let Some(header) = EntryHeader::parse(&data) else {
                warn!(
                    "Bookie {} returned a truncated entry for ledger {}",
                    bookie, ledger_id
                );
                continue;
            };
            match digest.verify_and_unpack(header.entry_id, &data) {
                Ok(entry) => {
                    last_add_confirmed = last_add_confirmed.max(entry.last_add_confirmed);
                    highest = highest.max(i64::try_from(entry.entry_id).unwrap_or(i64::MAX));
                }
                Err(e) => warn!("Bookie {} returned a corrupt last entry: {}", bookie, e),
            }
        }

        // every write set needs enough fenced members to overlap each of its ack quorums
        if let Some((start, fenced)) =
            uncovered_write_set(&responded, metadata.write_quorum, metadata.ack_quorum)
        {
            return Err(match failure {
                Some(e @ ClientError::Bookie { .. }) => e,
                _ => ClientError::FenceQuorumNotReached {
                    ledger_id,
                    write_set: start,
                    fenced,
                    required: coverage_quorum(metadata.write_quorum, metadata.ack_quorum),
                },
            });
        }
        let fenced = responded.iter().filter(|&&r| r).count();
        debug!(
            "Fenced ledger {} on {} bookies: lac {}, highest {}",
            ledger_id, fenced, last_add_confirmed, highest
        );
        Ok((last_add_confirmed, highest))
    }

    /// Re-replicate the entries after `last_add_confirmed`
    ///
    /// Stops at the first entry that enough replicas confirm missing. Returns
    /// the last recovered entry id and the ledger length at that entry.
    async fn recover_entries(
        &self,
        metadata: &LedgerMetadata,
        bookies: &[Arc<dyn BookieClient>],
        digest: &DigestManager,
        master_key: &MasterKey,
        last_add_confirmed: i64,
        highest: i64,
    ) -> ClientResult<(i64, u64)> {
        let replicas = |entry_id: EntryId| -> Vec<Arc<dyn BookieClient>> {
            write_set(entry_id, metadata.ensemble_size, metadata.write_quorum)
                .into_iter()
                .map(|i| Arc::clone(&bookies[i]))
                .collect()
        };
        let timeout = self.config.read_entry_timeout();
        let coverage = coverage_quorum(metadata.write_quorum, metadata.ack_quorum);

        let mut last = INVALID_ENTRY_ID;
        let mut length = 0;
        if let Ok(confirmed) = EntryId::try_from(last_add_confirmed) {
            let entry =
                read_from_replicas(&replicas(confirmed), digest, confirmed, timeout).await?;
            last = last_add_confirmed;
            length = entry.length;
        }

        let first = EntryId::try_from(last_add_confirmed + 1).unwrap_or(0);
        let end = EntryId::try_from(highest).ok();
        let mut entry_id = first;
        while end.is_some_and(|end| entry_id <= end) {
            let entry_replicas = replicas(entry_id);
            let read = read_for_recovery(&entry_replicas, digest, entry_id, coverage, timeout);
            let Some(entry) = read.await? else {
                info!(
                    "Ledger {} recovery stops at missing entry {}",
                    metadata.ledger_id, entry_id
                );
                break;
            };

            let write = ReplicaWrite {
                ledger_id: metadata.ledger_id,
                entry_id,
                master_key: master_key.clone(),
                data: digest.package(
                    entry_id,
                    entry.last_add_confirmed,
                    entry.length,
                    &entry.payload,
                ),
                flags: Flags::RECOVERY_ADD,
            };
            replicate(
                &replicas(entry_id),
                write,
                metadata.ack_quorum,
                self.config.add_entry_timeout(),
            )
            .await?;
            debug!("Recovered entry {}:{}", metadata.ledger_id, entry_id);

            last = i64::try_from(entry_id).unwrap_or(i64::MAX);
            length = entry.length;
            entry_id += 1;
        }
        Ok((last, length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_quorum() {
        validate_quorum(3, 2, 2).unwrap();
        validate_quorum(1, 1, 1).unwrap();
        validate_quorum(4, 3, 1).unwrap();
        assert!(validate_quorum(3, 4, 2).is_err());
        assert!(validate_quorum(3, 2, 3).is_err());
        assert!(validate_quorum(3, 2, 0).is_err());
        assert!(validate_quorum(0, 0, 0).is_err());
    }
}
