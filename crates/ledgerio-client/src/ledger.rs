//! Ledger handles
//!
//! One handle type serves both write modes. `Sequential` handles assign
//! entry ids from an internal counter; `Explicit` handles take them from the
//! caller and only guard against reuse. Fan-out, digests and confirmation
//! tracking are shared.

use crate::bookie_client::BookieClient;
use crate::error::{ClientError, ClientResult};
use crate::metadata::{LedgerMetadata, MetadataStore};
use crate::quorum::{ReplicaWrite, read_from_replicas, replicate, write_set};
use bytes::Bytes;
use futures::future::try_join_all;
use ledgerio_common::config::ClientConfig;
use ledgerio_common::{DigestManager, EntryId, INVALID_ENTRY_ID, LedgerId, MasterKey};
use ledgerio_proto::Flags;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{info, warn};

/// Entry id assignment strategy of a ledger handle
pub trait WriteMode: Send + Sync + 'static {}

/// Entry ids are assigned by the handle, starting at 0
#[derive(Debug, Clone, Copy)]
pub struct Sequential;

/// Entry ids are supplied by the caller
#[derive(Debug, Clone, Copy)]
pub struct Explicit;

impl WriteMode for Sequential {}
impl WriteMode for Explicit {}

/// A verified entry returned by a read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub ledger_id: LedgerId,
    pub entry_id: EntryId,
    pub payload: Bytes,
}

#[derive(Debug)]
struct HandleState {
    next_entry_id: EntryId,
    /// Running ledger length including entries still in flight
    length: u64,
    last_add_confirmed: i64,
    confirmed_length: u64,
    /// Acked entries above `last_add_confirmed`, with their ledger length
    acked: BTreeMap<EntryId, u64>,
    /// Explicit ids written or in flight
    used: HashSet<EntryId>,
    fenced: bool,
    closed: bool,
}

impl HandleState {
    fn advance(&mut self, entry_id: EntryId, length: u64) {
        self.acked.insert(entry_id, length);
        while let Some(length) = EntryId::try_from(self.last_add_confirmed + 1)
            .ok()
            .and_then(|next| self.acked.remove(&next))
        {
            self.last_add_confirmed += 1;
            self.confirmed_length = length;
        }
    }
}

pub(crate) struct LedgerInner {
    metadata: LedgerMetadata,
    digest: DigestManager,
    master_key: MasterKey,
    /// Clients in ensemble order
    bookies: Vec<Arc<dyn BookieClient>>,
    store: Arc<dyn MetadataStore>,
    config: ClientConfig,
    state: Mutex<HandleState>,
}

/// Handle to one ledger
pub struct LedgerHandle<M: WriteMode> {
    inner: Arc<LedgerInner>,
    _mode: PhantomData<M>,
}

impl<M: WriteMode> Clone for LedgerHandle<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _mode: PhantomData,
        }
    }
}

impl<M: WriteMode> std::fmt::Debug for LedgerHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerHandle")
            .field("ledger_id", &self.inner.metadata.ledger_id)
            .field("last_add_confirmed", &self.last_add_confirmed())
            .finish_non_exhaustive()
    }
}

fn slice(data: &[u8], offset: usize, length: usize) -> ClientResult<&[u8]> {
    offset
        .checked_add(length)
        .and_then(|end| data.get(offset..end))
        .ok_or(ClientError::InvalidOffset {
            offset,
            length,
            len: data.len(),
        })
}

impl<M: WriteMode> LedgerHandle<M> {
    pub(crate) fn new(
        metadata: LedgerMetadata,
        digest: DigestManager,
        master_key: MasterKey,
        bookies: Vec<Arc<dyn BookieClient>>,
        store: Arc<dyn MetadataStore>,
        config: ClientConfig,
    ) -> Self {
        let closed = metadata.closed;
        let last_add_confirmed = if closed {
            metadata.last_entry_id
        } else {
            INVALID_ENTRY_ID
        };
        let confirmed_length = if closed { metadata.length } else { 0 };
        let state = HandleState {
            next_entry_id: 0,
            length: confirmed_length,
            last_add_confirmed,
            confirmed_length,
            acked: BTreeMap::new(),
            used: HashSet::new(),
            fenced: false,
            closed,
        };
        Self {
            inner: Arc::new(LedgerInner {
                metadata,
                digest,
                master_key,
                bookies,
                store,
                config,
                state: Mutex::new(state),
            }),
            _mode: PhantomData,
        }
    }

    #[must_use]
    pub fn ledger_id(&self) -> LedgerId {
        self.inner.metadata.ledger_id
    }

    #[must_use]
    pub fn metadata(&self) -> &LedgerMetadata {
        &self.inner.metadata
    }

    /// Number of bookies in the ensemble
    #[must_use]
    pub fn num_bookies(&self) -> usize {
        self.inner.bookies.len()
    }

    /// Highest entry id such that it and every entry below it are confirmed
    #[must_use]
    pub fn last_add_confirmed(&self) -> i64 {
        self.inner.state.lock().last_add_confirmed
    }

    /// Total payload length of the confirmed prefix
    #[must_use]
    pub fn length(&self) -> u64 {
        self.inner.state.lock().confirmed_length
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    #[must_use]
    pub fn is_fenced(&self) -> bool {
        self.inner.state.lock().fenced
    }

    fn replicas(&self, entry_id: EntryId) -> Vec<Arc<dyn BookieClient>> {
        let metadata = &self.inner.metadata;
        write_set(entry_id, metadata.ensemble_size, metadata.write_quorum)
            .into_iter()
            .map(|i| Arc::clone(&self.inner.bookies[i]))
            .collect()
    }

    fn check_writable(&self, state: &HandleState) -> ClientResult<()> {
        let ledger_id = self.ledger_id();
        if state.closed {
            return Err(ClientError::LedgerClosed { ledger_id });
        }
        if state.fenced {
            return Err(ClientError::LedgerFenced { ledger_id });
        }
        Ok(())
    }

    /// Package an admitted entry and wait for its ack quorum
    async fn write(
        &self,
        entry_id: EntryId,
        last_add_confirmed: i64,
        length: u64,
        payload: &[u8],
    ) -> ClientResult<EntryId> {
        let data = self
            .inner
            .digest
            .package(entry_id, last_add_confirmed, length, payload);
        let write = ReplicaWrite {
            ledger_id: self.ledger_id(),
            entry_id,
            master_key: self.inner.master_key.clone(),
            data,
            flags: Flags::NONE,
        };

        let result = replicate(
            &self.replicas(entry_id),
            write,
            self.inner.metadata.ack_quorum,
            self.inner.config.add_entry_timeout(),
        )
        .await;

        let mut state = self.inner.state.lock();
        match result {
            Ok(()) => {
                state.advance(entry_id, length);
                Ok(entry_id)
            }
            Err(e) => {
                if matches!(e, ClientError::LedgerFenced { .. }) && !state.fenced {
                    warn!("Ledger {} was fenced by another writer", self.ledger_id());
                    state.fenced = true;
                }
                // a released explicit id gives its bytes back
                if state.used.remove(&entry_id) {
                    state.length = state.length.saturating_sub(payload.len() as u64);
                }
                Err(e)
            }
        }
    }

    /// Read the entries `first..=last`, in ascending order
    ///
    /// # Errors
    /// `InvalidRange` for a negative or inverted range (nothing is sent),
    /// `ReadBeyondLastAddConfirmed` past the confirmed prefix, or the first
    /// entry that no replica could serve.
    pub async fn read_async(&self, first: i64, last: i64) -> ClientResult<Vec<LedgerEntry>> {
        let (Ok(first_id), Ok(last_id)) = (EntryId::try_from(first), EntryId::try_from(last)) else {
            return Err(ClientError::InvalidRange { first, last });
        };
        if first_id > last_id {
            return Err(ClientError::InvalidRange { first, last });
        }
        let last_add_confirmed = self.last_add_confirmed();
        if last > last_add_confirmed {
            return Err(ClientError::ReadBeyondLastAddConfirmed {
                entry_id: last_id,
                last_add_confirmed,
            });
        }

        let ids = first_id..=last_id;
        let timeout = self.inner.config.read_entry_timeout();
        let reads = ids.map(|entry_id| async move {
            let replicas = self.replicas(entry_id);
            let entry =
                read_from_replicas(&replicas, &self.inner.digest, entry_id, timeout).await?;
            Ok::<_, ClientError>(LedgerEntry {
                ledger_id: self.ledger_id(),
                entry_id,
                payload: entry.payload,
            })
        });
        try_join_all(reads).await
    }

    /// Read the last confirmed entry, `None` for an empty ledger
    ///
    /// # Errors
    /// Fails if no replica can serve the entry.
    pub async fn read_last_entry(&self) -> ClientResult<Option<LedgerEntry>> {
        let last = self.last_add_confirmed();
        if last < 0 {
            return Ok(None);
        }
        let mut entries = self.read_async(last, last).await?;
        Ok(entries.pop())
    }

    /// Seal the ledger at its last confirmed entry
    ///
    /// Adds still in flight are not waited for and will not be part of the
    /// closed ledger. Closing twice is a no-op.
    ///
    /// # Errors
    /// Fails if the metadata store rejects the close.
    pub async fn close(&self) -> ClientResult<()> {
        let (last, length) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            (state.last_add_confirmed, state.confirmed_length)
        };
        self.inner
            .store
            .close_ledger(self.ledger_id(), last, length)
            .await?;
        info!("Ledger {} closed at entry {}", self.ledger_id(), last);
        Ok(())
    }
}

impl LedgerHandle<Sequential> {
    /// Append an entry and return its id once an ack quorum stored it
    ///
    /// # Errors
    /// `LedgerClosed` or `LedgerFenced` without sending anything, otherwise
    /// the quorum failure.
    pub async fn add_entry(&self, data: &[u8]) -> ClientResult<EntryId> {
        let (entry_id, last_add_confirmed, length) = {
            let mut state = self.inner.state.lock();
            self.check_writable(&state)?;
            let entry_id = state.next_entry_id;
            state.next_entry_id += 1;
            state.length += data.len() as u64;
            (entry_id, state.last_add_confirmed, state.length)
        };
        self.write(entry_id, last_add_confirmed, length, data).await
    }

    /// Append `data[offset..offset + length]`
    ///
    /// # Errors
    /// `InvalidOffset` if the range does not fit `data`; see [`Self::add_entry`].
    pub async fn add_entry_range(
        &self,
        data: &[u8],
        offset: usize,
        length: usize,
    ) -> ClientResult<EntryId> {
        self.add_entry(slice(data, offset, length)?).await
    }
}

impl LedgerHandle<Explicit> {
    /// Write an entry under a caller-chosen id
    ///
    /// An id may only be written once per handle. The id counter of the
    /// handle is not involved, so callers own ordering across retries.
    ///
    /// # Errors
    /// `InvalidEntryId` for negative ids, `DuplicateEntryId` for an id
    /// already written or in flight, otherwise as [`LedgerHandle::add_entry`].
    pub async fn add_entry(&self, entry_id: i64, data: &[u8]) -> ClientResult<EntryId> {
        let Ok(id) = EntryId::try_from(entry_id) else {
            return Err(ClientError::InvalidEntryId(entry_id));
        };
        let (last_add_confirmed, length) = {
            let mut state = self.inner.state.lock();
            self.check_writable(&state)?;
            if entry_id <= state.last_add_confirmed || !state.used.insert(id) {
                return Err(ClientError::DuplicateEntryId(id));
            }
            state.length += data.len() as u64;
            (state.last_add_confirmed, state.length)
        };
        self.write(id, last_add_confirmed, length, data).await
    }

    /// Write `data[offset..offset + length]` under a caller-chosen id
    ///
    /// # Errors
    /// `InvalidOffset` if the range does not fit `data`; see [`Self::add_entry`].
    pub async fn add_entry_range(
        &self,
        entry_id: i64,
        data: &[u8],
        offset: usize,
        length: usize,
    ) -> ClientResult<EntryId> {
        self.add_entry(entry_id, slice(data, offset, length)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_bounds() {
        assert_eq!(slice(b"data", 0, 4).unwrap(), b"data");
        assert_eq!(slice(b"data", 4, 0).unwrap(), b"");
        assert_eq!(slice(b"data", 1, 2).unwrap(), b"at");
        assert!(matches!(
            slice(b"data", 0, 6),
            Err(ClientError::InvalidOffset {
                offset: 0,
                length: 6,
                len: 4
            })
        ));
        assert!(slice(b"", 1, 0).is_err());
        assert!(slice(b"data", usize::MAX, 2).is_err());
    }

    #[test]
    fn test_confirmed_prefix_is_contiguous() {
        let mut state = HandleState {
            next_entry_id: 0,
            length: 0,
            last_add_confirmed: INVALID_ENTRY_ID,
            confirmed_length: 0,
            acked: BTreeMap::new(),
            used: HashSet::new(),
            fenced: false,
            closed: false,
        };

        state.advance(1, 8);
        assert_eq!(state.last_add_confirmed, -1);
        state.advance(0, 4);
        assert_eq!(state.last_add_confirmed, 1);
        assert_eq!(state.confirmed_length, 8);
        state.advance(3, 20);
        assert_eq!(state.last_add_confirmed, 1);
        state.advance(2, 12);
        assert_eq!(state.last_add_confirmed, 3);
        assert_eq!(state.confirmed_length, 20);
        assert!(state.acked.is_empty());
    }
}
