//! Bookie storage engine
//!
//! Admits entries for many independent ledgers, pins each ledger's master
//! key on first use, tracks fencing and sequences journal durability.
//! Admission failures are returned synchronously with no durable or cache
//! effect; journal failures are delivered through the pending result.
//!
//! Writes complete on Tokio's blocking pool, so the asynchronous operations
//! must be called from within a Tokio runtime.

use crate::cache::ReadCache;
use crate::journal::{FileJournal, Journal, JournalRecord};
use crate::ledger::{LedgerDescriptor, LedgerState};
use bytes::Bytes;
use dashmap::DashMap;
use ledgerio_common::config::{BookieConfig, ReadCacheConfig};
use ledgerio_common::{BookieError, BookieResult, EntryHeader, EntryId, LedgerId, MasterKey};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Result of an operation that completes once the journal has caught up
///
/// Resolves to `Interrupted` if the completing side goes away.
#[derive(Debug)]
pub struct Pending<T> {
    rx: oneshot::Receiver<BookieResult<T>>,
}

impl<T> Pending<T> {
    fn channel() -> (oneshot::Sender<BookieResult<T>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// An already-completed result
    #[must_use]
    pub fn ready(result: BookieResult<T>) -> Self {
        let (tx, pending) = Self::channel();
        let _ = tx.send(result);
        pending
    }
}

impl<T> Future for Pending<T> {
    type Output = BookieResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or_else(|_| Err(BookieError::interrupted("completion dropped")))
        })
    }
}

/// Acknowledgement for a stored entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddConfirmation {
    pub ledger_id: LedgerId,
    pub entry_id: EntryId,
}

/// A single storage node
pub struct Bookie {
    config: BookieConfig,
    journal: Arc<dyn Journal>,
    cache: ReadCache,
    ledgers: DashMap<LedgerId, Arc<LedgerDescriptor>>,
    read_only: Arc<AtomicBool>,
    high_priority_writes: AtomicBool,
}

impl Bookie {
    /// Open a bookie over `journal`, rebuilding ledger state from its records
    ///
    /// # Errors
    /// Returns an error if the journal cannot be replayed.
    pub fn open(
        config: BookieConfig,
        cache: ReadCache,
        journal: Arc<dyn Journal>,
    ) -> BookieResult<Self> {
        let ledgers: DashMap<LedgerId, Arc<LedgerDescriptor>> = DashMap::new();
        let records = journal.replay()?;
        let replayed = records.len();

        for record in records {
            match record {
                JournalRecord::MasterKey {
                    ledger_id,
                    master_key,
                } => {
                    let descriptor = Arc::clone(
                        &ledgers
                            .entry(ledger_id)
                            .or_insert_with(|| {
                                Arc::new(LedgerDescriptor::new(ledger_id, master_key))
                            }),
                    );
                    descriptor.lock().master_key_persisted = true;
                }
                JournalRecord::Entry {
                    ledger_id,
                    entry_id,
                    ..
                } => {
                    if let Some(descriptor) = ledgers.get(&ledger_id) {
                        let mut state = descriptor.lock();
                        state.last_entry_id = state.last_entry_id.max(Some(entry_id));
                    } else {
                        warn!(
                            "Journal entry {}:{} has no master key record, skipping",
                            ledger_id, entry_id
                        );
                    }
                }
                JournalRecord::Fence { ledger_id } => {
                    if let Some(descriptor) = ledgers.get(&ledger_id) {
                        descriptor.lock().fenced = true;
                    }
                }
            }
        }

        info!(
            "Bookie opened: {} journal records, {} ledgers",
            replayed,
            ledgers.len()
        );

        let high_priority = config.high_priority_writes_when_read_only;
        Ok(Self {
            config,
            journal,
            cache,
            ledgers,
            read_only: Arc::new(AtomicBool::new(false)),
            high_priority_writes: AtomicBool::new(high_priority),
        })
    }

    /// Open a bookie backed by a journal file under `config.journal_dir`
    ///
    /// # Errors
    /// Returns an error if the journal cannot be opened or replayed.
    pub fn open_file_backed(
        config: BookieConfig,
        cache_config: &ReadCacheConfig,
    ) -> BookieResult<Self> {
        let journal = FileJournal::open(
            &config.journal_dir,
            config.max_journal_size,
            config.journal_sync,
        )?;
        Self::open(config, ReadCache::from_config(cache_config), Arc::new(journal))
    }

    /// The read cache in front of the journal
    pub const fn cache(&self) -> &ReadCache {
        &self.cache
    }

    /// Number of ledgers known to this bookie
    pub fn ledger_count(&self) -> usize {
        self.ledgers.len()
    }

    /// Fencing state of a ledger, if known
    pub fn is_fenced(&self, ledger_id: LedgerId) -> Option<bool> {
        self.ledgers.get(&ledger_id).map(|d| d.is_fenced())
    }

    /// Look up or create the descriptor for a ledger and authorize `master_key`
    fn resolve_ledger(
        &self,
        ledger_id: LedgerId,
        master_key: &MasterKey,
    ) -> BookieResult<Arc<LedgerDescriptor>> {
        if master_key.is_empty() {
            return Err(BookieError::MissingMasterKey { ledger_id });
        }
        let descriptor = Arc::clone(&self.ledgers.entry(ledger_id).or_insert_with(|| {
            debug!("Creating descriptor for ledger {}", ledger_id);
            Arc::new(LedgerDescriptor::new(ledger_id, master_key.clone()))
        }));
        descriptor.check_master_key(master_key)?;
        Ok(descriptor)
    }

    /// Journal the master key the first time a ledger reaches the journal
    fn persist_master_key(
        &self,
        descriptor: &LedgerDescriptor,
        state: &mut LedgerState,
    ) -> BookieResult<()> {
        if !state.master_key_persisted {
            self.journal.append(&JournalRecord::MasterKey {
                ledger_id: descriptor.ledger_id(),
                master_key: descriptor.master_key().clone(),
            })?;
            state.master_key_persisted = true;
        }
        Ok(())
    }

    fn write_entry(
        &self,
        entry: Bytes,
        ack_before_sync: bool,
        master_key: &MasterKey,
        recovery: bool,
    ) -> BookieResult<Pending<AddConfirmation>> {
        let (ledger_id, entry_id) = EntryHeader::parse_ids(&entry).ok_or_else(|| {
            BookieError::invalid_entry(format!(
                "{} bytes is too short for an entry header",
                entry.len()
            ))
        })?;
        let descriptor = self.resolve_ledger(ledger_id, master_key)?;

        let appended = {
            let mut state = descriptor.lock();
            if state.fenced && !recovery {
                return Err(BookieError::LedgerFenced { ledger_id });
            }
            self.persist_master_key(&descriptor, &mut state)
                .and_then(|()| {
                    self.journal.append(&JournalRecord::Entry {
                        ledger_id,
                        entry_id,
                        data: entry.clone(),
                    })
                })
                .map(|_| state.last_entry_id = state.last_entry_id.max(Some(entry_id)))
        };

        if let Err(e) = appended {
            error!("Journal append failed for {}:{}: {}", ledger_id, entry_id, e);
            mark_read_only_on_error(&self.read_only, self.config.read_only_on_io_error);
            return Ok(Pending::ready(Err(e)));
        }

        self.cache.put(ledger_id, entry_id, &entry);
        Ok(self.complete_after_flush(AddConfirmation { ledger_id, entry_id }, ack_before_sync))
    }

    /// Resolve `value` around a journal flush on the blocking pool
    fn complete_after_flush<T: Send + 'static>(
        &self,
        value: T,
        ack_before_sync: bool,
    ) -> Pending<T> {
        let (tx, pending) = Pending::channel();
        let journal = Arc::clone(&self.journal);
        let read_only = Arc::clone(&self.read_only);
        let read_only_on_io_error = self.config.read_only_on_io_error;

        let tx = if ack_before_sync {
            let _ = tx.send(Ok(value));
            None
        } else {
            Some((tx, value))
        };

        tokio::task::spawn_blocking(move || {
            let flushed = journal.flush();
            if let Err(e) = &flushed {
                error!("Journal flush failed: {}", e);
                mark_read_only_on_error(&read_only, read_only_on_io_error);
            }
            if let Some((tx, value)) = tx {
                let _ = tx.send(flushed.map(|()| value));
            }
        });

        pending
    }

    /// Store an entry on the normal write path
    ///
    /// With `ack_before_sync` the result resolves before the journal flush;
    /// otherwise only after it.
    ///
    /// # Errors
    /// Fails without side effects on a malformed entry, a missing or wrong
    /// master key, or a fenced ledger.
    pub fn add_entry(
        &self,
        entry: Bytes,
        ack_before_sync: bool,
        master_key: &MasterKey,
    ) -> BookieResult<Pending<AddConfirmation>> {
        self.write_entry(entry, ack_before_sync, master_key, false)
    }

    /// Callback form of [`Bookie::add_entry`]
    ///
    /// The callback runs exactly once on a Tokio task.
    ///
    /// # Errors
    /// `MissingCallback` if no callback is supplied, otherwise as `add_entry`.
    pub fn add_entry_with_callback<F>(
        &self,
        entry: Bytes,
        ack_before_sync: bool,
        callback: Option<F>,
        master_key: &MasterKey,
    ) -> BookieResult<()>
    where
        F: FnOnce(BookieResult<AddConfirmation>) + Send + 'static,
    {
        let callback = callback.ok_or(BookieError::MissingCallback)?;
        let pending = self.add_entry(entry, ack_before_sync, master_key)?;
        tokio::spawn(async move { callback(pending.await) });
        Ok(())
    }

    /// Store an entry during ledger recovery, ignoring the fence
    ///
    /// # Errors
    /// Fails on a malformed entry or a missing or wrong master key.
    pub fn recovery_add_entry(
        &self,
        entry: Bytes,
        master_key: &MasterKey,
    ) -> BookieResult<Pending<AddConfirmation>> {
        self.write_entry(entry, false, master_key, true)
    }

    /// Fence a ledger so only recovery adds are admitted
    ///
    /// Resolves to `true` once the fence is durable, whether or not this
    /// call made the transition.
    ///
    /// # Errors
    /// Fails without touching the fence on a missing or wrong master key.
    pub fn fence_ledger(
        &self,
        ledger_id: LedgerId,
        master_key: &MasterKey,
    ) -> BookieResult<Pending<bool>> {
        let descriptor = self.resolve_ledger(ledger_id, master_key)?;

        let fenced = {
            let mut state = descriptor.lock();
            if state.fenced {
                Ok(false)
            } else {
                self.persist_master_key(&descriptor, &mut state)
                    .and_then(|()| self.journal.append(&JournalRecord::Fence { ledger_id }))
                    .map(|_| {
                        state.fenced = true;
                        true
                    })
            }
        };

        match fenced {
            Ok(true) => info!("Fenced ledger {}", ledger_id),
            Ok(false) => debug!("Ledger {} already fenced", ledger_id),
            Err(e) => {
                error!("Failed to journal fence for ledger {}: {}", ledger_id, e);
                mark_read_only_on_error(&self.read_only, self.config.read_only_on_io_error);
                return Ok(Pending::ready(Err(e)));
            }
        }

        Ok(self.complete_after_flush(true, false))
    }

    /// Read an entry, from the cache if possible
    ///
    /// # Errors
    /// `NoSuchLedger` or `NoSuchEntry` if the entry was never stored here.
    pub fn read_entry(&self, ledger_id: LedgerId, entry_id: EntryId) -> BookieResult<Bytes> {
        if !self.ledgers.contains_key(&ledger_id) {
            return Err(BookieError::NoSuchLedger { ledger_id });
        }
        if let Some(data) = self.cache.get(ledger_id, entry_id) {
            return Ok(data);
        }
        match self.journal.read_entry(ledger_id, entry_id)? {
            Some(data) => {
                self.cache.put(ledger_id, entry_id, &data);
                Ok(data)
            }
            None => Err(BookieError::NoSuchEntry {
                ledger_id,
                entry_id,
            }),
        }
    }

    /// Highest entry id stored for a ledger, `None` if it has no entries
    ///
    /// # Errors
    /// `NoSuchLedger` if the ledger is unknown.
    pub fn read_last_entry_id(&self, ledger_id: LedgerId) -> BookieResult<Option<EntryId>> {
        self.ledgers
            .get(&ledger_id)
            .map(|d| d.last_entry_id())
            .ok_or(BookieError::NoSuchLedger { ledger_id })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    /// Whether high-priority writes are admitted while read-only
    pub fn is_available_for_high_priority_writes(&self) -> bool {
        self.high_priority_writes.load(Ordering::SeqCst)
    }

    pub fn set_high_priority_writes(&self, available: bool) {
        self.high_priority_writes.store(available, Ordering::SeqCst);
    }

    pub fn transition_to_read_only(&self) {
        if !self.read_only.swap(true, Ordering::SeqCst) {
            warn!("Bookie transitioned to read-only mode");
        }
    }

    pub fn transition_to_writable(&self) {
        if self.read_only.swap(false, Ordering::SeqCst) {
            info!("Bookie transitioned to writable mode");
        }
    }
}

fn mark_read_only_on_error(read_only: &AtomicBool, enabled: bool) {
    if enabled && !read_only.swap(true, Ordering::SeqCst) {
        warn!("Bookie transitioned to read-only mode after journal failure");
    }
}

impl std::fmt::Debug for Bookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bookie")
            .field("ledgers", &self.ledgers.len())
            .field("read_only", &self.is_read_only())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::MemoryJournal;
    use ledgerio_common::{BookieError, DigestManager, DigestType};
    use tempfile::tempdir;

    fn key(password: &str) -> MasterKey {
        MasterKey::from_password(password.as_bytes())
    }

    fn entry(ledger_id: LedgerId, entry_id: EntryId, payload: &[u8]) -> Bytes {
        DigestManager::new(ledger_id, b"pw", DigestType::Crc32c)
            .unwrap()
            .package(entry_id, -1, payload.len() as u64, payload)
    }

    fn bookie_with(journal: Arc<MemoryJournal>, config: BookieConfig) -> Bookie {
        Bookie::open(config, ReadCache::new(1024 * 1024, 64 * 1024), journal).unwrap()
    }

    fn memory_bookie() -> (Bookie, Arc<MemoryJournal>) {
        let journal = Arc::new(MemoryJournal::new());
        (bookie_with(Arc::clone(&journal), BookieConfig::default()), journal)
    }

    #[tokio::test]
    async fn test_add_and_read() {
        let (bookie, journal) = memory_bookie();
        let data = entry(1, 0, b"hello");

        let confirmation = bookie.add_entry(data.clone(), false, &key("a")).unwrap().await.unwrap();
        assert_eq!(confirmation, AddConfirmation { ledger_id: 1, entry_id: 0 });

        assert_eq!(bookie.read_entry(1, 0).unwrap(), data);
        assert!(bookie.cache().has_entry(1, 0));
        assert_eq!(bookie.read_last_entry_id(1).unwrap(), Some(0));
        // Master key record then the entry
        assert_eq!(journal.len(), 2);
        assert!(matches!(journal.records()[0], JournalRecord::MasterKey { ledger_id: 1, .. }));
        assert_eq!(journal.synced(), 2);
    }

    #[tokio::test]
    async fn test_master_key_pinned_once() {
        let (bookie, journal) = memory_bookie();
        bookie.add_entry(entry(1, 0, b"a"), false, &key("a")).unwrap().await.unwrap();
        bookie.add_entry(entry(1, 1, b"b"), false, &key("a")).unwrap().await.unwrap();

        let master_key_records = journal
            .records()
            .iter()
            .filter(|r| matches!(r, JournalRecord::MasterKey { .. }))
            .count();
        assert_eq!(master_key_records, 1);
    }

    #[tokio::test]
    async fn test_master_key_mismatch() {
        let (bookie, journal) = memory_bookie();
        bookie.add_entry(entry(1, 0, b"a"), false, &key("a")).unwrap().await.unwrap();
        let before = journal.len();

        let err = bookie.add_entry(entry(1, 1, b"b"), false, &key("b")).unwrap_err();
        assert!(matches!(err, BookieError::MasterKeyMismatch { ledger_id: 1 }));
        assert_eq!(journal.len(), before);
        assert!(!bookie.cache().has_entry(1, 1));
        assert_eq!(bookie.is_fenced(1), Some(false));
    }

    #[tokio::test]
    async fn test_missing_master_key() {
        let (bookie, journal) = memory_bookie();
        let err = bookie
            .add_entry(entry(1, 0, b"a"), false, &MasterKey::default())
            .unwrap_err();
        assert!(matches!(err, BookieError::MissingMasterKey { ledger_id: 1 }));
        assert!(journal.is_empty());
        assert_eq!(bookie.ledger_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_entry() {
        let (bookie, journal) = memory_bookie();
        let err = bookie
            .add_entry(Bytes::from_static(b"short"), false, &key("a"))
            .unwrap_err();
        assert!(matches!(err, BookieError::InvalidEntry(_)));
        assert!(journal.is_empty());
    }

    #[tokio::test]
    async fn test_missing_callback() {
        let (bookie, journal) = memory_bookie();
        let err = bookie
            .add_entry_with_callback(
                entry(1, 0, b"a"),
                false,
                None::<fn(BookieResult<AddConfirmation>)>,
                &key("a"),
            )
            .unwrap_err();
        assert!(matches!(err, BookieError::MissingCallback));
        assert!(journal.is_empty());
    }

    #[tokio::test]
    async fn test_callback_invoked_once() {
        let (bookie, _journal) = memory_bookie();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        bookie
            .add_entry_with_callback(
                entry(2, 0, b"cb"),
                true,
                Some(move |result: BookieResult<AddConfirmation>| {
                    let _ = tx.send(result.map(|c| c.entry_id));
                }),
                &key("a"),
            )
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().unwrap(), 0);
        // Sender dropped with the callback
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_fence_idempotent() {
        let (bookie, _journal) = memory_bookie();
        bookie.add_entry(entry(1, 0, b"a"), false, &key("a")).unwrap().await.unwrap();

        assert!(bookie.fence_ledger(1, &key("a")).unwrap().await.unwrap());
        assert!(bookie.fence_ledger(1, &key("a")).unwrap().await.unwrap());
        assert_eq!(bookie.is_fenced(1), Some(true));
    }

    #[tokio::test]
    async fn test_fence_rejects_bad_key() {
        let (bookie, _journal) = memory_bookie();
        bookie.add_entry(entry(1, 0, b"a"), false, &key("a")).unwrap().await.unwrap();

        assert!(matches!(
            bookie.fence_ledger(1, &key("b")).unwrap_err(),
            BookieError::MasterKeyMismatch { .. }
        ));
        assert!(matches!(
            bookie.fence_ledger(1, &MasterKey::default()).unwrap_err(),
            BookieError::MissingMasterKey { .. }
        ));
        assert_eq!(bookie.is_fenced(1), Some(false));
    }

    #[tokio::test]
    async fn test_fenced_ledger_rejects_adds_but_not_recovery() {
        let (bookie, _journal) = memory_bookie();
        bookie.add_entry(entry(1, 0, b"a"), false, &key("a")).unwrap().await.unwrap();
        bookie.fence_ledger(1, &key("a")).unwrap().await.unwrap();

        for entry_id in 1..4 {
            let err = bookie
                .add_entry(entry(1, entry_id, b"x"), false, &key("a"))
                .unwrap_err();
            assert!(matches!(err, BookieError::LedgerFenced { ledger_id: 1 }));
        }

        bookie
            .recovery_add_entry(entry(1, 1, b"recovered"), &key("a"))
            .unwrap()
            .await
            .unwrap();
        assert!(bookie.read_entry(1, 1).is_ok());
        assert_eq!(bookie.is_fenced(1), Some(true));

        // Recovery add still checks the master key
        assert!(bookie.recovery_add_entry(entry(1, 2, b"x"), &key("b")).is_err());
    }

    #[tokio::test]
    async fn test_fence_unknown_ledger_pins_key() {
        let (bookie, _journal) = memory_bookie();
        assert!(bookie.fence_ledger(9, &key("a")).unwrap().await.unwrap());
        assert_eq!(bookie.read_last_entry_id(9).unwrap(), None);
        assert!(bookie.add_entry(entry(9, 0, b"a"), false, &key("a")).is_err());
    }

    #[tokio::test]
    async fn test_ack_before_sync_ordering() {
        let journal = Arc::new(MemoryJournal::new());
        let config = BookieConfig {
            read_only_on_io_error: false,
            ..BookieConfig::default()
        };
        let bookie = bookie_with(Arc::clone(&journal), config);
        journal.set_fail_flush(true);

        // Acknowledged before the failing flush
        assert!(bookie.add_entry(entry(1, 0, b"a"), true, &key("a")).unwrap().await.is_ok());

        // Waits for the flush and sees its failure
        let err = bookie
            .add_entry(entry(1, 1, b"b"), false, &key("a"))
            .unwrap()
            .await
            .unwrap_err();
        assert!(matches!(err, BookieError::Io(_)));
        assert!(!bookie.is_read_only());
    }

    #[tokio::test]
    async fn test_journal_failure_switches_read_only() {
        let (bookie, journal) = memory_bookie();
        journal.set_fail_append(true);

        let err = bookie
            .add_entry(entry(1, 0, b"a"), false, &key("a"))
            .unwrap()
            .await
            .unwrap_err();
        assert!(matches!(err, BookieError::Io(_)));
        assert!(bookie.is_read_only());

        bookie.transition_to_writable();
        assert!(!bookie.is_read_only());
    }

    #[tokio::test]
    async fn test_read_missing() {
        let (bookie, _journal) = memory_bookie();
        assert!(matches!(
            bookie.read_entry(1, 0),
            Err(BookieError::NoSuchLedger { ledger_id: 1 })
        ));
        bookie.add_entry(entry(1, 0, b"a"), false, &key("a")).unwrap().await.unwrap();
        assert!(matches!(
            bookie.read_entry(1, 5),
            Err(BookieError::NoSuchEntry { ledger_id: 1, entry_id: 5 })
        ));
    }

    #[tokio::test]
    async fn test_read_falls_back_to_journal() {
        let journal = Arc::new(MemoryJournal::new());
        // Tiny cache that cannot hold the entry
        let bookie =
            Bookie::open(BookieConfig::default(), ReadCache::new(64, 32), journal.clone()).unwrap();
        let data = entry(1, 0, &[5u8; 100]);

        bookie.add_entry(data.clone(), false, &key("a")).unwrap().await.unwrap();
        assert!(!bookie.cache().has_entry(1, 0));
        assert_eq!(bookie.read_entry(1, 0).unwrap(), data);
    }

    #[tokio::test]
    async fn test_concurrent_adds_on_same_ledger() {
        let (bookie, _journal) = memory_bookie();
        let bookie = Arc::new(bookie);
        let mut tasks = Vec::new();

        for entry_id in 0..32u64 {
            let bookie = Arc::clone(&bookie);
            tasks.push(tokio::spawn(async move {
                bookie
                    .add_entry(entry(7, entry_id, b"payload"), false, &key("a"))
                    .unwrap()
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(bookie.read_last_entry_id(7).unwrap(), Some(31));
        assert_eq!(bookie.cache().count(), 32);
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let config = BookieConfig {
            journal_dir: dir.path().to_path_buf(),
            ..BookieConfig::default()
        };
        let data = entry(3, 0, b"durable");
        {
            let bookie =
                Bookie::open_file_backed(config.clone(), &ReadCacheConfig::default()).unwrap();
            bookie.add_entry(data.clone(), false, &key("a")).unwrap().await.unwrap();
            bookie.fence_ledger(3, &key("a")).unwrap().await.unwrap();
        }

        let bookie = Bookie::open_file_backed(config, &ReadCacheConfig::default()).unwrap();
        assert_eq!(bookie.is_fenced(3), Some(true));
        assert_eq!(bookie.read_last_entry_id(3).unwrap(), Some(0));
        assert_eq!(bookie.read_entry(3, 0).unwrap(), data);
        assert!(matches!(
            bookie.add_entry(entry(3, 1, b"x"), false, &key("b")),
            Err(BookieError::MasterKeyMismatch { .. })
        ));
    }
}
