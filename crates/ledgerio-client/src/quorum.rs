//! Quorum fan-out and fan-in
//!
//! An entry is written to the `write_quorum` bookies of its write set, the
//! ensemble rotated by the entry id, and is confirmed once `ack_quorum` of
//! them acknowledge. Writes run as detached tasks so that replicas which
//! answer after the quorum (or the timeout) still store their copy; their
//! late results are discarded.

use crate::bookie_client::BookieClient;
use crate::error::{ClientError, ClientResult};
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use ledgerio_common::{BookieId, DigestManager, EntryId, LedgerId, MasterKey, UnpackedEntry};
use ledgerio_proto::Flags;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Ensemble positions storing `entry_id`
#[must_use]
pub fn write_set(entry_id: EntryId, ensemble_size: usize, write_quorum: usize) -> Vec<usize> {
    if ensemble_size == 0 {
        return Vec::new();
    }
    #[allow(clippy::cast_possible_truncation)]
    let start = (entry_id % ensemble_size as u64) as usize;
    (0..write_quorum.min(ensemble_size))
        .map(|i| (start + i) % ensemble_size)
        .collect()
}

/// Bookies of a write set that must answer before an entry can be judged
///
/// Any `write_quorum - ack_quorum + 1` members of a write set include at
/// least one member of every ack quorum drawn from it.
#[must_use]
pub const fn coverage_quorum(write_quorum: usize, ack_quorum: usize) -> usize {
    write_quorum.saturating_sub(ack_quorum) + 1
}

/// First write set that lacks a coverage quorum of responding bookies
///
/// `responded[i]` tells whether ensemble position `i` answered. Returns the
/// write set's first position and its response count.
#[must_use]
pub fn uncovered_write_set(
    responded: &[bool],
    write_quorum: usize,
    ack_quorum: usize,
) -> Option<(usize, usize)> {
    let required = coverage_quorum(write_quorum, ack_quorum);
    (0..responded.len()).find_map(|start| {
        let count = write_set(start as EntryId, responded.len(), write_quorum)
            .into_iter()
            .filter(|&i| responded[i])
            .count();
        (count < required).then_some((start, count))
    })
}

/// Acknowledgement tracker for one entry
#[derive(Debug)]
pub struct AckSet {
    entry_id: EntryId,
    write_quorum: usize,
    ack_quorum: usize,
    acked: HashSet<BookieId>,
    failures: Vec<(BookieId, ClientError)>,
}

impl AckSet {
    #[must_use]
    pub fn new(entry_id: EntryId, write_quorum: usize, ack_quorum: usize) -> Self {
        Self {
            entry_id,
            write_quorum,
            ack_quorum,
            acked: HashSet::with_capacity(write_quorum),
            failures: Vec::new(),
        }
    }

    /// Record an ack; returns true once the quorum is reached
    pub fn record_ack(&mut self, bookie: BookieId) -> bool {
        self.acked.insert(bookie);
        self.is_complete()
    }

    pub fn record_failure(&mut self, bookie: BookieId, error: ClientError) {
        self.failures.push((bookie, error));
    }

    #[must_use]
    pub fn acked(&self) -> usize {
        self.acked.len()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.acked.len() >= self.ack_quorum
    }

    /// Too many replicas failed for the quorum to still be reachable
    #[must_use]
    pub fn is_lost(&self) -> bool {
        self.failures.len() > self.write_quorum.saturating_sub(self.ack_quorum)
    }

    /// Error reported when the quorum is not reached
    ///
    /// A fencing rejection wins so the writer learns it was superseded.
    #[must_use]
    pub fn into_error(mut self) -> ClientError {
        if let Some(pos) = self
            .failures
            .iter()
            .position(|(_, e)| matches!(e, ClientError::LedgerFenced { .. }))
        {
            return self.failures.swap_remove(pos).1;
        }
        ClientError::QuorumNotReached {
            entry_id: self.entry_id,
            acked: self.acked.len(),
            required: self.ack_quorum,
        }
    }
}

/// Write parameters shared by every replica of one entry
#[derive(Debug, Clone)]
pub struct ReplicaWrite {
    pub ledger_id: LedgerId,
    pub entry_id: EntryId,
    pub master_key: MasterKey,
    pub data: Bytes,
    pub flags: Flags,
}

/// Send an entry to its write set and wait for `ack_quorum` acks
///
/// # Errors
/// `LedgerFenced` if a replica rejected the write as fenced and the quorum
/// was lost, `QuorumNotReached` on other losses, `Timeout` if neither
/// outcome is known within `timeout`.
pub async fn replicate(
    replicas: &[Arc<dyn BookieClient>],
    write: ReplicaWrite,
    ack_quorum: usize,
    timeout: Duration,
) -> ClientResult<()> {
    let entry_id = write.entry_id;
    let mut acks = AckSet::new(entry_id, replicas.len(), ack_quorum);

    let mut pending: FuturesUnordered<_> = replicas
        .iter()
        .map(|bookie| {
            let bookie = Arc::clone(bookie);
            let write = write.clone();
            let id = bookie.id().clone();
            let handle = tokio::spawn(async move {
                bookie
                    .add_entry(
                        write.ledger_id,
                        write.entry_id,
                        write.master_key,
                        write.data,
                        write.flags,
                    )
                    .await
            });
            async move {
                let result = handle
                    .await
                    .unwrap_or_else(|e| Err(ClientError::Interrupted(e.to_string())));
                (id, result)
            }
        })
        .collect();

    let fan_in = async {
        while let Some((bookie, result)) = pending.next().await {
            match result {
                Ok(()) => {
                    if acks.record_ack(bookie) {
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!(
                        "Replica {} failed entry {}:{}: {}",
                        bookie, write.ledger_id, entry_id, e
                    );
                    acks.record_failure(bookie, e);
                    if acks.is_lost() {
                        break;
                    }
                }
            }
        }
        Err(())
    };

    let outcome = tokio::time::timeout(timeout, fan_in).await;
    match outcome {
        Ok(Ok(())) => {
            debug!(
                "Entry {}:{} confirmed by {} replicas",
                write.ledger_id,
                entry_id,
                acks.acked()
            );
            Ok(())
        }
        Ok(Err(())) => Err(acks.into_error()),
        Err(_) => Err(ClientError::Timeout(format!(
            "entry {}:{} after {:?} with {} of {} acks",
            write.ledger_id,
            entry_id,
            timeout,
            acks.acked(),
            ack_quorum
        ))),
    }
}

/// Read an entry from the first replica that returns a valid copy
///
/// Replicas are tried in write-set order; a copy that fails digest
/// verification is skipped.
///
/// # Errors
/// The last replica error if no replica returned a valid copy.
pub async fn read_from_replicas(
    replicas: &[Arc<dyn BookieClient>],
    digest: &DigestManager,
    entry_id: EntryId,
    timeout: Duration,
) -> ClientResult<UnpackedEntry> {
    let ledger_id = digest.ledger_id();
    let mut last_error = ClientError::NoSuchEntry {
        ledger_id,
        entry_id,
    };

    for bookie in replicas {
        let read = tokio::time::timeout(timeout, bookie.read_entry(ledger_id, entry_id));
        let data = match read.await {
            Ok(Ok(data)) => data,
            Ok(Err(e)) => {
                debug!(
                    "Replica {} could not serve {}:{}: {}",
                    bookie.id(),
                    ledger_id,
                    entry_id,
                    e
                );
                last_error = e;
                continue;
            }
            Err(_) => {
                last_error = ClientError::Timeout(format!(
                    "read {}:{} from {}",
                    ledger_id,
                    entry_id,
                    bookie.id()
                ));
                continue;
            }
        };

        match digest.verify_and_unpack(entry_id, &data) {
            Ok(entry) => return Ok(entry),
            Err(e) => {
                warn!(
                    "Replica {} returned a corrupt copy of {}:{}: {}",
                    bookie.id(),
                    ledger_id,
                    entry_id,
                    e
                );
                last_error = e.into();
            }
        }
    }
    Err(last_error)
}

/// Read an entry during recovery
///
/// Returns `None` only when at least `coverage_quorum` replicas positively
/// report the entry missing; no ack quorum can then hold it. Unreachable
/// replicas never count as missing.
///
/// # Errors
/// The last replica failure if no valid copy was found and too few
/// replicas confirmed the entry missing.
pub async fn read_for_recovery(
    replicas: &[Arc<dyn BookieClient>],
    digest: &DigestManager,
    entry_id: EntryId,
    coverage: usize,
    timeout: Duration,
) -> ClientResult<Option<UnpackedEntry>> {
    let ledger_id = digest.ledger_id();
    let mut missing = 0;
    let mut last_error = None;

    for bookie in replicas {
        let result = tokio::time::timeout(timeout, bookie.read_entry(ledger_id, entry_id))
            .await
            .unwrap_or_else(|_| {
                Err(ClientError::Timeout(format!(
                    "read {}:{} from {}",
                    ledger_id,
                    entry_id,
                    bookie.id()
                )))
            });
        match result {
            Ok(data) => match digest.verify_and_unpack(entry_id, &data) {
                Ok(entry) => return Ok(Some(entry)),
                Err(e) => {
                    warn!(
                        "Replica {} returned a corrupt copy of {}:{}: {}",
                        bookie.id(),
                        ledger_id,
                        entry_id,
                        e
                    );
                    last_error = Some(e.into());
                }
            },
            Err(ClientError::NoSuchEntry { .. } | ClientError::NoSuchLedger(_)) => missing += 1,
            Err(e) => {
                debug!(
                    "Replica {} could not serve {}:{} for recovery: {}",
                    bookie.id(),
                    ledger_id,
                    entry_id,
                    e
                );
                last_error = Some(e);
            }
        }
    }

    if missing >= coverage {
        return Ok(None);
    }
    Err(last_error.unwrap_or(ClientError::QuorumNotReached {
        entry_id,
        acked: missing,
        required: coverage,
    }))
}
