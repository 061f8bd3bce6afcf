//! Per-ledger state held by a bookie

use ledgerio_common::{BookieError, BookieResult, EntryId, LedgerId, MasterKey};
use parking_lot::{Mutex, MutexGuard};

/// Mutable ledger state, guarded per ledger
#[derive(Debug, Default)]
pub struct LedgerState {
    /// Once set, normal adds are refused forever
    pub fenced: bool,
    /// Whether the master key record has reached the journal
    pub master_key_persisted: bool,
    /// Highest entry id stored on this bookie
    pub last_entry_id: Option<EntryId>,
}

/// Binds a ledger id to its pinned master key and fencing state
#[derive(Debug)]
pub struct LedgerDescriptor {
    ledger_id: LedgerId,
    master_key: MasterKey,
    state: Mutex<LedgerState>,
}

impl LedgerDescriptor {
    /// Create a descriptor pinning `master_key`
    #[must_use]
    pub fn new(ledger_id: LedgerId, master_key: MasterKey) -> Self {
        Self {
            ledger_id,
            master_key,
            state: Mutex::new(LedgerState::default()),
        }
    }

    #[must_use]
    pub const fn ledger_id(&self) -> LedgerId {
        self.ledger_id
    }

    #[must_use]
    pub const fn master_key(&self) -> &MasterKey {
        &self.master_key
    }

    /// Check a presented key against the pinned one
    ///
    /// # Errors
    /// `MissingMasterKey` for an empty key, `MasterKeyMismatch` otherwise.
    pub fn check_master_key(&self, master_key: &MasterKey) -> BookieResult<()> {
        if master_key.is_empty() {
            return Err(BookieError::MissingMasterKey {
                ledger_id: self.ledger_id,
            });
        }
        if *master_key != self.master_key {
            return Err(BookieError::MasterKeyMismatch {
                ledger_id: self.ledger_id,
            });
        }
        Ok(())
    }

    /// Exclusive access to the ledger state
    pub fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock()
    }

    pub fn is_fenced(&self) -> bool {
        self.state.lock().fenced
    }

    pub fn last_entry_id(&self) -> Option<EntryId> {
        self.state.lock().last_entry_id
    }
}
