//! LedgerIO Storage - Bookie storage engine
//!
//! This crate provides the storage side of a bookie:
//! - Segment-ring read cache with generation-stamped invalidation
//! - Durable journal (file-backed and in-memory)
//! - Per-ledger master-key pinning and fencing
//! - The add, recovery-add, fence and read paths

pub mod bookie;
pub mod cache;
pub mod journal;
pub mod ledger;

pub use bookie::{AddConfirmation, Bookie, Pending};
pub use cache::{CacheStats, ReadCache};
pub use journal::{FileJournal, Journal, JournalRecord, MemoryJournal};
pub use ledger::{LedgerDescriptor, LedgerState};
