//! LedgerIO Client - Ledger coordinator
//!
//! Presents a ledger as a linear, quorum-replicated sequence of entries.
//! Entries are digested, striped over the ledger's ensemble and confirmed
//! once an ack quorum of bookies stored them. Ledgers left open by a failed
//! writer are fenced and recovered when reopened.

pub mod bookie_client;
pub mod client;
pub mod error;
pub mod ledger;
pub mod metadata;
pub mod placement;
pub mod quorum;

pub use bookie_client::{BookieClient, LocalBookieClient};
pub use client::{Client, validate_quorum};
pub use error::{ClientError, ClientResult};
pub use ledger::{Explicit, LedgerEntry, LedgerHandle, Sequential, WriteMode};
pub use metadata::{InMemoryMetadataStore, LedgerMetadata, MetadataStore};
pub use placement::{PlacementPolicy, RoundRobinPlacement};
pub use quorum::{AckSet, ReplicaWrite, write_set};
