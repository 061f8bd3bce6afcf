//! LedgerIO Common - Shared types and utilities
//!
//! This crate provides the ledger/entry data model, the bookie error
//! taxonomy, configuration structures and entry digests used across all
//! LedgerIO components.

pub mod config;
pub mod digest;
pub mod error;
pub mod types;

pub use config::Config;
pub use digest::{DigestError, DigestManager, DigestType, UnpackedEntry};
pub use error::{BookieError, BookieResult};
pub use types::*;
