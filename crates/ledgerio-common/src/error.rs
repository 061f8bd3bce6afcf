//! Error types for LedgerIO
//!
//! This module defines the bookie-side error taxonomy. Every variant maps to
//! exactly one wire status code so the protocol layer never has to guess.

use crate::types::{LedgerId, StatusCode};
use thiserror::Error;

/// Result type for bookie storage operations
pub type BookieResult<T> = std::result::Result<T, BookieError>;

/// Errors raised by the bookie storage engine
#[derive(Debug, Error)]
pub enum BookieError {
    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    #[error("no completion callback supplied")]
    MissingCallback,

    #[error("no master key supplied for ledger {ledger_id}")]
    MissingMasterKey { ledger_id: LedgerId },

    #[error("master key mismatch for ledger {ledger_id}")]
    MasterKeyMismatch { ledger_id: LedgerId },

    #[error("ledger {ledger_id} is fenced")]
    LedgerFenced { ledger_id: LedgerId },

    #[error("no such entry: ledger {ledger_id}, entry {entry_id}")]
    NoSuchEntry { ledger_id: LedgerId, entry_id: u64 },

    #[error("no such ledger: {ledger_id}")]
    NoSuchLedger { ledger_id: LedgerId },

    #[error("bookie is read-only")]
    ReadOnly,

    #[error("journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation interrupted: {0}")]
    Interrupted(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl BookieError {
    /// Create an invalid entry error
    pub fn invalid_entry(msg: impl Into<String>) -> Self {
        Self::InvalidEntry(msg.into())
    }

    /// Create an interrupted error
    pub fn interrupted(msg: impl Into<String>) -> Self {
        Self::Interrupted(msg.into())
    }

    /// Check if a client may retry the operation on this or another bookie
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Interrupted(_) | Self::ReadOnly)
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NoSuchEntry { .. } | Self::NoSuchLedger { .. })
    }

    /// Wire status code reported to the requester
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidEntry(_) | Self::MissingCallback | Self::Configuration(_) => {
                StatusCode::BadRequest
            }
            Self::MissingMasterKey { .. } | Self::MasterKeyMismatch { .. } => {
                StatusCode::Unauthorized
            }
            Self::LedgerFenced { .. } => StatusCode::Fenced,
            Self::NoSuchEntry { .. } => StatusCode::NoEntry,
            Self::NoSuchLedger { .. } => StatusCode::NoLedger,
            Self::ReadOnly => StatusCode::ReadOnly,
            Self::Io(_) | Self::Interrupted(_) => StatusCode::IoError,
        }
    }
}
