//! Error types for the ledger coordinator

use ledgerio_common::{BookieId, DigestError, EntryId, LedgerId, StatusCode};
use thiserror::Error;

/// Result type for client operations
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Errors raised by the client ledger coordinator
#[derive(Debug, Error)]
pub enum ClientError {
    // Argument errors, raised before any network call
    #[error(
        "invalid quorum: ensemble {ensemble_size}, write quorum {write_quorum}, ack quorum {ack_quorum}"
    )]
    InvalidQuorum {
        ensemble_size: usize,
        write_quorum: usize,
        ack_quorum: usize,
    },

    #[error("invalid entry id: {0}")]
    InvalidEntryId(i64),

    #[error("invalid read range: {first}..={last}")]
    InvalidRange { first: i64, last: i64 },

    #[error("invalid slice: offset {offset}, length {length} of {len} bytes")]
    InvalidOffset {
        offset: usize,
        length: usize,
        len: usize,
    },

    #[error("entry id {0} already written or in flight")]
    DuplicateEntryId(EntryId),

    // Ensemble errors
    #[error("not enough bookies: have {available}, need {required}")]
    NotEnoughBookies { available: usize, required: usize },

    #[error("unknown bookie: {0}")]
    UnknownBookie(BookieId),

    #[error("bookie unavailable: {0}")]
    BookieUnavailable(BookieId),

    #[error("quorum not reached for entry {entry_id}: {acked} of {required} acks")]
    QuorumNotReached {
        entry_id: EntryId,
        acked: usize,
        required: usize,
    },

    #[error(
        "could not fence ledger {ledger_id}: write set {write_set} has {fenced} of {required} bookies"
    )]
    FenceQuorumNotReached {
        ledger_id: LedgerId,
        write_set: usize,
        fenced: usize,
        required: usize,
    },

    #[error("operation timed out: {0}")]
    Timeout(String),

    // Ledger state errors
    #[error("ledger {ledger_id} is fenced")]
    LedgerFenced { ledger_id: LedgerId },

    #[error("ledger {ledger_id} is closed")]
    LedgerClosed { ledger_id: LedgerId },

    #[error("digest verification failed: {0}")]
    DigestMismatch(#[from] DigestError),

    #[error("no such entry: ledger {ledger_id}, entry {entry_id}")]
    NoSuchEntry { ledger_id: LedgerId, entry_id: EntryId },

    #[error("no such ledger: {0}")]
    NoSuchLedger(LedgerId),

    #[error("entry {entry_id} is beyond last add confirmed {last_add_confirmed}")]
    ReadBeyondLastAddConfirmed {
        entry_id: EntryId,
        last_add_confirmed: i64,
    },

    // Remote errors
    #[error("bookie {bookie} responded {status}")]
    Bookie { bookie: BookieId, status: StatusCode },

    #[error("operation interrupted: {0}")]
    Interrupted(String),

    #[error("metadata error: {0}")]
    Metadata(String),
}

impl ClientError {
    /// Create a metadata error
    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::Metadata(msg.into())
    }

    /// Check if retrying, possibly on a new ensemble, may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_)
            | Self::QuorumNotReached { .. }
            | Self::FenceQuorumNotReached { .. }
            | Self::BookieUnavailable(_)
            | Self::Interrupted(_) => true,
            Self::Bookie { status, .. } => matches!(
                status,
                StatusCode::IoError | StatusCode::ReadOnly | StatusCode::TooManyRequests
            ),
            _ => false,
        }
    }

    /// Map a bookie response status to an error
    #[must_use]
    pub fn from_status(
        bookie: &BookieId,
        ledger_id: LedgerId,
        entry_id: EntryId,
        status: StatusCode,
    ) -> Self {
        match status {
            StatusCode::Fenced => Self::LedgerFenced { ledger_id },
            StatusCode::NoEntry => Self::NoSuchEntry { ledger_id, entry_id },
            StatusCode::NoLedger => Self::NoSuchLedger(ledger_id),
            status => Self::Bookie {
                bookie: bookie.clone(),
                status,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        let bookie = BookieId::new("b1");
        assert!(matches!(
            ClientError::from_status(&bookie, 1, 2, StatusCode::Fenced),
            ClientError::LedgerFenced { ledger_id: 1 }
        ));
        assert!(matches!(
            ClientError::from_status(&bookie, 1, 2, StatusCode::NoEntry),
            ClientError::NoSuchEntry { ledger_id: 1, entry_id: 2 }
        ));
        assert!(ClientError::from_status(&bookie, 1, 2, StatusCode::ReadOnly).is_retryable());
        assert!(!ClientError::from_status(&bookie, 1, 2, StatusCode::Unauthorized).is_retryable());
    }
}
