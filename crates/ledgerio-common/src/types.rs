//! Core type definitions for LedgerIO
//!
//! This module defines the identifiers, the on-bookie entry header and the
//! wire status codes shared by the storage engine, the protocol layer and
//! the client coordinator.

use bytes::Bytes;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identifier of a ledger (non-negative 64-bit value)
pub type LedgerId = u64;

/// Identifier of an entry within a ledger
pub type EntryId = u64;

/// Client-side sentinel for "no entry" (empty ledger, nothing confirmed)
pub const INVALID_ENTRY_ID: i64 = -1;

/// Length of the id prefix every stored entry starts with (ledger id + entry id)
pub const ENTRY_ID_PREFIX_LEN: usize = 16;

/// Length of the full entry header (ids + last add confirmed + payload length)
pub const ENTRY_HEADER_LEN: usize = 32;

/// Identifier of a bookie (storage node) within the cluster
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From)]
#[display("{_0}")]
pub struct BookieId(String);

impl BookieId {
    /// Create a new bookie id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BookieId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BookieId({})", self.0)
    }
}

impl From<&str> for BookieId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Per-ledger secret pinned on each bookie by the first write
///
/// An empty key is treated as a missing key by the storage engine.
#[derive(Clone, PartialEq, Eq, Default, From)]
pub struct MasterKey(Bytes);

impl MasterKey {
    /// Wrap raw key bytes
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Derive the master key a writer presents for a ledger password
    #[must_use]
    pub fn from_password(password: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"ledger");
        hasher.update(password);
        Self(Bytes::copy_from_slice(&hasher.finalize()))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Cheap handle to the underlying bytes
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }
}

impl From<&[u8]> for MasterKey {
    fn from(value: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(value))
    }
}

impl From<Vec<u8>> for MasterKey {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = &self.0[..self.0.len().min(4)];
        write!(f, "MasterKey({}.., {} bytes)", hex::encode(shown), self.0.len())
    }
}

/// Fixed header at the front of every stored entry
///
/// ```text
/// +-----------+----------+------------------+--------+--------+---------+
/// | LedgerId  | EntryId  | LastAddConfirmed | Length | Digest | Payload |
/// | 8B BE     | 8B BE    | 8B BE (signed)   | 8B BE  | var    | var     |
/// +-----------+----------+------------------+--------+--------+---------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub ledger_id: LedgerId,
    pub entry_id: EntryId,
    pub last_add_confirmed: i64,
    pub length: u64,
}

impl EntryHeader {
    /// Read only the `(ledger id, entry id)` prefix of a stored entry
    #[must_use]
    pub fn parse_ids(data: &[u8]) -> Option<(LedgerId, EntryId)> {
        if data.len() < ENTRY_ID_PREFIX_LEN {
            return None;
        }
        let ledger_id = u64::from_be_bytes(data[0..8].try_into().ok()?);
        let entry_id = u64::from_be_bytes(data[8..16].try_into().ok()?);
        Some((ledger_id, entry_id))
    }

    /// Parse the full fixed header
    #[must_use]
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < ENTRY_HEADER_LEN {
            return None;
        }
        let (ledger_id, entry_id) = Self::parse_ids(data)?;
        let last_add_confirmed = i64::from_be_bytes(data[16..24].try_into().ok()?);
        let length = u64::from_be_bytes(data[24..32].try_into().ok()?);
        Some(Self {
            ledger_id,
            entry_id,
            last_add_confirmed,
            length,
        })
    }

    /// Serialize the header
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ENTRY_HEADER_LEN] {
        let mut buf = [0u8; ENTRY_HEADER_LEN];
        buf[0..8].copy_from_slice(&self.ledger_id.to_be_bytes());
        buf[8..16].copy_from_slice(&self.entry_id.to_be_bytes());
        buf[16..24].copy_from_slice(&self.last_add_confirmed.to_be_bytes());
        buf[24..32].copy_from_slice(&self.length.to_be_bytes());
        buf
    }
}

/// Wire-level result codes carried in every bookie response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum StatusCode {
    /// Success
    Ok = 0,
    /// Ledger unknown to the bookie
    NoLedger = 1,
    /// Entry unknown to the bookie
    NoEntry = 2,
    /// Malformed request or entry
    BadRequest = 100,
    /// Internal I/O failure
    IoError = 101,
    /// Unauthorized (master key missing or mismatched)
    Unauthorized = 102,
    /// Unsupported protocol version
    BadVersion = 103,
    /// Ledger is fenced
    Fenced = 104,
    /// Bookie is read-only
    ReadOnly = 105,
    /// Bookie is overloaded
    TooManyRequests = 106,
}

impl StatusCode {
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Decode a wire value
    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::NoLedger),
            2 => Some(Self::NoEntry),
            100 => Some(Self::BadRequest),
            101 => Some(Self::IoError),
            102 => Some(Self::Unauthorized),
            103 => Some(Self::BadVersion),
            104 => Some(Self::Fenced),
            105 => Some(Self::ReadOnly),
            106 => Some(Self::TooManyRequests),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "EOK",
            Self::NoLedger => "ENOLEDGER",
            Self::NoEntry => "ENOENTRY",
            Self::BadRequest => "EBADREQ",
            Self::IoError => "EIO",
            Self::Unauthorized => "EUA",
            Self::BadVersion => "EBADVERSION",
            Self::Fenced => "EFENCED",
            Self::ReadOnly => "EREADONLY",
            Self::TooManyRequests => "ETOOMANYREQUESTS",
        };
        write!(f, "{name}({})", self.as_i32())
    }
}
