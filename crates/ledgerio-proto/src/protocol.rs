//! Parsed bookie request and response model
//!
//! Framing happens below this layer; requests arrive here with their fields
//! already extracted.

use bytes::Bytes;
use ledgerio_common::{EntryId, LedgerId, MasterKey, StatusCode};
use thiserror::Error;

/// Newest protocol version this bookie speaks
pub const CURRENT_PROTOCOL_VERSION: u8 = 3;

/// Oldest protocol version still accepted
pub const LOWEST_COMPAT_PROTOCOL_VERSION: u8 = 0;

/// Entry id asking a read for the last stored entry
pub const LAST_ADD_CONFIRMED: EntryId = u64::MAX;

/// Errors raised while admitting a request
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("unexpected opcode: expected {expected:?}, got {actual}")]
    UnexpectedOpcode { expected: OpCode, actual: u8 },

    #[error("response channel is closed")]
    ChannelClosed,
}

impl ProtocolError {
    /// Status reported when the request is rejected at construction
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedVersion(_) => StatusCode::BadVersion,
            Self::UnexpectedOpcode { .. } => StatusCode::BadRequest,
            Self::ChannelClosed => StatusCode::IoError,
        }
    }
}

/// Request operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    AddEntry = 1,
    ReadEntry = 2,
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::AddEntry),
            2 => Ok(Self::ReadEntry),
            other => Err(other),
        }
    }
}

/// Request flag bits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags(u16);

impl Flags {
    pub const NONE: Self = Self(0);
    /// Read: fence the ledger before reading
    pub const DO_FENCING: Self = Self(1);
    /// Add: recovery add, admitted on fenced ledgers
    pub const RECOVERY_ADD: Self = Self(1 << 1);
    /// Add: may be admitted while the bookie is read-only
    pub const HIGH_PRIORITY: Self = Self(1 << 2);

    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// An add or recovery-add request
#[derive(Debug, Clone)]
pub struct ParsedAddRequest {
    pub protocol_version: u8,
    pub opcode: u8,
    pub flags: Flags,
    pub ledger_id: LedgerId,
    pub entry_id: EntryId,
    pub master_key: MasterKey,
    /// Full packaged entry, header included
    pub data: Bytes,
}

impl ParsedAddRequest {
    /// Build a current-version add request
    #[must_use]
    pub fn new(ledger_id: LedgerId, entry_id: EntryId, master_key: MasterKey, data: Bytes) -> Self {
        Self {
            protocol_version: CURRENT_PROTOCOL_VERSION,
            opcode: OpCode::AddEntry as u8,
            flags: Flags::NONE,
            ledger_id,
            entry_id,
            master_key,
            data,
        }
    }

    #[must_use]
    pub const fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub const fn is_recovery_add(&self) -> bool {
        self.flags.contains(Flags::RECOVERY_ADD)
    }

    #[must_use]
    pub const fn is_high_priority(&self) -> bool {
        self.flags.contains(Flags::HIGH_PRIORITY)
    }
}

/// A read request, optionally fencing the ledger first
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub protocol_version: u8,
    pub opcode: u8,
    pub flags: Flags,
    pub ledger_id: LedgerId,
    pub entry_id: EntryId,
    /// Required when fencing
    pub master_key: Option<MasterKey>,
}

impl ReadRequest {
    #[must_use]
    pub const fn new(ledger_id: LedgerId, entry_id: EntryId) -> Self {
        Self {
            protocol_version: CURRENT_PROTOCOL_VERSION,
            opcode: OpCode::ReadEntry as u8,
            flags: Flags::NONE,
            ledger_id,
            entry_id,
            master_key: None,
        }
    }

    /// Fence the ledger with `master_key` before reading
    #[must_use]
    pub fn fencing(mut self, master_key: MasterKey) -> Self {
        self.flags = self.flags | Flags::DO_FENCING;
        self.master_key = Some(master_key);
        self
    }

    #[must_use]
    pub const fn is_fencing(&self) -> bool {
        self.flags.contains(Flags::DO_FENCING)
    }
}

/// Any request a bookie handles
#[derive(Debug, Clone)]
pub enum Request {
    Add(ParsedAddRequest),
    Read(ReadRequest),
}

/// The single response written for a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub protocol_version: u8,
    pub opcode: OpCode,
    pub status: StatusCode,
    pub ledger_id: LedgerId,
    pub entry_id: EntryId,
    /// Entry bytes for successful reads
    pub data: Option<Bytes>,
}

impl Response {
    #[must_use]
    pub const fn add(
        protocol_version: u8,
        status: StatusCode,
        ledger_id: LedgerId,
        entry_id: EntryId,
    ) -> Self {
        Self {
            protocol_version,
            opcode: OpCode::AddEntry,
            status,
            ledger_id,
            entry_id,
            data: None,
        }
    }

    #[must_use]
    pub const fn read(
        protocol_version: u8,
        status: StatusCode,
        ledger_id: LedgerId,
        entry_id: EntryId,
        data: Option<Bytes>,
    ) -> Self {
        Self {
            protocol_version,
            opcode: OpCode::ReadEntry,
            status,
            ledger_id,
            entry_id,
            data,
        }
    }
}

/// Check the version and opcode common to every request
///
/// # Errors
/// `UnsupportedVersion` or `UnexpectedOpcode`.
pub fn validate_header(
    protocol_version: u8,
    opcode: u8,
    expected: OpCode,
) -> Result<(), ProtocolError> {
    if !(LOWEST_COMPAT_PROTOCOL_VERSION..=CURRENT_PROTOCOL_VERSION).contains(&protocol_version) {
        return Err(ProtocolError::UnsupportedVersion(protocol_version));
    }
    match OpCode::try_from(opcode) {
        Ok(op) if op == expected => Ok(()),
        _ => Err(ProtocolError::UnexpectedOpcode {
            expected,
            actual: opcode,
        }),
    }
}
