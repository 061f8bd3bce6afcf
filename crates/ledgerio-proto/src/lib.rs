//! LedgerIO Protocol - Bookie request handling
//!
//! This crate provides:
//! - The parsed request/response model, opcodes, flags and versions
//! - The response channel seam to the transport
//! - Admission processors turning one request into exactly one response
//! - Per-operation request statistics

pub mod channel;
pub mod processor;
pub mod protocol;
pub mod read;
pub mod stats;

pub use channel::{MpscResponseChannel, ResponseChannel};
pub use processor::{RequestContext, WriteEntryProcessor, process_request};
pub use protocol::{
    CURRENT_PROTOCOL_VERSION, Flags, LAST_ADD_CONFIRMED, LOWEST_COMPAT_PROTOCOL_VERSION, OpCode,
    ParsedAddRequest, ProtocolError, ReadRequest, Request, Response,
};
pub use read::ReadEntryProcessor;
pub use stats::{OpStats, RequestStats};
