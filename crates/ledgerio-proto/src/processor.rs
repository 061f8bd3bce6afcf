//! Add-entry admission processor
//!
//! One processor handles one add or recovery-add request and writes exactly
//! one response. `process_packet` returns as soon as the request has been
//! dispatched; the response is written when the storage engine completes.

use crate::channel::ResponseChannel;
use crate::protocol::{OpCode, ParsedAddRequest, ProtocolError, Request, Response, validate_header};
use crate::read::ReadEntryProcessor;
use crate::stats::RequestStats;
use ledgerio_common::{EntryHeader, StatusCode};
use ledgerio_storage::Bookie;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Shared state every processor needs
#[derive(Debug)]
pub struct RequestContext {
    pub bookie: Arc<Bookie>,
    pub stats: Arc<RequestStats>,
}

impl RequestContext {
    #[must_use]
    pub fn new(bookie: Arc<Bookie>) -> Self {
        Self {
            bookie,
            stats: Arc::new(RequestStats::default()),
        }
    }
}

/// Turns one add request into one response
pub struct WriteEntryProcessor {
    request: ParsedAddRequest,
    channel: Arc<dyn ResponseChannel>,
    ctx: Arc<RequestContext>,
    enqueued: Instant,
}

impl WriteEntryProcessor {
    /// Validate the request and bind it to its channel
    ///
    /// # Errors
    /// Fails with no storage side effect on an unsupported version, a
    /// non-add opcode, or a channel that is already closed.
    pub fn new(
        request: ParsedAddRequest,
        channel: Arc<dyn ResponseChannel>,
        ctx: Arc<RequestContext>,
    ) -> Result<Self, ProtocolError> {
        validate_header(request.protocol_version, request.opcode, OpCode::AddEntry)?;
        if !channel.is_open() {
            return Err(ProtocolError::ChannelClosed);
        }
        Ok(Self {
            request,
            channel,
            ctx,
            enqueued: Instant::now(),
        })
    }

    /// Apply node policy and dispatch to the storage engine
    ///
    /// # Errors
    /// `ChannelClosed` if an immediate response cannot be delivered.
    pub fn process_packet(self) -> Result<(), ProtocolError> {
        let bookie = &self.ctx.bookie;
        let request = &self.request;

        if bookie.is_read_only()
            && !(request.is_high_priority() && bookie.is_available_for_high_priority_writes())
        {
            warn!(
                "BookieReadOnly: rejecting add {}:{}",
                request.ledger_id, request.entry_id
            );
            self.ctx.stats.record_read_only_rejection();
            return self.respond(StatusCode::ReadOnly);
        }

        if EntryHeader::parse_ids(&request.data) != Some((request.ledger_id, request.entry_id)) {
            warn!(
                "Entry header does not match request {}:{}",
                request.ledger_id, request.entry_id
            );
            return self.respond(StatusCode::BadRequest);
        }

        let dispatched = if request.is_recovery_add() {
            bookie.recovery_add_entry(request.data.clone(), &request.master_key)
        } else {
            bookie.add_entry(request.data.clone(), false, &request.master_key)
        };

        match dispatched {
            Ok(pending) => {
                tokio::spawn(async move {
                    let status = match pending.await {
                        Ok(_) => StatusCode::Ok,
                        Err(e) => {
                            error!(
                                "Error writing entry {}:{}: {}",
                                self.request.ledger_id, self.request.entry_id, e
                            );
                            e.status_code()
                        }
                    };
                    if let Err(e) = self.respond(status) {
                        debug!("Dropping add response: {}", e);
                    }
                });
                Ok(())
            }
            Err(e) => {
                debug!(
                    "Add {}:{} rejected: {}",
                    request.ledger_id, request.entry_id, e
                );
                self.respond(e.status_code())
            }
        }
    }

    /// Write the single response and record stats
    fn respond(&self, status: StatusCode) -> Result<(), ProtocolError> {
        let stats = if self.request.is_recovery_add() {
            &self.ctx.stats.recovery_add_entry
        } else {
            &self.ctx.stats.add_entry
        };
        let latency_us = u64::try_from(self.enqueued.elapsed().as_micros()).unwrap_or(u64::MAX);
        stats.record(status.is_ok(), latency_us, self.request.data.len() as u64, 0);

        self.channel.send(Response::add(
            self.request.protocol_version,
            status,
            self.request.ledger_id,
            self.request.entry_id,
        ))
    }
}

/// Route any request to its processor
///
/// A request rejected at construction gets a best-effort error response.
///
/// # Errors
/// `ChannelClosed` if no response could be written.
pub fn process_request(
    request: Request,
    channel: Arc<dyn ResponseChannel>,
    ctx: Arc<RequestContext>,
) -> Result<(), ProtocolError> {
    let rejected = match request {
        Request::Add(add) => {
            let (version, ledger_id, entry_id) =
                (add.protocol_version, add.ledger_id, add.entry_id);
            match WriteEntryProcessor::new(add, Arc::clone(&channel), ctx) {
                Ok(processor) => return processor.process_packet(),
                Err(e) => (e, Response::add(version, StatusCode::Ok, ledger_id, entry_id)),
            }
        }
        Request::Read(read) => {
            let (version, ledger_id, entry_id) =
                (read.protocol_version, read.ledger_id, read.entry_id);
            match ReadEntryProcessor::new(read, Arc::clone(&channel), ctx) {
                Ok(processor) => return processor.process_packet(),
                Err(e) => (e, Response::read(version, StatusCode::Ok, ledger_id, entry_id, None)),
            }
        }
    };

    let (e, mut response) = rejected;
    if matches!(e, ProtocolError::ChannelClosed) {
        return Err(e);
    }
    warn!("Rejecting request: {}", e);
    response.status = e.status_code();
    channel.send(response)
}
