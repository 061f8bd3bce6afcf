//! Read-entry processor
//!
//! Reads are served while the bookie is read-only. A fencing read fences the
//! ledger first and only reads once the fence is durable, which is how a
//! recovering writer stops the previous writer before inspecting entries.

use crate::channel::ResponseChannel;
use crate::processor::RequestContext;
use crate::protocol::{
    LAST_ADD_CONFIRMED, OpCode, ProtocolError, ReadRequest, Response, validate_header,
};
use bytes::Bytes;
use ledgerio_common::{BookieError, BookieResult, StatusCode};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Turns one read request into one response
pub struct ReadEntryProcessor {
    request: ReadRequest,
    channel: Arc<dyn ResponseChannel>,
    ctx: Arc<RequestContext>,
    enqueued: Instant,
}

impl ReadEntryProcessor {
    /// Validate the request and bind it to its channel
    ///
    /// # Errors
    /// Fails on an unsupported version, a non-read opcode, or a closed channel.
    pub fn new(
        request: ReadRequest,
        channel: Arc<dyn ResponseChannel>,
        ctx: Arc<RequestContext>,
    ) -> Result<Self, ProtocolError> {
        validate_header(request.protocol_version, request.opcode, OpCode::ReadEntry)?;
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

    /// Read the entry, fencing first if asked
    ///
    /// # Errors
    /// `ChannelClosed` if an immediate response cannot be delivered.
    pub fn process_packet(self) -> Result<(), ProtocolError> {
        if !self.request.is_fencing() {
            let result = self.read();
            return self.respond(result);
        }

        let Some(master_key) = self.request.master_key.clone() else {
            return self.respond(Err(BookieError::MissingMasterKey {
                ledger_id: self.request.ledger_id,
            }));
        };

        info!("Fencing ledger {} on read", self.request.ledger_id);
        match self.ctx.bookie.fence_ledger(self.request.ledger_id, &master_key) {
            Ok(pending) => {
                tokio::spawn(async move {
                    let result = match pending.await {
                        Ok(_) => self.read(),
                        Err(e) => Err(e),
                    };
                    if let Err(e) = self.respond(result) {
                        debug!("Dropping read response: {}", e);
                    }
                });
                Ok(())
            }
            Err(e) => self.respond(Err(e)),
        }
    }

    fn read(&self) -> BookieResult<(u64, Bytes)> {
        let bookie = &self.ctx.bookie;
        let ledger_id = self.request.ledger_id;
        let entry_id = if self.request.entry_id == LAST_ADD_CONFIRMED {
            bookie
                .read_last_entry_id(ledger_id)?
                .ok_or(BookieError::NoSuchEntry {
                    ledger_id,
                    entry_id: LAST_ADD_CONFIRMED,
                })?
        } else {
            self.request.entry_id
        };
        bookie.read_entry(ledger_id, entry_id).map(|data| (entry_id, data))
    }

    fn respond(&self, result: BookieResult<(u64, Bytes)>) -> Result<(), ProtocolError> {
        let stats = if self.request.is_fencing() {
            &self.ctx.stats.fence_read
        } else {
            &self.ctx.stats.read_entry
        };
        let latency_us = u64::try_from(self.enqueued.elapsed().as_micros()).unwrap_or(u64::MAX);

        let response = match result {
            Ok((entry_id, data)) => {
                stats.record(true, latency_us, 0, data.len() as u64);
                Response::read(
                    self.request.protocol_version,
                    StatusCode::Ok,
                    self.request.ledger_id,
                    entry_id,
                    Some(data),
                )
            }
            Err(e) => {
                debug!(
                    "Read {}:{} failed: {}",
                    self.request.ledger_id, self.request.entry_id, e
                );
                stats.record(false, latency_us, 0, 0);
                Response::read(
                    self.request.protocol_version,
                    e.status_code(),
                    self.request.ledger_id,
                    self.request.entry_id,
                    None,
                )
            }
        };
        self.channel.send(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MpscResponseChannel;
    use ledgerio_common::config::BookieConfig;
    use ledgerio_common::{DigestManager, DigestType, MasterKey};
    use ledgerio_storage::{Bookie, MemoryJournal, ReadCache};

    async fn setup() -> Arc<RequestContext> {
        let bookie = Bookie::open(
            BookieConfig::default(),
            ReadCache::new(1024 * 1024, 64 * 1024),
            Arc::new(MemoryJournal::new()),
        )
        .unwrap();
        let dm = DigestManager::new(1, b"pw", DigestType::Crc32c).unwrap();
        for entry_id in 0..3 {
            bookie
                .add_entry(dm.package(entry_id, -1, 1, b"x"), false, &key())
                .unwrap()
                .await
                .unwrap();
        }
        Arc::new(RequestContext::new(Arc::new(bookie)))
    }

    fn key() -> MasterKey {
        MasterKey::new(&b"key"[..])
    }

    async fn run(request: ReadRequest, ctx: &Arc<RequestContext>) -> Response {
        let (channel, mut rx) = MpscResponseChannel::pair();
        ReadEntryProcessor::new(request, Arc::new(channel), Arc::clone(ctx))
            .unwrap()
            .process_packet()
            .unwrap();
        rx.recv().await.unwrap()
    }

    #[tokio::test]
    async fn test_read_entry() {
        let ctx = setup().await;
        let response = run(ReadRequest::new(1, 1), &ctx).await;
        assert_eq!(response.status, StatusCode::Ok);
        assert_eq!(response.entry_id, 1);
        assert!(response.data.is_some());

        let response = run(ReadRequest::new(1, 9), &ctx).await;
        assert_eq!(response.status, StatusCode::NoEntry);
        let response = run(ReadRequest::new(2, 0), &ctx).await;
        assert_eq!(response.status, StatusCode::NoLedger);
    }

    #[tokio::test]
    async fn test_read_last_entry() {
        let ctx = setup().await;
        let response = run(ReadRequest::new(1, LAST_ADD_CONFIRMED), &ctx).await;
        assert_eq!(response.status, StatusCode::Ok);
        assert_eq!(response.entry_id, 2);
    }

    #[tokio::test]
    async fn test_read_allowed_when_read_only() {
        let ctx = setup().await;
        ctx.bookie.transition_to_read_only();
        assert_eq!(run(ReadRequest::new(1, 0), &ctx).await.status, StatusCode::Ok);
    }

    #[tokio::test]
    async fn test_fencing_read() {
        let ctx = setup().await;
        let response = run(ReadRequest::new(1, LAST_ADD_CONFIRMED).fencing(key()), &ctx).await;
        assert_eq!(response.status, StatusCode::Ok);
        assert_eq!(ctx.bookie.is_fenced(1), Some(true));

        let response = run(ReadRequest::new(1, 0).fencing(MasterKey::new(&b"bad"[..])), &ctx).await;
        assert_eq!(response.status, StatusCode::Unauthorized);
    }

    #[tokio::test]
    async fn test_fencing_read_without_key() {
        let ctx = setup().await;
        let mut request = ReadRequest::new(1, 0).fencing(key());
        request.master_key = None;
        assert_eq!(run(request, &ctx).await.status, StatusCode::Unauthorized);
        assert_eq!(ctx.bookie.is_fenced(1), Some(false));
    }
}
