//! Client-side handle to a single bookie
//!
//! `BookieClient` is the seam to the network. `LocalBookieClient` drives an
//! in-process bookie through the same admission processors a server would.

use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use bytes::Bytes;
use ledgerio_common::{BookieId, EntryId, LedgerId, MasterKey, StatusCode};
use ledgerio_proto::{
    Flags, LAST_ADD_CONFIRMED, MpscResponseChannel, ParsedAddRequest, ReadRequest, Request,
    RequestContext, Response, process_request,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Operations the coordinator sends to a bookie
#[async_trait]
pub trait BookieClient: Send + Sync {
    /// Identity of the bookie
    fn id(&self) -> &BookieId;

    /// Store a packaged entry
    async fn add_entry(
        &self,
        ledger_id: LedgerId,
        entry_id: EntryId,
        master_key: MasterKey,
        data: Bytes,
        flags: Flags,
    ) -> ClientResult<()>;

    /// Fetch a packaged entry
    async fn read_entry(&self, ledger_id: LedgerId, entry_id: EntryId) -> ClientResult<Bytes>;

    /// Fence the ledger, then fetch the last entry stored on this bookie
    ///
    /// `None` if the bookie holds no entries for the ledger.
    async fn fence_and_read_last(
        &self,
        ledger_id: LedgerId,
        master_key: MasterKey,
    ) -> ClientResult<Option<Bytes>>;
}

/// Bookie client for a bookie running in this process
pub struct LocalBookieClient {
    id: BookieId,
    ctx: Arc<RequestContext>,
    available: AtomicBool,
}

impl LocalBookieClient {
    #[must_use]
    pub fn new(id: impl Into<BookieId>, ctx: Arc<RequestContext>) -> Self {
        Self {
            id: id.into(),
            ctx,
            available: AtomicBool::new(true),
        }
    }

    /// The request context of the underlying bookie
    #[must_use]
    pub const fn context(&self) -> &Arc<RequestContext> {
        &self.ctx
    }

    /// Simulate losing or regaining the connection
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    async fn roundtrip(&self, request: Request) -> ClientResult<Response> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(ClientError::BookieUnavailable(self.id.clone()));
        }
        let (channel, mut rx) = MpscResponseChannel::pair();
        process_request(request, Arc::new(channel), Arc::clone(&self.ctx))
            .map_err(|e| ClientError::Interrupted(format!("{}: {e}", self.id)))?;
        rx.recv()
            .await
            .ok_or_else(|| ClientError::Interrupted(format!("{}: no response", self.id)))
    }
}

#[async_trait]
impl BookieClient for LocalBookieClient {
    fn id(&self) -> &BookieId {
        &self.id
    }

    async fn add_entry(
        &self,
        ledger_id: LedgerId,
        entry_id: EntryId,
        master_key: MasterKey,
        data: Bytes,
        flags: Flags,
    ) -> ClientResult<()> {
        let request =
            ParsedAddRequest::new(ledger_id, entry_id, master_key, data).with_flags(flags);
        let response = self.roundtrip(Request::Add(request)).await?;
        match response.status {
            StatusCode::Ok => Ok(()),
            status => {
                debug!(
                    "Bookie {} rejected add {}:{}: {}",
                    self.id, ledger_id, entry_id, status
                );
                Err(ClientError::from_status(&self.id, ledger_id, entry_id, status))
            }
        }
    }

    async fn read_entry(&self, ledger_id: LedgerId, entry_id: EntryId) -> ClientResult<Bytes> {
        let response = self
            .roundtrip(Request::Read(ReadRequest::new(ledger_id, entry_id)))
            .await?;
        match (response.status, response.data) {
            (StatusCode::Ok, Some(data)) => Ok(data),
            (StatusCode::Ok, None) => Err(ClientError::Bookie {
                bookie: self.id.clone(),
                status: StatusCode::IoError,
            }),
            (status, _) => Err(ClientError::from_status(&self.id, ledger_id, entry_id, status)),
        }
    }

    async fn fence_and_read_last(
        &self,
        ledger_id: LedgerId,
        master_key: MasterKey,
    ) -> ClientResult<Option<Bytes>> {
        let request = ReadRequest::new(ledger_id, LAST_ADD_CONFIRMED).fencing(master_key);
        let response = self.roundtrip(Request::Read(request)).await?;
        match (response.status, response.data) {
            (StatusCode::Ok, data) => Ok(data),
            (StatusCode::NoEntry, _) => Ok(None),
            (status, _) => Err(ClientError::from_status(
                &self.id,
                ledger_id,
                LAST_ADD_CONFIRMED,
                status,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerio_common::config::BookieConfig;
    use ledgerio_common::{DigestManager, DigestType};
    use ledgerio_storage::{Bookie, MemoryJournal, ReadCache};

    fn local(id: &str) -> LocalBookieClient {
        let bookie = Bookie::open(
            BookieConfig::default(),
            ReadCache::new(1024 * 1024, 64 * 1024),
            Arc::new(MemoryJournal::new()),
        )
        .unwrap();
        LocalBookieClient::new(id, Arc::new(RequestContext::new(Arc::new(bookie))))
    }

    #[tokio::test]
    async fn test_add_read_fence() {
        let client = local("b1");
        let key = MasterKey::from_password(b"pw");
        let dm = DigestManager::new(5, b"pw", DigestType::Crc32c).unwrap();
        let data = dm.package(0, -1, 3, b"abc");

        client
            .add_entry(5, 0, key.clone(), data.clone(), Flags::NONE)
            .await
            .unwrap();
        assert_eq!(client.read_entry(5, 0).await.unwrap(), data);
        assert!(matches!(
            client.read_entry(5, 1).await,
            Err(ClientError::NoSuchEntry { ledger_id: 5, entry_id: 1 })
        ));

        assert_eq!(client.fence_and_read_last(5, key.clone()).await.unwrap(), Some(data));
        let err = client
            .add_entry(5, 1, key, dm.package(1, 0, 6, b"def"), Flags::NONE)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::LedgerFenced { ledger_id: 5 }));
    }

    #[tokio::test]
    async fn test_fence_empty_ledger() {
        let client = local("b1");
        let last = client
            .fence_and_read_last(8, MasterKey::from_password(b"pw"))
            .await
            .unwrap();
        assert!(last.is_none());
    }

    #[tokio::test]
    async fn test_unavailable() {
        let client = local("b1");
        client.set_available(false);
        assert!(matches!(
            client.read_entry(1, 0).await,
            Err(ClientError::BookieUnavailable(_))
        ));
    }
}
