//! In-process ensemble shared by the integration tests

#![allow(dead_code)]

use ledgerio_client::{BookieClient, Client, InMemoryMetadataStore, LocalBookieClient};
use ledgerio_common::config::{BookieConfig, ClientConfig};
use ledgerio_common::{EntryId, LedgerId};
use ledgerio_proto::RequestContext;
use ledgerio_storage::{Bookie, MemoryJournal, ReadCache};
use std::sync::Arc;
use std::time::Duration;

pub const PASSWORD: &[u8] = b"password";

pub struct Cluster {
    pub client: Client,
    pub store: Arc<InMemoryMetadataStore>,
    pub bookies: Vec<Arc<LocalBookieClient>>,
}

impl Cluster {
    pub fn new(size: usize) -> Self {
        let store = Arc::new(InMemoryMetadataStore::new());
        let config = ClientConfig {
            add_entry_timeout_ms: 2000,
            read_entry_timeout_ms: 2000,
            ..ClientConfig::default()
        };
        let client = Client::new(config, Arc::clone(&store) as _);

        let bookies: Vec<_> = (0..size)
            .map(|i| {
                let bookie = Bookie::open(
                    BookieConfig::default(),
                    ReadCache::new(4 * 1024 * 1024, 256 * 1024),
                    Arc::new(MemoryJournal::new()),
                )
                .unwrap();
                Arc::new(LocalBookieClient::new(
                    format!("bookie-{i}"),
                    Arc::new(RequestContext::new(Arc::new(bookie))),
                ))
            })
            .collect();
        for bookie in &bookies {
            client.register_bookie(Arc::clone(bookie) as Arc<dyn BookieClient>);
        }

        Self {
            client,
            store,
            bookies,
        }
    }

    /// A second client sharing the same bookies and metadata
    pub fn another_client(&self) -> Client {
        let client = Client::new(self.client.config().clone(), Arc::clone(&self.store) as _);
        for bookie in &self.bookies {
            client.register_bookie(Arc::clone(bookie) as Arc<dyn BookieClient>);
        }
        client
    }

    pub fn bookie(&self, id: &str) -> &Arc<LocalBookieClient> {
        self.bookies
            .iter()
            .find(|b| b.id().as_str() == id)
            .unwrap()
    }

    /// Requests served across all bookies
    pub fn requests_served(&self) -> u64 {
        self.bookies
            .iter()
            .map(|b| {
                let stats = &b.context().stats;
                stats.add_entry.requests_total.load(std::sync::atomic::Ordering::Relaxed)
                    + stats.read_entry.requests_total.load(std::sync::atomic::Ordering::Relaxed)
                    + stats.fence_read.requests_total.load(std::sync::atomic::Ordering::Relaxed)
            })
            .sum()
    }
}

/// Wait for a detached replica write to land on a bookie
pub async fn wait_for_entry(bookie: &LocalBookieClient, ledger_id: LedgerId, entry_id: EntryId) {
    for _ in 0..200 {
        if bookie.context().bookie.read_entry(ledger_id, entry_id).is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("entry {ledger_id}:{entry_id} never reached {}", bookie.id());
}
