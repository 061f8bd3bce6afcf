//! Explicit entry id handles

mod common;

use common::{Cluster, PASSWORD};
use ledgerio_client::{ClientError, MetadataStore};
use ledgerio_common::DigestType;

async fn adv_ledger(cluster: &Cluster) -> ledgerio_client::LedgerHandle<ledgerio_client::Explicit> {
    cluster
        .client
        .create_ledger_adv(3, 3, 2, DigestType::Crc32c, PASSWORD)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_add_entry_ids() {
    let cluster = Cluster::new(3);
    let ledger = adv_ledger(&cluster).await;

    assert!(matches!(
        ledger.add_entry(-1, b"data").await,
        Err(ClientError::InvalidEntryId(-1))
    ));
    assert_eq!(cluster.requests_served(), 0);

    assert_eq!(ledger.add_entry(0, b"data").await.unwrap(), 0);
    assert!(matches!(
        ledger.add_entry(0, b"again").await,
        Err(ClientError::DuplicateEntryId(0))
    ));

    let entries = ledger.read_async(0, 0).await.unwrap();
    assert_eq!(&entries[0].payload[..], b"data");
}

#[tokio::test]
async fn test_add_empty_entry() {
    let cluster = Cluster::new(3);
    let ledger = adv_ledger(&cluster).await;

    assert_eq!(ledger.add_entry(0, b"").await.unwrap(), 0);
    assert!(ledger.read_async(0, 0).await.unwrap()[0].payload.is_empty());
}

#[tokio::test]
async fn test_add_entry_range() {
    let cluster = Cluster::new(3);
    let ledger = adv_ledger(&cluster).await;

    assert!(matches!(
        ledger.add_entry_range(-1, b"data", 0, 4).await,
        Err(ClientError::InvalidEntryId(-1))
    ));
    assert!(matches!(
        ledger.add_entry_range(0, b"data", 0, 6).await,
        Err(ClientError::InvalidOffset { .. })
    ));
    assert!(ledger.add_entry_range(0, b"", 1, 0).await.is_err());

    assert_eq!(ledger.add_entry_range(0, b"data", 4, 0).await.unwrap(), 0);
    assert!(ledger.read_async(0, 0).await.unwrap()[0].payload.is_empty());
}

#[tokio::test]
async fn test_out_of_order_ids() {
    let cluster = Cluster::new(3);
    let ledger = adv_ledger(&cluster).await;

    assert_eq!(ledger.add_entry(1, b"second").await.unwrap(), 1);
    assert_eq!(ledger.last_add_confirmed(), -1);
    assert!(matches!(
        ledger.read_async(1, 1).await,
        Err(ClientError::ReadBeyondLastAddConfirmed { .. })
    ));

    assert_eq!(ledger.add_entry(0, b"first").await.unwrap(), 0);
    assert_eq!(ledger.last_add_confirmed(), 1);

    let entries = ledger.read_async(0, 1).await.unwrap();
    assert_eq!(&entries[0].payload[..], b"first");
    assert_eq!(&entries[1].payload[..], b"second");
}

#[tokio::test]
async fn test_failed_id_can_be_retried() {
    let cluster = Cluster::new(3);
    let ledger = adv_ledger(&cluster).await;

    cluster.bookies[0].set_available(false);
    cluster.bookies[1].set_available(false);
    assert!(ledger.add_entry(0, b"data").await.is_err());

    cluster.bookies[0].set_available(true);
    cluster.bookies[1].set_available(true);
    assert_eq!(ledger.add_entry(0, b"data").await.unwrap(), 0);
    assert_eq!(ledger.last_add_confirmed(), 0);
}

#[tokio::test]
async fn test_failed_write_does_not_grow_length() {
    let cluster = Cluster::new(1);
    let ledger = cluster
        .client
        .create_ledger_adv(1, 1, 1, DigestType::Crc32c, PASSWORD)
        .await
        .unwrap();

    cluster.bookies[0].set_available(false);
    assert!(ledger.add_entry(0, b"abc").await.is_err());
    assert_eq!(ledger.length(), 0);

    cluster.bookies[0].set_available(true);
    assert_eq!(ledger.add_entry(0, b"abc").await.unwrap(), 0);
    assert_eq!(ledger.length(), 3);

    ledger.close().await.unwrap();
    let metadata = cluster.store.read_ledger(ledger.ledger_id()).await.unwrap();
    assert_eq!(metadata.length, 3);
}
