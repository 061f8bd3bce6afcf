//! LedgerIO Bench - Workload driver
//!
//! Stands up an ensemble of in-process bookies, writes ledgers through the
//! client coordinator, reads them back and reports throughput and request
//! statistics.

use anyhow::{Context, Result, bail};
use clap::Parser;
use ledgerio_client::{
    BookieClient, Client, InMemoryMetadataStore, LedgerHandle, LocalBookieClient, Sequential,
};
use ledgerio_common::config::BookieConfig;
use ledgerio_common::{Config, DigestType};
use ledgerio_proto::RequestContext;
use ledgerio_storage::{Bookie, MemoryJournal, ReadCache};
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ledgerio-bench")]
#[command(about = "LedgerIO in-process workload driver")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/ledgerio/bench.toml")]
    config: String,

    /// Number of bookies to start
    #[arg(long, default_value = "3")]
    bookies: usize,

    /// Number of ledgers written concurrently
    #[arg(long, default_value = "4")]
    ledgers: usize,

    /// Entries per ledger
    #[arg(long, default_value = "1000")]
    entries: usize,

    /// Payload size in bytes
    #[arg(long, default_value = "1024")]
    entry_size: usize,

    #[arg(long, default_value = "3")]
    ensemble: usize,

    #[arg(long, default_value = "3")]
    write_quorum: usize,

    #[arg(long, default_value = "2")]
    ack_quorum: usize,

    /// Digest type (crc32c, mac, dummy)
    #[arg(long)]
    digest: Option<String>,

    /// Journal directory; each bookie uses a subdirectory. In-memory
    /// journals are used when unset.
    #[arg(long)]
    journal_dir: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print per-bookie request stats in Prometheus format
    #[arg(long)]
    stats: bool,
}

fn parse_digest(name: &str) -> Result<DigestType> {
    Ok(match name.to_ascii_lowercase().as_str() {
        "crc32c" => DigestType::Crc32c,
        "mac" => DigestType::Mac,
        "dummy" => DigestType::Dummy,
        other => bail!("unknown digest type: {other}"),
    })
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config: Config = if std::path::Path::new(&args.config).exists() {
        let config_str = std::fs::read_to_string(&args.config)
            .with_context(|| format!("reading {}", args.config))?;
        toml::from_str(&config_str).unwrap_or_else(|e| {
            eprintln!("Warning: Failed to parse config file: {}", e);
            Config::default()
        })
    } else {
        Config::default()
    };

    // CLI overrides the file
    if let Some(dir) = &args.journal_dir {
        config.bookie.journal_dir.clone_from(dir);
    }
    if let Some(digest) = &args.digest {
        config.client.digest_type = parse_digest(digest)?;
    }
    Ok(config)
}

fn start_bookie(
    config: &Config,
    index: usize,
    file_backed: bool,
) -> Result<Arc<LocalBookieClient>> {
    let id = format!("bookie-{index}");
    let bookie = if file_backed {
        let bookie_config = BookieConfig {
            journal_dir: config.bookie.journal_dir.join(&id),
            ..config.bookie.clone()
        };
        Bookie::open_file_backed(bookie_config, &config.cache)?
    } else {
        Bookie::open(
            config.bookie.clone(),
            ReadCache::from_config(&config.cache),
            Arc::new(MemoryJournal::new()),
        )?
    };
    info!("Started {} with {} ledgers", id, bookie.ledger_count());
    Ok(Arc::new(LocalBookieClient::new(
        id,
        Arc::new(RequestContext::new(Arc::new(bookie))),
    )))
}

async fn write_ledger(
    ledger: LedgerHandle<Sequential>,
    payload: Arc<Vec<u8>>,
    entries: usize,
) -> Result<()> {
    for _ in 0..entries {
        ledger.add_entry(&payload).await?;
    }
    ledger.close().await?;
    Ok(())
}

async fn verify_ledger(
    client: &Client,
    ledger_id: u64,
    password: &[u8],
    payload: &[u8],
) -> Result<usize> {
    let ledger = client.open_ledger(ledger_id, password).await?;
    let last = ledger.last_add_confirmed();
    let mut first = 0;
    let mut verified = 0;
    while first <= last {
        let end = (first + 99).min(last);
        for entry in ledger.read_async(first, end).await? {
            if entry.payload.as_ref() == payload {
                verified += 1;
            } else {
                warn!("Entry {}:{} does not match", ledger_id, entry.entry_id);
            }
        }
        first = end + 1;
    }
    Ok(verified)
}

#[allow(clippy::cast_precision_loss)]
fn report(phase: &str, entries: usize, bytes: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    println!(
        "{phase:<6} {entries} entries in {:.3}s: {:.0} entries/s, {:.2} MiB/s",
        secs,
        entries as f64 / secs,
        bytes as f64 / secs / (1024.0 * 1024.0)
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting LedgerIO bench");
    if args.entries == 0 || args.ledgers == 0 {
        bail!("nothing to do: ledgers and entries must be positive");
    }

    let bookies = (0..args.bookies)
        .map(|i| start_bookie(&config, i, args.journal_dir.is_some()))
        .collect::<Result<Vec<_>>>()?;

    let store = Arc::new(InMemoryMetadataStore::new());
    let client = Client::new(config.client.clone(), Arc::clone(&store) as _);
    for bookie in &bookies {
        client.register_bookie(Arc::clone(bookie) as Arc<dyn BookieClient>);
    }

    let password = b"ledgerio-bench";
    let mut payload = vec![0u8; args.entry_size];
    rand::thread_rng().fill(&mut payload[..]);
    let payload = Arc::new(payload);

    let mut ledgers = Vec::with_capacity(args.ledgers);
    for _ in 0..args.ledgers {
        ledgers.push(
            client
                .create_ledger(
                    args.ensemble,
                    args.write_quorum,
                    args.ack_quorum,
                    config.client.digest_type,
                    password,
                )
                .await?,
        );
    }
    let ledger_ids: Vec<u64> = ledgers.iter().map(LedgerHandle::ledger_id).collect();

    let total_entries = args.ledgers * args.entries;
    let total_bytes = total_entries * args.entry_size;

    let start = Instant::now();
    let writers = ledgers.into_iter().map(|ledger| {
        let payload = Arc::clone(&payload);
        tokio::spawn(write_ledger(ledger, payload, args.entries))
    });
    for result in futures::future::join_all(writers).await {
        result??;
    }
    report("write", total_entries, total_bytes, start.elapsed());

    let start = Instant::now();
    let mut verified = 0;
    for ledger_id in &ledger_ids {
        verified += verify_ledger(&client, *ledger_id, password, &payload).await?;
    }
    report("read", verified, verified * args.entry_size, start.elapsed());
    if verified != total_entries {
        bail!("verified {verified} of {total_entries} entries");
    }

    println!("{}", store.dump_json()?);
    if args.stats {
        for bookie in &bookies {
            print!(
                "{}",
                bookie
                    .context()
                    .stats
                    .export_prometheus(bookie.id().as_str())
            );
        }
    }

    info!("LedgerIO bench finished");
    Ok(())
}
