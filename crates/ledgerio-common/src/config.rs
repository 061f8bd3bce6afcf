//! Configuration types for LedgerIO
//!
//! This module defines configuration structures used across components.

use crate::digest::DigestType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for LedgerIO
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bookie (storage node) configuration
    pub bookie: BookieConfig,
    /// Read cache configuration
    pub cache: ReadCacheConfig,
    /// Client coordinator configuration
    pub client: ClientConfig,
}

/// Bookie storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BookieConfig {
    /// Directory holding the journal file
    pub journal_dir: PathBuf,
    /// How journal writes are made durable
    pub journal_sync: JournalSyncMode,
    /// Maximum journal size before appends are refused
    pub max_journal_size: u64,
    /// Switch to read-only mode when the journal reports an I/O error
    pub read_only_on_io_error: bool,
    /// Keep admitting high-priority writes while read-only
    pub high_priority_writes_when_read_only: bool,
}

impl Default for BookieConfig {
    fn default() -> Self {
        Self {
            journal_dir: PathBuf::from("/var/lib/ledgerio/journal"),
            journal_sync: JournalSyncMode::default(),
            max_journal_size: 2 * 1024 * 1024 * 1024, // 2 GB
            read_only_on_io_error: true,
            high_priority_writes_when_read_only: true,
        }
    }
}

/// Journal durability mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalSyncMode {
    /// fsync the journal file on every flush (safest)
    #[default]
    Fsync,
    /// Flush userspace buffers only and let the OS write back
    Buffered,
}

/// Read cache configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadCacheConfig {
    /// Total bytes reserved for cached entries
    pub max_cache_size: u64,
    /// Upper bound on a single segment
    pub max_segment_size: u64,
}

impl Default for ReadCacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size: 256 * 1024 * 1024, // 256 MB
            max_segment_size: 1024 * 1024 * 1024, // 1 GB
        }
    }
}

/// Client coordinator configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Time allowed for a quorum of acknowledgements on an add
    pub add_entry_timeout_ms: u64,
    /// Time allowed for a single replica read
    pub read_entry_timeout_ms: u64,
    /// Digest applied to entries when the caller does not choose one
    pub digest_type: DigestType,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            add_entry_timeout_ms: 10_000,
            read_entry_timeout_ms: 5_000,
            digest_type: DigestType::Crc32c,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub const fn add_entry_timeout(&self) -> Duration {
        Duration::from_millis(self.add_entry_timeout_ms)
    }

    #[must_use]
    pub const fn read_entry_timeout(&self) -> Duration {
        Duration::from_millis(self.read_entry_timeout_ms)
    }
}
