//! Segment-ring read cache for recently written entries
//!
//! Entries are appended back-to-back into fixed-capacity segments. When the
//! current segment is full the writer moves to the next slot in ring order
//! and bumps that slot's generation, which invalidates every index entry
//! that pointed into it without touching them individually. Lookups compare
//! the recorded generation with the slot's current one under the slot's read
//! lock, so a recycled segment can never hand out torn bytes.

use bytes::Bytes;
use dashmap::DashMap;
use ledgerio_common::config::ReadCacheConfig;
use ledgerio_common::{EntryId, LedgerId};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Per-record header: ledger id, entry id, payload length
const RECORD_HEADER_LEN: usize = 8 + 8 + 4;

/// Cache statistics for monitoring
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: AtomicU64,
    /// Number of cache misses (absent or stale)
    pub misses: AtomicU64,
    /// Number of live entries dropped by segment reuse
    pub evictions: AtomicU64,
    /// Number of puts refused because the payload exceeds a segment
    pub rejected: AtomicU64,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }

    /// Reset all statistics
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct SegmentState {
    generation: u64,
    buf: Vec<u8>,
    live_entries: u64,
    live_bytes: u64,
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    segment: usize,
    offset: usize,
    len: usize,
    generation: u64,
}

#[derive(Debug, Default)]
struct WriteCursor {
    segment: usize,
    rotations: u64,
}

/// Bounded ring of segments with a generation-checked index
pub struct ReadCache {
    segments: Vec<RwLock<SegmentState>>,
    segment_size: usize,
    index: DashMap<(LedgerId, EntryId), IndexEntry>,
    cursor: Mutex<WriteCursor>,
    stats: CacheStats,
}

impl ReadCache {
    /// Create a cache holding roughly `max_cache_size` bytes
    ///
    /// The ring always has at least two segments; each segment is
    /// `max_cache_size / segment_count` bytes.
    #[must_use]
    pub fn new(max_cache_size: u64, max_segment_size: u64) -> Self {
        let max_segment_size = max_segment_size.max(1);
        let segment_count = (max_cache_size / max_segment_size).max(2);
        let segment_size = usize::try_from(max_cache_size / segment_count).unwrap_or(usize::MAX);
        let segment_count = usize::try_from(segment_count).unwrap_or(2);

        debug!(
            "Read cache: {} segments of {} bytes",
            segment_count, segment_size
        );

        Self {
            segments: (0..segment_count)
                .map(|_| RwLock::new(SegmentState::default()))
                .collect(),
            segment_size,
            index: DashMap::new(),
            cursor: Mutex::new(WriteCursor::default()),
            stats: CacheStats::default(),
        }
    }

    /// Create a cache from configuration
    #[must_use]
    pub fn from_config(config: &ReadCacheConfig) -> Self {
        Self::new(config.max_cache_size, config.max_segment_size)
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of segments in the ring
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Capacity of each segment in bytes
    #[must_use]
    pub const fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Insert an entry
    ///
    /// Returns `false` if the payload cannot fit in a single segment. A key
    /// that is already cached and valid keeps its first copy.
    pub fn put(&self, ledger_id: LedgerId, entry_id: EntryId, payload: &[u8]) -> bool {
        let record_len = RECORD_HEADER_LEN + payload.len();
        let Ok(payload_len) = u32::try_from(payload.len()) else {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        if record_len > self.segment_size {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let mut cursor = self.cursor.lock();
        if self.lookup(ledger_id, entry_id).is_some() {
            return true;
        }

        let current_len = self.segments[cursor.segment].read().buf.len();
        if current_len + record_len > self.segment_size {
            self.rotate(&mut cursor);
        }

        let segment = cursor.segment;
        let (offset, generation) = {
            let mut state = self.segments[segment].write();
            if state.buf.capacity() == 0 {
                state.buf.reserve_exact(self.segment_size);
            }
            let offset = state.buf.len() + RECORD_HEADER_LEN;
            state.buf.extend_from_slice(&ledger_id.to_be_bytes());
            state.buf.extend_from_slice(&entry_id.to_be_bytes());
            state.buf.extend_from_slice(&payload_len.to_be_bytes());
            state.buf.extend_from_slice(payload);
            state.live_entries += 1;
            state.live_bytes += u64::from(payload_len);
            (offset, state.generation)
        };

        self.index.insert(
            (ledger_id, entry_id),
            IndexEntry {
                segment,
                offset,
                len: payload.len(),
                generation,
            },
        );
        true
    }

    /// Move the writer to the next slot, recycling it
    fn rotate(&self, cursor: &mut WriteCursor) {
        let next = (cursor.segment + 1) % self.segments.len();
        {
            let mut state = self.segments[next].write();
            state.generation += 1;
            self.stats
                .evictions
                .fetch_add(state.live_entries, Ordering::Relaxed);
            state.buf.clear();
            state.live_entries = 0;
            state.live_bytes = 0;
        }
        cursor.segment = next;
        cursor.rotations += 1;

        // Drop stale index entries once per full turn of the ring
        if cursor.rotations % self.segments.len() as u64 == 0 {
            let generations: Vec<u64> = self.segments.iter().map(|s| s.read().generation).collect();
            self.index
                .retain(|_, entry| generations[entry.segment] == entry.generation);
        }
    }

    /// Copy of the index entry if it is still generation-valid
    fn lookup(&self, ledger_id: LedgerId, entry_id: EntryId) -> Option<IndexEntry> {
        let entry = self.index.get(&(ledger_id, entry_id)).map(|e| *e)?;
        let valid = self.segments[entry.segment].read().generation == entry.generation;
        if valid {
            Some(entry)
        } else {
            self.index
                .remove_if(&(ledger_id, entry_id), |_, e| e.generation == entry.generation);
            None
        }
    }

    /// Look up an entry
    pub fn get(&self, ledger_id: LedgerId, entry_id: EntryId) -> Option<Bytes> {
        let found = self.index.get(&(ledger_id, entry_id)).map(|e| *e);
        let result = found.and_then(|entry| {
            let state = self.segments[entry.segment].read();
            if state.generation != entry.generation {
                return None;
            }
            let start = entry.offset;
            let end = start + entry.len;
            state
                .buf
                .get(start..end)
                .map(Bytes::copy_from_slice)
        });

        match result {
            Some(data) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(data)
            }
            None => {
                if let Some(stale) = found {
                    self.index.remove_if(&(ledger_id, entry_id), |_, e| {
                        e.generation == stale.generation && e.segment == stale.segment
                    });
                }
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Check whether an entry is cached without copying it
    pub fn has_entry(&self, ledger_id: LedgerId, entry_id: EntryId) -> bool {
        self.lookup(ledger_id, entry_id).is_some()
    }

    /// Number of live entries
    pub fn count(&self) -> u64 {
        self.segments.iter().map(|s| s.read().live_entries).sum()
    }

    /// Sum of live payload lengths
    pub fn size(&self) -> u64 {
        self.segments.iter().map(|s| s.read().live_bytes).sum()
    }
}

impl std::fmt::Debug for ReadCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadCache")
            .field("segments", &self.segments.len())
            .field("segment_size", &self.segment_size)
            .field("indexed", &self.index.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_put_and_get() {
        let cache = ReadCache::new(100 * 1024 * 1024, 16 * 1024);

        assert!(cache.put(0, 0, b"test"));
        assert!(cache.put(1, 1, b"hello"));

        assert_eq!(cache.get(0, 0).unwrap().as_ref(), b"test");
        assert_eq!(cache.get(1, 1).unwrap().as_ref(), b"hello");
        assert_eq!(cache.count(), 2);
        assert_eq!(cache.size(), 9);
        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_miss() {
        let cache = ReadCache::new(1024 * 1024, 64 * 1024);
        assert!(cache.get(3, 4).is_none());
        assert!(!cache.has_entry(3, 4));
        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_segment_sizing() {
        let cache = ReadCache::new(100 * 1024 * 1024, 16 * 1024);
        assert_eq!(cache.segment_count(), 6400);
        assert_eq!(cache.segment_size(), 16 * 1024);

        // Never fewer than two segments
        let cache = ReadCache::new(1024, 1024 * 1024);
        assert_eq!(cache.segment_count(), 2);
        assert_eq!(cache.segment_size(), 512);
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let cache = ReadCache::new(1024, 512);
        let big = vec![7u8; 600];

        assert!(!cache.put(1, 0, &big));
        assert!(!cache.has_entry(1, 0));
        assert_eq!(cache.count(), 0);
        assert_eq!(cache.stats().rejected.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_duplicate_put_keeps_first_copy() {
        let cache = ReadCache::new(1024 * 1024, 64 * 1024);
        assert!(cache.put(5, 5, b"first"));
        assert!(cache.put(5, 5, b"second"));

        assert_eq!(cache.get(5, 5).unwrap().as_ref(), b"first");
        assert_eq!(cache.count(), 1);
        assert_eq!(cache.size(), 5);
    }

    #[test]
    fn test_ring_wrap_invalidates_segment() {
        // Two segments of 256 bytes; each record is 20 + 100 bytes
        let cache = ReadCache::new(512, 256);
        let payload = [1u8; 100];

        assert!(cache.put(1, 0, &payload));
        assert!(cache.put(1, 1, &payload));
        // Segment 1
        assert!(cache.put(1, 2, &payload));
        assert!(cache.put(1, 3, &payload));
        assert_eq!(cache.count(), 4);

        // Wraps back to segment 0, evicting entries 0 and 1
        assert!(cache.put(1, 4, &payload));

        assert!(cache.get(1, 0).is_none());
        assert!(!cache.has_entry(1, 1));
        assert!(cache.has_entry(1, 2));
        assert!(cache.has_entry(1, 3));
        assert_eq!(cache.get(1, 4).unwrap().as_ref(), &payload);
        assert_eq!(cache.count(), 3);
        assert_eq!(cache.size(), 300);
        assert_eq!(cache.stats().evictions.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_evicted_key_can_be_cached_again() {
        let cache = ReadCache::new(512, 256);
        let payload = [2u8; 100];
        for entry_id in 0..5 {
            assert!(cache.put(9, entry_id, &payload));
        }
        assert!(!cache.has_entry(9, 0));

        assert!(cache.put(9, 0, b"again"));
        assert_eq!(cache.get(9, 0).unwrap().as_ref(), b"again");
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let cache = Arc::new(ReadCache::new(64 * 1024, 4 * 1024));
        let mut handles = Vec::new();

        for ledger in 0..4u64 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for entry in 0..500u64 {
                    let payload = format!("{ledger}-{entry}");
                    cache.put(ledger, entry, payload.as_bytes());
                    // Anything returned must be exactly what was written
                    if let Some(data) = cache.get(ledger, entry / 2) {
                        assert_eq!(data.as_ref(), format!("{ledger}-{}", entry / 2).as_bytes());
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.size() <= 64 * 1024);
        assert!(cache.count() > 0);
    }
}
