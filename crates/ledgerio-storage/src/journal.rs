//! Durable journal for bookie writes
//!
//! Every entry, master-key pin and fence decision is appended to the journal
//! before it is acknowledged. The file journal keeps an in-memory offset
//! index so entries can be served back after they fall out of the read
//! cache, and replays its records on open to rebuild ledger state.

use bytes::Bytes;
use dashmap::DashMap;
use ledgerio_common::config::JournalSyncMode;
use ledgerio_common::{BookieError, BookieResult, EntryId, LedgerId, MasterKey};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{error, info, warn};

/// Magic number for journal file header
const JOURNAL_MAGIC: u64 = 0x4C49_4F5F_4A52_4E4C; // "LIO_JRNL"

/// Journal file version
const JOURNAL_VERSION: u32 = 1;

/// Magic + version
const HEADER_LEN: u64 = 8 + 4;

/// seq + type + ledger + entry + data length
const RECORD_PREFIX_LEN: usize = 8 + 1 + 8 + 8 + 4;

/// Journal record kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RecordType {
    Entry = 1,
    MasterKey = 2,
    Fence = 3,
}

impl TryFrom<u8> for RecordType {
    type Error = io::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Entry),
            2 => Ok(Self::MasterKey),
            3 => Ok(Self::Fence),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid record type: {value}"),
            )),
        }
    }
}

/// A single durable journal record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    /// A stored entry (full entry bytes including header)
    Entry {
        ledger_id: LedgerId,
        entry_id: EntryId,
        data: Bytes,
    },
    /// The master key pinned for a ledger
    MasterKey {
        ledger_id: LedgerId,
        master_key: MasterKey,
    },
    /// The ledger was fenced
    Fence { ledger_id: LedgerId },
}

impl JournalRecord {
    #[must_use]
    pub const fn ledger_id(&self) -> LedgerId {
        match self {
            Self::Entry { ledger_id, .. }
            | Self::MasterKey { ledger_id, .. }
            | Self::Fence { ledger_id } => *ledger_id,
        }
    }

    fn parts(&self) -> (RecordType, LedgerId, EntryId, &[u8]) {
        match self {
            Self::Entry {
                ledger_id,
                entry_id,
                data,
            } => (RecordType::Entry, *ledger_id, *entry_id, data.as_ref()),
            Self::MasterKey {
                ledger_id,
                master_key,
            } => (RecordType::MasterKey, *ledger_id, 0, master_key.as_bytes()),
            Self::Fence { ledger_id } => (RecordType::Fence, *ledger_id, 0, &[][..]),
        }
    }

    /// Serialize with sequence number and trailing CRC32C
    fn serialize(&self, sequence: u64) -> io::Result<Vec<u8>> {
        let (record_type, ledger_id, entry_id, data) = self.parts();
        let data_len = record_data_len(data.len())?;
        let mut buf = Vec::with_capacity(RECORD_PREFIX_LEN + data.len() + 4);
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.push(record_type as u8);
        buf.extend_from_slice(&ledger_id.to_le_bytes());
        buf.extend_from_slice(&entry_id.to_le_bytes());
        buf.extend_from_slice(&data_len.to_le_bytes());
        buf.extend_from_slice(data);
        let checksum = crc32c::crc32c(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        Ok(buf)
    }

    /// Read one record, returning it with its sequence and serialized length
    ///
    /// `Ok(None)` means a clean end of file.
    fn deserialize<R: Read>(reader: &mut R) -> io::Result<Option<(u64, Self, usize)>> {
        let mut prefix = [0u8; RECORD_PREFIX_LEN];
        match reader.read_exact(&mut prefix) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }

        let sequence = u64::from_le_bytes(read_array(&prefix[0..8]));
        let record_type = RecordType::try_from(prefix[8])?;
        let ledger_id = u64::from_le_bytes(read_array(&prefix[9..17]));
        let entry_id = u64::from_le_bytes(read_array(&prefix[17..25]));
        let data_len = u32::from_le_bytes(read_array(&prefix[25..29])) as usize;

        let mut data = vec![0u8; data_len];
        reader.read_exact(&mut data)?;
        let mut crc_buf = [0u8; 4];
        reader.read_exact(&mut crc_buf)?;

        let checksum = crc32c::crc32c_append(crc32c::crc32c(&prefix), &data);
        if checksum != u32::from_le_bytes(crc_buf) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("checksum mismatch at sequence {sequence}"),
            ));
        }

        let data = Bytes::from(data);
        let record = match record_type {
            RecordType::Entry => Self::Entry {
                ledger_id,
                entry_id,
                data,
            },
            RecordType::MasterKey => Self::MasterKey {
                ledger_id,
                master_key: MasterKey::new(data),
            },
            RecordType::Fence => Self::Fence { ledger_id },
        };
        Ok(Some((sequence, record, RECORD_PREFIX_LEN + data_len + 4)))
    }
}

fn record_data_len(len: usize) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("journal record of {len} bytes is too large"),
        )
    })
}

fn read_array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}

/// Durable log the bookie appends to
///
/// `append` makes a record visible to `read_entry` immediately; it becomes
/// durable once a later `flush` returns.
pub trait Journal: Send + Sync {
    /// Append a record, returning its sequence number
    fn append(&self, record: &JournalRecord) -> BookieResult<u64>;

    /// Make every appended record durable
    fn flush(&self) -> BookieResult<()>;

    /// Fetch a previously appended entry
    fn read_entry(&self, ledger_id: LedgerId, entry_id: EntryId) -> BookieResult<Option<Bytes>>;

    /// All records in append order
    fn replay(&self) -> BookieResult<Vec<JournalRecord>>;
}

/// Location of an entry's bytes inside the journal file
#[derive(Debug, Clone, Copy)]
struct EntryLocation {
    offset: u64,
    len: usize,
}

/// Append-only journal file
pub struct FileJournal {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    reader: Mutex<File>,
    index: DashMap<(LedgerId, EntryId), EntryLocation>,
    sequence: AtomicU64,
    current_size: AtomicU64,
    max_size: u64,
    sync_mode: JournalSyncMode,
    unsynced: AtomicBool,
    /// Set after a partial write; the file tail is only repaired by reopening
    failed: AtomicBool,
    #[cfg(test)]
    torn_write_at: Mutex<Option<usize>>,
}

impl FileJournal {
    /// Journal file name inside the journal directory
    pub const FILE_NAME: &'static str = "ledgerio.journal";

    /// Create or open the journal inside `dir`
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be created, has a bad header,
    /// or cannot be scanned.
    pub fn open<P: AsRef<Path>>(
        dir: P,
        max_size: u64,
        sync_mode: JournalSyncMode,
    ) -> BookieResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(Self::FILE_NAME);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if file.metadata()?.len() == 0 {
            file.write_all(&JOURNAL_MAGIC.to_le_bytes())?;
            file.write_all(&JOURNAL_VERSION.to_le_bytes())?;
            file.sync_all()?;
        }

        let index = DashMap::new();
        let (next_sequence, valid_len) = Self::scan(&path, |offset, _, record| {
            if let JournalRecord::Entry {
                ledger_id,
                entry_id,
                data,
            } = record
            {
                index.insert(
                    (*ledger_id, *entry_id),
                    EntryLocation {
                        offset: offset + RECORD_PREFIX_LEN as u64,
                        len: data.len(),
                    },
                );
            }
        })?;

        let file_len = file.metadata()?.len();
        if valid_len < file_len {
            warn!(
                "Truncating torn journal tail at {:?}: {} -> {} bytes",
                path, file_len, valid_len
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::End(0))?;

        let reader = File::open(&path)?;

        info!(
            "Opened journal at {:?}: next_seq={}, size={}, entries={}",
            path,
            next_sequence,
            valid_len,
            index.len()
        );

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
            reader: Mutex::new(reader),
            index,
            sequence: AtomicU64::new(next_sequence),
            current_size: AtomicU64::new(valid_len),
            max_size,
            sync_mode,
            unsynced: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            #[cfg(test)]
            torn_write_at: Mutex::new(None),
        })
    }

    /// Walk every valid record, returning the next sequence and the
    /// length of the valid prefix of the file
    fn scan<F>(path: &Path, mut visit: F) -> BookieResult<(u64, u64)>
    where
        F: FnMut(u64, u64, &JournalRecord),
    {
        let mut reader = BufReader::new(File::open(path)?);

        let mut magic_buf = [0u8; 8];
        reader.read_exact(&mut magic_buf)?;
        if u64::from_le_bytes(magic_buf) != JOURNAL_MAGIC {
            return Err(BookieError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid journal magic",
            )));
        }
        let mut version_buf = [0u8; 4];
        reader.read_exact(&mut version_buf)?;
        let version = u32::from_le_bytes(version_buf);
        if version != JOURNAL_VERSION {
            return Err(BookieError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported journal version: {version}"),
            )));
        }

        let mut offset = HEADER_LEN;
        let mut next_sequence = 0;
        loop {
            match JournalRecord::deserialize(&mut reader) {
                Ok(Some((sequence, record, len))) => {
                    visit(offset, sequence, &record);
                    offset += len as u64;
                    next_sequence = sequence + 1;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Journal scan stopped at offset {}: {}", offset, e);
                    break;
                }
            }
        }
        Ok((next_sequence, offset))
    }

    /// Path of the journal file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current journal size in bytes
    #[must_use]
    pub fn size(&self) -> u64 {
        self.current_size.load(Ordering::SeqCst)
    }

    /// Whether a partial write left the journal unusable until reopened
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn check_failed(&self) -> BookieResult<()> {
        if self.is_failed() {
            return Err(BookieError::Io(io::Error::other(format!(
                "journal {:?} failed after a partial write",
                self.path
            ))));
        }
        Ok(())
    }

    #[cfg(not(test))]
    #[allow(clippy::unused_self)]
    fn write_record(&self, writer: &mut BufWriter<File>, data: &[u8]) -> io::Result<()> {
        writer.write_all(data)
    }

    #[cfg(test)]
    fn write_record(&self, writer: &mut BufWriter<File>, data: &[u8]) -> io::Result<()> {
        let Some(at) = self.torn_write_at.lock().take() else {
            return writer.write_all(data);
        };
        writer.write_all(&data[..at.min(data.len())])?;
        writer.flush()?;
        Err(io::Error::other("injected torn write"))
    }
}

impl Journal for FileJournal {
    fn append(&self, record: &JournalRecord) -> BookieResult<u64> {
        let mut writer = self.writer.lock();
        self.check_failed()?;
        let sequence = self.sequence.load(Ordering::SeqCst);
        let data = record.serialize(sequence)?;
        let offset = self.current_size.load(Ordering::SeqCst);

        if offset + data.len() as u64 > self.max_size {
            return Err(BookieError::Io(io::Error::other(format!(
                "journal full: {} of {} bytes used",
                offset, self.max_size
            ))));
        }

        if let Err(e) = self.write_record(&mut writer, &data) {
            // part of the record may already be in the file
            self.failed.store(true, Ordering::SeqCst);
            error!("Journal {:?} write failed at offset {}: {}", self.path, offset, e);
            return Err(e.into());
        }
        self.current_size.fetch_add(data.len() as u64, Ordering::SeqCst);
        self.sequence.fetch_add(1, Ordering::SeqCst);
        self.unsynced.store(true, Ordering::SeqCst);

        if let JournalRecord::Entry {
            ledger_id,
            entry_id,
            data,
        } = record
        {
            self.index.insert(
                (*ledger_id, *entry_id),
                EntryLocation {
                    offset: offset + RECORD_PREFIX_LEN as u64,
                    len: data.len(),
                },
            );
        }

        Ok(sequence)
    }

    fn flush(&self) -> BookieResult<()> {
        let mut writer = self.writer.lock();
        self.check_failed()?;
        // Another caller already covered everything appended so far
        if !self.unsynced.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let result = writer.flush().and_then(|()| match self.sync_mode {
            JournalSyncMode::Fsync => writer.get_ref().sync_data(),
            JournalSyncMode::Buffered => Ok(()),
        });
        if let Err(e) = result {
            self.unsynced.store(true, Ordering::SeqCst);
            return Err(e.into());
        }
        Ok(())
    }

    fn read_entry(&self, ledger_id: LedgerId, entry_id: EntryId) -> BookieResult<Option<Bytes>> {
        let Some(location) = self.index.get(&(ledger_id, entry_id)).map(|l| *l) else {
            return Ok(None);
        };

        // Buffered bytes must reach the file before it can be read back
        self.writer.lock().flush()?;

        let mut reader = self.reader.lock();
        reader.seek(SeekFrom::Start(location.offset))?;
        let mut data = vec![0u8; location.len];
        reader.read_exact(&mut data)?;
        Ok(Some(Bytes::from(data)))
    }

    fn replay(&self) -> BookieResult<Vec<JournalRecord>> {
        self.writer.lock().flush()?;
        let mut records = Vec::new();
        Self::scan(&self.path, |_, _, record| records.push(record.clone()))?;
        info!("Replayed {} journal records from {:?}", records.len(), self.path);
        Ok(records)
    }
}

/// In-memory journal with fault injection, used by tests and benchmarks
#[derive(Debug, Default)]
pub struct MemoryJournal {
    records: Mutex<Vec<JournalRecord>>,
    synced: AtomicU64,
    flushes: AtomicU64,
    fail_append: AtomicBool,
    fail_flush: AtomicBool,
}

impl MemoryJournal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent appends fail with an I/O error
    pub fn set_fail_append(&self, fail: bool) {
        self.fail_append.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent flushes fail with an I/O error
    pub fn set_fail_flush(&self, fail: bool) {
        self.fail_flush.store(fail, Ordering::SeqCst);
    }

    /// Number of appended records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Number of records covered by a successful flush
    pub fn synced(&self) -> u64 {
        self.synced.load(Ordering::SeqCst)
    }

    /// Number of successful flushes
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Snapshot of the appended records
    pub fn records(&self) -> Vec<JournalRecord> {
        self.records.lock().clone()
    }
}

impl Journal for MemoryJournal {
    fn append(&self, record: &JournalRecord) -> BookieResult<u64> {
        if self.fail_append.load(Ordering::SeqCst) {
            return Err(BookieError::Io(io::Error::other("injected append failure")));
        }
        let mut records = self.records.lock();
        records.push(record.clone());
        Ok(records.len() as u64 - 1)
    }

    fn flush(&self) -> BookieResult<()> {
        if self.fail_flush.load(Ordering::SeqCst) {
            return Err(BookieError::Io(io::Error::other("injected flush failure")));
        }
        let len = self.records.lock().len() as u64;
        self.synced.store(len, Ordering::SeqCst);
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_entry(&self, ledger_id: LedgerId, entry_id: EntryId) -> BookieResult<Option<Bytes>> {
        let records = self.records.lock();
        Ok(records.iter().find_map(|record| match record {
            JournalRecord::Entry {
                ledger_id: l,
                entry_id: e,
                data,
            } if *l == ledger_id && *e == entry_id => Some(data.clone()),
            _ => None,
        }))
    }

    fn replay(&self) -> BookieResult<Vec<JournalRecord>> {
        Ok(self.records())
    }
}
