//! Entry digests for LedgerIO
//!
//! Every entry a client writes is packaged as a fixed header, a digest over
//! the header and payload, and the payload itself. Bookies never look past
//! the id prefix; readers verify the digest before handing data back.

use crate::types::{ENTRY_HEADER_LEN, EntryHeader, EntryId, LedgerId};
use bytes::{BufMut, Bytes, BytesMut};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Digest algorithm applied to ledger entries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestType {
    /// CRC32C over header and payload
    #[default]
    Crc32c,
    /// HMAC-SHA256 keyed by the ledger password
    Mac,
    /// No integrity check
    Dummy,
}

impl DigestType {
    /// Size in bytes of the digest field
    #[must_use]
    pub const fn digest_len(self) -> usize {
        match self {
            Self::Crc32c => 4,
            Self::Mac => 32,
            Self::Dummy => 0,
        }
    }
}

/// Errors detected while unpacking an entry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigestError {
    #[error("entry too short: {len} bytes")]
    TooShort { len: usize },

    #[error("ledger id mismatch: expected {expected}, found {actual}")]
    LedgerMismatch { expected: LedgerId, actual: LedgerId },

    #[error("entry id mismatch: expected {expected}, found {actual}")]
    EntryMismatch { expected: EntryId, actual: EntryId },

    #[error("digest mismatch for entry {entry_id}")]
    DigestMismatch { entry_id: EntryId },

    #[error("invalid mac key")]
    InvalidKey,
}

/// Verified contents of an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackedEntry {
    pub entry_id: EntryId,
    pub last_add_confirmed: i64,
    pub length: u64,
    pub payload: Bytes,
}

/// Packs and verifies entries for a single ledger
#[derive(Clone)]
pub struct DigestManager {
    ledger_id: LedgerId,
    digest_type: DigestType,
    mac: Option<HmacSha256>,
}

impl std::fmt::Debug for DigestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestManager")
            .field("ledger_id", &self.ledger_id)
            .field("digest_type", &self.digest_type)
            .finish_non_exhaustive()
    }
}

impl DigestManager {
    /// Create a digest manager for a ledger
    ///
    /// # Errors
    /// Returns `DigestError::InvalidKey` if the MAC cannot be keyed.
    pub fn new(
        ledger_id: LedgerId,
        password: &[u8],
        digest_type: DigestType,
    ) -> Result<Self, DigestError> {
        let mac = match digest_type {
            DigestType::Mac => {
                let mut hasher = Sha256::new();
                hasher.update(b"mac");
                hasher.update(password);
                let key = hasher.finalize();
                Some(HmacSha256::new_from_slice(&key).map_err(|_| DigestError::InvalidKey)?)
            }
            DigestType::Crc32c | DigestType::Dummy => None,
        };

        Ok(Self {
            ledger_id,
            digest_type,
            mac,
        })
    }

    #[must_use]
    pub const fn ledger_id(&self) -> LedgerId {
        self.ledger_id
    }

    #[must_use]
    pub const fn digest_type(&self) -> DigestType {
        self.digest_type
    }

    fn compute(&self, header: &[u8], payload: &[u8]) -> Vec<u8> {
        match (self.digest_type, &self.mac) {
            (DigestType::Mac, Some(mac)) => {
                let mut mac = mac.clone();
                mac.update(header);
                mac.update(payload);
                mac.finalize().into_bytes().to_vec()
            }
            (DigestType::Crc32c, _) => {
                let crc = crc32c::crc32c_append(crc32c::crc32c(header), payload);
                crc.to_be_bytes().to_vec()
            }
            _ => Vec::new(),
        }
    }

    /// Build the stored form of an entry
    ///
    /// `length` is the total ledger length including this entry.
    #[must_use]
    pub fn package(
        &self,
        entry_id: EntryId,
        last_add_confirmed: i64,
        length: u64,
        payload: &[u8],
    ) -> Bytes {
        let header = EntryHeader {
            ledger_id: self.ledger_id,
            entry_id,
            last_add_confirmed,
            length,
        }
        .to_bytes();
        let digest = self.compute(&header, payload);

        let mut buf = BytesMut::with_capacity(header.len() + digest.len() + payload.len());
        buf.put_slice(&header);
        buf.put_slice(&digest);
        buf.put_slice(payload);
        buf.freeze()
    }

    /// Verify a stored entry and strip its header
    ///
    /// # Errors
    /// Returns an error if the entry is truncated, belongs to another ledger or
    /// entry, or its digest does not match.
    pub fn verify_and_unpack(
        &self,
        expected_entry_id: EntryId,
        data: &Bytes,
    ) -> Result<UnpackedEntry, DigestError> {
        let digest_len = self.digest_type.digest_len();
        let header = EntryHeader::parse(data).ok_or(DigestError::TooShort { len: data.len() })?;
        if data.len() < ENTRY_HEADER_LEN + digest_len {
            return Err(DigestError::TooShort { len: data.len() });
        }
        if header.ledger_id != self.ledger_id {
            return Err(DigestError::LedgerMismatch {
                expected: self.ledger_id,
                actual: header.ledger_id,
            });
        }
        if header.entry_id != expected_entry_id {
            return Err(DigestError::EntryMismatch {
                expected: expected_entry_id,
                actual: header.entry_id,
            });
        }

        let stored = &data[ENTRY_HEADER_LEN..ENTRY_HEADER_LEN + digest_len];
        let payload = data.slice(ENTRY_HEADER_LEN + digest_len..);
        let valid = match (self.digest_type, &self.mac) {
            (DigestType::Mac, Some(mac)) => {
                let mut mac = mac.clone();
                mac.update(&data[..ENTRY_HEADER_LEN]);
                mac.update(&payload);
                mac.verify_slice(stored).is_ok()
            }
            _ => self.compute(&data[..ENTRY_HEADER_LEN], &payload) == stored,
        };
        if !valid {
            return Err(DigestError::DigestMismatch {
                entry_id: header.entry_id,
            });
        }

        Ok(UnpackedEntry {
            entry_id: header.entry_id,
            last_add_confirmed: header.last_add_confirmed,
            length: header.length,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn random_payload(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut data);
        data
    }

    #[test]
    fn test_package_layout() {
        let dm = DigestManager::new(9, b"pw", DigestType::Crc32c).unwrap();
        let entry = dm.package(3, 2, 5, b"hello");

        assert_eq!(entry.len(), ENTRY_HEADER_LEN + 4 + 5);
        assert_eq!(EntryHeader::parse_ids(&entry), Some((9, 3)));
        assert_eq!(&entry[entry.len() - 5..], b"hello");
    }

    #[test]
    fn test_verify_each_digest_type() {
        let payload = random_payload(1024);
        for digest_type in [DigestType::Crc32c, DigestType::Mac, DigestType::Dummy] {
            let dm = DigestManager::new(1, b"secret", digest_type).unwrap();
            let entry = dm.package(0, -1, 1024, &payload);
            let unpacked = dm.verify_and_unpack(0, &entry).unwrap();
            assert_eq!(unpacked.payload.as_ref(), payload.as_slice());
            assert_eq!(unpacked.last_add_confirmed, -1);
            assert_eq!(unpacked.length, 1024);
        }
    }

    #[test]
    fn test_corruption_detected() {
        let dm = DigestManager::new(1, b"secret", DigestType::Crc32c).unwrap();
        let entry = dm.package(4, 3, 10, b"payload");
        let mut corrupted = entry.to_vec();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xff;

        let err = dm.verify_and_unpack(4, &Bytes::from(corrupted)).unwrap_err();
        assert_eq!(err, DigestError::DigestMismatch { entry_id: 4 });
    }

    #[test]
    fn test_wrong_password_rejected() {
        let writer = DigestManager::new(1, b"secret", DigestType::Mac).unwrap();
        let reader = DigestManager::new(1, b"guess", DigestType::Mac).unwrap();
        let entry = writer.package(0, -1, 4, b"data");
        assert!(matches!(
            reader.verify_and_unpack(0, &entry),
            Err(DigestError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn test_id_mismatch() {
        let dm = DigestManager::new(1, b"", DigestType::Dummy).unwrap();
        let other = DigestManager::new(2, b"", DigestType::Dummy).unwrap();
        let entry = dm.package(5, 4, 1, b"x");

        assert!(matches!(
            dm.verify_and_unpack(6, &entry),
            Err(DigestError::EntryMismatch {
                expected: 6,
                actual: 5
            })
        ));
        assert!(matches!(
            other.verify_and_unpack(5, &entry),
            Err(DigestError::LedgerMismatch { .. })
        ));
        assert!(matches!(
            dm.verify_and_unpack(5, &Bytes::from_static(b"tiny")),
            Err(DigestError::TooShort { len: 4 })
        ));
    }
}
