//! Diff objects: canonical record lists and their stored form.

use crate::decoder::parse_records;
use crate::encoder::encode_records;
use crate::error::{CodecError, CodecResult};
use crate::id::ContentHash;
use crate::record::{sort_records, ChangeRecord};
use bytes::Bytes;

/// Default zstd level for stored diffs.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// An ordered list of change records between two versions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    records: Vec<ChangeRecord>,
}

impl Diff {
    /// Builds a diff, sorting the records into canonical order.
    #[must_use]
    pub fn new(mut records: Vec<ChangeRecord>) -> Self {
        sort_records(&mut records);
        Self { records }
    }

    /// Parses an encoded diff, keeping the stored order.
    ///
    /// # Errors
    ///
    /// Returns the first parse error.
    pub fn parse(raw: &[u8]) -> CodecResult<Self> {
        Ok(Self {
            records: parse_records(raw)?,
        })
    }

    /// The records.
    #[must_use]
    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    /// Consumes the diff, returning its records.
    #[must_use]
    pub fn into_records(self) -> Vec<ChangeRecord> {
        self.records
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the diff changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Encodes the records.
    ///
    /// # Errors
    ///
    /// See [`crate::DiffEncoder::push`].
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        encode_records(&self.records)
    }

    /// Encodes and compresses the diff for storage.
    ///
    /// # Errors
    ///
    /// Returns an encoding or compression error.
    pub fn pack(&self, level: i32) -> CodecResult<PackedDiff> {
        pack(&self.encode()?, level)
    }
}

/// A diff ready for the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedDiff {
    /// Hash of the uncompressed encoding; the object's address.
    pub hash: ContentHash,
    /// Compressed bytes.
    pub data: Vec<u8>,
}

/// Compresses an encoded diff, addressing it by the hash of `raw`.
///
/// # Errors
///
/// Returns `Compression` if zstd fails.
pub fn pack(raw: &[u8], level: i32) -> CodecResult<PackedDiff> {
    let data = zstd::encode_all(raw, level).map_err(|e| CodecError::compression(e.to_string()))?;
    Ok(PackedDiff {
        hash: ContentHash::of(raw),
        data,
    })
}

/// Decompresses a stored diff.
///
/// # Errors
///
/// Returns `Compression` if the data is not a valid zstd frame.
pub fn unpack(data: &[u8]) -> CodecResult<Bytes> {
    zstd::decode_all(data)
        .map(Bytes::from)
        .map_err(|e| CodecError::compression(e.to_string()))
}

/// Decompresses a stored diff and checks it against its address.
///
/// # Errors
///
/// Returns `Compression` on bad data or if the content does not hash to
/// `expected`.
pub fn unpack_verified(data: &[u8], expected: &ContentHash) -> CodecResult<Bytes> {
    let raw = unpack(data)?;
    let actual = ContentHash::of(&raw);
    if &actual != expected {
        return Err(CodecError::compression(format!(
            "diff content hashes to {actual}, expected {expected}"
        )));
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Identifier;

    #[test]
    fn empty_diff_packs_to_hash_of_nothing() {
        let packed = Diff::default().pack(DEFAULT_COMPRESSION_LEVEL).unwrap();
        assert_eq!(packed.hash, ContentHash::of(b""));
        assert!(unpack(&packed.data).unwrap().is_empty());
    }

    #[test]
    fn packing_is_deterministic_regardless_of_input_order() {
        let a = ChangeRecord::LinkRemoved {
            dir: Identifier::ROOT,
            name: "a".into(),
        };
        let b = ChangeRecord::InodeRemoved {
            id: Identifier::from_bytes([5; 16]),
        };
        let first = Diff::new(vec![a.clone(), b.clone()]).pack(3).unwrap();
        let second = Diff::new(vec![b, a]).pack(3).unwrap();
        assert_eq!(first.hash, second.hash);
    }

    #[test]
    fn verified_unpack_detects_mismatch() {
        let packed = pack(b"l-\0x\0", 3).unwrap();
        assert!(unpack_verified(&packed.data, &packed.hash).is_ok());
        assert!(unpack_verified(&packed.data, &ContentHash::of(b"other")).is_err());
    }

    #[test]
    fn garbage_does_not_decompress() {
        assert!(matches!(
            unpack(b"not zstd"),
            Err(CodecError::Compression { .. })
        ));
    }
}
