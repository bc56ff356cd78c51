//! Atomic write batches and their byte encoding.

use crate::error::{StorageError, StorageResult};
use std::collections::BTreeMap;
use std::ops::Bound;

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

/// A set of puts and deletes applied atomically.
///
/// Later writes to the same key replace earlier ones, so a batch holds at
/// most one operation per key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a put.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.insert(key, Some(value));
    }

    /// Records a delete.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.insert(key, None);
    }

    /// Returns the number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if the batch holds no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Iterates operations in key order; `None` marks a delete.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], Option<&[u8]>)> {
        self.ops
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_deref()))
    }

    /// Looks up the buffered operation for `key`.
    ///
    /// `None` means the key is untouched, `Some(None)` a delete.
    #[must_use]
    pub fn lookup(&self, key: &[u8]) -> Option<Option<&[u8]>> {
        self.ops.get(key).map(Option::as_deref)
    }

    /// Iterates the operations whose keys start with `prefix`.
    pub fn scan_prefix<'a>(
        &'a self,
        prefix: &'a [u8],
    ) -> impl Iterator<Item = (&'a [u8], Option<&'a [u8]>)> + 'a {
        self.ops
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_slice(), v.as_deref()))
    }

    /// Encodes the batch.
    ///
    /// Layout: `count(4) | { op(1) | key_len(4) | key | [val_len(4) | val] }*`,
    /// integers little-endian.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.ops.len() as u32).to_le_bytes());
        for (key, value) in &self.ops {
            match value {
                Some(value) => {
                    out.push(OP_PUT);
                    write_bytes(&mut out, key);
                    write_bytes(&mut out, value);
                }
                None => {
                    out.push(OP_DELETE);
                    write_bytes(&mut out, key);
                }
            }
        }
        out
    }

    /// Decodes a batch produced by [`WriteBatch::encode`].
    ///
    /// # Errors
    ///
    /// Returns `Corrupted` on truncated input, unknown opcodes or trailing
    /// bytes.
    pub fn decode(bytes: &[u8]) -> StorageResult<Self> {
        let mut cursor = Cursor { bytes, pos: 0 };
        let count = cursor.read_u32()?;
        let mut batch = Self::new();
        for _ in 0..count {
            match cursor.read_u8()? {
                OP_PUT => {
                    let key = cursor.read_bytes()?;
                    let value = cursor.read_bytes()?;
                    batch.put(key, value);
                }
                OP_DELETE => {
                    let key = cursor.read_bytes()?;
                    batch.delete(key);
                }
                other => {
                    return Err(StorageError::corrupted(format!(
                        "unknown batch opcode {other}"
                    )))
                }
            }
        }
        if cursor.pos != bytes.len() {
            return Err(StorageError::corrupted("trailing bytes after batch"));
        }
        Ok(batch)
    }
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn take(&mut self, len: usize) -> StorageResult<&[u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| StorageError::corrupted("truncated batch"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> StorageResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> StorageResult<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn read_bytes(&mut self) -> StorageResult<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn later_write_wins() {
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"1".to_vec());
        batch.delete(b"k".to_vec());
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.iter().next(), Some((&b"k"[..], None)));
    }

    #[test]
    fn decode_rejects_truncation() {
        let mut batch = WriteBatch::new();
        batch.put(b"key".to_vec(), b"value".to_vec());
        let bytes = batch.encode();
        assert!(WriteBatch::decode(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn decode_rejects_unknown_opcode() {
        let bytes = [1, 0, 0, 0, 9, 0, 0, 0, 0];
        assert!(matches!(
            WriteBatch::decode(&bytes),
            Err(StorageError::Corrupted(_))
        ));
    }

    proptest! {
        #[test]
        fn encoding_preserves_batch(
            ops in prop::collection::vec(
                (prop::collection::vec(any::<u8>(), 0..8),
                 prop::option::of(prop::collection::vec(any::<u8>(), 0..16))),
                0..20,
            )
        ) {
            let mut batch = WriteBatch::new();
            for (key, value) in ops {
                match value {
                    Some(value) => batch.put(key, value),
                    None => batch.delete(key),
                }
            }
            prop_assert_eq!(WriteBatch::decode(&batch.encode()).unwrap(), batch);
        }
    }
}
