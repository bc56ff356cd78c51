//! Key layout of the versioned store.
//!
//! Every key starts with a one-byte table tag. Versions are big-endian so
//! keys of one record sort by `vmin`.
//!
//! ```text
//! i | id(16) | vmin(8)                        -> InodeValue
//! l | dir(16) | name | 0x00 | vmin(8)         -> LinkValue
//! k | inode(16) | dir(16) | name | 0x00 | vmin -> vmax        (reverse index)
//! h | version(8)                              -> HistoryEntry
//! t | version(8) | key                        -> value
//! s | id(16)                                  -> staged content bytes
//! r | dir(16) | name | 0x00                   -> renamed name (merge session)
//! m | name                                    -> meta value
//! j                                           -> journal entry
//! ```

use crate::error::{CoreError, CoreResult};
use crate::types::Version;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use versync_codec::{Identifier, InodeAttrs};

pub(crate) const INODE: u8 = b'i';
pub(crate) const LINK: u8 = b'l';
pub(crate) const BACKLINK: u8 = b'k';
pub(crate) const HISTORY: u8 = b'h';
pub(crate) const TAG: u8 = b't';
pub(crate) const STAGED: u8 = b's';
pub(crate) const RENAME: u8 = b'r';
pub(crate) const META: u8 = b'm';
pub(crate) const JOURNAL: &[u8] = b"j";

const NAME_END: u8 = 0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct InodeValue {
    pub vmax: Version,
    pub attrs: InodeAttrs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LinkValue {
    pub vmax: Version,
    pub inode: Identifier,
}

pub(crate) fn to_cbor<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| CoreError::serialization(e.to_string()))?;
    Ok(out)
}

pub(crate) fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::serialization(e.to_string()))
}

fn bad_key(table: &str, key: &[u8]) -> CoreError {
    CoreError::consistency(format!("malformed {table} key of {} bytes", key.len()))
}

fn read_id(bytes: &[u8]) -> Option<Identifier> {
    Identifier::from_slice(bytes.get(..16)?)
}

fn read_version(bytes: &[u8]) -> Option<Version> {
    let raw: [u8; 8] = bytes.try_into().ok()?;
    Some(Version::from_be_bytes(raw))
}

/// Splits `name | 0x00 | vmin(8)`.
fn read_name_version(bytes: &[u8]) -> Option<(String, Version)> {
    if bytes.len() < 9 {
        return None;
    }
    let (name, rest) = bytes.split_at(bytes.len() - 9);
    if rest[0] != NAME_END {
        return None;
    }
    let name = String::from_utf8(name.to_vec()).ok()?;
    Some((name, read_version(&rest[1..])?))
}

pub(crate) fn bucket_prefix(table: u8, bucket: u8) -> Vec<u8> {
    vec![table, bucket]
}

pub(crate) fn inode_prefix(id: &Identifier) -> Vec<u8> {
    let mut key = Vec::with_capacity(25);
    key.push(INODE);
    key.extend_from_slice(id.as_bytes());
    key
}

pub(crate) fn inode_key(id: &Identifier, vmin: Version) -> Vec<u8> {
    let mut key = inode_prefix(id);
    key.extend_from_slice(&vmin.to_be_bytes());
    key
}

pub(crate) fn parse_inode_key(key: &[u8]) -> CoreResult<(Identifier, Version)> {
    (|| {
        if key.len() != 25 || key[0] != INODE {
            return None;
        }
        Some((read_id(&key[1..])?, read_version(&key[17..])?))
    })()
    .ok_or_else(|| bad_key("inode", key))
}

pub(crate) fn link_dir_prefix(dir: &Identifier) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.push(LINK);
    key.extend_from_slice(dir.as_bytes());
    key
}

pub(crate) fn link_name_prefix(dir: &Identifier, name: &str) -> Vec<u8> {
    let mut key = link_dir_prefix(dir);
    key.extend_from_slice(name.as_bytes());
    key.push(NAME_END);
    key
}

pub(crate) fn link_key(dir: &Identifier, name: &str, vmin: Version) -> Vec<u8> {
    let mut key = link_name_prefix(dir, name);
    key.extend_from_slice(&vmin.to_be_bytes());
    key
}

pub(crate) fn parse_link_key(key: &[u8]) -> CoreResult<(Identifier, String, Version)> {
    (|| {
        if key.first() != Some(&LINK) {
            return None;
        }
        let dir = read_id(key.get(1..)?)?;
        let (name, vmin) = read_name_version(key.get(17..)?)?;
        Some((dir, name, vmin))
    })()
    .ok_or_else(|| bad_key("link", key))
}

pub(crate) fn backlink_prefix(inode: &Identifier) -> Vec<u8> {
    let mut key = Vec::with_capacity(48);
    key.push(BACKLINK);
    key.extend_from_slice(inode.as_bytes());
    key
}

pub(crate) fn backlink_key(inode: &Identifier, dir: &Identifier, name: &str, vmin: Version) -> Vec<u8> {
    let mut key = backlink_prefix(inode);
    key.extend_from_slice(dir.as_bytes());
    key.extend_from_slice(name.as_bytes());
    key.push(NAME_END);
    key.extend_from_slice(&vmin.to_be_bytes());
    key
}

pub(crate) fn parse_backlink_key(key: &[u8]) -> CoreResult<(Identifier, Identifier, String, Version)> {
    (|| {
        if key.first() != Some(&BACKLINK) {
            return None;
        }
        let inode = read_id(key.get(1..)?)?;
        let dir = read_id(key.get(17..)?)?;
        let (name, vmin) = read_name_version(key.get(33..)?)?;
        Some((inode, dir, name, vmin))
    })()
    .ok_or_else(|| bad_key("backlink", key))
}

pub(crate) fn history_key(version: Version) -> Vec<u8> {
    let mut key = vec![HISTORY];
    key.extend_from_slice(&version.to_be_bytes());
    key
}

pub(crate) fn tag_version_prefix(version: Version) -> Vec<u8> {
    let mut key = vec![TAG];
    key.extend_from_slice(&version.to_be_bytes());
    key
}

pub(crate) fn tag_key(version: Version, name: &str) -> Vec<u8> {
    let mut key = tag_version_prefix(version);
    key.extend_from_slice(name.as_bytes());
    key
}

pub(crate) fn parse_tag_key(key: &[u8]) -> CoreResult<(Version, String)> {
    (|| {
        if key.first() != Some(&TAG) {
            return None;
        }
        let version = read_version(key.get(1..9)?)?;
        let name = String::from_utf8(key.get(9..)?.to_vec()).ok()?;
        Some((version, name))
    })()
    .ok_or_else(|| bad_key("tag", key))
}

pub(crate) fn staged_key(id: &Identifier) -> Vec<u8> {
    let mut key = vec![STAGED];
    key.extend_from_slice(id.as_bytes());
    key
}

pub(crate) fn rename_key(dir: &Identifier, name: &str) -> Vec<u8> {
    let mut key = vec![RENAME];
    key.extend_from_slice(dir.as_bytes());
    key.extend_from_slice(name.as_bytes());
    key.push(NAME_END);
    key
}

pub(crate) fn parse_rename_key(key: &[u8]) -> CoreResult<(Identifier, String)> {
    (|| {
        if key.first() != Some(&RENAME) || key.last() != Some(&NAME_END) {
            return None;
        }
        let dir = read_id(key.get(1..)?)?;
        let name = String::from_utf8(key.get(17..key.len() - 1)?.to_vec()).ok()?;
        Some((dir, name))
    })()
    .ok_or_else(|| bad_key("rename", key))
}

pub(crate) fn meta_key(name: &str) -> Vec<u8> {
    let mut key = vec![META];
    key.extend_from_slice(name.as_bytes());
    key
}
