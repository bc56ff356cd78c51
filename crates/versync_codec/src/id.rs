//! Object identifiers and content hashes.

use crate::error::CodecError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A 128-bit identifier naming a filesystem object.
///
/// Identifiers are random and never reused. The all-zero identifier is the
/// repository root.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier([u8; 16]);

impl Identifier {
    /// The repository root.
    pub const ROOT: Self = Self([0; 16]);

    /// Generates a new random identifier.
    #[must_use]
    pub fn new() -> Self {
        let mut id = Self(*Uuid::new_v4().as_bytes());
        while id.is_root() {
            id = Self(*Uuid::new_v4().as_bytes());
        }
        id
    }

    /// Creates an identifier from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Creates an identifier from a slice, if it has exactly 16 bytes.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 16]>::try_from(bytes).ok().map(Self)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Returns true for the root identifier.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == [0; 16]
    }

    /// The leading byte, used to bucket the identifier space.
    #[must_use]
    pub const fn bucket(&self) -> u8 {
        self.0[0]
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({self})")
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Identifier {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CodecError::InvalidIdentifier {
            value: s.to_string(),
        };
        let bytes = hex::decode(s).map_err(|_| invalid())?;
        Self::from_slice(&bytes).ok_or_else(invalid)
    }
}

/// SHA-256 digest addressing an immutable object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hashes `data`.
    #[must_use]
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Creates a hash from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CodecError::InvalidHash {
            value: s.to_string(),
        };
        let bytes = hex::decode(s).map_err(|_| invalid())?;
        <[u8; 32]>::try_from(bytes.as_slice())
            .map(Self)
            .map_err(|_| invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_all_zero() {
        assert!(Identifier::ROOT.is_root());
        assert_eq!(Identifier::ROOT.to_string(), "0".repeat(32));
    }

    #[test]
    fn new_identifiers_are_unique() {
        let a = Identifier::new();
        let b = Identifier::new();
        assert_ne!(a, b);
        assert!(!a.is_root());
    }

    #[test]
    fn identifier_text_form() {
        let id = Identifier::new();
        let parsed: Identifier = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("xyz".parse::<Identifier>().is_err());
        assert!("00ff".parse::<Identifier>().is_err());
    }

    #[test]
    fn identifier_from_slice_checks_length() {
        assert!(Identifier::from_slice(&[1; 15]).is_none());
        assert_eq!(
            Identifier::from_slice(&[7; 16]),
            Some(Identifier::from_bytes([7; 16]))
        );
    }

    #[test]
    fn content_hash_known_value() {
        let hash = ContentHash::of(b"abc");
        assert_eq!(
            hash.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash.to_hex().parse::<ContentHash>().unwrap(), hash);
    }
}
