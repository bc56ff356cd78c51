//! # Versync Codec
//!
//! Change records and the deterministic diff encoding for Versync.
//!
//! A diff is the list of elementary changes turning one version of a
//! repository into the next. Diffs are content-addressed, so their byte
//! form must be reproducible:
//!
//! - Records are sorted canonically before encoding ([`Diff::new`])
//! - Every field is text terminated by a NUL byte
//! - The tag decides the field count (`i+`/`i!` 15, `i-` 1, `l+`/`l!` 3, `l-` 2)
//! - In `i!` an empty field means "unchanged"
//! - Stored diffs are zstd-compressed and addressed by the SHA-256 of the
//!   uncompressed bytes
//!
//! ## Usage
//!
//! ```
//! use versync_codec::{ChangeRecord, Diff, Identifier};
//!
//! let diff = Diff::new(vec![ChangeRecord::LinkRemoved {
//!     dir: Identifier::ROOT,
//!     name: "draft.txt".into(),
//! }]);
//! let bytes = diff.encode().unwrap();
//! assert_eq!(Diff::parse(&bytes).unwrap(), diff);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attrs;
mod decoder;
mod encoder;
mod error;
mod id;
mod object;
mod record;

pub use attrs::{AttrChanges, Content, InodeAttrs, ObjectKind, Timestamp};
pub use decoder::{parse_records, DiffReader};
pub use encoder::{encode_records, DiffEncoder, FIELD_TERMINATOR};
pub use error::{CodecError, CodecResult};
pub use id::{ContentHash, Identifier};
pub use object::{pack, unpack, unpack_verified, Diff, PackedDiff, DEFAULT_COMPRESSION_LEVEL};
pub use record::{field_count, sort_records, ChangeRecord, Phase};
