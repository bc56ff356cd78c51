//! Diff encoder.
//!
//! Every field, the tag included, is written as text followed by a NUL
//! byte. Records are concatenated without framing; the tag alone decides
//! how many fields follow.
//!
//! In an `i!` record an empty field leaves the attribute unchanged. A
//! content field of `-` clears the content, and a symlink target is
//! written behind a `=` so that `=` alone clears it.

use crate::attrs::{AttrChanges, Content, InodeAttrs, Timestamp};
use crate::error::{CodecError, CodecResult};
use crate::record::ChangeRecord;

/// Field terminator.
pub const FIELD_TERMINATOR: u8 = 0;

/// `i!` content field that sets the content to [`Content::None`].
pub const CLEARED_CONTENT: &str = "-";

/// Leads every symlink target carried by an `i!` record.
pub const TARGET_PREFIX: char = '=';

/// Streaming diff encoder.
#[derive(Debug, Default)]
pub struct DiffEncoder {
    buf: Vec<u8>,
}

impl DiffEncoder {
    /// Creates an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Returns `EncodingFailed` if a name or symlink target contains a NUL
    /// byte, or a link name is empty. Nothing is appended in that case.
    pub fn push(&mut self, record: &ChangeRecord) -> CodecResult<()> {
        let fields = record_fields(record);
        for field in &fields {
            if field.as_bytes().contains(&FIELD_TERMINATOR) {
                return Err(CodecError::encoding(format!(
                    "{} record field contains NUL: {field:?}",
                    record.tag()
                )));
            }
        }
        if let Some((_, name)) = record.link_key() {
            if name.is_empty() {
                return Err(CodecError::encoding("link name is empty"));
            }
        }
        for field in std::iter::once(record.tag()).chain(fields.iter().map(String::as_str)) {
            self.buf.extend_from_slice(field.as_bytes());
            self.buf.push(FIELD_TERMINATOR);
        }
        Ok(())
    }

    /// Returns the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Encodes records in the given order.
///
/// # Errors
///
/// See [`DiffEncoder::push`].
pub fn encode_records(records: &[ChangeRecord]) -> CodecResult<Vec<u8>> {
    let mut encoder = DiffEncoder::new();
    for record in records {
        encoder.push(record)?;
    }
    Ok(encoder.into_bytes())
}

pub(crate) fn content_text(content: &Content) -> String {
    match content {
        Content::None => String::new(),
        Content::Pending => "new".to_string(),
        Content::Hash(hash) => hash.to_hex(),
    }
}

fn record_fields(record: &ChangeRecord) -> Vec<String> {
    match record {
        ChangeRecord::InodeAdded { id, attrs } => full_fields(id.to_string(), attrs),
        ChangeRecord::InodeChanged { id, changes } => partial_fields(id.to_string(), changes),
        ChangeRecord::InodeRemoved { id } => vec![id.to_string()],
        ChangeRecord::LinkAdded { dir, name, inode } | ChangeRecord::LinkChanged { dir, name, inode } => {
            vec![dir.to_string(), name.clone(), inode.to_string()]
        }
        ChangeRecord::LinkRemoved { dir, name } => vec![dir.to_string(), name.clone()],
    }
}

fn time_fields(time: Option<Timestamp>) -> [String; 2] {
    match time {
        Some(t) => [t.secs.to_string(), t.nanos.to_string()],
        None => [String::new(), String::new()],
    }
}

fn full_fields(id: String, attrs: &InodeAttrs) -> Vec<String> {
    let mut fields = vec![
        id,
        attrs.uid.to_string(),
        attrs.gid.to_string(),
        attrs.mode.to_string(),
        attrs.kind.code().to_string(),
        content_text(&attrs.content),
        attrs.target.clone(),
        attrs.size.to_string(),
        attrs.dev_major.to_string(),
        attrs.dev_minor.to_string(),
        attrs.nlink.to_string(),
    ];
    fields.extend(time_fields(Some(attrs.ctime)));
    fields.extend(time_fields(Some(attrs.mtime)));
    fields
}

fn content_change(content: &Content) -> String {
    match content {
        Content::None => CLEARED_CONTENT.to_string(),
        other => content_text(other),
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn partial_fields(id: String, changes: &AttrChanges) -> Vec<String> {
    let mut fields = vec![
        id,
        opt(changes.uid),
        opt(changes.gid),
        opt(changes.mode),
        opt(changes.kind.map(|k| k.code())),
        changes.content.as_ref().map(content_change).unwrap_or_default(),
        changes
            .target
            .as_ref()
            .map(|target| format!("{TARGET_PREFIX}{target}"))
            .unwrap_or_default(),
        opt(changes.size),
        opt(changes.dev_major),
        opt(changes.dev_minor),
        opt(changes.nlink),
    ];
    fields.extend(time_fields(changes.ctime));
    fields.extend(time_fields(changes.mtime));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Identifier;

    #[test]
    fn link_removed_layout() {
        let record = ChangeRecord::LinkRemoved {
            dir: Identifier::ROOT,
            name: "notes.txt".into(),
        };
        let bytes = encode_records(&[record]).unwrap();
        let expected = format!("l-\0{}\0notes.txt\0", "0".repeat(32));
        assert_eq!(bytes, expected.as_bytes());
    }

    #[test]
    fn inode_changed_leaves_unset_fields_empty() {
        let id = Identifier::from_bytes([1; 16]);
        let record = ChangeRecord::InodeChanged {
            id,
            changes: AttrChanges {
                mode: Some(0o600),
                ..AttrChanges::default()
            },
        };
        let bytes = encode_records(&[record]).unwrap();
        let fields: Vec<&[u8]> = bytes.split(|b| *b == 0).collect();
        // tag + 15 fields + the empty tail after the last terminator
        assert_eq!(fields.len(), 17);
        assert_eq!(fields[0], b"i!");
        assert_eq!(fields[4], b"384");
        assert!(fields[2].is_empty() && fields[3].is_empty());
        assert!(fields[5..].iter().all(|f| f.is_empty()));
    }

    #[test]
    fn inode_changed_marks_cleared_fields() {
        let record = ChangeRecord::InodeChanged {
            id: Identifier::ROOT,
            changes: AttrChanges {
                content: Some(Content::None),
                target: Some(String::new()),
                ..AttrChanges::default()
            },
        };
        let bytes = encode_records(&[record]).unwrap();
        let fields: Vec<&[u8]> = bytes.split(|b| *b == 0).collect();
        assert_eq!(fields[6], b"-");
        assert_eq!(fields[7], b"=");
    }

    #[test]
    fn nul_in_name_is_rejected() {
        let record = ChangeRecord::LinkAdded {
            dir: Identifier::ROOT,
            name: "bad\0name".into(),
            inode: Identifier::new(),
        };
        let mut encoder = DiffEncoder::new();
        assert!(encoder.push(&record).is_err());
        assert!(encoder.into_bytes().is_empty());
    }
}
