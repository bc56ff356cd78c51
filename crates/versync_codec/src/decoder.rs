//! Lazy diff parser.

use crate::attrs::{AttrChanges, Content, InodeAttrs, ObjectKind, Timestamp};
use crate::encoder::{CLEARED_CONTENT, FIELD_TERMINATOR, TARGET_PREFIX};
use crate::error::{CodecError, CodecResult};
use crate::id::{ContentHash, Identifier};
use crate::record::{
    field_count, ChangeRecord, TAG_INODE_ADDED, TAG_INODE_CHANGED, TAG_INODE_REMOVED,
    TAG_LINK_ADDED, TAG_LINK_CHANGED, TAG_LINK_REMOVED,
};
use bytes::Bytes;
use std::ops::Range;
use std::str::FromStr;

/// Streams change records out of an encoded diff.
///
/// Yields `(ordinal, record)` pairs. The first error ends the stream.
/// Because records carry no length prefix, resuming at an ordinal means
/// walking the tags of the records before it; see [`DiffReader::resume`].
/// A caller that saved [`DiffReader::offset`] can jump straight back with
/// [`DiffReader::resume_at`].
#[derive(Debug, Clone)]
pub struct DiffReader {
    data: Bytes,
    pos: usize,
    ordinal: u64,
    finished: bool,
}

impl DiffReader {
    /// Creates a reader positioned at the first record.
    #[must_use]
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            pos: 0,
            ordinal: 0,
            finished: false,
        }
    }

    /// Creates a reader positioned at record `ordinal`.
    ///
    /// # Errors
    ///
    /// Returns an error if a skipped record has an unknown tag or is
    /// truncated, or if the diff holds fewer than `ordinal` records.
    pub fn resume(data: Bytes, ordinal: u64) -> CodecResult<Self> {
        let mut reader = Self::new(data);
        while reader.ordinal < ordinal {
            if reader.pos >= reader.data.len() {
                return Err(CodecError::Truncated {
                    ordinal: reader.ordinal,
                });
            }
            reader.skip_record()?;
        }
        Ok(reader)
    }

    /// Creates a reader at byte `offset`, which must be a value returned
    /// by [`DiffReader::offset`] on the same data when its ordinal was
    /// `ordinal`.
    ///
    /// # Errors
    ///
    /// Returns `Truncated` if `offset` lies past the end of the data or
    /// does not follow a record terminator.
    pub fn resume_at(data: Bytes, ordinal: u64, offset: u64) -> CodecResult<Self> {
        let pos = usize::try_from(offset).map_err(|_| CodecError::Truncated { ordinal })?;
        let aligned = pos == 0 || data.get(pos - 1) == Some(&FIELD_TERMINATOR);
        if pos > data.len() || !aligned {
            return Err(CodecError::Truncated { ordinal });
        }
        Ok(Self {
            data,
            pos,
            ordinal,
            finished: false,
        })
    }

    /// Ordinal of the next record to be yielded.
    #[must_use]
    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    /// Byte offset of the next record to be yielded.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.pos as u64
    }

    fn next_field(&mut self) -> Option<Range<usize>> {
        let rest = &self.data[self.pos..];
        let len = rest.iter().position(|b| *b == FIELD_TERMINATOR)?;
        let range = self.pos..self.pos + len;
        self.pos += len + 1;
        Some(range)
    }

    fn read_tag(&mut self) -> CodecResult<(&'static str, usize)> {
        let ordinal = self.ordinal;
        let range = self.next_field().ok_or(CodecError::Truncated { ordinal })?;
        let raw = &self.data[range];
        let tag = [
            TAG_INODE_ADDED,
            TAG_INODE_REMOVED,
            TAG_INODE_CHANGED,
            TAG_LINK_ADDED,
            TAG_LINK_REMOVED,
            TAG_LINK_CHANGED,
        ]
        .into_iter()
        .find(|t| t.as_bytes() == raw)
        .ok_or_else(|| CodecError::UnknownTag {
            ordinal,
            tag: String::from_utf8_lossy(raw).into_owned(),
        })?;
        let count = field_count(tag).ok_or_else(|| CodecError::UnknownTag {
            ordinal,
            tag: tag.to_string(),
        })?;
        Ok((tag, count))
    }

    fn skip_record(&mut self) -> CodecResult<()> {
        let ordinal = self.ordinal;
        let (_, count) = self.read_tag()?;
        for _ in 0..count {
            self.next_field().ok_or(CodecError::Truncated { ordinal })?;
        }
        self.ordinal += 1;
        Ok(())
    }

    fn read_record(&mut self) -> CodecResult<ChangeRecord> {
        let ordinal = self.ordinal;
        let (tag, count) = self.read_tag()?;
        let mut ranges = Vec::with_capacity(count);
        for _ in 0..count {
            ranges.push(self.next_field().ok_or(CodecError::Truncated { ordinal })?);
        }
        let mut values = Vec::with_capacity(count);
        for range in ranges {
            let text = std::str::from_utf8(&self.data[range]).map_err(|_| {
                CodecError::InvalidField {
                    ordinal,
                    field: "text",
                    message: "not valid UTF-8".to_string(),
                }
            })?;
            values.push(text);
        }
        let record = build_record(tag, Fields::new(values, ordinal))?;
        self.ordinal += 1;
        Ok(record)
    }
}

impl Iterator for DiffReader {
    type Item = CodecResult<(u64, ChangeRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.pos >= self.data.len() {
            return None;
        }
        let ordinal = self.ordinal;
        match self.read_record() {
            Ok(record) => Some(Ok((ordinal, record))),
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

/// Parses a whole diff.
///
/// # Errors
///
/// Returns the first parse error.
pub fn parse_records(data: &[u8]) -> CodecResult<Vec<ChangeRecord>> {
    DiffReader::new(Bytes::copy_from_slice(data))
        .map(|item| item.map(|(_, record)| record))
        .collect()
}

struct Fields<'a> {
    values: std::vec::IntoIter<&'a str>,
    ordinal: u64,
}

impl<'a> Fields<'a> {
    fn new(values: Vec<&'a str>, ordinal: u64) -> Self {
        Self {
            values: values.into_iter(),
            ordinal,
        }
    }

    fn invalid(&self, field: &'static str, message: impl Into<String>) -> CodecError {
        CodecError::InvalidField {
            ordinal: self.ordinal,
            field,
            message: message.into(),
        }
    }

    fn take(&mut self) -> &'a str {
        // The caller read exactly `field_count(tag)` fields.
        self.values.next().unwrap_or("")
    }

    fn id(&mut self, field: &'static str) -> CodecResult<Identifier> {
        let text = self.take();
        Identifier::from_str(text).map_err(|_| self.invalid(field, format!("{text:?}")))
    }

    fn name(&mut self, field: &'static str) -> CodecResult<String> {
        let text = self.take();
        if text.is_empty() {
            return Err(self.invalid(field, "empty name"));
        }
        Ok(text.to_string())
    }

    fn text(&mut self) -> String {
        self.take().to_string()
    }

    fn target_change(&mut self) -> CodecResult<Option<String>> {
        let text = self.take();
        if text.is_empty() {
            return Ok(None);
        }
        text.strip_prefix(TARGET_PREFIX)
            .map(|target| Some(target.to_string()))
            .ok_or_else(|| self.invalid("target", format!("missing '{TARGET_PREFIX}': {text:?}")))
    }

    fn opt_num<T: FromStr>(&mut self, field: &'static str) -> CodecResult<Option<T>> {
        let text = self.take();
        if text.is_empty() {
            return Ok(None);
        }
        text.parse()
            .map(Some)
            .map_err(|_| self.invalid(field, format!("not a number: {text:?}")))
    }

    fn num<T: FromStr>(&mut self, field: &'static str) -> CodecResult<T> {
        self.opt_num(field)?
            .ok_or_else(|| self.invalid(field, "missing value"))
    }

    fn opt_kind(&mut self) -> CodecResult<Option<ObjectKind>> {
        let text = self.take();
        if text.is_empty() {
            return Ok(None);
        }
        ObjectKind::from_code(text)
            .map(Some)
            .ok_or_else(|| self.invalid("kind", format!("unknown kind {text:?}")))
    }

    fn content_change(&mut self) -> CodecResult<Option<Content>> {
        if self.values.as_slice().first() == Some(&CLEARED_CONTENT) {
            self.take();
            return Ok(Some(Content::None));
        }
        self.opt_content()
    }

    fn opt_content(&mut self) -> CodecResult<Option<Content>> {
        match self.take() {
            "" => Ok(None),
            "new" => Ok(Some(Content::Pending)),
            text => ContentHash::from_str(text)
                .map(|hash| Some(Content::Hash(hash)))
                .map_err(|_| self.invalid("content", format!("{text:?}"))),
        }
    }

    fn opt_time(&mut self, field: &'static str) -> CodecResult<Option<Timestamp>> {
        let secs: Option<i64> = self.opt_num(field)?;
        let nanos: Option<u32> = self.opt_num(field)?;
        match (secs, nanos) {
            (Some(secs), Some(nanos)) if nanos < 1_000_000_000 => {
                Ok(Some(Timestamp::new(secs, nanos)))
            }
            (None, None) => Ok(None),
            _ => Err(self.invalid(field, "seconds and nanoseconds must be set together")),
        }
    }

    fn time(&mut self, field: &'static str) -> CodecResult<Timestamp> {
        self.opt_time(field)?
            .ok_or_else(|| self.invalid(field, "missing value"))
    }
}

fn build_record(tag: &str, mut f: Fields<'_>) -> CodecResult<ChangeRecord> {
    let record = match tag {
        TAG_INODE_ADDED => {
            let id = f.id("id")?;
            let uid = f.num("uid")?;
            let gid = f.num("gid")?;
            let mode = f.num("mode")?;
            let kind = f.opt_kind()?.ok_or_else(|| f.invalid("kind", "missing value"))?;
            let content = f.opt_content()?.unwrap_or(Content::None);
            let target = f.text();
            let attrs = InodeAttrs {
                uid,
                gid,
                mode,
                kind,
                content,
                target,
                size: f.num("size")?,
                dev_major: f.num("dev_major")?,
                dev_minor: f.num("dev_minor")?,
                nlink: f.num("nlink")?,
                ctime: f.time("ctime")?,
                mtime: f.time("mtime")?,
            };
            ChangeRecord::InodeAdded { id, attrs }
        }
        TAG_INODE_CHANGED => {
            let id = f.id("id")?;
            let changes = AttrChanges {
                uid: f.opt_num("uid")?,
                gid: f.opt_num("gid")?,
                mode: f.opt_num("mode")?,
                kind: f.opt_kind()?,
                content: f.content_change()?,
                target: f.target_change()?,
                size: f.opt_num("size")?,
                dev_major: f.opt_num("dev_major")?,
                dev_minor: f.opt_num("dev_minor")?,
                nlink: f.opt_num("nlink")?,
                ctime: f.opt_time("ctime")?,
                mtime: f.opt_time("mtime")?,
            };
            ChangeRecord::InodeChanged { id, changes }
        }
        TAG_INODE_REMOVED => ChangeRecord::InodeRemoved { id: f.id("id")? },
        TAG_LINK_ADDED => ChangeRecord::LinkAdded {
            dir: f.id("dir")?,
            name: f.name("name")?,
            inode: f.id("inode")?,
        },
        TAG_LINK_CHANGED => ChangeRecord::LinkChanged {
            dir: f.id("dir")?,
            name: f.name("name")?,
            inode: f.id("inode")?,
        },
        TAG_LINK_REMOVED => ChangeRecord::LinkRemoved {
            dir: f.id("dir")?,
            name: f.name("name")?,
        },
        other => {
            return Err(CodecError::UnknownTag {
                ordinal: f.ordinal,
                tag: other.to_string(),
            })
        }
    };
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode_records;

    fn sample() -> Vec<ChangeRecord> {
        let file = Identifier::from_bytes([3; 16]);
        let mut attrs = InodeAttrs::new(ObjectKind::File, Timestamp::new(1_700_000_000, 42));
        attrs.content = Content::Pending;
        attrs.size = 12;
        vec![
            ChangeRecord::InodeAdded { id: file, attrs },
            ChangeRecord::InodeChanged {
                id: Identifier::ROOT,
                changes: AttrChanges {
                    mtime: Some(Timestamp::new(1_700_000_000, 43)),
                    ..AttrChanges::default()
                },
            },
            ChangeRecord::LinkAdded {
                dir: Identifier::ROOT,
                name: "report.pdf".into(),
                inode: file,
            },
            ChangeRecord::LinkRemoved {
                dir: Identifier::ROOT,
                name: "old.pdf".into(),
            },
            ChangeRecord::InodeRemoved {
                id: Identifier::from_bytes([9; 16]),
            },
        ]
    }

    #[test]
    fn parses_what_was_encoded() {
        let records = sample();
        let bytes = encode_records(&records).unwrap();
        assert_eq!(parse_records(&bytes).unwrap(), records);
    }

    #[test]
    fn yields_ordinals() {
        let bytes = Bytes::from(encode_records(&sample()).unwrap());
        let ordinals: Vec<u64> = DiffReader::new(bytes)
            .map(|item| item.unwrap().0)
            .collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn resume_skips_to_ordinal() {
        let records = sample();
        let bytes = Bytes::from(encode_records(&records).unwrap());
        let mut reader = DiffReader::resume(bytes.clone(), 3).unwrap();
        assert_eq!(reader.ordinal(), 3);
        let (ordinal, record) = reader.next().unwrap().unwrap();
        assert_eq!(ordinal, 3);
        assert_eq!(record, records[3]);

        let end = DiffReader::resume(bytes.clone(), 5).unwrap();
        assert_eq!(end.count(), 0);
        assert!(DiffReader::resume(bytes, 6).is_err());
    }

    #[test]
    fn resume_at_saved_offset_matches_resume() {
        let records = sample();
        let bytes = Bytes::from(encode_records(&records).unwrap());
        let mut first = DiffReader::new(bytes.clone());
        first.next().unwrap().unwrap();
        first.next().unwrap().unwrap();
        let offset = first.offset();

        let jumped: Vec<_> = DiffReader::resume_at(bytes.clone(), 2, offset)
            .unwrap()
            .map(|item| item.unwrap())
            .collect();
        let walked: Vec<_> = DiffReader::resume(bytes.clone(), 2)
            .unwrap()
            .map(|item| item.unwrap())
            .collect();
        assert_eq!(jumped, walked);
        assert_eq!(jumped[0], (2, records[2].clone()));

        let len = bytes.len() as u64;
        assert_eq!(DiffReader::resume_at(bytes.clone(), 5, len).unwrap().count(), 0);
        assert!(DiffReader::resume_at(bytes.clone(), 5, len + 1).is_err());
        assert!(DiffReader::resume_at(bytes, 2, offset - 1).is_err());
    }

    #[test]
    fn kind_changes_survive_encoding() {
        let mut file = InodeAttrs::new(ObjectKind::File, Timestamp::new(5, 0));
        file.content = Content::Hash(ContentHash::of(b"body"));
        file.size = 4;
        let mut link = InodeAttrs::new(ObjectKind::Symlink, Timestamp::new(6, 0));
        link.target = "../elsewhere".into();

        for (old, new) in [(&file, &link), (&link, &file)] {
            let record = ChangeRecord::InodeChanged {
                id: Identifier::ROOT,
                changes: AttrChanges::between(old, new),
            };
            let parsed = parse_records(&encode_records(&[record.clone()]).unwrap()).unwrap();
            assert_eq!(parsed, vec![record]);
            let ChangeRecord::InodeChanged { changes, .. } = &parsed[0] else {
                panic!("expected an inode change");
            };
            assert_eq!(&changes.apply_to(old), new);
        }
    }

    #[test]
    fn bare_target_is_invalid_field() {
        let id = Identifier::ROOT.to_string();
        let bytes = format!("i!\0{id}\0\0\0\0\0\0dangling\0{}", "\0".repeat(8));
        let err = parse_records(bytes.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidField { field: "target", .. }
        ));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let bytes = b"x?\0abc\0".to_vec();
        let err = parse_records(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::UnknownTag { ordinal: 0, .. }));
    }

    #[test]
    fn missing_fields_are_truncation() {
        let root = Identifier::ROOT.to_string();
        let bytes = format!("l+\0{root}\0name\0");
        let err = parse_records(bytes.as_bytes()).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { ordinal: 0 }));
    }

    #[test]
    fn surplus_fields_surface_as_unknown_tag() {
        let root = Identifier::ROOT.to_string();
        let bytes = format!("l-\0{root}\0name\0extra\0");
        let err = parse_records(bytes.as_bytes()).unwrap_err();
        assert!(matches!(err, CodecError::UnknownTag { ordinal: 1, .. }));
    }

    #[test]
    fn bad_identifier_is_invalid_field() {
        let bytes = b"i-\0nothex\0".to_vec();
        let err = parse_records(&bytes).unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidField { field: "id", .. }
        ));
    }

    #[test]
    fn half_timestamp_is_rejected() {
        let id = Identifier::ROOT.to_string();
        // ten empty attribute fields, an empty ctime, then mtime with
        // seconds but no nanoseconds
        let bytes = format!("i!\0{id}\0{}5\0\0", "\0".repeat(12));
        let err = parse_records(bytes.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidField { field: "mtime", .. }
        ));
    }
}
