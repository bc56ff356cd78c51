//! Property tests for the diff encoding.

use bytes::Bytes;
use proptest::prelude::*;
use versync_codec::{
    pack, unpack_verified, AttrChanges, ChangeRecord, Content, ContentHash, Diff, DiffReader,
    Identifier, InodeAttrs, ObjectKind, Timestamp,
};

fn identifier() -> impl Strategy<Value = Identifier> {
    prop::array::uniform16(any::<u8>()).prop_map(|bytes| Identifier::from_slice(&bytes).unwrap())
}

fn timestamp() -> impl Strategy<Value = Timestamp> {
    (0i64..4_000_000_000, 0u32..1_000_000_000).prop_map(|(secs, nanos)| Timestamp::new(secs, nanos))
}

fn kind() -> impl Strategy<Value = ObjectKind> {
    prop_oneof![
        Just(ObjectKind::File),
        Just(ObjectKind::Directory),
        Just(ObjectKind::Symlink),
        Just(ObjectKind::CharDevice),
        Just(ObjectKind::BlockDevice),
        Just(ObjectKind::Fifo),
        Just(ObjectKind::Socket),
    ]
}

fn hashed_content() -> impl Strategy<Value = Content> {
    prop::collection::vec(any::<u8>(), 0..16).prop_map(|data| Content::Hash(ContentHash::of(&data)))
}

fn name() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9._~ -]{1,24}").unwrap()
}

fn attrs() -> impl Strategy<Value = InodeAttrs> {
    (
        (any::<u32>(), any::<u32>(), 0u32..0o10000, kind()),
        prop_oneof![Just(Content::None), Just(Content::Pending), hashed_content()],
        ("[a-z/]{0,12}", any::<u64>(), any::<u64>(), any::<u64>(), 1u32..8),
        (timestamp(), timestamp()),
    )
        .prop_map(
            |((uid, gid, mode, kind), content, (target, size, major, minor, nlink), (ctime, mtime))| {
                InodeAttrs {
                    uid,
                    gid,
                    mode,
                    kind,
                    content,
                    target,
                    size,
                    dev_major: major,
                    dev_minor: minor,
                    nlink,
                    ctime,
                    mtime,
                }
            },
        )
}

/// Partial changes; an empty field means "unchanged" on the wire, so empty
/// targets and absent content are never generated as changes.
fn changes() -> impl Strategy<Value = AttrChanges> {
    (
        (
            prop::option::of(any::<u32>()),
            prop::option::of(0u32..0o10000),
            prop::option::of(prop_oneof![Just(Content::Pending), hashed_content()]),
        ),
        (
            prop::option::of("[a-z/]{1,12}"),
            prop::option::of(any::<u64>()),
            prop::option::of(1u32..8),
        ),
        (prop::option::of(timestamp()), prop::option::of(timestamp())),
    )
        .prop_map(|((uid, mode, content), (target, size, nlink), (ctime, mtime))| AttrChanges {
            uid,
            mode,
            content,
            target,
            size,
            nlink,
            ctime,
            mtime,
            ..AttrChanges::default()
        })
}

fn record() -> impl Strategy<Value = ChangeRecord> {
    prop_oneof![
        (identifier(), attrs()).prop_map(|(id, attrs)| ChangeRecord::InodeAdded { id, attrs }),
        (identifier(), changes()).prop_map(|(id, changes)| ChangeRecord::InodeChanged { id, changes }),
        identifier().prop_map(|id| ChangeRecord::InodeRemoved { id }),
        (identifier(), name(), identifier())
            .prop_map(|(dir, name, inode)| ChangeRecord::LinkAdded { dir, name, inode }),
        (identifier(), name()).prop_map(|(dir, name)| ChangeRecord::LinkRemoved { dir, name }),
        (identifier(), name(), identifier())
            .prop_map(|(dir, name, inode)| ChangeRecord::LinkChanged { dir, name, inode }),
    ]
}

fn records() -> impl Strategy<Value = Vec<ChangeRecord>> {
    prop::collection::vec(record(), 0..24)
}

proptest! {
    #[test]
    fn encoding_survives_parsing(records in records()) {
        let diff = Diff::new(records);
        let bytes = diff.encode().unwrap();
        prop_assert_eq!(Diff::parse(&bytes).unwrap(), diff);
    }

    #[test]
    fn encoding_ignores_input_order(
        (records, shuffled) in records().prop_flat_map(|r| (Just(r.clone()), Just(r).prop_shuffle()))
    ) {
        let a = Diff::new(records).pack(3).unwrap();
        let b = Diff::new(shuffled).pack(3).unwrap();
        prop_assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn resume_yields_the_remaining_records(records in records(), cut in 0usize..24) {
        let diff = Diff::new(records);
        let cut = cut.min(diff.len());
        let bytes = Bytes::from(diff.encode().unwrap());
        let tail: Vec<ChangeRecord> = DiffReader::resume(bytes, cut as u64)
            .unwrap()
            .map(|item| item.unwrap().1)
            .collect();
        prop_assert_eq!(&tail[..], &diff.records()[cut..]);
    }

    #[test]
    fn truncated_input_never_panics(records in records(), keep in 0usize..4096) {
        let bytes = Diff::new(records).encode().unwrap();
        let keep = keep.min(bytes.len());
        let _ = Diff::parse(&bytes[..keep]);
    }

    #[test]
    fn stored_form_is_checked_against_its_address(records in records()) {
        let raw = Diff::new(records).encode().unwrap();
        let packed = pack(&raw, 3).unwrap();
        prop_assert_eq!(&unpack_verified(&packed.data, &packed.hash).unwrap()[..], &raw[..]);
        let other = ContentHash::of(b"something else");
        prop_assert!(unpack_verified(&packed.data, &other).is_err());
    }
}
