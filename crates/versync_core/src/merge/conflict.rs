//! Conflicts: objects touched by both sides of a merge.

use super::history::{LinkKey, MergeHistory};
use super::resolve::Resolution;
use crate::error::CoreResult;
use crate::store::VersionedStore;
use crate::types::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use versync_codec::{AttrChanges, Identifier, InodeAttrs};

/// One object changed on both sides since the common version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// The object.
    pub id: Identifier,
    /// Attributes at the common version.
    pub common: Option<InodeAttrs>,
    /// Attributes after the master commits; `None` if master removed it.
    pub master: Option<InodeAttrs>,
    /// Attributes after the local commits; `None` if local removed it.
    pub local: Option<InodeAttrs>,
    /// Links naming the object at the common version.
    pub common_links: BTreeSet<LinkKey>,
    /// Links naming the object after the master commits.
    pub master_links: BTreeSet<LinkKey>,
    /// Links naming the object after the local commits.
    pub local_links: BTreeSet<LinkKey>,
}

impl Conflict {
    /// Every id touched by both histories, with its three states.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn detect(
        store: &VersionedStore<'_>,
        common: Version,
        master: &MergeHistory,
        local: &MergeHistory,
    ) -> CoreResult<Vec<Self>> {
        let mut conflicts = Vec::new();
        for id in master.touched().intersection(local.touched()) {
            conflicts.push(Self {
                id: *id,
                common: store.load_inode(id, common)?,
                master: master.attrs_of(store, id)?,
                local: local.attrs_of(store, id)?,
                common_links: store.links_to(id, common)?.into_iter().collect(),
                master_links: master.links_of(store, id)?,
                local_links: local.links_of(store, id)?,
            });
        }
        Ok(conflicts)
    }

    /// Resolution that needs no decision, if any.
    ///
    /// When both sides kept the object with the same links and only time
    /// fields differ between any two of the three states, the side with the
    /// later creation time wins; equal times go to master.
    #[must_use]
    pub fn automatic(&self) -> Option<Resolution> {
        let (master, local) = (self.master.as_ref()?, self.local.as_ref()?);
        if self.master_links != self.local_links {
            return None;
        }
        let times_only = |a: &InodeAttrs, b: &InodeAttrs| {
            let changes = AttrChanges::between(a, b);
            changes.is_empty() || changes.only_times()
        };
        if !times_only(master, local) {
            return None;
        }
        if let Some(common) = &self.common {
            if !times_only(common, master) || !times_only(common, local) {
                return None;
            }
        }
        if local.ctime > master.ctime {
            Some(Resolution::Local)
        } else {
            Some(Resolution::Master)
        }
    }

    /// Returns true if "both" cannot apply: the root and directories have a
    /// single identity.
    #[must_use]
    pub fn is_single_identity(&self) -> bool {
        let is_dir = |attrs: &Option<InodeAttrs>| attrs.as_ref().is_some_and(InodeAttrs::is_dir);
        self.id.is_root() || is_dir(&self.common) || is_dir(&self.master) || is_dir(&self.local)
    }

    /// `(field, common, master, local)` rows for the fields that differ.
    #[must_use]
    pub fn table(&self) -> Vec<(&'static str, String, String, String)> {
        let show = |attrs: &Option<InodeAttrs>, field: &str| match attrs {
            None => "-".to_string(),
            Some(attrs) => field_text(attrs, field),
        };
        let mut fields: BTreeSet<&'static str> = BTreeSet::new();
        let states = [&self.common, &self.master, &self.local];
        for a in states {
            for b in states {
                match (a, b) {
                    (Some(a), Some(b)) => fields.extend(AttrChanges::between(a, b).field_names()),
                    (Some(a), None) | (None, Some(a)) => {
                        fields.extend(AttrChanges::full(a).field_names());
                    }
                    (None, None) => {}
                }
            }
        }
        let mut rows: Vec<_> = fields
            .into_iter()
            .map(|field| {
                (
                    field,
                    show(&self.common, field),
                    show(&self.master, field),
                    show(&self.local, field),
                )
            })
            .collect();
        if self.master_links != self.local_links || self.common_links != self.master_links {
            let names = |links: &BTreeSet<LinkKey>| {
                links
                    .iter()
                    .map(|(_, name)| name.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            };
            rows.push((
                "links",
                names(&self.common_links),
                names(&self.master_links),
                names(&self.local_links),
            ));
        }
        rows
    }
}

fn field_text(attrs: &InodeAttrs, field: &str) -> String {
    match field {
        "uid" => attrs.uid.to_string(),
        "gid" => attrs.gid.to_string(),
        "mode" => format!("{:o}", attrs.mode),
        "kind" => attrs.kind.code().to_string(),
        "content" => match attrs.content.hash() {
            Some(hash) => hash.to_hex()[..12].to_string(),
            None => "-".to_string(),
        },
        "target" => attrs.target.clone(),
        "size" => attrs.size.to_string(),
        "dev_major" => attrs.dev_major.to_string(),
        "dev_minor" => attrs.dev_minor.to_string(),
        "nlink" => attrs.nlink.to_string(),
        "ctime" => attrs.ctime.to_string(),
        "mtime" => attrs.mtime.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use versync_codec::{Content, ContentHash, ObjectKind, Timestamp};

    fn file(ctime: i64, mtime: i64) -> InodeAttrs {
        let mut attrs = InodeAttrs::new(ObjectKind::File, Timestamp::new(ctime, 0));
        attrs.mtime = Timestamp::new(mtime, 0);
        attrs
    }

    fn conflict(common: InodeAttrs, master: InodeAttrs, local: InodeAttrs) -> Conflict {
        Conflict {
            id: Identifier::new(),
            common: Some(common),
            master: Some(master),
            local: Some(local),
            common_links: BTreeSet::new(),
            master_links: BTreeSet::new(),
            local_links: BTreeSet::new(),
        }
    }

    #[test]
    fn time_only_conflicts_resolve_by_ctime() {
        let later_local = conflict(file(1, 1), file(2, 5), file(3, 4));
        assert_eq!(later_local.automatic(), Some(Resolution::Local));

        let tie = conflict(file(1, 1), file(2, 5), file(2, 9));
        assert_eq!(tie.automatic(), Some(Resolution::Master));
    }

    #[test]
    fn content_change_needs_a_decision() {
        let mut changed = file(2, 2);
        changed.content = Content::Hash(ContentHash::of(b"new"));
        let c = conflict(file(1, 1), changed, file(3, 3));
        assert_eq!(c.automatic(), None);
        let rows = c.table();
        assert!(rows.iter().any(|(field, ..)| *field == "content"));
    }

    #[test]
    fn removal_and_link_changes_need_a_decision() {
        let mut removed = conflict(file(1, 1), file(1, 1), file(1, 2));
        removed.master = None;
        assert_eq!(removed.automatic(), None);

        let mut moved = conflict(file(1, 1), file(1, 1), file(1, 2));
        moved.local_links.insert((Identifier::ROOT, "elsewhere".into()));
        assert_eq!(moved.automatic(), None);
    }

    #[test]
    fn root_and_directories_have_one_identity() {
        let mut c = conflict(file(1, 1), file(1, 1), file(1, 1));
        assert!(!c.is_single_identity());
        c.id = Identifier::ROOT;
        assert!(c.is_single_identity());
    }
}
