//! Filesystem view of the working version.
//!
//! Paths are `/`-separated and relative to the root directory; a leading
//! `/` is optional. Every mutation runs in its own transaction, marks the
//! working version dirty and bumps the modification time of the parent
//! directory. File content is staged in the store and hashed into the
//! object store on commit.

use crate::error::{CoreError, CoreResult};
use crate::repository::Repository;
use crate::store::VersionedStore;
use bytes::Bytes;
use tracing::debug;
use versync_codec::{AttrChanges, Content, Identifier, InodeAttrs, ObjectKind, Timestamp};

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name.
    pub name: String,
    /// Target inode.
    pub id: Identifier,
    /// Target attributes.
    pub attrs: InodeAttrs,
}

fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

fn validate_name(name: &str) -> CoreResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('\0') {
        return Err(CoreError::policy(format!("invalid entry name {name:?}")));
    }
    Ok(())
}

/// Splits a path into its parent path and final name.
fn split_parent(path: &str) -> CoreResult<(String, String)> {
    let mut parts = components(path);
    let name = parts
        .pop()
        .ok_or_else(|| CoreError::policy("the root has no parent"))?;
    validate_name(name)?;
    Ok((parts.join("/"), name.to_string()))
}

fn resolve(store: &VersionedStore<'_>, path: &str) -> CoreResult<Identifier> {
    store
        .resolve_path(path, store.working_version())?
        .ok_or_else(|| CoreError::policy(format!("no such file or directory: {path}")))
}

fn attrs_of(store: &VersionedStore<'_>, id: &Identifier) -> CoreResult<InodeAttrs> {
    let w = store.working_version();
    store
        .load_inode(id, w)?
        .ok_or(CoreError::InodeNotFound { id: *id, version: w })
}

/// Resolves the parent of `path` and checks the final name is free.
fn free_slot(store: &VersionedStore<'_>, path: &str) -> CoreResult<(Identifier, String)> {
    let (parent_path, name) = split_parent(path)?;
    let parent = resolve(store, &parent_path)?;
    if !attrs_of(store, &parent)?.is_dir() {
        return Err(CoreError::policy(format!("not a directory: /{parent_path}")));
    }
    if store
        .lookup(&parent, &name, store.working_version())?
        .is_some()
    {
        return Err(CoreError::policy(format!("already exists: {path}")));
    }
    Ok((parent, name))
}

fn touch(store: &mut VersionedStore<'_>, id: &Identifier, now: Timestamp) -> CoreResult<()> {
    store.change_inode(
        id,
        &AttrChanges {
            mtime: Some(now),
            ..AttrChanges::default()
        },
    )?;
    Ok(())
}

fn create(store: &mut VersionedStore<'_>, path: &str, attrs: InodeAttrs) -> CoreResult<Identifier> {
    let (parent, name) = free_slot(store, path)?;
    let id = Identifier::new();
    let now = attrs.ctime;
    store.create_inode(&id, attrs)?;
    store.add_link(&parent, &name, &id)?;
    touch(store, &parent, now)?;
    store.set_dirty(true)?;
    Ok(id)
}

impl Repository {
    fn mutate<T>(&self, f: impl FnOnce(&mut VersionedStore<'_>) -> CoreResult<T>) -> CoreResult<T> {
        self.ensure_idle()?;
        self.write(|store| {
            if store
                .load_inode(&Identifier::ROOT, store.working_version())?
                .is_none()
            {
                return Err(CoreError::NotInitialized);
            }
            f(store)
        })
    }

    /// Creates a regular file with `data`.
    ///
    /// # Errors
    ///
    /// Returns a policy error if the parent is missing or the name is taken.
    pub fn create_file(&self, path: &str, data: &[u8]) -> CoreResult<Identifier> {
        self.mutate(|store| {
            let mut attrs = InodeAttrs::new(ObjectKind::File, Timestamp::now());
            attrs.content = Content::Pending;
            attrs.size = data.len() as u64;
            let id = create(store, path, attrs)?;
            store.stage_content(&id, data);
            debug!(path, %id, size = data.len(), "file created");
            Ok(id)
        })
    }

    /// Replaces the content of a regular file.
    ///
    /// # Errors
    ///
    /// Returns a policy error if `path` is not a regular file.
    pub fn write_file(&self, path: &str, data: &[u8]) -> CoreResult<()> {
        self.mutate(|store| {
            let id = resolve(store, path)?;
            if attrs_of(store, &id)?.kind != ObjectKind::File {
                return Err(CoreError::policy(format!("not a regular file: {path}")));
            }
            store.change_inode(
                &id,
                &AttrChanges {
                    content: Some(Content::Pending),
                    size: Some(data.len() as u64),
                    mtime: Some(Timestamp::now()),
                    ..AttrChanges::default()
                },
            )?;
            store.stage_content(&id, data);
            store.set_dirty(true)
        })
    }

    /// Creates a directory.
    ///
    /// # Errors
    ///
    /// Returns a policy error if the parent is missing or the name is taken.
    pub fn mkdir(&self, path: &str) -> CoreResult<Identifier> {
        self.mutate(|store| create(store, path, InodeAttrs::new(ObjectKind::Directory, Timestamp::now())))
    }

    /// Creates a symbolic link pointing at `target`.
    ///
    /// # Errors
    ///
    /// Returns a policy error if the parent is missing or the name is taken.
    pub fn symlink(&self, path: &str, target: &str) -> CoreResult<Identifier> {
        self.mutate(|store| {
            let mut attrs = InodeAttrs::new(ObjectKind::Symlink, Timestamp::now());
            attrs.target = target.to_string();
            attrs.size = target.len() as u64;
            create(store, path, attrs)
        })
    }

    /// Creates a device node, fifo or socket.
    ///
    /// # Errors
    ///
    /// Returns a policy error for other kinds.
    pub fn mknod(&self, path: &str, kind: ObjectKind, major: u64, minor: u64) -> CoreResult<Identifier> {
        if !matches!(
            kind,
            ObjectKind::CharDevice | ObjectKind::BlockDevice | ObjectKind::Fifo | ObjectKind::Socket
        ) {
            return Err(CoreError::policy(format!("mknod cannot create {kind:?}")));
        }
        self.mutate(|store| {
            let mut attrs = InodeAttrs::new(kind, Timestamp::now());
            attrs.dev_major = major;
            attrs.dev_minor = minor;
            create(store, path, attrs)
        })
    }

    /// Adds a hard link `new_path` to the object at `existing`.
    ///
    /// # Errors
    ///
    /// Returns a policy error for directories or a taken name.
    pub fn link(&self, existing: &str, new_path: &str) -> CoreResult<()> {
        self.mutate(|store| {
            let id = resolve(store, existing)?;
            let attrs = attrs_of(store, &id)?;
            if attrs.is_dir() {
                return Err(CoreError::policy("hard links to directories are not allowed"));
            }
            let (parent, name) = free_slot(store, new_path)?;
            let now = Timestamp::now();
            store.add_link(&parent, &name, &id)?;
            store.change_inode(
                &id,
                &AttrChanges {
                    nlink: Some(attrs.nlink + 1),
                    ..AttrChanges::default()
                },
            )?;
            touch(store, &parent, now)?;
            store.set_dirty(true)
        })
    }

    /// Moves an entry. The destination name must be free.
    ///
    /// # Errors
    ///
    /// Returns a policy error if the source is missing, the destination is
    /// taken, or a directory would move into itself.
    pub fn rename(&self, from: &str, to: &str) -> CoreResult<()> {
        self.mutate(|store| {
            let (from_parent_path, from_name) = split_parent(from)?;
            let from_parent = resolve(store, &from_parent_path)?;
            let id = resolve(store, from)?;
            let (to_parent, to_name) = free_slot(store, to)?;

            let w = store.working_version();
            let mut cursor = to_parent;
            while !cursor.is_root() {
                if cursor == id {
                    return Err(CoreError::policy(format!("cannot move {from} into itself")));
                }
                match store.links_to(&cursor, w)?.first() {
                    Some((parent, _)) => cursor = *parent,
                    None => break,
                }
            }

            let now = Timestamp::now();
            store.unlink(&from_parent, &from_name)?;
            store.add_link(&to_parent, &to_name, &id)?;
            touch(store, &from_parent, now)?;
            if to_parent != from_parent {
                touch(store, &to_parent, now)?;
            }
            store.set_dirty(true)
        })
    }

    /// Removes an entry. Directories must be empty; the object goes away
    /// with its last link.
    ///
    /// # Errors
    ///
    /// Returns a policy error for the root, a missing path or a non-empty
    /// directory.
    pub fn remove(&self, path: &str) -> CoreResult<()> {
        self.mutate(|store| {
            let (parent_path, name) = split_parent(path)?;
            let parent = resolve(store, &parent_path)?;
            let id = resolve(store, path)?;
            let attrs = attrs_of(store, &id)?;
            let w = store.working_version();
            if attrs.is_dir() && !store.load_links(&id, w)?.is_empty() {
                return Err(CoreError::policy(format!("directory not empty: {path}")));
            }
            store.unlink(&parent, &name)?;
            if store.links_to(&id, w)?.is_empty() {
                store.remove_inode(&id)?;
                store.clear_staged(&id);
            } else {
                store.change_inode(
                    &id,
                    &AttrChanges {
                        nlink: Some(attrs.nlink.saturating_sub(1).max(1)),
                        ..AttrChanges::default()
                    },
                )?;
            }
            touch(store, &parent, Timestamp::now())?;
            store.set_dirty(true)
        })
    }

    /// Sets the permission bits.
    ///
    /// # Errors
    ///
    /// Returns a policy error if `path` does not resolve.
    pub fn set_mode(&self, path: &str, mode: u32) -> CoreResult<()> {
        self.change(
            path,
            AttrChanges {
                mode: Some(mode & 0o7777),
                ..AttrChanges::default()
            },
        )
    }

    /// Sets owner and group.
    ///
    /// # Errors
    ///
    /// Returns a policy error if `path` does not resolve.
    pub fn set_owner(&self, path: &str, uid: u32, gid: u32) -> CoreResult<()> {
        self.change(
            path,
            AttrChanges {
                uid: Some(uid),
                gid: Some(gid),
                ..AttrChanges::default()
            },
        )
    }

    /// Sets the modification time.
    ///
    /// # Errors
    ///
    /// Returns a policy error if `path` does not resolve.
    pub fn set_times(&self, path: &str, mtime: Timestamp) -> CoreResult<()> {
        self.change(
            path,
            AttrChanges {
                mtime: Some(mtime),
                ..AttrChanges::default()
            },
        )
    }

    fn change(&self, path: &str, changes: AttrChanges) -> CoreResult<()> {
        self.mutate(|store| {
            let id = resolve(store, path)?;
            store.change_inode(&id, &changes)?;
            store.set_dirty(true)
        })
    }

    /// Attributes of the object at `path` in the working version.
    ///
    /// # Errors
    ///
    /// Returns a policy error if `path` does not resolve.
    pub fn stat(&self, path: &str) -> CoreResult<InodeAttrs> {
        self.read(|store| {
            let id = resolve(store, path)?;
            attrs_of(store, &id)
        })
    }

    /// The id `path` resolves to in the working version.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub fn resolve_path(&self, path: &str) -> CoreResult<Option<Identifier>> {
        self.read(|store| store.resolve_path(path, store.working_version()))
    }

    /// Entries of the directory at `path`, in name order.
    ///
    /// # Errors
    ///
    /// Returns a policy error if `path` is not a directory.
    pub fn read_dir(&self, path: &str) -> CoreResult<Vec<DirEntry>> {
        self.read(|store| {
            let id = resolve(store, path)?;
            if !attrs_of(store, &id)?.is_dir() {
                return Err(CoreError::policy(format!("not a directory: {path}")));
            }
            store
                .load_links(&id, store.working_version())?
                .into_iter()
                .map(|link| {
                    Ok(DirEntry {
                        attrs: attrs_of(store, &link.inode)?,
                        name: link.name,
                        id: link.inode,
                    })
                })
                .collect()
        })
    }

    /// Content of the regular file at `path`.
    ///
    /// # Errors
    ///
    /// Returns a policy error if `path` is not a regular file, or
    /// `ObjectMissing` if its content was never fetched.
    pub fn read_file(&self, path: &str) -> CoreResult<Bytes> {
        let (id, content) = self.read(|store| {
            let id = resolve(store, path)?;
            let attrs = attrs_of(store, &id)?;
            if attrs.kind != ObjectKind::File {
                return Err(CoreError::policy(format!("not a regular file: {path}")));
            }
            Ok((id, attrs.content))
        })?;
        match content {
            Content::Pending => {
                let staged = self.read(|store| store.staged_content(&id))?;
                Ok(Bytes::from(staged.unwrap_or_default()))
            }
            Content::Hash(hash) => Ok(Bytes::from(self.objects().require(&hash)?)),
            Content::None => Ok(Bytes::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepoConfig;

    fn repo() -> Repository {
        let repo = Repository::open_in_memory(RepoConfig::default());
        repo.init().unwrap();
        repo
    }

    #[test]
    fn path_helpers() {
        assert_eq!(split_parent("/a/b/c").unwrap(), ("a/b".into(), "c".into()));
        assert_eq!(split_parent("top").unwrap(), (String::new(), "top".into()));
        assert!(split_parent("/").is_err());
        assert!(split_parent("/a/..").is_err());
    }

    #[test]
    fn files_and_directories() {
        let repo = repo();
        repo.mkdir("/docs").unwrap();
        repo.create_file("/docs/a.txt", b"alpha").unwrap();
        assert_eq!(&repo.read_file("/docs/a.txt").unwrap()[..], b"alpha");
        assert!(repo.is_dirty().unwrap());

        repo.commit("docs").unwrap();
        let attrs = repo.stat("/docs/a.txt").unwrap();
        assert!(matches!(attrs.content, Content::Hash(_)));
        assert_eq!(attrs.size, 5);
        assert_eq!(&repo.read_file("/docs/a.txt").unwrap()[..], b"alpha");

        repo.write_file("/docs/a.txt", b"beta").unwrap();
        assert_eq!(&repo.read_file("/docs/a.txt").unwrap()[..], b"beta");
        let names: Vec<String> = repo
            .read_dir("/docs")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.txt"]);
    }

    #[test]
    fn rename_and_remove() {
        let repo = repo();
        repo.mkdir("/a").unwrap();
        repo.mkdir("/a/b").unwrap();
        repo.create_file("/f", b"x").unwrap();
        repo.rename("/f", "/a/g").unwrap();
        assert!(repo.resolve_path("/f").unwrap().is_none());
        assert!(repo.resolve_path("/a/g").unwrap().is_some());

        assert!(matches!(repo.rename("/a", "/a/b/c"), Err(CoreError::Policy { .. })));
        assert!(matches!(repo.remove("/a"), Err(CoreError::Policy { .. })));

        repo.remove("/a/g").unwrap();
        repo.remove("/a/b").unwrap();
        repo.remove("/a").unwrap();
        assert!(repo.read_dir("/").unwrap().is_empty());
        assert!(matches!(repo.remove("/"), Err(CoreError::Policy { .. })));
    }

    #[test]
    fn hard_links_share_the_object() {
        let repo = repo();
        let id = repo.create_file("/one", b"shared").unwrap();
        repo.link("/one", "/two").unwrap();
        assert_eq!(repo.resolve_path("/two").unwrap(), Some(id));
        assert_eq!(repo.stat("/one").unwrap().nlink, 2);
        repo.remove("/one").unwrap();
        assert_eq!(repo.stat("/two").unwrap().nlink, 1);
        assert_eq!(&repo.read_file("/two").unwrap()[..], b"shared");
    }

    #[test]
    fn special_objects() {
        let repo = repo();
        repo.symlink("/ln", "target/path").unwrap();
        assert_eq!(repo.stat("/ln").unwrap().target, "target/path");
        repo.mknod("/null", ObjectKind::CharDevice, 1, 3).unwrap();
        assert_eq!(repo.stat("/null").unwrap().dev_minor, 3);
        assert!(repo.mknod("/d", ObjectKind::Directory, 0, 0).is_err());
        repo.set_mode("/null", 0o600).unwrap();
        repo.set_owner("/null", 10, 20).unwrap();
        let attrs = repo.stat("/null").unwrap();
        assert_eq!((attrs.mode, attrs.uid, attrs.gid), (0o600, 10, 20));
    }

    #[test]
    fn uninitialized_repository_rejects_mutations() {
        let repo = Repository::open_in_memory(RepoConfig::default());
        assert!(matches!(repo.mkdir("/x"), Err(CoreError::NotInitialized)));
    }
}
