/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::ffi::{OsStr, OsString};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::errors::{FsError, Result};
use crate::node::{
    FileContent, Ino, Mode, NodeKind, NodePayload, NodeStat, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE,
    MODE_MASK, ROOT_INO,
};
use crate::pathname::{Name, PathName};
use crate::store::NodeStore;

/// The in-memory filesystem. Cheap to clone; all clones share one tree.
///
/// Every operation takes an absolute `/`-separated path and is atomic with
/// respect to all other tree and kernel-side calls.
#[derive(Clone)]
pub struct MemFs {
    inner: Arc<FsInner>,
}

/// Shared tree state: the node store behind the structural reader-writer
/// lock. The kernel adapter holds its own reference and goes through the
/// same entry points as the typed API.
pub(crate) struct FsInner {
    store: RwLock<NodeStore>,
}

/// Synthetic filesystem totals reported through `statfs`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FsTotals {
    pub bytes: u64,
    pub nodes: u64,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    /// Creates an empty tree whose root directory is owned by the calling
    /// process's effective uid/gid.
    pub fn new() -> Self {
        let uid = unsafe { libc::geteuid() };
        let gid = unsafe { libc::getegid() };
        MemFs {
            inner: Arc::new(FsInner {
                store: RwLock::new(NodeStore::new(uid, gid)),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<FsInner> {
        &self.inner
    }

    /// The root directory; its name is empty and its inode is fixed at 1.
    pub fn root(&self) -> Directory {
        Directory {
            fs: self.inner.clone(),
            ino: ROOT_INO,
        }
    }

    pub fn create_file(&self, path: &str, data: &[u8]) -> Result<File> {
        self.create_file_with_mode(path, data, DEFAULT_FILE_MODE)
    }

    pub fn create_file_with_mode(&self, path: &str, data: &[u8], mode: Mode) -> Result<File> {
        let path = PathName::from(path);
        let mut store = self.inner.store.write();
        let (parent, name) = store.resolve_parent(&path)?;
        let (uid, gid) = (store.owner_uid(), store.owner_gid());
        let ino = store.create_file_at(parent, &name, data.to_vec(), mode, uid, gid)?;
        Ok(File {
            fs: self.inner.clone(),
            ino,
        })
    }

    pub fn create_dir(&self, path: &str) -> Result<Directory> {
        self.create_dir_with_mode(path, DEFAULT_DIR_MODE)
    }

    pub fn create_dir_with_mode(&self, path: &str, mode: Mode) -> Result<Directory> {
        let path = PathName::from(path);
        let mut store = self.inner.store.write();
        let (parent, name) = store.resolve_parent(&path)?;
        let (uid, gid) = (store.owner_uid(), store.owner_gid());
        let ino = store.create_dir_at(parent, &name, mode, uid, gid)?;
        Ok(Directory {
            fs: self.inner.clone(),
            ino,
        })
    }

    /// Stores `target` verbatim; the target is never validated or resolved
    /// at creation time.
    pub fn symlink(&self, target: &str, path: &str) -> Result<Symlink> {
        let path = PathName::from(path);
        let mut store = self.inner.store.write();
        let (parent, name) = store.resolve_parent(&path)?;
        let (uid, gid) = (store.owner_uid(), store.owner_gid());
        let ino = store.create_symlink_at(parent, &name, OsString::from(target), uid, gid)?;
        Ok(Symlink {
            fs: self.inner.clone(),
            ino,
        })
    }

    /// Creates every missing directory along `path`, similar to `mkdir -p`.
    /// Succeeds if the final directory already exists.
    pub fn makedirs(&self, path: &str) -> Result<Directory> {
        self.makedirs_with_mode(path, DEFAULT_DIR_MODE)
    }

    pub fn makedirs_with_mode(&self, path: &str, mode: Mode) -> Result<Directory> {
        let path = PathName::from(path);
        if !path.is_valid() {
            return Err(FsError::InvalidPath(path));
        }
        let mut store = self.inner.store.write();
        let (uid, gid) = (store.owner_uid(), store.owner_gid());
        let mut cur = ROOT_INO;
        let mut walked = String::new();
        for segment in path.segments() {
            walked.push('/');
            walked.push_str(segment);
            match store.lookup_child(cur, OsStr::new(segment))? {
                Some(child) => {
                    let resolved = store.follow(child)?;
                    if !store.node(resolved)?.is_dir() {
                        return Err(FsError::NotADir(walked.clone().into()));
                    }
                    cur = resolved;
                }
                None => {
                    cur = store.create_dir_at(cur, OsStr::new(segment), mode, uid, gid)?;
                }
            }
        }
        Ok(Directory {
            fs: self.inner.clone(),
            ino: cur,
        })
    }

    /// Resolves `path` without following a terminal symlink.
    pub fn get(&self, path: &str) -> Result<NodeRef> {
        let path = PathName::from(path);
        let store = self.inner.store.read();
        let ino = store.resolve(&path, false)?;
        Ok(self.node_ref(&store, ino))
    }

    /// True iff `get` would succeed; the empty path and `/` are always true.
    pub fn exists(&self, path: &str) -> bool {
        if path.is_empty() {
            return true;
        }
        let path = PathName::from(path);
        if path.is_root() {
            return true;
        }
        self.inner.store.read().resolve(&path, false).is_ok()
    }

    /// Current child names of the directory at `path`, in a stable order.
    pub fn listdir(&self, path: &str) -> Result<Vec<Name>> {
        let path = PathName::from(path);
        let store = self.inner.store.read();
        let ino = store.resolve(&path, true)?;
        let node = store.node(ino)?;
        let entries = node.entries().ok_or(FsError::NotADir(path))?;
        Ok(entries.keys().cloned().collect())
    }

    /// Unlinks a file or symlink. The terminal symlink itself is removed,
    /// never its target.
    pub fn remove_file(&self, path: &str) -> Result<()> {
        let path = PathName::from(path);
        let mut store = self.inner.store.write();
        let (parent, name) = store.resolve_parent(&path)?;
        store.unlink_file_at(parent, &name)
    }

    /// Removes an empty directory.
    pub fn remove_dir(&self, path: &str) -> Result<()> {
        let path = PathName::from(path);
        if path.is_root() {
            return Err(FsError::RootRemovalForbidden);
        }
        let mut store = self.inner.store.write();
        let (parent, name) = store.resolve_parent(&path)?;
        store.remove_dir_at(parent, &name)
    }

    /// Atomically moves `src` to `dst`, replacing a compatible existing
    /// destination. See `NodeStore::rename_at` for the rule table.
    pub fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let src = PathName::from(src);
        let dst = PathName::from(dst);
        let mut store = self.inner.store.write();
        let (src_parent, src_name) = store.resolve_parent(&src)?;
        if store.lookup_child(src_parent, &src_name)?.is_none() {
            return Err(FsError::NotFound(src));
        }
        let (dst_parent, dst_name) = store.resolve_parent(&dst)?;
        store.rename_at(src_parent, &src_name, dst_parent, &dst_name)
    }

    /// Returns the stored symlink target verbatim.
    pub fn readlink(&self, path: &str) -> Result<OsString> {
        let path = PathName::from(path);
        let store = self.inner.store.read();
        let ino = store.resolve(&path, false)?;
        store
            .node(ino)?
            .symlink_target()
            .map(|target| target.to_os_string())
            .ok_or(FsError::NotASymlink(path))
    }

    pub fn is_symlink(&self, path: &str) -> bool {
        matches!(self.get(path), Ok(NodeRef::Symlink(_)))
    }

    /// Follows a terminal symlink, like `chmod` on a path does.
    pub fn chmod(&self, path: &str, mode: Mode) -> Result<()> {
        let ino = self.resolve_following(path)?;
        self.inner.set_mode(ino, mode)
    }

    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        let ino = self.resolve_following(path)?;
        self.inner.set_owner(ino, Some(uid), Some(gid))
    }

    /// Explicitly sets access and modification times; these are the only
    /// updates allowed to move times backwards.
    pub fn utime(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        let ino = self.resolve_following(path)?;
        self.inner.set_times(ino, Some(atime), Some(mtime))
    }

    pub fn stat(&self, path: &str) -> Result<NodeStat> {
        let ino = self.resolve_following(path)?;
        self.inner.attr(ino)
    }

    fn resolve_following(&self, path: &str) -> Result<Ino> {
        let path = PathName::from(path);
        self.inner.store.read().resolve(&path, true)
    }

    fn node_ref(&self, store: &NodeStore, ino: Ino) -> NodeRef {
        let kind = store
            .node(ino)
            .map(|node| node.kind())
            .unwrap_or(NodeKind::File);
        match kind {
            NodeKind::File => NodeRef::File(File {
                fs: self.inner.clone(),
                ino,
            }),
            NodeKind::Dir => NodeRef::Directory(Directory {
                fs: self.inner.clone(),
                ino,
            }),
            NodeKind::Symlink => NodeRef::Symlink(Symlink {
                fs: self.inner.clone(),
                ino,
            }),
        }
    }
}

/// Inode-level entry points. The kernel adapter calls these directly since
/// kernel requests address nodes by inode, not by path.
impl FsInner {
    pub(crate) fn attr(&self, ino: Ino) -> Result<NodeStat> {
        self.store.read().stat_of(ino)
    }

    pub(crate) fn dir_lookup(&self, parent: Ino, name: &OsStr) -> Result<NodeStat> {
        let store = self.store.read();
        let ino = store.lookup_child(parent, name)?.ok_or_else(|| {
            FsError::NotFound(store.path_of(parent).join(&name.to_string_lossy()))
        })?;
        store.stat_of(ino)
    }

    pub(crate) fn dir_entries(&self, ino: Ino) -> Result<Vec<(Ino, NodeKind, Name)>> {
        let store = self.store.read();
        let node = store.node(ino)?;
        let entries = node
            .entries()
            .ok_or_else(|| FsError::NotADir(store.path_of(ino)))?;
        entries
            .iter()
            .map(|(name, &child)| Ok((child, store.node(child)?.kind(), name.clone())))
            .collect()
    }

    /// Parent inode for `..` synthesis; the root is its own parent.
    pub(crate) fn dir_parent(&self, ino: Ino) -> Result<Ino> {
        let store = self.store.read();
        Ok(store.node(ino)?.parent.unwrap_or(ROOT_INO))
    }

    pub(crate) fn make_file(
        &self,
        parent: Ino,
        name: &OsStr,
        mode: Mode,
        uid: u32,
        gid: u32,
    ) -> Result<NodeStat> {
        let mut store = self.store.write();
        let ino = store.create_file_at(parent, name, Vec::new(), mode, uid, gid)?;
        store.stat_of(ino)
    }

    pub(crate) fn make_dir(
        &self,
        parent: Ino,
        name: &OsStr,
        mode: Mode,
        uid: u32,
        gid: u32,
    ) -> Result<NodeStat> {
        let mut store = self.store.write();
        let ino = store.create_dir_at(parent, name, mode, uid, gid)?;
        store.stat_of(ino)
    }

    pub(crate) fn make_symlink(
        &self,
        parent: Ino,
        name: &OsStr,
        target: &OsStr,
        uid: u32,
        gid: u32,
    ) -> Result<NodeStat> {
        let mut store = self.store.write();
        let ino = store.create_symlink_at(parent, name, target.to_os_string(), uid, gid)?;
        store.stat_of(ino)
    }

    pub(crate) fn unlink_entry(&self, parent: Ino, name: &OsStr) -> Result<()> {
        self.store.write().unlink_file_at(parent, name)
    }

    pub(crate) fn remove_dir_entry(&self, parent: Ino, name: &OsStr) -> Result<()> {
        self.store.write().remove_dir_at(parent, name)
    }

    pub(crate) fn move_entry(
        &self,
        parent: Ino,
        name: &OsStr,
        new_parent: Ino,
        new_name: &OsStr,
    ) -> Result<()> {
        self.store
            .write()
            .rename_at(parent, name, new_parent, new_name)
    }

    pub(crate) fn link_target(&self, ino: Ino) -> Result<OsString> {
        let store = self.store.read();
        store
            .node(ino)?
            .symlink_target()
            .map(|target| target.to_os_string())
            .ok_or_else(|| FsError::NotASymlink(store.path_of(ino)))
    }

    /// Clones the file's shared content buffer. The structural lock is
    /// released before the caller takes the per-file data lock.
    fn file_content(&self, ino: Ino) -> Result<FileContent> {
        let store = self.store.read();
        match &store.node(ino)?.payload {
            NodePayload::File(content) => Ok(content.clone()),
            NodePayload::Dir(_) => Err(FsError::IsADir(store.path_of(ino))),
            NodePayload::Symlink(_) => Err(FsError::NotAFile(store.path_of(ino))),
        }
    }

    /// Same as `file_content` but for mutation: bumps mtime/ctime under the
    /// structural writer lock before handing the buffer out.
    fn file_content_touch(&self, ino: Ino) -> Result<FileContent> {
        let mut store = self.store.write();
        let content = match &store.node(ino)?.payload {
            NodePayload::File(content) => content.clone(),
            NodePayload::Dir(_) => return Err(FsError::IsADir(store.path_of(ino))),
            NodePayload::Symlink(_) => return Err(FsError::NotAFile(store.path_of(ino))),
        };
        store.node_mut(ino)?.meta.touch_mtime();
        Ok(content)
    }

    pub(crate) fn file_read(&self, ino: Ino, offset: u64, size: u64) -> Result<Vec<u8>> {
        let content = self.file_content(ino)?;
        let bytes = content.read();
        let len = bytes.len() as u64;
        if offset >= len {
            return Ok(Vec::new());
        }
        let end = len.min(offset.saturating_add(size)) as usize;
        Ok(bytes[offset as usize..end].to_vec())
    }

    pub(crate) fn file_read_all(&self, ino: Ino) -> Result<Vec<u8>> {
        let content = self.file_content(ino)?;
        let bytes = content.read();
        Ok(bytes.clone())
    }

    /// Writes at `offset`, zero-filling any gap past the current size.
    pub(crate) fn file_write(&self, ino: Ino, offset: u64, data: &[u8]) -> Result<u64> {
        let content = self.file_content_touch(ino)?;
        let mut bytes = content.write();
        let offset = offset as usize;
        if bytes.len() < offset {
            bytes.resize(offset, 0);
        }
        let end = offset + data.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[offset..end].copy_from_slice(data);
        Ok(data.len() as u64)
    }

    /// Replaces the whole file content.
    pub(crate) fn file_replace(&self, ino: Ino, data: &[u8]) -> Result<()> {
        let content = self.file_content_touch(ino)?;
        let mut bytes = content.write();
        bytes.clear();
        bytes.extend_from_slice(data);
        Ok(())
    }

    /// Zero-fills on extension, discards the tail on shrink.
    pub(crate) fn file_truncate(&self, ino: Ino, size: u64) -> Result<()> {
        let content = self.file_content_touch(ino)?;
        let mut bytes = content.write();
        bytes.resize(size as usize, 0);
        Ok(())
    }

    pub(crate) fn set_mode(&self, ino: Ino, mode: Mode) -> Result<()> {
        let mut store = self.store.write();
        let node = store.node_mut(ino)?;
        node.meta.mode = mode & MODE_MASK;
        node.meta.touch_ctime();
        Ok(())
    }

    pub(crate) fn set_owner(&self, ino: Ino, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        let mut store = self.store.write();
        let node = store.node_mut(ino)?;
        if let Some(uid) = uid {
            node.meta.uid = uid;
        }
        if let Some(gid) = gid {
            node.meta.gid = gid;
        }
        node.meta.touch_ctime();
        Ok(())
    }

    pub(crate) fn set_times(
        &self,
        ino: Ino,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> Result<()> {
        let mut store = self.store.write();
        store.node_mut(ino)?.meta.set_times(atime, mtime);
        Ok(())
    }

    pub(crate) fn handle_open(&self, ino: Ino) -> Result<()> {
        self.store.write().open_handle(ino)
    }

    pub(crate) fn handle_release(&self, ino: Ino) {
        self.store.write().release_handle(ino);
    }

    pub(crate) fn totals(&self) -> FsTotals {
        let store = self.store.read();
        let bytes = store
            .nodes()
            .filter_map(|node| node.content())
            .map(|content| content.read().len() as u64)
            .sum::<u64>();
        FsTotals {
            bytes,
            nodes: store.node_count(),
        }
    }
}

/// A resolved node of any kind.
#[derive(Clone)]
pub enum NodeRef {
    File(File),
    Directory(Directory),
    Symlink(Symlink),
}

impl NodeRef {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeRef::File(_) => NodeKind::File,
            NodeRef::Directory(_) => NodeKind::Dir,
            NodeRef::Symlink(_) => NodeKind::Symlink,
        }
    }

    pub fn ino(&self) -> Ino {
        match self {
            NodeRef::File(f) => f.ino,
            NodeRef::Directory(d) => d.ino,
            NodeRef::Symlink(s) => s.ino,
        }
    }
}

/// Typed handle to a file node, backed by the live tree.
#[derive(Clone)]
pub struct File {
    fs: Arc<FsInner>,
    ino: Ino,
}

impl File {
    pub fn ino(&self) -> Ino {
        self.ino
    }

    pub fn name(&self) -> Result<Name> {
        let store = self.fs.store.read();
        Ok(store.node(self.ino)?.meta.name.clone())
    }

    pub fn mode(&self) -> Result<Mode> {
        Ok(self.fs.attr(self.ino)?.mode)
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.fs.attr(self.ino)?.size)
    }

    pub fn stat(&self) -> Result<NodeStat> {
        self.fs.attr(self.ino)
    }

    /// Reads the whole content.
    pub fn read(&self) -> Result<Vec<u8>> {
        self.fs.file_read_all(self.ino)
    }

    /// Reads up to `size` bytes from `offset`; short at end of file, empty
    /// past it.
    pub fn read_at(&self, offset: u64, size: u64) -> Result<Vec<u8>> {
        self.fs.file_read(self.ino, offset, size)
    }

    /// Replaces the whole content.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.fs.file_replace(self.ino, data)
    }

    /// Writes at `offset`, zero-filling any gap, and returns the number of
    /// bytes written.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<u64> {
        self.fs.file_write(self.ino, offset, data)
    }

    pub fn truncate(&self, size: u64) -> Result<()> {
        self.fs.file_truncate(self.ino, size)
    }
}

/// Typed handle to a directory node.
#[derive(Clone)]
pub struct Directory {
    fs: Arc<FsInner>,
    ino: Ino,
}

impl Directory {
    pub fn ino(&self) -> Ino {
        self.ino
    }

    pub fn name(&self) -> Result<Name> {
        let store = self.fs.store.read();
        Ok(store.node(self.ino)?.meta.name.clone())
    }

    pub fn mode(&self) -> Result<Mode> {
        Ok(self.fs.attr(self.ino)?.mode)
    }

    pub fn stat(&self) -> Result<NodeStat> {
        self.fs.attr(self.ino)
    }

    pub fn list(&self) -> Result<Vec<Name>> {
        Ok(self
            .fs
            .dir_entries(self.ino)?
            .into_iter()
            .map(|(_, _, name)| name)
            .collect())
    }
}

/// Typed handle to a symlink node.
#[derive(Clone)]
pub struct Symlink {
    fs: Arc<FsInner>,
    ino: Ino,
}

impl Symlink {
    pub fn ino(&self) -> Ino {
        self.ino
    }

    pub fn name(&self) -> Result<Name> {
        let store = self.fs.store.read();
        Ok(store.node(self.ino)?.meta.name.clone())
    }

    pub fn target(&self) -> Result<OsString> {
        self.fs.link_target(self.ino)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::thread;

    use super::*;

    #[test]
    fn test_create_file() {
        let fs = MemFs::new();
        let f = fs.create_file("/test.txt", b"Hello, World!").unwrap();
        assert_eq!(Name::from("test.txt"), f.name().unwrap());
        assert_eq!(13, f.size().unwrap());
        assert_eq!(b"Hello, World!".to_vec(), f.read().unwrap());
        assert!(fs.exists("/test.txt"));
    }

    #[test]
    fn test_create_file_empty() {
        let fs = MemFs::new();
        let f = fs.create_file("/empty.txt", b"").unwrap();
        assert_eq!(0, f.size().unwrap());
        assert_eq!(Vec::<u8>::new(), f.read().unwrap());
    }

    #[test]
    fn test_create_nested_file() {
        let fs = MemFs::new();
        fs.create_dir("/subdir").unwrap();
        let f = fs.create_file("/subdir/nested.txt", b"Nested content").unwrap();
        assert_eq!(Name::from("nested.txt"), f.name().unwrap());
        assert_eq!(b"Nested content".to_vec(), f.read().unwrap());
    }

    #[test]
    fn test_create_in_missing_dir() {
        let fs = MemFs::new();
        assert_eq!(
            Err(FsError::NotFound("/no".into())),
            fs.create_file("/no/file.txt", b"x").map(|_| ())
        );
    }

    #[test]
    fn test_duplicate_file() {
        let fs = MemFs::new();
        fs.create_file("/dup.txt", b"first").unwrap();
        assert_eq!(
            Err(FsError::AlreadyExists("/dup.txt".into())),
            fs.create_file("/dup.txt", b"second").map(|_| ())
        );
    }

    #[test]
    fn test_duplicate_dir() {
        let fs = MemFs::new();
        fs.create_dir("/dupdir").unwrap();
        assert_eq!(
            Err(FsError::AlreadyExists("/dupdir".into())),
            fs.create_dir("/dupdir").map(|_| ())
        );
    }

    #[test]
    fn test_get() {
        let fs = MemFs::new();
        fs.create_file("/f", b"content").unwrap();
        fs.create_dir("/d").unwrap();
        assert!(matches!(fs.get("/f").unwrap(), NodeRef::File(_)));
        assert!(matches!(fs.get("/d").unwrap(), NodeRef::Directory(_)));
        assert_eq!(
            Err(FsError::NotFound("/missing".into())),
            fs.get("/missing").map(|_| ())
        );
    }

    #[test]
    fn test_exists() {
        let fs = MemFs::new();
        fs.create_file("/exists.txt", b"I exist").unwrap();
        assert!(fs.exists("/exists.txt"));
        assert!(!fs.exists("/does_not_exist.txt"));
        // The empty path and the root path always refer to the root.
        assert!(fs.exists(""));
        assert!(fs.exists("/"));
    }

    #[test]
    fn test_root() {
        let fs = MemFs::new();
        let root = fs.root();
        assert_eq!(ROOT_INO, root.ino());
        assert_eq!(Name::new(), root.name().unwrap());
        assert_eq!(NodeKind::Dir, root.stat().unwrap().kind);
    }

    #[test]
    fn test_makedirs() {
        let fs = MemFs::new();
        let d = fs.makedirs("/a/b/c/d").unwrap();
        assert_eq!(Name::from("d"), d.name().unwrap());
        for path in ["/a", "/a/b", "/a/b/c", "/a/b/c/d"] {
            assert!(fs.exists(path));
            assert!(matches!(fs.get(path).unwrap(), NodeRef::Directory(_)));
        }
    }

    #[test]
    fn test_makedirs_existing_ok() {
        let fs = MemFs::new();
        fs.makedirs("/a/b").unwrap();
        fs.makedirs("/a/b").unwrap();
        fs.makedirs("/a/b/c").unwrap();
        assert!(fs.exists("/a/b/c"));
    }

    #[test]
    fn test_makedirs_through_file_fails() {
        let fs = MemFs::new();
        fs.create_file("/a", b"").unwrap();
        assert_eq!(
            Err(FsError::NotADir("/a".into())),
            fs.makedirs("/a/b").map(|_| ())
        );
    }

    #[test]
    fn test_listdir() {
        let fs = MemFs::new();
        fs.create_file("/a.txt", b"a").unwrap();
        fs.create_file("/b.txt", b"b").unwrap();
        fs.create_dir("/subdir").unwrap();
        let contents: HashSet<Name> = fs.listdir("/").unwrap().into_iter().collect();
        let expected: HashSet<Name> = ["a.txt", "b.txt", "subdir"]
            .into_iter()
            .map(Name::from)
            .collect();
        assert_eq!(expected, contents);
    }

    #[test]
    fn test_listdir_not_a_dir() {
        let fs = MemFs::new();
        fs.create_file("/f", b"").unwrap();
        assert_eq!(Err(FsError::NotADir("/f".into())), fs.listdir("/f"));
    }

    #[test]
    fn test_listdir_completeness() {
        let fs = MemFs::new();
        for i in 0..10 {
            fs.create_file(&format!("/f{}", i), b"").unwrap();
        }
        fs.remove_file("/f3").unwrap();
        fs.remove_file("/f7").unwrap();
        let names: HashSet<Name> = fs.listdir("/").unwrap().into_iter().collect();
        let expected: HashSet<Name> = (0..10)
            .filter(|i| *i != 3 && *i != 7)
            .map(|i| Name::from(format!("f{}", i)))
            .collect();
        assert_eq!(expected, names);
    }

    #[test]
    fn test_remove_file() {
        let fs = MemFs::new();
        fs.create_file("/temp.txt", b"temporary").unwrap();
        assert!(fs.exists("/temp.txt"));
        fs.remove_file("/temp.txt").unwrap();
        assert!(!fs.exists("/temp.txt"));
    }

    #[test]
    fn test_remove_file_on_dir() {
        let fs = MemFs::new();
        fs.create_dir("/d").unwrap();
        assert_eq!(Err(FsError::IsADir("/d".into())), fs.remove_file("/d"));
    }

    #[test]
    fn test_remove_missing() {
        let fs = MemFs::new();
        assert_eq!(
            Err(FsError::NotFound("/gone".into())),
            fs.remove_file("/gone")
        );
    }

    #[test]
    fn test_remove_dir() {
        let fs = MemFs::new();
        fs.create_dir("/emptydir").unwrap();
        fs.remove_dir("/emptydir").unwrap();
        assert!(!fs.exists("/emptydir"));
    }

    #[test]
    fn test_remove_dir_not_empty() {
        let fs = MemFs::new();
        fs.create_dir("/notempty").unwrap();
        fs.create_file("/notempty/f", b"x").unwrap();
        assert_eq!(
            Err(FsError::NotEmpty("/notempty".into())),
            fs.remove_dir("/notempty")
        );
    }

    #[test]
    fn test_remove_root_forbidden() {
        let fs = MemFs::new();
        assert_eq!(Err(FsError::RootRemovalForbidden), fs.remove_dir("/"));
    }

    #[test]
    fn test_file_write_replaces() {
        let fs = MemFs::new();
        let f = fs.create_file("/writable.txt", b"initial").unwrap();
        f.write(b"updated content").unwrap();
        assert_eq!(b"updated content".to_vec(), f.read().unwrap());
        assert_eq!(15, f.size().unwrap());
        f.write(b"Hi").unwrap();
        assert_eq!(b"Hi".to_vec(), f.read().unwrap());
        assert_eq!(2, f.size().unwrap());
    }

    #[test]
    fn test_file_write_at_zero_fills_gap() {
        let fs = MemFs::new();
        let f = fs.create_file("/x", b"hi").unwrap();
        assert_eq!(2, f.write_at(5, b"yo").unwrap());
        assert_eq!(b"hi\x00\x00\x00yo".to_vec(), f.read().unwrap());
        assert_eq!(7, f.size().unwrap());
    }

    #[test]
    fn test_file_read_at() {
        let fs = MemFs::new();
        let f = fs.create_file("/r", b"Hello, World!").unwrap();
        assert_eq!(b"Hello".to_vec(), f.read_at(0, 5).unwrap());
        assert_eq!(b"World!".to_vec(), f.read_at(7, 100).unwrap());
        assert_eq!(Vec::<u8>::new(), f.read_at(100, 10).unwrap());
    }

    #[test]
    fn test_file_truncate_shrink() {
        let fs = MemFs::new();
        let f = fs.create_file("/truncate.txt", b"Hello, World!").unwrap();
        f.truncate(5).unwrap();
        assert_eq!(b"Hello".to_vec(), f.read().unwrap());
        assert_eq!(5, f.size().unwrap());
    }

    #[test]
    fn test_file_truncate_extend() {
        let fs = MemFs::new();
        let f = fs.create_file("/extend.txt", b"Hi").unwrap();
        f.truncate(10).unwrap();
        assert_eq!(10, f.size().unwrap());
        assert_eq!(b"Hi\x00\x00\x00\x00\x00\x00\x00\x00".to_vec(), f.read().unwrap());
    }

    #[test]
    fn test_modes() {
        let fs = MemFs::new();
        let f = fs.create_file_with_mode("/perms.txt", b"", 0o600).unwrap();
        assert_eq!(0o600, f.mode().unwrap());
        let d = fs.create_dir_with_mode("/private", 0o700).unwrap();
        assert_eq!(0o700, d.mode().unwrap());
    }

    #[test]
    fn test_chmod() {
        let fs = MemFs::new();
        fs.create_file("/perms.txt", b"content").unwrap();
        fs.chmod("/perms.txt", 0o600).unwrap();
        assert_eq!(0o600, fs.stat("/perms.txt").unwrap().mode);
    }

    #[test]
    fn test_chown() {
        let fs = MemFs::new();
        fs.create_file("/owned", b"").unwrap();
        fs.chown("/owned", 12, 34).unwrap();
        let stat = fs.stat("/owned").unwrap();
        assert_eq!(12, stat.uid);
        assert_eq!(34, stat.gid);
    }

    #[test]
    fn test_utime() {
        let fs = MemFs::new();
        fs.create_file("/timed.txt", b"content").unwrap();
        let atime = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
        let mtime = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(2_000_000);
        fs.utime("/timed.txt", atime, mtime).unwrap();
        let stat = fs.stat("/timed.txt").unwrap();
        assert_eq!(atime, stat.atime);
        assert_eq!(mtime, stat.mtime);
    }

    #[test]
    fn test_stat_fields() {
        let fs = MemFs::new();
        let f = fs.create_file("/f", &[7u8; 1000]).unwrap();
        let stat = f.stat().unwrap();
        assert_eq!(NodeKind::File, stat.kind);
        assert_eq!(1000, stat.size);
        assert_eq!(2, stat.blocks);
        assert_eq!(1, stat.nlink);
        fs.create_dir("/d").unwrap();
        fs.create_dir("/d/sub").unwrap();
        fs.create_file("/d/f", b"").unwrap();
        let stat = fs.stat("/d").unwrap();
        assert_eq!(NodeKind::Dir, stat.kind);
        assert_eq!(3, stat.nlink);
    }

    #[test]
    fn test_rename_file() {
        let fs = MemFs::new();
        fs.create_file("/old.txt", b"content").unwrap();
        fs.rename("/old.txt", "/new.txt").unwrap();
        assert!(!fs.exists("/old.txt"));
        assert!(fs.exists("/new.txt"));
        let NodeRef::File(f) = fs.get("/new.txt").unwrap() else {
            panic!("expected a file");
        };
        assert_eq!(b"content".to_vec(), f.read().unwrap());
    }

    #[test]
    fn test_rename_keeps_inode() {
        let fs = MemFs::new();
        let f = fs.create_file("/a", b"x").unwrap();
        let ino = f.ino();
        fs.rename("/a", "/b").unwrap();
        assert_eq!(ino, fs.get("/b").unwrap().ino());
        // The original handle still tracks the node under its new name.
        assert_eq!(Name::from("b"), f.name().unwrap());
    }

    #[test]
    fn test_rename_into_subdir() {
        let fs = MemFs::new();
        fs.create_file("/file.txt", b"content").unwrap();
        fs.create_dir("/subdir").unwrap();
        fs.rename("/file.txt", "/subdir/file.txt").unwrap();
        assert!(!fs.exists("/file.txt"));
        let NodeRef::File(f) = fs.get("/subdir/file.txt").unwrap() else {
            panic!("expected a file");
        };
        assert_eq!(b"content".to_vec(), f.read().unwrap());
    }

    #[test]
    fn test_rename_directory_with_contents() {
        let fs = MemFs::new();
        fs.create_dir("/olddir").unwrap();
        fs.create_file("/olddir/file.txt", b"content").unwrap();
        fs.rename("/olddir", "/newdir").unwrap();
        assert!(!fs.exists("/olddir"));
        assert!(fs.exists("/newdir"));
        assert!(fs.exists("/newdir/file.txt"));
    }

    #[test]
    fn test_rename_overwrites_file() {
        let fs = MemFs::new();
        fs.create_file("/src.txt", b"new content").unwrap();
        fs.create_file("/dst.txt", b"old content").unwrap();
        fs.rename("/src.txt", "/dst.txt").unwrap();
        assert!(!fs.exists("/src.txt"));
        let NodeRef::File(f) = fs.get("/dst.txt").unwrap() else {
            panic!("expected a file");
        };
        assert_eq!(b"new content".to_vec(), f.read().unwrap());
    }

    #[test]
    fn test_rename_file_over_dir() {
        let fs = MemFs::new();
        fs.create_file("/file.txt", b"content").unwrap();
        fs.create_dir("/dir").unwrap();
        assert_eq!(
            Err(FsError::IsADir("/dir".into())),
            fs.rename("/file.txt", "/dir")
        );
    }

    #[test]
    fn test_rename_dir_over_file() {
        let fs = MemFs::new();
        fs.create_dir("/dir").unwrap();
        fs.create_file("/file", b"").unwrap();
        assert_eq!(
            Err(FsError::NotADir("/file".into())),
            fs.rename("/dir", "/file")
        );
    }

    #[test]
    fn test_rename_dir_over_non_empty_dir() {
        let fs = MemFs::new();
        fs.create_dir("/src").unwrap();
        fs.create_dir("/dst").unwrap();
        fs.create_file("/dst/keep", b"").unwrap();
        assert_eq!(Err(FsError::NotEmpty("/dst".into())), fs.rename("/src", "/dst"));
        fs.remove_file("/dst/keep").unwrap();
        fs.rename("/src", "/dst").unwrap();
        assert!(!fs.exists("/src"));
    }

    #[test]
    fn test_rename_missing_source() {
        let fs = MemFs::new();
        assert_eq!(
            Err(FsError::NotFound("/missing".into())),
            fs.rename("/missing", "/anywhere")
        );
    }

    #[test]
    fn test_rename_into_own_subdir() {
        let fs = MemFs::new();
        fs.makedirs("/a/b").unwrap();
        assert!(matches!(
            fs.rename("/a", "/a/b/c"),
            Err(FsError::RenameIntoSelf(_, _))
        ));
    }

    #[test]
    fn test_rename_same_path_is_noop() {
        let fs = MemFs::new();
        let f = fs.create_file("/same", b"data").unwrap();
        fs.rename("/same", "/same").unwrap();
        assert_eq!(b"data".to_vec(), f.read().unwrap());
    }

    #[test]
    fn test_symlink() {
        let fs = MemFs::new();
        fs.create_file("/target.txt", b"content").unwrap();
        let link = fs.symlink("/target.txt", "/link.txt").unwrap();
        assert_eq!(Name::from("link.txt"), link.name().unwrap());
        assert_eq!(OsString::from("/target.txt"), link.target().unwrap());
        assert!(fs.is_symlink("/link.txt"));
        assert!(!fs.is_symlink("/target.txt"));
        assert_eq!(
            OsString::from("/target.txt"),
            fs.readlink("/link.txt").unwrap()
        );
    }

    #[test]
    fn test_readlink_on_file() {
        let fs = MemFs::new();
        fs.create_file("/f", b"").unwrap();
        assert_eq!(Err(FsError::NotASymlink("/f".into())), fs.readlink("/f"));
    }

    #[test]
    fn test_symlink_in_listdir() {
        let fs = MemFs::new();
        fs.create_file("/file.txt", b"content").unwrap();
        fs.symlink("/file.txt", "/link.txt").unwrap();
        let names: HashSet<Name> = fs.listdir("/").unwrap().into_iter().collect();
        let expected: HashSet<Name> = ["file.txt", "link.txt"].into_iter().map(Name::from).collect();
        assert_eq!(expected, names);
    }

    #[test]
    fn test_remove_symlink_keeps_target() {
        let fs = MemFs::new();
        fs.create_file("/target.txt", b"content").unwrap();
        fs.symlink("/target.txt", "/link.txt").unwrap();
        fs.remove_file("/link.txt").unwrap();
        assert!(!fs.exists("/link.txt"));
        assert!(fs.exists("/target.txt"));
    }

    #[test]
    fn test_broken_symlink() {
        let fs = MemFs::new();
        fs.symlink("/nonexistent.txt", "/broken.txt").unwrap();
        assert!(fs.is_symlink("/broken.txt"));
        assert_eq!(
            OsString::from("/nonexistent.txt"),
            fs.readlink("/broken.txt").unwrap()
        );
        // Removing the target of a symlink leaves the link behind, broken.
        fs.create_file("/t", b"").unwrap();
        fs.symlink("/t", "/l").unwrap();
        fs.remove_file("/t").unwrap();
        assert!(fs.is_symlink("/l"));
        assert_eq!(OsString::from("/t"), fs.readlink("/l").unwrap());
    }

    #[test]
    fn test_symlink_chain() {
        let fs = MemFs::new();
        fs.create_file("/target.txt", b"final content").unwrap();
        fs.symlink("/target.txt", "/link1.txt").unwrap();
        fs.symlink("/link1.txt", "/link2.txt").unwrap();
        assert_eq!(
            OsString::from("/target.txt"),
            fs.readlink("/link1.txt").unwrap()
        );
        assert_eq!(
            OsString::from("/link1.txt"),
            fs.readlink("/link2.txt").unwrap()
        );
        // stat follows the whole chain.
        assert_eq!(13, fs.stat("/link2.txt").unwrap().size);
    }

    #[test]
    fn test_chmod_follows_symlink() {
        let fs = MemFs::new();
        fs.create_file("/t", b"").unwrap();
        fs.symlink("/t", "/l").unwrap();
        fs.chmod("/l", 0o640).unwrap();
        assert_eq!(0o640, fs.stat("/t").unwrap().mode);
    }

    #[test]
    fn test_special_characters_in_names() {
        let fs = MemFs::new();
        for name in [
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file_with_underscores.txt",
        ] {
            let path = format!("/{}", name);
            fs.create_file(&path, b"content").unwrap();
            assert!(fs.exists(&path));
        }
    }

    #[test]
    fn test_large_file() {
        let fs = MemFs::new();
        let content = vec![b'x'; 1024 * 1024];
        let f = fs.create_file("/large.txt", &content).unwrap();
        assert_eq!(1024 * 1024, f.size().unwrap());
        assert_eq!(content, f.read().unwrap());
    }

    #[test]
    fn test_deep_directory_nesting() {
        let fs = MemFs::new();
        let deep: String = (0..50).map(|i| format!("/level{}", i)).collect();
        fs.makedirs(&deep).unwrap();
        assert!(fs.exists(&deep));
    }

    #[test]
    fn test_many_files_in_directory() {
        let fs = MemFs::new();
        for i in 0..1000 {
            fs.create_file(&format!("/file{}.txt", i), format!("content{}", i).as_bytes())
                .unwrap();
        }
        assert_eq!(1000, fs.listdir("/").unwrap().len());
    }

    #[test]
    fn test_concurrent_writers() {
        let fs = MemFs::new();
        fs.create_file("/shared.txt", b"initial").unwrap();
        let mut threads = vec![];
        for content in [b"thread1".to_vec(), b"thread2".to_vec()] {
            let fs = fs.clone();
            threads.push(thread::spawn(move || {
                let NodeRef::File(f) = fs.get("/shared.txt").unwrap() else {
                    panic!("expected a file");
                };
                f.write(&content).unwrap();
            }));
        }
        for t in threads {
            t.join().unwrap();
        }
        let NodeRef::File(f) = fs.get("/shared.txt").unwrap() else {
            panic!("expected a file");
        };
        let result = f.read().unwrap();
        assert!(result == b"thread1" || result == b"thread2");
    }

    #[test]
    fn test_unlinked_file_lives_while_kernel_handle_open() {
        let fs = MemFs::new();
        let f = fs.create_file("/victim", b"still readable").unwrap();
        let ino = f.ino();
        fs.inner().handle_open(ino).unwrap();
        fs.remove_file("/victim").unwrap();
        assert!(!fs.exists("/victim"));
        assert_eq!(
            b"still readable".to_vec(),
            fs.inner().file_read(ino, 0, 1024).unwrap()
        );
        fs.inner().handle_release(ino);
        assert_eq!(
            Err(FsError::BadHandle(ino)),
            fs.inner().file_read(ino, 0, 1024)
        );
    }

    #[test]
    fn test_totals() {
        let fs = MemFs::new();
        fs.create_file("/a", &[0u8; 100]).unwrap();
        fs.create_file("/b", &[0u8; 50]).unwrap();
        let totals = fs.inner().totals();
        assert_eq!(150, totals.bytes);
        // Root plus two files.
        assert_eq!(3, totals.nodes);
    }

    #[test]
    fn test_mutation_advances_times() {
        let fs = MemFs::new();
        let f = fs.create_file("/t", b"a").unwrap();
        let before = f.stat().unwrap();
        f.write(b"b").unwrap();
        let after = f.stat().unwrap();
        assert!(after.mtime >= before.mtime);
        assert!(after.ctime >= before.ctime);
    }
}
