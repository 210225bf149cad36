/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::{FsError, Result};
use crate::node::{Ino, Mode, Node, NodeKind, NodePayload, NodeStat, ROOT_INO};
use crate::pathname::{Name, PathName};

/// Bound on chained symlink resolutions before failing with a loop error.
const MAX_SYMLINK_FOLLOW: u32 = 40;

/// Owns every live node, keyed by inode. Structural state (entries, node
/// existence, metadata) is mutated only through this type, which the tree
/// wraps in a single reader-writer lock.
pub struct NodeStore {
    nodes: HashMap<Ino, Node>,
    next_ino: AtomicU64,
    owner_uid: u32,
    owner_gid: u32,
}

impl NodeStore {
    pub fn new(owner_uid: u32, owner_gid: u32) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_INO,
            Node::new_dir(ROOT_INO, Name::new(), 0o755, owner_uid, owner_gid),
        );
        NodeStore {
            nodes,
            next_ino: AtomicU64::new(ROOT_INO + 1),
            owner_uid,
            owner_gid,
        }
    }

    pub fn owner_uid(&self) -> u32 {
        self.owner_uid
    }

    pub fn owner_gid(&self) -> u32 {
        self.owner_gid
    }

    fn alloc_ino(&self) -> Ino {
        self.next_ino.fetch_add(1, Ordering::Relaxed)
    }

    pub fn node(&self, ino: Ino) -> Result<&Node> {
        self.nodes.get(&ino).ok_or(FsError::BadHandle(ino))
    }

    pub fn node_mut(&mut self, ino: Ino) -> Result<&mut Node> {
        self.nodes.get_mut(&ino).ok_or(FsError::BadHandle(ino))
    }

    pub fn node_count(&self) -> u64 {
        self.nodes.len() as u64
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Absolute path of a live node, rebuilt from parent links. Used for
    /// error reporting on inode-addressed operations.
    pub fn path_of(&self, ino: Ino) -> PathName {
        let mut segments = vec![];
        let mut cur = ino;
        while cur != ROOT_INO {
            match self.nodes.get(&cur) {
                Some(node) => {
                    segments.push(node.meta.name.to_string_lossy().into_owned());
                    match node.parent {
                        Some(parent) => cur = parent,
                        None => break,
                    }
                }
                None => break,
            }
        }
        segments.reverse();
        format!("/{}", segments.join("/")).into()
    }

    // -- resolution ----------------------------------------------------------

    /// Walks an absolute path to its node. With `follow_terminal` a symlink
    /// in the final position is resolved to its target; symlinks in the
    /// directory part are always followed.
    pub fn resolve(&self, path: &PathName, follow_terminal: bool) -> Result<Ino> {
        let mut budget = MAX_SYMLINK_FOLLOW;
        self.resolve_bounded(path, follow_terminal, &mut budget)
    }

    fn resolve_bounded(
        &self,
        path: &PathName,
        follow_terminal: bool,
        budget: &mut u32,
    ) -> Result<Ino> {
        if !path.is_valid() {
            return Err(FsError::InvalidPath(path.clone()));
        }
        let segments = path.segments();
        let mut cur = ROOT_INO;
        let mut walked = String::new();
        for (i, segment) in segments.iter().enumerate() {
            walked.push('/');
            walked.push_str(segment);
            let node = self.node(cur)?;
            let entries = node
                .entries()
                .ok_or_else(|| FsError::NotADir(self.path_of(cur)))?;
            let child = *entries
                .get(OsStr::new(*segment))
                .ok_or_else(|| FsError::NotFound(walked.clone().into()))?;
            let terminal = i + 1 == segments.len();
            let is_symlink = self.node(child)?.symlink_target().is_some();
            if is_symlink && (!terminal || follow_terminal) {
                let resolved = self.deref_symlink(child, budget)?;
                if terminal {
                    return Ok(resolved);
                }
                cur = resolved;
            } else {
                cur = child;
            }
        }
        Ok(cur)
    }

    /// Resolves a symlink node to its final target, following chains within
    /// the shared budget.
    fn deref_symlink(&self, ino: Ino, budget: &mut u32) -> Result<Ino> {
        let node = self.node(ino)?;
        let target = match node.symlink_target() {
            Some(target) => target,
            None => return Ok(ino),
        };
        if *budget == 0 {
            return Err(FsError::LoopDetected(self.path_of(ino)));
        }
        *budget -= 1;
        let target = target
            .to_str()
            .ok_or_else(|| FsError::InvalidPath(target.to_string_lossy().into_owned().into()))?;
        self.resolve_bounded(&target.into(), true, budget)
    }

    /// Follows `ino` through any symlink chain; non-symlinks come back as is.
    pub fn follow(&self, ino: Ino) -> Result<Ino> {
        let mut budget = MAX_SYMLINK_FOLLOW;
        self.deref_symlink(ino, &mut budget)
    }

    /// Resolves the parent directory of `path` and returns it with the
    /// terminal name, without requiring the final entry to exist.
    pub fn resolve_parent(&self, path: &PathName) -> Result<(Ino, Name)> {
        if !path.is_valid() || path.is_root() {
            return Err(FsError::InvalidPath(path.clone()));
        }
        let (parent_path, name) = path
            .split()
            .ok_or_else(|| FsError::InvalidPath(path.clone()))?;
        let parent = self.resolve(&parent_path, true)?;
        if !self.node(parent)?.is_dir() {
            return Err(FsError::NotADir(parent_path));
        }
        Ok((parent, name))
    }

    pub fn lookup_child(&self, parent: Ino, name: &OsStr) -> Result<Option<Ino>> {
        let node = self.node(parent)?;
        let entries = node
            .entries()
            .ok_or_else(|| FsError::NotADir(self.path_of(parent)))?;
        Ok(entries.get(name).copied())
    }

    /// True when `ancestor` is `ino` itself or any node on its parent chain.
    pub fn is_ancestor(&self, ancestor: Ino, ino: Ino) -> bool {
        let mut cur = Some(ino);
        while let Some(i) = cur {
            if i == ancestor {
                return true;
            }
            cur = self.nodes.get(&i).and_then(|node| node.parent);
        }
        false
    }

    // -- structural mutation -------------------------------------------------

    pub fn create_file_at(
        &mut self,
        parent: Ino,
        name: &OsStr,
        data: Vec<u8>,
        mode: Mode,
        uid: u32,
        gid: u32,
    ) -> Result<Ino> {
        self.check_new_entry(parent, name)?;
        let ino = self.alloc_ino();
        let node = Node::new_file(ino, name.to_os_string(), data, mode, uid, gid);
        self.nodes.insert(ino, node);
        self.link_child(parent, name, ino)?;
        Ok(ino)
    }

    pub fn create_dir_at(
        &mut self,
        parent: Ino,
        name: &OsStr,
        mode: Mode,
        uid: u32,
        gid: u32,
    ) -> Result<Ino> {
        self.check_new_entry(parent, name)?;
        let ino = self.alloc_ino();
        let node = Node::new_dir(ino, name.to_os_string(), mode, uid, gid);
        self.nodes.insert(ino, node);
        self.link_child(parent, name, ino)?;
        Ok(ino)
    }

    pub fn create_symlink_at(
        &mut self,
        parent: Ino,
        name: &OsStr,
        target: OsString,
        uid: u32,
        gid: u32,
    ) -> Result<Ino> {
        self.check_new_entry(parent, name)?;
        let ino = self.alloc_ino();
        let node = Node::new_symlink(ino, name.to_os_string(), target, uid, gid);
        self.nodes.insert(ino, node);
        self.link_child(parent, name, ino)?;
        Ok(ino)
    }

    /// Unlinks a file or symlink entry. Destruction is deferred while kernel
    /// handles remain open on the node.
    pub fn unlink_file_at(&mut self, parent: Ino, name: &OsStr) -> Result<()> {
        let ino = self
            .lookup_child(parent, name)?
            .ok_or_else(|| self.missing_entry(parent, name))?;
        if self.node(ino)?.is_dir() {
            return Err(FsError::IsADir(self.path_of(ino)));
        }
        self.unlink_child(parent, name)?;
        self.destroy_or_defer(ino);
        Ok(())
    }

    /// Removes an empty directory entry.
    pub fn remove_dir_at(&mut self, parent: Ino, name: &OsStr) -> Result<()> {
        let ino = self
            .lookup_child(parent, name)?
            .ok_or_else(|| self.missing_entry(parent, name))?;
        let node = self.node(ino)?;
        let entries = node
            .entries()
            .ok_or_else(|| FsError::NotADir(self.path_of(ino)))?;
        if !entries.is_empty() {
            return Err(FsError::NotEmpty(self.path_of(ino)));
        }
        self.unlink_child(parent, name)?;
        self.nodes.remove(&ino);
        Ok(())
    }

    /// The atomic move primitive. Observers under the structural lock never
    /// see an intermediate state.
    pub fn rename_at(
        &mut self,
        old_parent: Ino,
        old_name: &OsStr,
        new_parent: Ino,
        new_name: &OsStr,
    ) -> Result<()> {
        let src = self
            .lookup_child(old_parent, old_name)?
            .ok_or_else(|| self.missing_entry(old_parent, old_name))?;
        let src_is_dir = self.node(src)?.is_dir();
        let existing = self.lookup_child(new_parent, new_name)?;
        if let Some(dst) = existing {
            // Renaming a node onto itself is a no-op success.
            if dst == src {
                return Ok(());
            }
            let dst_node = self.node(dst)?;
            match (src_is_dir, dst_node.kind()) {
                (false, NodeKind::Dir) => return Err(FsError::IsADir(self.path_of(dst))),
                (true, NodeKind::File) | (true, NodeKind::Symlink) => {
                    return Err(FsError::NotADir(self.path_of(dst)));
                }
                (true, NodeKind::Dir) => {
                    if dst_node.entries().is_some_and(|e| !e.is_empty()) {
                        return Err(FsError::NotEmpty(self.path_of(dst)));
                    }
                }
                _ => {}
            }
        }
        if src_is_dir && self.is_ancestor(src, new_parent) {
            return Err(FsError::RenameIntoSelf(
                self.path_of(src),
                self.path_of(new_parent).join(&new_name.to_string_lossy()),
            ));
        }
        if let Some(dst) = existing {
            self.unlink_child(new_parent, new_name)?;
            self.destroy_or_defer(dst);
        }
        self.unlink_child(old_parent, old_name)?;
        self.link_child(new_parent, new_name, src)?;
        self.node_mut(src)?.meta.touch_ctime();
        Ok(())
    }

    fn check_new_entry(&self, parent: Ino, name: &OsStr) -> Result<()> {
        if self.lookup_child(parent, name)?.is_some() {
            return Err(FsError::AlreadyExists(
                self.path_of(parent).join(&name.to_string_lossy()),
            ));
        }
        Ok(())
    }

    fn missing_entry(&self, parent: Ino, name: &OsStr) -> FsError {
        FsError::NotFound(self.path_of(parent).join(&name.to_string_lossy()))
    }

    fn link_child(&mut self, parent: Ino, name: &OsStr, child: Ino) -> Result<()> {
        {
            let parent_node = self.node_mut(parent)?;
            let entries = parent_node
                .entries_mut()
                .ok_or(FsError::BadHandle(parent))?;
            entries.insert(name.to_os_string(), child);
            parent_node.meta.touch_mtime();
        }
        let child_node = self.node_mut(child)?;
        child_node.parent = Some(parent);
        child_node.meta.name = name.to_os_string();
        Ok(())
    }

    fn unlink_child(&mut self, parent: Ino, name: &OsStr) -> Result<()> {
        let removed = {
            let parent_node = self.node_mut(parent)?;
            let entries = parent_node
                .entries_mut()
                .ok_or(FsError::BadHandle(parent))?;
            let removed = entries.remove(name);
            parent_node.meta.touch_mtime();
            removed
        };
        if let Some(child) = removed {
            if let Ok(child_node) = self.node_mut(child) {
                child_node.parent = None;
            }
        }
        Ok(())
    }

    /// Destroys an unlinked node, or keeps it alive while kernel handles
    /// remain; `release_handle` finishes the job at handle count zero.
    pub fn destroy_or_defer(&mut self, ino: Ino) {
        if let Some(node) = self.nodes.get_mut(&ino) {
            if node.open_handles > 0 {
                node.unlinked = true;
            } else {
                self.nodes.remove(&ino);
            }
        }
    }

    pub fn open_handle(&mut self, ino: Ino) -> Result<()> {
        let node = self.node_mut(ino)?;
        node.open_handles += 1;
        Ok(())
    }

    pub fn release_handle(&mut self, ino: Ino) {
        if let Some(node) = self.nodes.get_mut(&ino) {
            node.open_handles = node.open_handles.saturating_sub(1);
            if node.open_handles == 0 && node.unlinked {
                self.nodes.remove(&ino);
            }
        }
    }

    // -- stat ----------------------------------------------------------------

    pub fn stat_of(&self, ino: Ino) -> Result<NodeStat> {
        let node = self.node(ino)?;
        let (kind, size) = match &node.payload {
            NodePayload::File(content) => (NodeKind::File, content.read().len() as u64),
            NodePayload::Dir(_) => (NodeKind::Dir, 0),
            NodePayload::Symlink(target) => (NodeKind::Symlink, target.len() as u64),
        };
        let nlink = match node.entries() {
            Some(entries) => {
                let child_dirs = entries
                    .values()
                    .filter_map(|child| self.nodes.get(child))
                    .filter(|child| child.is_dir())
                    .count() as u32;
                2 + child_dirs
            }
            None => {
                if node.unlinked {
                    0
                } else {
                    1
                }
            }
        };
        Ok(NodeStat {
            ino: node.meta.ino,
            kind,
            mode: node.meta.mode,
            nlink,
            uid: node.meta.uid,
            gid: node.meta.gid,
            size,
            blocks: size.div_ceil(512),
            atime: node.meta.atime,
            mtime: node.meta.mtime,
            ctime: node.meta.ctime,
        })
    }
}
