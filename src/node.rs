/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::pathname::Name;

/// Stable node identifier, unique within one tree lifetime.
pub type Ino = u64;

/// Permission bits. Only the low 12 bits are stored.
pub type Mode = u32;

pub const ROOT_INO: Ino = 1;
pub const MODE_MASK: Mode = 0o7777;
pub const DEFAULT_FILE_MODE: Mode = 0o644;
pub const DEFAULT_DIR_MODE: Mode = 0o755;
pub const DEFAULT_SYMLINK_MODE: Mode = 0o777;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
    Symlink,
}

/// File contents behind their own lock, so bulk data I/O does not hold the
/// tree structural lock. Cloning shares the buffer.
pub type FileContent = Arc<RwLock<Vec<u8>>>;

#[derive(Debug)]
pub enum NodePayload {
    File(FileContent),
    Dir(BTreeMap<Name, Ino>),
    Symlink(OsString),
}

/// Header common to every node kind.
#[derive(Debug, Clone)]
pub struct NodeMeta {
    pub ino: Ino,
    /// Name the node is linked under; empty for the root only.
    pub name: Name,
    pub mode: Mode,
    pub uid: u32,
    pub gid: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

#[derive(Debug)]
pub struct Node {
    pub meta: NodeMeta,
    pub payload: NodePayload,
    pub parent: Option<Ino>,
    /// Kernel handles currently open on this node.
    pub open_handles: u32,
    /// Set when the directory entry was removed while handles remain open.
    pub unlinked: bool,
}

/// Snapshot of a node's metadata, the basis for `stat` on both API sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStat {
    pub ino: Ino,
    pub kind: NodeKind,
    pub mode: Mode,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl NodeMeta {
    fn new(ino: Ino, name: Name, mode: Mode, uid: u32, gid: u32) -> Self {
        let now = SystemTime::now();
        NodeMeta {
            ino,
            name,
            mode: mode & MODE_MASK,
            uid,
            gid,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    /// Data mutation: advances mtime and ctime.
    pub fn touch_mtime(&mut self) {
        advance(&mut self.mtime);
        advance(&mut self.ctime);
    }

    /// Metadata mutation: advances ctime.
    pub fn touch_ctime(&mut self) {
        advance(&mut self.ctime);
    }

    /// Explicit time update (`utime`/`utimens`); these may move backwards.
    pub fn set_times(&mut self, atime: Option<SystemTime>, mtime: Option<SystemTime>) {
        if let Some(atime) = atime {
            self.atime = atime;
        }
        if let Some(mtime) = mtime {
            self.mtime = mtime;
        }
        advance(&mut self.ctime);
    }
}

/// Stored times never move backwards on implicit updates; the wall clock may.
fn advance(slot: &mut SystemTime) {
    let now = SystemTime::now();
    if now > *slot {
        *slot = now;
    }
}

impl Node {
    pub fn new_file(ino: Ino, name: Name, data: Vec<u8>, mode: Mode, uid: u32, gid: u32) -> Self {
        Node {
            meta: NodeMeta::new(ino, name, mode, uid, gid),
            payload: NodePayload::File(Arc::new(RwLock::new(data))),
            parent: None,
            open_handles: 0,
            unlinked: false,
        }
    }

    pub fn new_dir(ino: Ino, name: Name, mode: Mode, uid: u32, gid: u32) -> Self {
        Node {
            meta: NodeMeta::new(ino, name, mode, uid, gid),
            payload: NodePayload::Dir(BTreeMap::new()),
            parent: None,
            open_handles: 0,
            unlinked: false,
        }
    }

    pub fn new_symlink(ino: Ino, name: Name, target: OsString, uid: u32, gid: u32) -> Self {
        Node {
            meta: NodeMeta::new(ino, name, DEFAULT_SYMLINK_MODE, uid, gid),
            payload: NodePayload::Symlink(target),
            parent: None,
            open_handles: 0,
            unlinked: false,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self.payload {
            NodePayload::File(_) => NodeKind::File,
            NodePayload::Dir(_) => NodeKind::Dir,
            NodePayload::Symlink(_) => NodeKind::Symlink,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.payload, NodePayload::Dir(_))
    }

    pub fn entries(&self) -> Option<&BTreeMap<Name, Ino>> {
        match &self.payload {
            NodePayload::Dir(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn entries_mut(&mut self) -> Option<&mut BTreeMap<Name, Ino>> {
        match &mut self.payload {
            NodePayload::Dir(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn content(&self) -> Option<&FileContent> {
        match &self.payload {
            NodePayload::File(content) => Some(content),
            _ => None,
        }
    }

    pub fn symlink_target(&self) -> Option<&OsStr> {
        match &self.payload {
            NodePayload::Symlink(target) => Some(target),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_masked() {
        let node = Node::new_file(2, "f".into(), vec![], 0o100644, 1000, 1000);
        assert_eq!(0o644, node.meta.mode);
    }

    #[test]
    fn test_kind() {
        assert_eq!(
            NodeKind::File,
            Node::new_file(2, "f".into(), vec![], 0o644, 0, 0).kind()
        );
        assert_eq!(
            NodeKind::Dir,
            Node::new_dir(3, "d".into(), 0o755, 0, 0).kind()
        );
        assert_eq!(
            NodeKind::Symlink,
            Node::new_symlink(4, "l".into(), "/t".into(), 0, 0).kind()
        );
    }

    #[test]
    fn test_explicit_times_may_move_backwards() {
        let mut meta = NodeMeta::new(2, "f".into(), 0o644, 0, 0);
        let past = SystemTime::UNIX_EPOCH;
        meta.set_times(Some(past), Some(past));
        assert_eq!(past, meta.atime);
        assert_eq!(past, meta.mtime);
    }
}
