/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;
use log::debug;

use crate::errors::FsError;
use crate::fs::MemFs;
use crate::node::{Ino, NodeKind, NodeStat};
use crate::pathname::{valid_name, Name};

/// Attributes change underneath the kernel whenever the owning process
/// mutates the tree, so the kernel must not cache them.
const TTL: Duration = Duration::ZERO;

pub(crate) const BLOCK_SIZE: u32 = 4096;
const NAME_MAX: u32 = 255;

/// Translates kernel filesystem requests into tree entry points. Stateless
/// between requests except for the open-handle table.
pub(crate) struct FuseAdapter {
    fs: MemFs,
    handles: HandleTable,
}

/// Maps kernel file handles to inodes. Handles keep an unlinked file's node
/// alive until the last release, matching POSIX unlink semantics.
struct HandleTable {
    next_fh: u64,
    open: HashMap<u64, Ino>,
}

impl HandleTable {
    fn new() -> Self {
        HandleTable {
            next_fh: 1,
            open: HashMap::new(),
        }
    }

    fn insert(&mut self, ino: Ino) -> u64 {
        let fh = self.next_fh;
        self.next_fh += 1;
        self.open.insert(fh, ino);
        fh
    }

    fn remove(&mut self, fh: u64) -> Option<Ino> {
        self.open.remove(&fh)
    }
}

impl FuseAdapter {
    pub(crate) fn new(fs: MemFs) -> Self {
        FuseAdapter {
            fs,
            handles: HandleTable::new(),
        }
    }
}

fn file_type(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::File => FileType::RegularFile,
        NodeKind::Dir => FileType::Directory,
        NodeKind::Symlink => FileType::Symlink,
    }
}

fn file_attr(stat: &NodeStat) -> FileAttr {
    FileAttr {
        ino: stat.ino,
        size: stat.size,
        blocks: stat.blocks,
        atime: stat.atime,
        mtime: stat.mtime,
        ctime: stat.ctime,
        crtime: stat.ctime,
        kind: file_type(stat.kind),
        perm: stat.mode as u16,
        nlink: stat.nlink,
        uid: stat.uid,
        gid: stat.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

/// Inode-addressed requests report a vanished node as ENOENT; handle-backed
/// data operations keep EBADF.
fn errno_ino(err: FsError) -> c_int {
    match err {
        FsError::BadHandle(_) => libc::ENOENT,
        err => err.errno(),
    }
}

fn time_or_now(time: TimeOrNow) -> SystemTime {
    match time {
        TimeOrNow::SpecificTime(time) => time,
        TimeOrNow::Now => SystemTime::now(),
    }
}

fn total_memory_bytes() -> u64 {
    let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
    if unsafe { libc::sysinfo(&mut info) } == 0 {
        info.totalram as u64 * info.mem_unit as u64
    } else {
        1 << 30
    }
}

impl Filesystem for FuseAdapter {
    fn init(
        &mut self,
        _req: &Request<'_>,
        _config: &mut KernelConfig,
    ) -> Result<(), c_int> {
        debug!("fuse session initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        debug!("fuse session destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        if !valid_name(name) {
            return reply.error(libc::EINVAL);
        }
        match self.fs.inner().dir_lookup(parent, name) {
            Ok(stat) => reply.entry(&TTL, &file_attr(&stat), 0),
            Err(err) => reply.error(errno_ino(err)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.fs.inner().attr(ino) {
            Ok(stat) => reply.attr(&TTL, &file_attr(&stat)),
            Err(err) => reply.error(errno_ino(err)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        if let Some(mode) = mode {
            if let Err(err) = self.fs.inner().set_mode(ino, mode) {
                return reply.error(errno_ino(err));
            }
        }
        if uid.is_some() || gid.is_some() {
            if let Err(err) = self.fs.inner().set_owner(ino, uid, gid) {
                return reply.error(errno_ino(err));
            }
        }
        if let Some(size) = size {
            if let Err(err) = self.fs.inner().file_truncate(ino, size) {
                return reply.error(errno_ino(err));
            }
        }
        if atime.is_some() || mtime.is_some() {
            let atime = atime.map(time_or_now);
            let mtime = mtime.map(time_or_now);
            if let Err(err) = self.fs.inner().set_times(ino, atime, mtime) {
                return reply.error(errno_ino(err));
            }
        }
        match self.fs.inner().attr(ino) {
            Ok(stat) => reply.attr(&TTL, &file_attr(&stat)),
            Err(err) => reply.error(errno_ino(err)),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        match self.fs.inner().link_target(ino) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(err) => reply.error(errno_ino(err)),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        if !valid_name(name) {
            return reply.error(libc::EINVAL);
        }
        match self
            .fs
            .inner()
            .make_dir(parent, name, mode, req.uid(), req.gid())
        {
            Ok(stat) => reply.entry(&TTL, &file_attr(&stat), 0),
            Err(err) => reply.error(errno_ino(err)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        if !valid_name(name) {
            return reply.error(libc::EINVAL);
        }
        match self.fs.inner().unlink_entry(parent, name) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(errno_ino(err)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        if !valid_name(name) {
            return reply.error(libc::EINVAL);
        }
        match self.fs.inner().remove_dir_entry(parent, name) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(errno_ino(err)),
        }
    }

    fn symlink(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        if !valid_name(link_name) {
            return reply.error(libc::EINVAL);
        }
        match self.fs.inner().make_symlink(
            parent,
            link_name,
            target.as_os_str(),
            req.uid(),
            req.gid(),
        ) {
            Ok(stat) => reply.entry(&TTL, &file_attr(&stat), 0),
            Err(err) => reply.error(errno_ino(err)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        if flags != 0 || !valid_name(name) || !valid_name(newname) {
            return reply.error(libc::EINVAL);
        }
        match self.fs.inner().move_entry(parent, name, newparent, newname) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(errno_ino(err)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.fs.inner().handle_open(ino) {
            Ok(()) => {
                let fh = self.handles.insert(ino);
                reply.opened(fh, 0);
            }
            Err(err) => reply.error(errno_ino(err)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match self
            .fs
            .inner()
            .file_read(ino, offset.max(0) as u64, size as u64)
        {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        match self.fs.inner().file_write(ino, offset.max(0) as u64, data) {
            Ok(written) => reply.written(written as u32),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn flush(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _lock_owner: u64,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        if let Some(ino) = self.handles.remove(fh) {
            self.fs.inner().handle_release(ino);
        }
        reply.ok();
    }

    /// Memory-resident data is always "persisted".
    fn fsync(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _datasync: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let entries = match self.fs.inner().dir_entries(ino) {
            Ok(entries) => entries,
            Err(err) => return reply.error(errno_ino(err)),
        };
        let parent = self.fs.inner().dir_parent(ino).unwrap_or(ino);
        let mut listing: Vec<(u64, FileType, Name)> = Vec::with_capacity(entries.len() + 2);
        listing.push((ino, FileType::Directory, Name::from(".")));
        listing.push((parent, FileType::Directory, Name::from("..")));
        listing.extend(
            entries
                .into_iter()
                .map(|(child, kind, name)| (child, file_type(kind), name)),
        );
        for (i, (child, kind, name)) in listing.into_iter().enumerate().skip(offset.max(0) as usize)
        {
            if reply.add(child, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let totals = self.fs.inner().totals();
        let total_blocks = total_memory_bytes() / u64::from(BLOCK_SIZE);
        let used_blocks = totals.bytes.div_ceil(u64::from(BLOCK_SIZE));
        let free_blocks = total_blocks.saturating_sub(used_blocks);
        reply.statfs(
            total_blocks,
            free_blocks,
            free_blocks,
            totals.nodes,
            u64::from(u32::MAX),
            BLOCK_SIZE,
            NAME_MAX,
            BLOCK_SIZE,
        );
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        if !valid_name(name) {
            return reply.error(libc::EINVAL);
        }
        let stat = match self
            .fs
            .inner()
            .make_file(parent, name, mode, req.uid(), req.gid())
        {
            Ok(stat) => stat,
            Err(err) => return reply.error(errno_ino(err)),
        };
        let _ = self.fs.inner().handle_open(stat.ino);
        let fh = self.handles.insert(stat.ino);
        reply.created(&TTL, &file_attr(&stat), 0, fh, 0);
    }
}
