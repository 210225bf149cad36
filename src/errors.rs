/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::node::Ino;
use crate::pathname::PathName;

pub type Result<T> = std::result::Result<T, FsError>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FsError {
    #[error("node at '{0}' not found")]
    NotFound(PathName),
    #[error("node at '{0}' already exists")]
    AlreadyExists(PathName),
    #[error("'{0}' is not a directory")]
    NotADir(PathName),
    #[error("'{0}' is not a file")]
    NotAFile(PathName),
    #[error("'{0}' is a directory")]
    IsADir(PathName),
    #[error("directory '{0}' is not empty")]
    NotEmpty(PathName),
    #[error("invalid path '{0}'")]
    InvalidPath(PathName),
    #[error("invalid entry name {0:?}")]
    InvalidName(OsString),
    #[error("'{0}' is not a symbolic link")]
    NotASymlink(PathName),
    #[error("tried to rename '{0}' into subdirectory of itself '{1}'")]
    RenameIntoSelf(PathName, PathName),
    #[error("loop encountered while resolving symbolic links at '{0}'")]
    LoopDetected(PathName),
    #[error("no node backs inode {0}")]
    BadHandle(Ino),
    #[error("removing root is forbidden")]
    RootRemovalForbidden,
}

impl FsError {
    /// Error number reported on the kernel boundary.
    pub fn errno(&self) -> libc::c_int {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::NotADir(_) => libc::ENOTDIR,
            FsError::IsADir(_) => libc::EISDIR,
            FsError::NotEmpty(_) => libc::ENOTEMPTY,
            FsError::NotAFile(_)
            | FsError::InvalidPath(_)
            | FsError::InvalidName(_)
            | FsError::NotASymlink(_)
            | FsError::RenameIntoSelf(_, _) => libc::EINVAL,
            FsError::LoopDetected(_) => libc::ELOOP,
            FsError::BadHandle(_) => libc::EBADF,
            FsError::RootRemovalForbidden => libc::EBUSY,
        }
    }
}

#[derive(Error, Debug)]
pub enum MountError {
    #[error("mount point '{0}' is not a directory")]
    NotADirectory(PathBuf),
    #[error("failed to start fuse session at '{path}'")]
    Session {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to detach mount at '{0}' after {1} attempts")]
    Detach(PathBuf, u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(libc::ENOENT, FsError::NotFound("/a".into()).errno());
        assert_eq!(libc::EEXIST, FsError::AlreadyExists("/a".into()).errno());
        assert_eq!(libc::ENOTDIR, FsError::NotADir("/a".into()).errno());
        assert_eq!(libc::EISDIR, FsError::IsADir("/a".into()).errno());
        assert_eq!(libc::ENOTEMPTY, FsError::NotEmpty("/a".into()).errno());
        assert_eq!(libc::EINVAL, FsError::InvalidPath("".into()).errno());
        assert_eq!(libc::EINVAL, FsError::NotASymlink("/a".into()).errno());
        assert_eq!(
            libc::EINVAL,
            FsError::RenameIntoSelf("/a".into(), "/a/b".into()).errno()
        );
        assert_eq!(libc::ELOOP, FsError::LoopDetected("/a".into()).errno());
        assert_eq!(libc::EBADF, FsError::BadHandle(42).errno());
    }
}
