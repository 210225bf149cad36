/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Mount program-owned memory as an ephemeral FUSE filesystem.
//!
//! The tree lives entirely in process memory and is visible from two sides
//! at once: the owning process uses the typed [`MemFs`] API, while every
//! other process on the host goes through ordinary path-based system calls
//! against the mount point. Both act on the same authoritative state, so
//! changes on either side are immediately visible to the other. Nothing is
//! ever persisted; the filesystem dies with its process.
//!
//! ```no_run
//! use memfs::{MemFs, MountOptions, NodeRef};
//!
//! let fs = MemFs::new();
//! fs.create_file("/hello.txt", b"Hello, World!")?;
//! fs.create_dir("/subdir")?;
//! fs.create_file("/subdir/data.bin", &[0x00, 0x01, 0x02, 0x03])?;
//!
//! // Now accessible at /tmp/mymount; other processes can read and write
//! // files there while this process keeps mutating the tree directly.
//! let handle = fs.mount("/tmp/mymount", MountOptions::default())?;
//!
//! if let NodeRef::File(file) = fs.get("/hello.txt")? {
//!     file.write(b"Updated content")?;
//! }
//!
//! handle.unmount()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod config;
pub mod errors;
pub mod fs;
pub mod mount;
pub mod node;
pub mod pathname;
pub mod seed;

mod fuse;
mod store;

pub use errors::{FsError, MountError};
pub use fs::{Directory, File, MemFs, NodeRef, Symlink};
pub use mount::{MountHandle, MountOptions};
pub use node::{Ino, Mode, NodeKind, NodeStat};
pub use pathname::PathName;
