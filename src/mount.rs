/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

use fuser::{BackgroundSession, MountOption};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::errors::MountError;
use crate::fs::MemFs;
use crate::fuse::FuseAdapter;

/// Attempts at forcing a lazy detach before the failure is surfaced.
const DETACH_ATTEMPTS: u32 = 5;
const DETACH_WAIT: Duration = Duration::from_millis(200);

/// Options recognized by `MemFs::mount`. Deserialization rejects unknown
/// keys, so a misspelled option in a config file fails loudly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MountOptions {
    /// Permit other uids to see the mount (needs `user_allow_other` in
    /// /etc/fuse.conf when mounting unprivileged).
    pub allow_other: bool,
    pub read_only: bool,
    /// Filesystem name displayed in mount tables.
    pub fs_name: String,
    pub subtype: String,
}

impl Default for MountOptions {
    fn default() -> Self {
        MountOptions {
            allow_other: false,
            read_only: false,
            fs_name: "memfs".to_owned(),
            subtype: "memfs".to_owned(),
        }
    }
}

fn fuse_options(options: &MountOptions) -> Vec<MountOption> {
    let mut opts = vec![
        MountOption::FSName(options.fs_name.clone()),
        MountOption::Subtype(options.subtype.clone()),
        // The engine stores permission bits but never enforces them; the
        // kernel checks access against the reported metadata.
        MountOption::DefaultPermissions,
        MountOption::AutoUnmount,
    ];
    opts.push(if options.read_only {
        MountOption::RO
    } else {
        MountOption::RW
    });
    if options.allow_other {
        opts.push(MountOption::AllowOther);
    }
    opts
}

/// A live mount. Scoped resource: dropping the handle detaches the mount,
/// so an early return or panic in the owning scope cannot leak it.
pub struct MountHandle {
    mount_point: PathBuf,
    session: Option<BackgroundSession>,
}

impl MemFs {
    /// Exposes the tree at `mount_point` until the returned handle is
    /// unmounted or dropped. Mounting never alters tree contents, and the
    /// same tree may be mounted, unmounted and remounted repeatedly.
    pub fn mount<P: AsRef<Path>>(
        &self,
        mount_point: P,
        options: MountOptions,
    ) -> Result<MountHandle, MountError> {
        let mount_point = mount_point.as_ref().to_path_buf();
        if !mount_point.is_dir() {
            return Err(MountError::NotADirectory(mount_point));
        }
        let adapter = FuseAdapter::new(self.clone());
        let session = fuser::spawn_mount2(adapter, &mount_point, &fuse_options(&options))
            .map_err(|source| MountError::Session {
                path: mount_point.clone(),
                source,
            })?;
        info!("mounted '{}' at '{}'", options.fs_name, mount_point.display());
        Ok(MountHandle {
            mount_point,
            session: Some(session),
        })
    }
}

impl MountHandle {
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn is_mounted(&self) -> bool {
        self.session.is_some()
    }

    /// Stops the session worker, drains in-flight requests and detaches the
    /// mount. If the kernel still lists the mount point afterwards, a lazy
    /// force-detach is retried a bounded number of times.
    pub fn unmount(mut self) -> Result<(), MountError> {
        self.detach()
    }

    fn detach(&mut self) -> Result<(), MountError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        // Dropping the session signals the worker, joins it and asks the
        // kernel to detach.
        drop(session);
        for attempt in 1..=DETACH_ATTEMPTS {
            if !still_mounted(&self.mount_point) {
                info!("unmounted '{}'", self.mount_point.display());
                return Ok(());
            }
            debug!(
                "mount point '{}' still attached, forcing lazy detach (attempt {})",
                self.mount_point.display(),
                attempt
            );
            force_detach(&self.mount_point);
            thread::sleep(DETACH_WAIT);
        }
        if still_mounted(&self.mount_point) {
            Err(MountError::Detach(self.mount_point.clone(), DETACH_ATTEMPTS))
        } else {
            Ok(())
        }
    }
}

impl Drop for MountHandle {
    fn drop(&mut self) {
        if self.session.is_some() {
            if let Err(err) = self.detach() {
                warn!("{}", err);
            }
        }
    }
}

fn force_detach(mount_point: &Path) {
    let status = Command::new("fusermount")
        .arg("-u")
        .arg("-z")
        .arg(mount_point)
        .status();
    if let Err(err) = status {
        debug!("fusermount unavailable: {}", err);
    }
}

fn still_mounted(mount_point: &Path) -> bool {
    match fs::read_to_string("/proc/self/mounts") {
        Ok(table) => mount_table_lists(&table, mount_point),
        Err(_) => false,
    }
}

fn mount_table_lists(table: &str, mount_point: &Path) -> bool {
    // /proc/self/mounts escapes spaces in mount points as \040.
    let needle = mount_point.to_string_lossy().replace(' ', "\\040");
    table
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(needle.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = MountOptions::default();
        assert!(!options.allow_other);
        assert!(!options.read_only);
        assert_eq!("memfs", options.fs_name);
    }

    #[test]
    fn test_unknown_option_rejected() {
        let parsed: Result<MountOptions, _> = toml::from_str("banana = true");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_partial_options_use_defaults() {
        let options: MountOptions = toml::from_str("read_only = true").unwrap();
        assert!(options.read_only);
        assert_eq!("memfs", options.fs_name);
    }

    #[test]
    fn test_fuse_options() {
        let mut options = MountOptions::default();
        let opts = fuse_options(&options);
        assert!(opts.contains(&MountOption::RW));
        assert!(!opts.contains(&MountOption::AllowOther));
        options.allow_other = true;
        options.read_only = true;
        let opts = fuse_options(&options);
        assert!(opts.contains(&MountOption::RO));
        assert!(opts.contains(&MountOption::AllowOther));
    }

    #[test]
    fn test_mount_table_lists() {
        let table = "\
memfs /tmp/mymount fuse.memfs rw,nosuid,nodev 0 0
tmpfs /tmp tmpfs rw 0 0
memfs /tmp/with\\040space fuse.memfs rw 0 0
";
        assert!(mount_table_lists(table, Path::new("/tmp/mymount")));
        assert!(mount_table_lists(table, Path::new("/tmp/with space")));
        assert!(!mount_table_lists(table, Path::new("/tmp/other")));
    }

    #[test]
    fn test_mount_point_must_be_directory() {
        let fs = MemFs::new();
        let result = fs.mount("/definitely/not/a/real/dir", MountOptions::default());
        assert!(matches!(result, Err(MountError::NotADirectory(_))));
    }
}
