/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::ffi::{OsStr, OsString};
use std::fmt::Display;
use std::os::unix::ffi::OsStrExt;

/// Absolute `/`-separated path into the tree.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct PathName(String);

/// Directory entry name. Names crossing the kernel boundary are raw byte
/// strings, so entries are keyed by `OsString` rather than `String`.
pub type Name = OsString;

impl Display for PathName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PathName {
    fn from(value: &str) -> Self {
        PathName(value.to_owned())
    }
}

impl From<String> for PathName {
    fn from(value: String) -> Self {
        PathName(value)
    }
}

impl PathName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the path into parent directory path and entry name. Returns
    /// `None` when there is no terminal name to split off: the root path,
    /// the empty path, relative paths, or a path ending in a slash run.
    pub fn split(&self) -> Option<(PathName, Name)> {
        let trimmed = self.trimmed();
        let split_at = trimmed.rfind('/')?;
        let (parent, name) = (&trimmed[..split_at], &trimmed[split_at + 1..]);
        if name.is_empty() {
            return None;
        }
        if parent.is_empty() {
            Some(("/".into(), name.into()))
        } else {
            Some((parent.into(), name.into()))
        }
    }

    /// Path components, left to right. Empty components (duplicate or
    /// trailing slashes) are dropped.
    pub fn segments(&self) -> Vec<&str> {
        self.0.split('/').filter(|s| !s.is_empty()).collect()
    }

    pub fn join(&self, name: &str) -> PathName {
        if self.is_root() {
            format!("/{}", name).into()
        } else {
            format!("{}/{}", self.trimmed(), name).into()
        }
    }

    /// A path is valid when it is absolute, free of null bytes and none of
    /// its components is `.` or `..`. A trailing slash is tolerated.
    pub fn is_valid(&self) -> bool {
        self.0.starts_with('/')
            && !self.0.contains('\0')
            && self
                .0
                .split('/')
                .all(|s| s.is_empty() || (s != "." && s != ".."))
    }

    pub fn is_root(&self) -> bool {
        self.trimmed().is_empty() && !self.0.is_empty()
    }

    fn trimmed(&self) -> &str {
        self.0.strip_suffix('/').unwrap_or(&self.0)
    }
}

/// Whether `name` may be stored as a directory entry: non-empty, no slash,
/// no null byte and neither `.` nor `..` (those are kernel-synthesized).
pub fn valid_name(name: &OsStr) -> bool {
    let bytes = name.as_bytes();
    !bytes.is_empty()
        && !bytes.contains(&b'/')
        && !bytes.contains(&0)
        && name != OsStr::new(".")
        && name != OsStr::new("..")
}
