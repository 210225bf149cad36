/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fs;
use std::path::Path;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::fs::MemFs;
use crate::node::{Mode, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE};
use crate::pathname::PathName;

/// One entry of a JSON seed manifest. File bodies are given as UTF-8 text in
/// `data`, or base64-encoded in `data_b64` for binary content (`data_b64`
/// wins when both are present).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum SeedEntry {
    File {
        path: String,
        #[serde(default)]
        data: String,
        #[serde(default)]
        data_b64: Option<String>,
        #[serde(default)]
        mode: Option<Mode>,
    },
    Dir {
        path: String,
        #[serde(default)]
        mode: Option<Mode>,
    },
    Symlink {
        path: String,
        target: String,
    },
}

pub fn load(path: &Path) -> anyhow::Result<Vec<SeedEntry>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read seed manifest '{}'", path.display()))?;
    let entries = serde_json::from_str(&raw).with_context(|| "failed to parse seed manifest")?;
    Ok(entries)
}

/// Creates every manifest entry in order, making parent directories as
/// needed.
pub fn apply(fs: &MemFs, entries: &[SeedEntry]) -> anyhow::Result<()> {
    for entry in entries {
        match entry {
            SeedEntry::File {
                path,
                data,
                data_b64,
                mode,
            } => {
                let bytes = match data_b64 {
                    Some(encoded) => STANDARD
                        .decode(encoded)
                        .with_context(|| format!("bad base64 data for '{}'", path))?,
                    None => data.clone().into_bytes(),
                };
                ensure_parent(fs, path)?;
                fs.create_file_with_mode(path, &bytes, mode.unwrap_or(DEFAULT_FILE_MODE))
                    .with_context(|| format!("failed to seed file '{}'", path))?;
            }
            SeedEntry::Dir { path, mode } => {
                fs.makedirs_with_mode(path, mode.unwrap_or(DEFAULT_DIR_MODE))
                    .with_context(|| format!("failed to seed directory '{}'", path))?;
            }
            SeedEntry::Symlink { path, target } => {
                ensure_parent(fs, path)?;
                fs.symlink(target, path)
                    .with_context(|| format!("failed to seed symlink '{}'", path))?;
            }
        }
    }
    Ok(())
}

fn ensure_parent(fs: &MemFs, path: &str) -> anyhow::Result<()> {
    let path = PathName::from(path);
    if !path.is_valid() {
        anyhow::bail!("invalid seed path '{}'", path);
    }
    let Some((parent, _)) = path.split() else {
        anyhow::bail!("invalid seed path '{}'", path);
    };
    if !parent.is_root() {
        fs.makedirs(parent.as_str())
            .with_context(|| format!("failed to create parent directories for '{}'", path))?;
    }
    Ok(())
}
