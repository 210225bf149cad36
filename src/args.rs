/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory where the filesystem will be mounted
    #[arg(value_name = "MOUNT_POINT")]
    pub mount_point: String,

    /// Path to configuration file in TOML format
    #[arg(short, long)]
    pub config_path: Option<String>,

    /// Path to a JSON manifest of files to create before mounting
    #[arg(short, long)]
    pub seed: Option<String>,
}
