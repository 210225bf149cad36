/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::path::Path;
use std::sync::mpsc;

use anyhow::Context;
use clap::Parser;
use log::{error, info};

use memfs::config::{self, Config};
use memfs::{seed, MemFs};

mod args;

use args::Args;

fn main() {
    let status = run();
    if let Err(ref err) = status {
        error!("{:?}", err);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    log4rs::init_file("log4rs.yml", Default::default()).with_context(|| "failed to init logger")?;
    info!("init logger");

    let config = match &args.config_path {
        Some(path) => {
            info!("read configuration from '{}'", path);
            config::load(Path::new(path))?
        }
        None => Config::default(),
    };

    let fs = MemFs::new();
    if let Some(path) = &args.seed {
        info!("seed tree from '{}'", path);
        let entries = seed::load(Path::new(path))?;
        seed::apply(&fs, &entries)?;
    }

    let handle = fs
        .mount(&args.mount_point, config.mount)
        .with_context(|| format!("failed to mount at '{}'", args.mount_point))?;
    info!(
        "mounted at '{}', press Ctrl-C to unmount",
        handle.mount_point().display()
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .with_context(|| "failed to install signal handler")?;
    rx.recv().with_context(|| "signal channel closed")?;

    info!("unmounting");
    handle.unmount()?;
    Ok(())
}
