//  ZFS Replication Supervisor
//  Copyright (C) 2025  Ifaz Kabir

//  This program is free software: you can redistribute it and/or modify
//  it under the terms of the GNU General Public License as published by
//  the Free Software Foundation, either version 3 of the License, or
//  (at your option) any later version.

//  This program is distributed in the hope that it will be useful,
//  but WITHOUT ANY WARRANTY; without even the implied warranty of
//  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//  GNU General Public License for more details.

//  You should have received a copy of the GNU General Public License
//  along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Thin supervisor entrypoint (SPEC_FULL §2 ambient "CLI"): wires up
//! logging, the config, the transfer store/keystore/event sink, runs
//! startup reconciliation, and waits for `SIGINT`/`SIGTERM` to run the
//! Shutdown Coordinator. Dataset-operation plumbing (snapshot creation,
//! recursive dataset discovery) is out of this crate's scope; a caller
//! embeds [`zreplicate::transfer::TransferManager`] and drives
//! Start/Pause/Resume/Stop itself.

use clap::Parser;
use log::info;
use nix::sys::signal::{self, SigHandler, Signal};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use zreplicate::config::Config;
use zreplicate::event::ChannelSink;
use zreplicate::transfer::{TransferManager, TransferStore};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signum: i32) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

#[derive(Parser, Debug)]
#[command(about = "ZFS dataset replication supervisor")]
struct Cli {
    /// Optional TOML config file; unset fields fall back to defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the transfers sidecar directory.
    #[arg(long)]
    transfers_dir: Option<PathBuf>,

    /// Seconds given to active transfers to exit cleanly before SIGKILL.
    #[arg(long)]
    shutdown_deadline_secs: Option<u64>,
}

fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::from_toml_file(path).unwrap_or_else(|e| {
            log::error!("failed to load config file, using defaults: {e}");
            Config::default()
        }),
        None => Config::default(),
    };
    if let Some(dir) = cli.transfers_dir {
        config.transfers_dir = dir;
    }
    if let Some(secs) = cli.shutdown_deadline_secs {
        config.shutdown_deadline_secs = secs;
    }

    unsafe {
        signal::signal(Signal::SIGTERM, SigHandler::Handler(request_shutdown))
            .expect("installing SIGTERM handler");
        signal::signal(Signal::SIGINT, SigHandler::Handler(request_shutdown))
            .expect("installing SIGINT handler");
    }

    let store = TransferStore::new(&config.transfers_dir)?;
    let (sink, events) = ChannelSink::new();
    let manager = Arc::new(
        TransferManager::new(
            store,
            Arc::new(sink),
            config.managed_known_hosts_path.to_string_lossy().to_string(),
        )
        .map_err(std::io::Error::other)?,
    );

    info!(
        "zreplicated started, transfers_dir={}",
        config.transfers_dir.display()
    );

    std::thread::spawn(move || {
        for event in events {
            log::debug!("observed lifecycle event: {:?} for {}", event.operation, event.transfer_id);
        }
    });

    while !SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    info!("shutdown requested, draining active transfers");
    manager.shutdown(config.shutdown_deadline());
    info!("zreplicated exiting");
    Ok(())
}
