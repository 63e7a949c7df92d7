// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implements the `serve` command (i.e., running the server).

use std::fmt::Write;
use std::path::Path;
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use env_logger::Env;
use log::{error, info};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use xfrd::db::Catalog;
use xfrd::io::{TokioIoProvider, TransferService};

use crate::args::ServeArgs;
use crate::config;
use crate::zones;

/// Runs the server.
pub fn run(args: ServeArgs) {
    env_logger::init_from_env(Env::new().default_filter_or("warn"));

    if let Err(e) = try_running(args) {
        let mut message = String::from("Failed to run:");
        for (i, cause) in e.chain().enumerate() {
            write!(message, "\n[{}] {}", i + 1, cause).unwrap();
        }
        message.push_str("\nExiting with failure.");
        error!("{}", message);
        process::exit(1);
    }
    info!("Exiting with success.");
}

fn try_running(args: ServeArgs) -> Result<()> {
    info!(
        "xfrd v{}.{}.{} starting.",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR"),
        env!("CARGO_PKG_VERSION_PATCH"),
    );

    info!("Loading the configuration from {}.", args.config.display());
    let config = config::load_from_path(&args.config, false)
        .context("failed to load the configuration")?;

    // Bind before we load zones: loading may be expensive, so it's
    // better to fail fast.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the Tokio runtime")?;
    let io_provider = runtime
        .block_on(TokioIoProvider::bind([config.bind]))
        .context("failed to bind sockets")?;

    // Load the zones.
    if config.zones.len() == 1 {
        info!("Beginning to load 1 zone.");
    } else {
        info!("Beginning to load {} zones.", config.zones.len());
    }
    let catalog = Arc::new(Catalog::new());
    zones::load(&catalog, &config.zones);

    let service = Arc::new(TransferService::new(
        catalog,
        config.keyring(),
        (&config.limits).into(),
    ));

    // Set up signal handling.
    let mut signals = set_up_signal_handling().context("failed to set up signal handling")?;

    // Start the I/O provider.
    info!("Set-up is complete; starting the server on {}.", config.bind);
    let shutdown_controller = runtime.block_on(async { io_provider.start(&service) });

    // Process incoming signals.
    for signal in signals.forever() {
        match signal {
            s @ (SIGINT | SIGTERM) => {
                let name = match s {
                    SIGINT => "SIGINT",
                    SIGTERM => "SIGTERM",
                    _ => unreachable!(),
                };
                info!("Received {}; shutting down.", name);
                break;
            }
            SIGHUP => {
                info!("Received SIGHUP; reloading zones and keys.");
                if let Err(e) = reload_zones_and_keys(&args.config, &service) {
                    let mut message = String::from("Failed to reload zones and keys:");
                    for (i, cause) in e.chain().enumerate() {
                        write!(message, "\n[{}] {}", i + 1, cause).unwrap();
                    }
                    error!("{}", message);
                }
            }
            _ => unreachable!(),
        }
    }

    // Shut down the server.
    shutdown_controller.blocking_shut_down();
    info!("Shutdown complete.");
    Ok(())
}

fn set_up_signal_handling() -> Result<Signals> {
    let all_signals = &[SIGHUP, SIGINT, SIGTERM];
    let term_signals = &[SIGINT, SIGTERM];
    let already_terminating = Arc::new(AtomicBool::new(false));

    // This sets up signal handlers to exit immediately if a second
    // termination signal arrives before the process finishes shutting
    // down gracefully.
    for sig in term_signals {
        signal_hook::flag::register_conditional_shutdown(*sig, 1, already_terminating.clone())?;
        signal_hook::flag::register(*sig, already_terminating.clone())?;
    }

    Signals::new(all_signals).map_err(Into::into)
}

/// Rereads the configuration file, reloads every zone, and replaces the
/// TSIG keys. The bind address and limits are not changed.
fn reload_zones_and_keys(path: &Path, service: &TransferService) -> Result<()> {
    let config =
        config::load_from_path(path, true).context("failed to reload the configuration")?;
    zones::load(service.catalog(), &config.zones);
    service.set_keyring(config.keyring());
    Ok(())
}
