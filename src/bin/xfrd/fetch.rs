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

//! Implements the `fetch` command (a single pull of one zone).

use std::fmt::Write;
use std::io;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use env_logger::Env;
use log::{error, info};

use xfrd::db::{Catalog, ZoneEntry, ZoneKind};
use xfrd::image;
use xfrd::xfr::pull::{self, Candidate, PullConfig, PullRequest, PullResult};

use crate::args::FetchArgs;
use crate::config;

/// The process exit status of a fetch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExitStatus {
    /// The zone image is already current.
    UpToDate = 0,

    /// A full transfer was received and written.
    Full = 1,

    /// A full transfer was received and written, and the IXFR log was
    /// emptied.
    FullWithLog = 2,

    /// An incremental transfer was received and applied.
    Incremental = 3,

    /// No server answered in time.
    Timeout = 4,

    /// The fetch failed.
    Failed = 5,
}

/// Runs a fetch and exits with its [`ExitStatus`].
pub fn run(args: FetchArgs) {
    env_logger::init_from_env(Env::new().default_filter_or("warn"));

    let status = match try_fetching(args) {
        Ok(status) => status,
        Err(e) => {
            let mut message = String::from("Failed to fetch:");
            for (i, cause) in e.chain().enumerate() {
                write!(message, "\n[{}] {}", i + 1, cause).unwrap();
            }
            error!("{}", message);
            ExitStatus::Failed
        }
    };
    info!("Exiting with status {} ({:?}).", status as i32, status);
    process::exit(status as i32);
}

fn try_fetching(args: FetchArgs) -> Result<ExitStatus> {
    let key = match args.key_file {
        Some(ref path) => Some(Arc::new(
            config::load_key_file(path)
                .with_context(|| format!("failed to load the key file {}", path.display()))?,
        )),
        None => None,
    };
    let candidates = args
        .servers
        .iter()
        .map(|spec| Candidate {
            addr: spec.addr(args.port),
            method: spec.method,
            key: key.clone(),
        })
        .collect();

    // The catalog holds the zone we start from (if any) and checks that
    // the result applies to it.
    let catalog = Catalog::new();
    let (entry, _) = catalog.insert(args.zone.clone(), args.class, ZoneKind::Secondary, 0);
    match image::read_zone_image(&args.file, &args.zone, args.class) {
        Ok(records) => {
            let serial = entry
                .reset_zone_image(records)
                .context("failed to load the zone image")?;
            info!("Loaded {} at serial {}.", args.file.display(), serial);
        }
        Err(image::ImageError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
            info!("{} does not exist; a full transfer is needed.", args.file.display());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", args.file.display()));
        }
    }

    let request = PullRequest {
        zone: args.zone.clone(),
        class: args.class,
        serial: args.serial.or_else(|| entry.current_serial()),
        candidates,
    };
    let config = pull_config(&args);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the Tokio runtime")?;
    let result = runtime
        .block_on(pull::pull(&request, &config))
        .context("failed to pull the zone")?;

    match result {
        PullResult::UpToDate { .. } => Ok(ExitStatus::UpToDate),
        PullResult::Full { serial, records } => {
            // --serial replaces the image's own serial, so the received
            // zone is only checked against it by the pull itself.
            let committed = if args.serial.is_some() {
                entry.reset_zone_image(records)
            } else {
                entry.commit_zone_image(records)
            };
            committed.context("the received zone is invalid")?;
            write_image(&entry, &args)?;
            info!("Wrote {} at serial {}.", args.file.display(), serial);
            match args.ixfr_log {
                Some(ref path) => {
                    image::truncate_ixfr_log(path)
                        .with_context(|| format!("failed to empty {}", path.display()))?;
                    Ok(ExitStatus::FullWithLog)
                }
                None => Ok(ExitStatus::Full),
            }
        }
        PullResult::Incremental { serial, deltas } => {
            if entry.snapshot().is_none() {
                return Err(anyhow!(
                    "received an incremental transfer, but there is no zone image to apply it to"
                ));
            }
            let result = PullResult::Incremental {
                serial,
                deltas: deltas.clone(),
            };
            pull::commit(&entry, result).context("the received changes do not apply")?;
            write_image(&entry, &args)?;
            if let Some(ref path) = args.ixfr_log {
                image::append_ixfr_log(path, &deltas)
                    .with_context(|| format!("failed to append to {}", path.display()))?;
            }
            info!(
                "Applied {} versions; wrote {} at serial {}.",
                deltas.len(),
                args.file.display(),
                serial
            );
            Ok(ExitStatus::Incremental)
        }
        PullResult::Timeout => Ok(ExitStatus::Timeout),
        PullResult::Failed => Ok(ExitStatus::Failed),
    }
}

fn write_image(entry: &ZoneEntry, args: &FetchArgs) -> Result<()> {
    let zone = entry
        .snapshot()
        .ok_or_else(|| anyhow!("the zone has no data"))?;
    image::write_zone_image(&args.file, &zone)
        .with_context(|| format!("failed to write {}", args.file.display()))
}

fn pull_config(args: &FetchArgs) -> PullConfig {
    let defaults = PullConfig::default();
    PullConfig {
        connect_timeout: args
            .connect_timeout
            .map_or(defaults.connect_timeout, Duration::from_secs),
        first_read_timeout: args
            .first_read_timeout
            .map_or(defaults.first_read_timeout, Duration::from_secs),
        read_timeout: args
            .read_timeout
            .map_or(defaults.read_timeout, Duration::from_secs),
        total_timeout: args
            .total_timeout
            .map_or(defaults.total_timeout, Duration::from_secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_statuses_match_the_documented_codes() {
        let codes: Vec<i32> = [
            ExitStatus::UpToDate,
            ExitStatus::Full,
            ExitStatus::FullWithLog,
            ExitStatus::Incremental,
            ExitStatus::Timeout,
            ExitStatus::Failed,
        ]
        .iter()
        .map(|&s| s as i32)
        .collect();
        assert_eq!(codes, vec![0, 1, 2, 3, 4, 5]);
    }
}
