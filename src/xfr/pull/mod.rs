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

//! Implementation of the pull side of zone transfers.
//!
//! [`pull`] tries a list of candidate servers in order, one at a time,
//! until one of them yields a result: the zone is up to date, or a full
//! or incremental transfer succeeded. Candidates that fail, time out,
//! or turn out to be behind us are skipped. Nothing is committed by
//! [`pull`] itself; [`refresh_zone`] pulls on behalf of a
//! [`ZoneEntry`] and commits the result to it.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::time::timeout;

use crate::class::Class;
use crate::db::{self, ZoneEntry};
use crate::message::tsig::TsigKey;
use crate::name::Name;
use crate::rr::Record;
use crate::xfr::delta::Delta;

mod attempt;
mod interpret;
pub use attempt::AttemptError;
pub use interpret::{InterpretError, Interpreted, Interpreter};

use attempt::Outcome;

/// The number of times an attempt may be restarted with AXFR after an
/// inconsistent response.
pub const MAX_RESTARTS: u32 = 2;

////////////////////////////////////////////////////////////////////////
// REQUESTS AND CONFIGURATION                                         //
////////////////////////////////////////////////////////////////////////

/// The transfer method to try first with a candidate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Method {
    /// Always request a full transfer.
    Axfr,

    /// Request an incremental transfer when we have a serial.
    Ixfr,
}

impl FromStr for Method {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("axfr") {
            Ok(Self::Axfr)
        } else if s.eq_ignore_ascii_case("ixfr") {
            Ok(Self::Ixfr)
        } else {
            Err("transfer method must be axfr or ixfr")
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Axfr => f.write_str("axfr"),
            Self::Ixfr => f.write_str("ixfr"),
        }
    }
}

/// A server to pull from.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub addr: SocketAddr,
    pub method: Method,
    pub key: Option<Arc<TsigKey>>,
}

/// What to pull.
#[derive(Clone, Debug)]
pub struct PullRequest {
    pub zone: Name,
    pub class: Class,

    /// Our current serial, if we have the zone at all.
    pub serial: Option<u32>,

    /// The servers to try, in order.
    pub candidates: Vec<Candidate>,
}

/// Timers for pulls.
#[derive(Clone, Debug)]
pub struct PullConfig {
    /// How long to wait for a connection to be established.
    pub connect_timeout: Duration,

    /// How long to wait for the first message of a response.
    pub first_read_timeout: Duration,

    /// How long to wait for each later message of a response.
    pub read_timeout: Duration,

    /// How long the whole pull (all candidates) may take.
    pub total_timeout: Duration,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            first_read_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(60),
            total_timeout: Duration::from_secs(2 * 60 * 60),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// RESULTS                                                            //
////////////////////////////////////////////////////////////////////////

/// The result of a pull.
#[derive(Debug)]
pub enum PullResult {
    /// A candidate is at our serial.
    UpToDate { serial: u32 },

    /// A candidate sent the whole zone.
    Full { serial: u32, records: Vec<Record> },

    /// A candidate sent the versions leading to `serial`.
    Incremental { serial: u32, deltas: Vec<Delta> },

    /// No candidate succeeded, and at least one timed out (or the pull
    /// as a whole ran out of time).
    Timeout,

    /// No candidate succeeded.
    Failed,
}

/// A summary of a [`PullResult`], without its data.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PullStatus {
    UpToDate,
    Full,
    Incremental,
    Timeout,
    Failed,
}

impl PullResult {
    pub fn status(&self) -> PullStatus {
        match self {
            Self::UpToDate { .. } => PullStatus::UpToDate,
            Self::Full { .. } => PullStatus::Full,
            Self::Incremental { .. } => PullStatus::Incremental,
            Self::Timeout => PullStatus::Timeout,
            Self::Failed => PullStatus::Failed,
        }
    }
}

impl fmt::Display for PullStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UpToDate => f.write_str("up to date"),
            Self::Full => f.write_str("full transfer succeeded"),
            Self::Incremental => f.write_str("incremental transfer succeeded"),
            Self::Timeout => f.write_str("timed out"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// PULLING                                                            //
////////////////////////////////////////////////////////////////////////

/// Pulls a zone, trying each candidate in turn.
///
/// Candidates are tried one at a time, never in parallel. The pull
/// fails immediately (without connecting anywhere) if there are no
/// candidates.
pub async fn pull(request: &PullRequest, config: &PullConfig) -> Result<PullResult, PullError> {
    if request.candidates.is_empty() {
        return Err(PullError::NoCandidates);
    }
    match timeout(config.total_timeout, try_candidates(request, config)).await {
        Ok(result) => Ok(result),
        Err(_) => {
            warn!("pull of {} ran out of time", request.zone);
            Ok(PullResult::Timeout)
        }
    }
}

async fn try_candidates(request: &PullRequest, config: &PullConfig) -> PullResult {
    let mut timed_out = false;
    for candidate in &request.candidates {
        match attempt::run(request, candidate, config).await {
            Ok(Outcome::UpToDate(serial)) => {
                info!(
                    "{}/{} is up to date with {} at serial {}",
                    request.zone, request.class, candidate.addr, serial
                );
                return PullResult::UpToDate { serial };
            }
            Ok(Outcome::Stale { ours, theirs }) => {
                warn!(
                    "{} has serial {} for {}/{}, behind our {}; trying next server",
                    candidate.addr, theirs, request.zone, request.class, ours
                );
            }
            Ok(Outcome::Full { serial, records }) => {
                info!(
                    "received full transfer of {}/{} at serial {} from {} ({} records)",
                    request.zone,
                    request.class,
                    serial,
                    candidate.addr,
                    records.len()
                );
                return PullResult::Full { serial, records };
            }
            Ok(Outcome::Incremental { serial, deltas }) => {
                info!(
                    "received incremental transfer of {}/{} to serial {} from {} ({} versions)",
                    request.zone,
                    request.class,
                    serial,
                    candidate.addr,
                    deltas.len()
                );
                return PullResult::Incremental { serial, deltas };
            }
            Err(e) => {
                warn!(
                    "pull of {}/{} from {} failed: {}",
                    request.zone, request.class, candidate.addr, e
                );
                timed_out |= e.is_timeout();
            }
        }
    }
    if timed_out {
        PullResult::Timeout
    } else {
        PullResult::Failed
    }
}

/// Pulls the zone of `entry` from `candidates` and commits the result.
///
/// Only one pull of a zone may run at a time. The zone is left
/// untouched unless the whole transfer succeeds and applies cleanly.
/// A zone that changed is marked notify-pending, so that its own
/// secondaries can be told.
pub async fn refresh_zone(
    entry: &ZoneEntry,
    candidates: Vec<Candidate>,
    config: &PullConfig,
) -> Result<PullStatus, PullError> {
    let _guard = entry.begin_pull()?;
    let request = PullRequest {
        zone: entry.origin().clone(),
        class: entry.class(),
        serial: entry.current_serial(),
        candidates,
    };
    let result = pull(&request, config).await?;
    let status = result.status();
    commit(entry, result)?;
    match status {
        PullStatus::Full | PullStatus::Incremental => {
            entry.set_transfer_needed(false);
            entry.set_notify_pending(true);
        }
        PullStatus::UpToDate => entry.set_transfer_needed(false),
        PullStatus::Timeout | PullStatus::Failed => (),
    }
    Ok(status)
}

/// Commits a pull result to a zone.
pub fn commit(entry: &ZoneEntry, result: PullResult) -> Result<(), PullError> {
    match result {
        PullResult::Full { records, .. } => {
            entry.commit_zone_image(records)?;
        }
        PullResult::Incremental { deltas, .. } => {
            // Make sure the whole chain applies before touching the
            // zone.
            let snapshot = entry.snapshot().ok_or(db::Error::NoZoneData)?;
            let mut scratch = None;
            for delta in &deltas {
                let base = scratch.as_ref().unwrap_or(&*snapshot);
                scratch = Some(base.apply(delta, 0)?);
            }
            for delta in deltas {
                entry.append_delta(delta)?;
            }
        }
        PullResult::UpToDate { .. } | PullResult::Timeout | PullResult::Failed => (),
    }
    Ok(())
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors that prevent a pull from being made or committed.
#[derive(Debug)]
pub enum PullError {
    /// No candidate servers were given.
    NoCandidates,

    /// The zone database refused the pull or its result.
    Database(db::Error),
}

impl fmt::Display for PullError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NoCandidates => f.write_str("no servers to pull from"),
            Self::Database(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for PullError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NoCandidates => None,
            Self::Database(e) => Some(e),
        }
    }
}

impl From<db::Error> for PullError {
    fn from(e: db::Error) -> Self {
        Self::Database(e)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::tests::{a_record, example_records, soa_record};
    use crate::db::{Catalog, ZoneKind};
    use crate::xfr::delta::Change;

    fn entry() -> Arc<ZoneEntry> {
        let catalog = Catalog::new();
        let (entry, _) =
            catalog.insert("example.".parse().unwrap(), Class::IN, ZoneKind::Secondary, 10);
        entry
    }

    #[test]
    fn methods_parse() {
        assert_eq!("IXFR".parse::<Method>(), Ok(Method::Ixfr));
        assert_eq!("axfr".parse::<Method>(), Ok(Method::Axfr));
        assert!("soa".parse::<Method>().is_err());
    }

    #[tokio::test]
    async fn pull_without_candidates_fails_immediately() {
        let request = PullRequest {
            zone: "example.".parse().unwrap(),
            class: Class::IN,
            serial: None,
            candidates: Vec::new(),
        };
        assert!(matches!(
            pull(&request, &PullConfig::default()).await,
            Err(PullError::NoCandidates)
        ));
    }

    #[test]
    fn failed_delta_chain_leaves_zone_untouched() {
        let entry = entry();
        entry.reset_zone_image(example_records(10)).unwrap();
        let good = Delta {
            from_serial: 10,
            to_serial: 11,
            changes: vec![
                Change::delete(soa_record("example.", 10)),
                Change::add(soa_record("example.", 11)),
            ],
        };
        let bad = Delta {
            from_serial: 11,
            to_serial: 12,
            changes: vec![
                Change::delete(soa_record("example.", 11)),
                Change::delete(a_record("missing.example.", 1)),
                Change::add(soa_record("example.", 12)),
            ],
        };
        let result = commit(
            &entry,
            PullResult::Incremental {
                serial: 12,
                deltas: vec![good, bad],
            },
        );
        assert!(matches!(
            result,
            Err(PullError::Database(db::Error::MissingDeletion(_)))
        ));
        assert_eq!(entry.current_serial(), Some(10));
        assert_eq!(entry.generation(), 1);
    }

    #[test]
    fn full_result_is_committed() {
        let entry = entry();
        entry.reset_zone_image(example_records(10)).unwrap();
        commit(
            &entry,
            PullResult::Full {
                serial: 11,
                records: example_records(11),
            },
        )
        .unwrap();
        assert_eq!(entry.current_serial(), Some(11));
        assert_eq!(entry.delta_log_len(), 0);
    }
}
