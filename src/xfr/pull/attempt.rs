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

//! A pull attempt against a single candidate server.
//!
//! An attempt connects, probes the candidate's SOA, compares serials,
//! requests a transfer, and receives the response. Nothing is committed
//! here; the caller decides what to do with the [`Outcome`].

use std::fmt;
use std::io;

use log::{debug, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::interpret::{InterpretError, Interpreted, Interpreter};
use super::{Candidate, Method, PullConfig, PullRequest, MAX_RESTARTS};
use crate::message::tsig::{StreamError, StreamVerifier};
use crate::message::{writer, Qclass, Qtype, Rcode, Reader};
use crate::rr::Record;
use crate::serial;
use crate::xfr::delta::Delta;
use crate::xfr::framer::{append_framed, MessageReader, ReadError};
use crate::xfr::request::{build_query, QueryKind};

/// What an attempt found out.
#[derive(Debug)]
pub enum Outcome {
    /// The candidate is at our serial.
    UpToDate(u32),

    /// The candidate is behind us.
    Stale { ours: u32, theirs: u32 },

    /// The candidate sent the whole zone (SOA first).
    Full { serial: u32, records: Vec<Record> },

    /// The candidate sent the versions leading to `serial`.
    Incremental { serial: u32, deltas: Vec<Delta> },
}

/// Runs an attempt against `candidate`.
pub async fn run(
    request: &PullRequest,
    candidate: &Candidate,
    config: &PullConfig,
) -> Result<Outcome, AttemptError> {
    let mut reader = connect(candidate, config).await?;
    let theirs = probe_soa(&mut reader, request, candidate, config).await?;
    debug!(
        "{} has serial {} for {}",
        candidate.addr, theirs, request.zone
    );
    if let Some(ours) = request.serial {
        if theirs == ours {
            return Ok(Outcome::UpToDate(ours));
        } else if !serial::is_newer(theirs, ours) {
            return Ok(Outcome::Stale { ours, theirs });
        }
    }

    let mut kind = match (request.serial, candidate.method) {
        (Some(serial), Method::Ixfr) => QueryKind::Ixfr { serial },
        _ => QueryKind::Axfr,
    };
    let mut restarts = 0;
    loop {
        match transfer(&mut reader, request, candidate, config, kind).await {
            Err(AttemptError::Interpret(e)) if e.is_inconsistent() => {
                restarts += 1;
                if restarts > MAX_RESTARTS {
                    return Err(AttemptError::TooManyRestarts(e));
                }
                warn!(
                    "{}: {} for {}; restarting with AXFR ({} of {})",
                    candidate.addr, e, request.zone, restarts, MAX_RESTARTS
                );
                kind = QueryKind::Axfr;
                reader = connect(candidate, config).await?;
            }
            Err(e) => return Err(e),
            Ok(Interpreted::UpToDate(serial)) => return Ok(Outcome::UpToDate(serial)),
            Ok(Interpreted::Full(records)) => {
                let serial = match records.first().and_then(Record::soa) {
                    Some(Ok(soa)) => soa.serial,
                    _ => return Err(AttemptError::Malformed("response does not start with SOA")),
                };
                // The SOA answer is only advisory: the zone actually sent must
                // be newer than ours, too.
                if let Some(ours) = request.serial {
                    if serial == ours {
                        return Ok(Outcome::UpToDate(ours));
                    } else if !serial::is_newer(serial, ours) {
                        return Ok(Outcome::Stale {
                            ours,
                            theirs: serial,
                        });
                    }
                }
                return Ok(Outcome::Full { serial, records });
            }
            Ok(Interpreted::Incremental(deltas)) => {
                let serial = deltas.last().map_or(theirs, |d| d.to_serial);
                return Ok(Outcome::Incremental { serial, deltas });
            }
        }
    }
}

async fn connect(
    candidate: &Candidate,
    config: &PullConfig,
) -> Result<MessageReader<TcpStream>, AttemptError> {
    match timeout(config.connect_timeout, TcpStream::connect(candidate.addr)).await {
        Ok(Ok(stream)) => Ok(MessageReader::new(stream)),
        Ok(Err(e)) => Err(AttemptError::Connect(e)),
        Err(_) => Err(AttemptError::Timeout),
    }
}

/// Sends a query, configuring the reader to verify the response if the
/// candidate has a key. Returns the query's ID.
async fn send_query(
    reader: &mut MessageReader<TcpStream>,
    request: &PullRequest,
    candidate: &Candidate,
    config: &PullConfig,
    kind: QueryKind,
) -> Result<u16, AttemptError> {
    let id = rand::random();
    let (query, mac) = build_query(id, &request.zone, request.class, kind, candidate.key.as_ref())
        .map_err(AttemptError::Query)?;
    let mut framed = Vec::with_capacity(query.len() + 2);
    append_framed(&mut framed, &query).or(Err(AttemptError::Query(writer::Error::Truncation)))?;
    match timeout(config.read_timeout, reader.get_mut().write_all(&framed)).await {
        Ok(Ok(())) => (),
        Ok(Err(e)) => return Err(AttemptError::Io(e)),
        Err(_) => return Err(AttemptError::Timeout),
    }
    let verifier = match (&candidate.key, mac) {
        (Some(key), Some(mac)) => Some(StreamVerifier::new(key.clone(), &mac)),
        _ => None,
    };
    reader.set_verifier(verifier);
    debug!("sent {} query for {} to {}", kind, request.zone, candidate.addr);
    Ok(id)
}

/// Queries the candidate's SOA and returns its serial.
async fn probe_soa(
    reader: &mut MessageReader<TcpStream>,
    request: &PullRequest,
    candidate: &Candidate,
    config: &PullConfig,
) -> Result<u32, AttemptError> {
    let id = send_query(reader, request, candidate, config, QueryKind::Soa).await?;
    let message = reader.next_message(config.first_read_timeout).await?;
    let mut response = check_response(message, id, request, QueryKind::Soa.qtype(), true)?;
    if !response.aa() {
        return Err(AttemptError::Malformed("SOA response is not authoritative"));
    }
    let mut serial = None;
    for _ in 0..response.ancount() {
        let record = response
            .read_rr()
            .or(Err(AttemptError::Malformed("invalid answer record")))?;
        if record.owner == request.zone && record.class == request.class {
            if let Some(Ok(soa)) = record.soa() {
                serial = Some(soa.serial);
                break;
            }
        }
    }
    reader.finish_verification()?;
    serial.ok_or(AttemptError::Malformed("SOA response has no SOA answer"))
}

/// Requests a transfer and interprets the response.
async fn transfer(
    reader: &mut MessageReader<TcpStream>,
    request: &PullRequest,
    candidate: &Candidate,
    config: &PullConfig,
    kind: QueryKind,
) -> Result<Interpreted, AttemptError> {
    let id = send_query(reader, request, candidate, config, kind).await?;
    let ixfr_serial = match kind {
        QueryKind::Ixfr { serial } => Some(serial),
        _ => None,
    };
    let mut interpreter = Interpreter::new(request.zone.clone(), request.class, ixfr_serial);
    let mut idle = config.first_read_timeout;
    let mut n_messages = 0;
    while !interpreter.is_done() {
        let message = reader.next_message(idle).await?;
        idle = config.read_timeout;
        let mut response = check_response(message, id, request, kind.qtype(), n_messages == 0)?;
        let ancount = response.ancount();
        for _ in 0..ancount {
            let record = response
                .read_rr()
                .or(Err(AttemptError::Malformed("invalid answer record")))?;
            interpreter.push(record)?;
        }
        n_messages += 1;
        debug!(
            "message {} from {} for {}: {} answers",
            n_messages, candidate.addr, request.zone, ancount
        );
    }
    reader.finish_verification()?;
    Ok(interpreter.finish()?)
}

/// Checks the header and question of a response. On success, the
/// returned reader is positioned at the first answer.
fn check_response<'a>(
    message: &'a [u8],
    id: u16,
    request: &PullRequest,
    qtype: Qtype,
    first: bool,
) -> Result<Reader<'a>, AttemptError> {
    let mut reader = Reader::try_from(message).or(Err(AttemptError::Malformed("short message")))?;
    if reader.id() != id {
        return Err(AttemptError::Malformed("response ID does not match"));
    } else if !reader.qr() {
        return Err(AttemptError::Malformed("message is not a response"));
    } else if reader.tc() {
        return Err(AttemptError::Malformed("response is truncated"));
    } else if reader.rcode() != Rcode::NoError {
        return Err(AttemptError::Rcode(reader.rcode()));
    }
    match reader.qdcount() {
        0 if !first => (),
        1 => {
            let question = reader
                .read_question()
                .or(Err(AttemptError::Malformed("invalid question")))?;
            if question.qname != request.zone
                || question.qclass != Qclass::from(request.class)
                || question.qtype != qtype
            {
                return Err(AttemptError::Malformed("question does not match the query"));
            }
        }
        _ => return Err(AttemptError::Malformed("wrong number of questions")),
    }
    Ok(reader)
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors that end an attempt against a candidate.
#[derive(Debug)]
pub enum AttemptError {
    Connect(io::Error),
    Io(io::Error),
    Timeout,
    Closed,
    Tsig(StreamError),
    Query(writer::Error),
    Rcode(Rcode),
    Malformed(&'static str),
    Interpret(InterpretError),
    TooManyRestarts(InterpretError),
}

impl AttemptError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "failed to connect: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Timeout => f.write_str("timed out"),
            Self::Closed => f.write_str("connection closed mid-response"),
            Self::Tsig(e) => write!(f, "TSIG verification failed: {e}"),
            Self::Query(e) => write!(f, "failed to build query: {e}"),
            Self::Rcode(rcode) => write!(f, "server responded with {rcode}"),
            Self::Malformed(reason) => write!(f, "malformed response: {reason}"),
            Self::Interpret(e) => e.fmt(f),
            Self::TooManyRestarts(e) => write!(f, "{e}, giving up after {MAX_RESTARTS} restarts"),
        }
    }
}

impl std::error::Error for AttemptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect(e) | Self::Io(e) => Some(e),
            Self::Tsig(e) => Some(e),
            Self::Interpret(e) | Self::TooManyRestarts(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ReadError> for AttemptError {
    fn from(e: ReadError) -> Self {
        match e {
            ReadError::Closed => Self::Closed,
            ReadError::Timeout => Self::Timeout,
            ReadError::Io(e) => Self::Io(e),
            ReadError::Tsig(e) => Self::Tsig(e),
        }
    }
}

impl From<InterpretError> for AttemptError {
    fn from(e: InterpretError) -> Self {
        Self::Interpret(e)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
