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

//! Implementation of the push side of zone transfers.
//!
//! A [`PushSession`] is created for an accepted request with
//! [`PushSession::accept`]. It is then driven cooperatively: each call
//! to [`PushSession::resume`] packs records into messages until either
//! a message fills up (in which case [`Progress::Blocked`] is returned
//! and the caller should write out [`PushSession::take_output`] before
//! resuming) or the stream is complete ([`Progress::Done`]). The
//! session never blocks and holds all of its progress itself, so many
//! sessions can be interleaved on one thread.
//!
//! A full transfer moves through the states `FirstSoa → Walk → LastSoa
//! → Done`. An incremental transfer moves through `FirstSoa →
//! DeleteSoa → Deleting → AddSoa → Adding → … → LastSoa → Done`, with
//! one `DeleteSoa`-to-`Adding` round per delta.

use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};

use super::cursor::ZoneWalkCursor;
use super::delta::{Delta, DeltaSpan, Op};
use super::framer::{FramingError, MessageFramer, Pushed, StreamHeader};
use super::request::{QueryKind, Refusal, TransferRequest};
use super::MAX_CONSECUTIVE_COLLAPSES;
use crate::db::catalog::SessionGuard;
use crate::db::{Catalog, MemoryZone, StoredRecord, Zone};
use crate::message::tsig::StreamSigner;
use crate::message::{Opcode, Rcode};
use crate::rr::Record;
use crate::serial;

////////////////////////////////////////////////////////////////////////
// SESSIONS                                                           //
////////////////////////////////////////////////////////////////////////

/// The live state of one outbound transfer.
pub struct PushSession {
    guard: SessionGuard,
    zone: Arc<MemoryZone>,
    generation: u64,
    framer: MessageFramer,
    body: Body,
    state: State,
    collapses: u32,
}

/// What the session sends between the first and last SOA.
enum Body {
    /// Nothing: the response is the single current SOA.
    Single,

    /// The whole zone.
    Full(ZoneWalkCursor<MemoryZone>),

    /// The deltas leading from the requester's serial to ours.
    Incremental(DeltaSpan),
}

/// The kind of response a session sends.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Method {
    Single,
    Full,
    Incremental,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Single => f.write_str("single SOA"),
            Self::Full => f.write_str("full"),
            Self::Incremental => f.write_str("incremental"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    FirstSoa,
    Walk,
    DeleteSoa,
    Deleting(usize),
    AddSoa,
    Adding(usize),
    LastSoa,
    Done,
}

/// The result of [`PushSession::resume`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Progress {
    /// A message is ready. Write out the output and resume the session.
    Blocked,

    /// The stream is complete; the output holds its final message(s).
    Done,
}

/// A record about to be sent: either one stored in the zone, one taken
/// from a delta, or one made up on the spot.
enum Item {
    Stored(Arc<StoredRecord>),
    Change(Arc<Delta>, usize),
    Owned(Record),
}

impl Item {
    fn record(&self) -> &Record {
        match self {
            Self::Stored(stored) => &stored.record,
            Self::Change(delta, index) => &delta.changes[*index].record,
            Self::Owned(record) => record,
        }
    }
}

impl PushSession {
    /// Accepts a request against `catalog`, or produces the refusal to
    /// send back.
    ///
    /// IXFR requests from a requester that is already up to date are
    /// answered with the current SOA. IXFR requests whose serial is not
    /// covered by the zone's delta log are answered with a full
    /// transfer.
    pub fn accept(
        catalog: &Catalog,
        request: TransferRequest,
        max_message_len: usize,
    ) -> Result<Self, Refusal> {
        let refuse = |rcode| request.refuse(rcode);
        let qname = &request.question.qname;
        let class = request.class();

        let entry = match catalog.get(qname, class) {
            Some(entry) => entry,
            None => {
                info!("refused {} for {}/{}: not authoritative", request.kind, qname, class);
                return Err(refuse(Rcode::NotAuth));
            }
        };
        if !entry.kind().is_served() {
            info!(
                "refused {} for {}/{}: {} zones are not served",
                request.kind,
                qname,
                class,
                entry.kind()
            );
            return Err(refuse(Rcode::Refused));
        }
        let guard = entry.register_session();
        let zone = match entry.snapshot() {
            Some(zone) => zone,
            None => {
                info!("refused {} for {}/{}: no zone data", request.kind, qname, class);
                return Err(refuse(Rcode::ServFail));
            }
        };

        let body = match request.kind {
            QueryKind::Soa => Body::Single,
            QueryKind::Axfr => Body::Full(ZoneWalkCursor::new(zone.clone(), class)),
            QueryKind::Ixfr { serial } => {
                if !serial::is_newer(zone.serial(), serial) {
                    Body::Single
                } else {
                    match entry.delta_span(serial) {
                        Some(span) => Body::Incremental(span),
                        None => {
                            debug!(
                                "no deltas for {}/{} from serial {}; sending full zone",
                                qname, class, serial
                            );
                            Body::Full(ZoneWalkCursor::new(zone.clone(), class))
                        }
                    }
                }
            }
        };

        let signer = request
            .tsig
            .as_ref()
            .map(|tsig| StreamSigner::new(tsig.key.clone(), tsig.read.original_id(), tsig.mac()));
        let header = StreamHeader {
            id: request.id,
            opcode: Opcode::Query,
            rcode: Rcode::NoError,
            aa: true,
            question: Some(request.question.clone()),
        };
        let session = Self::new(
            guard,
            zone,
            MessageFramer::new(header, max_message_len, signer),
            body,
        );
        info!(
            "accepted {} for {}/{}: {} response at serial {}",
            request.kind,
            qname,
            class,
            session.method(),
            session.zone.serial()
        );
        Ok(session)
    }

    fn new(guard: SessionGuard, zone: Arc<MemoryZone>, framer: MessageFramer, body: Body) -> Self {
        Self {
            guard,
            generation: zone.generation(),
            zone,
            framer,
            body,
            state: State::FirstSoa,
            collapses: 0,
        }
    }

    /// Returns the kind of response being sent.
    pub fn method(&self) -> Method {
        match self.body {
            Body::Single => Method::Single,
            Body::Full(_) => Method::Full,
            Body::Incremental(_) => Method::Incremental,
        }
    }

    /// Returns whether the stream is complete.
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Returns the framer's queued output.
    pub fn output(&self) -> &[u8] {
        self.framer.output()
    }

    /// Removes and returns the framer's queued output.
    pub fn take_output(&mut self) -> Vec<u8> {
        self.framer.take_output()
    }

    /// Returns the number of messages produced so far.
    pub fn messages_written(&self) -> usize {
        self.framer.messages_written()
    }

    /// Returns the number of records sent so far.
    pub fn records_written(&self) -> usize {
        self.framer.records_written()
    }

    /// Advances the session until a message is ready or the stream is
    /// complete.
    ///
    /// If the zone has moved on to a newer generation since the session
    /// started, the session fails with [`PushError::Superseded`] rather
    /// than mix data from two versions of the zone.
    pub fn resume(&mut self) -> Result<Progress, PushError> {
        if self.state == State::Done {
            return Ok(Progress::Done);
        }
        loop {
            self.check_live()?;
            let item = match self.pending() {
                Some(item) => item,
                None => {
                    self.advance_state();
                    if self.state == State::Done {
                        self.framer.finish()?;
                        debug!(
                            "finished stream for {} ({} messages, {} records)",
                            self.zone.origin(),
                            self.framer.messages_written(),
                            self.framer.records_written()
                        );
                        return Ok(Progress::Done);
                    }
                    continue;
                }
            };
            match self.framer.push_answer(item.record())? {
                Pushed::Added => self.consume(&item),
                Pushed::Full => {
                    self.framer.flush()?;
                    return Ok(Progress::Blocked);
                }
            }
        }
    }

    fn check_live(&mut self) -> Result<(), PushError> {
        if self.guard.is_aborted() {
            self.state = State::Done;
            warn!("aborted stream for {}: zone reloaded", self.zone.origin());
            return Err(PushError::Superseded);
        }
        let live = self.guard.entry().generation();
        if live != self.generation {
            self.state = State::Done;
            warn!(
                "aborted stream for {}: generation {} superseded by {}",
                self.zone.origin(),
                self.generation,
                live
            );
            return Err(PushError::Superseded);
        }
        Ok(())
    }

    /// Returns the record to send next in the current state, or `None`
    /// if the state has nothing (more) to send.
    fn pending(&mut self) -> Option<Item> {
        match (self.state, &mut self.body) {
            (State::FirstSoa, _) | (State::LastSoa, _) => {
                Some(Item::Stored(self.zone.soa_record().clone()))
            }
            (State::Walk, Body::Full(cursor)) => cursor.peek().cloned().map(Item::Stored),
            (State::DeleteSoa, Body::Incremental(span)) => {
                let delta = span.front()?;
                Some(match delta.deleted_soa() {
                    Some(record) => Item::Owned(record.clone()),
                    None => Item::Owned(synthesize_soa(&self.zone, delta.from_serial)),
                })
            }
            (State::Deleting(from), Body::Incremental(span)) => {
                let delta = span.front()?;
                find_change(delta, from, Op::Delete).map(|i| Item::Change(delta.clone(), i))
            }
            (State::AddSoa, Body::Incremental(span)) => {
                let delta = span.front()?;
                Some(match delta.added_soa() {
                    Some(record) => Item::Owned(record.clone()),
                    None => Item::Owned(synthesize_soa(&self.zone, delta.to_serial)),
                })
            }
            (State::Adding(from), Body::Incremental(span)) => {
                let delta = span.front()?;
                find_change(delta, from, Op::Add).map(|i| Item::Change(delta.clone(), i))
            }
            _ => None,
        }
    }

    /// Moves past a record that has been added to a message.
    fn consume(&mut self, item: &Item) {
        self.state = match (self.state, &mut self.body) {
            (State::FirstSoa, Body::Single) => State::Done,
            (State::FirstSoa, Body::Full(_)) => State::Walk,
            (State::FirstSoa, Body::Incremental(_)) => State::DeleteSoa,
            (State::Walk, Body::Full(cursor)) => {
                cursor.next_record();
                State::Walk
            }
            (State::DeleteSoa, _) => State::Deleting(0),
            (State::AddSoa, Body::Incremental(span)) => {
                let collapsed = span.front().map_or(false, |d| d.is_collapsed());
                if collapsed {
                    self.collapses += 1;
                } else {
                    self.collapses = 0;
                }
                if self.collapses >= MAX_CONSECUTIVE_COLLAPSES {
                    debug!(
                        "truncating stream for {} after {} collapsed versions",
                        self.zone.origin(),
                        self.collapses
                    );
                    State::Done
                } else {
                    State::Adding(0)
                }
            }
            (State::Deleting(from), _) => match item {
                Item::Change(_, i) => State::Deleting(i + 1),
                _ => State::Deleting(from),
            },
            (State::Adding(from), _) => match item {
                Item::Change(_, i) => State::Adding(i + 1),
                _ => State::Adding(from),
            },
            (State::LastSoa, _) => State::Done,
            (state, _) => state,
        };
    }

    /// Moves to the next state once the current one has nothing more
    /// to send.
    fn advance_state(&mut self) {
        self.state = match (self.state, &mut self.body) {
            (State::Walk, _) => State::LastSoa,
            (State::DeleteSoa, _) => State::LastSoa,
            (State::Deleting(_), _) => State::AddSoa,
            (State::Adding(_), Body::Incremental(span)) => {
                span.pop_front();
                State::DeleteSoa
            }
            _ => State::Done,
        };
    }
}

impl fmt::Debug for PushSession {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PushSession")
            .field("zone", self.zone.origin())
            .field("generation", &self.generation)
            .field("method", &self.method())
            .field("state", &self.state)
            .field("framer", &self.framer)
            .finish()
    }
}

/// Makes up an SOA for a delta that does not carry one, from the
/// zone's current SOA.
fn synthesize_soa(zone: &MemoryZone, serial: u32) -> Record {
    let current = &zone.soa_record().record;
    Record::new_soa(
        current.owner.clone(),
        current.class,
        current.ttl,
        &zone.soa().with_serial(serial),
    )
}

/// Finds the first non-SOA change of the given kind at or after
/// `from`. The incremental states keep `from` just past the last change
/// sent, so each phase scans a delta once.
fn find_change(delta: &Delta, from: usize, op: Op) -> Option<usize> {
    delta
        .changes
        .get(from..)?
        .iter()
        .position(|c| c.op == op && !c.record.is_soa())
        .map(|i| from + i)
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors that end a push session. The connection should be closed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PushError {
    /// The zone was reloaded or changed while the session was running.
    Superseded,

    /// A message could not be framed.
    Framing(FramingError),
}

impl fmt::Display for PushError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Superseded => f.write_str("zone changed during the transfer"),
            Self::Framing(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for PushError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Superseded => None,
            Self::Framing(e) => Some(e),
        }
    }
}

impl From<FramingError> for PushError {
    fn from(e: FramingError) -> Self {
        Self::Framing(e)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
