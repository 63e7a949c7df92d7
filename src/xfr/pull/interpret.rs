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

//! Interpretation of the answer records of a transfer response.
//!
//! The [`Interpreter`] is fed answer records one at a time, in the
//! order they arrive, and works out what kind of response it is
//! looking at. An AXFR response is a SOA, the zone's other records,
//! and the SOA again. An IXFR response is either a single SOA (the
//! requester is up to date), a response in AXFR form, or the current
//! SOA followed by one block per version and the current SOA again
//! ([RFC 1995 § 4]). Since the first two records tell these forms
//! apart, an IXFR that turns out to be in AXFR form is downgraded in
//! place.
//!
//! [RFC 1995 § 4]: https://datatracker.ietf.org/doc/html/rfc1995#section-4

use std::fmt;

use log::debug;

use crate::class::Class;
use crate::name::Name;
use crate::rr::Record;
use crate::serial;
use crate::xfr::delta::{BuildError, Delta, DeltaBuilder};
use crate::xfr::MAX_CONSECUTIVE_COLLAPSES;

/// Consumes the answer records of a transfer response.
#[derive(Debug)]
pub struct Interpreter {
    zone: Name,
    class: Class,
    ixfr_serial: Option<u32>,
    state: State,
    final_serial: u32,
    records: Vec<Record>,
    builder: DeltaBuilder,
    deltas: Vec<Delta>,
    collapses: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    /// Waiting for the first SOA.
    Start,

    /// The first SOA of an IXFR response has been seen. The second
    /// record decides the form of the response.
    Second,

    /// Receiving a response in AXFR form.
    Full,

    /// Receiving a response in incremental form.
    Incremental,

    /// The response is complete.
    Done,
}

/// The completed interpretation of a response.
#[derive(Debug, Eq, PartialEq)]
pub enum Interpreted {
    /// The requester is already at the given serial (or newer).
    UpToDate(u32),

    /// The response carried the whole zone, SOA first.
    Full(Vec<Record>),

    /// The response carried the given versions.
    Incremental(Vec<Delta>),
}

impl Interpreter {
    /// Creates an interpreter for the response to an AXFR request
    /// (`ixfr_serial` is `None`) or to an IXFR request from the given
    /// serial.
    pub fn new(zone: Name, class: Class, ixfr_serial: Option<u32>) -> Self {
        Self {
            zone,
            class,
            ixfr_serial,
            state: State::Start,
            final_serial: 0,
            records: Vec::new(),
            builder: DeltaBuilder::new(),
            deltas: Vec::new(),
            collapses: 0,
        }
    }

    /// Returns whether the response is complete.
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Returns whether the response is (so far) in incremental form.
    pub fn is_incremental(&self) -> bool {
        matches!(self.state, State::Second | State::Incremental)
    }

    /// Feeds the next answer record. Returns whether the response is
    /// now complete.
    pub fn push(&mut self, record: Record) -> Result<bool, InterpretError> {
        if self.state == State::Done {
            return Err(InterpretError::Malformed("records after the end of the response"));
        }
        if record.class != self.class {
            return Err(InterpretError::Malformed("record of the wrong class"));
        }
        if !record.owner.eq_or_subdomain_of(&self.zone) {
            return Err(InterpretError::Inconsistent(format!(
                "record at {} is outside of the zone",
                record.owner
            )));
        }
        let soa_serial = match record.soa() {
            Some(Ok(soa)) => {
                if record.owner != self.zone {
                    return Err(InterpretError::Malformed("SOA record below the apex"));
                }
                Some(soa.serial)
            }
            Some(Err(_)) => return Err(InterpretError::Malformed("invalid SOA record")),
            None => None,
        };

        match self.state {
            State::Start => self.start(record, soa_serial)?,
            State::Second => self.second(record, soa_serial)?,
            State::Full => self.full(record, soa_serial)?,
            State::Incremental => self.incremental(record, soa_serial)?,
            State::Done => unreachable!(),
        }
        Ok(self.state == State::Done)
    }

    fn start(&mut self, record: Record, soa_serial: Option<u32>) -> Result<(), InterpretError> {
        let serial = soa_serial.ok_or(InterpretError::Malformed("response does not start with SOA"))?;
        self.final_serial = serial;
        self.records.push(record);
        self.state = match self.ixfr_serial {
            Some(ours) if !serial::is_newer(serial, ours) => State::Done,
            Some(_) => State::Second,
            None => State::Full,
        };
        Ok(())
    }

    fn second(&mut self, record: Record, soa_serial: Option<u32>) -> Result<(), InterpretError> {
        match soa_serial {
            // A SOA-only zone in AXFR form. The closing SOA is not kept.
            Some(serial) if serial == self.final_serial => self.state = State::Done,
            Some(serial) => {
                let ours = self.ixfr_serial.unwrap_or_default();
                if serial != ours {
                    return Err(InterpretError::Inconsistent(format!(
                        "first version starts at serial {serial}, not {ours}"
                    )));
                }
                self.records.clear();
                self.state = State::Incremental;
                self.incremental(record, soa_serial)?;
            }
            None => {
                debug!("IXFR response for {} is in AXFR form", self.zone);
                self.records.push(record);
                self.state = State::Full;
            }
        }
        Ok(())
    }

    fn full(&mut self, record: Record, soa_serial: Option<u32>) -> Result<(), InterpretError> {
        match soa_serial {
            Some(serial) if serial == self.final_serial => self.state = State::Done,
            Some(serial) => {
                return Err(InterpretError::Inconsistent(format!(
                    "closing SOA has serial {}, not {}",
                    serial, self.final_serial
                )))
            }
            None => self.records.push(record),
        }
        Ok(())
    }

    fn incremental(&mut self, record: Record, soa_serial: Option<u32>) -> Result<(), InterpretError> {
        let serial = match soa_serial {
            Some(serial) => serial,
            None => {
                self.builder.push(record)?;
                return Ok(());
            }
        };

        if self.builder.is_adding() {
            if serial == self.final_serial {
                // The closing SOA.
                let builder = std::mem::take(&mut self.builder);
                if let Some(delta) = builder.finish()? {
                    self.deltas.push(delta);
                }
                self.check_final()?;
                self.state = State::Done;
                return Ok(());
            }
            let expected = self.builder.current().map_or(serial, |d| d.to_serial);
            if serial != expected {
                return Err(InterpretError::Inconsistent(format!(
                    "version starts at serial {serial}, previous one ended at {expected}"
                )));
            }
            if let Some(completed) = self.builder.push(record)? {
                self.deltas.push(completed);
            }
        } else if self.builder.current().is_none() {
            // The deleted SOA of the first version.
            self.builder.push(record)?;
        } else {
            // The added SOA of the current version.
            self.builder.push(record)?;
            let collapsed = self.builder.current().map_or(false, Delta::is_collapsed);
            if collapsed {
                self.collapses += 1;
            } else {
                self.collapses = 0;
            }
            if self.collapses >= MAX_CONSECUTIVE_COLLAPSES {
                // The in-progress version is dropped: the stream stops at
                // its added SOA.
                debug!(
                    "IXFR response for {} ended after {} collapsed versions",
                    self.zone, self.collapses
                );
                self.builder = DeltaBuilder::new();
                self.state = State::Done;
            }
        }
        Ok(())
    }

    fn check_final(&self) -> Result<(), InterpretError> {
        match self.deltas.last() {
            Some(last) if last.to_serial != self.final_serial => {
                Err(InterpretError::Inconsistent(format!(
                    "last version ends at serial {}, not {}",
                    last.to_serial, self.final_serial
                )))
            }
            _ => Ok(()),
        }
    }

    /// Finishes interpretation. Fails if the response is incomplete.
    pub fn finish(self) -> Result<Interpreted, InterpretError> {
        if self.state != State::Done {
            return Err(InterpretError::Malformed("response ended early"));
        }
        if !self.deltas.is_empty() {
            Ok(Interpreted::Incremental(self.deltas))
        } else if self.records.len() == 1 && self.ixfr_serial.is_some() {
            // Either the up-to-date response or an AXFR-form response
            // of a SOA-only zone. Only the former has a single record.
            match self.ixfr_serial {
                Some(ours) if !serial::is_newer(self.final_serial, ours) => {
                    Ok(Interpreted::UpToDate(self.final_serial))
                }
                _ => Ok(Interpreted::Full(self.records)),
            }
        } else {
            Ok(Interpreted::Full(self.records))
        }
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors in a transfer response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InterpretError {
    /// The response is not a valid transfer response.
    Malformed(&'static str),

    /// The response is well-formed but its serials (or its records'
    /// owners) do not fit together. The transfer may be retried as a
    /// full transfer.
    Inconsistent(String),
}

impl InterpretError {
    pub fn is_inconsistent(&self) -> bool {
        matches!(self, Self::Inconsistent(_))
    }
}

impl fmt::Display for InterpretError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Malformed(reason) => write!(f, "malformed response: {reason}"),
            Self::Inconsistent(reason) => write!(f, "inconsistent response: {reason}"),
        }
    }
}

impl std::error::Error for InterpretError {}

impl From<BuildError> for InterpretError {
    fn from(e: BuildError) -> Self {
        match e {
            BuildError::MissingSoa => Self::Malformed("record outside of any version"),
            BuildError::InvalidSoa => Self::Malformed("invalid SOA record"),
            BuildError::Incomplete => Self::Malformed("version is missing its added SOA"),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::tests::{a_record, ns_record, soa_record, txt_record};

    fn interpreter(ixfr_serial: Option<u32>) -> Interpreter {
        Interpreter::new("example.".parse().unwrap(), Class::IN, ixfr_serial)
    }

    fn feed(
        interpreter: &mut Interpreter,
        records: Vec<Record>,
    ) -> Result<bool, InterpretError> {
        let mut done = false;
        for record in records {
            done = interpreter.push(record)?;
        }
        Ok(done)
    }

    #[test]
    fn axfr_is_collected() {
        let mut interpreter = interpreter(None);
        let done = feed(
            &mut interpreter,
            vec![
                soa_record("example.", 5),
                ns_record("example.", "ns1.example."),
                a_record("ns1.example.", 1),
                soa_record("example.", 5),
            ],
        )
        .unwrap();
        assert!(done);
        match interpreter.finish().unwrap() {
            Interpreted::Full(records) => {
                assert_eq!(records.len(), 3);
                assert!(records[0].is_soa());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn axfr_with_changed_closing_soa_is_inconsistent() {
        let mut interpreter = interpreter(None);
        let result = feed(
            &mut interpreter,
            vec![
                soa_record("example.", 5),
                a_record("www.example.", 1),
                soa_record("example.", 6),
            ],
        );
        assert!(result.unwrap_err().is_inconsistent());
    }

    #[test]
    fn ixfr_is_split_into_versions() {
        let mut interpreter = interpreter(Some(10));
        let done = feed(
            &mut interpreter,
            vec![
                soa_record("example.", 12),
                soa_record("example.", 10),
                a_record("old.example.", 1),
                soa_record("example.", 11),
                a_record("new.example.", 1),
                soa_record("example.", 11),
                soa_record("example.", 12),
                txt_record("new.example.", "text"),
                soa_record("example.", 12),
            ],
        )
        .unwrap();
        assert!(done);
        match interpreter.finish().unwrap() {
            Interpreted::Incremental(deltas) => {
                assert_eq!(deltas.len(), 2);
                assert_eq!((deltas[0].from_serial, deltas[0].to_serial), (10, 11));
                assert_eq!((deltas[1].from_serial, deltas[1].to_serial), (11, 12));
                assert_eq!(deltas[0].deletions().count(), 1);
                assert_eq!(deltas[0].additions().count(), 1);
                assert_eq!(deltas[1].deletions().count(), 0);
                assert_eq!(deltas[1].additions().count(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn ixfr_in_axfr_form_is_downgraded() {
        let mut interpreter = interpreter(Some(10));
        feed(
            &mut interpreter,
            vec![
                soa_record("example.", 15),
                ns_record("example.", "ns1.example."),
            ],
        )
        .unwrap();
        assert!(!interpreter.is_incremental());
        let done = feed(&mut interpreter, vec![soa_record("example.", 15)]).unwrap();
        assert!(done);
        assert!(matches!(interpreter.finish(), Ok(Interpreted::Full(records)) if records.len() == 2));
    }

    #[test]
    fn soa_only_zone_in_axfr_form() {
        let mut interpreter = interpreter(Some(10));
        let done = feed(
            &mut interpreter,
            vec![soa_record("example.", 15), soa_record("example.", 15)],
        )
        .unwrap();
        assert!(done);
        assert!(matches!(interpreter.finish(), Ok(Interpreted::Full(records)) if records.len() == 1));
    }

    #[test]
    fn single_soa_means_up_to_date() {
        let mut interpreter = interpreter(Some(10));
        assert!(interpreter.push(soa_record("example.", 10)).unwrap());
        assert_eq!(interpreter.finish(), Ok(Interpreted::UpToDate(10)));
    }

    #[test]
    fn ixfr_from_wrong_serial_is_inconsistent() {
        let mut interpreter = interpreter(Some(10));
        let result = feed(
            &mut interpreter,
            vec![soa_record("example.", 12), soa_record("example.", 9)],
        );
        assert!(result.unwrap_err().is_inconsistent());
    }

    #[test]
    fn ixfr_not_reaching_final_serial_is_inconsistent() {
        let mut interpreter = interpreter(Some(10));
        let result = feed(
            &mut interpreter,
            vec![
                soa_record("example.", 12),
                soa_record("example.", 10),
                soa_record("example.", 11),
                soa_record("example.", 13),
            ],
        );
        assert!(result.unwrap_err().is_inconsistent());
    }

    #[test]
    fn second_consecutive_collapse_ends_response() {
        let mut interpreter = interpreter(Some(10));
        let done = feed(
            &mut interpreter,
            vec![
                soa_record("example.", 12),
                soa_record("example.", 10),
                soa_record("example.", 11),
                soa_record("example.", 11),
                soa_record("example.", 11),
                a_record("x.example.", 1),
                soa_record("example.", 11),
                soa_record("example.", 11),
            ],
        )
        .unwrap();
        assert!(done);
        match interpreter.finish().unwrap() {
            Interpreted::Incremental(deltas) => {
                assert_eq!(deltas.len(), 2);
                assert!(deltas[1].is_collapsed());
                assert_eq!(deltas[1].additions().count(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn out_of_zone_records_are_rejected() {
        let mut interpreter = interpreter(None);
        interpreter.push(soa_record("example.", 1)).unwrap();
        let result = interpreter.push(a_record("www.example.net.", 1));
        assert!(result.unwrap_err().is_inconsistent());
    }

    #[test]
    fn truncated_response_is_malformed() {
        let mut interpreter = interpreter(None);
        interpreter.push(soa_record("example.", 1)).unwrap();
        interpreter.push(a_record("www.example.", 1)).unwrap();
        assert!(matches!(
            interpreter.finish(),
            Err(InterpretError::Malformed(_))
        ));
    }
}
