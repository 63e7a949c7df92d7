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

//! Versioned zone changes for incremental transfer ([RFC 1995]).
//!
//! A [`Delta`] is one version step of a zone: the records deleted and
//! added to move from one serial to the next. A [`DeltaLog`] keeps the
//! recent steps of a zone in serial order so that IXFR requests can be
//! answered, and a [`DeltaSpan`] is the part of a log that one push
//! session consumes, front to back, exactly once.
//!
//! [RFC 1995]: https://datatracker.ietf.org/doc/html/rfc1995

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::db::Error;
use crate::rr::Record;
use crate::serial;

////////////////////////////////////////////////////////////////////////
// DELTAS                                                             //
////////////////////////////////////////////////////////////////////////

/// Whether a [`Change`] adds or deletes its record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Op {
    Add,
    Delete,
}

/// A single record added or deleted by a [`Delta`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Change {
    pub op: Op,
    pub record: Record,
}

impl Change {
    pub fn add(record: Record) -> Self {
        Self {
            op: Op::Add,
            record,
        }
    }

    pub fn delete(record: Record) -> Self {
        Self {
            op: Op::Delete,
            record,
        }
    }
}

/// One version step of a zone.
///
/// Changes are kept in order, deletions before additions. The deleted
/// SOA (carrying `from_serial`) and the added SOA (carrying
/// `to_serial`) are normally among the changes but need not be.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Delta {
    pub from_serial: u32,
    pub to_serial: u32,
    pub changes: Vec<Change>,
}

impl Delta {
    /// Returns whether this step starts and ends at the same serial.
    pub fn is_collapsed(&self) -> bool {
        self.from_serial == self.to_serial
    }

    /// Returns the deleted SOA record, if the delta carries one.
    pub fn deleted_soa(&self) -> Option<&Record> {
        self.changes
            .iter()
            .find(|c| c.op == Op::Delete && c.record.is_soa())
            .map(|c| &c.record)
    }

    /// Returns the added SOA record, if the delta carries one.
    pub fn added_soa(&self) -> Option<&Record> {
        self.changes
            .iter()
            .find(|c| c.op == Op::Add && c.record.is_soa())
            .map(|c| &c.record)
    }

    /// Returns the deleted records other than the SOA.
    pub fn deletions(&self) -> impl Iterator<Item = &Record> {
        self.changes
            .iter()
            .filter(|c| c.op == Op::Delete && !c.record.is_soa())
            .map(|c| &c.record)
    }

    /// Returns the added records other than the SOA.
    pub fn additions(&self) -> impl Iterator<Item = &Record> {
        self.changes
            .iter()
            .filter(|c| c.op == Op::Add && !c.record.is_soa())
            .map(|c| &c.record)
    }
}

////////////////////////////////////////////////////////////////////////
// DELTA BUILDER                                                      //
////////////////////////////////////////////////////////////////////////

/// Assembles [`Delta`]s from records in IXFR order: for each version,
/// the deleted SOA, the deleted records, the added SOA, and the added
/// records.
#[derive(Debug, Default)]
pub struct DeltaBuilder {
    current: Option<Delta>,
    adding: bool,
}

/// Errors that arise while assembling [`Delta`]s.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildError {
    /// A non-SOA record appeared before any version was started.
    MissingSoa,

    /// An SOA record had invalid RDATA.
    InvalidSoa,

    /// The records ended partway through a version.
    Incomplete,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::MissingSoa => f.write_str("record outside of any version"),
            Self::InvalidSoa => f.write_str("invalid SOA record"),
            Self::Incomplete => f.write_str("version is missing its added SOA"),
        }
    }
}

impl std::error::Error for BuildError {}

impl DeltaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the builder is in the addition part of a
    /// version.
    pub fn is_adding(&self) -> bool {
        self.adding
    }

    /// Returns the version currently being assembled.
    pub fn current(&self) -> Option<&Delta> {
        self.current.as_ref()
    }

    /// Feeds the next record. When the record starts a new version, the
    /// previous (completed) version is returned.
    pub fn push(&mut self, record: Record) -> Result<Option<Delta>, BuildError> {
        let soa_serial = match record.soa() {
            Some(Ok(soa)) => Some(soa.serial),
            Some(Err(_)) => return Err(BuildError::InvalidSoa),
            None => None,
        };
        match (soa_serial, self.current.as_mut()) {
            (Some(serial), Some(delta)) if !self.adding => {
                delta.to_serial = serial;
                delta.changes.push(Change::add(record));
                self.adding = true;
                Ok(None)
            }
            (Some(serial), _) => {
                let completed = self.current.replace(Delta {
                    from_serial: serial,
                    to_serial: serial,
                    changes: vec![Change::delete(record)],
                });
                self.adding = false;
                Ok(completed)
            }
            (None, Some(delta)) => {
                let op = if self.adding { Op::Add } else { Op::Delete };
                delta.changes.push(Change { op, record });
                Ok(None)
            }
            (None, None) => Err(BuildError::MissingSoa),
        }
    }

    /// Finishes assembly, returning the last version (if any).
    pub fn finish(self) -> Result<Option<Delta>, BuildError> {
        match self.current {
            Some(delta) if self.adding => Ok(Some(delta)),
            Some(_) => Err(BuildError::Incomplete),
            None => Ok(None),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// DELTA LOG                                                          //
////////////////////////////////////////////////////////////////////////

/// The ordered, serial-keyed list of recent [`Delta`]s of a zone.
///
/// Deltas in the log are contiguous: each starts at the serial at which
/// the previous one ended. When the log grows past its maximum length,
/// the oldest deltas are dropped.
#[derive(Debug)]
pub struct DeltaLog {
    deltas: VecDeque<Arc<Delta>>,
    max_len: usize,
}

impl DeltaLog {
    /// Creates an empty log holding at most `max_len` deltas.
    pub fn new(max_len: usize) -> Self {
        Self {
            deltas: VecDeque::new(),
            max_len,
        }
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Returns the serial at which the log begins.
    pub fn first_serial(&self) -> Option<u32> {
        self.deltas.front().map(|d| d.from_serial)
    }

    /// Returns the serial at which the log ends.
    pub fn last_serial(&self) -> Option<u32> {
        self.deltas.back().map(|d| d.to_serial)
    }

    /// Appends a delta. It must start where the log ends, and must not
    /// move the serial backwards.
    pub fn append(&mut self, delta: Delta) -> Result<(), Error> {
        if let Some(last) = self.last_serial() {
            if delta.from_serial != last {
                return Err(Error::DeltaMismatch {
                    expected: last,
                    found: delta.from_serial,
                });
            }
        }
        if !delta.is_collapsed() && !serial::is_newer(delta.to_serial, delta.from_serial) {
            return Err(Error::SerialNotNewer {
                current: delta.from_serial,
                new: delta.to_serial,
            });
        }
        self.deltas.push_back(Arc::new(delta));
        while self.deltas.len() > self.max_len {
            self.deltas.pop_front();
        }
        Ok(())
    }

    /// Discards every delta in the log.
    pub fn clear(&mut self) {
        self.deltas.clear();
    }

    /// Looks up the deltas spanning `(peer_serial, current_serial]`.
    /// Returns `None` if the log does not cover that span (for
    /// instance, because it was trimmed), in which case the caller must
    /// fall back to a full transfer.
    pub fn span(&self, peer_serial: u32, current_serial: u32) -> Option<DeltaSpan> {
        if !serial::is_newer(current_serial, peer_serial) {
            return None;
        }
        let start = self
            .deltas
            .iter()
            .position(|d| d.from_serial == peer_serial)?;
        let mut deltas = VecDeque::new();
        for delta in self.deltas.iter().skip(start) {
            deltas.push_back(delta.clone());
            if delta.to_serial == current_serial {
                return Some(DeltaSpan { deltas });
            }
        }
        None
    }
}

/// A run of contiguous [`Delta`]s taken from a [`DeltaLog`].
///
/// A span is consumed front to back; each delta is discarded once it
/// has been fully sent.
#[derive(Debug)]
pub struct DeltaSpan {
    deltas: VecDeque<Arc<Delta>>,
}

impl DeltaSpan {
    /// Returns the delta at the front of the span.
    pub fn front(&self) -> Option<&Arc<Delta>> {
        self.deltas.front()
    }

    /// Discards the delta at the front of the span.
    pub fn pop_front(&mut self) -> Option<Arc<Delta>> {
        self.deltas.pop_front()
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

impl From<Vec<Delta>> for DeltaSpan {
    fn from(deltas: Vec<Delta>) -> Self {
        Self {
            deltas: deltas.into_iter().map(Arc::new).collect(),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
