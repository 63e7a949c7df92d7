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

//! Zone image and IXFR log files.
//!
//! Both files are sequences of DNS messages, each preceded by its
//! two-octet length, exactly as they would be sent over TCP. A zone
//! image carries the zone in AXFR order (the SOA, the other records,
//! and the SOA again). An IXFR log carries versions in IXFR order: for
//! each version, the deleted SOA, the deleted records, the added SOA,
//! and the added records.
//!
//! Zone images are replaced atomically: the new image is written to a
//! temporary sibling file, which is then renamed into place. IXFR logs
//! are appended to.

use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use crate::class::Class;
use crate::db::{MemoryZone, Zone};
use crate::message::{Opcode, Rcode, Reader, MAX_MESSAGE_LEN};
use crate::name::Name;
use crate::rr::Record;
use crate::xfr::cursor::ZoneWalkCursor;
use crate::xfr::delta::{BuildError, Delta, DeltaBuilder};
use crate::xfr::framer::{FramingError, MessageFramer, Pushed, StreamHeader, LENGTH_PREFIX_LEN};
use crate::xfr::pull::{InterpretError, Interpreted, Interpreter};

////////////////////////////////////////////////////////////////////////
// ZONE IMAGES                                                        //
////////////////////////////////////////////////////////////////////////

/// Writes `zone` to an image file at `path`, replacing any existing
/// file only once the new image is complete.
pub fn write_zone_image(path: &Path, zone: &Arc<MemoryZone>) -> Result<(), ImageError> {
    let mut framer = file_framer();
    let soa = &zone.soa_record().record;
    push_record(&mut framer, soa)?;
    for stored in ZoneWalkCursor::new(zone.clone(), zone.class()) {
        push_record(&mut framer, &stored.record)?;
    }
    push_record(&mut framer, soa)?;
    framer.finish()?;
    debug!(
        "writing {} records of {} in {} messages to {}",
        framer.records_written(),
        zone.origin(),
        framer.messages_written(),
        path.display()
    );
    replace_file(path, framer.output())
}

/// Reads an image file. The records are returned without the closing
/// SOA, ready to be loaded into the database.
pub fn read_zone_image(path: &Path, origin: &Name, class: Class) -> Result<Vec<Record>, ImageError> {
    let mut interpreter = Interpreter::new(origin.clone(), class, None);
    for record in read_records(path)? {
        interpreter.push(record)?;
    }
    match interpreter.finish()? {
        Interpreted::Full(records) => Ok(records),
        _ => Err(ImageError::Malformed("not a zone image")),
    }
}

/// Writes `data` to a temporary sibling of `path` and renames it into
/// place. The temporary file is removed if anything fails.
fn replace_file(path: &Path, data: &[u8]) -> Result<(), ImageError> {
    let temp_path = temp_sibling(path);
    let result = File::create(&temp_path)
        .and_then(|mut file| {
            file.write_all(data)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&temp_path, path));
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result.map_err(ImageError::Io)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("zone"));
    name.push(".tmp");
    path.with_file_name(name)
}

////////////////////////////////////////////////////////////////////////
// IXFR LOGS                                                          //
////////////////////////////////////////////////////////////////////////

/// Appends versions to the IXFR log at `path`, creating it if needed.
pub fn append_ixfr_log(path: &Path, deltas: &[Delta]) -> Result<(), ImageError> {
    if deltas.is_empty() {
        return Ok(());
    }
    let mut framer = file_framer();
    for delta in deltas {
        let (deleted_soa, added_soa) = match (delta.deleted_soa(), delta.added_soa()) {
            (Some(deleted), Some(added)) => (deleted, added),
            _ => return Err(ImageError::Malformed("version is missing a SOA record")),
        };
        push_record(&mut framer, deleted_soa)?;
        for record in delta.deletions() {
            push_record(&mut framer, record)?;
        }
        push_record(&mut framer, added_soa)?;
        for record in delta.additions() {
            push_record(&mut framer, record)?;
        }
    }
    framer.finish()?;

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(framer.output())?;
    file.sync_all()?;
    Ok(())
}

/// Empties the IXFR log at `path` (creating it if needed). This is done
/// when a full transfer breaks the chain of versions.
pub fn truncate_ixfr_log(path: &Path) -> Result<(), ImageError> {
    replace_file(path, &[])
}

/// Reads every version in the IXFR log at `path`. A missing log is
/// treated as empty.
pub fn read_ixfr_log(path: &Path) -> Result<Vec<Delta>, ImageError> {
    let records = match read_records(path) {
        Err(ImageError::Io(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        result => result?,
    };
    let mut builder = DeltaBuilder::new();
    let mut deltas = Vec::new();
    for record in records {
        if let Some(delta) = builder.push(record)? {
            deltas.push(delta);
        }
    }
    deltas.extend(builder.finish()?);
    Ok(deltas)
}

////////////////////////////////////////////////////////////////////////
// HELPERS                                                            //
////////////////////////////////////////////////////////////////////////

fn file_framer() -> MessageFramer {
    let header = StreamHeader {
        id: 0,
        opcode: Opcode::Query,
        rcode: Rcode::NoError,
        aa: true,
        question: None,
    };
    MessageFramer::new(header, MAX_MESSAGE_LEN, None)
}

fn push_record(framer: &mut MessageFramer, record: &Record) -> Result<(), FramingError> {
    if framer.push_answer(record)? == Pushed::Full {
        framer.flush()?;
        framer.push_answer(record)?;
    }
    Ok(())
}

/// Reads the answer records of every message in the file at `path`.
fn read_records(path: &Path) -> Result<Vec<Record>, ImageError> {
    let data = fs::read(path)?;
    let mut records = Vec::new();
    let mut rest = data.as_slice();
    while !rest.is_empty() {
        if rest.len() < LENGTH_PREFIX_LEN {
            return Err(ImageError::Malformed("truncated length prefix"));
        }
        let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
        let message = rest
            .get(LENGTH_PREFIX_LEN..LENGTH_PREFIX_LEN + len)
            .ok_or(ImageError::Malformed("truncated message"))?;
        rest = &rest[LENGTH_PREFIX_LEN + len..];

        let mut reader = Reader::try_from(message).or(Err(ImageError::Malformed("short message")))?;
        for _ in 0..reader.qdcount() {
            reader
                .read_question()
                .or(Err(ImageError::Malformed("invalid question")))?;
        }
        for _ in 0..reader.ancount() {
            let record = reader
                .read_rr()
                .or(Err(ImageError::Malformed("invalid record")))?;
            records.push(record);
        }
    }
    Ok(records)
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors that arise while reading or writing image and log files.
#[derive(Debug)]
pub enum ImageError {
    Io(io::Error),
    Framing(FramingError),
    Malformed(&'static str),
    Interpret(InterpretError),
    Build(BuildError),
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Framing(e) => e.fmt(f),
            Self::Malformed(what) => write!(f, "malformed file: {what}"),
            Self::Interpret(e) => write!(f, "invalid zone image: {e}"),
            Self::Build(e) => write!(f, "invalid IXFR log: {e}"),
        }
    }
}

impl std::error::Error for ImageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Framing(e) => Some(e),
            Self::Malformed(_) => None,
            Self::Interpret(e) => Some(e),
            Self::Build(e) => Some(e),
        }
    }
}

impl From<io::Error> for ImageError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<FramingError> for ImageError {
    fn from(e: FramingError) -> Self {
        Self::Framing(e)
    }
}

impl From<InterpretError> for ImageError {
    fn from(e: InterpretError) -> Self {
        Self::Interpret(e)
    }
}

impl From<BuildError> for ImageError {
    fn from(e: BuildError) -> Self {
        Self::Build(e)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
