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

//! The database [`Error`] type.

use std::fmt;

use crate::class::Class;
use crate::name::Name;

/// Errors that arise when zone data is built or committed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// A record's owner is not within the zone.
    OutOfZone(Name),

    /// A record's class is not the zone's class.
    WrongClass(Name, Class),

    /// The zone has no SOA record at its apex.
    MissingSoa,

    /// The zone has more than one SOA record at its apex.
    MultipleSoa,

    /// The apex SOA record has invalid RDATA.
    InvalidSoa,

    /// A commit would move the serial backwards (or leave it
    /// unchanged).
    SerialNotNewer { current: u32, new: u32 },

    /// The zone has no data loaded.
    NoZoneData,

    /// A delta does not start at the serial of the data it is applied
    /// to.
    DeltaMismatch { expected: u32, found: u32 },

    /// A delta deletes a record that is not present.
    MissingDeletion(Name),

    /// A pull is already in progress for the zone.
    TransferInProgress,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::OutOfZone(name) => write!(f, "{name} is outside the zone"),
            Self::WrongClass(name, class) => write!(f, "record at {name} has wrong class {class}"),
            Self::MissingSoa => f.write_str("no SOA record at the apex"),
            Self::MultipleSoa => f.write_str("multiple SOA records at the apex"),
            Self::InvalidSoa => f.write_str("invalid SOA record at the apex"),
            Self::SerialNotNewer { current, new } => {
                write!(f, "serial {new} is not newer than current serial {current}")
            }
            Self::NoZoneData => f.write_str("zone has no data loaded"),
            Self::DeltaMismatch { expected, found } => {
                write!(f, "delta starts at serial {found}, expected {expected}")
            }
            Self::MissingDeletion(name) => {
                write!(f, "delta deletes a record at {name} that is not present")
            }
            Self::TransferInProgress => f.write_str("a transfer is already in progress"),
        }
    }
}

impl std::error::Error for Error {}
