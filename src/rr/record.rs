// Copyright 2023 Matthew Ingwersen.
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

//! Provides the [`Record`] structure.

use std::fmt;

use super::{ReadRdataError, Soa, Ttl, Type};
use crate::class::Class;
use crate::name::Name;

/// A single DNS resource record.
///
/// The RDATA is kept as opaque octets in uncompressed form (see
/// [`rdata`](super::rdata)). Records are immutable once built; the
/// database and in-flight transfers share them behind an `Arc`.
#[derive(Clone, Eq, PartialEq)]
pub struct Record {
    pub owner: Name,
    pub rr_type: Type,
    pub class: Class,
    pub ttl: Ttl,
    pub rdata: Box<[u8]>,
}

impl Record {
    /// Builds a SOA record.
    pub fn new_soa(owner: Name, class: Class, ttl: Ttl, soa: &Soa) -> Self {
        Self {
            owner,
            rr_type: Type::SOA,
            class,
            ttl,
            rdata: soa.to_rdata(),
        }
    }

    /// Returns whether this is a SOA record.
    pub fn is_soa(&self) -> bool {
        self.rr_type == Type::SOA
    }

    /// Parses the RDATA of a SOA record. Returns `None` if this is not
    /// a SOA record.
    pub fn soa(&self) -> Option<Result<Soa, ReadRdataError>> {
        self.is_soa().then(|| Soa::from_rdata(&self.rdata))
    }

    /// Returns whether this record carries the same data as `other`,
    /// ignoring the TTL. This is how records are matched when a
    /// deletion is applied ([RFC 1995 § 4]).
    ///
    /// [RFC 1995 § 4]: https://datatracker.ietf.org/doc/html/rfc1995#section-4
    pub fn same_data(&self, other: &Record) -> bool {
        self.rr_type == other.rr_type
            && self.class == other.class
            && self.owner == other.owner
            && self.rdata == other.rdata
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} <{} octets>",
            self.owner,
            self.ttl,
            self.class,
            self.rr_type,
            self.rdata.len()
        )
    }
}
