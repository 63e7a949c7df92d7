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

//! Provides the [`Soa`] structure.

use super::ReadRdataError;
use crate::name::Name;
use crate::util::read_u32;

/// The fields of SOA RDATA ([RFC 1035 § 3.3.13]).
///
/// [RFC 1035 § 3.3.13]: https://datatracker.ietf.org/doc/html/rfc1035#section-3.3.13
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Soa {
    pub mname: Name,
    pub rname: Name,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

impl Soa {
    /// Parses uncompressed SOA RDATA.
    pub fn from_rdata(rdata: &[u8]) -> Result<Self, ReadRdataError> {
        let (mname, mname_len) = Name::try_from_uncompressed(rdata)?;
        let (rname, rname_len) = Name::try_from_uncompressed(&rdata[mname_len..])?;
        let timers = &rdata[mname_len + rname_len..];
        if timers.len() != 20 {
            return Err(ReadRdataError::UnexpectedEom);
        }
        let field = |i: usize| read_u32(&timers[4 * i..]).unwrap_or_default();
        Ok(Self {
            mname,
            rname,
            serial: field(0),
            refresh: field(1),
            retry: field(2),
            expire: field(3),
            minimum: field(4),
        })
    }

    /// Serializes the SOA into uncompressed RDATA.
    pub fn to_rdata(&self) -> Box<[u8]> {
        let mut rdata = Vec::with_capacity(
            self.mname.wire_repr().len() + self.rname.wire_repr().len() + 20,
        );
        rdata.extend_from_slice(self.mname.wire_repr());
        rdata.extend_from_slice(self.rname.wire_repr());
        for field in [
            self.serial,
            self.refresh,
            self.retry,
            self.expire,
            self.minimum,
        ] {
            rdata.extend_from_slice(&field.to_be_bytes());
        }
        rdata.into()
    }

    /// Returns a copy of this SOA with the serial replaced.
    pub fn with_serial(&self, serial: u32) -> Self {
        Self {
            serial,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RDATA: &[u8] = b"\x02ns\x07example\x00\x05admin\x07example\x00\
        \x00\x00\x00\x0a\x00\x00\x0e\x10\x00\x00\x03\x84\x00\x09\x3a\x80\
        \x00\x00\x01\x2c";

    #[test]
    fn parsing_works() {
        let soa = Soa::from_rdata(RDATA).unwrap();
        assert_eq!(soa.mname, "ns.example.".parse().unwrap());
        assert_eq!(soa.rname, "admin.example.".parse().unwrap());
        assert_eq!(soa.serial, 10);
        assert_eq!(soa.refresh, 3600);
        assert_eq!(soa.retry, 900);
        assert_eq!(soa.expire, 604800);
        assert_eq!(soa.minimum, 300);
        assert_eq!(soa.to_rdata().as_ref(), RDATA);
    }

    #[test]
    fn truncated_timers_are_rejected() {
        assert_eq!(
            Soa::from_rdata(&RDATA[..RDATA.len() - 1]),
            Err(ReadRdataError::UnexpectedEom),
        );
    }

    #[test]
    fn with_serial_only_changes_serial() {
        let soa = Soa::from_rdata(RDATA).unwrap();
        let bumped = soa.with_serial(11);
        assert_eq!(bumped.serial, 11);
        assert_eq!(bumped.minimum, soa.minimum);
        assert_eq!(bumped.mname, soa.mname);
    }
}
