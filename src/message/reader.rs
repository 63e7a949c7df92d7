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

//! Implementation of the [`Reader`] type to read on-the-wire DNS
//! messages.

use std::fmt;

use super::constants::*;
use super::{Opcode, Question, Rcode};
use crate::name::{self, Name};
use crate::rr::rdata::{self, ReadRdataError};
use crate::rr::Record;
use crate::util::{read_u16, read_u32};

////////////////////////////////////////////////////////////////////////
// READER                                                             //
////////////////////////////////////////////////////////////////////////

/// A "frame" around a buffer containing a DNS message that enables
/// reading the message data.
///
/// A `Reader` is constructed using its [`TryFrom`] implementation,
/// which fails unless the buffer holds at least a full 12-octet header.
/// Header fields can be read at any time. Questions and records are
/// read sequentially from a cursor that starts just after the header,
/// with [`Reader::read_question`] and [`Reader::read_rr`]; both are
/// atomic, leaving the cursor unchanged on failure.
#[derive(Eq, PartialEq)]
pub struct Reader<'a> {
    octets: &'a [u8],
    cursor: usize,
}

impl<'a> Reader<'a> {
    /// Returns the 16-bit ID of the message.
    pub fn id(&self) -> u16 {
        self.header_u16(ID_START)
    }

    /// Returns whether the QR (query response) bit is set.
    pub fn qr(&self) -> bool {
        self.octets[FLAGS_HI] & QR_MASK != 0
    }

    /// Returns the message's opcode.
    pub fn opcode(&self) -> Opcode {
        Opcode::from_flags(self.octets[FLAGS_HI])
    }

    /// Returns whether the AA (authoritative answer) bit is set.
    pub fn aa(&self) -> bool {
        self.octets[FLAGS_HI] & AA_MASK != 0
    }

    /// Returns whether the TC (truncation) bit is set.
    pub fn tc(&self) -> bool {
        self.octets[FLAGS_HI] & TC_MASK != 0
    }

    /// Returns the RCODE of the message.
    pub fn rcode(&self) -> Rcode {
        // Four bits always make a valid RCODE.
        Rcode::try_from(self.octets[FLAGS_LO] & RCODE_MASK).unwrap_or(Rcode::FormErr)
    }

    /// Returns the number of questions in the message.
    pub fn qdcount(&self) -> u16 {
        self.header_u16(QDCOUNT_START)
    }

    /// Returns the number of answers in the message.
    pub fn ancount(&self) -> u16 {
        self.header_u16(ANCOUNT_START)
    }

    /// Returns the number of authority records in the message.
    pub fn nscount(&self) -> u16 {
        self.header_u16(NSCOUNT_START)
    }

    /// Returns the number of additional records in the message.
    pub fn arcount(&self) -> u16 {
        self.header_u16(ARCOUNT_START)
    }

    /// Reads a [`Question`] starting at the current cursor.
    pub fn read_question(&mut self) -> Result<Question> {
        let (qname, qname_len) =
            Name::try_from_compressed(self.octets, self.cursor).map_err(Error::InvalidOwner)?;
        let fixed_start = self.cursor + qname_len;
        let fixed = self
            .octets
            .get(fixed_start..fixed_start + 4)
            .ok_or(Error::UnexpectedEomInField)?;
        let qtype = read_u16(fixed).unwrap_or_default();
        let qclass = read_u16(&fixed[2..]).unwrap_or_default();
        self.cursor = fixed_start + 4;
        Ok(Question {
            qname,
            qtype: qtype.into(),
            qclass: qclass.into(),
        })
    }

    /// Reads a resource record at the current cursor. Names embedded in
    /// the RDATA of well-known types are decompressed.
    pub fn read_rr(&mut self) -> Result<Record> {
        let (owner, owner_len) =
            Name::try_from_compressed(self.octets, self.cursor).map_err(Error::InvalidOwner)?;
        let (rr_type, class, ttl, rdlength) = self.read_rr_fixed(self.cursor + owner_len)?;
        let rdata_start = self.cursor + owner_len + 10;
        let rdata = rdata::read_rdata(rr_type.into(), self.octets, rdata_start, rdlength)?;
        self.cursor = rdata_start + rdlength as usize;
        Ok(Record {
            owner,
            rr_type: rr_type.into(),
            class: class.into(),
            ttl: ttl.into(),
            rdata,
        })
    }

    /// Skips over the resource record at the current cursor without
    /// decoding its RDATA.
    pub fn skip_rr(&mut self) -> Result<()> {
        let (_, owner_len) =
            Name::try_from_compressed(self.octets, self.cursor).map_err(Error::InvalidOwner)?;
        let (_, _, _, rdlength) = self.read_rr_fixed(self.cursor + owner_len)?;
        let end = self.cursor + owner_len + 10 + rdlength as usize;
        if end > self.octets.len() {
            Err(Error::UnexpectedEomInField)
        } else {
            self.cursor = end;
            Ok(())
        }
    }

    /// Reads the TYPE, CLASS, TTL, and RDLENGTH fields of a record
    /// starting at `start`.
    fn read_rr_fixed(&self, start: usize) -> Result<(u16, u16, u32, u16)> {
        let fixed = self
            .octets
            .get(start..start + 10)
            .ok_or(Error::UnexpectedEomInField)?;
        // The slice is exactly ten octets long, so these cannot fail.
        Ok((
            read_u16(fixed).unwrap_or_default(),
            read_u16(&fixed[2..]).unwrap_or_default(),
            read_u32(&fixed[4..]).unwrap_or_default(),
            read_u16(&fixed[8..]).unwrap_or_default(),
        ))
    }

    /// Returns the message up to (but not including) the cursor. This
    /// is used for TSIG, whose MAC covers everything before the TSIG
    /// record.
    pub fn message_to_cursor(&self) -> &'a [u8] {
        &self.octets[..self.cursor]
    }

    /// Returns whether the `Reader`'s cursor has reached the end of the
    /// message.
    pub fn at_eom(&self) -> bool {
        self.cursor >= self.octets.len()
    }

    fn header_u16(&self, start: usize) -> u16 {
        u16::from_be_bytes([self.octets[start], self.octets[start + 1]])
    }
}

impl<'a> TryFrom<&'a [u8]> for Reader<'a> {
    type Error = Error;

    fn try_from(octets: &'a [u8]) -> Result<Self> {
        if octets.len() >= HEADER_SIZE {
            Ok(Self {
                octets,
                cursor: HEADER_SIZE,
            })
        } else {
            Err(Error::HeaderTooShort)
        }
    }
}

impl fmt::Debug for Reader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Reader")
            .field("id", &self.id())
            .field("qr", &self.qr())
            .field("opcode", &self.opcode())
            .field("aa", &self.aa())
            .field("rcode", &self.rcode())
            .field("qdcount", &self.qdcount())
            .field("ancount", &self.ancount())
            .field("nscount", &self.nscount())
            .field("arcount", &self.arcount())
            .field("cursor", &self.cursor)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a [`Question`] or resource record could not
/// be read.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    HeaderTooShort,
    UnexpectedEomInField,
    InvalidOwner(name::Error),
    InvalidRdata(ReadRdataError),
}

impl From<ReadRdataError> for Error {
    fn from(err: ReadRdataError) -> Self {
        Self::InvalidRdata(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::HeaderTooShort => f.write_str("header too short"),
            Self::UnexpectedEomInField => f.write_str("unexpected end of message in field"),
            Self::InvalidOwner(err) => write!(f, "invalid owner: {err}"),
            Self::InvalidRdata(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

/// The type returned by fallible [`Reader`] methods.
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::super::{Qclass, Qtype};
    use super::*;
    use crate::class::Class;
    use crate::rr::{Ttl, Type};

    /// This is a reply to a query for example.com. IN NS to a recursive
    /// server, made on January 7, 2022.
    const EXAMPLE_COM_NS_MESSAGE: &[u8] =
        b"\xe2\xd7\x81\x80\x00\x01\x00\x02\x00\x00\x00\x01\x07\x65\x78\x61\
          \x6d\x70\x6c\x65\x03\x63\x6f\x6d\x00\x00\x02\x00\x01\xc0\x0c\x00\
          \x02\x00\x01\x00\x01\x50\xa2\x00\x14\x01\x61\x0c\x69\x61\x6e\x61\
          \x2d\x73\x65\x72\x76\x65\x72\x73\x03\x6e\x65\x74\x00\xc0\x0c\x00\
          \x02\x00\x01\x00\x01\x50\xa2\x00\x04\x01\x62\xc0\x2b\x00\x00\x29\
          \x10\x00\x00\x00\x00\x00\x00\x00";

    #[test]
    fn reader_works() {
        let mut reader = Reader::try_from(EXAMPLE_COM_NS_MESSAGE).unwrap();
        let expected_qname: Name = "example.com.".parse().unwrap();
        let expected_ns_a: Name = "a.iana-servers.net.".parse().unwrap();
        let expected_ns_b: Name = "b.iana-servers.net.".parse().unwrap();

        assert_eq!(reader.id(), 0xe2d7);
        assert!(reader.qr());
        assert_eq!(reader.opcode(), Opcode::Query);
        assert!(!reader.aa());
        assert!(!reader.tc());
        assert_eq!(reader.rcode(), Rcode::NoError);
        assert_eq!(reader.qdcount(), 1);
        assert_eq!(reader.ancount(), 2);
        assert_eq!(reader.nscount(), 0);
        assert_eq!(reader.arcount(), 1);

        let question = reader.read_question().unwrap();
        assert_eq!(question.qname, expected_qname);
        assert_eq!(question.qtype, Qtype::from(Type::NS));
        assert_eq!(question.qclass, Qclass::from(Class::IN));

        // The second NS name is compressed against the first, and both
        // come out decompressed.
        let answer_1 = reader.read_rr().unwrap();
        assert_eq!(answer_1.owner, expected_qname);
        assert_eq!(answer_1.rr_type, Type::NS);
        assert_eq!(answer_1.ttl, Ttl::from(86178));
        assert_eq!(answer_1.rdata.as_ref(), expected_ns_a.wire_repr());
        let answer_2 = reader.read_rr().unwrap();
        assert_eq!(answer_2.rdata.as_ref(), expected_ns_b.wire_repr());

        let before_opt = reader.message_to_cursor().len();
        reader.skip_rr().unwrap();
        assert_eq!(before_opt, EXAMPLE_COM_NS_MESSAGE.len() - 11);
        assert!(reader.at_eom());
    }

    #[test]
    fn reads_are_atomic() {
        let truncated = &EXAMPLE_COM_NS_MESSAGE[..40];
        let mut reader = Reader::try_from(truncated).unwrap();
        reader.read_question().unwrap();
        let cursor = reader.message_to_cursor().len();
        assert_eq!(reader.read_rr(), Err(Error::UnexpectedEomInField));
        assert_eq!(reader.message_to_cursor().len(), cursor);
    }

    #[test]
    fn reader_constructor_rejects_short_message() {
        for size in 0..HEADER_SIZE {
            let buf = vec![0; size];
            assert_eq!(Reader::try_from(buf.as_slice()), Err(Error::HeaderTooShort));
        }
    }
}
