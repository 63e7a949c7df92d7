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

//! Implementation of the [`Writer`] type to write on-the-wire DNS
//! messages.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::constants::*;
use super::tsig::{PreparedTsigRr, TsigKey};
use super::{Opcode, Qclass, Question, Rcode};
use crate::name::Name;
use crate::rr::rdata::{self, Component};
use crate::rr::{Record, Type};

////////////////////////////////////////////////////////////////////////
// WRITER                                                             //
////////////////////////////////////////////////////////////////////////

/// Serializes a single DNS message into an owned buffer.
///
/// A `Writer` is constructed with [`Writer::new`], which takes the
/// maximum size of the message. The limit must be long enough to
/// accommodate a full DNS message header of 12 octets, and is capped at
/// [`MAX_MESSAGE_LEN`]. The message header is initially zeroed.
///
/// Since header information is in a fixed position, it can be written
/// at any time through the appropriate `Writer` methods. Questions and
/// resource records are appended with [`Writer::add_question`],
/// [`Writer::add_answer`], [`Writer::add_authority`], and
/// [`Writer::add_additional`]. These must be used in section order;
/// attempts to use them out of order fail with [`Error::OutOfOrder`].
/// Each addition is atomic: if it fails (most commonly with
/// [`Error::Truncation`] because the message is full), the message is
/// left exactly as it was.
///
/// Owner names and the names embedded in RDATA of RFC 1035 types are
/// compressed against earlier names in the same message. Compression
/// state belongs to the `Writer`, so it never spans messages.
///
/// For messages with TSIG authentication, use [`Writer::set_tsig`].
/// Space for a TSIG record will be reserved, and the TSIG record will
/// be automatically added as the last RR when [`Writer::finish`] is
/// called.
pub struct Writer {
    octets: Vec<u8>,
    available: usize,
    section: Section,
    qdcount: u16,
    ancount: u16,
    nscount: u16,
    arcount: u16,
    compression: HashMap<Box<[u8]>, u16>,
    compression_log: Vec<Box<[u8]>>,
    compression_mode: CompressionMode,
    tsig: Option<Tsig>,
}

/// A type for recording which section of a DNS message a [`Writer`] is
/// currently serializing.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
enum Section {
    Question,
    Answer,
    Authority,
    Additional,
}

/// How a [`Writer`] may (when allowed by the DNS standard) compress
/// domain names in a message.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CompressionMode {
    /// Compress names wherever the standard allows.
    Standard,

    /// Never compress names.
    Disabled,
}

/// A type for recording TSIG information for a message until it is
/// serialized in [`Writer::finish`].
#[derive(Clone, Debug)]
struct Tsig {
    mode: TsigMode,
    reserved_len: usize,
    rr: PreparedTsigRr,
}

/// Specifies if and how to sign a message with a TSIG RR.
#[derive(Clone, Debug)]
pub enum TsigMode {
    /// The message should be signed as a request.
    Request { key: Arc<TsigKey> },

    /// The message should be signed as a response (or as the first
    /// message of a multi-message response).
    Response {
        key: Arc<TsigKey>,
        request_mac: Box<[u8]>,
    },

    /// The message should be signed as a subsequent message in a
    /// multi-message response.
    Subsequent {
        key: Arc<TsigKey>,
        prior_mac: Box<[u8]>,
    },

    /// The message should not be signed. The MAC field of the TSIG RR
    /// will be left empty.
    Unsigned { algorithm: Name },
}

impl Writer {
    /// Creates a new `Writer` for a message of at most `limit` octets
    /// (or [`MAX_MESSAGE_LEN`], whichever is smaller). If the limit is
    /// too small to hold a full DNS message header of 12 octets, then
    /// this will fail.
    pub fn new(limit: usize) -> Result<Self> {
        let limit = limit.min(MAX_MESSAGE_LEN);
        if limit < HEADER_SIZE {
            Err(Error::Truncation)
        } else {
            let mut octets = Vec::with_capacity(limit);
            octets.resize(HEADER_SIZE, 0);
            Ok(Self {
                octets,
                available: limit,
                section: Section::Question,
                qdcount: 0,
                ancount: 0,
                nscount: 0,
                arcount: 0,
                compression: HashMap::new(),
                compression_log: Vec::new(),
                compression_mode: CompressionMode::Standard,
                tsig: None,
            })
        }
    }

    /// Sets the name compression mode.
    pub fn set_compression_mode(&mut self, mode: CompressionMode) {
        self.compression_mode = mode;
    }

    /// Returns the 16-bit ID of the message.
    pub fn id(&self) -> u16 {
        u16::from_be_bytes([self.octets[ID_START], self.octets[ID_START + 1]])
    }

    /// Sets the 16-bit ID of the message.
    pub fn set_id(&mut self, id: u16) {
        self.octets[ID_START..ID_END].copy_from_slice(&id.to_be_bytes());
    }

    /// Returns whether the QR (query response) bit is set.
    pub fn qr(&self) -> bool {
        self.octets[FLAGS_HI] & QR_MASK != 0
    }

    /// Sets the QR (query response) bit.
    pub fn set_qr(&mut self, qr: bool) {
        self.set_flag(FLAGS_HI, QR_MASK, qr);
    }

    /// Returns the message's opcode.
    pub fn opcode(&self) -> Opcode {
        Opcode::from_flags(self.octets[FLAGS_HI])
    }

    /// Sets the message's opcode.
    pub fn set_opcode(&mut self, opcode: Opcode) {
        self.octets[FLAGS_HI] = (self.octets[FLAGS_HI] & !OPCODE_MASK)
            | ((u8::from(opcode) << OPCODE_SHIFT) & OPCODE_MASK);
    }

    /// Returns whether the AA (authoritative answer) bit is set.
    pub fn aa(&self) -> bool {
        self.octets[FLAGS_HI] & AA_MASK != 0
    }

    /// Sets the AA (authoritative answer) bit.
    pub fn set_aa(&mut self, aa: bool) {
        self.set_flag(FLAGS_HI, AA_MASK, aa);
    }

    /// Returns the RCODE of the message.
    pub fn rcode(&self) -> Rcode {
        Rcode::try_from(self.octets[FLAGS_LO] & RCODE_MASK).unwrap_or(Rcode::FormErr)
    }

    /// Sets the RCODE of the message.
    pub fn set_rcode(&mut self, rcode: Rcode) {
        self.octets[FLAGS_LO] =
            (self.octets[FLAGS_LO] & !RCODE_MASK) | (u8::from(rcode) & RCODE_MASK);
    }

    fn set_flag(&mut self, index: usize, mask: u8, value: bool) {
        if value {
            self.octets[index] |= mask;
        } else {
            self.octets[index] &= !mask;
        }
    }

    /// Returns the current number of questions in the message.
    pub fn qdcount(&self) -> u16 {
        self.qdcount
    }

    /// Returns the current number of answer RRs in the message.
    pub fn ancount(&self) -> u16 {
        self.ancount
    }

    /// Returns the current number of authority RRs in the message.
    pub fn nscount(&self) -> u16 {
        self.nscount
    }

    /// Returns the current number of additional RRs in the message
    /// (including a reserved TSIG RR).
    pub fn arcount(&self) -> u16 {
        self.arcount
    }

    /// Returns the number of octets written so far (not counting a
    /// reserved TSIG RR).
    pub fn len(&self) -> usize {
        self.octets.len()
    }

    /// Returns whether no questions or records have been written.
    pub fn is_empty(&self) -> bool {
        self.octets.len() == HEADER_SIZE
    }

    /// Adds a question to message. This must be used before any
    /// resource records are added.
    pub fn add_question(&mut self, question: &Question) -> Result<()> {
        if self.section != Section::Question {
            Err(Error::OutOfOrder)
        } else if let Some(new_qdcount) = self.qdcount.checked_add(1) {
            self.with_rollback(|this| {
                this.write_name(&question.qname)?;
                this.try_push_u16(question.qtype.into())?;
                this.try_push_u16(question.qclass.into())
            })?;
            self.qdcount = new_qdcount;
            Ok(())
        } else {
            Err(Error::CountOverflow)
        }
    }

    /// Adds a resource record to the answer section of the message.
    pub fn add_answer(&mut self, record: &Record) -> Result<()> {
        self.add_to_section(Section::Answer, record)?;
        self.ancount += 1;
        Ok(())
    }

    /// Adds a resource record to the authority section of the message.
    pub fn add_authority(&mut self, record: &Record) -> Result<()> {
        self.add_to_section(Section::Authority, record)?;
        self.nscount += 1;
        Ok(())
    }

    /// Adds a resource record to the additional section of the message.
    pub fn add_additional(&mut self, record: &Record) -> Result<()> {
        self.add_to_section(Section::Additional, record)?;
        self.arcount += 1;
        Ok(())
    }

    /// Checks ordering and counters, then writes `record` atomically.
    /// The caller increments the section's counter on success.
    fn add_to_section(&mut self, section: Section, record: &Record) -> Result<()> {
        let count = match section {
            Section::Question => self.qdcount,
            Section::Answer => self.ancount,
            Section::Authority => self.nscount,
            Section::Additional => self.arcount,
        };
        if self.section > section {
            Err(Error::OutOfOrder)
        } else if count == u16::MAX {
            Err(Error::CountOverflow)
        } else {
            self.with_rollback(|this| {
                this.section = section;
                this.add_rr(record)
            })
        }
    }

    /// Writes out an RR at the current cursor. This is for internal
    /// use: the write is not done atomically and may change the cursor
    /// even when an error is returned. This is intended to be used with
    /// [`Writer::with_rollback`].
    fn add_rr(&mut self, record: &Record) -> Result<()> {
        self.write_name(&record.owner)?;
        self.try_push_u16(record.rr_type.into())?;
        self.try_push_u16(record.class.into())?;
        self.try_push_u32(record.ttl.into())?;

        // Save two octets for the RDLENGTH field. We must compute and
        // write this field at the end, since it's affected by
        // compression.
        let rdlength_start = self.octets.len();
        self.try_push_u16(0)?;

        for component in rdata::components(record.rr_type, &record.rdata) {
            match component.or(Err(Error::InvalidRdata))? {
                Component::CompressibleName(name) => self.write_name(&name)?,
                Component::Other(octets) => self.try_push(octets)?,
            }
        }

        let rdlength = self.octets.len() - rdlength_start - 2;
        self.octets[rdlength_start..rdlength_start + 2]
            .copy_from_slice(&(rdlength as u16).to_be_bytes());
        Ok(())
    }

    /// Makes this a TSIG-secured message. This will reserve space at
    /// the end of the message for the TSIG record; if there is
    /// insufficent space, then this will fail. This will also fail if
    /// this is already a TSIG message.
    pub fn set_tsig(&mut self, mode: TsigMode, rr: PreparedTsigRr) -> Result<()> {
        if self.tsig.is_some() {
            return Err(Error::AlreadyTsig);
        }

        let reserved_len = match &mode {
            TsigMode::Request { key }
            | TsigMode::Response { key, .. }
            | TsigMode::Subsequent { key, .. } => rr.signed_len(key.algorithm),
            TsigMode::Unsigned { algorithm } => rr.unsigned_len(algorithm),
        };
        if self.octets.len() + reserved_len > self.available {
            Err(Error::Truncation)
        } else if let Some(new_arcount) = self.arcount.checked_add(1) {
            self.arcount = new_arcount;
            self.available -= reserved_len;
            self.tsig = Some(Tsig {
                mode,
                reserved_len,
                rr,
            });
            Ok(())
        } else {
            Err(Error::CountOverflow)
        }
    }

    /// Finishes writing the message, returning its wire form.
    pub fn finish(self) -> Vec<u8> {
        self.finish_with_mac().0
    }

    /// Finishes writing the message, returning its wire form and its
    /// TSIG MAC (if the message was signed).
    pub fn finish_with_mac(mut self) -> (Vec<u8>, Option<Box<[u8]>>) {
        self.write_u16(QDCOUNT_START, self.qdcount);
        self.write_u16(ANCOUNT_START, self.ancount);
        self.write_u16(NSCOUNT_START, self.nscount);
        self.write_u16(ARCOUNT_START, self.arcount);

        // TSIG *must* be the last record in the message, since it
        // carries a signature for everything that preceded it. The
        // space for it was reserved in Writer::set_tsig.
        let mac = if let Some(tsig) = self.tsig.take() {
            let message = self.octets.as_slice();
            let (rdata, mac) = match &tsig.mode {
                TsigMode::Request { key } => {
                    let (rdata, mac) = tsig.rr.sign_request(message, key);
                    (rdata, Some(mac))
                }
                TsigMode::Response { key, request_mac } => {
                    let (rdata, mac) = tsig.rr.sign_response(message, request_mac, key);
                    (rdata, Some(mac))
                }
                TsigMode::Subsequent { key, prior_mac } => {
                    let (rdata, mac) = tsig.rr.sign_subsequent(message, prior_mac, key);
                    (rdata, Some(mac))
                }
                TsigMode::Unsigned { algorithm } => (tsig.rr.unsigned(algorithm), None),
            };

            // The owner of a TSIG RR is never compressed.
            self.octets.extend_from_slice(tsig.rr.key_name.wire_repr());
            self.octets
                .extend_from_slice(&u16::from(Type::TSIG).to_be_bytes());
            self.octets
                .extend_from_slice(&u16::from(Qclass::ANY).to_be_bytes());
            self.octets.extend_from_slice(&[0; 4]);
            self.octets
                .extend_from_slice(&(rdata.len() as u16).to_be_bytes());
            self.octets.extend_from_slice(&rdata);
            mac
        } else {
            None
        };

        (self.octets, mac)
    }

    /// Executes `f(self)`, returning the result and rolling back the
    /// section, cursor, and compression state to the current values
    /// first if the result is an error.
    fn with_rollback<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let saved_section = self.section;
        let saved_len = self.octets.len();
        let saved_log_len = self.compression_log.len();
        let result = f(self);
        if result.is_err() {
            self.section = saved_section;
            self.octets.truncate(saved_len);
            for suffix in self.compression_log.drain(saved_log_len..) {
                self.compression.remove(&suffix);
            }
        }
        result
    }

    /// Writes a domain name at the current cursor, compressing it
    /// against the longest suffix already present in the message.
    /// Suffixes written in full are remembered for later names.
    fn write_name(&mut self, name: &Name) -> Result<()> {
        if self.compression_mode == CompressionMode::Disabled {
            return self.try_push(name.wire_repr());
        }

        let lowercase = name.to_lowercase();
        let n_literal = name.len() - 1;
        let pointer = (0..n_literal).find_map(|i| {
            self.compression
                .get(lowercase.wire_repr_from(i))
                .map(|pointer| (i, *pointer))
        });
        let n_literal = pointer.map_or(n_literal, |(i, _)| i);

        let wire = name.wire_repr();
        let mut offset = 0;
        for i in 0..n_literal {
            let position = self.octets.len();
            let label_end = offset + wire[offset] as usize + 1;
            self.try_push(&wire[offset..label_end])?;
            if position <= POINTER_MAX {
                let suffix: Box<[u8]> = lowercase.wire_repr_from(i).into();
                self.compression.insert(suffix.clone(), position as u16);
                self.compression_log.push(suffix);
            }
            offset = label_end;
        }

        match pointer {
            Some((_, pointer)) => self.try_push_u16(0xc000 | pointer),
            None => self.try_push(&[0]),
        }
    }

    /// Tries to write `data` at the current cursor, failing if there is
    /// not sufficient space.
    fn try_push(&mut self, data: &[u8]) -> Result<()> {
        if self.available - self.octets.len() >= data.len() {
            self.octets.extend_from_slice(data);
            Ok(())
        } else {
            Err(Error::Truncation)
        }
    }

    /// Tries to write `data` in network byte order, failing if there is
    /// not sufficient space.
    fn try_push_u16(&mut self, data: u16) -> Result<()> {
        self.try_push(&data.to_be_bytes())
    }

    /// Tries to write `data` in network byte order, failing if there is
    /// not sufficient space.
    fn try_push_u32(&mut self, data: u32) -> Result<()> {
        self.try_push(&data.to_be_bytes())
    }

    /// Writes `data` in network byte order at `position`, which must
    /// already be within the message.
    fn write_u16(&mut self, position: usize, data: u16) {
        self.octets[position..position + 2].copy_from_slice(&data.to_be_bytes());
    }
}

impl fmt::Debug for Writer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Writer")
            .field("id", &self.id())
            .field("len", &self.len())
            .field("available", &self.available)
            .field("section", &self.section)
            .field("qdcount", &self.qdcount)
            .field("ancount", &self.ancount)
            .field("nscount", &self.nscount)
            .field("arcount", &self.arcount)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a question or resource record could not be
/// added to a message.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// Adding the question or resource record would overflow the
    /// corresponding 16-bit counter in the DNS header.
    CountOverflow,

    /// There is not enough room left in the message.
    Truncation,

    /// An attempt was made to serialize a question or resource record
    /// in the wrong place in the message (e.g., adding a question after
    /// an answer resource record has already been serialized).
    OutOfOrder,

    /// The record's RDATA is invalid for its type.
    InvalidRdata,

    /// An attempt was made to set up TSIG, but TSIG is already enabled.
    AlreadyTsig,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::CountOverflow => f.write_str("record count would overflow"),
            Self::Truncation => f.write_str("message would be truncated"),
            Self::OutOfOrder => f.write_str("question or record serialized out of order"),
            Self::InvalidRdata => f.write_str("invalid RDATA"),
            Self::AlreadyTsig => f.write_str("already a TSIG message"),
        }
    }
}

impl std::error::Error for Error {}

/// The type returned by fallible [`Writer`] methods.
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::super::tsig::TimeSigned;
    use super::super::{Qtype, Reader};
    use super::*;
    use crate::class::Class;
    use crate::rr::Ttl;

    fn question(qname: &str) -> Question {
        Question {
            qname: qname.parse().unwrap(),
            qtype: Qtype::AXFR,
            qclass: Class::IN.into(),
        }
    }

    fn ns(owner: &str, target: &str) -> Record {
        let target: Name = target.parse().unwrap();
        Record {
            owner: owner.parse().unwrap(),
            rr_type: Type::NS,
            class: Class::IN,
            ttl: Ttl::from(3600),
            rdata: target.wire_repr().into(),
        }
    }

    #[test]
    fn header_flags_work() {
        let mut writer = Writer::new(512).unwrap();
        writer.set_id(0x1234);
        writer.set_qr(true);
        writer.set_opcode(Opcode::Notify);
        writer.set_aa(true);
        writer.set_rcode(Rcode::NotAuth);
        assert_eq!(writer.id(), 0x1234);
        assert!(writer.qr());
        assert!(writer.aa());
        assert_eq!(writer.opcode(), Opcode::Notify);
        assert_eq!(writer.rcode(), Rcode::NotAuth);
        writer.set_aa(false);
        let message = writer.finish();
        let reader = Reader::try_from(message.as_slice()).unwrap();
        assert_eq!(reader.id(), 0x1234);
        assert!(reader.qr());
        assert!(!reader.aa());
        assert_eq!(reader.opcode(), Opcode::Notify);
        assert_eq!(reader.rcode(), Rcode::NotAuth);
    }

    #[test]
    fn names_are_compressed_within_message() {
        let mut writer = Writer::new(512).unwrap();
        writer.add_question(&question("example.")).unwrap();
        writer.add_answer(&ns("example.", "ns.example.")).unwrap();
        let message = writer.finish();

        // Owner: pointer to the QNAME. RDATA: "ns" then a pointer.
        assert_eq!(
            &message[25..],
            b"\xc0\x0c\x00\x02\x00\x01\x00\x00\x0e\x10\x00\x05\x02ns\xc0\x0c"
        );
        let mut reader = Reader::try_from(message.as_slice()).unwrap();
        reader.read_question().unwrap();
        assert_eq!(reader.read_rr().unwrap(), ns("example.", "ns.example."));
    }

    #[test]
    fn failed_additions_roll_back() {
        let mut writer = Writer::new(40).unwrap();
        writer.add_question(&question("example.")).unwrap();
        let len = writer.len();
        assert_eq!(
            writer.add_answer(&ns("www.example.", "ns.other.")),
            Err(Error::Truncation)
        );
        assert_eq!(writer.len(), len);
        assert_eq!(writer.ancount(), 0);
        assert!(!writer.compression.contains_key(&b"\x03www\x07example\x00"[..]));
        assert!(writer.compression.contains_key(&b"\x07example\x00"[..]));
    }

    #[test]
    fn sections_must_be_in_order() {
        let mut writer = Writer::new(512).unwrap();
        writer.add_authority(&ns("example.", "ns.example.")).unwrap();
        assert_eq!(
            writer.add_answer(&ns("example.", "ns.example.")),
            Err(Error::OutOfOrder)
        );
        assert_eq!(
            writer.add_question(&question("example.")),
            Err(Error::OutOfOrder)
        );
        writer.add_additional(&ns("example.", "ns.example.")).unwrap();
        assert_eq!(writer.nscount(), 1);
        assert_eq!(writer.arcount(), 1);
    }

    #[test]
    fn compression_can_be_disabled() {
        let mut writer = Writer::new(512).unwrap();
        writer.set_compression_mode(CompressionMode::Disabled);
        writer.add_question(&question("example.")).unwrap();
        writer.add_answer(&ns("example.", "ns.example.")).unwrap();
        let message = writer.finish();
        assert_eq!(message.len(), 25 + 9 + 10 + 12);
    }

    #[test]
    fn tsig_reservation_limits_space() {
        let key = Arc::new(TsigKey::new(
            "key.".parse().unwrap(),
            crate::message::tsig::Algorithm::HmacSha256,
            b"secret".as_slice(),
        ));
        let rr = PreparedTsigRr::new(key.name.clone(), 0, TimeSigned::from([0; 6]));
        let needed = HEADER_SIZE + rr.signed_len(key.algorithm);
        let mut writer = Writer::new(needed).unwrap();
        writer
            .set_tsig(TsigMode::Request { key: key.clone() }, rr.clone())
            .unwrap();
        assert_eq!(
            writer.add_question(&question("example.")),
            Err(Error::Truncation)
        );
        assert_eq!(
            writer.set_tsig(TsigMode::Request { key }, rr),
            Err(Error::AlreadyTsig)
        );
        let message = writer.finish();
        assert_eq!(message.len(), needed);
    }
}
