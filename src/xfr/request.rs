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

//! Building and parsing of transfer requests.
//!
//! The pull side builds SOA, AXFR, and IXFR queries with
//! [`build_query`]. The push side parses them with [`parse_request`],
//! which checks the request's structure and TSIG signature and either
//! produces a [`TransferRequest`] or a [`Refusal`] to send back.

use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::class::Class;
use crate::message::tsig::{
    find_tsig, Keyring, PreparedTsigRr, ReadTsigRr, TimeSigned, TsigKey, VerificationError,
    DEFAULT_FUDGE,
};
use crate::message::writer::{self, TsigMode, Writer};
use crate::message::{ExtendedRcode, Opcode, Qclass, Qtype, Question, Rcode, Reader, MAX_MESSAGE_LEN};
use crate::name::Name;
use crate::rr::{Record, Soa, Ttl, Type};

////////////////////////////////////////////////////////////////////////
// QUERIES                                                            //
////////////////////////////////////////////////////////////////////////

/// The kinds of query used by zone transfers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QueryKind {
    /// A query for the zone's SOA record.
    Soa,

    /// A full transfer ([RFC 5936]).
    ///
    /// [RFC 5936]: https://datatracker.ietf.org/doc/html/rfc5936
    Axfr,

    /// An incremental transfer from the given serial ([RFC 1995]).
    ///
    /// [RFC 1995]: https://datatracker.ietf.org/doc/html/rfc1995
    Ixfr { serial: u32 },
}

impl QueryKind {
    pub fn qtype(self) -> Qtype {
        match self {
            Self::Soa => Qtype::from(Type::SOA),
            Self::Axfr => Qtype::AXFR,
            Self::Ixfr { .. } => Qtype::IXFR,
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Soa => f.write_str("SOA"),
            Self::Axfr => f.write_str("AXFR"),
            Self::Ixfr { serial } => write!(f, "IXFR from serial {serial}"),
        }
    }
}

/// Builds a query for `zone`. An IXFR query carries an SOA record with
/// the requester's serial in its authority section; the other fields of
/// that SOA are not meaningful, so placeholders are used. If `key` is
/// provided, the query is signed and its MAC is returned as well.
pub fn build_query(
    id: u16,
    zone: &Name,
    class: Class,
    kind: QueryKind,
    key: Option<&Arc<TsigKey>>,
) -> Result<(Vec<u8>, Option<Box<[u8]>>), writer::Error> {
    let mut writer = Writer::new(MAX_MESSAGE_LEN)?;
    writer.set_id(id);
    writer.set_opcode(Opcode::Query);
    if let Some(key) = key {
        let rr = PreparedTsigRr::new(key.name.clone(), id, TimeSigned::now());
        writer.set_tsig(TsigMode::Request { key: key.clone() }, rr)?;
    }
    writer.add_question(&Question {
        qname: zone.clone(),
        qtype: kind.qtype(),
        qclass: Qclass::from(class),
    })?;
    if let QueryKind::Ixfr { serial } = kind {
        let soa = Soa {
            mname: zone.clone(),
            rname: zone.clone(),
            serial,
            refresh: 0,
            retry: 0,
            expire: 0,
            minimum: 0,
        };
        writer.add_authority(&Record::new_soa(zone.clone(), class, Ttl::ZERO, &soa))?;
    }
    Ok(writer.finish_with_mac())
}

////////////////////////////////////////////////////////////////////////
// REQUEST PARSING                                                    //
////////////////////////////////////////////////////////////////////////

/// A well-formed (and, if signed, verified) request.
#[derive(Clone, Debug)]
pub struct TransferRequest {
    pub id: u16,
    pub question: Question,
    pub kind: QueryKind,
    pub tsig: Option<RequestTsig>,
}

impl TransferRequest {
    pub fn class(&self) -> Class {
        Class::from(self.question.qclass)
    }

    /// Builds a refusal of this request, signed if the request was.
    pub fn refuse(&self, rcode: Rcode) -> Refusal {
        let refusal = Refusal::new(self.id, Opcode::Query, Some(self.question.clone()), rcode);
        match &self.tsig {
            Some(tsig) => refusal.signed(tsig.clone()),
            None => refusal,
        }
    }
}

/// The verified TSIG of a request.
#[derive(Clone, Debug)]
pub struct RequestTsig {
    pub key: Arc<TsigKey>,
    pub read: ReadTsigRr,
}

impl RequestTsig {
    /// Returns the request's MAC, which the response continues from.
    pub fn mac(&self) -> &[u8] {
        self.read.mac()
    }
}

/// Why a request could not be accepted.
#[derive(Debug)]
pub enum RequestError {
    /// The message cannot be answered at all (it is too short to have
    /// a header, or it is itself a response). The connection should be
    /// closed.
    Unanswerable,

    /// The request should be refused with a single response message.
    Refused(Refusal),
}

/// Parses a transfer (or SOA) request.
pub fn parse_request(message: &[u8], keyring: &Keyring) -> Result<TransferRequest, RequestError> {
    let mut reader = Reader::try_from(message).or(Err(RequestError::Unanswerable))?;
    if reader.qr() {
        return Err(RequestError::Unanswerable);
    }
    let id = reader.id();
    let opcode = reader.opcode();
    if opcode != Opcode::Query {
        return Err(Refusal::new(id, opcode, None, Rcode::NotImp).into());
    }
    if reader.qdcount() != 1 {
        return Err(Refusal::new(id, opcode, None, Rcode::FormErr).into());
    }
    let question = reader
        .read_question()
        .map_err(|_| Refusal::new(id, opcode, None, Rcode::FormErr))?;
    let formerr = || Refusal::new(id, opcode, Some(question.clone()), Rcode::FormErr);

    // Verify TSIG before trusting anything else in the request.
    let tsig = match find_tsig(message) {
        Ok(Some((up_to_tsig, read))) => {
            let key = match keyring.find(&read) {
                Some(key) => key.clone(),
                None => {
                    debug!("request {} signed with unknown key {}", id, read.key_name());
                    return Err(formerr()
                        .with_rcode(Rcode::NotAuth)
                        .with_tsig_error(read, None, VerificationError::BadKey)
                        .into());
                }
            };
            if let Err(e) = read.verify_request(up_to_tsig, &key, TimeSigned::now()) {
                debug!("request {} failed TSIG verification: {}", id, e);
                let signing_key = (e == VerificationError::BadTime).then(|| key.clone());
                return Err(formerr()
                    .with_rcode(Rcode::NotAuth)
                    .with_tsig_error(read, signing_key, e)
                    .into());
            }
            Some(RequestTsig { key, read })
        }
        Ok(None) => None,
        Err(_) => return Err(formerr().into()),
    };
    let refuse = |rcode| {
        let refusal = Refusal::new(id, opcode, Some(question.clone()), rcode);
        match &tsig {
            Some(tsig) => refusal.signed(tsig.clone()),
            None => refusal,
        }
    };

    let kind = if question.qtype == Qtype::AXFR {
        QueryKind::Axfr
    } else if question.qtype == Qtype::IXFR {
        // The requester's serial is in an SOA record for the zone in
        // the authority section.
        let mut serial = None;
        for _ in 0..reader.ancount() {
            reader.skip_rr().map_err(|_| refuse(Rcode::FormErr))?;
        }
        for _ in 0..reader.nscount() {
            let record = reader.read_rr().map_err(|_| refuse(Rcode::FormErr))?;
            if record.owner == question.qname {
                if let Some(Ok(soa)) = record.soa() {
                    serial = Some(soa.serial);
                }
            }
        }
        match serial {
            Some(serial) => QueryKind::Ixfr { serial },
            None => return Err(refuse(Rcode::FormErr).into()),
        }
    } else if question.qtype == Qtype::from(Type::SOA) {
        QueryKind::Soa
    } else {
        return Err(refuse(Rcode::NotImp).into());
    };

    Ok(TransferRequest {
        id,
        question,
        kind,
        tsig,
    })
}

////////////////////////////////////////////////////////////////////////
// REFUSALS                                                           //
////////////////////////////////////////////////////////////////////////

/// A single-message response refusing a request.
#[derive(Clone, Debug)]
pub struct Refusal {
    pub id: u16,
    pub opcode: Opcode,
    pub question: Option<Question>,
    pub rcode: Rcode,
    tsig: RefusalTsig,
}

/// How a [`Refusal`] is authenticated.
#[derive(Clone, Debug)]
enum RefusalTsig {
    None,

    /// The request's TSIG verified, so the refusal is signed.
    Signed(RequestTsig),

    /// The request's TSIG failed verification; the refusal carries a
    /// TSIG record with the error, signed only for BADTIME
    /// ([RFC 8945 § 5.3.2]).
    ///
    /// [RFC 8945 § 5.3.2]: https://datatracker.ietf.org/doc/html/rfc8945#section-5.3.2
    Error {
        read: ReadTsigRr,
        key: Option<Arc<TsigKey>>,
        error: ExtendedRcode,
    },
}

impl Refusal {
    pub fn new(id: u16, opcode: Opcode, question: Option<Question>, rcode: Rcode) -> Self {
        Self {
            id,
            opcode,
            question,
            rcode,
            tsig: RefusalTsig::None,
        }
    }

    pub fn with_rcode(mut self, rcode: Rcode) -> Self {
        self.rcode = rcode;
        self
    }

    /// Signs the refusal in response to a verified request.
    pub fn signed(mut self, tsig: RequestTsig) -> Self {
        self.tsig = RefusalTsig::Signed(tsig);
        self
    }

    fn with_tsig_error(
        mut self,
        read: ReadTsigRr,
        key: Option<Arc<TsigKey>>,
        error: VerificationError,
    ) -> Self {
        self.tsig = RefusalTsig::Error {
            read,
            key,
            error: error.extended_rcode(),
        };
        self
    }

    /// Serializes the refusal.
    pub fn to_message(&self) -> Result<Vec<u8>, writer::Error> {
        let mut writer = Writer::new(MAX_MESSAGE_LEN)?;
        writer.set_id(self.id);
        writer.set_qr(true);
        writer.set_opcode(self.opcode);
        writer.set_rcode(self.rcode);
        let now = TimeSigned::now();
        match &self.tsig {
            RefusalTsig::None => (),
            RefusalTsig::Signed(tsig) => {
                let rr = PreparedTsigRr::new_from_read(
                    &tsig.read,
                    now,
                    DEFAULT_FUDGE,
                    ExtendedRcode::NOERROR,
                );
                let mode = TsigMode::Response {
                    key: tsig.key.clone(),
                    request_mac: tsig.mac().into(),
                };
                writer.set_tsig(mode, rr)?;
            }
            RefusalTsig::Error { read, key, error } => {
                let rr = PreparedTsigRr::new_from_read(read, now, DEFAULT_FUDGE, *error);
                let mode = match key {
                    Some(key) => TsigMode::Response {
                        key: key.clone(),
                        request_mac: read.mac().into(),
                    },
                    None => TsigMode::Unsigned {
                        algorithm: read.algorithm().clone(),
                    },
                };
                writer.set_tsig(mode, rr)?;
            }
        }
        if let Some(question) = &self.question {
            writer.add_question(question)?;
        }
        Ok(writer.finish())
    }
}

impl From<Refusal> for RequestError {
    fn from(refusal: Refusal) -> Self {
        Self::Refused(refusal)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::tsig::{Algorithm, StreamVerifier};

    fn zone() -> Name {
        "example.".parse().unwrap()
    }

    fn key(name: &str) -> Arc<TsigKey> {
        Arc::new(TsigKey::new(
            name.parse().unwrap(),
            Algorithm::HmacSha256,
            b"a shared secret".to_vec(),
        ))
    }

    fn keyring() -> Keyring {
        let mut keyring = Keyring::new();
        keyring.insert((*key("transfer.key.")).clone());
        keyring
    }

    fn refusal(result: Result<TransferRequest, RequestError>) -> Refusal {
        match result {
            Err(RequestError::Refused(refusal)) => refusal,
            other => panic!("expected a refusal, got {:?}", other),
        }
    }

    #[test]
    fn queries_round_trip() {
        for kind in [QueryKind::Soa, QueryKind::Axfr, QueryKind::Ixfr { serial: 41 }] {
            let (query, mac) = build_query(7, &zone(), Class::IN, kind, None).unwrap();
            assert!(mac.is_none());
            let request = parse_request(&query, &Keyring::new()).unwrap();
            assert_eq!(request.id, 7);
            assert_eq!(request.kind, kind);
            assert_eq!(request.question.qname, zone());
            assert_eq!(request.class(), Class::IN);
            assert!(request.tsig.is_none());
        }
    }

    #[test]
    fn signed_query_verifies() {
        let key = key("transfer.key.");
        let (query, mac) = build_query(9, &zone(), Class::IN, QueryKind::Axfr, Some(&key)).unwrap();
        let request = parse_request(&query, &keyring()).unwrap();
        let tsig = request.tsig.unwrap();
        assert_eq!(tsig.mac(), &*mac.unwrap());
        assert_eq!(tsig.key.name, key.name);
    }

    #[test]
    fn unknown_key_is_refused() {
        let key = key("other.key.");
        let (query, _) = build_query(9, &zone(), Class::IN, QueryKind::Axfr, Some(&key)).unwrap();
        let refusal = refusal(parse_request(&query, &keyring()));
        assert_eq!(refusal.rcode, Rcode::NotAuth);
        let message = refusal.to_message().unwrap();
        let (_, tsig) = find_tsig(&message).unwrap().unwrap();
        assert_eq!(tsig.error(), ExtendedRcode::BADKEY);
        assert!(tsig.mac().is_empty());
    }

    #[test]
    fn corrupted_signature_is_refused() {
        let key = key("transfer.key.");
        let (mut query, _) =
            build_query(9, &zone(), Class::IN, QueryKind::Axfr, Some(&key)).unwrap();
        // Flip a bit of the question's QTYPE; the MAC no longer matches.
        query[12 + 9] ^= 0x01;
        let refusal = refusal(parse_request(&query, &keyring()));
        assert_eq!(refusal.rcode, Rcode::NotAuth);
    }

    #[test]
    fn refusal_to_signed_request_is_signed() {
        let key = key("transfer.key.");
        let (query, mac) = build_query(9, &zone(), Class::IN, QueryKind::Axfr, Some(&key)).unwrap();
        let request = parse_request(&query, &keyring()).unwrap();
        let refusal = Refusal::new(request.id, Opcode::Query, Some(request.question), Rcode::NotAuth)
            .signed(request.tsig.unwrap());
        let message = refusal.to_message().unwrap();
        let mut verifier = StreamVerifier::new(key, &mac.unwrap());
        verifier.verify(&message, TimeSigned::now()).unwrap();
        verifier.finish().unwrap();
    }

    #[test]
    fn ixfr_without_soa_is_formerr() {
        let (query, _) = build_query(3, &zone(), Class::IN, QueryKind::Axfr, None).unwrap();
        let mut query = query;
        // Turn the AXFR into an IXFR with no authority SOA.
        query[12 + 9 + 1] = 251;
        let refusal = refusal(parse_request(&query, &Keyring::new()));
        assert_eq!(refusal.rcode, Rcode::FormErr);
        assert_eq!(refusal.question.unwrap().qtype, Qtype::IXFR);
    }

    #[test]
    fn other_qtypes_are_not_implemented() {
        let (mut query, _) = build_query(3, &zone(), Class::IN, QueryKind::Soa, None).unwrap();
        query[12 + 9 + 1] = 1;
        let refusal = refusal(parse_request(&query, &Keyring::new()));
        assert_eq!(refusal.rcode, Rcode::NotImp);
    }

    #[test]
    fn responses_are_unanswerable() {
        let (mut query, _) = build_query(3, &zone(), Class::IN, QueryKind::Soa, None).unwrap();
        query[2] |= 0x80;
        assert!(matches!(
            parse_request(&query, &Keyring::new()),
            Err(RequestError::Unanswerable)
        ));
        assert!(matches!(
            parse_request(&query[..5], &Keyring::new()),
            Err(RequestError::Unanswerable)
        ));
    }
}
