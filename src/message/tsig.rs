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

//! Implementation of Secret Key Authentication for DNS (TSIG), as
//! specified by [RFC 8945].
//!
//! This module implements verification and signing of messages using
//! the TSIG pseudo-RR, including the multi-message form used by zone
//! transfers.
//!
//! For verification of a single message, read the TSIG RR from a
//! message using a [`Reader`](super::Reader) and convert the returned
//! [`Record`] into a [`ReadTsigRr`] using [`ReadTsigRr::try_from`].
//! Then use the [`ReadTsigRr`] `verify_*` methods. For a whole
//! transfer response stream, use a [`StreamVerifier`], which tracks
//! the running MAC and the unsigned intermediate messages that
//! [RFC 8945 § 5.3.1] permits.
//!
//! For signing, configure a [`PreparedTsigRr`] structure with the
//! appropriate TSIG parameters and hand it to
//! [`Writer::set_tsig`](super::Writer::set_tsig) together with a
//! [`TsigMode`](super::writer::TsigMode). A TSIG RR will then be
//! appended (and if so configured, signed) when the message is
//! finished. A [`StreamSigner`] produces the right mode for each
//! message of a multi-message response.
//!
//! We implement the two algorithms required by RFC 8945, HMAC-SHA1 and
//! HMAC-SHA256.
//!
//! [RFC 8945]: https://datatracker.ietf.org/doc/html/rfc8945
//! [RFC 8945 § 5.3.1]: https://datatracker.ietf.org/doc/html/rfc8945#section-5.3.1

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;

use hmac::digest::{MacError, OutputSizeUser};
use hmac::{Hmac, Mac};
use lazy_static::lazy_static;
use sha1::Sha1;
use sha2::Sha256;

use crate::class::Class;
use crate::name::Name;
use crate::rr::{Record, Type};
use crate::util::{read_u16, Caseless};

use super::constants::*;
use super::writer::TsigMode;
use super::{ExtendedRcode, Qclass, Reader};

/// The fudge value recommended by [RFC 8945 § 10].
///
/// [RFC 8945 § 10]: https://datatracker.ietf.org/doc/html/rfc8945#section-10
pub const DEFAULT_FUDGE: u16 = 300;

/// The maximum number of consecutive unsigned messages that may appear
/// in a multi-message response ([RFC 8945 § 5.3.1]).
///
/// [RFC 8945 § 5.3.1]: https://datatracker.ietf.org/doc/html/rfc8945#section-5.3.1
pub const MAX_UNSIGNED_MESSAGES: usize = 99;

////////////////////////////////////////////////////////////////////////
// TSIG ALGORITHMS                                                    //
////////////////////////////////////////////////////////////////////////

lazy_static! {
    static ref HMAC_SHA1_NAME: Name = "hmac-sha1.".parse().unwrap();
    static ref HMAC_SHA256_NAME: Name = "hmac-sha256.".parse().unwrap();
    static ref ALGORITHMS_BY_NAME: HashMap<&'static Name, Algorithm> = HashMap::from([
        (&*HMAC_SHA1_NAME, Algorithm::HmacSha1),
        (&*HMAC_SHA256_NAME, Algorithm::HmacSha256),
    ]);
}

/// A supported TSIG algorithm.
///
/// We currently implement the two algorithms required by
/// [RFC 8945 § 6]: HMAC-SHA1 and HMAC-SHA256.
///
/// [RFC 8945 § 6]: https://datatracker.ietf.org/doc/html/rfc8945#section-6
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Algorithm {
    HmacSha1,
    HmacSha256,
}

impl Algorithm {
    /// Returns the name assigned (by [RFC 8945 § 6]) to identify this
    /// algorithm. The name is in lowercase.
    ///
    /// [RFC 8945 § 6]: https://datatracker.ietf.org/doc/html/rfc8945#section-6
    pub fn name(&self) -> &'static Name {
        match self {
            Self::HmacSha1 => &HMAC_SHA1_NAME,
            Self::HmacSha256 => &HMAC_SHA256_NAME,
        }
    }

    /// Returns the size of the MAC produced by this algorithm.
    pub fn output_size(&self) -> usize {
        match self {
            Self::HmacSha1 => Hmac::<Sha1>::output_size(),
            Self::HmacSha256 => Hmac::<Sha256>::output_size(),
        }
    }

    /// Finds an algorithm by its name (as assigned by [RFC 8945 § 6]).
    /// This returns `None` if the algorithm is not defined or not
    /// supported by this implementation.
    ///
    /// [RFC 8945 § 6]: https://datatracker.ietf.org/doc/html/rfc8945#section-6
    pub fn from_name(name: &Name) -> Option<Self> {
        ALGORITHMS_BY_NAME.get(name).copied()
    }

    /// Creates a MAC authenticator to compute a MAC with this algorithm
    /// and the given key.
    fn make_authenticator(&self, key: &[u8]) -> Box<dyn Authenticator> {
        // HMAC accepts keys of any length.
        match self {
            Algorithm::HmacSha1 => Box::new(Hmac::<Sha1>::new_from_slice(key).unwrap()),
            Algorithm::HmacSha256 => Box::new(Hmac::<Sha256>::new_from_slice(key).unwrap()),
        }
    }
}

impl FromStr for Algorithm {
    type Err = &'static str;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.strip_suffix('.').unwrap_or(text);
        let caseless = Caseless(text);
        if caseless == Caseless("hmac-sha1") {
            Ok(Self::HmacSha1)
        } else if caseless == Caseless("hmac-sha256") {
            Ok(Self::HmacSha256)
        } else {
            Err("unsupported TSIG algorithm")
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::HmacSha1 => f.write_str("hmac-sha1"),
            Self::HmacSha256 => f.write_str("hmac-sha256"),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// KEYS                                                               //
////////////////////////////////////////////////////////////////////////

/// A TSIG key: a name, an algorithm, and a shared secret.
#[derive(Clone, Eq, PartialEq)]
pub struct TsigKey {
    pub name: Name,
    pub algorithm: Algorithm,
    pub secret: Box<[u8]>,
}

impl TsigKey {
    pub fn new(name: Name, algorithm: Algorithm, secret: impl Into<Box<[u8]>>) -> Self {
        Self {
            name: name.to_lowercase(),
            algorithm,
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for TsigKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // The secret is deliberately left out.
        f.debug_struct("TsigKey")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// A set of TSIG keys indexed by key name.
#[derive(Clone, Debug, Default)]
pub struct Keyring {
    keys: HashMap<Name, Arc<TsigKey>>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key, replacing any key with the same name.
    pub fn insert(&mut self, key: TsigKey) {
        self.keys.insert(key.name.clone(), Arc::new(key));
    }

    /// Finds the key to verify a [`ReadTsigRr`]. Per [RFC 8945 § 5.2.1],
    /// both the key name and the algorithm must match.
    ///
    /// [RFC 8945 § 5.2.1]: https://datatracker.ietf.org/doc/html/rfc8945#section-5.2.1
    pub fn find(&self, tsig: &ReadTsigRr) -> Option<&Arc<TsigKey>> {
        self.keys
            .get(tsig.key_name())
            .filter(|key| Algorithm::from_name(tsig.algorithm()) == Some(key.algorithm))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////
// TIME SIGNED                                                        //
////////////////////////////////////////////////////////////////////////

/// The "time signed" field of a TSIG RR: Unix time as an unsigned
/// 48-bit integer.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct TimeSigned([u8; 6]);

impl TimeSigned {
    /// Converts Unix time expressed as a [`u64`] into a `TimeSigned`.
    /// This fails if the conversion would truncate the time.
    pub fn try_from_unix_time(seconds: u64) -> Result<Self, UnrepresentableTimeError> {
        let octets = seconds.to_be_bytes();
        if octets[0] != 0 || octets[1] != 0 {
            Err(UnrepresentableTimeError)
        } else {
            let mut array = [0; 6];
            array.copy_from_slice(&octets[2..8]);
            Ok(Self(array))
        }
    }

    /// Returns the current time. A system clock set before the Unix
    /// epoch reads as the epoch itself.
    pub fn now() -> Self {
        Self::try_from(SystemTime::now()).unwrap_or(Self([0; 6]))
    }

    /// Converts a `TimeSigned` into Unix time expressed as a [`u64`].
    pub fn to_unix_time(self) -> u64 {
        let mut octets = [0; 8];
        octets[2..8].copy_from_slice(self.0.as_slice());
        u64::from_be_bytes(octets)
    }

    /// Borrows the internal representation (an unsigned 48-bit
    /// big-endian integer) as a slice.
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl From<[u8; 6]> for TimeSigned {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl TryFrom<SystemTime> for TimeSigned {
    type Error = UnrepresentableTimeError;

    fn try_from(system_time: SystemTime) -> Result<Self, Self::Error> {
        if let Ok(since_epoch) = system_time.duration_since(SystemTime::UNIX_EPOCH) {
            Self::try_from_unix_time(since_epoch.as_secs())
        } else {
            Err(UnrepresentableTimeError)
        }
    }
}

impl fmt::Debug for TimeSigned {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_unix_time())
    }
}

/// An error signaling that a time cannot be represented as a
/// [`TimeSigned`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct UnrepresentableTimeError;

impl fmt::Display for UnrepresentableTimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("time is not representable in a TSIG RR")
    }
}

impl std::error::Error for UnrepresentableTimeError {}

////////////////////////////////////////////////////////////////////////
// TSIG SIGNING AND VERIFICATION HELPERS                              //
////////////////////////////////////////////////////////////////////////

/// An abstraction over different MAC implementations. Basically, this
/// wraps the `digest` crate's [`Mac`] trait to give us an object-safe
/// trait (so that we can use `Box<dyn Authenticator>`).
trait Authenticator {
    fn update(&mut self, data: &[u8]);
    fn finalize(self: Box<Self>) -> Box<[u8]>;
    fn verify_truncated_left(self: Box<Self>, tag: &[u8]) -> Result<(), MacError>;
}

impl<M> Authenticator for M
where
    M: Mac,
{
    fn update(&mut self, data: &[u8]) {
        <Self as Mac>::update(self, data);
    }

    fn finalize(self: Box<Self>) -> Box<[u8]> {
        <Self as Mac>::finalize(*self)
            .into_bytes()
            .to_vec()
            .into_boxed_slice()
    }

    fn verify_truncated_left(self: Box<Self>, tag: &[u8]) -> Result<(), MacError> {
        <Self as Mac>::verify_truncated_left(*self, tag)
    }
}

/// An abstraction over data structures that provide the TSIG variables
/// that, per [RFC 8945 § 4.3.3], must be added to the MAC. This allows
/// us to use the same helper functions for verifying and signing.
///
/// [RFC 8945 § 4.3.3]: https://datatracker.ietf.org/doc/html/rfc8945#section-4.3.3
trait Variables {
    fn key_name(&self) -> &Name;
    fn algorithm(&self) -> &Name;
    fn time_signed(&self) -> TimeSigned;
    fn fudge(&self) -> u16;
    fn error(&self) -> ExtendedRcode;
    fn other(&self) -> &[u8];
}

/// Adds the given message to a MAC, decrementing the ARCOUNT and
/// restoring the original message ID first (in accordance with
/// [RFC 8945 § 4.3.2]). The message must include a full header.
///
/// [RFC 8945 § 4.3.2]: https://datatracker.ietf.org/doc/html/rfc8945#section-4.3.2
fn add_modified_message(authenticator: &mut dyn Authenticator, message: &[u8], original_id: u16) {
    authenticator.update(&original_id.to_be_bytes());
    authenticator.update(&message[ID_END..ARCOUNT_START]);
    let arcount = u16::from_be_bytes([message[ARCOUNT_START], message[ARCOUNT_START + 1]]);
    authenticator.update(&arcount.saturating_sub(1).to_be_bytes());
    authenticator.update(&message[ARCOUNT_END..]);
}

/// Adds a prior MAC (the request MAC or the MAC of the previous signed
/// message) to a MAC, prefixed by its length.
fn add_prior_mac(authenticator: &mut dyn Authenticator, prior_mac: &[u8]) {
    authenticator.update(&(prior_mac.len() as u16).to_be_bytes());
    authenticator.update(prior_mac);
}

/// Adds the TSIG variables specified by [RFC 8945 § 4.3.3] to a MAC.
///
/// [RFC 8945 § 4.3.3]: https://datatracker.ietf.org/doc/html/rfc8945#section-4.3.3
fn add_tsig_variables<V>(authenticator: &mut dyn Authenticator, vars: &V)
where
    V: Variables,
{
    authenticator.update(vars.key_name().wire_repr());
    authenticator.update(b"\x00\xff\x00\x00\x00\x00");
    authenticator.update(vars.algorithm().wire_repr());
    add_tsig_timers(authenticator, vars);
    authenticator.update(&u16::from(vars.error()).to_be_bytes());
    let other = vars.other();
    authenticator.update(&(other.len() as u16).to_be_bytes());
    authenticator.update(other);
}

/// Adds the TSIG timers specified by [RFC 8945 § 4.3.3.1] to a MAC.
/// Subsequent messages of a multi-message response cover only these.
///
/// [RFC 8945 § 4.3.3.1]: https://datatracker.ietf.org/doc/html/rfc8945#section-4.3.3.1
fn add_tsig_timers<V>(authenticator: &mut dyn Authenticator, vars: &V)
where
    V: Variables,
{
    authenticator.update(vars.time_signed().as_slice());
    authenticator.update(&vars.fudge().to_be_bytes());
}

////////////////////////////////////////////////////////////////////////
// TSIG READING/VERIFICATION                                          //
////////////////////////////////////////////////////////////////////////

/// A TSIG RR that has been read from a message.
///
/// A `ReadTsigRr` is produced by converting a [`Record`] obtained from
/// a [`Reader`](super::Reader) with [`ReadTsigRr::try_from`], which
/// validates the RDATA layout. Names are stored in lowercase, which is
/// the form in which they enter the MAC.
#[derive(Clone, Debug)]
pub struct ReadTsigRr {
    key_name: Name,
    algorithm: Name,
    time_signed: TimeSigned,
    fudge: u16,
    mac: Box<[u8]>,
    original_id: u16,
    error: ExtendedRcode,
    other: Box<[u8]>,
}

impl TryFrom<&Record> for ReadTsigRr {
    type Error = FromRecordError;

    fn try_from(rr: &Record) -> Result<Self, Self::Error> {
        if rr.rr_type != Type::TSIG {
            return Err(FromRecordError::NotTsig);
        } else if rr.class != Class::from(Qclass::ANY) || rr.ttl.as_secs() != 0 {
            return Err(FromRecordError::FormErr);
        }

        let rdata = &rr.rdata[..];
        let field = |start: usize, len: usize| {
            rdata
                .get(start..start + len)
                .ok_or(FromRecordError::FormErr)
        };
        let (algorithm, algo_len) =
            Name::try_from_uncompressed(rdata).or(Err(FromRecordError::FormErr))?;
        let mut time_signed = [0; 6];
        time_signed.copy_from_slice(field(algo_len, 6)?);
        let fudge = read_u16(field(algo_len + 6, 2)?).unwrap_or_default();
        let mac_size = read_u16(field(algo_len + 8, 2)?).unwrap_or_default() as usize;
        let mac = field(algo_len + 10, mac_size)?;
        let after_mac = algo_len + 10 + mac_size;
        let original_id = read_u16(field(after_mac, 2)?).unwrap_or_default();
        let error = read_u16(field(after_mac + 2, 2)?).unwrap_or_default();
        let other_len = read_u16(field(after_mac + 4, 2)?).unwrap_or_default() as usize;
        let other = field(after_mac + 6, other_len)?;
        if after_mac + 6 + other_len != rdata.len() {
            return Err(FromRecordError::FormErr);
        }

        Ok(Self {
            key_name: rr.owner.to_lowercase(),
            algorithm: algorithm.to_lowercase(),
            time_signed: time_signed.into(),
            fudge,
            mac: mac.into(),
            original_id,
            error: error.into(),
            other: other.into(),
        })
    }
}

impl ReadTsigRr {
    /// Returns the key name specified by the TSIG RR.
    pub fn key_name(&self) -> &Name {
        &self.key_name
    }

    /// Returns the algorithm name specified by the TSIG RR.
    pub fn algorithm(&self) -> &Name {
        &self.algorithm
    }

    /// Returns the time at which the TSIG RR was signed.
    pub fn time_signed(&self) -> TimeSigned {
        self.time_signed
    }

    /// Returns the fudge field (in seconds) of the TSIG RR.
    pub fn fudge(&self) -> u16 {
        self.fudge
    }

    /// Returns the MAC of the TSIG RR.
    pub fn mac(&self) -> &[u8] {
        &self.mac
    }

    /// Returns the original message ID of the TSIG RR.
    pub fn original_id(&self) -> u16 {
        self.original_id
    }

    /// Returns the error field of the TSIG RR.
    pub fn error(&self) -> ExtendedRcode {
        self.error
    }

    /// Returns the "other data" field of the TSIG RR.
    pub fn other(&self) -> &[u8] {
        &self.other
    }

    /// Verifies the given request message.
    ///
    /// The passed buffer should be the message up to (but not
    /// including) the TSIG RR. It is not required to decrement the
    /// message ARCOUNT or to reset its message ID to the original ID in
    /// the TSIG RR; this method does this for you.
    pub fn verify_request(
        &self,
        message: &[u8],
        key: &TsigKey,
        now: TimeSigned,
    ) -> Result<(), VerificationError> {
        let add_data_to_mac = |authenticator: &mut dyn Authenticator| {
            add_modified_message(authenticator, message, self.original_id);
            add_tsig_variables(authenticator, self);
        };
        self.verification_core(add_data_to_mac, key, now)
    }

    /// Verifies the first message of a response to a request whose MAC
    /// was `request_mac`.
    ///
    /// The passed buffer should be the message up to (but not
    /// including) the TSIG RR.
    pub fn verify_response(
        &self,
        message: &[u8],
        request_mac: &[u8],
        key: &TsigKey,
        now: TimeSigned,
    ) -> Result<(), VerificationError> {
        let add_data_to_mac = |authenticator: &mut dyn Authenticator| {
            add_prior_mac(authenticator, request_mac);
            add_modified_message(authenticator, message, self.original_id);
            add_tsig_variables(authenticator, self);
        };
        self.verification_core(add_data_to_mac, key, now)
    }

    /// Verifies a subsequent message of a multi-message response
    /// ([RFC 8945 § 5.3.1]).
    ///
    /// `prior_mac` is the MAC of the previous signed message, and
    /// `unsigned` holds the full wire form of every unsigned message
    /// received since then. The passed buffer should be this message up
    /// to (but not including) the TSIG RR.
    ///
    /// [RFC 8945 § 5.3.1]: https://datatracker.ietf.org/doc/html/rfc8945#section-5.3.1
    pub fn verify_subsequent(
        &self,
        message: &[u8],
        prior_mac: &[u8],
        unsigned: &[Box<[u8]>],
        key: &TsigKey,
        now: TimeSigned,
    ) -> Result<(), VerificationError> {
        let add_data_to_mac = |authenticator: &mut dyn Authenticator| {
            add_prior_mac(authenticator, prior_mac);
            for intermediate in unsigned {
                authenticator.update(intermediate);
            }
            add_modified_message(authenticator, message, self.original_id);
            add_tsig_timers(authenticator, self);
        };
        self.verification_core(add_data_to_mac, key, now)
    }

    /// The internal core implementation of TSIG message verification.
    fn verification_core<F>(
        &self,
        add_data_to_mac: F,
        key: &TsigKey,
        now: TimeSigned,
    ) -> Result<(), VerificationError>
    where
        F: FnOnce(&mut dyn Authenticator),
    {
        if self.key_name != key.name || &self.algorithm != key.algorithm.name() {
            return Err(VerificationError::BadKey);
        }

        // Ensure that any MAC truncation applied meets RFC 8945
        // § 5.2.2.1's minimum requirements.
        check_mac_size(key.algorithm, self.mac.len())?;

        // RFC 8945 § 5.2.2: verify the MAC.
        let mut authenticator = key.algorithm.make_authenticator(&key.secret);
        add_data_to_mac(authenticator.as_mut());
        authenticator
            .verify_truncated_left(&self.mac)
            .or(Err(VerificationError::BadSig))?;

        // RFC 8945 § 5.2.3: ensure that the time signed is close enough
        // to the local time.
        check_time(self.time_signed, self.fudge, now)
    }
}

/// Ensures that the MAC size is acceptable, per [RFC 8945 § 5.2.2.1].
///
/// [RFC 8945 § 5.2.2.1]: https://datatracker.ietf.org/doc/html/rfc8945#section-5.2.2.1
fn check_mac_size(algorithm: Algorithm, mac_size: usize) -> Result<(), VerificationError> {
    let half_output_size = (algorithm.output_size() + 1) / 2;
    if mac_size > algorithm.output_size() || mac_size < 10.max(half_output_size) {
        Err(VerificationError::FormErr)
    } else {
        Ok(())
    }
}

/// Checks that `time_signed` does not deviate more than `fudge` seconds
/// from the "current" time (specified by `now`).
fn check_time(
    time_signed: TimeSigned,
    fudge: u16,
    now: TimeSigned,
) -> Result<(), VerificationError> {
    let time_signed_unix = time_signed.to_unix_time();
    let now_unix = now.to_unix_time();
    let time_window_start = time_signed_unix.saturating_sub(fudge as u64);
    let time_window_end = time_signed_unix.saturating_add(fudge as u64);

    if now_unix >= time_window_start && now_unix <= time_window_end {
        Ok(())
    } else {
        Err(VerificationError::BadTime)
    }
}

impl Variables for ReadTsigRr {
    fn key_name(&self) -> &Name {
        &self.key_name
    }

    fn algorithm(&self) -> &Name {
        &self.algorithm
    }

    fn time_signed(&self) -> TimeSigned {
        self.time_signed
    }

    fn fudge(&self) -> u16 {
        self.fudge
    }

    fn error(&self) -> ExtendedRcode {
        self.error
    }

    fn other(&self) -> &[u8] {
        &self.other
    }
}

////////////////////////////////////////////////////////////////////////
// TSIG WRITING/SIGNING                                               //
////////////////////////////////////////////////////////////////////////

/// A TSIG RR that has been prepared for serialization.
///
/// This structure specifies TSIG fields other than the signing
/// algorithm and MAC. (Note that [`PreparedTsigRr::server_time`] is
/// ignored unless the error is [`ExtendedRcode::BADTIME`].)
#[derive(Debug, Clone)]
pub struct PreparedTsigRr {
    pub key_name: Name,
    pub time_signed: TimeSigned,
    pub fudge: u16,
    pub original_id: u16,
    pub error: ExtendedRcode,
    pub server_time: TimeSigned,
}

impl PreparedTsigRr {
    /// Creates a `PreparedTsigRr` with no error for a new message.
    pub fn new(key_name: Name, original_id: u16, time_signed: TimeSigned) -> Self {
        Self {
            key_name: key_name.to_lowercase(),
            time_signed,
            fudge: DEFAULT_FUDGE,
            original_id,
            error: ExtendedRcode::NOERROR,
            server_time: time_signed,
        }
    }

    /// Creates a `PreparedTsigRr` for a response by combining fields
    /// from the [`ReadTsigRr`] of the request and the provided
    /// arguments.
    ///
    /// If the error is [`ExtendedRcode::BADTIME`], then per
    /// [RFC 8945 § 5.2.3], the time signed field is taken from the
    /// request and the `time_signed` argument is placed in the
    /// `server_time` field.
    ///
    /// [RFC 8945 § 5.2.3]: https://datatracker.ietf.org/doc/html/rfc8945#section-5.2.3
    pub fn new_from_read(
        read: &ReadTsigRr,
        time_signed: TimeSigned,
        fudge: u16,
        error: ExtendedRcode,
    ) -> Self {
        let (time_signed, server_time) = if error == ExtendedRcode::BADTIME {
            (read.time_signed(), time_signed)
        } else {
            (time_signed, time_signed)
        };
        Self {
            key_name: read.key_name.clone(),
            time_signed,
            fudge,
            original_id: read.original_id(),
            error,
            server_time,
        }
    }

    /// Returns the maximum length of the TSIG RR (i.e., assuming that
    /// the owner name is not compressed) if it contains the provided
    /// algorithm name and is left unsigned.
    pub fn unsigned_len(&self, algorithm: &Name) -> usize {
        let mut len = self.key_name.wire_repr().len() + algorithm.wire_repr().len() + 26;
        if self.error == ExtendedRcode::BADTIME {
            len += 6;
        }
        len
    }

    /// Returns the maximum length of the TSIG RR if it is signed with
    /// the given algorithm.
    pub fn signed_len(&self, algorithm: Algorithm) -> usize {
        self.unsigned_len(algorithm.name()) + algorithm.output_size()
    }

    /// Signs the given request message, returning the TSIG RDATA and
    /// the computed MAC.
    ///
    /// The passed buffer should be the message up to (but not
    /// including) the TSIG RR, with its ID and ARCOUNT already set to
    /// their final values (the latter including the TSIG RR).
    pub fn sign_request(&self, message: &[u8], key: &TsigKey) -> (Box<[u8]>, Box<[u8]>) {
        let algorithm = key.algorithm;
        let mut authenticator = algorithm.make_authenticator(&key.secret);
        add_modified_message(authenticator.as_mut(), message, self.original_id);
        add_tsig_variables(authenticator.as_mut(), &(algorithm.name(), self));
        let mac = authenticator.finalize();
        (self.serialize_rdata(algorithm.name(), &mac), mac)
    }

    /// Signs the first message of a response to a request whose MAC was
    /// `request_mac`.
    pub fn sign_response(
        &self,
        message: &[u8],
        request_mac: &[u8],
        key: &TsigKey,
    ) -> (Box<[u8]>, Box<[u8]>) {
        let algorithm = key.algorithm;
        let mut authenticator = algorithm.make_authenticator(&key.secret);
        add_prior_mac(authenticator.as_mut(), request_mac);
        add_modified_message(authenticator.as_mut(), message, self.original_id);
        add_tsig_variables(authenticator.as_mut(), &(algorithm.name(), self));
        let mac = authenticator.finalize();
        (self.serialize_rdata(algorithm.name(), &mac), mac)
    }

    /// Signs a subsequent message of a multi-message response, given
    /// the MAC of the previous message. We sign every message, so there
    /// are never unsigned intermediate messages to cover.
    pub fn sign_subsequent(
        &self,
        message: &[u8],
        prior_mac: &[u8],
        key: &TsigKey,
    ) -> (Box<[u8]>, Box<[u8]>) {
        let algorithm = key.algorithm;
        let mut authenticator = algorithm.make_authenticator(&key.secret);
        add_prior_mac(authenticator.as_mut(), prior_mac);
        add_modified_message(authenticator.as_mut(), message, self.original_id);
        add_tsig_timers(authenticator.as_mut(), &(algorithm.name(), self));
        let mac = authenticator.finalize();
        (self.serialize_rdata(algorithm.name(), &mac), mac)
    }

    /// Serializes TSIG RDATA using the provided algorithm name and
    /// leaving the record unsigned (i.e., with a zero-length MAC).
    pub fn unsigned(&self, algorithm: &Name) -> Box<[u8]> {
        self.serialize_rdata(algorithm, &[])
    }

    /// An internal helper to serialize TSIG RDATA.
    fn serialize_rdata(&self, algorithm: &Name, mac: &[u8]) -> Box<[u8]> {
        let other = self.other();
        let mut rdata = Vec::with_capacity(algorithm.wire_repr().len() + 16 + mac.len());
        rdata.extend_from_slice(algorithm.wire_repr());
        rdata.extend_from_slice(self.time_signed.as_slice());
        rdata.extend_from_slice(&self.fudge.to_be_bytes());
        rdata.extend_from_slice(&(mac.len() as u16).to_be_bytes());
        rdata.extend_from_slice(mac);
        rdata.extend_from_slice(&self.original_id.to_be_bytes());
        rdata.extend_from_slice(&u16::from(self.error).to_be_bytes());
        rdata.extend_from_slice(&(other.len() as u16).to_be_bytes());
        rdata.extend_from_slice(other);
        rdata.into_boxed_slice()
    }

    /// Returns the "other data" field to serialize.
    fn other(&self) -> &[u8] {
        if self.error == ExtendedRcode::BADTIME {
            self.server_time.as_slice()
        } else {
            &[]
        }
    }
}

impl Variables for (&Name, &PreparedTsigRr) {
    fn key_name(&self) -> &Name {
        &self.1.key_name
    }

    fn algorithm(&self) -> &Name {
        self.0
    }

    fn time_signed(&self) -> TimeSigned {
        self.1.time_signed
    }

    fn fudge(&self) -> u16 {
        self.1.fudge
    }

    fn error(&self) -> ExtendedRcode {
        self.1.error
    }

    fn other(&self) -> &[u8] {
        self.1.other()
    }
}

////////////////////////////////////////////////////////////////////////
// MULTI-MESSAGE STREAMS                                              //
////////////////////////////////////////////////////////////////////////

/// Produces TSIG parameters for each message of a multi-message
/// response. Every message is signed: the first as a response to the
/// request, the rest as continuations of the previous message.
#[derive(Clone, Debug)]
pub struct StreamSigner {
    key: Arc<TsigKey>,
    original_id: u16,
    prior_mac: Box<[u8]>,
    first: bool,
}

impl StreamSigner {
    pub fn new(key: Arc<TsigKey>, original_id: u16, request_mac: &[u8]) -> Self {
        Self {
            key,
            original_id,
            prior_mac: request_mac.into(),
            first: true,
        }
    }

    /// Returns the [`TsigMode`] and [`PreparedTsigRr`] with which to
    /// sign the next message.
    pub fn next_message(&self, now: TimeSigned) -> (TsigMode, PreparedTsigRr) {
        let mode = if self.first {
            TsigMode::Response {
                key: self.key.clone(),
                request_mac: self.prior_mac.clone(),
            }
        } else {
            TsigMode::Subsequent {
                key: self.key.clone(),
                prior_mac: self.prior_mac.clone(),
            }
        };
        let rr = PreparedTsigRr::new(self.key.name.clone(), self.original_id, now);
        (mode, rr)
    }

    /// Records the MAC of a message just signed, which the next message
    /// continues from.
    pub fn signed(&mut self, mac: Box<[u8]>) {
        self.prior_mac = mac;
        self.first = false;
    }
}

/// Verifies the messages of a multi-message response in order.
///
/// The first message must be signed. Later messages may be unsigned,
/// but no more than [`MAX_UNSIGNED_MESSAGES`] in a row, and the stream
/// is only complete if its final message was signed
/// ([`StreamVerifier::finish`]).
#[derive(Debug)]
pub struct StreamVerifier {
    key: Arc<TsigKey>,
    prior_mac: Box<[u8]>,
    unsigned: Vec<Box<[u8]>>,
    n_verified: usize,
}

impl StreamVerifier {
    pub fn new(key: Arc<TsigKey>, request_mac: &[u8]) -> Self {
        Self {
            key,
            prior_mac: request_mac.into(),
            unsigned: Vec::new(),
            n_verified: 0,
        }
    }

    /// Verifies the next message of the stream. The message must have
    /// passed header validation (it is at least a full header long).
    pub fn verify(&mut self, message: &[u8], now: TimeSigned) -> Result<(), StreamError> {
        match find_tsig(message)? {
            Some((up_to_tsig, tsig)) => {
                if tsig.error() != ExtendedRcode::NOERROR {
                    return Err(StreamError::PeerError(tsig.error()));
                }
                let result = if self.n_verified == 0 {
                    tsig.verify_response(up_to_tsig, &self.prior_mac, &self.key, now)
                } else {
                    tsig.verify_subsequent(
                        up_to_tsig,
                        &self.prior_mac,
                        &self.unsigned,
                        &self.key,
                        now,
                    )
                };
                result.map_err(StreamError::Verification)?;
                self.prior_mac = tsig.mac;
                self.unsigned.clear();
                self.n_verified += 1;
                Ok(())
            }
            None if self.n_verified == 0 => Err(StreamError::FirstUnsigned),
            None if self.unsigned.len() >= MAX_UNSIGNED_MESSAGES => {
                Err(StreamError::TooManyUnsigned)
            }
            None => {
                self.unsigned.push(message.into());
                Ok(())
            }
        }
    }

    /// Checks that the last message of the stream was signed.
    pub fn finish(&self) -> Result<(), StreamError> {
        if self.n_verified == 0 {
            Err(StreamError::FirstUnsigned)
        } else if !self.unsigned.is_empty() {
            Err(StreamError::LastUnsigned)
        } else {
            Ok(())
        }
    }
}

/// Locates the TSIG RR of a message, if it has one. On success, the
/// message up to the TSIG RR is returned along with the parsed RR.
pub fn find_tsig(message: &[u8]) -> Result<Option<(&[u8], ReadTsigRr)>, StreamError> {
    let mut reader = Reader::try_from(message).or(Err(StreamError::Malformed))?;
    if reader.arcount() == 0 {
        return Ok(None);
    }
    for _ in 0..reader.qdcount() {
        reader.read_question().or(Err(StreamError::Malformed))?;
    }
    let n_before_last =
        reader.ancount() as usize + reader.nscount() as usize + reader.arcount() as usize - 1;
    for _ in 0..n_before_last {
        reader.skip_rr().or(Err(StreamError::Malformed))?;
    }
    let up_to_tsig = reader.message_to_cursor();
    let last = reader.read_rr().or(Err(StreamError::Malformed))?;
    if !reader.at_eom() {
        return Err(StreamError::Malformed);
    }
    match ReadTsigRr::try_from(&last) {
        Ok(tsig) => Ok(Some((up_to_tsig, tsig))),
        Err(FromRecordError::NotTsig) => Ok(None),
        Err(FromRecordError::FormErr) => Err(StreamError::Malformed),
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors that arise when a [`Record`] cannot be converted into a
/// [`ReadTsigRr`].
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum FromRecordError {
    /// There is a format error in the RDATA.
    FormErr,

    /// The [`Record`] is not a TSIG record.
    NotTsig,
}

impl fmt::Display for FromRecordError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::FormErr => f.write_str("FORMERR"),
            Self::NotTsig => f.write_str("RR type is not TSIG"),
        }
    }
}

impl std::error::Error for FromRecordError {}

/// Errors that arise during TSIG verification.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum VerificationError {
    /// The key named in the RR is not the expected key, or its
    /// algorithm does not match. A response must not be signed.
    BadKey,

    /// MAC verification failed. A response to this message must not be
    /// signed.
    BadSig,

    /// Time check failed. A response to this message must be signed.
    BadTime,

    /// There was a format error (due to the MAC not meeting the minimum
    /// requirements of [RFC 8945 § 5.2.2.1]). A response to this
    /// message must not be signed.
    ///
    /// [RFC 8945 § 5.2.2.1]: https://datatracker.ietf.org/doc/html/rfc8945#section-5.2.2.1
    FormErr,
}

impl VerificationError {
    /// Returns the TSIG error code to report to the peer.
    pub fn extended_rcode(&self) -> ExtendedRcode {
        match self {
            Self::BadKey => ExtendedRcode::BADKEY,
            Self::BadSig => ExtendedRcode::BADSIG,
            Self::BadTime => ExtendedRcode::BADTIME,
            Self::FormErr => ExtendedRcode::FORMERR,
        }
    }
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadKey => f.write_str("BADKEY"),
            Self::BadSig => f.write_str("BADSIG"),
            Self::BadTime => f.write_str("BADTIME"),
            Self::FormErr => f.write_str("FORMERR"),
        }
    }
}

impl std::error::Error for VerificationError {}

/// Errors that arise while verifying a multi-message stream.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum StreamError {
    /// A message could not be parsed far enough to find its TSIG RR.
    Malformed,

    /// The first message of the stream was not signed.
    FirstUnsigned,

    /// The stream ended with an unsigned message.
    LastUnsigned,

    /// Too many consecutive messages were unsigned.
    TooManyUnsigned,

    /// The peer reported a TSIG error.
    PeerError(ExtendedRcode),

    /// A signed message failed verification.
    Verification(VerificationError),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Malformed => f.write_str("malformed message"),
            Self::FirstUnsigned => f.write_str("first message is not signed"),
            Self::LastUnsigned => f.write_str("last message is not signed"),
            Self::TooManyUnsigned => write!(
                f,
                "more than {MAX_UNSIGNED_MESSAGES} consecutive unsigned messages"
            ),
            Self::PeerError(rcode) => write!(f, "peer reported TSIG error {rcode}"),
            Self::Verification(err) => write!(f, "TSIG verification failed: {err}"),
        }
    }
}

impl std::error::Error for StreamError {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use lazy_static::lazy_static;

    use crate::class::Class;
    use crate::rr::{Record, Ttl, Type};

    use super::super::writer::TsigMode;
    use super::super::{Question, Reader, Writer};
    use super::*;

    const REQUEST_WITH_TSIG: &[u8] =
        b"\xa2\xe0\x00\x00\x00\x01\x00\x00\x00\x00\x00\x01\x04\x78\x66\x72\
          \x64\x04\x74\x65\x73\x74\x00\x00\x10\x00\x01\x01\x61\x04\x74\x73\
          \x69\x67\x03\x6b\x65\x79\x00\x00\xfa\x00\xff\x00\x00\x00\x00\x00\
          \x3d\x0b\x68\x6d\x61\x63\x2d\x73\x68\x61\x32\x35\x36\x00\x00\x00\
          \x63\x2b\x8d\xca\x01\x2c\x00\x20\x0d\x24\x0c\x01\x76\xfd\xcf\x93\
          \x37\x8c\x83\x41\x5f\x72\xb5\x78\x80\xc8\x73\xcb\xeb\xe6\x43\x25\
          \x40\x60\xb4\x30\xce\xd9\xc9\x51\xa2\xe0\x00\x00\x00\x00";
    const RESPONSE_WITH_TSIG: &[u8] =
        b"\xa2\xe0\x84\x00\x00\x01\x00\x01\x00\x00\x00\x01\x04\x78\x66\x72\
          \x64\x04\x74\x65\x73\x74\x00\x00\x10\x00\x01\xc0\x0c\x00\x10\x00\
          \x01\x00\x01\x51\x80\x00\x0a\x09\x49\x74\x20\x77\x6f\x72\x6b\x73\
          \x21\x01\x61\x04\x74\x73\x69\x67\x03\x6b\x65\x79\x00\x00\xfa\x00\
          \xff\x00\x00\x00\x00\x00\x3d\x0b\x68\x6d\x61\x63\x2d\x73\x68\x61\
          \x32\x35\x36\x00\x00\x00\x63\x2b\x8d\xca\x01\x2c\x00\x20\x92\x9c\
          \xa1\x6c\x57\x65\x4c\xe8\x98\x6a\xf6\xcc\x49\x6c\x8c\x0e\xb6\x2f\
          \x94\xb9\x62\x8c\x54\x46\xac\x5b\x17\x85\xaa\x4f\x88\xd0\xa2\xe0\
          \x00\x00\x00\x00";

    const MESSAGE_ID: u16 = 0xa2e0;
    const FUDGE: u16 = 300;
    const SECRET: &[u8] = b"topsecret";

    lazy_static! {
        static ref CORRUPTED_REQUEST_WITH_TSIG: Box<[u8]> = {
            let mut corrupted: Box<[u8]> = REQUEST_WITH_TSIG.into();
            corrupted[2] = 0xff;
            corrupted
        };
        static ref CORRUPTED_RESPONSE_WITH_TSIG: Box<[u8]> = {
            let mut corrupted: Box<[u8]> = RESPONSE_WITH_TSIG.into();
            corrupted[2] = 0xff;
            corrupted
        };
        static ref KEY: Arc<TsigKey> = Arc::new(TsigKey::new(
            "a.tsig.key.".parse().unwrap(),
            Algorithm::HmacSha256,
            SECRET,
        ));
        static ref TIME_SIGNED: TimeSigned = TimeSigned::try_from_unix_time(1663798730).unwrap();
        static ref TOO_EARLY: TimeSigned =
            TimeSigned::try_from_unix_time(1663798730 - FUDGE as u64 - 1).unwrap();
        static ref TOO_LATE: TimeSigned =
            TimeSigned::try_from_unix_time(1663798730 + FUDGE as u64 + 1).unwrap();
        static ref REQUEST_MAC: &'static [u8] = &REQUEST_WITH_TSIG[72..104];
        static ref QUESTION: Question = Question {
            qname: "xfrd.test.".parse().unwrap(),
            qtype: Type::TXT.into(),
            qclass: Class::IN.into(),
        };
    }

    fn read_message(message: &[u8], rrs_to_skip: usize) -> (&[u8], ReadTsigRr) {
        let mut reader = Reader::try_from(message).unwrap();
        reader.read_question().unwrap();
        for _ in 0..rrs_to_skip {
            reader.skip_rr().unwrap();
        }
        let message_up_to_tsig = reader.message_to_cursor();
        let tsig_rr = ReadTsigRr::try_from(&reader.read_rr().unwrap()).unwrap();
        (message_up_to_tsig, tsig_rr)
    }

    ////////////////////////////////////////////////////////////////////
    // TSIG READING/VERIFICATION TESTS                                //
    ////////////////////////////////////////////////////////////////////

    #[test]
    fn read_tsig_rr_accessors_work() {
        let (_, tsig_rr) = read_message(REQUEST_WITH_TSIG, 0);
        assert_eq!(tsig_rr.key_name(), &KEY.name);
        assert_eq!(tsig_rr.algorithm(), Algorithm::HmacSha256.name());
        assert_eq!(tsig_rr.time_signed(), *TIME_SIGNED);
        assert_eq!(tsig_rr.fudge(), FUDGE);
        assert_eq!(tsig_rr.mac(), *REQUEST_MAC);
        assert_eq!(tsig_rr.original_id(), MESSAGE_ID);
        assert_eq!(tsig_rr.error(), ExtendedRcode::NOERROR);
        assert_eq!(tsig_rr.other(), &[]);
    }

    #[test]
    fn read_tsig_rr_rejects_bad_rdata() {
        let (_, tsig_rr) = read_message(REQUEST_WITH_TSIG, 0);
        let mut record = Record {
            owner: tsig_rr.key_name().clone(),
            rr_type: Type::TSIG,
            class: Qclass::ANY.into(),
            ttl: Ttl::ZERO,
            rdata: Box::new([]),
        };
        assert_eq!(
            ReadTsigRr::try_from(&record).unwrap_err(),
            FromRecordError::FormErr
        );
        record.rr_type = Type::TXT;
        assert_eq!(
            ReadTsigRr::try_from(&record).unwrap_err(),
            FromRecordError::NotTsig
        );
    }

    fn request_verification_helper(
        now: TimeSigned,
        corrupted: bool,
        expected: Result<(), VerificationError>,
    ) {
        let message = if corrupted {
            &CORRUPTED_REQUEST_WITH_TSIG[..]
        } else {
            REQUEST_WITH_TSIG
        };
        let (message_up_to_tsig, tsig_rr) = read_message(message, 0);
        assert_eq!(
            tsig_rr.verify_request(message_up_to_tsig, &KEY, now),
            expected,
        );
    }

    #[test]
    fn request_verification_works() {
        request_verification_helper(*TIME_SIGNED, false, Ok(()));
    }

    #[test]
    fn request_verification_rejects_corrupted_message() {
        request_verification_helper(*TIME_SIGNED, true, Err(VerificationError::BadSig));
    }

    #[test]
    fn request_verification_rejects_late_message() {
        request_verification_helper(*TOO_LATE, false, Err(VerificationError::BadTime));
    }

    #[test]
    fn request_verification_rejects_early_message() {
        request_verification_helper(*TOO_EARLY, false, Err(VerificationError::BadTime));
    }

    #[test]
    fn request_verification_rejects_wrong_key() {
        let (message_up_to_tsig, tsig_rr) = read_message(REQUEST_WITH_TSIG, 0);
        let other_key = TsigKey::new("b.tsig.key.".parse().unwrap(), Algorithm::HmacSha256, SECRET);
        assert_eq!(
            tsig_rr.verify_request(message_up_to_tsig, &other_key, *TIME_SIGNED),
            Err(VerificationError::BadKey),
        );
        let mut keyring = Keyring::new();
        keyring.insert(other_key);
        assert!(keyring.find(&tsig_rr).is_none());
        keyring.insert((**KEY).clone());
        assert!(keyring.find(&tsig_rr).is_some());
    }

    fn response_verification_helper(
        now: TimeSigned,
        corrupted: bool,
        expected: Result<(), VerificationError>,
    ) {
        let message = if corrupted {
            &CORRUPTED_RESPONSE_WITH_TSIG[..]
        } else {
            RESPONSE_WITH_TSIG
        };
        let (message_up_to_tsig, tsig_rr) = read_message(message, 1);
        assert_eq!(
            tsig_rr.verify_response(message_up_to_tsig, *REQUEST_MAC, &KEY, now),
            expected,
        );
    }

    #[test]
    fn response_verification_works() {
        response_verification_helper(*TIME_SIGNED, false, Ok(()));
    }

    #[test]
    fn response_verification_rejects_corrupted_message() {
        response_verification_helper(*TIME_SIGNED, true, Err(VerificationError::BadSig));
    }

    #[test]
    fn response_verification_rejects_late_message() {
        response_verification_helper(*TOO_LATE, false, Err(VerificationError::BadTime));
    }

    #[test]
    fn response_verification_rejects_early_message() {
        response_verification_helper(*TOO_EARLY, false, Err(VerificationError::BadTime));
    }

    ////////////////////////////////////////////////////////////////////
    // TSIG WRITING/SIGNING TESTS                                     //
    ////////////////////////////////////////////////////////////////////

    #[test]
    fn request_signing_works() {
        let mut writer = Writer::new(512).unwrap();
        writer.set_id(MESSAGE_ID);
        writer.add_question(&QUESTION).unwrap();
        let tsig_rr = PreparedTsigRr::new(KEY.name.clone(), MESSAGE_ID, *TIME_SIGNED);
        let tsig_mode = TsigMode::Request { key: KEY.clone() };
        writer.set_tsig(tsig_mode, tsig_rr).unwrap();
        assert_eq!(REQUEST_WITH_TSIG, writer.finish().as_slice());
    }

    fn write_response(signer: &StreamSigner) -> (Vec<u8>, Option<Box<[u8]>>) {
        let mut writer = Writer::new(512).unwrap();
        writer.set_id(MESSAGE_ID);
        writer.set_qr(true);
        writer.set_aa(true);
        writer.add_question(&QUESTION).unwrap();
        writer
            .add_answer(&Record {
                owner: QUESTION.qname.clone(),
                rr_type: Type::TXT,
                class: Class::IN,
                ttl: Ttl::from(86400),
                rdata: b"\x09It works!".as_slice().into(),
            })
            .unwrap();
        let (mode, rr) = signer.next_message(*TIME_SIGNED);
        writer.set_tsig(mode, rr).unwrap();
        writer.finish_with_mac()
    }

    #[test]
    fn response_signing_works() {
        let signer = StreamSigner::new(KEY.clone(), MESSAGE_ID, *REQUEST_MAC);
        let (message, mac) = write_response(&signer);
        assert_eq!(RESPONSE_WITH_TSIG, message.as_slice());
        assert_eq!(mac.unwrap().as_ref(), &RESPONSE_WITH_TSIG[94..126]);
    }

    #[test]
    fn stream_of_signed_messages_verifies() {
        let mut signer = StreamSigner::new(KEY.clone(), MESSAGE_ID, *REQUEST_MAC);
        let mut verifier = StreamVerifier::new(KEY.clone(), *REQUEST_MAC);
        for _ in 0..3 {
            let (message, mac) = write_response(&signer);
            signer.signed(mac.unwrap());
            verifier.verify(&message, *TIME_SIGNED).unwrap();
        }
        verifier.finish().unwrap();
    }

    #[test]
    fn stream_with_unsigned_intermediates_verifies() {
        // Build the continuation by hand: a signed first message, two
        // unsigned ones, then a signed message covering them.
        let signer = StreamSigner::new(KEY.clone(), MESSAGE_ID, *REQUEST_MAC);
        let (first, first_mac) = write_response(&signer);
        let first_mac = first_mac.unwrap();

        let mut unsigned_writer = Writer::new(512).unwrap();
        unsigned_writer.set_id(MESSAGE_ID);
        unsigned_writer.set_qr(true);
        let unsigned = unsigned_writer.finish();

        let mut last_writer = Writer::new(512).unwrap();
        last_writer.set_id(MESSAGE_ID);
        last_writer.set_qr(true);
        // The header of the final message, whose ARCOUNT includes the
        // TSIG RR.
        let up_to_tsig = b"\xa2\xe0\x80\x00\x00\x00\x00\x00\x00\x00\x00\x01";
        let prepared = PreparedTsigRr::new(KEY.name.clone(), MESSAGE_ID, *TIME_SIGNED);
        let mut authenticator = KEY.algorithm.make_authenticator(&KEY.secret);
        add_prior_mac(authenticator.as_mut(), &first_mac);
        authenticator.update(&unsigned);
        authenticator.update(&unsigned);
        add_modified_message(authenticator.as_mut(), up_to_tsig, MESSAGE_ID);
        add_tsig_timers(authenticator.as_mut(), &(KEY.algorithm.name(), &prepared));
        let mac = authenticator.finalize();
        let tsig_record = Record {
            owner: KEY.name.clone(),
            rr_type: Type::TSIG,
            class: Qclass::ANY.into(),
            ttl: Ttl::ZERO,
            rdata: prepared.serialize_rdata(KEY.algorithm.name(), &mac),
        };
        last_writer.add_additional(&tsig_record).unwrap();
        let last = last_writer.finish();

        let mut verifier = StreamVerifier::new(KEY.clone(), *REQUEST_MAC);
        verifier.verify(&first, *TIME_SIGNED).unwrap();
        verifier.verify(&unsigned, *TIME_SIGNED).unwrap();
        verifier.verify(&unsigned, *TIME_SIGNED).unwrap();
        assert_eq!(verifier.finish(), Err(StreamError::LastUnsigned));
        verifier.verify(&last, *TIME_SIGNED).unwrap();
        verifier.finish().unwrap();
    }

    #[test]
    fn stream_limits_unsigned_messages() {
        let signer = StreamSigner::new(KEY.clone(), MESSAGE_ID, *REQUEST_MAC);
        let (first, _) = write_response(&signer);
        let mut unsigned_writer = Writer::new(512).unwrap();
        unsigned_writer.set_id(MESSAGE_ID);
        let unsigned = unsigned_writer.finish();

        let mut verifier = StreamVerifier::new(KEY.clone(), *REQUEST_MAC);
        assert_eq!(
            verifier.verify(&unsigned, *TIME_SIGNED),
            Err(StreamError::FirstUnsigned)
        );
        verifier.verify(&first, *TIME_SIGNED).unwrap();
        for _ in 0..MAX_UNSIGNED_MESSAGES {
            verifier.verify(&unsigned, *TIME_SIGNED).unwrap();
        }
        assert_eq!(
            verifier.verify(&unsigned, *TIME_SIGNED),
            Err(StreamError::TooManyUnsigned)
        );
    }

    #[test]
    fn stream_rejects_replayed_message() {
        let mut signer = StreamSigner::new(KEY.clone(), MESSAGE_ID, *REQUEST_MAC);
        let mut verifier = StreamVerifier::new(KEY.clone(), *REQUEST_MAC);
        let (first, mac) = write_response(&signer);
        signer.signed(mac.unwrap());
        verifier.verify(&first, *TIME_SIGNED).unwrap();
        assert_eq!(
            verifier.verify(&first, *TIME_SIGNED),
            Err(StreamError::Verification(VerificationError::BadSig))
        );
    }
}
