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

//! Implementation of the [`Rcode`] and [`ExtendedRcode`] types.

use std::fmt;

////////////////////////////////////////////////////////////////////////
// RCODES                                                             //
////////////////////////////////////////////////////////////////////////

/// The four-bit RCODE of the DNS message header ([RFC 1035 § 4.1.1]).
/// Variant names follow the IANA registry.
///
/// [RFC 1035 § 4.1.1]: https://datatracker.ietf.org/doc/html/rfc1035#section-4.1.1
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Rcode {
    NoError,
    FormErr,
    ServFail,
    NxDomain,
    NotImp,
    Refused,
    YxDomain,
    YxRrset,
    NxRrset,
    NotAuth,
    NotZone,
    DsoTypeNi,
    Unassigned(u8),
}

const RCODES: [Rcode; 12] = [
    Rcode::NoError,
    Rcode::FormErr,
    Rcode::ServFail,
    Rcode::NxDomain,
    Rcode::NotImp,
    Rcode::Refused,
    Rcode::YxDomain,
    Rcode::YxRrset,
    Rcode::NxRrset,
    Rcode::NotAuth,
    Rcode::NotZone,
    Rcode::DsoTypeNi,
];

impl TryFrom<u8> for Rcode {
    type Error = IntoRcodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match RCODES.get(value as usize) {
            Some(rcode) => Ok(*rcode),
            None if value < 16 => Ok(Self::Unassigned(value)),
            None => Err(IntoRcodeError),
        }
    }
}

impl From<Rcode> for u8 {
    fn from(value: Rcode) -> Self {
        match value {
            Rcode::Unassigned(v) => v,
            known => RCODES.iter().position(|r| *r == known).unwrap_or_default() as u8,
        }
    }
}

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Unassigned(v) => write!(f, "RCODE{v}"),
            known => write!(f, "{}", format!("{known:?}").to_ascii_uppercase()),
        }
    }
}

/// An error signaling that the provided value is not a valid RCODE.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IntoRcodeError;

impl fmt::Display for IntoRcodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("not a valid RCODE")
    }
}

impl std::error::Error for IntoRcodeError {}

////////////////////////////////////////////////////////////////////////
// EXTENDED RCODES                                                    //
////////////////////////////////////////////////////////////////////////

/// A 16-bit extended RCODE, as carried in the error field of a TSIG
/// record ([RFC 8945 § 4.2]).
///
/// [RFC 8945 § 4.2]: https://datatracker.ietf.org/doc/html/rfc8945#section-4.2
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct ExtendedRcode(u16);

impl ExtendedRcode {
    pub const NOERROR: Self = Self(0);
    pub const FORMERR: Self = Self(1);
    pub const NOTAUTH: Self = Self(9);
    pub const BADSIG: Self = Self(16);
    pub const BADKEY: Self = Self(17);
    pub const BADTIME: Self = Self(18);
}

impl From<u16> for ExtendedRcode {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<ExtendedRcode> for u16 {
    fn from(rcode: ExtendedRcode) -> Self {
        rcode.0
    }
}

impl From<Rcode> for ExtendedRcode {
    fn from(rcode: Rcode) -> Self {
        Self(u8::from(rcode) as u16)
    }
}

impl fmt::Display for ExtendedRcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::BADSIG => f.write_str("BADSIG"),
            Self::BADKEY => f.write_str("BADKEY"),
            Self::BADTIME => f.write_str("BADTIME"),
            Self(v) if v < 16 => Rcode::try_from(v as u8)
                .map_err(|_| fmt::Error)?
                .fmt(f),
            Self(v) => write!(f, "RCODE{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rcode_conversions_agree() {
        for value in 0..16 {
            assert_eq!(u8::from(Rcode::try_from(value).unwrap()), value);
        }
        assert_eq!(Rcode::try_from(9), Ok(Rcode::NotAuth));
        assert_eq!(Rcode::try_from(16), Err(IntoRcodeError));
    }

    #[test]
    fn rcodes_display_by_mnemonic() {
        assert_eq!(Rcode::NotAuth.to_string(), "NOTAUTH");
        assert_eq!(Rcode::Unassigned(13).to_string(), "RCODE13");
        assert_eq!(ExtendedRcode::from(Rcode::Refused).to_string(), "REFUSED");
        assert_eq!(ExtendedRcode::BADSIG.to_string(), "BADSIG");
    }
}
