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

//! Reading and decomposition of RDATA.
//!
//! RDATA is stored as opaque octets in uncompressed form. The only
//! structure this module knows about is where domain names are
//! embedded: [RFC 3597 § 4] allows the RDATA of the well-known types of
//! [RFC 1035] to contain compressed names. Those names are decompressed
//! when a record is read from a message and may be compressed again
//! when it is written to one.
//!
//! [RFC 1035]: https://datatracker.ietf.org/doc/html/rfc1035
//! [RFC 3597 § 4]: https://datatracker.ietf.org/doc/html/rfc3597#section-4

use std::fmt;

use super::Type;
use crate::name::{self, Name};

/// The maximum length of RDATA.
pub const MAX_RDATA_LEN: usize = u16::MAX as usize;

////////////////////////////////////////////////////////////////////////
// RDATA LAYOUTS                                                      //
////////////////////////////////////////////////////////////////////////

/// One field of an RDATA layout.
#[derive(Clone, Copy, Debug)]
enum Field {
    /// An embedded domain name that may be compressed.
    Name,

    /// A fixed number of octets.
    Fixed(usize),
}

/// Returns the layout of the RDATA of `rr_type`. Any octets past the
/// end of the layout are opaque. Types with no embedded names have an
/// empty layout.
fn layout(rr_type: Type) -> &'static [Field] {
    match rr_type {
        Type::NS
        | Type::MD
        | Type::MF
        | Type::CNAME
        | Type::MB
        | Type::MG
        | Type::MR
        | Type::PTR => &[Field::Name],
        Type::SOA => &[Field::Name, Field::Name, Field::Fixed(20)],
        Type::MINFO => &[Field::Name, Field::Name],
        Type::MX => &[Field::Fixed(2), Field::Name],
        _ => &[],
    }
}

////////////////////////////////////////////////////////////////////////
// READING                                                            //
////////////////////////////////////////////////////////////////////////

/// Reads the RDATA of a record of type `rr_type` from `message`,
/// starting at `start` and spanning `rdlength` octets. Embedded names
/// are decompressed (pointers are resolved against the whole message),
/// so the returned octets are in uncompressed form.
pub fn read_rdata(
    rr_type: Type,
    message: &[u8],
    start: usize,
    rdlength: u16,
) -> Result<Box<[u8]>, ReadRdataError> {
    let end = start + rdlength as usize;
    if end > message.len() {
        return Err(ReadRdataError::UnexpectedEom);
    }

    let fields = layout(rr_type);
    if fields.is_empty() {
        return Ok(message[start..end].into());
    }

    let mut out = Vec::with_capacity(rdlength as usize);
    let mut cursor = start;
    for field in fields {
        match *field {
            Field::Name => {
                let (name, len) = Name::try_from_compressed(message, cursor)?;
                out.extend_from_slice(name.wire_repr());
                cursor += len;
            }
            Field::Fixed(len) => {
                let octets = message
                    .get(cursor..cursor + len)
                    .ok_or(ReadRdataError::UnexpectedEom)?;
                out.extend_from_slice(octets);
                cursor += len;
            }
        }
        if cursor > end {
            return Err(ReadRdataError::UnexpectedEom);
        }
    }
    out.extend_from_slice(&message[cursor..end]);
    if out.len() > MAX_RDATA_LEN {
        Err(ReadRdataError::TooLong)
    } else {
        Ok(out.into())
    }
}

////////////////////////////////////////////////////////////////////////
// COMPONENTS                                                         //
////////////////////////////////////////////////////////////////////////

/// A piece of uncompressed RDATA: either an embedded name that may be
/// compressed, or other data that must be written as-is.
#[derive(Debug, Eq, PartialEq)]
pub enum Component<'a> {
    CompressibleName(Name),
    Other(&'a [u8]),
}

/// Returns an iterator over the [`Component`]s of uncompressed RDATA
/// of type `rr_type`.
pub fn components(rr_type: Type, rdata: &[u8]) -> Components {
    Components {
        fields: layout(rr_type),
        rdata,
    }
}

/// An iterator over RDATA [`Component`]s. See [`components`].
pub struct Components<'a> {
    fields: &'static [Field],
    rdata: &'a [u8],
}

impl<'a> Iterator for Components<'a> {
    type Item = Result<Component<'a>, ReadRdataError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some((field, remaining_fields)) = self.fields.split_first() {
            self.fields = remaining_fields;
            let (component, len) = match *field {
                Field::Name => match Name::try_from_uncompressed(self.rdata) {
                    Ok((name, len)) => (Component::CompressibleName(name), len),
                    Err(e) => return Some(Err(e.into())),
                },
                Field::Fixed(len) => match self.rdata.get(..len) {
                    Some(octets) => (Component::Other(octets), len),
                    None => return Some(Err(ReadRdataError::UnexpectedEom)),
                },
            };
            self.rdata = &self.rdata[len..];
            Some(Ok(component))
        } else if self.rdata.is_empty() {
            None
        } else {
            let rest = std::mem::take(&mut self.rdata);
            Some(Ok(Component::Other(rest)))
        }
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that RDATA could not be read or decomposed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ReadRdataError {
    InvalidName(name::Error),
    UnexpectedEom,
    TooLong,
}

impl fmt::Display for ReadRdataError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidName(err) => write!(f, "invalid embedded domain name: {err}"),
            Self::UnexpectedEom => f.write_str("unexpected end of RDATA"),
            Self::TooLong => f.write_str("decompressed RDATA is too long"),
        }
    }
}

impl std::error::Error for ReadRdataError {}

impl From<name::Error> for ReadRdataError {
    fn from(err: name::Error) -> Self {
        Self::InvalidName(err)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_in_mx_rdata_are_decompressed() {
        // The MX RDATA (at offset 9) refers back to "example." at 0.
        let message = b"\x07example\x00\x00\x0a\x04mail\xc0\x00";
        let rdata = read_rdata(Type::MX, message, 9, 9).unwrap();
        assert_eq!(rdata.as_ref(), b"\x00\x0a\x04mail\x07example\x00");
    }

    #[test]
    fn opaque_rdata_is_copied() {
        let message = b"\xc0\x00\x02\x01";
        let rdata = read_rdata(Type::A, message, 0, 4).unwrap();
        assert_eq!(rdata.as_ref(), message);
    }

    #[test]
    fn rdata_overrunning_message_is_rejected() {
        assert_eq!(
            read_rdata(Type::A, b"\x01\x02", 0, 4),
            Err(ReadRdataError::UnexpectedEom),
        );
        // A name that runs past RDLENGTH.
        assert_eq!(
            read_rdata(Type::NS, b"\x01a\x00", 0, 2),
            Err(ReadRdataError::UnexpectedEom),
        );
    }

    #[test]
    fn soa_components_work() {
        let mut rdata = Vec::new();
        rdata.extend_from_slice(b"\x02ns\x00\x05admin\x00");
        rdata.extend_from_slice(&[0; 20]);
        let components: Vec<_> = components(Type::SOA, &rdata)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            components,
            vec![
                Component::CompressibleName("ns.".parse().unwrap()),
                Component::CompressibleName("admin.".parse().unwrap()),
                Component::Other(&[0; 20]),
            ]
        );
    }

    #[test]
    fn components_of_nameless_rdata_are_opaque() {
        let components: Vec<_> = components(Type::TXT, b"\x02hi")
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(components, vec![Component::Other(b"\x02hi")]);
        assert_eq!(components_count(Type::A, b""), 0);
    }

    fn components_count(rr_type: Type, rdata: &[u8]) -> usize {
        components(rr_type, rdata).count()
    }
}
