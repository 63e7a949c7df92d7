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

//! Implementation of data structures related to domain names.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::FusedIterator;
use std::str::FromStr;

use arrayvec::ArrayVec;

mod error;
mod label;
mod wire;
pub use error::Error;
pub use label::LabelBuf;

/// The maximum number of labels in a domain name.
const MAX_N_LABELS: usize = 128;

/// The maximum length of the uncompressed on-the-wire representation of
/// a domain name.
const MAX_WIRE_LEN: usize = 255;

/// The maximum length of a label in a domain name (not including the
/// octet that provides the length).
const MAX_LABEL_LEN: usize = 63;

////////////////////////////////////////////////////////////////////////
// NAME STRUCTURE                                                     //
////////////////////////////////////////////////////////////////////////

/// A domain name.
///
/// A `Name` owns the uncompressed on-the-wire representation of the
/// name ([RFC 1035 § 3.1]) together with its label count. Names are
/// always absolute; the final label is the null label, so the root name
/// `.` has a [length](Name::len) of one.
///
/// Equality and hashing are ASCII-case-insensitive. The [`Ord`]
/// implementation is the canonical DNS name order of
/// [RFC 4034 § 6.1], so sorting a set of names yields the order in
/// which a depth-first walk of the DNS tree visits them.
///
/// [RFC 1035 § 3.1]: https://datatracker.ietf.org/doc/html/rfc1035#section-3.1
/// [RFC 4034 § 6.1]: https://datatracker.ietf.org/doc/html/rfc4034#section-6.1
#[derive(Clone)]
pub struct Name {
    octets: Box<[u8]>,
    n_labels: u8,
}

#[allow(clippy::len_without_is_empty)] // A domain name is never empty!
impl Name {
    /// Creates a `Name` from an already-validated wire representation.
    fn from_parts(octets: Box<[u8]>, n_labels: usize) -> Self {
        Self {
            octets,
            n_labels: n_labels as u8,
        }
    }

    /// Returns the root name `.`.
    pub fn root() -> Self {
        Self::from_parts(Box::new([0]), 1)
    }

    /// Returns whether the `Name` is the DNS root `.`.
    pub fn is_root(&self) -> bool {
        self.n_labels == 1
    }

    /// Returns the number of labels in this `Name`, including the
    /// terminal null label.
    pub fn len(&self) -> usize {
        self.n_labels as usize
    }

    /// Returns an iterator over the labels of this `Name`, from the
    /// leftmost label to the null label.
    pub fn labels(&self) -> Labels {
        Labels {
            octets: &self.octets,
            remaining: self.len(),
        }
    }

    /// Returns the uncompressed on-the-wire representation of the name.
    pub fn wire_repr(&self) -> &[u8] {
        &self.octets
    }

    /// Returns the on-the-wire representation of the name starting
    /// at label `n`. (This is the wire representation of the `n`th
    /// [superdomain](Name::superdomain).)
    pub fn wire_repr_from(&self, n: usize) -> &[u8] {
        &self.octets[self.label_offsets()[n] as usize..]
    }

    /// Returns whether this `Name` is equal to or a subdomain of
    /// `other`.
    pub fn eq_or_subdomain_of(&self, other: &Name) -> bool {
        self.len() >= other.len()
            && self
                .wire_repr_from(self.len() - other.len())
                .eq_ignore_ascii_case(other.wire_repr())
    }

    /// Returns the superdomain obtained by removing the first `skip`
    /// labels, or `None` if that would remove the null label.
    pub fn superdomain(&self, skip: usize) -> Option<Name> {
        if skip < self.len() {
            Some(Self::from_parts(
                self.wire_repr_from(skip).into(),
                self.len() - skip,
            ))
        } else {
            None
        }
    }

    /// Returns a copy of this name with all ASCII letters in lowercase.
    pub fn to_lowercase(&self) -> Name {
        let mut octets = self.octets.clone();
        octets.make_ascii_lowercase();
        Self::from_parts(octets, self.len())
    }

    /// Returns the label of this name at index `n` as an owned,
    /// case-folded [`LabelBuf`].
    pub fn label_buf(&self, n: usize) -> LabelBuf {
        let offset = self.label_offsets()[n] as usize;
        let len = self.octets[offset] as usize;
        // Labels in a Name are never longer than 63 octets.
        LabelBuf::try_from(&self.octets[offset + 1..offset + 1 + len])
            .expect("a name contained an invalid label")
    }

    /// Parses a compressed name starting at index `start` of `octets`.
    /// Returns the name and the number of octets it occupies at
    /// `start`.
    pub fn try_from_compressed(octets: &[u8], start: usize) -> Result<(Self, usize), Error> {
        wire::parse_compressed_name(octets, start)
    }

    /// Parses an uncompressed name at the beginning of `octets`.
    /// Returns the name and its length on the wire.
    pub fn try_from_uncompressed(octets: &[u8]) -> Result<(Self, usize), Error> {
        wire::parse_uncompressed_name(octets, false)
    }

    /// Parses an uncompressed name that must occupy all of `octets`.
    pub fn try_from_uncompressed_all(octets: &[u8]) -> Result<Self, Error> {
        wire::parse_uncompressed_name(octets, true).map(|(name, _)| name)
    }

    /// Computes the offsets of each label in the wire representation.
    fn label_offsets(&self) -> ArrayVec<u8, MAX_N_LABELS> {
        let mut offsets = ArrayVec::new();
        let mut offset = 0;
        for _ in 0..self.len() {
            offsets.push(offset as u8);
            offset += self.octets[offset] as usize + 1;
        }
        offsets
    }
}

////////////////////////////////////////////////////////////////////////
// LABEL ITERATION                                                    //
////////////////////////////////////////////////////////////////////////

/// An iterator over the labels of a [`Name`]. Each label is produced
/// without its length octet; the final label is empty.
pub struct Labels<'a> {
    octets: &'a [u8],
    remaining: usize,
}

impl<'a> Iterator for Labels<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            None
        } else {
            let len = self.octets[0] as usize;
            let label = &self.octets[1..1 + len];
            self.octets = &self.octets[1 + len..];
            self.remaining -= 1;
            Some(label)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Labels<'_> {}

impl FusedIterator for Labels<'_> {}

////////////////////////////////////////////////////////////////////////
// COMPARISON AND HASHING                                             //
////////////////////////////////////////////////////////////////////////

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.octets.eq_ignore_ascii_case(&other.octets)
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for octet in self.octets.iter() {
            state.write_u8(octet.to_ascii_lowercase());
        }
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        let ours: ArrayVec<&[u8], MAX_N_LABELS> = self.labels().collect();
        let theirs: ArrayVec<&[u8], MAX_N_LABELS> = other.labels().collect();
        for (a, b) in ours.iter().rev().zip(theirs.iter().rev()) {
            let ordering = a
                .iter()
                .map(u8::to_ascii_lowercase)
                .cmp(b.iter().map(u8::to_ascii_lowercase));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        ours.len().cmp(&theirs.len())
    }
}

////////////////////////////////////////////////////////////////////////
// PRESENTATION FORMAT                                                //
////////////////////////////////////////////////////////////////////////

/// Writes a label in presentation format, escaping as described in
/// [RFC 4343 § 2.1].
///
/// [RFC 4343 § 2.1]: https://datatracker.ietf.org/doc/html/rfc4343#section-2.1
fn write_label(f: &mut fmt::Formatter, label: &[u8]) -> fmt::Result {
    for &octet in label {
        if matches!(octet, b'.' | b'\\' | b'"' | b'(' | b')' | b';' | b'@' | b'$') {
            write!(f, "\\{}", octet as char)?;
        } else if octet.is_ascii_graphic() {
            write!(f, "{}", octet as char)?;
        } else {
            write!(f, "\\{:03}", octet)?;
        }
    }
    Ok(())
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        for label in self.labels().take(self.len() - 1) {
            write_label(f, label)?;
            f.write_str(".")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// Allows for conversion of a Rust [`str`] into a [`Name`]. The passed
/// string must be strictly ASCII. Escape sequences as defined by
/// [RFC 4343 § 2.1] are supported. A trailing dot is optional: names
/// are always interpreted relative to the root.
///
/// [RFC 4343 § 2.1]: https://datatracker.ietf.org/doc/html/rfc4343#section-2.1
impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::StrEmpty);
        } else if s == "." {
            return Ok(Name::root());
        }

        let mut wire = ArrayVec::<u8, MAX_WIRE_LEN>::new();
        let mut n_labels = 0;
        let mut label = ArrayVec::<u8, MAX_LABEL_LEN>::new();
        let mut remaining: &[u8] = s.as_ref();
        let mut ended_with_dot = false;

        // NOTE: to check that the string is ASCII, it suffices to check
        // that each octet is ASCII as we go. This is because all
        // multi-byte characters start with an octet that is not ASCII.
        while let Some(&octet) = remaining.first() {
            ended_with_dot = false;
            if octet == b'\\' {
                let (value, consumed) = parse_escape(&remaining[1..])?;
                label.try_push(value).or(Err(Error::LabelTooLong))?;
                remaining = &remaining[consumed + 1..];
            } else if octet == b'.' {
                if label.is_empty() {
                    return Err(Error::EmptyLabel);
                }
                push_label(&mut wire, &label)?;
                n_labels += 1;
                label.clear();
                ended_with_dot = true;
                remaining = &remaining[1..];
            } else if !octet.is_ascii() {
                return Err(Error::StrNotAscii);
            } else {
                label.try_push(octet).or(Err(Error::LabelTooLong))?;
                remaining = &remaining[1..];
            }
        }
        if !ended_with_dot {
            push_label(&mut wire, &label)?;
            n_labels += 1;
        }
        wire.try_push(0).or(Err(Error::NameTooLong))?;
        Ok(Self::from_parts(wire.as_slice().into(), n_labels + 1))
    }
}

/// Appends a label (with its length octet) to a wire representation
/// under construction.
fn push_label(wire: &mut ArrayVec<u8, MAX_WIRE_LEN>, label: &[u8]) -> Result<(), Error> {
    wire.try_push(label.len() as u8)
        .or(Err(Error::NameTooLong))?;
    wire.try_extend_from_slice(label)
        .or(Err(Error::NameTooLong))
}

/// Parses an escape sequence. We expect `remaining` to start with the
/// octet immediately *after* the backslash that introduces the escape
/// sequence.
fn parse_escape(remaining: &[u8]) -> Result<(u8, usize), Error> {
    if remaining.is_empty() {
        Err(Error::InvalidEscape)
    } else if remaining[0].is_ascii_digit() {
        if remaining.len() < 3 || !remaining[1].is_ascii_digit() || !remaining[2].is_ascii_digit() {
            Err(Error::InvalidEscape)
        } else {
            let value = remaining[..3]
                .iter()
                .fold(0usize, |acc, d| acc * 10 + (d - b'0') as usize);
            u8::try_from(value)
                .map(|v| (v, 3))
                .or(Err(Error::InvalidEscape))
        }
    } else if remaining[0].is_ascii() {
        Ok((remaining[0], 1))
    } else {
        Err(Error::StrNotAscii)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
