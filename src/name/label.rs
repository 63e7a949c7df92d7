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

//! Implementation of the [`LabelBuf`] type.

use std::fmt;

use arrayvec::ArrayVec;

use super::{Error, MAX_LABEL_LEN};

/// An owned, case-folded copy of a single label of a domain name.
///
/// `LabelBuf`s are used as map keys when walking down the DNS tree one
/// label at a time. Since DNS comparisons are ASCII-case-insensitive,
/// the label is stored in lowercase; the derived [`Eq`], [`Hash`], and
/// [`Ord`] implementations then give the right semantics.
#[derive(Clone, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct LabelBuf {
    octets: ArrayVec<u8, MAX_LABEL_LEN>,
}

impl LabelBuf {
    /// Returns the (lowercase) octets of the label.
    pub fn octets(&self) -> &[u8] {
        &self.octets
    }
}

impl TryFrom<&[u8]> for LabelBuf {
    type Error = Error;

    fn try_from(octets: &[u8]) -> Result<Self, Self::Error> {
        let mut buf = ArrayVec::new();
        buf.try_extend_from_slice(octets)
            .or(Err(Error::LabelTooLong))?;
        buf.make_ascii_lowercase();
        Ok(Self { octets: buf })
    }
}

impl fmt::Display for LabelBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        super::write_label(f, &self.octets)
    }
}

impl fmt::Debug for LabelBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_case_folded() {
        let upper = LabelBuf::try_from(b"WwW".as_slice()).unwrap();
        let lower = LabelBuf::try_from(b"www".as_slice()).unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.octets(), b"www");
    }

    #[test]
    fn long_labels_are_rejected() {
        assert_eq!(
            LabelBuf::try_from([b'a'; 64].as_slice()),
            Err(Error::LabelTooLong),
        );
    }
}
