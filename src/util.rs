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

//! Crate-private utilities.

/// A wrapper around [`str`] references whose [`PartialEq`] and [`Eq`]
/// implementations are ASCII-case-insensitive.
pub struct Caseless<'a>(pub &'a str);

impl PartialEq for Caseless<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(other.0)
    }
}

impl Eq for Caseless<'_> {}

/// Parses a mnemonic of the form `<PREFIX><NUMBER>` (e.g. `TYPE65280`
/// or `CLASS1`) as described in [RFC 3597 § 5]. The prefix is matched
/// case-insensitively.
///
/// [RFC 3597 § 5]: https://datatracker.ietf.org/doc/html/rfc3597#section-5
pub fn parse_generic_mnemonic(text: &str, prefix: &str) -> Option<Result<u16, ()>> {
    let n = prefix.len();
    if text
        .get(0..n)
        .map_or(false, |p| p.eq_ignore_ascii_case(prefix))
    {
        Some(text[n..].parse::<u16>().or(Err(())))
    } else {
        None
    }
}

/// Reads a network-byte-order `u16` from the beginning of `octets`.
pub fn read_u16(octets: &[u8]) -> Option<u16> {
    octets
        .get(0..2)
        .map(|s| u16::from_be_bytes([s[0], s[1]]))
}

/// Reads a network-byte-order `u32` from the beginning of `octets`.
pub fn read_u32(octets: &[u8]) -> Option<u32> {
    octets
        .get(0..4)
        .map(|s| u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_mnemonics_parse() {
        assert_eq!(parse_generic_mnemonic("type65280", "TYPE"), Some(Ok(65280)));
        assert_eq!(parse_generic_mnemonic("TYPE70000", "TYPE"), Some(Err(())));
        assert_eq!(parse_generic_mnemonic("A", "TYPE"), None);
    }

    #[test]
    fn integer_readers_check_length() {
        assert_eq!(read_u16(b"\x01\x02\x03"), Some(0x0102));
        assert_eq!(read_u16(b"\x01"), None);
        assert_eq!(read_u32(b"\x00\x00\x01\x00"), Some(256));
        assert_eq!(read_u32(b"\x00\x00\x01"), None);
    }
}
