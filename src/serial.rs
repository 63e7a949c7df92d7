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

//! Serial number arithmetic ([RFC 1982]).
//!
//! SOA serials are 32-bit counters that wrap around, so they must never
//! be compared as plain integers. Everything in this crate that orders
//! two serials goes through [`is_newer`].
//!
//! [RFC 1982]: https://datatracker.ietf.org/doc/html/rfc1982

use std::cmp::Ordering;

/// Returns whether serial `a` is newer than serial `b`: that is, whether
/// `a - b` (mod 2³²), read as a signed 32-bit integer, is positive.
///
/// When `a` and `b` are exactly 2³¹ apart the comparison is undefined
/// by RFC 1982, and neither is newer than the other.
pub fn is_newer(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// Compares two serials in sequence space. Returns `None` when they are
/// exactly 2³¹ apart.
pub fn compare(a: u32, b: u32) -> Option<Ordering> {
    if a == b {
        Some(Ordering::Equal)
    } else if is_newer(a, b) {
        Some(Ordering::Greater)
    } else if is_newer(b, a) {
        Some(Ordering::Less)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_comparisons_work() {
        assert!(is_newer(5, 3));
        assert!(!is_newer(3, 5));
        assert!(!is_newer(7, 7));
    }

    #[test]
    fn comparison_wraps_around() {
        assert!(is_newer(1, 0xffff_ffff));
        assert!(!is_newer(0xffff_ffff, 1));
        assert!(is_newer(0, 0xffff_ffff));
        assert!(is_newer(0x7fff_ffff, 0));
    }

    #[test]
    fn exactly_opposite_serials_are_unordered() {
        assert!(!is_newer(0x8000_0000, 0));
        assert!(!is_newer(0, 0x8000_0000));
        assert_eq!(compare(0x8000_0000, 0), None);
    }

    #[test]
    fn comparison_is_antisymmetric() {
        let samples = [
            0,
            1,
            2,
            1000,
            0x7fff_fffe,
            0x7fff_ffff,
            0x8000_0001,
            0xdead_beef,
            0xffff_fffe,
            0xffff_ffff,
        ];
        for &a in &samples {
            assert!(!is_newer(a, a));
            for &b in &samples {
                if a != b && a.wrapping_sub(b) != 0x8000_0000 {
                    assert_ne!(is_newer(a, b), is_newer(b, a), "a = {a}, b = {b}");
                }
            }
        }
    }

    #[test]
    fn compare_agrees_with_is_newer() {
        assert_eq!(compare(10, 10), Some(Ordering::Equal));
        assert_eq!(compare(15, 10), Some(Ordering::Greater));
        assert_eq!(compare(10, 15), Some(Ordering::Less));
        assert_eq!(compare(2, u32::MAX - 2), Some(Ordering::Greater));
    }
}
