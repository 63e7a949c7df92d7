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

//! DNS zone transfers ([RFC 5936] AXFR and [RFC 1995] IXFR).
//!
//! This crate implements both sides of a zone transfer:
//!
//! * The push side ([`xfr::push`]) streams a zone held in the
//!   [`db::Catalog`] to a requester, either in full or as the versions
//!   recorded in the zone's delta log. The [`io`] module serves it over
//!   TCP.
//! * The pull side ([`xfr::pull`]) fetches a zone from a list of
//!   candidate servers, preferring incremental transfers, and commits
//!   the result to the catalog (or hands it to the caller).
//!
//! Serial numbers are compared only with the sequence space arithmetic
//! of [RFC 1982] (see [`serial`]). Transfers may be authenticated with
//! TSIG ([RFC 8945]); see [`message::tsig`]. Zone data can be saved to
//! and loaded from disk with the [`image`] module.
//!
//! [RFC 1982]: https://datatracker.ietf.org/doc/html/rfc1982
//! [RFC 1995]: https://datatracker.ietf.org/doc/html/rfc1995
//! [RFC 5936]: https://datatracker.ietf.org/doc/html/rfc5936
//! [RFC 8945]: https://datatracker.ietf.org/doc/html/rfc8945

pub mod class;
pub mod db;
pub mod image;
pub mod io;
pub mod message;
pub mod name;
pub mod rr;
pub mod serial;
mod util;
pub mod xfr;
