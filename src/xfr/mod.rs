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

//! Zone transfers: the push (serving) side, the pull (fetching) side,
//! and the pieces they share.
//!
//! * [`framer`] packs records into length-prefixed messages and reads
//!   them back, signing and verifying with TSIG along the way.
//! * [`cursor`] walks a zone in full-transfer order.
//! * [`delta`] holds the versions (deltas) of a zone used for
//!   incremental transfers.
//! * [`request`] builds and parses transfer queries.
//! * [`push`] streams a zone to a requester.
//! * [`pull`] fetches a zone from a list of servers.

pub mod cursor;
pub mod delta;
pub mod framer;
pub mod pull;
pub mod push;
pub mod request;

pub use cursor::ZoneWalkCursor;
pub use delta::{Change, Delta, DeltaBuilder, DeltaLog, DeltaSpan, Op};
pub use framer::{MessageFramer, MessageReader};
pub use pull::{pull, refresh_zone, Candidate, Method, PullConfig, PullRequest, PullResult, PullStatus};
pub use push::{Progress, PushSession};
pub use request::{build_query, parse_request, QueryKind, Refusal, TransferRequest};

/// The number of consecutive collapsed versions (versions whose
/// starting and ending serials are the same) after which an incremental
/// transfer ends early. The push side stops sending at the added SOA of
/// the last such version; the pull side stops reading there and drops
/// that version.
pub const MAX_CONSECUTIVE_COLLAPSES: u32 = 2;
