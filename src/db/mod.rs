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

//! Facilities for storing and accessing zone data.
//!
//! The core of this module is the [`Zone`] trait, which abstracts read
//! access to one version of a zone's data, and the [`Catalog`], which
//! holds every zone known to the server along with the per-zone state
//! that zone transfers depend on.
//!
//! ## Zones and catalogs
//!
//! [RFC 1035 § 6.1.2] suggests a tiered approach to a server's
//! database. At the first level, the server maintains a "catalog" of
//! the zones for which it is authoritative. Each zone is in turn stored
//! in its own data structure. Zone transfers operate on a zone as a
//! unit, so they are built on the same two tiers: a transfer finds its
//! [`ZoneEntry`] in the [`Catalog`] and then walks (or replaces) that
//! zone's data.
//!
//! ## Versions and generations
//!
//! Zone data is never modified in place. Each commit (a new image from
//! a full transfer, a delta from an incremental transfer, or a reload)
//! builds a new [`MemoryZone`] and moves the zone to a new generation.
//! Records carry the generation they were built for, so a push session
//! that is still walking an older version can tell that it has been
//! superseded.
//!
//! ## The provided in-memory zone
//!
//! [`MemoryZone`] keeps its data in a [`NameTree`](tree::NameTree), an
//! arena whose nodes are addressed by index. Children are ordered
//! canonically, which lets a walk resume from "the child after label
//! L" without holding a borrow of the tree.
//!
//! [RFC 1035 § 6.1.2]: https://datatracker.ietf.org/doc/html/rfc1035#section-6.1.2

pub mod catalog;
mod error;
pub mod memory;
pub mod tree;
pub mod zone;

pub use catalog::{Catalog, ZoneEntry};
pub use error::Error;
pub use memory::MemoryZone;
pub use tree::NodeId;
pub use zone::{Credibility, StoredRecord, Zone, ZoneId, ZoneKind};
