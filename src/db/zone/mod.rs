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

//! The [`Zone`] trait and related types.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::class::Class;
use crate::name::{LabelBuf, Name};
use crate::rr::{Record, Soa, Type};

use super::tree::NodeId;

mod validation;

pub(super) use validation::{classify, NodeRole};

////////////////////////////////////////////////////////////////////////
// ZONE TRAIT                                                         //
////////////////////////////////////////////////////////////////////////

/// Trait for read access to a single version of a zone's data.
///
/// The interface is node-oriented: callers navigate the zone's name
/// tree with [`Zone::lookup_name`], [`Zone::children_of`], and
/// [`Zone::child_after`], and fetch the records at each node with
/// [`Zone::records_at`]. Node handles are only meaningful for the zone
/// object that produced them.
///
/// A `Zone` object is immutable. Updates produce a new object with a
/// new generation (see [`Catalog`](super::Catalog)).
pub trait Zone {
    /// Returns the zone's origin (the domain name of its apex).
    fn origin(&self) -> &Name;

    /// Returns the DNS class of the zone.
    fn class(&self) -> Class;

    /// Returns the generation this zone object was built for.
    fn generation(&self) -> u64;

    /// Returns the apex node.
    fn apex(&self) -> NodeId;

    /// Finds the node for `name`, if it exists in the zone.
    fn lookup_name(&self, name: &Name) -> Option<NodeId>;

    /// Returns the domain name of a node.
    fn node_name(&self, node: NodeId) -> &Name;

    /// Returns an iterator over the children of a node in canonical
    /// order.
    fn children_of(&self, node: NodeId) -> Box<dyn Iterator<Item = NodeId> + '_>;

    /// Returns the first child of `node` whose label sorts after
    /// `after` (or the first child, if `after` is `None`), along with
    /// its label. This lets a walk resume without borrowing the zone
    /// across suspension points.
    fn child_after(&self, node: NodeId, after: Option<&LabelBuf>) -> Option<(LabelBuf, NodeId)>;

    /// Returns the records at a node that match `class`. Only
    /// authoritative data and glue of this zone's generation are
    /// returned; cached data never is.
    fn records_at(&self, node: NodeId, class: Class) -> Vec<Arc<StoredRecord>>;

    /// Returns the nodes whose glue a full transfer emits right after
    /// the delegation at `cut`. Each node holding glue is listed under
    /// exactly one cut.
    fn glue_at(&self, cut: NodeId) -> &[NodeId];

    /// Returns the apex SOA record.
    fn soa_record(&self) -> &Arc<StoredRecord>;

    /// Returns the parsed apex SOA.
    fn soa(&self) -> &Soa;

    /// Returns the zone's serial.
    fn serial(&self) -> u32 {
        self.soa().serial
    }
}

////////////////////////////////////////////////////////////////////////
// STORED RECORDS                                                     //
////////////////////////////////////////////////////////////////////////

/// Identifies a zone within a [`Catalog`](super::Catalog).
pub type ZoneId = usize;

/// A record as held by the database: the record itself plus the zone
/// and generation it belongs to and its credibility.
///
/// Stored records are immutable and shared behind an [`Arc`], so an
/// in-flight transfer holding one is unaffected when the zone is
/// replaced.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredRecord {
    pub record: Record,
    pub zone_id: ZoneId,
    pub generation: u64,
    pub credibility: Credibility,
}

/// How much a stored record is to be trusted.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Credibility {
    /// Authoritative data of the zone, including delegation NS (and DS)
    /// records at zone cuts.
    Authoritative,

    /// Address records at or below a zone cut, needed to reach the
    /// delegated servers.
    Glue,

    /// Data learned from elsewhere. Never transferred.
    Cache,
}

/// Returns whether `rr_type` may serve as glue.
pub fn is_address_type(rr_type: Type) -> bool {
    rr_type == Type::A || rr_type == Type::AAAA
}

////////////////////////////////////////////////////////////////////////
// ZONE KINDS                                                         //
////////////////////////////////////////////////////////////////////////

/// The role a server plays for a zone.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ZoneKind {
    Primary,
    Secondary,
    Stub,
    Hint,
    Cache,
}

impl ZoneKind {
    /// Returns whether zones of this kind are transferred to peers.
    pub fn is_served(self) -> bool {
        matches!(self, Self::Primary | Self::Secondary)
    }
}

impl FromStr for ZoneKind {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("primary") || s.eq_ignore_ascii_case("master") {
            Ok(Self::Primary)
        } else if s.eq_ignore_ascii_case("secondary") || s.eq_ignore_ascii_case("slave") {
            Ok(Self::Secondary)
        } else if s.eq_ignore_ascii_case("stub") {
            Ok(Self::Stub)
        } else if s.eq_ignore_ascii_case("hint") {
            Ok(Self::Hint)
        } else if s.eq_ignore_ascii_case("cache") {
            Ok(Self::Cache)
        } else {
            Err("unknown zone kind")
        }
    }
}

impl fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Stub => "stub",
            Self::Hint => "hint",
            Self::Cache => "cache",
        })
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
