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

//! Classification of zone data at build time.
//!
//! [RFC 1035 § 5.2] (corrected by [Erratum 5626]) indicates that a zone
//! should be checked for semantic errors. The checks relevant to
//! transfers are:
//!
//! 1. All RRs must have the same class.
//! 2. Exactly one SOA record must be present at the zone apex.
//! 3. Non-authoritative information must be glue information, not
//!    the result of a mistake.
//! 4. ([Erratum 5626]) At least one NS record should be present at the
//!    zone apex.
//!
//! Checks 1 and 2 are errors and are enforced when a
//! [`MemoryZone`](crate::db::MemoryZone) is built. Check 3 decides the
//! [`Credibility`] of each record: NS records at a cut (and the DS
//! records that go with them) are authoritative, address records at or
//! below a cut are glue, and anything else below a cut is occluded and
//! dropped. Check 4 produces only a warning.
//!
//! [RFC 1035 § 5.2]: https://datatracker.ietf.org/doc/html/rfc1035#section-5.2
//! [Erratum 5626]: https://www.rfc-editor.org/errata/eid5626

use crate::rr::{Record, Type};

use super::super::tree::{NameTree, NodeId};
use super::{is_address_type, Credibility};

/// Where a node sits relative to the zone's cuts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeRole {
    /// The zone apex.
    Apex,

    /// An ordinary node with authoritative data.
    Interior,

    /// A non-apex node that owns NS records.
    Cut,

    /// A node below a cut.
    Occluded,
}

impl NodeRole {
    /// Determines the role of `node` in a tree of unclassified records.
    pub fn of(tree: &NameTree<Vec<Record>>, node: NodeId) -> Self {
        if node == tree.apex() {
            return Self::Apex;
        }
        let mut ancestor = tree.parent(node);
        while let Some(current) = ancestor {
            if current == tree.apex() {
                break;
            } else if owns_ns(tree, current) {
                return Self::Occluded;
            }
            ancestor = tree.parent(current);
        }
        if owns_ns(tree, node) {
            Self::Cut
        } else {
            Self::Interior
        }
    }

    /// Returns the credibility that a record of type `rr_type` has at a
    /// node of this role, or `None` if the record is occluded.
    pub fn credibility(self, rr_type: Type) -> Option<Credibility> {
        match self {
            Self::Apex | Self::Interior => Some(Credibility::Authoritative),
            Self::Cut if rr_type == Type::NS || rr_type == Type::DS => {
                Some(Credibility::Authoritative)
            }
            Self::Cut | Self::Occluded if is_address_type(rr_type) => Some(Credibility::Glue),
            Self::Cut | Self::Occluded => None,
        }
    }
}

fn owns_ns(tree: &NameTree<Vec<Record>>, node: NodeId) -> bool {
    tree.data(node).iter().any(|r| r.rr_type == Type::NS)
}

/// Classifies a record at `node`. This is the entry point used while
/// building a zone.
pub fn classify(role: NodeRole, record: &Record) -> Option<Credibility> {
    role.credibility(record.rr_type)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::Class;
    use crate::rr::Ttl;

    fn record(owner: &str, rr_type: Type) -> Record {
        Record {
            owner: owner.parse().unwrap(),
            rr_type,
            class: Class::IN,
            ttl: Ttl::from(3600),
            rdata: vec![127, 0, 0, 1].into(),
        }
    }

    fn tree(records: &[Record]) -> NameTree<Vec<Record>> {
        let mut tree: NameTree<Vec<Record>> = NameTree::new("example.".parse().unwrap());
        for record in records {
            let node = tree.get_or_create(&record.owner).unwrap();
            tree.data_mut(node).push(record.clone());
        }
        tree
    }

    #[test]
    fn roles_are_determined() {
        let tree = tree(&[
            record("example.", Type::NS),
            record("www.example.", Type::A),
            record("sub.example.", Type::NS),
            record("ns.sub.example.", Type::A),
        ]);
        let role = |name: &str| NodeRole::of(&tree, tree.lookup(&name.parse().unwrap()).unwrap());
        assert_eq!(role("example."), NodeRole::Apex);
        assert_eq!(role("www.example."), NodeRole::Interior);
        assert_eq!(role("sub.example."), NodeRole::Cut);
        assert_eq!(role("ns.sub.example."), NodeRole::Occluded);
    }

    #[test]
    fn credibility_follows_role() {
        assert_eq!(
            classify(NodeRole::Cut, &record("sub.example.", Type::NS)),
            Some(Credibility::Authoritative)
        );
        assert_eq!(
            classify(NodeRole::Cut, &record("sub.example.", Type::A)),
            Some(Credibility::Glue)
        );
        assert_eq!(classify(NodeRole::Cut, &record("sub.example.", Type::MX)), None);
        assert_eq!(
            classify(NodeRole::Occluded, &record("ns.sub.example.", Type::AAAA)),
            Some(Credibility::Glue)
        );
        assert_eq!(classify(NodeRole::Occluded, &record("x.sub.example.", Type::TXT)), None);
        assert_eq!(
            classify(NodeRole::Interior, &record("www.example.", Type::TXT)),
            Some(Credibility::Authoritative)
        );
    }
}
