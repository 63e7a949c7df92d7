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

//! The [`MemoryZone`] structure.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, warn};

use crate::class::Class;
use crate::name::{LabelBuf, Name};
use crate::rr::{Record, Soa, Type};
use crate::xfr::delta::{Delta, Op};

use super::tree::{NameTree, NodeId};
use super::zone::{classify, Credibility, NodeRole, StoredRecord, Zone, ZoneId};
use super::Error;

/// An in-memory [`Zone`] backed by an arena [`NameTree`].
///
/// A `MemoryZone` is built in one step from a complete set of records
/// and is immutable afterwards. [`MemoryZone::apply`] produces a new
/// zone rather than modifying an existing one.
#[derive(Debug)]
pub struct MemoryZone {
    id: ZoneId,
    origin: Name,
    class: Class,
    generation: u64,
    tree: NameTree<Vec<Arc<StoredRecord>>>,
    soa_record: Arc<StoredRecord>,
    soa: Soa,
    n_records: usize,
    glue: HashMap<NodeId, Vec<NodeId>>,
}

impl MemoryZone {
    /// Builds a zone from its records.
    ///
    /// Every record must be in the zone's class and at or below its
    /// origin, and exactly one SOA record must be present at the apex.
    /// Exact duplicates are dropped, as is occluded data below zone
    /// cuts.
    pub fn build<I>(
        id: ZoneId,
        origin: Name,
        class: Class,
        generation: u64,
        records: I,
    ) -> Result<Self, Error>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut staging: NameTree<Vec<Record>> = NameTree::new(origin.clone());
        for record in records {
            if record.class != class {
                return Err(Error::WrongClass(record.owner, record.class));
            }
            let node = match staging.get_or_create(&record.owner) {
                Some(node) => node,
                None => return Err(Error::OutOfZone(record.owner)),
            };
            let existing = staging.data_mut(node);
            if existing.iter().any(|r| r.same_data(&record)) {
                debug!("dropping duplicate record {:?}", record);
            } else {
                existing.push(record);
            }
        }

        let apex = staging.apex();
        let mut soas = staging.data(apex).iter().filter(|r| r.is_soa());
        let soa = match soas.next() {
            Some(record) => Soa::from_rdata(&record.rdata).map_err(|_| Error::InvalidSoa)?,
            None => return Err(Error::MissingSoa),
        };
        if soas.next().is_some() {
            return Err(Error::MultipleSoa);
        }
        if !staging.data(apex).iter().any(|r| r.rr_type == Type::NS) {
            warn!("zone {} has no NS records at its apex", origin);
        }

        let roles: HashMap<NodeId, NodeRole> = staging
            .nodes()
            .map(|node| (node, NodeRole::of(&staging, node)))
            .collect();
        let tree: NameTree<Vec<Arc<StoredRecord>>> = staging.map_data(|node, records| {
            let role = roles[&node];
            records
                .into_iter()
                .filter_map(|record| match classify(role, &record) {
                    Some(credibility) => Some(Arc::new(StoredRecord {
                        record,
                        zone_id: id,
                        generation,
                        credibility,
                    })),
                    None => {
                        warn!("dropping occluded record {:?}", record);
                        None
                    }
                })
                .collect()
        });

        // The SOA was found above, and apex data is never occluded.
        let soa_record = tree
            .data(tree.apex())
            .iter()
            .find(|r| r.record.is_soa())
            .cloned()
            .ok_or(Error::MissingSoa)?;
        let n_records = tree.nodes().map(|node| tree.data(node).len()).sum();
        let glue = plan_glue(&tree, &roles);

        Ok(Self {
            id,
            origin,
            class,
            generation,
            tree,
            soa_record,
            soa,
            n_records,
            glue,
        })
    }

    /// Returns the zone's identifier.
    pub fn id(&self) -> ZoneId {
        self.id
    }

    /// Returns the number of records in the zone.
    #[allow(clippy::len_without_is_empty)] // A zone always has its SOA.
    pub fn len(&self) -> usize {
        self.n_records
    }

    /// Returns an iterator over every record in the zone, in no
    /// particular order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.tree
            .nodes()
            .flat_map(move |node| self.tree.data(node).iter().map(|r| &r.record))
    }

    /// Produces the zone that results from applying `delta`, with the
    /// given generation.
    ///
    /// The delta must start at this zone's serial, and every record it
    /// deletes (other than the SOA) must be present. The SOA is
    /// replaced by the delta's added SOA, or by this zone's SOA with the
    /// delta's final serial if the delta carries none.
    pub fn apply(&self, delta: &Delta, generation: u64) -> Result<Self, Error> {
        if delta.from_serial != self.soa.serial {
            return Err(Error::DeltaMismatch {
                expected: self.soa.serial,
                found: delta.from_serial,
            });
        }

        let mut records: Vec<Record> = self.records().filter(|r| !r.is_soa()).cloned().collect();
        for change in delta.changes.iter().filter(|c| !c.record.is_soa()) {
            match change.op {
                Op::Delete => match records.iter().position(|r| r.same_data(&change.record)) {
                    Some(index) => {
                        records.remove(index);
                    }
                    None => return Err(Error::MissingDeletion(change.record.owner.clone())),
                },
                Op::Add => records.push(change.record.clone()),
            }
        }
        let soa = match delta.added_soa() {
            Some(record) => record.clone(),
            None => Record::new_soa(
                self.origin.clone(),
                self.class,
                self.soa_record.record.ttl,
                &self.soa.with_serial(delta.to_serial),
            ),
        };
        records.push(soa);

        Self::build(self.id, self.origin.clone(), self.class, generation, records)
    }
}

/// Decides at which cut each node holding glue has its glue emitted
/// during a full transfer.
///
/// Glue named by a cut's NS records goes with the first such cut in
/// canonical order, even when it lies below a different cut. Glue that
/// no NS record names goes with the cut above it.
fn plan_glue(
    tree: &NameTree<Vec<Arc<StoredRecord>>>,
    roles: &HashMap<NodeId, NodeRole>,
) -> HashMap<NodeId, Vec<NodeId>> {
    let has_glue = |node: NodeId| {
        tree.data(node)
            .iter()
            .any(|r| r.credibility == Credibility::Glue)
    };
    let mut cuts: Vec<NodeId> = tree
        .nodes()
        .filter(|node| roles[node] == NodeRole::Cut)
        .collect();
    cuts.sort_by(|a, b| tree.name(*a).cmp(tree.name(*b)));

    let mut plan: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut planned = HashSet::new();
    for &cut in &cuts {
        let targets = tree
            .data(cut)
            .iter()
            .filter(|r| r.record.rr_type == Type::NS)
            .filter_map(|r| Name::try_from_uncompressed_all(&r.record.rdata).ok());
        for target in targets {
            if let Some(node) = tree.lookup(&target) {
                if has_glue(node) && planned.insert(node) {
                    plan.entry(cut).or_default().push(node);
                }
            }
        }
    }

    let mut unnamed: Vec<NodeId> = tree
        .nodes()
        .filter(|node| has_glue(*node) && !planned.contains(node))
        .collect();
    unnamed.sort_by(|a, b| tree.name(*a).cmp(tree.name(*b)));
    for node in unnamed {
        let mut current = Some(node);
        while let Some(candidate) = current {
            if roles[&candidate] == NodeRole::Cut {
                plan.entry(candidate).or_default().push(node);
                break;
            }
            current = tree.parent(candidate);
        }
    }
    plan
}

impl Zone for MemoryZone {
    fn origin(&self) -> &Name {
        &self.origin
    }

    fn class(&self) -> Class {
        self.class
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn apex(&self) -> NodeId {
        self.tree.apex()
    }

    fn lookup_name(&self, name: &Name) -> Option<NodeId> {
        self.tree.lookup(name)
    }

    fn node_name(&self, node: NodeId) -> &Name {
        self.tree.name(node)
    }

    fn children_of(&self, node: NodeId) -> Box<dyn Iterator<Item = NodeId> + '_> {
        Box::new(self.tree.children(node))
    }

    fn child_after(&self, node: NodeId, after: Option<&LabelBuf>) -> Option<(LabelBuf, NodeId)> {
        self.tree
            .child_after(node, after)
            .map(|(label, child)| (label.clone(), child))
    }

    fn records_at(&self, node: NodeId, class: Class) -> Vec<Arc<StoredRecord>> {
        self.tree
            .data(node)
            .iter()
            .filter(|r| {
                r.record.class == class
                    && r.generation == self.generation
                    && r.credibility != Credibility::Cache
            })
            .cloned()
            .collect()
    }

    fn glue_at(&self, cut: NodeId) -> &[NodeId] {
        self.glue.get(&cut).map_or(&[], Vec::as_slice)
    }

    fn soa_record(&self) -> &Arc<StoredRecord> {
        &self.soa_record
    }

    fn soa(&self) -> &Soa {
        &self.soa
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::rr::Ttl;
    use crate::xfr::delta::Change;

    pub fn soa_record(origin: &str, serial: u32) -> Record {
        let soa = Soa {
            mname: format!("ns1.{}", origin).parse().unwrap(),
            rname: format!("hostmaster.{}", origin).parse().unwrap(),
            serial,
            refresh: 3600,
            retry: 900,
            expire: 604800,
            minimum: 300,
        };
        Record::new_soa(origin.parse().unwrap(), Class::IN, Ttl::from(3600), &soa)
    }

    pub fn a_record(owner: &str, octet: u8) -> Record {
        Record {
            owner: owner.parse().unwrap(),
            rr_type: Type::A,
            class: Class::IN,
            ttl: Ttl::from(3600),
            rdata: vec![192, 0, 2, octet].into(),
        }
    }

    pub fn ns_record(owner: &str, target: &str) -> Record {
        let target: Name = target.parse().unwrap();
        Record {
            owner: owner.parse().unwrap(),
            rr_type: Type::NS,
            class: Class::IN,
            ttl: Ttl::from(3600),
            rdata: target.wire_repr().into(),
        }
    }

    pub fn txt_record(owner: &str, text: &str) -> Record {
        let mut rdata = vec![text.len() as u8];
        rdata.extend_from_slice(text.as_bytes());
        Record {
            owner: owner.parse().unwrap(),
            rr_type: Type::TXT,
            class: Class::IN,
            ttl: Ttl::from(3600),
            rdata: rdata.into(),
        }
    }

    /// A small zone with one delegation. Serial 10.
    pub fn example_records(serial: u32) -> Vec<Record> {
        vec![
            soa_record("example.", serial),
            ns_record("example.", "ns1.example."),
            ns_record("example.", "ns2.example."),
            a_record("ns1.example.", 1),
            a_record("ns2.example.", 2),
            a_record("www.example.", 80),
            txt_record("www.example.", "hello"),
            ns_record("sub.example.", "ns.sub.example."),
            ns_record("sub.example.", "ns.other.example."),
            a_record("ns.sub.example.", 53),
            txt_record("occluded.sub.example.", "hidden"),
            a_record("ns.other.example.", 54),
        ]
    }

    fn build(records: Vec<Record>) -> Result<MemoryZone, Error> {
        MemoryZone::build(0, "example.".parse().unwrap(), Class::IN, 1, records)
    }

    #[test]
    fn build_classifies_records() {
        let zone = build(example_records(10)).unwrap();
        assert_eq!(zone.serial(), 10);
        assert_eq!(zone.len(), 11);

        let sub = zone.lookup_name(&"sub.example.".parse().unwrap()).unwrap();
        let records = zone.records_at(sub, Class::IN);
        assert_eq!(records.len(), 2);
        assert!(records
            .iter()
            .all(|r| r.credibility == Credibility::Authoritative));

        let glue = zone.lookup_name(&"ns.sub.example.".parse().unwrap()).unwrap();
        let records = zone.records_at(glue, Class::IN);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].credibility, Credibility::Glue);

        let occluded = zone
            .lookup_name(&"occluded.sub.example.".parse().unwrap())
            .unwrap();
        assert!(zone.records_at(occluded, Class::IN).is_empty());
    }

    #[test]
    fn build_rejects_bad_data() {
        assert_eq!(build(vec![a_record("www.example.", 1)]).unwrap_err(), Error::MissingSoa);
        assert_eq!(
            build(vec![soa_record("example.", 1), soa_record("example.", 2)]).unwrap_err(),
            Error::MultipleSoa
        );
        assert!(matches!(
            build(vec![soa_record("example.", 1), a_record("www.example.com.", 1)]),
            Err(Error::OutOfZone(_))
        ));
        let mut chaos = a_record("www.example.", 1);
        chaos.class = Class::CH;
        assert!(matches!(
            build(vec![soa_record("example.", 1), chaos]),
            Err(Error::WrongClass(_, Class::CH))
        ));
    }

    #[test]
    fn build_drops_duplicates() {
        let zone = build(vec![
            soa_record("example.", 1),
            a_record("www.example.", 1),
            a_record("WWW.example.", 1),
        ])
        .unwrap();
        assert_eq!(zone.len(), 2);
    }

    #[test]
    fn records_at_filters_class() {
        let zone = build(example_records(10)).unwrap();
        let www = zone.lookup_name(&"www.example.".parse().unwrap()).unwrap();
        assert_eq!(zone.records_at(www, Class::IN).len(), 2);
        assert!(zone.records_at(www, Class::CH).is_empty());
    }

    #[test]
    fn apply_produces_new_version() {
        let zone = build(example_records(10)).unwrap();
        let delta = Delta {
            from_serial: 10,
            to_serial: 11,
            changes: vec![
                Change::delete(soa_record("example.", 10)),
                Change::delete(a_record("www.example.", 80)),
                Change::add(soa_record("example.", 11)),
                Change::add(a_record("www.example.", 81)),
            ],
        };
        let updated = zone.apply(&delta, 2).unwrap();
        assert_eq!(updated.serial(), 11);
        assert_eq!(updated.generation(), 2);
        assert_eq!(updated.len(), zone.len());
        assert!(updated.records().any(|r| r.same_data(&a_record("www.example.", 81))));
        assert!(!updated.records().any(|r| r.same_data(&a_record("www.example.", 80))));
    }

    #[test]
    fn apply_checks_delta() {
        let zone = build(example_records(10)).unwrap();
        let wrong_start = Delta {
            from_serial: 9,
            to_serial: 11,
            changes: vec![],
        };
        assert_eq!(
            zone.apply(&wrong_start, 2).unwrap_err(),
            Error::DeltaMismatch {
                expected: 10,
                found: 9
            }
        );
        let missing = Delta {
            from_serial: 10,
            to_serial: 11,
            changes: vec![Change::delete(a_record("missing.example.", 1))],
        };
        assert!(matches!(zone.apply(&missing, 2), Err(Error::MissingDeletion(_))));
    }

    #[test]
    fn apply_synthesizes_soa() {
        let zone = build(example_records(10)).unwrap();
        let delta = Delta {
            from_serial: 10,
            to_serial: 12,
            changes: vec![Change::add(a_record("new.example.", 9))],
        };
        let updated = zone.apply(&delta, 2).unwrap();
        assert_eq!(updated.serial(), 12);
        assert_eq!(updated.soa().mname, zone.soa().mname);
    }
}
