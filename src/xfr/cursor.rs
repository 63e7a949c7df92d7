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

//! Implementation of the [`ZoneWalkCursor`], a resumable depth-first
//! walk over a zone's name tree.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::class::Class;
use crate::db::{Credibility, NodeId, StoredRecord, Zone};
use crate::name::LabelBuf;
use crate::rr::Type;

/// A resumable walk over the records of a zone in full-transfer
/// order, excluding the apex SOA.
///
/// At each name, NS records come first. A name owning NS records (other
/// than the apex) is a zone cut: the walk emits its NS and DS records,
/// then the glue the zone assigns to it (see [`Zone::glue_at`]), which
/// may lie elsewhere in the zone, and does not descend below it. Other
/// names have all of their records emitted, after which their children
/// are visited in canonical order.
///
/// The cursor holds only the records of the current name (or cut) and
/// a stack of frames recording how far each ancestor's children have
/// been walked. Nothing else grows as the walk proceeds. It never borrows the zone between calls, so it can be kept
/// in a session across suspension points.
pub struct ZoneWalkCursor<Z> {
    zone: Arc<Z>,
    class: Class,
    stack: Vec<Frame>,
    pending: VecDeque<Arc<StoredRecord>>,
}

/// A level of the walk: a node whose children are being visited, and
/// the label of the last child visited.
#[derive(Debug)]
struct Frame {
    node: NodeId,
    last_child: Option<LabelBuf>,
}

impl<Z: Zone> ZoneWalkCursor<Z> {
    /// Creates a cursor positioned at the first record after the apex
    /// SOA.
    pub fn new(zone: Arc<Z>, class: Class) -> Self {
        let apex = zone.apex();
        let mut cursor = Self {
            zone,
            class,
            stack: Vec::new(),
            pending: VecDeque::new(),
        };
        let records = cursor.zone.records_at(apex, class);
        cursor.queue_ordinary(records.into_iter().filter(|r| !r.record.is_soa()));
        cursor.stack.push(Frame {
            node: apex,
            last_child: None,
        });
        cursor
    }

    /// Returns the zone being walked.
    pub fn zone(&self) -> &Arc<Z> {
        &self.zone
    }

    /// Returns the record the cursor points at, without consuming it.
    pub fn peek(&mut self) -> Option<&Arc<StoredRecord>> {
        self.fill();
        self.pending.front()
    }

    /// Returns the record the cursor points at and advances past it.
    pub fn next_record(&mut self) -> Option<Arc<StoredRecord>> {
        self.fill();
        self.pending.pop_front()
    }

    /// Returns the depth of the walk (the number of frames held).
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Advances the walk until a record is pending or the walk is
    /// complete.
    fn fill(&mut self) {
        while self.pending.is_empty() && self.execute_state_machine() {}
    }

    /// Acts on the frame at the top of the stack. Returns `false` once
    /// the walk is complete.
    fn execute_state_machine(&mut self) -> bool {
        let top = match self.stack.last_mut() {
            Some(top) => top,
            None => return false,
        };
        match self.zone.child_after(top.node, top.last_child.as_ref()) {
            Some((label, child)) => {
                top.last_child = Some(label);
                self.visit(child);
            }
            None => {
                self.stack.pop();
            }
        }
        true
    }

    /// Queues the records of `node`, and pushes a frame for it unless
    /// it is a zone cut.
    fn visit(&mut self, node: NodeId) {
        let records = self.zone.records_at(node, self.class);
        let is_cut = records
            .iter()
            .any(|r| r.record.rr_type == Type::NS && r.credibility == Credibility::Authoritative);
        if is_cut {
            self.queue_cut(node, records);
        } else {
            self.queue_ordinary(records.into_iter());
            self.stack.push(Frame {
                node,
                last_child: None,
            });
        }
    }

    fn queue_ordinary(&mut self, records: impl Iterator<Item = Arc<StoredRecord>>) {
        let (ns, other): (Vec<_>, Vec<_>) = records.partition(|r| r.record.rr_type == Type::NS);
        self.pending.extend(ns);
        self.pending.extend(other);
    }

    fn queue_cut(&mut self, node: NodeId, records: Vec<Arc<StoredRecord>>) {
        self.queue_ordinary(
            records
                .into_iter()
                .filter(|r| r.credibility == Credibility::Authoritative),
        );
        for &glue in self.zone.glue_at(node) {
            self.pending.extend(
                self.zone
                    .records_at(glue, self.class)
                    .into_iter()
                    .filter(|r| r.credibility == Credibility::Glue),
            );
        }
    }
}

impl<Z: Zone> Iterator for ZoneWalkCursor<Z> {
    type Item = Arc<StoredRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
