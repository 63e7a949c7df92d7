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

//! The [`NameTree`] structure, an arena holding the DNS tree below a
//! zone apex.
//!
//! Nodes are addressed by [`NodeId`] rather than by reference. Each
//! node maps the (case-folded) labels of its children to their indices
//! and records its parent as an index, so the tree has no internal
//! pointers. Children are kept in canonical order, which makes a walk
//! of the tree visit names in [RFC 4034 § 6.1] order and lets a walk
//! resume from "the child after label L" without holding a borrow of
//! the tree.
//!
//! [RFC 4034 § 6.1]: https://datatracker.ietf.org/doc/html/rfc4034#section-6.1

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::name::{LabelBuf, Name};

/// The index of a node in a [`NameTree`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(usize);

/// A node in a [`NameTree`]. This structure is generic over the type of
/// data to store at each node.
#[derive(Clone, Debug)]
struct Node<T> {
    name: Name,
    parent: Option<NodeId>,
    children: BTreeMap<LabelBuf, NodeId>,
    data: T,
}

/// An arena-allocated DNS tree rooted at an apex name.
#[derive(Clone, Debug)]
pub struct NameTree<T> {
    nodes: Vec<Node<T>>,
}

impl<T: Default> NameTree<T> {
    /// Creates a tree containing only the apex node.
    pub fn new(apex: Name) -> Self {
        Self {
            nodes: vec![Node {
                name: apex,
                parent: None,
                children: BTreeMap::new(),
                data: T::default(),
            }],
        }
    }

    /// Gets or creates the node for `name`, creating any missing nodes
    /// between it and the apex. Returns `None` if `name` is not equal
    /// to or a subdomain of the apex.
    pub fn get_or_create(&mut self, name: &Name) -> Option<NodeId> {
        let apex_len = self.nodes[0].name.len();
        if !name.eq_or_subdomain_of(&self.nodes[0].name) {
            return None;
        }
        let mut current = self.apex();
        for level in (0..name.len() - apex_len).rev() {
            let label = name.label_buf(level);
            current = match self.nodes[current.0].children.get(&label) {
                Some(child) => *child,
                None => {
                    let child = NodeId(self.nodes.len());
                    self.nodes.push(Node {
                        name: name.superdomain(level)?,
                        parent: Some(current),
                        children: BTreeMap::new(),
                        data: T::default(),
                    });
                    self.nodes[current.0].children.insert(label, child);
                    child
                }
            };
        }
        Some(current)
    }
}

#[allow(clippy::len_without_is_empty)] // A tree always has its apex.
impl<T> NameTree<T> {
    /// Returns the apex node.
    pub fn apex(&self) -> NodeId {
        NodeId(0)
    }

    /// Returns the number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Finds the node for `name`, if it exists.
    pub fn lookup(&self, name: &Name) -> Option<NodeId> {
        let apex_len = self.nodes[0].name.len();
        if !name.eq_or_subdomain_of(&self.nodes[0].name) {
            return None;
        }
        let mut current = self.apex();
        for level in (0..name.len() - apex_len).rev() {
            current = *self.nodes[current.0]
                .children
                .get(&name.label_buf(level))?;
        }
        Some(current)
    }

    /// Returns the domain name of a node.
    pub fn name(&self, node: NodeId) -> &Name {
        &self.nodes[node.0].name
    }

    /// Returns the parent of a node, or `None` for the apex.
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    /// Returns the data stored at a node.
    pub fn data(&self, node: NodeId) -> &T {
        &self.nodes[node.0].data
    }

    /// Returns the data stored at a node for modification.
    pub fn data_mut(&mut self, node: NodeId) -> &mut T {
        &mut self.nodes[node.0].data
    }

    /// Returns the first child of `node` (in canonical order) whose
    /// label sorts after `after`, or the first child if `after` is
    /// `None`.
    pub fn child_after(&self, node: NodeId, after: Option<&LabelBuf>) -> Option<(&LabelBuf, NodeId)> {
        let children = &self.nodes[node.0].children;
        let lower = match after {
            Some(label) => Bound::Excluded(label),
            None => Bound::Unbounded,
        };
        children
            .range::<LabelBuf, _>((lower, Bound::Unbounded))
            .next()
            .map(|(label, child)| (label, *child))
    }

    /// Returns an iterator over the children of `node` in canonical
    /// order.
    pub fn children(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[node.0].children.values().copied()
    }

    /// Returns an iterator over every node of the tree, in no
    /// particular order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Converts the data at every node, keeping the tree's shape and
    /// node indices.
    pub fn map_data<U, F>(self, mut f: F) -> NameTree<U>
    where
        F: FnMut(NodeId, T) -> U,
    {
        NameTree {
            nodes: self
                .nodes
                .into_iter()
                .enumerate()
                .map(|(i, node)| Node {
                    name: node.name,
                    parent: node.parent,
                    children: node.children,
                    data: f(NodeId(i), node.data),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(names: &[&str]) -> NameTree<Vec<&'static str>> {
        let mut tree: NameTree<Vec<&'static str>> = NameTree::new("example.".parse().unwrap());
        for name in names {
            tree.get_or_create(&name.parse().unwrap()).unwrap();
        }
        tree
    }

    #[test]
    fn intermediate_nodes_are_created() {
        let tree = build(&["a.b.c.example."]);
        assert_eq!(tree.len(), 4);
        let a = tree.lookup(&"A.b.c.example.".parse().unwrap()).unwrap();
        let b = tree.parent(tree.parent(a).unwrap()).unwrap();
        assert_eq!(tree.name(b), &"c.example.".parse().unwrap());
        assert_eq!(tree.parent(b), Some(tree.apex()));
    }

    #[test]
    fn names_outside_apex_are_rejected() {
        let mut tree = build(&[]);
        assert_eq!(tree.get_or_create(&"example.com.".parse().unwrap()), None);
        assert_eq!(tree.lookup(&".".parse().unwrap()), None);
        assert_eq!(tree.lookup(&"missing.example.".parse().unwrap()), None);
    }

    #[test]
    fn children_are_in_canonical_order() {
        let tree = build(&["z.example.", "A.example.", "b.example.", "\\001.example."]);
        let names: Vec<String> = tree
            .children(tree.apex())
            .map(|child| tree.name(child).to_string())
            .collect();
        assert_eq!(names, ["\\001.example.", "A.example.", "b.example.", "z.example."]);
    }

    #[test]
    fn child_after_resumes() {
        let tree = build(&["a.example.", "b.example.", "c.example."]);
        let apex = tree.apex();
        let (label, first) = tree.child_after(apex, None).unwrap();
        assert_eq!(tree.name(first), &"a.example.".parse().unwrap());
        let label = label.clone();
        let (label, second) = tree.child_after(apex, Some(&label)).unwrap();
        assert_eq!(tree.name(second), &"b.example.".parse().unwrap());
        let label = label.clone();
        let (label, _) = tree.child_after(apex, Some(&label)).unwrap();
        let label = label.clone();
        assert!(tree.child_after(apex, Some(&label)).is_none());
    }
}
