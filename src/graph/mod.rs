//! Reference-graph index: dense adjacency over tracked objects and the
//! traversal queries built on top of it.
//!
//! Nodes are integers in `[0, N)` assigned in ascending address order; the
//! snapshot owns the arena and every analysis works on borrowed indices.
//! Parallel edges are preserved (one per reference slot) so that in- and
//! out-degrees reflect the actual reference counts.

pub mod dominators;
pub(crate) mod retained;

use std::collections::{HashMap, VecDeque};
use std::sync::OnceLock;

use roaring::RoaringBitmap;
use serde::Serialize;

use crate::object::HeapObject;

/// Incoming references above this count flag an object as highly referenced.
pub const HIGHLY_REFERENCED_THRESHOLD: usize = 10;

/// Lightweight per-object reference numbers for UI ordering. The dominator
/// tree stays the authoritative structure for retained-size work;
/// `reference_depth` here is a plain BFS layering from source-less objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReferenceStats {
    pub outgoing_count: usize,
    pub incoming_count: usize,
    /// Length of the shortest reference chain from any object with no
    /// incoming references. `None` inside cycles no source-less object
    /// reaches.
    pub reference_depth: Option<u32>,
    pub is_likely_root: bool,
    pub is_highly_referenced: bool,
}

pub struct ReferenceGraph {
    /// Node id to address, ascending.
    nodes: Vec<u64>,
    node_of: HashMap<u64, u32>,
    outgoing: Vec<Vec<u32>>,
    incoming: Vec<Vec<u32>>,
    depths: OnceLock<Vec<Option<u32>>>,
}

impl ReferenceGraph {
    /// Build both adjacency directions from the tracked object set. Edges
    /// whose target is untracked are dropped here.
    pub(crate) fn build(objects: &HashMap<u64, HeapObject>) -> Self {
        let mut nodes: Vec<u64> = objects.keys().copied().collect();
        nodes.sort_unstable();
        let node_of: HashMap<u64, u32> = nodes
            .iter()
            .enumerate()
            .map(|(i, addr)| (*addr, i as u32))
            .collect();
        let mut outgoing = vec![Vec::new(); nodes.len()];
        let mut incoming = vec![Vec::new(); nodes.len()];
        for (src, addr) in nodes.iter().enumerate() {
            let Some(obj) = objects.get(addr) else { continue };
            for r in &obj.references {
                if let Some(&dst) = node_of.get(&r.target_address) {
                    outgoing[src].push(dst);
                    incoming[dst as usize].push(src as u32);
                }
            }
        }
        Self {
            nodes,
            node_of,
            outgoing,
            incoming,
            depths: OnceLock::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, address: u64) -> bool {
        self.node_of.contains_key(&address)
    }

    pub(crate) fn node_of(&self, address: u64) -> Option<u32> {
        self.node_of.get(&address).copied()
    }

    pub(crate) fn address_of(&self, node: u32) -> u64 {
        self.nodes[node as usize]
    }

    pub(crate) fn outgoing_nodes(&self, node: u32) -> &[u32] {
        &self.outgoing[node as usize]
    }

    pub(crate) fn incoming_nodes(&self, node: u32) -> &[u32] {
        &self.incoming[node as usize]
    }

    /// Addresses reachable from `start` within `max_depth` reference hops,
    /// in BFS depth order starting with `start` itself. Empty when `start`
    /// is untracked.
    pub fn reachable(&self, start: u64, max_depth: u32) -> Vec<u64> {
        let Some(start) = self.node_of(start) else {
            return Vec::new();
        };
        let mut visited = RoaringBitmap::new();
        visited.insert(start);
        let mut queue = VecDeque::from([(start, 0u32)]);
        let mut out = Vec::new();
        while let Some((node, depth)) = queue.pop_front() {
            out.push(self.address_of(node));
            if depth == max_depth {
                continue;
            }
            for &next in self.outgoing_nodes(node) {
                if visited.insert(next) {
                    queue.push_back((next, depth + 1));
                }
            }
        }
        out
    }

    /// The ordered address sequence of a shortest reference path from `from`
    /// to `to`, or empty when no path exists. `shortest_path(a, a)` is `[a]`
    /// for any tracked `a`.
    pub fn shortest_path(&self, from: u64, to: u64) -> Vec<u64> {
        let (Some(from), Some(to)) = (self.node_of(from), self.node_of(to)) else {
            return Vec::new();
        };
        if from == to {
            return vec![self.address_of(from)];
        }
        let mut prev: HashMap<u32, u32> = HashMap::new();
        let mut visited = RoaringBitmap::new();
        visited.insert(from);
        let mut queue = VecDeque::from([from]);
        'bfs: while let Some(node) = queue.pop_front() {
            for &next in self.outgoing_nodes(node) {
                if visited.insert(next) {
                    prev.insert(next, node);
                    if next == to {
                        break 'bfs;
                    }
                    queue.push_back(next);
                }
            }
        }
        if !visited.contains(to) {
            return Vec::new();
        }
        let mut path = vec![self.address_of(to)];
        let mut cursor = to;
        while let Some(&p) = prev.get(&cursor) {
            path.push(self.address_of(p));
            cursor = p;
        }
        path.reverse();
        path
    }

    /// BFS layer of `address` seeded from all source-less nodes. Not a
    /// dominator depth; see [`ReferenceStats::reference_depth`].
    pub fn reference_depth(&self, address: u64) -> Option<u32> {
        let node = self.node_of(address)?;
        self.depths()[node as usize]
    }

    pub fn reference_stats(&self, address: u64) -> Option<ReferenceStats> {
        let node = self.node_of(address)?;
        let incoming_count = self.incoming[node as usize].len();
        Some(ReferenceStats {
            outgoing_count: self.outgoing[node as usize].len(),
            incoming_count,
            reference_depth: self.depths()[node as usize],
            is_likely_root: incoming_count == 0,
            is_highly_referenced: incoming_count > HIGHLY_REFERENCED_THRESHOLD,
        })
    }

    /// Referrers sitting strictly closer to a source-less object than
    /// `address` itself: a cheap stand-in for the real dominator query,
    /// suitable for ordering candidates in a UI.
    pub fn potential_dominators(&self, address: u64) -> Vec<u64> {
        let Some(node) = self.node_of(address) else {
            return Vec::new();
        };
        let depths = self.depths();
        let Some(depth) = depths[node as usize] else {
            return Vec::new();
        };
        let mut seen = RoaringBitmap::new();
        let mut out: Vec<u64> = self.incoming[node as usize]
            .iter()
            .filter(|&&p| seen.insert(p))
            .filter(|&&p| matches!(depths[p as usize], Some(d) if d < depth))
            .map(|&p| self.address_of(p))
            .collect();
        out.sort_unstable();
        out
    }

    /// Multi-source BFS from every node with no incoming edges.
    fn depths(&self) -> &[Option<u32>] {
        self.depths.get_or_init(|| {
            let mut depths = vec![None; self.nodes.len()];
            let mut queue: VecDeque<u32> = VecDeque::new();
            for (node, preds) in self.incoming.iter().enumerate() {
                if preds.is_empty() {
                    depths[node] = Some(0);
                    queue.push_back(node as u32);
                }
            }
            while let Some(node) = queue.pop_front() {
                let next_depth = match depths[node as usize] {
                    Some(d) => d + 1,
                    None => continue,
                };
                for &next in &self.outgoing[node as usize] {
                    if depths[next as usize].is_none() {
                        depths[next as usize] = Some(next_depth);
                        queue.push_back(next);
                    }
                }
            }
            depths
        })
    }
}
