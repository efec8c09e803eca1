//! Immediate dominators of the virtual-root-extended object graph, via
//! Lengauer–Tarjan with path compression.
//!
//! A synthetic top node with an edge to every root turns the forest of roots
//! into a single-source problem. Node ids `0..N` are the reference-graph
//! ids; id `N` is the virtual root. Every pass is iterative with an explicit
//! stack, so the node cap bounds work rather than recursion depth.

use std::collections::HashMap;

use roaring::{RoaringBitmap, RoaringTreemap};
use tracing::{debug, warn};

use crate::error::{Error, HeapResult};
use crate::graph::ReferenceGraph;
use crate::roots::RootSet;

/// Hard cap on dominator-graph size, virtual root included. Past it the tree
/// is skipped and retained sizes stay equal to shallow sizes.
pub const MAX_DOMINATOR_NODES: usize = 500_000;

const NONE: u32 = u32::MAX;

/// The dominator tree over every object reachable from the root set, keyed
/// by address. Virtual-root bookkeeping is stripped: objects dominated
/// directly by the virtual root have no `immediate_dominator` entry and are
/// listed in [`DominatorTree::top_level`].
#[derive(Debug, Default)]
pub struct DominatorTree {
    idom: HashMap<u64, u64>,
    children: HashMap<u64, Vec<u64>>,
    top_level: Vec<u64>,
    reachable: RoaringTreemap,
}

impl DominatorTree {
    /// Nearest dominator of `address`, or `None` when the object sits
    /// directly under the virtual root or is unreachable.
    pub fn immediate_dominator(&self, address: u64) -> Option<u64> {
        self.idom.get(&address).copied()
    }

    /// Addresses whose immediate dominator is `address`, ascending.
    pub fn children(&self, address: u64) -> &[u64] {
        self.children.get(&address).map_or(&[], Vec::as_slice)
    }

    /// Objects dominated by nothing but the virtual root, ascending.
    pub fn top_level(&self) -> &[u64] {
        &self.top_level
    }

    pub fn is_reachable(&self, address: u64) -> bool {
        self.reachable.contains(address)
    }

    /// Number of objects reachable from the root set.
    pub fn reachable_count(&self) -> u64 {
        self.reachable.len()
    }

    pub(crate) fn build(graph: &ReferenceGraph, roots: &RootSet) -> HeapResult<Self> {
        let n = graph.len();
        if n + 1 > MAX_DOMINATOR_NODES {
            return Err(Error::GraphTooLarge {
                nodes: n + 1,
                cap: MAX_DOMINATOR_NODES,
            });
        }
        let total = n + 1;
        let root = n as u32;
        let root_edges: Vec<u32> = roots.iter().filter_map(|a| graph.node_of(a)).collect();
        let mut root_targets = RoaringBitmap::new();
        for &t in &root_edges {
            root_targets.insert(t);
        }

        let mut lt = Lengauer {
            parent: vec![NONE; total],
            semi: vec![NONE; total],
            vertex: Vec::with_capacity(total),
            ancestor: vec![NONE; total],
            label: (0..total as u32).collect(),
            idom: vec![NONE; total],
        };

        // Depth-first numbering from the virtual root.
        lt.semi[root as usize] = 0;
        lt.vertex.push(root);
        let mut stack: Vec<(u32, usize)> = vec![(root, 0)];
        while let Some((v, i)) = stack.pop() {
            let succs = if v == root {
                &root_edges[..]
            } else {
                graph.outgoing_nodes(v)
            };
            if i < succs.len() {
                stack.push((v, i + 1));
                let w = succs[i];
                if lt.semi[w as usize] == NONE {
                    lt.semi[w as usize] = lt.vertex.len() as u32;
                    lt.parent[w as usize] = v;
                    lt.vertex.push(w);
                    stack.push((w, 0));
                }
            }
        }
        let reached = lt.vertex.len();
        debug!(
            "dominator DFS reached {} of {} nodes from {} roots",
            reached - 1,
            n,
            root_edges.len()
        );

        // Semidominators and implicit idoms, in reverse DFS order.
        let mut buckets: Vec<Vec<u32>> = vec![Vec::new(); total];
        for i in (1..reached).rev() {
            let w = lt.vertex[i];
            let virtual_pred = root_targets.contains(w).then_some(root);
            for v in graph
                .incoming_nodes(w)
                .iter()
                .copied()
                .chain(virtual_pred)
            {
                if lt.semi[v as usize] == NONE {
                    // Predecessor never reached from the roots.
                    continue;
                }
                let u = lt.eval(v);
                if lt.semi[u as usize] < lt.semi[w as usize] {
                    lt.semi[w as usize] = lt.semi[u as usize];
                }
            }
            buckets[lt.vertex[lt.semi[w as usize] as usize] as usize].push(w);
            let p = lt.parent[w as usize];
            lt.ancestor[w as usize] = p;
            for v in std::mem::take(&mut buckets[p as usize]) {
                let u = lt.eval(v);
                lt.idom[v as usize] = if lt.semi[u as usize] < lt.semi[v as usize] {
                    u
                } else {
                    p
                };
            }
        }
        for i in 1..reached {
            let w = lt.vertex[i];
            if lt.idom[w as usize] != lt.vertex[lt.semi[w as usize] as usize] {
                lt.idom[w as usize] = lt.idom[lt.idom[w as usize] as usize];
            }
        }
        lt.idom[root as usize] = root;

        let mut tree = DominatorTree::default();
        for i in 1..reached {
            let v = lt.vertex[i];
            let addr = graph.address_of(v);
            tree.reachable.insert(addr);
            let d = lt.idom[v as usize];
            if d == root {
                tree.top_level.push(addr);
            } else {
                let dom_addr = graph.address_of(d);
                tree.idom.insert(addr, dom_addr);
                tree.children.entry(dom_addr).or_default().push(addr);
            }
        }
        tree.top_level.sort_unstable();
        for children in tree.children.values_mut() {
            children.sort_unstable();
        }
        Ok(tree)
    }
}

struct Lengauer {
    parent: Vec<u32>,
    /// DFS number before processing, semidominator number after.
    semi: Vec<u32>,
    vertex: Vec<u32>,
    ancestor: Vec<u32>,
    label: Vec<u32>,
    idom: Vec<u32>,
}

impl Lengauer {
    /// EVAL with iterative path compression. The ancestor chain of a
    /// well-formed run is acyclic; corrupt input could still produce a
    /// cycle, so the walk carries a visited set and cuts on the first
    /// repeat.
    fn eval(&mut self, v: u32) -> u32 {
        if self.ancestor[v as usize] == NONE {
            return v;
        }
        let mut path = Vec::new();
        let mut seen = RoaringBitmap::new();
        let mut u = v;
        while self.ancestor[self.ancestor[u as usize] as usize] != NONE {
            if !seen.insert(u) {
                warn!("cycle in dominator ancestor chain at node {u}");
                break;
            }
            path.push(u);
            u = self.ancestor[u as usize];
        }
        let chain_root = self.ancestor[u as usize];
        for &w in path.iter().rev() {
            let a = self.ancestor[w as usize];
            if self.semi[self.label[a as usize] as usize] < self.semi[self.label[w as usize] as usize]
            {
                self.label[w as usize] = self.label[a as usize];
            }
            self.ancestor[w as usize] = chain_root;
        }
        self.label[v as usize]
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::intern::Interner;
    use crate::object::{HeapObject, ObjectReference};

    fn build_tree(
        addresses: &[u64],
        edges: &[(u64, u64)],
        roots: &[u64],
    ) -> DominatorTree {
        let interner = Interner::new();
        let mut objects = HashMap::new();
        for &addr in addresses {
            objects.insert(
                addr,
                HeapObject {
                    address: addr,
                    type_name: interner.intern("T"),
                    shallow_size: 8,
                    generation: 0,
                    references: Vec::new(),
                    fields: None,
                    retained_size: 8,
                    gc_root_paths: Vec::new(),
                },
            );
        }
        for &(src, dst) in edges {
            let field = interner.intern("f");
            let ty = interner.intern("T");
            if let Some(obj) = objects.get_mut(&src) {
                obj.references.push(ObjectReference {
                    source_address: src,
                    target_address: dst,
                    field_name: field,
                    target_type: ty,
                });
            }
        }
        let graph = ReferenceGraph::build(&objects);
        let mut set = RootSet::default();
        for &r in roots {
            set.insert(r);
        }
        DominatorTree::build(&graph, &set).unwrap()
    }

    #[test]
    fn linear_chain() {
        let tree = build_tree(&[1, 2, 3], &[(1, 2), (2, 3)], &[1]);
        assert_eq!(tree.top_level(), &[1]);
        assert_eq!(tree.immediate_dominator(2), Some(1));
        assert_eq!(tree.immediate_dominator(3), Some(2));
        assert_eq!(tree.reachable_count(), 3);
    }

    #[test]
    fn diamond_joins_at_the_fork() {
        // A -> B -> D, A -> C -> D: neither branch dominates D.
        let tree = build_tree(&[1, 2, 3, 4], &[(1, 2), (1, 3), (2, 4), (3, 4)], &[1]);
        assert_eq!(tree.immediate_dominator(4), Some(1));
        assert_eq!(tree.immediate_dominator(2), Some(1));
        assert_eq!(tree.immediate_dominator(3), Some(1));
        // No child list carries duplicates.
        let children = tree.children(1);
        assert_eq!(children, &[2, 3, 4]);
    }

    #[test]
    fn cycle_resolves_to_the_entry() {
        let tree = build_tree(&[1, 2], &[(1, 2), (2, 1)], &[1]);
        assert_eq!(tree.immediate_dominator(2), Some(1));
        assert!(tree.immediate_dominator(1).is_none());
        assert_eq!(tree.top_level(), &[1]);
    }

    #[test]
    fn unreachable_nodes_have_no_entry() {
        let tree = build_tree(&[1, 2, 10, 11], &[(1, 2), (10, 11)], &[1]);
        assert!(tree.is_reachable(2));
        assert!(!tree.is_reachable(10));
        assert!(!tree.is_reachable(11));
        assert!(tree.immediate_dominator(11).is_none());
        assert_eq!(tree.reachable_count(), 2);
    }

    #[test]
    fn multiple_roots_sit_at_top_level() {
        let tree = build_tree(&[1, 2, 3], &[(1, 3), (2, 3)], &[1, 2]);
        // Both roots reach 3, so only the virtual root dominates it and it
        // surfaces as top-level alongside the roots themselves.
        assert_eq!(tree.top_level(), &[1, 2, 3]);
        assert!(tree.immediate_dominator(3).is_none());
        assert!(tree.is_reachable(3));
    }

    #[test]
    fn nested_diamonds() {
        //      1
        //     / \
        //    2   3
        //     \ /
        //      4
        //     / \
        //    5   6
        //     \ /
        //      7
        let edges = [(1, 2), (1, 3), (2, 4), (3, 4), (4, 5), (4, 6), (5, 7), (6, 7)];
        let tree = build_tree(&[1, 2, 3, 4, 5, 6, 7], &edges, &[1]);
        assert_eq!(tree.immediate_dominator(4), Some(1));
        assert_eq!(tree.immediate_dominator(5), Some(4));
        assert_eq!(tree.immediate_dominator(6), Some(4));
        assert_eq!(tree.immediate_dominator(7), Some(4));
    }

    #[test]
    fn oversized_graph_is_rejected() {
        let interner = Interner::new();
        let mut objects = HashMap::new();
        for addr in 1..=(MAX_DOMINATOR_NODES as u64) {
            objects.insert(
                addr,
                HeapObject {
                    address: addr,
                    type_name: interner.intern("T"),
                    shallow_size: 1,
                    generation: 0,
                    references: Vec::new(),
                    fields: None,
                    retained_size: 1,
                    gc_root_paths: Vec::new(),
                },
            );
        }
        let graph = ReferenceGraph::build(&objects);
        let mut set = RootSet::default();
        set.insert(1);
        let err = DominatorTree::build(&graph, &set).unwrap_err();
        assert!(matches!(err, Error::GraphTooLarge { .. }));
    }
}
