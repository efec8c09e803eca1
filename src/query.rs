//! The read-only query facade.
//!
//! Every operation here takes `&self`, never fails, and answers unknown
//! addresses or types with an empty result. Queries that need a derived
//! index build it on first use through the snapshot's lazy caches.

use std::collections::BTreeMap;

use either::Either;
use itertools::Itertools;
use roaring::RoaringBitmap;

use crate::error::HeapResult;
use crate::graph::ReferenceStats;
use crate::index::hierarchy::TypeHierarchyStats;
use crate::intern::Name;
use crate::object::{HeapObject, ObjectReference};
use crate::report::{HeapAnalysisReport, ObjectSummary, TypeStatistics, LARGEST_PER_TYPE};
use crate::scan::wildcard_regex;
use crate::snapshot::Snapshot;

impl Snapshot {
    pub fn get(&self, address: u64) -> Option<&HeapObject> {
        self.objects.get(&address)
    }

    /// Tracked objects of exactly `type_name`, in first-seen order. Does not
    /// trigger a lazy scan; see [`Snapshot::scan_type`] for that.
    pub fn by_type<'a>(&'a self, type_name: &str) -> impl Iterator<Item = &'a HeapObject> + 'a {
        match self.types.get(type_name) {
            Some(addrs) => Either::Left(addrs.iter().filter_map(|a| self.objects.get(a))),
            None => Either::Right(std::iter::empty()),
        }
    }

    /// Tracked type names matching a `*`/`?` wildcard pattern, in
    /// first-seen order.
    pub fn types_matching(&self, pattern: &str) -> HeapResult<Vec<Name>> {
        let re = wildcard_regex(pattern)?;
        Ok(self
            .types
            .keys()
            .filter(|name| re.is_match(name))
            .map(Name::clone)
            .collect())
    }

    pub fn type_statistics(&self, type_name: &str) -> TypeStatistics {
        let instances: Vec<&HeapObject> = self.by_type(type_name).collect();
        let instance_count = instances.len() as u64;
        let total_size: u64 = instances.iter().map(|o| o.shallow_size).sum();
        let total_retained_size: u64 = instances.iter().map(|o| o.retained_size).sum();
        let mut generation_distribution: BTreeMap<u32, u64> = BTreeMap::new();
        for obj in &instances {
            *generation_distribution.entry(obj.generation).or_default() += 1;
        }
        let largest_10: Vec<ObjectSummary> = instances
            .iter()
            .sorted_by(|a, b| {
                b.retained_size
                    .cmp(&a.retained_size)
                    .then_with(|| a.address.cmp(&b.address))
            })
            .take(LARGEST_PER_TYPE)
            .map(|o| ObjectSummary::of(o))
            .collect();
        TypeStatistics {
            type_name: type_name.to_string(),
            instance_count,
            total_size,
            total_retained_size,
            avg_size: if instance_count == 0 {
                0.0
            } else {
                total_size as f64 / instance_count as f64
            },
            generation_distribution,
            largest_10,
        }
    }

    /// Nominal rollup over every type sharing `type_name`'s base name.
    pub fn hierarchy_stats(&self, type_name: &str) -> TypeHierarchyStats {
        self.hierarchy().stats(type_name, &self.types, &self.objects)
    }

    /// The reference slots of `address`, in ingestion order. Empty for
    /// untracked addresses.
    pub fn outgoing_references(&self, address: u64) -> &[ObjectReference] {
        self.get(address).map_or(&[], |o| o.references.as_slice())
    }

    /// Every tracked reference pointing at `address`, ordered by referrer
    /// address. Served from the reference-graph index.
    pub fn incoming_references(&self, address: u64) -> Vec<ObjectReference> {
        let graph = self.reference_graph();
        let Some(node) = graph.node_of(address) else {
            return Vec::new();
        };
        let mut seen = RoaringBitmap::new();
        let mut out = Vec::new();
        for &src in graph.incoming_nodes(node) {
            if !seen.insert(src) {
                continue;
            }
            let Some(obj) = self.objects.get(&graph.address_of(src)) else {
                continue;
            };
            out.extend(
                obj.references
                    .iter()
                    .filter(|r| r.target_address == address)
                    .cloned(),
            );
        }
        out.sort_by_key(|r| r.source_address);
        out
    }

    /// Tracked objects whose address lies in `[lo, hi]`, ascending.
    pub fn objects_in_range(&self, lo: u64, hi: u64) -> Vec<&HeapObject> {
        self.resolve(self.spatial().range(lo, hi))
    }

    /// Tracked objects whose shallow size lies in `[lo, hi]`, ascending by
    /// address.
    pub fn size_range(&self, lo: u64, hi: u64) -> Vec<&HeapObject> {
        self.resolve(self.spatial().size_range(lo, hi))
    }

    /// Tracked objects within `prox` bytes of `address` on either side.
    pub fn nearby(&self, address: u64, prox: u64) -> Vec<&HeapObject> {
        self.resolve(self.spatial().nearby(address, prox))
    }

    /// Objects reachable from `address` within `max_depth` reference hops,
    /// in BFS depth order starting with the object itself.
    pub fn reachable(&self, address: u64, max_depth: u32) -> Vec<&HeapObject> {
        self.resolve(self.reference_graph().reachable(address, max_depth))
    }

    /// A shortest reference path from `from` to `to`, or empty when there
    /// is none.
    pub fn shortest_path(&self, from: u64, to: u64) -> Vec<&HeapObject> {
        self.resolve(self.reference_graph().shortest_path(from, to))
    }

    /// Per-object reference counts and depth. `is_likely_root` also honors
    /// the discovered root set once analysis has run.
    pub fn reference_stats(&self, address: u64) -> Option<ReferenceStats> {
        let mut stats = self.reference_graph().reference_stats(address)?;
        if let Some(roots) = self.root_set() {
            stats.is_likely_root = stats.is_likely_root || roots.contains(address);
        }
        Some(stats)
    }

    /// Referrers closer to a source-less object than `address`; a cheap
    /// approximation of the dominator query for interactive ordering.
    pub fn potential_dominators(&self, address: u64) -> Vec<&HeapObject> {
        self.resolve(self.reference_graph().potential_dominators(address))
    }

    pub fn report(&self) -> HeapAnalysisReport {
        crate::report::generate(self)
    }

    fn resolve(&self, addresses: Vec<u64>) -> Vec<&HeapObject> {
        addresses
            .into_iter()
            .filter_map(|a| self.objects.get(&a))
            .collect()
    }
}
