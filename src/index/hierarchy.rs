//! Nominal type-hierarchy rollups.
//!
//! Grouping is by name pattern only: generic arguments and array suffixes
//! are stripped, and nested-type names (`Outer+Inner`) additionally roll up
//! under their outer type. The runtime's real subtype relation is not
//! recoverable post-mortem without extra metadata, so none is claimed.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Serialize;

use crate::intern::Name;
use crate::object::HeapObject;

/// Aggregate over a type and everything that rolls up under its base name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeHierarchyStats {
    pub type_name: String,
    pub direct_instances: u64,
    pub total_instances_including_derived: u64,
    pub direct_size: u64,
    pub total_size_including_derived: u64,
    /// Concrete names other than the queried one sharing its base,
    /// ascending.
    pub derived_types: Vec<String>,
}

/// Base name of a type: everything before the first `<` or `[`.
pub fn simplify_type_name(name: &str) -> &str {
    match name.find(['<', '[']) {
        Some(cut) => &name[..cut],
        None => name,
    }
}

#[derive(Debug)]
pub struct TypeHierarchy {
    /// Simplified base name to the concrete type names beneath it, sorted.
    buckets: HashMap<String, Vec<Name>>,
}

impl TypeHierarchy {
    pub(crate) fn build(types: &IndexMap<Name, Vec<u64>>) -> Self {
        let mut buckets: HashMap<String, Vec<Name>> = HashMap::new();
        for name in types.keys() {
            let base = simplify_type_name(name);
            buckets
                .entry(base.to_string())
                .or_default()
                .push(Name::clone(name));
            // Nested types also answer for their outer type.
            if let Some(plus) = base.find('+') {
                buckets
                    .entry(base[..plus].to_string())
                    .or_default()
                    .push(Name::clone(name));
            }
        }
        for names in buckets.values_mut() {
            names.sort_unstable();
            names.dedup();
        }
        Self { buckets }
    }

    /// Every concrete type name rolled up under the base of `type_name`.
    pub fn concrete_types(&self, type_name: &str) -> &[Name] {
        self.buckets
            .get(simplify_type_name(type_name))
            .map_or(&[], Vec::as_slice)
    }

    pub(crate) fn stats(
        &self,
        type_name: &str,
        types: &IndexMap<Name, Vec<u64>>,
        objects: &HashMap<u64, HeapObject>,
    ) -> TypeHierarchyStats {
        let mut stats = TypeHierarchyStats {
            type_name: type_name.to_string(),
            direct_instances: 0,
            total_instances_including_derived: 0,
            direct_size: 0,
            total_size_including_derived: 0,
            derived_types: Vec::new(),
        };
        let sum_sizes = |addrs: &[u64]| -> u64 {
            addrs
                .iter()
                .filter_map(|a| objects.get(a))
                .map(|o| o.shallow_size)
                .sum()
        };
        if let Some(addrs) = types.get(type_name) {
            stats.direct_instances = addrs.len() as u64;
            stats.direct_size = sum_sizes(addrs);
        }
        for name in self.concrete_types(type_name) {
            let Some(addrs) = types.get(name) else { continue };
            stats.total_instances_including_derived += addrs.len() as u64;
            stats.total_size_including_derived += sum_sizes(addrs);
            if &**name != type_name {
                stats.derived_types.push(name.to_string());
            }
        }
        stats
    }
}
