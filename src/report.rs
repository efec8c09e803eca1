//! Immutable analysis reports.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;
use uuid::Uuid;

use crate::object::HeapObject;
use crate::snapshot::{AnalysisFlags, Snapshot};

/// How many objects the report lists by descending retained size.
pub const TOP_OBJECT_COUNT: usize = 50;

/// How many instances `TypeStatistics::largest_10` carries.
pub(crate) const LARGEST_PER_TYPE: usize = 10;

/// A detached, serializable view of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectSummary {
    pub address: u64,
    pub type_name: String,
    pub shallow_size: u64,
    pub retained_size: u64,
    pub generation: u32,
}

impl ObjectSummary {
    pub(crate) fn of(obj: &HeapObject) -> Self {
        Self {
            address: obj.address,
            type_name: obj.type_name.to_string(),
            shallow_size: obj.shallow_size,
            retained_size: obj.retained_size,
            generation: obj.generation,
        }
    }
}

/// Aggregate numbers for one exact type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeStatistics {
    pub type_name: String,
    pub instance_count: u64,
    pub total_size: u64,
    pub total_retained_size: u64,
    pub avg_size: f64,
    /// Instance count per generation.
    pub generation_distribution: BTreeMap<u32, u64>,
    /// The up-to-ten largest instances by retained size, descending.
    pub largest_10: Vec<ObjectSummary>,
}

/// Rollup over one GC generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GenerationStatistics {
    pub generation: u32,
    pub object_count: u64,
    pub total_size: u64,
    pub total_retained_size: u64,
}

/// The full analysis report: per-type statistics by descending retained
/// size, per-generation rollups, and the largest objects on the heap.
#[derive(Debug, Clone, Serialize)]
pub struct HeapAnalysisReport {
    pub snapshot_id: Uuid,
    pub snapshot_time: DateTime<Utc>,
    pub process_id: u32,
    pub total_objects: u64,
    pub total_memory: u64,
    pub type_statistics: Vec<TypeStatistics>,
    pub generation_statistics: Vec<GenerationStatistics>,
    pub largest_objects: Vec<ObjectSummary>,
    /// Objects the root set does not reach; priced at shallow size.
    pub unreachable_objects: u64,
    pub unreachable_bytes: u64,
    pub flags: AnalysisFlags,
}

pub(crate) fn generate(snapshot: &Snapshot) -> HeapAnalysisReport {
    let type_statistics: Vec<TypeStatistics> = snapshot
        .types
        .keys()
        .map(|name| snapshot.type_statistics(name))
        .sorted_by(|a, b| {
            b.total_retained_size
                .cmp(&a.total_retained_size)
                .then_with(|| a.type_name.cmp(&b.type_name))
        })
        .collect();

    let mut generations: BTreeMap<u32, GenerationStatistics> = BTreeMap::new();
    for obj in snapshot.objects.values() {
        let entry = generations
            .entry(obj.generation)
            .or_insert(GenerationStatistics {
                generation: obj.generation,
                object_count: 0,
                total_size: 0,
                total_retained_size: 0,
            });
        entry.object_count += 1;
        entry.total_size += obj.shallow_size;
        entry.total_retained_size += obj.retained_size;
    }

    let largest_objects: Vec<ObjectSummary> = snapshot
        .objects
        .values()
        .sorted_by(|a, b| {
            b.retained_size
                .cmp(&a.retained_size)
                .then_with(|| a.address.cmp(&b.address))
        })
        .take(TOP_OBJECT_COUNT)
        .map(ObjectSummary::of)
        .collect();

    let (unreachable_objects, unreachable_bytes) = match snapshot.dominator_tree() {
        Some(tree) => snapshot
            .objects
            .values()
            .filter(|o| !tree.is_reachable(o.address))
            .fold((0u64, 0u64), |(n, bytes), o| {
                (n + 1, bytes + o.shallow_size)
            }),
        None => (0, 0),
    };

    let flags = snapshot.analysis.clone().unwrap_or_else(|| AnalysisFlags {
        // No analysis has run: everything retained is just shallow.
        retained_is_approximate: true,
        roots_via_refcount: false,
        references_truncated_count: snapshot.ingest_stats.truncated_references,
    });

    HeapAnalysisReport {
        snapshot_id: snapshot.id,
        snapshot_time: snapshot.captured_at,
        process_id: snapshot.process_id,
        total_objects: snapshot.objects.len() as u64,
        total_memory: snapshot.total_memory(),
        type_statistics,
        generation_statistics: generations.into_values().collect(),
        largest_objects,
        unreachable_objects,
        unreachable_bytes,
        flags,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::source::{RawObject, VecSource};

    #[test]
    fn empty_snapshot_reports_zeroed_aggregates() {
        let mut snapshot = Snapshot::new(7, Arc::new(VecSource::default()));
        snapshot.ingest().unwrap();
        let report = snapshot.report();
        assert_eq!(report.process_id, 7);
        assert_eq!(report.total_objects, 0);
        assert_eq!(report.total_memory, 0);
        assert!(report.type_statistics.is_empty());
        assert!(report.generation_statistics.is_empty());
        assert!(report.largest_objects.is_empty());
        assert!(report.flags.retained_is_approximate);
    }

    #[test]
    fn report_orders_types_by_retained_size() {
        let source = VecSource::new(vec![
            RawObject::new(0x100, "Small", 8),
            RawObject::new(0x200, "Big", 4096),
            RawObject::new(0x300, "Big", 4096),
        ]);
        let mut snapshot = Snapshot::new(1, Arc::new(source));
        snapshot.ingest().unwrap();
        snapshot.analyze();
        let report = snapshot.report();
        assert_eq!(report.type_statistics[0].type_name, "Big");
        assert_eq!(report.type_statistics[0].total_retained_size, 8192);
        assert_eq!(report.type_statistics[1].type_name, "Small");
        assert_eq!(report.largest_objects[0].retained_size, 4096);
        assert_eq!(report.total_memory, 8 + 8192);
    }

    #[test]
    fn generation_rollups_are_ascending() {
        let source = VecSource::new(vec![
            RawObject::new(0x100, "A", 8).with_generation(2),
            RawObject::new(0x200, "A", 8),
            RawObject::new(0x300, "A", 8),
        ]);
        let mut snapshot = Snapshot::new(1, Arc::new(source));
        snapshot.ingest().unwrap();
        let report = snapshot.report();
        let gens: Vec<u32> = report
            .generation_statistics
            .iter()
            .map(|g| g.generation)
            .collect();
        assert_eq!(gens, vec![0, 2]);
        assert_eq!(report.generation_statistics[0].object_count, 2);
        assert_eq!(report.generation_statistics[1].total_size, 8);
    }

    #[test]
    fn report_serializes_to_json() {
        let mut snapshot = Snapshot::new(1, Arc::new(VecSource::default()));
        snapshot.ingest().unwrap();
        let json = serde_json::to_value(snapshot.report()).unwrap();
        assert_eq!(json["process_id"], 1);
        assert_eq!(json["flags"]["retained_is_approximate"], true);
    }
}
