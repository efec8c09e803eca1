//! The snapshot: a populated, queryable model of one process heap.
//!
//! A snapshot starts empty, is populated from a [`HeapSource`] (either
//! eagerly via [`Snapshot::ingest`] or per-type via the lazy scan), is
//! optionally analyzed (root discovery, dominator tree, retained sizes), and
//! is then read through the query facade. The four derived indices are built
//! on first use and live until the snapshot is dropped.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, HeapResult};
use crate::graph::dominators::DominatorTree;
use crate::graph::{retained, ReferenceGraph};
use crate::index::hierarchy::TypeHierarchy;
use crate::index::spatial::SpatialIndex;
use crate::intern::{Interner, Name};
use crate::object::{HeapObject, ObjectReference};
use crate::roots::RootSet;
use crate::scan::ScanState;
use crate::source::{HeapSource, RawObject};

/// References beyond this count per source object are dropped at ingestion.
/// Bounds per-object work against pathological objects such as giant
/// reference arrays; the dominator relation over the truncated graph is an
/// over-approximation, surfaced as `references_truncated_count`.
pub const MAX_REFERENCES_PER_OBJECT: usize = 100;

const PROGRESS_INTERVAL: u64 = 25_000;
const ABORT_CHECK_FLOOR: u64 = 1_000;

/// Counters accumulated while consuming the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub processed: u64,
    pub skipped: u64,
    pub truncated_references: u64,
}

/// Honesty flags for a completed (possibly degraded) analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisFlags {
    /// Retained sizes fell back to shallow sizes, wholly or in part.
    pub retained_is_approximate: bool,
    /// Roots came from the reference-counting heuristic, not the runtime.
    pub roots_via_refcount: bool,
    pub references_truncated_count: u64,
}

pub(crate) enum Ingested {
    Kept { truncated_refs: u64 },
    Skipped,
}

pub struct Snapshot {
    pub(crate) id: Uuid,
    pub(crate) process_id: u32,
    pub(crate) captured_at: DateTime<Utc>,
    pub(crate) source: Arc<dyn HeapSource>,
    pub(crate) interner: Interner,
    pub(crate) objects: HashMap<u64, HeapObject>,
    /// Addresses per exact type, in first-seen order per type.
    pub(crate) types: IndexMap<Name, Vec<u64>>,
    pub(crate) is_analyzed: bool,
    pub(crate) ingest_stats: IngestStats,
    pub(crate) roots: Option<RootSet>,
    pub(crate) dominators: Option<DominatorTree>,
    pub(crate) analysis: Option<AnalysisFlags>,
    pub(crate) scan: ScanState,
    spatial: OnceLock<SpatialIndex>,
    hierarchy: OnceLock<TypeHierarchy>,
    graph: OnceLock<ReferenceGraph>,
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("id", &self.id)
            .field("process_id", &self.process_id)
            .field("captured_at", &self.captured_at)
            .field("object_count", &self.objects.len())
            .field("is_analyzed", &self.is_analyzed)
            .field("ingest_stats", &self.ingest_stats)
            .field("analysis", &self.analysis)
            .finish()
    }
}

impl Snapshot {
    /// An empty snapshot over `source`. Populate it with [`Snapshot::ingest`]
    /// or let the lazy type scan pull objects in on demand.
    pub fn new(process_id: u32, source: Arc<dyn HeapSource>) -> Self {
        Self {
            id: Uuid::new_v4(),
            process_id,
            captured_at: Utc::now(),
            source,
            interner: Interner::new(),
            objects: HashMap::new(),
            types: IndexMap::new(),
            is_analyzed: false,
            ingest_stats: IngestStats::default(),
            roots: None,
            dominators: None,
            analysis: None,
            scan: ScanState::default(),
            spatial: OnceLock::new(),
            hierarchy: OnceLock::new(),
            graph: OnceLock::new(),
        }
    }

    /// Consume the source's object iterator once, filtering and interning as
    /// described on [`MAX_REFERENCES_PER_OBJECT`] and the crate docs.
    ///
    /// A wholesale iterator failure propagates and leaves the snapshot
    /// partially populated with `is_analyzed() == false`. A skip ratio above
    /// 2:1 after the first thousand objects aborts with
    /// [`Error::CorruptDump`].
    pub fn ingest(&mut self) -> HeapResult<IngestStats> {
        let source = Arc::clone(&self.source);
        let iter = source.enumerate_objects()?;
        let mut stats = IngestStats::default();
        for item in iter {
            match item {
                Ok(raw) => match self.insert_raw(raw) {
                    Ingested::Kept { truncated_refs } => {
                        stats.processed += 1;
                        stats.truncated_references += truncated_refs;
                    }
                    Ingested::Skipped => stats.skipped += 1,
                },
                Err(e) => {
                    debug!("skipping undecodable object: {e}");
                    stats.skipped += 1;
                }
            }
            let seen = stats.processed + stats.skipped;
            if seen % PROGRESS_INTERVAL == 0 {
                info!(
                    "ingest progress: {seen} objects seen ({} kept, {} skipped)",
                    stats.processed, stats.skipped
                );
            }
            if seen >= ABORT_CHECK_FLOOR && stats.skipped > 2 * stats.processed {
                self.accumulate(stats);
                return Err(Error::CorruptDump(format!(
                    "{} of {seen} objects skipped",
                    stats.skipped
                )));
            }
        }
        self.accumulate(stats);
        self.is_analyzed = !self.objects.is_empty();
        info!(
            "ingest complete: {} objects tracked, {} types, {} skipped",
            self.objects.len(),
            self.types.len(),
            stats.skipped
        );
        Ok(stats)
    }

    /// Root discovery, dominator tree, retained sizes. Degrades instead of
    /// failing: anything that goes wrong leaves retained sizes equal to
    /// shallow sizes and raises the matching [`AnalysisFlags`] flag.
    pub fn analyze(&mut self) -> AnalysisFlags {
        let mut flags = AnalysisFlags {
            references_truncated_count: self.ingest_stats.truncated_references,
            ..AnalysisFlags::default()
        };
        if self.objects.is_empty() {
            flags.retained_is_approximate = true;
            self.analysis = Some(flags.clone());
            return flags;
        }

        // The root set is stable across re-analyses of the same snapshot.
        let roots = match self.roots.clone() {
            Some(roots) => roots,
            None => {
                let roots = self.discover_roots();
                self.roots = Some(roots.clone());
                roots
            }
        };
        flags.roots_via_refcount = roots.via_refcount();

        let built = DominatorTree::build(self.reference_graph(), &roots);
        match built {
            Ok(tree) => {
                match retained::compute(&mut self.objects, &tree) {
                    Ok(reachable) => {
                        debug!(
                            "retained sizes written for {reachable} reachable objects \
                             ({} unreachable keep shallow)",
                            self.objects.len() as u64 - reachable
                        );
                    }
                    Err(e) => {
                        warn!("retained-size aggregation failed, falling back to shallow sizes: {e}");
                        self.reset_retained();
                        flags.retained_is_approximate = true;
                    }
                }
                self.dominators = Some(tree);
            }
            Err(e) => {
                warn!("dominator tree unavailable, retained sizes stay shallow: {e}");
                self.reset_retained();
                self.dominators = None;
                flags.retained_is_approximate = true;
            }
        }

        self.analysis = Some(flags.clone());
        flags
    }

    /// Insert one raw object, applying the ingestion filters. Shared by the
    /// eager pass and the lazy type scan.
    pub(crate) fn insert_raw(&mut self, raw: RawObject) -> Ingested {
        if raw.address == 0 || raw.shallow_size == 0 || raw.type_name.is_empty() {
            debug!(
                "skipping object at {:#x}: missing type name, zero address, or zero size",
                raw.address
            );
            return Ingested::Skipped;
        }
        let type_name = self.interner.intern(&raw.type_name);
        let mut truncated_refs = 0u64;
        let mut references = Vec::with_capacity(raw.references.len().min(MAX_REFERENCES_PER_OBJECT));
        for r in raw.references {
            if r.target_address == 0 || r.target_type.is_empty() {
                continue;
            }
            if references.len() == MAX_REFERENCES_PER_OBJECT {
                truncated_refs += 1;
                continue;
            }
            references.push(ObjectReference {
                source_address: raw.address,
                target_address: r.target_address,
                field_name: self.interner.intern(&r.field_name),
                target_type: self.interner.intern(&r.target_type),
            });
        }
        let fields = raw.fields.map(|fields| {
            fields
                .into_iter()
                .map(|(k, v)| (self.interner.intern(&k), v))
                .collect()
        });
        let object = HeapObject {
            address: raw.address,
            type_name: Name::clone(&type_name),
            shallow_size: raw.shallow_size,
            generation: raw.generation,
            references,
            fields,
            retained_size: raw.shallow_size,
            gc_root_paths: Vec::new(),
        };
        match self.objects.insert(raw.address, object) {
            Some(prev) if prev.type_name != type_name => {
                // Re-ingested under a new type: move the address over.
                if let Some(addrs) = self.types.get_mut(&prev.type_name) {
                    addrs.retain(|a| *a != raw.address);
                }
                self.types.entry(type_name).or_default().push(raw.address);
            }
            Some(_) => {}
            None => self.types.entry(type_name).or_default().push(raw.address),
        }
        Ingested::Kept { truncated_refs }
    }

    fn accumulate(&mut self, stats: IngestStats) {
        self.ingest_stats.processed += stats.processed;
        self.ingest_stats.skipped += stats.skipped;
        self.ingest_stats.truncated_references += stats.truncated_references;
    }

    fn reset_retained(&mut self) {
        for obj in self.objects.values_mut() {
            obj.retained_size = obj.shallow_size;
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// True once a full ingestion pass tracked at least one object. Lazy
    /// per-type scans do not set this.
    pub fn is_analyzed(&self) -> bool {
        self.is_analyzed
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Sum of shallow sizes over all tracked objects.
    pub fn total_memory(&self) -> u64 {
        self.objects.values().map(|o| o.shallow_size).sum()
    }

    pub fn ingest_stats(&self) -> IngestStats {
        self.ingest_stats
    }

    /// Flags from the last [`Snapshot::analyze`] run, if any.
    pub fn analysis_flags(&self) -> Option<&AnalysisFlags> {
        self.analysis.as_ref()
    }

    pub fn root_set(&self) -> Option<&RootSet> {
        self.roots.as_ref()
    }

    pub fn dominator_tree(&self) -> Option<&DominatorTree> {
        self.dominators.as_ref()
    }

    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    pub(crate) fn spatial(&self) -> &SpatialIndex {
        self.spatial.get_or_init(|| SpatialIndex::build(&self.objects))
    }

    pub(crate) fn hierarchy(&self) -> &TypeHierarchy {
        self.hierarchy.get_or_init(|| TypeHierarchy::build(&self.types))
    }

    /// The bidirectional adjacency index, built on first use. Exposed for
    /// graph-level work the facade does not cover.
    pub fn reference_graph(&self) -> &ReferenceGraph {
        self.graph.get_or_init(|| ReferenceGraph::build(&self.objects))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{RawReference, VecSource};

    fn snapshot_over(objects: Vec<RawObject>) -> Snapshot {
        Snapshot::new(1234, Arc::new(VecSource::new(objects)))
    }

    #[test]
    fn ingest_tracks_valid_objects() {
        let mut snapshot = snapshot_over(vec![
            RawObject::new(0x100, "A", 24),
            RawObject::new(0x200, "B", 16),
            RawObject::new(0x300, "A", 24),
        ]);
        let stats = snapshot.ingest().unwrap();
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.skipped, 0);
        assert!(snapshot.is_analyzed());
        assert_eq!(snapshot.object_count(), 3);
        assert_eq!(snapshot.type_count(), 2);
        assert_eq!(snapshot.total_memory(), 64);
    }

    #[test]
    fn ingest_skips_invalid_objects() {
        let mut snapshot = snapshot_over(vec![
            RawObject::new(0, "A", 24),
            RawObject::new(0x200, "", 16),
            RawObject::new(0x300, "A", 0),
            RawObject::new(0x400, "A", 8),
        ]);
        let stats = snapshot.ingest().unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.skipped, 3);
        assert_eq!(snapshot.object_count(), 1);
    }

    #[test]
    fn ingest_drops_null_and_untyped_references() {
        let raw = RawObject::new(0x100, "A", 24)
            .with_typed_reference(0, "B", "dead")
            .with_typed_reference(0x200, "", "untyped")
            .with_typed_reference(0x200, "B", "live");
        let mut snapshot = snapshot_over(vec![raw, RawObject::new(0x200, "B", 8)]);
        snapshot.ingest().unwrap();
        let obj = snapshot.objects.get(&0x100).unwrap();
        assert_eq!(obj.references.len(), 1);
        assert_eq!(obj.references[0].target_address, 0x200);
        assert_eq!(&*obj.references[0].field_name, "live");
    }

    #[test]
    fn ingest_caps_references_per_object() {
        let mut raw = RawObject::new(0x100, "Array", 4096);
        for i in 0..150u64 {
            raw.references.push(RawReference {
                target_address: 0x1000 + i * 8,
                target_type: "Elem".into(),
                field_name: format!("[{i}]"),
            });
        }
        let mut snapshot = snapshot_over(vec![raw]);
        let stats = snapshot.ingest().unwrap();
        assert_eq!(stats.truncated_references, 50);
        let obj = snapshot.objects.get(&0x100).unwrap();
        assert_eq!(obj.references.len(), MAX_REFERENCES_PER_OBJECT);
    }

    #[test]
    fn ingest_aborts_on_corrupt_dump() {
        let mut objects = Vec::new();
        // 300 valid objects, then garbage well past the 2:1 skip ratio.
        for i in 0..300u64 {
            objects.push(RawObject::new(0x1000 + i * 16, "A", 16));
        }
        for _ in 0..900 {
            objects.push(RawObject::new(0, "", 0));
        }
        let mut snapshot = snapshot_over(objects);
        let err = snapshot.ingest().unwrap_err();
        assert!(matches!(err, Error::CorruptDump(_)));
        assert!(!snapshot.is_analyzed());
    }

    #[test]
    fn reingest_under_new_type_moves_the_address() {
        let mut snapshot = snapshot_over(vec![RawObject::new(0x100, "A", 24)]);
        snapshot.ingest().unwrap();
        snapshot.insert_raw(RawObject::new(0x100, "B", 32));
        assert_eq!(snapshot.object_count(), 1);
        let a = snapshot.types.get("A").unwrap();
        assert!(a.is_empty());
        let b = snapshot.types.get("B").unwrap();
        assert_eq!(b.as_slice(), &[0x100]);
    }

    #[test]
    fn empty_snapshot_is_not_analyzed() {
        let mut snapshot = snapshot_over(Vec::new());
        let stats = snapshot.ingest().unwrap();
        assert_eq!(stats.processed, 0);
        assert!(!snapshot.is_analyzed());
    }
}
