//! Post-mortem heap analysis for managed-runtime process dumps.
//!
//! Given a decoded set of live objects and the roots the runtime reported,
//! this crate builds indexed, queryable representations of the heap and
//! computes each object's retained size (the bytes that would be reclaimed
//! if the object became unreachable). Decoding a dump file is somebody
//! else's job: anything that can yield `(address, type name, shallow size,
//! references)` tuples plugs in through the [`HeapSource`] trait.
//!
//! The pipeline is: populate a [`Snapshot`] from a source, discover roots
//! (runtime-reported, with a reference-counting fallback), build the
//! dominator tree of the virtual-root-extended object graph, and aggregate
//! retained sizes bottom-up over it. Range, proximity, hierarchy, and
//! traversal queries are served from indices built lazily on first use.
//!
//! ```
//! use std::sync::Arc;
//! use heapscope::{HeapDump, RawObject, VecSource};
//!
//! let source = VecSource::new(vec![
//!     RawObject::new(0x100, "App.Cache", 64).with_typed_reference(0x200, "App.Entry", "head"),
//!     RawObject::new(0x200, "App.Entry", 32),
//! ]);
//! let dump = HeapDump::new(4242, Arc::new(source));
//! let snapshot = dump.analyzed_snapshot()?;
//! assert_eq!(snapshot.get(0x100).unwrap().retained_size, 96);
//!
//! let report = snapshot.report();
//! assert_eq!(report.total_objects, 2);
//! # Ok::<(), heapscope::Error>(())
//! ```

use std::sync::Arc;

pub mod error;
pub mod graph;
pub mod index;
pub mod intern;
pub mod object;
mod query;
pub mod report;
pub mod roots;
mod scan;
pub mod snapshot;
pub mod source;

pub use error::{Error, HeapResult};
pub use graph::dominators::{DominatorTree, MAX_DOMINATOR_NODES};
pub use graph::{ReferenceGraph, ReferenceStats, HIGHLY_REFERENCED_THRESHOLD};
pub use index::hierarchy::TypeHierarchyStats;
pub use intern::{Interner, Name};
pub use object::{GcRootKind, GcRootPath, HeapObject, ObjectReference};
pub use report::{
    GenerationStatistics, HeapAnalysisReport, ObjectSummary, TypeStatistics, TOP_OBJECT_COUNT,
};
pub use roots::RootSet;
pub use snapshot::{AnalysisFlags, IngestStats, Snapshot, MAX_REFERENCES_PER_OBJECT};
pub use source::{
    HeapSource, ObjectIter, RawObject, RawReference, RawRoot, RootIter, VecSource,
};

/// A process dump paired with the source that decodes it. The entry point
/// for producing snapshots.
pub struct HeapDump {
    process_id: u32,
    source: Arc<dyn HeapSource>,
}

impl HeapDump {
    pub fn new(process_id: u32, source: Arc<dyn HeapSource>) -> Self {
        Self { process_id, source }
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// A fully ingested snapshot, not yet analyzed. Call
    /// [`Snapshot::analyze`] for roots, dominators, and retained sizes.
    pub fn snapshot(&self) -> HeapResult<Snapshot> {
        let mut snapshot = Snapshot::new(self.process_id, Arc::clone(&self.source));
        snapshot.ingest()?;
        Ok(snapshot)
    }

    /// An ingested and analyzed snapshot in one step.
    pub fn analyzed_snapshot(&self) -> HeapResult<Snapshot> {
        let mut snapshot = self.snapshot()?;
        snapshot.analyze();
        Ok(snapshot)
    }

    /// An empty snapshot over the source, for workloads that only ever
    /// touch a few types and want per-type lazy scans instead of a full
    /// ingestion pass.
    pub fn lazy_snapshot(&self) -> Snapshot {
        Snapshot::new(self.process_id, Arc::clone(&self.source))
    }
}
