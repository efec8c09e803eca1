//! The object model a populated snapshot is made of.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::intern::Name;

/// Why the runtime keeps an object alive independently of in-heap
/// references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GcRootKind {
    StrongHandle,
    WeakHandle,
    Pinned,
    Stack,
    Finalizer,
    Static,
    Thread,
    AsyncPinned,
    Other,
}

/// One runtime-reported path that roots an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GcRootPath {
    pub kind: GcRootKind,
    /// Address of the rooting slot itself (handle table entry, stack slot,
    /// static field). Zero for synthetic roots.
    pub root_address: u64,
    /// Address of the rooted object.
    pub object_address: u64,
    pub root_name: Name,
}

/// A managed pointer stored in a field of a tracked object.
///
/// `target_address` is not guaranteed to belong to a tracked object; dangling
/// edges survive ingestion and are filtered when the reference graph is
/// built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectReference {
    pub source_address: u64,
    pub target_address: u64,
    pub field_name: Name,
    pub target_type: Name,
}

/// A single live object decoded from the dump.
///
/// Immutable after ingestion except for `retained_size`, written once by the
/// retained-size pass, and `gc_root_paths`, appended during root discovery.
#[derive(Debug, Clone, Serialize)]
pub struct HeapObject {
    pub address: u64,
    pub type_name: Name,
    /// Bytes occupied by the object itself, excluding referents. Always
    /// non-zero for a tracked object.
    pub shallow_size: u64,
    pub generation: u32,
    pub references: Vec<ObjectReference>,
    /// Decoded field values, when the source provides them. Opaque to the
    /// analysis; only the query facade hands them out.
    pub fields: Option<BTreeMap<Name, serde_json::Value>>,
    /// Bytes reclaimed if this object became unreachable. Equals
    /// `shallow_size` until the dominator analysis has run.
    pub retained_size: u64,
    pub gc_root_paths: Vec<GcRootPath>,
}

impl HeapObject {
    /// True once root discovery has attached at least one root path.
    pub fn is_gc_root(&self) -> bool {
        !self.gc_root_paths.is_empty()
    }

    /// End of the address range this object occupies.
    pub fn end_address(&self) -> u64 {
        self.address.saturating_add(self.shallow_size)
    }

    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.as_ref()?.get(name)
    }

    pub(crate) fn push_root_path(&mut self, path: GcRootPath) {
        // gc_root_paths is a set; the same handle can be reported twice.
        if !self.gc_root_paths.contains(&path) {
            self.gc_root_paths.push(path);
        }
    }
}
