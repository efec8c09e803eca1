//! The adapter contract between a decoded dump and the analysis engine.
//!
//! A [`HeapSource`] hides everything about where objects come from: a dump
//! file on disk, a remote debugging session, or an in-memory fixture. The
//! engine only ever pulls finite, non-restartable iterators from it. Errors
//! travel on two channels: the outer result of `enumerate_*` is fatal and
//! terminates the scan, the per-item results are skippable and the scan
//! continues past them.

use std::collections::BTreeMap;

use crate::error::HeapResult;
use crate::object::GcRootKind;

/// A reference slot of a raw object, before interning and filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReference {
    pub target_address: u64,
    pub target_type: String,
    pub field_name: String,
}

/// One object as the source reports it, before any validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObject {
    pub address: u64,
    pub type_name: String,
    pub shallow_size: u64,
    pub generation: u32,
    pub references: Vec<RawReference>,
    /// Decoded field values, when the source can cheaply provide them. Not
    /// part of the minimal contract; sources without field decoding leave
    /// this `None`.
    pub fields: Option<BTreeMap<String, serde_json::Value>>,
}

impl RawObject {
    pub fn new(address: u64, type_name: impl Into<String>, shallow_size: u64) -> Self {
        Self {
            address,
            type_name: type_name.into(),
            shallow_size,
            generation: 0,
            references: Vec::new(),
            fields: None,
        }
    }

    pub fn with_generation(mut self, generation: u32) -> Self {
        self.generation = generation;
        self
    }

    /// Append a reference slot. Slots with a zero target address or an
    /// empty target type are dropped at ingestion.
    pub fn with_typed_reference(
        mut self,
        target_address: u64,
        target_type: impl Into<String>,
        field_name: impl Into<String>,
    ) -> Self {
        self.references.push(RawReference {
            target_address,
            target_type: target_type.into(),
            field_name: field_name.into(),
        });
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value);
        self
    }
}

/// One root as the runtime reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRoot {
    pub kind: GcRootKind,
    /// Address of the rooting slot; zero when the runtime does not expose it.
    pub root_address: u64,
    /// Address of the object the root keeps alive.
    pub target_address: u64,
    pub name: String,
}

pub type ObjectIter<'a> = Box<dyn Iterator<Item = HeapResult<RawObject>> + 'a>;
pub type RootIter<'a> = Box<dyn Iterator<Item = HeapResult<RawRoot>> + 'a>;

/// External adapter that yields the decoded contents of one process dump.
///
/// Iterators are finite and non-restartable; the engine never holds locks
/// across calls into them and treats them as blocking-synchronous.
pub trait HeapSource: Send + Sync {
    /// Every object the source can decode, in no particular order.
    fn enumerate_objects(&self) -> HeapResult<ObjectIter<'_>>;

    /// Runtime-reported roots. Sources that cannot enumerate roots should
    /// return an empty iterator; the engine then falls back to a
    /// reference-counting heuristic.
    fn enumerate_roots(&self) -> HeapResult<RootIter<'_>>;

    /// Single-object lookup, used by on-demand analysis. Optional; the
    /// default says "not supported" rather than scanning.
    fn get(&self, address: u64) -> HeapResult<Option<RawObject>> {
        let _ = address;
        Ok(None)
    }
}

/// In-memory [`HeapSource`] over pre-built objects. The fixture source for
/// tests and the natural adapter for embedders that already decoded a dump
/// themselves.
#[derive(Debug, Default)]
pub struct VecSource {
    objects: Vec<RawObject>,
    roots: Vec<RawRoot>,
}

impl VecSource {
    pub fn new(objects: Vec<RawObject>) -> Self {
        Self {
            objects,
            roots: Vec::new(),
        }
    }

    pub fn with_roots(mut self, roots: Vec<RawRoot>) -> Self {
        self.roots = roots;
        self
    }

    pub fn push(&mut self, object: RawObject) {
        self.objects.push(object);
    }

    pub fn push_root(&mut self, root: RawRoot) {
        self.roots.push(root);
    }
}

impl HeapSource for VecSource {
    fn enumerate_objects(&self) -> HeapResult<ObjectIter<'_>> {
        Ok(Box::new(self.objects.iter().cloned().map(Ok)))
    }

    fn enumerate_roots(&self) -> HeapResult<RootIter<'_>> {
        Ok(Box::new(self.roots.iter().cloned().map(Ok)))
    }

    fn get(&self, address: u64) -> HeapResult<Option<RawObject>> {
        Ok(self
            .objects
            .iter()
            .find(|o| o.address == address)
            .cloned())
    }
}
