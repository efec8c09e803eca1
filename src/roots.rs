//! Root discovery: runtime-reported roots first, reference counting when the
//! runtime has nothing to say.

use std::sync::Arc;

use roaring::RoaringTreemap;
use tracing::{debug, warn};

use crate::intern::Name;
use crate::object::{GcRootKind, GcRootPath};
use crate::snapshot::Snapshot;

/// The addresses the analysis treats as GC roots, plus how they were found.
#[derive(Debug, Clone, Default)]
pub struct RootSet {
    addresses: RoaringTreemap,
    via_refcount: bool,
}

impl RootSet {
    pub fn contains(&self, address: u64) -> bool {
        self.addresses.contains(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.addresses.iter()
    }

    pub fn len(&self) -> u64 {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// True when the set came from the zero-incoming-references heuristic.
    /// Such a set is a superset of the real roots: objects kept alive only by
    /// a cycle show up in it too, so retained sizes may be overattributed.
    pub fn via_refcount(&self) -> bool {
        self.via_refcount
    }

    pub(crate) fn insert(&mut self, address: u64) {
        self.addresses.insert(address);
    }
}

impl Snapshot {
    /// Enumerate the source's roots, keeping those whose target is tracked,
    /// and attach a [`GcRootPath`] to each rooted object. Falls back to
    /// reference counting when the runtime reports nothing usable.
    pub(crate) fn discover_roots(&mut self) -> RootSet {
        let mut set = RootSet::default();
        let source = Arc::clone(&self.source);
        match source.enumerate_roots() {
            Ok(iter) => {
                let mut discarded = 0u64;
                for item in iter {
                    match item {
                        Ok(root) => {
                            let Some(obj) = self.objects.get_mut(&root.target_address) else {
                                discarded += 1;
                                continue;
                            };
                            let root_name = self.interner.intern(&root.name);
                            obj.push_root_path(GcRootPath {
                                kind: root.kind,
                                root_address: root.root_address,
                                object_address: root.target_address,
                                root_name,
                            });
                            set.insert(root.target_address);
                        }
                        Err(e) => debug!("skipping unreadable root: {e}"),
                    }
                }
                if discarded > 0 {
                    debug!("discarded {discarded} roots targeting untracked addresses");
                }
            }
            Err(e) => {
                warn!("root enumeration failed, falling back to reference counting: {e}");
            }
        }
        if set.addresses.is_empty() && !self.objects.is_empty() {
            self.refcount_fallback(&mut set);
        }
        debug!(
            "root discovery done: {} roots ({})",
            set.len(),
            if set.via_refcount {
                "refcount heuristic"
            } else {
                "runtime-reported"
            }
        );
        set
    }

    /// Treat every tracked object nobody else references as a root.
    /// Self-references do not count as incoming; an object that only points
    /// at itself is still a candidate.
    fn refcount_fallback(&mut self, set: &mut RootSet) {
        warn!("no runtime roots available; approximating roots by reference counting");
        let mut referenced = RoaringTreemap::new();
        for obj in self.objects.values() {
            for r in &obj.references {
                if r.target_address != obj.address && self.objects.contains_key(&r.target_address) {
                    referenced.insert(r.target_address);
                }
            }
        }
        let root_name = self.interner.intern("unreferenced");
        for (addr, obj) in self.objects.iter_mut() {
            if !referenced.contains(*addr) {
                obj.push_root_path(GcRootPath {
                    kind: GcRootKind::Other,
                    root_address: 0,
                    object_address: *addr,
                    root_name: Name::clone(&root_name),
                });
                set.insert(*addr);
            }
        }
        set.via_refcount = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{RawObject, RawRoot, VecSource};

    fn root(target: u64) -> RawRoot {
        RawRoot {
            kind: GcRootKind::StrongHandle,
            root_address: 0xdead_0000,
            target_address: target,
            name: "handle".into(),
        }
    }

    #[test]
    fn runtime_roots_are_preferred() {
        let source = VecSource::new(vec![
            RawObject::new(0x100, "A", 8).with_typed_reference(0x200, "B", "next"),
            RawObject::new(0x200, "B", 8),
        ])
        .with_roots(vec![root(0x100), root(0x100), root(0x9999)]);
        let mut snapshot = Snapshot::new(1, Arc::new(source));
        snapshot.ingest().unwrap();
        let set = snapshot.discover_roots();
        assert!(!set.via_refcount());
        assert_eq!(set.len(), 1);
        assert!(set.contains(0x100));
        // The duplicate handle collapses into one root path.
        let obj = snapshot.objects.get(&0x100).unwrap();
        assert_eq!(obj.gc_root_paths.len(), 1);
    }

    #[test]
    fn refcount_fallback_marks_unreferenced_objects() {
        let source = VecSource::new(vec![
            RawObject::new(0x100, "A", 8).with_typed_reference(0x200, "B", "next"),
            RawObject::new(0x200, "B", 8),
            RawObject::new(0x300, "C", 8).with_typed_reference(0x300, "C", "self"),
        ]);
        let mut snapshot = Snapshot::new(1, Arc::new(source));
        snapshot.ingest().unwrap();
        let set = snapshot.discover_roots();
        assert!(set.via_refcount());
        assert!(set.contains(0x100));
        assert!(!set.contains(0x200));
        // A pure self-loop still counts as unreferenced.
        assert!(set.contains(0x300));
        assert!(snapshot.objects.get(&0x100).unwrap().is_gc_root());
    }

    #[test]
    fn single_object_is_its_own_root() {
        let source = VecSource::new(vec![RawObject::new(0x100, "A", 8)]);
        let mut snapshot = Snapshot::new(1, Arc::new(source));
        snapshot.ingest().unwrap();
        let set = snapshot.discover_roots();
        assert!(set.via_refcount());
        assert_eq!(set.len(), 1);
        assert!(set.contains(0x100));
    }
}
