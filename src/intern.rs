//! String interning for type and field names.
//!
//! A dump routinely carries millions of objects but only a few thousand
//! distinct type names. Interning collapses every occurrence to one shared
//! allocation so that name comparison is pointer-cheap and the object map
//! stays compact.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;

/// Canonical handle for an interned string. Two handles interned from
/// byte-equal input through the same [`Interner`] share one allocation.
pub type Name = Arc<str>;

/// Thread-safe insert-or-get table of canonical strings. Grow-only: entries
/// are never removed, so handles stay valid for the interner's lifetime.
#[derive(Debug, Default)]
pub struct Interner {
    table: RwLock<HashSet<Name>>,
}

lazy_static! {
    static ref GLOBAL: Interner = Interner::new();
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide interner shared across snapshots. Snapshots default
    /// to a private interner so disposal frees everything; use this one when
    /// comparing type names across dumps of the same process.
    pub fn global() -> &'static Interner {
        &GLOBAL
    }

    /// Returns the canonical form of `s`, inserting it on first sight.
    /// Empty strings are returned unchanged without touching the table.
    pub fn intern(&self, s: &str) -> Name {
        if s.is_empty() {
            return Arc::from("");
        }
        {
            let table = self.table.read().expect("interner table poisoned");
            if let Some(existing) = table.get(s) {
                return Arc::clone(existing);
            }
        }
        let mut table = self.table.write().expect("interner table poisoned");
        // Another writer may have inserted between the read and write locks.
        if let Some(existing) = table.get(s) {
            return Arc::clone(existing);
        }
        let name: Name = Arc::from(s);
        table.insert(Arc::clone(&name));
        name
    }

    /// Number of distinct strings interned so far.
    pub fn len(&self) -> usize {
        self.table.read().expect("interner table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::Interner;
    use std::sync::Arc;

    #[test]
    fn intern_dedupes_equal_strings() {
        let interner = Interner::new();
        let a = interner.intern("System.String");
        let b = interner.intern("System.String");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn intern_distinguishes_unequal_strings() {
        let interner = Interner::new();
        let a = interner.intern("System.String");
        let b = interner.intern("System.Object");
        assert_ne!(a, b);
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn empty_string_is_not_tabled() {
        let interner = Interner::new();
        let e = interner.intern("");
        assert_eq!(&*e, "");
        assert!(interner.is_empty());
    }

    #[test]
    fn intern_is_consistent_across_threads() {
        let interner = Arc::new(Interner::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let interner = Arc::clone(&interner);
                std::thread::spawn(move || interner.intern("Shared.Type"))
            })
            .collect();
        let names: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for name in &names[1..] {
            assert!(Arc::ptr_eq(&names[0], name));
        }
        assert_eq!(interner.len(), 1);
    }
}
