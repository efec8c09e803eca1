//! On-demand population for snapshots that were never eagerly ingested.
//!
//! Each requested type costs one walk over the source; afterwards the type
//! is marked scanned and further requests are served from the type index.
//! Pattern queries first build a cheap set of available type names (one
//! walk), then resolve each matching name through the same scan-once path.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::error::HeapResult;
use crate::intern::Name;
use crate::snapshot::{Ingested, Snapshot};

#[derive(Debug, Default)]
pub(crate) struct ScanState {
    scanned: HashSet<Name>,
    available: Option<BTreeSet<String>>,
}

/// Translate a `*`/`?` wildcard pattern into an anchored regex.
pub(crate) fn wildcard_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            _ => expr.push_str(&regex::escape(&c.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr)
}

impl Snapshot {
    /// Populate objects of exactly `type_name` from the source, once.
    /// Returns how many instances the type index now holds. On a fully
    /// ingested snapshot this is a plain index lookup.
    pub fn scan_type(&mut self, type_name: &str) -> HeapResult<usize> {
        let name = self.interner.intern(type_name);
        if self.is_analyzed || self.scan.scanned.contains(&name) {
            return Ok(self.types.get(&name).map_or(0, Vec::len));
        }
        debug!("scan-once for type {type_name}");
        let source = Arc::clone(&self.source);
        let iter = source.enumerate_objects()?;
        for item in iter {
            match item {
                Ok(raw) if raw.type_name == type_name => match self.insert_raw(raw) {
                    Ingested::Kept { truncated_refs } => {
                        self.ingest_stats.processed += 1;
                        self.ingest_stats.truncated_references += truncated_refs;
                    }
                    Ingested::Skipped => self.ingest_stats.skipped += 1,
                },
                Ok(_) => {}
                Err(e) => debug!("skipping undecodable object during type scan: {e}"),
            }
        }
        self.scan.scanned.insert(name);
        Ok(self.types.get(type_name).map_or(0, Vec::len))
    }

    /// Distinct type names the source can produce, from one walk, cached for
    /// the life of the snapshot. On an ingested snapshot the type index
    /// already knows them all.
    pub fn available_type_names(&mut self) -> HeapResult<&BTreeSet<String>> {
        let names = match self.scan.available.take() {
            Some(names) => names,
            None => {
                let mut names = BTreeSet::new();
                if self.is_analyzed {
                    names.extend(self.types.keys().map(|n| n.to_string()));
                } else {
                    let source = Arc::clone(&self.source);
                    for item in source.enumerate_objects()? {
                        match item {
                            Ok(raw) => {
                                if !raw.type_name.is_empty() {
                                    names.insert(raw.type_name);
                                }
                            }
                            Err(e) => debug!("skipping undecodable object during name walk: {e}"),
                        }
                    }
                }
                names
            }
        };
        Ok(self.scan.available.insert(names))
    }

    /// Resolve a wildcard pattern against the available type names, lazily
    /// scanning each hit. Returns the interned names that matched.
    pub fn scan_types_matching(&mut self, pattern: &str) -> HeapResult<Vec<Name>> {
        let re = wildcard_regex(pattern)?;
        let matches: Vec<String> = self
            .available_type_names()?
            .iter()
            .filter(|name| re.is_match(name))
            .cloned()
            .collect();
        let mut out = Vec::with_capacity(matches.len());
        for name in &matches {
            self.scan_type(name)?;
            out.push(self.interner.intern(name));
        }
        Ok(out)
    }

    /// Fetch a single object by address, pulling it from the source when it
    /// is not yet tracked and the source supports point lookups.
    pub fn fetch(&mut self, address: u64) -> HeapResult<Option<&crate::object::HeapObject>> {
        if !self.objects.contains_key(&address) {
            let source = Arc::clone(&self.source);
            if let Some(raw) = source.get(address)? {
                match self.insert_raw(raw) {
                    Ingested::Kept { truncated_refs } => {
                        self.ingest_stats.processed += 1;
                        self.ingest_stats.truncated_references += truncated_refs;
                    }
                    Ingested::Skipped => self.ingest_stats.skipped += 1,
                }
            }
        }
        Ok(self.objects.get(&address))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::source::{HeapSource, ObjectIter, RawObject, RootIter, VecSource};

    /// Counts full walks so idempotence is observable.
    struct CountingSource {
        inner: VecSource,
        walks: AtomicUsize,
    }

    impl HeapSource for CountingSource {
        fn enumerate_objects(&self) -> HeapResult<ObjectIter<'_>> {
            self.walks.fetch_add(1, Ordering::SeqCst);
            self.inner.enumerate_objects()
        }

        fn enumerate_roots(&self) -> HeapResult<RootIter<'_>> {
            self.inner.enumerate_roots()
        }

        fn get(&self, address: u64) -> HeapResult<Option<RawObject>> {
            self.inner.get(address)
        }
    }

    fn counting_source() -> Arc<CountingSource> {
        Arc::new(CountingSource {
            inner: VecSource::new(vec![
                RawObject::new(0x100, "List<Int>", 24),
                RawObject::new(0x200, "List<Int>", 24),
                RawObject::new(0x300, "Dict<K,V>", 48),
            ]),
            walks: AtomicUsize::new(0),
        })
    }

    #[test]
    fn scan_once_is_idempotent() {
        let source = counting_source();
        let mut snapshot = Snapshot::new(1, Arc::clone(&source) as Arc<dyn HeapSource>);
        assert_eq!(snapshot.scan_type("List<Int>").unwrap(), 2);
        assert_eq!(source.walks.load(Ordering::SeqCst), 1);
        // Second call: same result, no source work.
        assert_eq!(snapshot.scan_type("List<Int>").unwrap(), 2);
        assert_eq!(source.walks.load(Ordering::SeqCst), 1);
        assert_eq!(snapshot.object_count(), 2);
        assert!(!snapshot.is_analyzed());
    }

    #[test]
    fn scan_skips_other_types() {
        let source = counting_source();
        let mut snapshot = Snapshot::new(1, source);
        snapshot.scan_type("Dict<K,V>").unwrap();
        assert_eq!(snapshot.object_count(), 1);
        assert!(snapshot.get(0x300).is_some());
        assert!(snapshot.get(0x100).is_none());
    }

    #[test]
    fn pattern_scan_resolves_via_available_names() {
        let source = counting_source();
        let mut snapshot = Snapshot::new(1, Arc::clone(&source) as Arc<dyn HeapSource>);
        let matched = snapshot.scan_types_matching("List*").unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(&*matched[0], "List<Int>");
        assert_eq!(snapshot.object_count(), 2);
    }

    #[test]
    fn fetch_pulls_single_objects() {
        let source = counting_source();
        let mut snapshot = Snapshot::new(1, Arc::clone(&source) as Arc<dyn HeapSource>);
        let obj = snapshot.fetch(0x300).unwrap().unwrap();
        assert_eq!(&*obj.type_name, "Dict<K,V>");
        assert_eq!(source.walks.load(Ordering::SeqCst), 0);
        assert!(snapshot.fetch(0x999).unwrap().is_none());
    }

    #[test]
    fn wildcard_translation() {
        let re = wildcard_regex("System.*<?>").unwrap();
        assert!(re.is_match("System.List<T>"));
        assert!(!re.is_match("Other.List<T>"));
        assert!(wildcard_regex("List<*").unwrap().is_match("List<Int>"));
    }
}
