//! Address-ordered and size-class views for range and proximity queries.

use std::collections::HashMap;

use crate::object::HeapObject;

/// Objects per address bucket.
pub(crate) const ADDRESS_BUCKET_CAPACITY: usize = 1_000;

/// Upper bounds (exclusive) of the coarse size classes; everything at or
/// above the last bound lands in the final bucket.
const SIZE_CLASS_BOUNDS: [u64; 5] = [100, 1 << 10, 8 << 10, 64 << 10, 1 << 20];

#[derive(Debug)]
struct AddressBucket {
    start: u64,
    end: u64,
    /// Ascending addresses.
    entries: Vec<u64>,
}

#[derive(Debug)]
struct SizeBucket {
    min_size: u64,
    max_size: u64,
    /// `(address, shallow_size)` pairs, ascending by address.
    entries: Vec<(u64, u64)>,
}

/// Sorted-by-address and bucketed-by-size views over the tracked objects.
/// Built once from the object set present at first use; objects pulled in by
/// later lazy scans are not retrofitted.
#[derive(Debug)]
pub struct SpatialIndex {
    address_buckets: Vec<AddressBucket>,
    size_buckets: Vec<SizeBucket>,
}

fn size_class(size: u64) -> usize {
    SIZE_CLASS_BOUNDS
        .iter()
        .position(|bound| size < *bound)
        .unwrap_or(SIZE_CLASS_BOUNDS.len())
}

impl SpatialIndex {
    pub(crate) fn build(objects: &HashMap<u64, HeapObject>) -> Self {
        let mut addresses: Vec<u64> = objects.keys().copied().collect();
        addresses.sort_unstable();

        let address_buckets = addresses
            .chunks(ADDRESS_BUCKET_CAPACITY)
            .map(|chunk| AddressBucket {
                start: chunk[0],
                end: chunk[chunk.len() - 1],
                entries: chunk.to_vec(),
            })
            .collect();

        let mut size_buckets: Vec<SizeBucket> = (0..=SIZE_CLASS_BOUNDS.len())
            .map(|_| SizeBucket {
                min_size: u64::MAX,
                max_size: 0,
                entries: Vec::new(),
            })
            .collect();
        for addr in &addresses {
            let Some(obj) = objects.get(addr) else { continue };
            let bucket = &mut size_buckets[size_class(obj.shallow_size)];
            bucket.min_size = bucket.min_size.min(obj.shallow_size);
            bucket.max_size = bucket.max_size.max(obj.shallow_size);
            bucket.entries.push((obj.address, obj.shallow_size));
        }

        Self {
            address_buckets,
            size_buckets,
        }
    }

    /// Addresses of objects whose address lies in `[lo, hi]`, ascending.
    pub fn range(&self, lo: u64, hi: u64) -> Vec<u64> {
        if lo > hi {
            return Vec::new();
        }
        let mut out = Vec::new();
        for bucket in &self.address_buckets {
            if bucket.end < lo {
                continue;
            }
            if bucket.start > hi {
                break;
            }
            let from = bucket.entries.partition_point(|a| *a < lo);
            let to = bucket.entries.partition_point(|a| *a <= hi);
            out.extend_from_slice(&bucket.entries[from..to]);
        }
        out
    }

    /// Addresses within `prox` bytes of `addr` on either side.
    pub fn nearby(&self, addr: u64, prox: u64) -> Vec<u64> {
        self.range(addr.saturating_sub(prox), addr.saturating_add(prox))
    }

    /// Addresses of objects whose shallow size lies in `[lo, hi]`,
    /// ascending by address. Unions the size classes overlapping the range,
    /// then filters exactly.
    pub fn size_range(&self, lo: u64, hi: u64) -> Vec<u64> {
        if lo > hi {
            return Vec::new();
        }
        let mut out: Vec<u64> = Vec::new();
        for bucket in &self.size_buckets {
            if bucket.entries.is_empty() || bucket.max_size < lo || bucket.min_size > hi {
                continue;
            }
            out.extend(
                bucket
                    .entries
                    .iter()
                    .filter(|(_, size)| (lo..=hi).contains(size))
                    .map(|(addr, _)| *addr),
            );
        }
        out.sort_unstable();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interner;

    fn index_of(layout: &[(u64, u64)]) -> SpatialIndex {
        let interner = Interner::new();
        let mut objects = HashMap::new();
        for &(addr, size) in layout {
            objects.insert(
                addr,
                HeapObject {
                    address: addr,
                    type_name: interner.intern("T"),
                    shallow_size: size,
                    generation: 0,
                    references: Vec::new(),
                    fields: None,
                    retained_size: size,
                    gc_root_paths: Vec::new(),
                },
            );
        }
        SpatialIndex::build(&objects)
    }

    #[test]
    fn range_is_inclusive_and_ordered() {
        let index = index_of(&[(0x100, 8), (0x200, 8), (0x300, 8), (0x400, 8)]);
        assert_eq!(index.range(0x200, 0x300), vec![0x200, 0x300]);
        assert_eq!(index.range(0x201, 0x2ff), Vec::<u64>::new());
        assert_eq!(index.range(0, u64::MAX).len(), 4);
        assert!(index.range(0x500, 0x100).is_empty());
    }

    #[test]
    fn nearby_saturates_at_zero() {
        let index = index_of(&[(0x10, 8), (0x40, 8)]);
        assert_eq!(index.nearby(0x20, 0x30), vec![0x10, 0x40]);
        assert_eq!(index.nearby(0x10, 0x1000), vec![0x10, 0x40]);
    }

    #[test]
    fn size_range_filters_exactly_within_classes() {
        // One object per size class, straddling the queried range.
        let index = index_of(&[
            (0x1, 50),
            (0x2, 900),
            (0x3, 5_000),
            (0x4, 50_000),
            (0x5, 900_000),
            (0x6, 2 << 20),
        ]);
        assert_eq!(index.size_range(1_000, 100_000), vec![0x3, 0x4]);
        assert_eq!(index.size_range(0, 60), vec![0x1]);
        assert_eq!(index.size_range(2 << 20, u64::MAX), vec![0x6]);
        assert!(index.size_range(100_001, 899_999).is_empty());
    }

    #[test]
    fn buckets_split_at_capacity() {
        let layout: Vec<(u64, u64)> = (0..2_500u64).map(|i| (0x1000 + i * 16, 16)).collect();
        let index = index_of(&layout);
        assert_eq!(index.address_buckets.len(), 3);
        assert_eq!(index.range(0x1000, 0x1000 + 2_499 * 16).len(), 2_500);
    }
}
