//! Retained sizes: shallow size plus the retained sizes of dominator-tree
//! children, computed bottom-up with an explicit stack.

use std::collections::HashMap;

use roaring::RoaringTreemap;

use crate::error::{Error, HeapResult};
use crate::graph::dominators::DominatorTree;
use crate::object::HeapObject;

/// Walk the dominator tree in post-order and write each reachable object's
/// retained size back onto it. Objects absent from the tree keep their
/// shallow size. Returns the number of objects written.
pub(crate) fn compute(
    objects: &mut HashMap<u64, HeapObject>,
    tree: &DominatorTree,
) -> HeapResult<u64> {
    let mut retained: HashMap<u64, u64> = HashMap::new();
    let mut visited = RoaringTreemap::new();
    for &top in tree.top_level() {
        if !visited.insert(top) {
            return Err(Error::Dominators(format!(
                "top-level node {top:#x} listed twice"
            )));
        }
        let mut stack: Vec<(u64, usize)> = vec![(top, 0)];
        while let Some((addr, i)) = stack.pop() {
            let children = tree.children(addr);
            if i < children.len() {
                stack.push((addr, i + 1));
                let child = children[i];
                if !visited.insert(child) {
                    // A well-formed tree visits each node once; a repeat
                    // means the relation is cyclic or shared.
                    return Err(Error::Dominators(format!(
                        "node {child:#x} appears twice in the dominator tree"
                    )));
                }
                stack.push((child, 0));
            } else {
                let shallow = objects
                    .get(&addr)
                    .map(|o| o.shallow_size)
                    .ok_or_else(|| {
                        Error::Internal(format!("dominator node {addr:#x} is not tracked"))
                    })?;
                let mut sum = shallow;
                for child in children {
                    let r = retained.get(child).ok_or_else(|| {
                        Error::Internal(format!("child {child:#x} finished without a size"))
                    })?;
                    sum = sum.saturating_add(*r);
                }
                retained.insert(addr, sum);
            }
        }
    }
    let written = retained.len() as u64;
    for (addr, size) in retained {
        if let Some(obj) = objects.get_mut(&addr) {
            obj.retained_size = size;
        }
    }
    Ok(written)
}
