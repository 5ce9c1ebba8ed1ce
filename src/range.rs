//! Ordered range scans.
//!
//! A scan walks the tree in key order between its bounds, invoking the
//! callback per leaf. It holds no locks; every node visit follows the same
//! snapshot/validate discipline as the point operations. On conflict the
//! whole scan restarts from the root, using the last emitted key as an
//! exclusive begin bound, so emitted keys never repeat. Keys inserted or
//! removed at unvisited positions during the scan may or may not be observed;
//! the scan is not a snapshot.
//!
//! Bounds are compared per node: `begin_cmp`/`end_cmp` say whether the
//! node's path is below, at, or above the respective bound. Once a bound is
//! strictly cleared it is never inspected again on that branch.

use std::{
    cmp::{min, Ordering},
    sync::atomic::{AtomicPtr, Ordering as MemOrdering},
};

use crate::{
    lock::Restart,
    node::{Header, NodeRef, NodeType, MAX_PREFIX_LEN},
    ops,
};

pub(crate) struct RangeIter<'a, F> {
    begin: &'a [u8],
    /// None scans to the end of the tree (used by prefix scans whose upper
    /// bound has no finite exclusive form).
    end: Option<&'a [u8]>,
    include_begin: bool,
    include_end: bool,
    /// Last key handed to the callback. A conflicted scan resumes from here
    /// exclusively, so nothing is emitted twice.
    prev: Option<Vec<u8>>,
    f: F,
}

impl<'a, F> RangeIter<'a, F> {
    pub(crate) fn new(
        begin: &'a [u8],
        end: Option<&'a [u8]>,
        include_begin: bool,
        include_end: bool,
        f: F,
    ) -> RangeIter<'a, F> {
        RangeIter {
            begin,
            end,
            include_begin,
            include_end,
            prev: None,
            f,
        }
    }

    pub(crate) fn initial_end_cmp(&self) -> Ordering {
        if self.end.is_some() {
            Ordering::Equal
        } else {
            Ordering::Less
        }
    }

    fn current_begin(&self) -> &[u8] {
        self.prev.as_deref().unwrap_or(self.begin)
    }

    fn begin_inclusive(&self) -> bool {
        // After a restart the scan resumes just past the last emitted key.
        if self.prev.is_some() {
            false
        } else {
            self.include_begin
        }
    }

    fn end_key(&self) -> &[u8] {
        self.end.expect("artree: end bound inspected on an unbounded scan")
    }
}

/// Exclusive upper bound of the keys extending `prefix`: trailing 0xff bytes
/// are carried into the preceding byte. Empty and all-0xff prefixes have no
/// finite bound and scan with an open end.
pub(crate) fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(&last) = end.last() {
        if last == 0xff {
            end.pop();
        } else {
            *end.last_mut().expect("checked non-empty") = last + 1;
            return Some(end);
        }
    }
    None
}

/// Relation of the node's compressed path to `key` at `depth`. Consults a
/// recovered full key only when both the remaining bound bytes and the true
/// prefix extend past the stored 8 bytes. A bound that is a proper prefix of
/// the path compares below the whole subtree.
unsafe fn full_compare<V>(
    h: &Header,
    version: u64,
    key: &[u8],
    depth: usize,
) -> Result<Ordering, Restart> {
    let remain = key.len().saturating_sub(depth);
    let check_len = min(h.prefix_len, min(MAX_PREFIX_LEN, remain));
    let mut cmp = h.prefix[..check_len].cmp(&key[depth..depth + check_len]);
    if cmp == Ordering::Equal && remain > MAX_PREFIX_LEN && h.prefix_len > MAX_PREFIX_LEN {
        let full_key = ops::full_key_of::<V>(h, version)?;
        let limit = min(h.prefix_len, remain);
        cmp = full_key[depth + check_len..depth + limit].cmp(&key[depth + check_len..depth + limit]);
    }
    if cmp == Ordering::Equal && h.prefix_len > remain {
        return Ok(Ordering::Greater);
    }
    Ok(cmp)
}

pub(crate) unsafe fn iter_node<V, F>(
    n: NodeRef,
    it: &mut RangeIter<'_, F>,
    mut depth: usize,
    parent: Option<&Header>,
    parent_version: u64,
    mut begin_cmp: Ordering,
    mut end_cmp: Ordering,
) -> Result<bool, Restart>
where
    F: FnMut(&[u8], &V) -> bool,
{
    let h: &Header = n.header();
    let version = h.version.read_lock()?;
    if let Some(p) = parent {
        p.version.check(parent_version)?;
    }

    match begin_cmp {
        Ordering::Equal => {
            begin_cmp = full_compare::<V>(h, version, it.current_begin(), depth)?;
            if begin_cmp == Ordering::Less {
                // The node's path diverges below begin, taking the whole
                // subtree with it.
                h.version.check(version)?;
                return Ok(false);
            }
        }
        Ordering::Less => return Ok(false),
        Ordering::Greater => {}
    }
    match end_cmp {
        Ordering::Equal => {
            end_cmp = full_compare::<V>(h, version, it.end_key(), depth)?;
            if end_cmp == Ordering::Greater {
                h.version.check(version)?;
                return Ok(true);
            }
        }
        Ordering::Greater => return Ok(true),
        Ordering::Less => {}
    }
    depth += h.prefix_len;

    // The prefix leaf's key equals the path to this node, so it sorts before
    // every child. It is only barred when the bound-equal walk has not
    // consumed the whole begin key yet, or by the inclusion flags when the
    // path lands exactly on a bound.
    let mut use_prefix_leaf = true;
    if begin_cmp == Ordering::Equal {
        if depth < it.current_begin().len() {
            use_prefix_leaf = false;
        } else {
            use_prefix_leaf = it.begin_inclusive();
            begin_cmp = Ordering::Greater;
        }
    }
    if end_cmp == Ordering::Equal && depth == it.end_key().len() {
        use_prefix_leaf = it.include_end;
        end_cmp = Ordering::Greater;
    }

    let prefix_leaf = h.prefix_leaf_ref::<V>();
    h.version.check(version)?;
    if use_prefix_leaf {
        if let Some(l) = prefix_leaf {
            let (key, value) = (l.key(), l.value_ptr());
            h.version.check(version)?;
            it.prev = Some(key.to_vec());
            if (it.f)(key, &*value) {
                return Ok(true);
            }
        }
    }
    if end_cmp == Ordering::Greater {
        return Ok(true);
    }

    match h.node_type {
        NodeType::Node4 => {
            let node = h.as_n4();
            iter_sorted::<V, F>(h, &node.keys, &node.children, it, version, depth, begin_cmp, end_cmp)
        }
        NodeType::Node16 => {
            let node = h.as_n16();
            iter_sorted::<V, F>(h, &node.keys, &node.children, it, version, depth, begin_cmp, end_cmp)
        }
        NodeType::Node48 | NodeType::Node256 => {
            iter_indexed::<V, F>(h, it, version, depth, begin_cmp, end_cmp)
        }
        NodeType::Leaf => unreachable!("artree: leaf viewed as inner node"),
    }
}

unsafe fn iter_sorted<V, F>(
    h: &Header,
    keys: &[u8],
    children: &[AtomicPtr<u8>],
    it: &mut RangeIter<'_, F>,
    version: u64,
    depth: usize,
    begin_cmp: Ordering,
    end_cmp: Ordering,
) -> Result<bool, Restart>
where
    F: FnMut(&[u8], &V) -> bool,
{
    let bkey = if begin_cmp == Ordering::Equal {
        it.current_begin()[depth]
    } else {
        0
    };
    let ekey = if end_cmp == Ordering::Equal {
        it.end_key()[depth]
    } else {
        0
    };
    for i in 0..h.num_children as usize {
        let key = keys[i];
        let child = children[i].load(MemOrdering::Acquire);
        h.version.check(version)?;
        let child = NodeRef::from_raw(child)
            .unwrap_or_else(|| unreachable!("artree: missing child in sorted node"));
        if begin_cmp == Ordering::Equal && key < bkey {
            continue;
        }
        if end_cmp == Ordering::Equal && key > ekey {
            return Ok(true);
        }
        if access_child::<V, F>(h, child, it, version, depth, begin_cmp, end_cmp, bkey, ekey, key)? {
            return Ok(true);
        }
    }
    Ok(false)
}

unsafe fn iter_indexed<V, F>(
    h: &Header,
    it: &mut RangeIter<'_, F>,
    version: u64,
    depth: usize,
    begin_cmp: Ordering,
    end_cmp: Ordering,
) -> Result<bool, Restart>
where
    F: FnMut(&[u8], &V) -> bool,
{
    let bkey = if begin_cmp == Ordering::Equal {
        it.current_begin()[depth]
    } else {
        0
    };
    let ekey = if end_cmp == Ordering::Equal {
        it.end_key()[depth]
    } else {
        0
    };
    for b in bkey as usize..256 {
        if end_cmp == Ordering::Equal && b as u8 > ekey {
            return Ok(true);
        }
        let child = match h.node_type {
            NodeType::Node48 => {
                let node = h.as_n48();
                let pos = node.index[b];
                h.version.check(version)?;
                if pos == 0 {
                    continue;
                }
                node.children[pos as usize - 1].load(MemOrdering::Acquire)
            }
            NodeType::Node256 => h.as_n256().children[b].load(MemOrdering::Acquire),
            _ => unreachable!("artree: indexed iteration over a sorted layout"),
        };
        h.version.check(version)?;
        let child = match NodeRef::from_raw(child) {
            Some(child) => child,
            None => continue,
        };
        if access_child::<V, F>(h, child, it, version, depth, begin_cmp, end_cmp, bkey, ekey, b as u8)?
        {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Visit one child. Leaves are bound-checked on their full key; inner nodes
/// recurse with bounds refined by the edge byte: an edge strictly inside the
/// bounds clears them for the entire subtree.
unsafe fn access_child<V, F>(
    h: &Header,
    child: NodeRef,
    it: &mut RangeIter<'_, F>,
    version: u64,
    depth: usize,
    mut begin_cmp: Ordering,
    mut end_cmp: Ordering,
    bkey: u8,
    ekey: u8,
    key: u8,
) -> Result<bool, Restart>
where
    F: FnMut(&[u8], &V) -> bool,
{
    if child.is_leaf() {
        let l = child.leaf::<V>();
        let (leaf_key, value) = (l.key(), l.value_ptr());
        h.version.check(version)?;
        if begin_cmp == Ordering::Equal && key == bkey {
            let cmp = leaf_key[depth..].cmp(&it.current_begin()[depth..]);
            if cmp == Ordering::Less || (cmp == Ordering::Equal && !it.begin_inclusive()) {
                return Ok(false);
            }
        }
        if end_cmp == Ordering::Equal && key == ekey {
            let cmp = leaf_key[depth..].cmp(&it.end_key()[depth..]);
            if cmp == Ordering::Greater || (cmp == Ordering::Equal && !it.include_end) {
                return Ok(true);
            }
        }
        it.prev = Some(leaf_key.to_vec());
        Ok((it.f)(leaf_key, &*value))
    } else {
        if begin_cmp == Ordering::Equal && key > bkey {
            begin_cmp = Ordering::Greater;
        }
        if end_cmp == Ordering::Equal && key < ekey {
            end_cmp = Ordering::Less;
        }
        iter_node::<V, F>(child, it, depth + 1, Some(h), version, begin_cmp, end_cmp)
    }
}
