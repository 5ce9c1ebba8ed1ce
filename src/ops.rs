//! The operation engine: point lookup, insert, remove and the min/max walks.
//!
//! Every walk follows the optimistic coupling pattern. Per node: snapshot the
//! version, validate the parent's snapshot, do the node-local reads, then
//! re-validate before acting on anything read. Descending carries the
//! `(node, depth, parent, parent_version, slot)` state through a loop rather
//! than a call stack, since the depth is proportional to the key length.
//! Terminal steps trade a validated snapshot for the write lock; any failed
//! validation or upgrade surfaces as [`Restart`] and the driver re-enters
//! from the root.

use std::{
    cmp::min,
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

use crossbeam_epoch::Guard;

use crate::{
    debug,
    lock::Restart,
    node::{Header, Leaf, NodeRef, MAX_PREFIX_LEN},
    node_op, reclaim,
};

pub(crate) type Parent<'a> = Option<(&'a Header, u64)>;

fn check_parent(parent: Parent<'_>) -> Result<(), Restart> {
    match parent {
        Some((p, version)) => p.version.check(version),
        None => Ok(()),
    }
}

fn upgrade_parent(parent: Parent<'_>) -> Result<(), Restart> {
    match parent {
        Some((p, version)) => p.version.upgrade(version),
        None => Ok(()),
    }
}

fn unlock_parent(parent: Parent<'_>) {
    if let Some((p, _)) = parent {
        p.version.unlock();
    }
}

pub(crate) unsafe fn search<V: Clone>(mut n: NodeRef, key: &[u8]) -> Result<Option<V>, Restart> {
    let mut depth = 0;
    let mut parent: Parent<'_> = None;

    loop {
        let h: &Header = n.header();
        let version = h.version.read_lock()?;
        check_parent(parent)?;

        if h.check_prefix(key, depth) != min(h.prefix_len, MAX_PREFIX_LEN) {
            h.version.check(version)?;
            return Ok(None);
        }
        depth += h.prefix_len;

        if depth == key.len() {
            let found = h
                .prefix_leaf_ref::<V>()
                .filter(|l| l.matches(key))
                .map(|l| l.value_ptr());
            h.version.check(version)?;
            return Ok(found.map(|v| (*v).clone()));
        }
        if depth > key.len() {
            // The compressed path is longer than the key, so the key cannot
            // be stored below here.
            h.version.check(version)?;
            return Ok(None);
        }

        let (next, _, _) = h.find_child(key[depth]);
        h.version.check(version)?;

        let next = match next {
            Some(next) => next,
            None => {
                h.version.check(version)?;
                return Ok(None);
            }
        };
        if next.is_leaf() {
            let l = next.leaf::<V>();
            let found = if l.matches(key) { Some(l.value_ptr()) } else { None };
            h.version.check(version)?;
            return Ok(found.map(|v| (*v).clone()));
        }

        depth += 1;
        parent = Some((h, version));
        n = next;
    }
}

/// Recover a full key for a node whose true prefix exceeds the stored bytes:
/// the prefix leaf if present, otherwise any leaf reached through first
/// children. Every hop is validated.
pub(crate) unsafe fn full_key_of<'g, V: 'g>(h: &Header, version: u64) -> Result<&'g [u8], Restart> {
    let mut h = h;
    let mut version = version;
    loop {
        if let Some(l) = h.prefix_leaf_ref::<V>() {
            let key: &'g [u8] = l.key();
            h.version.check(version)?;
            return Ok(key);
        }
        let next = h.first_child();
        h.version.check(version)?;
        let next = next.unwrap_or_else(|| unreachable!("artree: inner node with no descendants"));
        if next.is_leaf() {
            let key: &'g [u8] = next.leaf::<V>().key();
            h.version.check(version)?;
            return Ok(key);
        }
        let next_header: &Header = next.header();
        version = next_header.version.read_lock()?;
        h = next_header;
    }
}

/// Offset of the first divergence between key and compressed path, plus the
/// recovered full key when the path is only partially stored. Equality with
/// `prefix_len` means no divergence.
unsafe fn prefix_mismatch<'g, V: 'g>(
    h: &Header,
    key: &[u8],
    depth: usize,
    parent: Parent<'_>,
    version: u64,
) -> Result<(usize, Option<&'g [u8]>), Restart> {
    if h.prefix_len <= MAX_PREFIX_LEN {
        return Ok((h.check_prefix(key, depth), None));
    }
    loop {
        h.version.check(version)?;
        check_parent(parent)?;
        let full_key = match full_key_of::<V>(h, version) {
            Ok(full_key) => full_key,
            // A conflict below this node; the node itself is still valid.
            Err(Restart) => continue,
        };
        let limit = min(key.len(), depth + h.prefix_len);
        let mut i = depth;
        while i < limit && key[i] == full_key[i] {
            i += 1;
        }
        return Ok((i - depth, Some(full_key)));
    }
}

pub(crate) unsafe fn insert<V>(
    mut n: NodeRef,
    key: &[u8],
    leaf: *mut Leaf<V>,
    root_loc: *const AtomicPtr<u8>,
    guard: &Guard,
) -> Result<(), Restart> {
    let mut depth = 0;
    let mut parent: Parent<'_> = None;
    let mut node_loc = root_loc;

    loop {
        let h: &Header = n.header();
        let version = h.version.read_lock()?;

        let (p, full_key) = prefix_mismatch::<V>(h, key, depth, parent, version)?;
        if p != h.prefix_len {
            upgrade_parent(parent)?;
            if h.version.upgrade(version).is_err() {
                unlock_parent(parent);
                return Err(Restart);
            }
            node_op::split_prefix::<V>(n, key, full_key, leaf, depth, p, node_loc);
            h.version.unlock();
            unlock_parent(parent);
            return Ok(());
        }
        depth += h.prefix_len;

        if depth == key.len() {
            h.version.upgrade(version)?;
            if check_parent(parent).is_err() {
                h.version.unlock();
                return Err(Restart);
            }
            node_op::update_prefix_leaf::<V>(h, leaf, guard);
            h.version.unlock();
            return Ok(());
        }

        let (next, next_loc, _) = h.find_child(key[depth]);
        h.version.check(version)?;

        let next = match next {
            Some(next) => next,
            None => {
                if h.is_full() {
                    upgrade_parent(parent)?;
                    if h.version.upgrade(version).is_err() {
                        unlock_parent(parent);
                        return Err(Restart);
                    }
                    node_op::grow_and_insert(h, key[depth], leaf.cast(), node_loc);
                    debug::record_grow();
                    h.version.unlock_obsolete();
                    unlock_parent(parent);
                    reclaim::defer_drop_node(guard, n);
                } else {
                    h.version.upgrade(version)?;
                    if check_parent(parent).is_err() {
                        h.version.unlock();
                        return Err(Restart);
                    }
                    node_op::insert_child(h, key[depth], leaf.cast());
                    h.version.unlock();
                }
                return Ok(());
            }
        };

        check_parent(parent)?;

        if next.is_leaf() {
            h.version.upgrade(version)?;
            node_op::update_or_expand::<V>(next, key, leaf, depth + 1, next_loc, guard);
            h.version.unlock();
            return Ok(());
        }

        depth += 1;
        parent = Some((h, version));
        node_loc = next_loc;
        n = next;
    }
}

pub(crate) unsafe fn remove<V>(
    mut n: NodeRef,
    key: &[u8],
    root_loc: *const AtomicPtr<u8>,
    guard: &Guard,
) -> Result<(), Restart> {
    let mut depth = 0;
    let mut parent: Parent<'_> = None;
    let mut node_loc = root_loc;

    loop {
        let h: &Header = n.header();
        let version = h.version.read_lock()?;
        check_parent(parent)?;

        if h.check_prefix(key, depth) != min(h.prefix_len, MAX_PREFIX_LEN) {
            h.version.check(version)?;
            return Ok(());
        }
        depth += h.prefix_len;

        if depth == key.len() {
            match h.prefix_leaf_ref::<V>() {
                Some(l) if l.matches(key) => {}
                _ => {
                    h.version.check(version)?;
                    return Ok(());
                }
            }
            if h.should_compress(parent.is_some()) {
                upgrade_parent(parent)?;
                if h.version.upgrade(version).is_err() {
                    unlock_parent(parent);
                    return Err(Restart);
                }
                let removed = h.prefix_leaf.load(Ordering::Relaxed);
                h.prefix_leaf.store(ptr::null_mut(), Ordering::Release);
                reclaim::defer_drop_leaf::<V>(guard, removed);
                if !node_op::compress_child(h.as_n4(), 0, node_loc) {
                    h.version.unlock();
                    unlock_parent(parent);
                    return Err(Restart);
                }
                debug::record_compress();
                h.version.unlock_obsolete();
                unlock_parent(parent);
                reclaim::defer_drop_node(guard, n);
            } else {
                h.version.upgrade(version)?;
                let removed = h.prefix_leaf.load(Ordering::Relaxed);
                h.prefix_leaf.store(ptr::null_mut(), Ordering::Release);
                reclaim::defer_drop_leaf::<V>(guard, removed);
                h.version.unlock();
            }
            return Ok(());
        }
        if depth > key.len() {
            h.version.check(version)?;
            return Ok(());
        }

        let (next, next_loc, position) = h.find_child(key[depth]);
        h.version.check(version)?;

        let next = match next {
            Some(next) => next,
            None => {
                h.version.check(version)?;
                return Ok(());
            }
        };

        if next.is_leaf() {
            if !next.leaf::<V>().matches(key) {
                h.version.check(version)?;
                return Ok(());
            }
            if h.should_shrink(parent.is_some()) {
                upgrade_parent(parent)?;
                if h.version.upgrade(version).is_err() {
                    unlock_parent(parent);
                    return Err(Restart);
                }
                if !node_op::remove_child_and_shrink(h, key[depth], node_loc) {
                    h.version.unlock();
                    unlock_parent(parent);
                    return Err(Restart);
                }
                debug::record_shrink();
                h.version.unlock_obsolete();
                unlock_parent(parent);
                reclaim::defer_drop_node(guard, n);
                reclaim::defer_drop_leaf::<V>(guard, next.as_raw());
            } else {
                h.version.upgrade(version)?;
                node_op::remove_child(h, position);
                h.version.unlock();
                reclaim::defer_drop_leaf::<V>(guard, next.as_raw());
            }
            return Ok(());
        }

        depth += 1;
        parent = Some((h, version));
        node_loc = next_loc;
        n = next;
    }
}

pub(crate) unsafe fn minimal<V: Clone>(mut n: NodeRef) -> Result<Option<(Vec<u8>, V)>, Restart> {
    let mut parent: Parent<'_> = None;

    loop {
        let h: &Header = n.header();
        let version = h.version.read_lock()?;
        check_parent(parent)?;

        // A key that is a prefix of every other key below this node is the
        // smallest of the subtree.
        let prefix_leaf = h.prefix_leaf_ref::<V>();
        h.version.check(version)?;
        if let Some(l) = prefix_leaf {
            let (key, value) = (l.key(), l.value_ptr());
            h.version.check(version)?;
            return Ok(Some((key.to_vec(), (*value).clone())));
        }

        let child = h.first_child();
        h.version.check(version)?;
        let child = match child {
            Some(child) => child,
            // No prefix leaf and no children: the empty root.
            None => return Ok(None),
        };

        if child.is_leaf() {
            let l = child.leaf::<V>();
            let (key, value) = (l.key(), l.value_ptr());
            h.version.check(version)?;
            return Ok(Some((key.to_vec(), (*value).clone())));
        }

        parent = Some((h, version));
        n = child;
    }
}

pub(crate) unsafe fn maximal<V: Clone>(mut n: NodeRef) -> Result<Option<(Vec<u8>, V)>, Restart> {
    let mut parent: Parent<'_> = None;

    loop {
        let h: &Header = n.header();
        let version = h.version.read_lock()?;
        check_parent(parent)?;

        let child = h.last_child();
        h.version.check(version)?;
        let child = match child {
            Some(child) => child,
            None => {
                // No children left; the prefix leaf, if any, is the maximum.
                let prefix_leaf = h.prefix_leaf_ref::<V>();
                h.version.check(version)?;
                match prefix_leaf {
                    Some(l) => {
                        let (key, value) = (l.key(), l.value_ptr());
                        h.version.check(version)?;
                        return Ok(Some((key.to_vec(), (*value).clone())));
                    }
                    None => return Ok(None),
                }
            }
        };

        if child.is_leaf() {
            let l = child.leaf::<V>();
            let (key, value) = (l.key(), l.value_ptr());
            h.version.check(version)?;
            return Ok(Some((key.to_vec(), (*value).clone())));
        }

        parent = Some((h, version));
        n = child;
    }
}
