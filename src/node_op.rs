//! Structural node transformations: child insertion and removal, layout
//! promotion and demotion, single-child compression and prefix splitting.
//!
//! Every function here runs under the write locks its caller acquired.
//! Replacement nodes are built in private memory and published with a single
//! release store into the pointer slot that held the old node; the caller
//! then marks the old node obsolete and hands its shell to the epoch
//! reclaimer.

use std::{
    cmp::min,
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

use crossbeam_epoch::Guard;

use crate::{
    node::{
        Header, Leaf, Node16, Node256, Node4, Node48, NodeRef, NodeType, MAX_PREFIX_LEN,
        NODE16_MIN_SIZE, NODE256_MIN_SIZE, NODE48_GROW_SLOTS, NODE48_MIN_SIZE,
    },
    reclaim,
};

/// Insert into the sorted key/child arrays of Node4 and Node16. The caller
/// bumps `num_children` afterwards.
unsafe fn sorted_insert(keys: &mut [u8], children: &[AtomicPtr<u8>], num: usize, key: u8, child: *mut u8) {
    let mut i = 0;
    while i < num && keys[i] < key {
        i += 1;
    }
    for j in (i..num).rev() {
        keys[j + 1] = keys[j];
        children[j + 1].store(children[j].load(Ordering::Relaxed), Ordering::Relaxed);
    }
    keys[i] = key;
    children[i].store(child, Ordering::Release);
}

unsafe fn sorted_remove(keys: &mut [u8], children: &[AtomicPtr<u8>], num: usize, pos: usize) {
    for i in pos..num - 1 {
        keys[i] = keys[i + 1];
        children[i].store(children[i + 1].load(Ordering::Relaxed), Ordering::Relaxed);
    }
    children[num - 1].store(ptr::null_mut(), Ordering::Relaxed);
}

pub(crate) unsafe fn insert_child(h: &Header, key: u8, child: *mut u8) {
    match h.node_type {
        NodeType::Node4 => {
            let n = h.as_n4_mut();
            sorted_insert(&mut n.keys, &n.children, n.header.num_children as usize, key, child);
            n.header.num_children += 1;
        }
        NodeType::Node16 => {
            let n = h.as_n16_mut();
            sorted_insert(&mut n.keys, &n.children, n.header.num_children as usize, key, child);
            n.header.num_children += 1;
        }
        NodeType::Node48 => {
            let n = h.as_n48_mut();
            let pos = n.alloc_slot();
            n.children[pos].store(child, Ordering::Release);
            n.index[key as usize] = (pos + 1) as u8;
            n.header.num_children += 1;
        }
        NodeType::Node256 => {
            let n = h.as_n256_mut();
            n.children[key as usize].store(child, Ordering::Release);
            n.header.num_children = n.header.num_children.wrapping_add(1);
        }
        NodeType::Leaf => unreachable!("artree: insert_child on a leaf"),
    }
}

/// Detach the child at `position` (array index for Node4/Node16, edge byte
/// for Node48/Node256) in place. The caller reclaims the detached child.
pub(crate) unsafe fn remove_child(h: &Header, position: usize) {
    match h.node_type {
        NodeType::Node4 => {
            let n = h.as_n4_mut();
            sorted_remove(&mut n.keys, &n.children, n.header.num_children as usize, position);
            n.header.num_children -= 1;
        }
        NodeType::Node16 => {
            let n = h.as_n16_mut();
            sorted_remove(&mut n.keys, &n.children, n.header.num_children as usize, position);
            n.header.num_children -= 1;
        }
        NodeType::Node48 => {
            let n = h.as_n48_mut();
            let pos = n.index[position] as usize - 1;
            n.index[position] = 0;
            n.children[pos].store(ptr::null_mut(), Ordering::Relaxed);
            n.free_slot(pos);
            n.header.num_children -= 1;
        }
        NodeType::Node256 => {
            let n = h.as_n256_mut();
            n.children[position].store(ptr::null_mut(), Ordering::Relaxed);
            n.header.num_children = n.header.num_children.wrapping_sub(1);
        }
        NodeType::Leaf => unreachable!("artree: remove_child on a leaf"),
    }
}

/// Carry everything except the version over to a replacement node. The fresh
/// node starts with an unlocked version word of its own.
unsafe fn copy_header(dst: &mut Header, src: &Header) {
    dst.num_children = src.num_children;
    dst.prefix_len = src.prefix_len;
    dst.prefix = src.prefix;
    dst.prefix_leaf = AtomicPtr::new(src.prefix_leaf.load(Ordering::Relaxed));
}

/// Promote a full node to the next larger layout, add the new child and
/// publish the replacement into `node_loc`. The caller marks the old node
/// obsolete and defers its shell.
pub(crate) unsafe fn grow_and_insert(h: &Header, key: u8, child: *mut u8, node_loc: *const AtomicPtr<u8>) {
    match h.node_type {
        NodeType::Node4 => {
            let n = h.as_n4();
            let new = Node16::alloc();
            (&mut (*new).keys)[..4].copy_from_slice(&n.keys);
            for i in 0..4 {
                (*new).children[i].store(n.children[i].load(Ordering::Relaxed), Ordering::Relaxed);
            }
            copy_header(&mut (*new).header, h);
            insert_child(&(*new).header, key, child);
            (*node_loc).store(new.cast(), Ordering::Release);
        }
        NodeType::Node16 => {
            let n = h.as_n16();
            let new = Node48::alloc();
            for i in 0..16 {
                (*new).children[i].store(n.children[i].load(Ordering::Relaxed), Ordering::Relaxed);
                (*new).index[n.keys[i] as usize] = i as u8 + 1;
            }
            (*new).slots = NODE48_GROW_SLOTS;
            copy_header(&mut (*new).header, h);
            insert_child(&(*new).header, key, child);
            (*node_loc).store(new.cast(), Ordering::Release);
        }
        NodeType::Node48 => {
            let n = h.as_n48();
            let new = Node256::alloc();
            for b in 0..256 {
                let idx = n.index[b];
                if idx > 0 {
                    (*new).children[b].store(
                        n.children[idx as usize - 1].load(Ordering::Relaxed),
                        Ordering::Relaxed,
                    );
                }
            }
            copy_header(&mut (*new).header, h);
            insert_child(&(*new).header, key, child);
            (*node_loc).store(new.cast(), Ordering::Release);
        }
        // Node256 cannot fill up; there is nothing to grow into.
        NodeType::Node256 => insert_child(h, key, child),
        NodeType::Leaf => unreachable!("artree: grow_and_insert on a leaf"),
    }
}

/// Remove the child under `key` and demote the node to the next smaller
/// layout, publishing the replacement into `node_loc`. A Node4 is not
/// demoted; it is replaced by its `prefix_leaf` or its surviving child is
/// compressed into the parent edge. Returns false when the surviving child's
/// lock could not be taken, in which case the caller unlocks and restarts.
///
/// The hard-coded child counts are exact: shrinking fires precisely when
/// `num_children` sits at the layout's minimum, so the survivor count is
/// always minimum minus one.
pub(crate) unsafe fn remove_child_and_shrink(h: &Header, key: u8, node_loc: *const AtomicPtr<u8>) -> bool {
    match h.node_type {
        NodeType::Node4 => {
            let n = h.as_n4();
            let pl = h.prefix_leaf.load(Ordering::Relaxed);
            if !pl.is_null() {
                // The shrink predicate admits at most one child with a
                // prefix leaf present, so nothing is orphaned here.
                (*node_loc).store(pl, Ordering::Release);
                return true;
            }
            for i in 0..h.num_children as usize {
                if n.keys[i] != key {
                    return compress_child(n, i, node_loc);
                }
            }
            unreachable!("artree: node4 shrink without surviving child")
        }
        NodeType::Node16 => {
            let n = h.as_n16();
            let new = Node4::alloc();
            let mut idx = 0;
            for i in 0..h.num_children as usize {
                if n.keys[i] != key {
                    (*new).keys[idx] = n.keys[i];
                    (*new)
                        .children[idx]
                        .store(n.children[i].load(Ordering::Relaxed), Ordering::Relaxed);
                    idx += 1;
                }
            }
            copy_header(&mut (*new).header, h);
            (*new).header.num_children = NODE16_MIN_SIZE - 1;
            (*node_loc).store(new.cast(), Ordering::Release);
            true
        }
        NodeType::Node48 => {
            let n = h.as_n48();
            let new = Node16::alloc();
            let mut idx = 0;
            for b in 0..256 {
                if b != key as usize && n.index[b] != 0 {
                    (*new).keys[idx] = b as u8;
                    (*new).children[idx].store(
                        n.children[n.index[b] as usize - 1].load(Ordering::Relaxed),
                        Ordering::Relaxed,
                    );
                    idx += 1;
                }
            }
            copy_header(&mut (*new).header, h);
            (*new).header.num_children = NODE48_MIN_SIZE - 1;
            (*node_loc).store(new.cast(), Ordering::Release);
            true
        }
        NodeType::Node256 => {
            let n = h.as_n256();
            let new = Node48::alloc();
            for b in 0..256 {
                if b != key as usize {
                    let child = n.children[b].load(Ordering::Relaxed);
                    if !child.is_null() {
                        let pos = (*new).alloc_slot();
                        (*new).index[b] = pos as u8 + 1;
                        (*new).children[pos].store(child, Ordering::Relaxed);
                    }
                }
            }
            copy_header(&mut (*new).header, h);
            (*new).header.num_children = NODE256_MIN_SIZE - 1;
            (*node_loc).store(new.cast(), Ordering::Release);
            true
        }
        NodeType::Leaf => unreachable!("artree: remove_child_and_shrink on a leaf"),
    }
}

/// Fuse the surviving child of a single-child Node4 into the parent edge:
/// the child's compressed path grows by the node's path plus the edge byte,
/// and the child takes the node's place in the grandparent slot.
pub(crate) unsafe fn compress_child(n: &Node4, idx: usize, node_loc: *const AtomicPtr<u8>) -> bool {
    let child_raw = n.children[idx].load(Ordering::Relaxed);
    let child = NodeRef::from_raw(child_raw)
        .unwrap_or_else(|| unreachable!("artree: compressing a missing child"));
    if !child.is_leaf() {
        let ch = child.header_mut();
        if ch.version.lock().is_err() {
            return false;
        }
        let mut buf = n.header.prefix;
        let mut len = n.header.prefix_len;
        if len < MAX_PREFIX_LEN {
            buf[len] = n.keys[idx];
            len += 1;
        }
        if len < MAX_PREFIX_LEN {
            let sub = min(ch.prefix_len, MAX_PREFIX_LEN - len);
            buf[len..len + sub].copy_from_slice(&ch.prefix[..sub]);
            len += sub;
        }
        let stored = min(len, MAX_PREFIX_LEN);
        ch.prefix[..stored].copy_from_slice(&buf[..stored]);
        ch.prefix_len += n.header.prefix_len + 1;
        ch.version.unlock();
    }
    (*node_loc).store(child_raw, Ordering::Release);
    true
}

/// Split the compressed path of `n` at mismatch offset `p`: a fresh Node4
/// takes over the first `p` prefix bytes and adopts both `n` and the new
/// key's leaf. `full_key` carries a representative stored key and must be
/// present whenever the true prefix exceeds `MAX_PREFIX_LEN`.
pub(crate) unsafe fn split_prefix<V>(
    n: NodeRef,
    key: &[u8],
    full_key: Option<&[u8]>,
    leaf: *mut Leaf<V>,
    depth: usize,
    p: usize,
    node_loc: *const AtomicPtr<u8>,
) {
    let new = Node4::alloc();
    let new_header = &mut (*new).header;
    if key.len() == depth + p {
        new_header.prefix_leaf.store(leaf.cast(), Ordering::Relaxed);
    } else {
        insert_child(new_header, key[depth + p], leaf.cast());
    }
    new_header.prefix_len = p;
    let stored = min(MAX_PREFIX_LEN, p);
    let h = n.header_mut();
    new_header.prefix[..stored].copy_from_slice(&h.prefix[..stored]);

    if h.prefix_len <= MAX_PREFIX_LEN {
        insert_child(new_header, h.prefix[p], n.as_raw());
        h.prefix_len -= p + 1;
        h.prefix.copy_within(p + 1..p + 1 + min(MAX_PREFIX_LEN, h.prefix_len), 0);
    } else {
        let full_key = full_key.unwrap_or_else(|| unreachable!("artree: long prefix without full key"));
        insert_child(new_header, full_key[depth + p], n.as_raw());
        h.prefix_len -= p + 1;
        let stored = min(MAX_PREFIX_LEN, h.prefix_len);
        h.prefix[..stored].copy_from_slice(&full_key[depth + p + 1..depth + p + 1 + stored]);
    }
    (*node_loc).store(new.cast(), Ordering::Release);
}

/// Reached an existing leaf while inserting. Same key: swap the value in
/// place. Different key: expand into a Node4 carrying the common path, with
/// each key either a child under its next byte or the prefix leaf if it ends
/// there.
pub(crate) unsafe fn update_or_expand<V>(
    existing: NodeRef,
    key: &[u8],
    new_leaf: *mut Leaf<V>,
    depth: usize,
    node_loc: *const AtomicPtr<u8>,
    guard: &Guard,
) {
    let l = existing.leaf::<V>();
    if l.matches(key) {
        let value = Leaf::take_value(new_leaf);
        let old = l.replace_value(value);
        reclaim::defer_drop_value(guard, old);
        reclaim::drop_leaf_shell(new_leaf);
        return;
    }

    let limit = min(key.len(), l.key().len());
    let mut i = depth;
    while i < limit && l.key()[i] == key[i] {
        i += 1;
    }
    let new = Node4::alloc();
    let new_header = &mut (*new).header;
    new_header.prefix_len = i - depth;
    let stored = min(MAX_PREFIX_LEN, i - depth);
    new_header.prefix[..stored].copy_from_slice(&key[depth..depth + stored]);

    if i == l.key().len() {
        new_header.prefix_leaf.store(existing.as_raw(), Ordering::Relaxed);
    } else {
        insert_child(new_header, l.key()[i], existing.as_raw());
    }
    if i == key.len() {
        new_header.prefix_leaf.store(new_leaf.cast(), Ordering::Relaxed);
    } else {
        insert_child(new_header, key[i], new_leaf.cast());
    }
    (*node_loc).store(new.cast(), Ordering::Release);
}

/// Set or replace the leaf whose key equals the path to this node.
pub(crate) unsafe fn update_prefix_leaf<V>(h: &Header, new_leaf: *mut Leaf<V>, guard: &Guard) {
    let current = h.prefix_leaf.load(Ordering::Relaxed);
    if current.is_null() {
        h.prefix_leaf.store(new_leaf.cast(), Ordering::Release);
    } else {
        let l = &*(current as *const Leaf<V>);
        let value = Leaf::take_value(new_leaf);
        let old = l.replace_value(value);
        reclaim::defer_drop_value(guard, old);
        reclaim::drop_leaf_shell(new_leaf);
    }
}
