//! Deferred destruction of replaced nodes.
//!
//! Writers never free memory directly: a node swapped out of the tree is
//! marked obsolete and handed to the epoch reclaimer, which runs the drop
//! once every thread pinned at swap time has unpinned. Readers therefore may
//! chase stale pointers right up to their next version check without ever
//! touching freed memory.

use std::sync::atomic::Ordering;

use crossbeam_epoch::Guard;

use crate::node::{Header, Leaf, Node16, Node256, Node4, Node48, NodeRef, NodeType};

/// Defer destruction of an inner node's shell. Children and the prefix leaf
/// live on in the replacement and are deliberately not touched.
pub(crate) unsafe fn defer_drop_node(guard: &Guard, node: NodeRef) {
    let ptr = node.as_raw();
    let node_type = node.node_type();
    guard.defer_unchecked(move || drop_node_shell(ptr, node_type));
}

unsafe fn drop_node_shell(ptr: *mut u8, node_type: NodeType) {
    match node_type {
        NodeType::Node4 => drop(Box::from_raw(ptr.cast::<Node4>())),
        NodeType::Node16 => drop(Box::from_raw(ptr.cast::<Node16>())),
        NodeType::Node48 => drop(Box::from_raw(ptr.cast::<Node48>())),
        NodeType::Node256 => drop(Box::from_raw(ptr.cast::<Node256>())),
        NodeType::Leaf => unreachable!("artree: leaf reclaimed as inner node"),
    }
}

/// Defer destruction of a detached leaf together with its value.
pub(crate) unsafe fn defer_drop_leaf<V>(guard: &Guard, leaf: *mut u8) {
    let leaf = leaf.cast::<Leaf<V>>();
    guard.defer_unchecked(move || drop_leaf(leaf));
}

pub(crate) unsafe fn defer_drop_value<V>(guard: &Guard, value: *mut V) {
    guard.defer_unchecked(move || drop(Box::from_raw(value)));
}

/// Free a leaf that still owns its value.
pub(crate) unsafe fn drop_leaf<V>(leaf: *mut Leaf<V>) {
    debug_assert!(matches!((*leaf).node_type, NodeType::Leaf));
    let value = Leaf::take_value(leaf);
    if !value.is_null() {
        drop(Box::from_raw(value));
    }
    drop(Box::from_raw(leaf));
}

/// Free a leaf whose value has already been taken.
pub(crate) unsafe fn drop_leaf_shell<V>(leaf: *mut Leaf<V>) {
    debug_assert!(Leaf::take_value(leaf).is_null());
    drop(Box::from_raw(leaf));
}

/// Free the whole tree. Runs with exclusive access on drop, so a plain
/// worklist replaces the epoch machinery; the explicit stack keeps key-length
/// sized tries from overflowing the call stack.
pub(crate) unsafe fn drop_tree<V>(root: *mut u8) {
    let mut work = vec![root];
    while let Some(ptr) = work.pop() {
        let node = match NodeRef::from_raw(ptr) {
            Some(node) => node,
            None => continue,
        };
        if node.is_leaf() {
            drop_leaf(ptr.cast::<Leaf<V>>());
            continue;
        }
        let h: &Header = node.header();
        work.push(h.prefix_leaf.load(Ordering::Relaxed));
        match h.node_type {
            NodeType::Node4 => {
                let n = h.as_n4();
                for c in &n.children {
                    work.push(c.load(Ordering::Relaxed));
                }
            }
            NodeType::Node16 => {
                let n = h.as_n16();
                for c in &n.children {
                    work.push(c.load(Ordering::Relaxed));
                }
            }
            NodeType::Node48 => {
                let n = h.as_n48();
                for c in &n.children {
                    work.push(c.load(Ordering::Relaxed));
                }
            }
            NodeType::Node256 => {
                let n = h.as_n256();
                for c in &n.children {
                    work.push(c.load(Ordering::Relaxed));
                }
            }
            NodeType::Leaf => unreachable!("artree: leaf viewed as inner node"),
        }
        drop_node_shell(ptr, h.node_type);
    }
}
