//! Artree - a concurrent, in-memory, ordered index from byte-string keys to
//! opaque values, built as an adaptive radix tree with optimistic lock
//! coupling.
//!
//! The tree layout follows "The Adaptive Radix Tree: ARTful Indexing for
//! Main-Memory Databases" (Leis, Kemper and Neumann, ICDE 2013): inner nodes
//! adapt among four physical layouts as their fan-out changes and carry a
//! compressed path prefix. Synchronization follows "The ART of Practical
//! Synchronization" (Leis et al., DaMoN 2016): every inner node embeds a
//! version word acting as a sequence lock, readers validate instead of
//! locking, and writers lock only the node they mutate plus its parent when
//! the structure may change. Any conflict restarts the operation from the
//! root. Replaced nodes are reclaimed through [`crossbeam_epoch`].
//!
//! Readers never block readers or writers; writers to disjoint subtrees do
//! not contend. Single-key operations are linearizable. Range scans are
//! ordered and never emit a key twice, but are not snapshots: keys written
//! at unvisited positions during the scan may or may not be observed.

use std::{
    marker::PhantomData,
    sync::atomic::{AtomicPtr, Ordering},
};

use crossbeam_epoch as epoch;

use crate::{
    debug::{DebugRoot, NodeKind},
    lock::Restart,
    node::{Leaf, Node4, NodeRef, NodeType},
    range::RangeIter,
};

pub mod debug;
mod lock;
mod node;
mod node_op;
mod ops;
mod range;
mod reclaim;

/// A concurrent ordered map from byte strings to values of type `V`.
///
/// All operations may be invoked from any number of threads. Keys are
/// compared lexicographically as unsigned bytes; the empty key and a missing
/// key slice are the same key. Values handed out by reads are clones, so `V`
/// is typically something cheap to clone such as an integer, an `Arc`, or a
/// small string.
pub struct Art<V> {
    /// Always an inner node, never null and never a leaf. Replaced wholesale
    /// when the root grows, shrinks or splits its prefix.
    root: AtomicPtr<u8>,
    _marker: PhantomData<V>,
}

unsafe impl<V: Send + Sync> Send for Art<V> {}
unsafe impl<V: Send + Sync> Sync for Art<V> {}

impl<V: Send + Sync + 'static> Art<V> {
    /// Create an empty tree. The root starts as an empty Node4.
    pub fn new() -> Art<V> {
        Art {
            root: AtomicPtr::new(Node4::alloc().cast()),
            _marker: PhantomData,
        }
    }

    /// Look up `key` and return a clone of its value.
    pub fn get(&self, key: &[u8]) -> Option<V>
    where
        V: Clone,
    {
        let _guard = epoch::pin();
        loop {
            match unsafe { ops::search::<V>(self.root_ref(), key) } {
                Ok(found) => return found,
                Err(Restart) => debug::record_restart(),
            }
        }
    }

    /// Insert `key` with `value`, replacing any existing value for the key.
    pub fn put(&self, key: &[u8], value: V) {
        let guard = epoch::pin();
        let leaf = Leaf::new_boxed(key, value);
        loop {
            match unsafe { ops::insert::<V>(self.root_ref(), key, leaf, &self.root, &guard) } {
                Ok(()) => return,
                Err(Restart) => debug::record_restart(),
            }
        }
    }

    /// Remove `key` and its value. Removing an absent key is a no-op.
    pub fn delete(&self, key: &[u8]) {
        let guard = epoch::pin();
        loop {
            match unsafe { ops::remove::<V>(self.root_ref(), key, &self.root, &guard) } {
                Ok(()) => return,
                Err(Restart) => debug::record_restart(),
            }
        }
    }

    /// Invoke `f` for every key starting with `prefix`, in ascending order.
    /// `f` returns true to halt the scan.
    pub fn prefix<F>(&self, prefix: &[u8], f: F)
    where
        F: FnMut(&[u8], &V) -> bool,
    {
        let end = range::prefix_upper_bound(prefix);
        self.scan(prefix, end.as_deref(), true, false, f);
    }

    /// Invoke `f` for every key between `begin` and `end` in ascending
    /// order, with each bound included or excluded per its flag. `f` returns
    /// true to halt the scan.
    pub fn range<F>(&self, begin: &[u8], end: &[u8], include_begin: bool, include_end: bool, f: F)
    where
        F: FnMut(&[u8], &V) -> bool,
    {
        self.scan(begin, Some(end), include_begin, include_end, f);
    }

    /// Same as [`Art::range`], stopping after `k` keys have been emitted.
    pub fn range_top<F>(
        &self,
        k: usize,
        begin: &[u8],
        end: &[u8],
        include_begin: bool,
        include_end: bool,
        mut f: F,
    ) where
        F: FnMut(&[u8], &V) -> bool,
    {
        if k == 0 {
            return;
        }
        let mut remaining = k;
        self.scan(begin, Some(end), include_begin, include_end, move |key, value| {
            if f(key, value) {
                return true;
            }
            remaining -= 1;
            remaining == 0
        });
    }

    /// Smallest key and a clone of its value, or None when empty.
    pub fn min(&self) -> Option<(Vec<u8>, V)>
    where
        V: Clone,
    {
        let _guard = epoch::pin();
        loop {
            match unsafe { ops::minimal::<V>(self.root_ref()) } {
                Ok(found) => return found,
                Err(Restart) => debug::record_restart(),
            }
        }
    }

    /// Largest key and a clone of its value, or None when empty.
    pub fn max(&self) -> Option<(Vec<u8>, V)>
    where
        V: Clone,
    {
        let _guard = epoch::pin();
        loop {
            match unsafe { ops::maximal::<V>(self.root_ref()) } {
                Ok(found) => return found,
                Err(Restart) => debug::record_restart(),
            }
        }
    }

    /// Validated snapshot of the root node, for structural assertions.
    pub fn debug_root(&self) -> DebugRoot {
        let _guard = epoch::pin();
        loop {
            let root = self.root_ref();
            let h = unsafe { root.header() };
            let version = match h.version.read_lock() {
                Ok(version) => version,
                Err(Restart) => continue,
            };
            let kind = match h.node_type {
                NodeType::Node4 => NodeKind::Node4,
                NodeType::Node16 => NodeKind::Node16,
                NodeType::Node48 => NodeKind::Node48,
                NodeType::Node256 => NodeKind::Node256,
                NodeType::Leaf => unreachable!("artree: the root is always an inner node"),
            };
            let num_children = h.num_children;
            if h.version.check(version).is_ok() {
                return DebugRoot {
                    kind,
                    num_children,
                    addr: root.as_raw() as usize,
                };
            }
        }
    }

    fn scan<F>(&self, begin: &[u8], end: Option<&[u8]>, include_begin: bool, include_end: bool, f: F)
    where
        F: FnMut(&[u8], &V) -> bool,
    {
        let _guard = epoch::pin();
        let mut it = RangeIter::new(begin, end, include_begin, include_end, f);
        loop {
            let end_cmp = it.initial_end_cmp();
            let done = unsafe {
                range::iter_node::<V, F>(
                    self.root_ref(),
                    &mut it,
                    0,
                    None,
                    0,
                    std::cmp::Ordering::Equal,
                    end_cmp,
                )
            };
            match done {
                // A scan that ran out of tree is as finished as one that
                // reached its end bound.
                Ok(_) => return,
                Err(Restart) => debug::record_restart(),
            }
        }
    }

    fn root_ref(&self) -> NodeRef {
        NodeRef::from_raw(self.root.load(Ordering::Acquire)).expect("artree: root is never null")
    }
}

impl<V: Send + Sync + 'static> Default for Art<V> {
    fn default() -> Art<V> {
        Art::new()
    }
}

impl<V> Drop for Art<V> {
    fn drop(&mut self) {
        unsafe { reclaim::drop_tree::<V>(self.root.load(Ordering::Relaxed)) }
    }
}
