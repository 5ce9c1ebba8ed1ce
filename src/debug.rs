//! Structural diagnostics: process-wide counters for the interesting tree
//! transitions, and a validated snapshot of the root for tests that assert
//! layout transitions.

use std::sync::atomic::{AtomicU64, Ordering};

static RESTARTS: AtomicU64 = AtomicU64::new(0);
static GROWS: AtomicU64 = AtomicU64::new(0);
static SHRINKS: AtomicU64 = AtomicU64::new(0);
static COMPRESSIONS: AtomicU64 = AtomicU64::new(0);

pub(crate) fn record_restart() {
    RESTARTS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_grow() {
    GROWS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_shrink() {
    SHRINKS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_compress() {
    COMPRESSIONS.fetch_add(1, Ordering::Relaxed);
}

/// Number of top-level operation restarts caused by version conflicts.
pub fn restarts() -> u64 {
    RESTARTS.load(Ordering::Relaxed)
}

/// Number of node layout promotions.
pub fn grows() -> u64 {
    GROWS.load(Ordering::Relaxed)
}

/// Number of node layout demotions.
pub fn shrinks() -> u64 {
    SHRINKS.load(Ordering::Relaxed)
}

/// Number of single-child nodes fused into their parent edge.
pub fn compressions() -> u64 {
    COMPRESSIONS.load(Ordering::Relaxed)
}

pub fn reset_counters() {
    RESTARTS.store(0, Ordering::Relaxed);
    GROWS.store(0, Ordering::Relaxed);
    SHRINKS.store(0, Ordering::Relaxed);
    COMPRESSIONS.store(0, Ordering::Relaxed);
}

/// Physical layout of an inner node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Node4,
    Node16,
    Node48,
    Node256,
}

/// Validated snapshot of the root node.
#[derive(Debug, Clone, Copy)]
pub struct DebugRoot {
    pub kind: NodeKind,
    /// Child count excluding the prefix leaf. A full Node256 reports 0.
    pub num_children: u8,
    /// Address of the root node, stable until a grow, shrink or prefix split
    /// replaces it.
    pub addr: usize,
}
