//! Collector faults
//!
//! A fault means some participant broke the graph protocol (usually a
//! `traverse` implementation reporting edges it does not own). The collection
//! in progress is abandoned without unlinking anything; the process keeps
//! running and the next collection starts from scratch.

use thiserror::Error;

/// Invariant violation detected while collecting
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectorFault {
    /// More edges point at a node than its reference count allows
    #[error(
        "object {address:#x} has {internal_refs} internal references but a reference count of {ref_count}"
    )]
    InternalRefsExceedRefCount {
        address: usize,
        internal_refs: u32,
        ref_count: u32,
    },

    /// A refcounted object in the graph had a zero count
    #[error("zero reference count observed for graph object {address:#x}")]
    ZeroRefCount { address: usize },

    /// A refcounted object's count does not fit the graph's counters
    #[error("reference count of graph object {address:#x} overflows")]
    SaturatedRefCount { address: usize },

    /// A weak map was still grey after scanning
    #[error("weak map entry references an uncolored node")]
    UncoloredWeakMapEntry,
}

impl CollectorFault {
    /// Address of the offending object, if the fault names one
    pub fn address(&self) -> Option<usize> {
        match *self {
            CollectorFault::InternalRefsExceedRefCount { address, .. }
            | CollectorFault::ZeroRefCount { address }
            | CollectorFault::SaturatedRefCount { address } => Some(address),
            CollectorFault::UncoloredWeakMapEntry => None,
        }
    }
}
