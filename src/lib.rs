//! Recycle - an incremental cycle collector for reference-counted objects
//!
//! Reference counting frees most objects promptly but leaks cycles. This
//! library finds those cycles with trial deletion: objects whose count drops
//! are remembered as suspects in a purple buffer; a collection builds a graph
//! from the suspects, subtracts the references the graph accounts for, and
//! unlinks every group of objects that is only referenced from within itself.
//!
//! # Features
//!
//! - **Incremental**: graph building runs in slices bounded by a time or work
//!   [`SliceBudget`], scanning and unlinking run atomically in one slice
//! - **Deferred deletion**: objects whose count reaches zero are deleted in
//!   batches by the snow-white killer, never in the middle of a traversal
//! - **Traced heap interop**: objects owned by an external tracing collector
//!   can take part in the graph through [`TracedHeap`]
//! - **Weak maps**: ephemeron-style liveness through a fixpoint scan
//! - **Diagnostics**: a [`CollectorListener`] sees the whole graph and the
//!   verdict; [`RecordingListener`] turns that into edge-log dumps
//!
//! # Example
//!
//! ```
//! use recycle::{Cc, CollectorContext, Trace, Tracer};
//! use std::cell::RefCell;
//!
//! struct Node {
//!     next: RefCell<Option<Cc<Node>>>,
//! }
//!
//! unsafe impl Trace for Node {
//!     fn trace(&self, tracer: &mut Tracer<'_>) {
//!         self.next.trace(tracer);
//!     }
//! }
//!
//! let ctx = CollectorContext::new();
//! let a = ctx.allocate(Node { next: RefCell::new(None) });
//! let b = ctx.allocate(Node { next: RefCell::new(Some(a.clone())) });
//! *a.next.borrow_mut() = Some(b.clone());
//! drop((a, b));
//!
//! // the cycle is unreachable, a collection reclaims it
//! assert!(ctx.collect().unwrap());
//! ```

mod budget;
mod cc;
mod collector;
mod color;
mod context;
mod error;
mod listener;
mod options;
mod participant;
mod refcount;
mod trace;
mod traced;

pub mod arena;
pub mod builder;
pub mod graph;
pub mod purple;
pub mod scan;

#[cfg(test)]
mod testing;

pub use budget::SliceBudget;
pub use cc::Cc;
pub use collector::{CollectorResults, CollectorStats, CycleCollector, Phase};
pub use color::Color;
pub use context::CollectorContext;
pub use error::CollectorFault;
pub use listener::{CollectorListener, GraphLog, LogEntry, RecordingListener};
pub use options::CollectorOptions;
pub use participant::{Collectable, ObjectRef, Participant, TraversalCallback};
pub use refcount::RefCount;
pub use trace::{Trace, Tracer};
pub use traced::TracedHeap;

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn basic_allocation() {
        let ctx = CollectorContext::new();
        let ptr = ctx.allocate(42);
        assert_eq!(*ptr, 42);
    }

    #[test]
    fn allocation_and_collection() {
        let ctx = CollectorContext::new();
        let ptr1 = ctx.allocate(100);
        let ptr2 = ctx.allocate(200);
        drop(ptr2);
        assert_eq!(ctx.collector().suspected_count(), 1);
        assert_eq!(ctx.collect(), Ok(false));
        assert_eq!(ctx.collector().suspected_count(), 0);
        assert_eq!(*ptr1, 100);
    }

    struct Pair {
        other: RefCell<Option<Cc<Pair>>>,
    }

    unsafe impl Trace for Pair {
        fn trace(&self, tracer: &mut Tracer<'_>) {
            self.other.trace(tracer);
        }
    }

    #[test]
    fn cycle_is_collected() {
        let ctx = CollectorContext::new();
        let a = ctx.allocate(Pair { other: RefCell::new(None) });
        let b = ctx.allocate(Pair { other: RefCell::new(Some(a.clone())) });
        *a.other.borrow_mut() = Some(b.clone());
        let witness = b.clone();
        drop((a, b));

        assert_eq!(ctx.collect(), Ok(false));
        assert!(!Cc::is_unlinked(&witness));

        drop(witness);
        assert_eq!(ctx.collect(), Ok(true));
        let results = ctx.collector().last_results().unwrap();
        assert_eq!(results.freed_ref_counted, 2);
    }
}
