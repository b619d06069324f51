//! Interface to an external tracing collector
//!
//! Some objects in the graph may be owned by a tracing garbage collector (the
//! "traced heap"). Those objects have no reference count; instead the traced
//! heap tells the cycle collector whether each one is gray (only reachable
//! from the refcounted world, a candidate) or black (marked live by the traced
//! heap itself).
//!
//! Before the traced heap runs its own trace pass it must call
//! [`CycleCollector::prepare_for_garbage_collection`] so the collector never
//! holds graph nodes for objects the trace pass might free.
//!
//! [`CycleCollector::prepare_for_garbage_collection`]: crate::CycleCollector::prepare_for_garbage_collection

use crate::collector::CollectorResults;
use crate::participant::{ObjectRef, TraversalCallback};

/// Capabilities the cycle collector needs from a traced heap
pub trait TracedHeap {
    /// Report the traced heap's roots into the refcounted world
    ///
    /// Called once when a collection begins. Roots are reported through
    /// [`TraversalCallback::note_root`]: gray traced objects held by native
    /// holders and refcounted holders of traced objects.
    fn traverse_roots(&self, roots: &mut dyn TraversalCallback);

    /// Whether `object` is gray, i.e. not marked live by the traced heap
    fn is_gray(&self, object: ObjectRef) -> bool;

    /// Whether `object` is known live to the traced heap
    fn is_black(&self, object: ObjectRef) -> bool {
        !self.is_gray(object)
    }

    /// Keep a gray traced object alive until the next trace pass
    ///
    /// Called by the snow-white killer for traced objects held by a
    /// refcounted object that is being deleted.
    fn hold_for_cleanup(&self, object: ObjectRef) {
        let _ = object;
    }

    /// A traced object was found to be cycle garbage
    ///
    /// The traced heap reclaims it during its next trace pass.
    fn note_white_traced(&self, object: ObjectRef) {
        let _ = object;
    }

    /// A collection is starting
    fn begin_cycle_collection(&self) {}

    /// A collection finished
    fn end_cycle_collection(&self, results: &CollectorResults) {
        let _ = results;
    }
}
