//! The cycle collector
//!
//! `CycleCollector` ties the purple buffer, the graph builder and the scan
//! phases together into an incremental state machine:
//!
//! ```text
//! Idle -> GraphBuilding -> ScanAndCollectWhite -> Cleanup -> Idle
//! ```
//!
//! Each call to [`CycleCollector::collect_slice`] advances the machine until
//! its budget runs out. Graph building can be spread over any number of
//! slices; scanning and unlinking always happen together in one slice, so a
//! mutator can never turn a weak reference into a strong one between the
//! verdict and the unlinking.
//!
//! Objects whose count reaches zero are never destroyed on the spot; they stay
//! in the purple buffer as snow-white objects until the snow-white killer runs
//! at the start of the next slice or at the end of a collection.

use crate::budget::SliceBudget;
use crate::builder::{BuildState, GraphBuilder};
use crate::color::Color;
use crate::error::CollectorFault;
use crate::graph::Graph;
use crate::listener::CollectorListener;
use crate::options::CollectorOptions;
use crate::participant::{ChildFinder, ObjectRef};
use crate::purple::PurpleBuffer;
use crate::scan;
use crate::traced::TracedHeap;
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;

/// Incremental collection phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    GraphBuilding,
    ScanAndCollectWhite,
    Cleanup,
}

/// What one collection saw and did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorResults {
    /// Refcounted objects traversed
    pub visited_ref_counted: usize,
    /// Traced-heap objects traversed
    pub visited_gced: usize,
    /// Refcounted objects unlinked as garbage
    pub freed_ref_counted: usize,
    /// Traced-heap objects handed back to the traced heap as garbage
    pub freed_gced: usize,
    /// Slices the collection was spread over
    pub num_slices: u32,
    /// Purple buffer size when the collection began
    pub suspected_at_start: usize,
    /// Graph building gave up; nothing was collected
    pub ran_out_of_memory: bool,
    /// Started by a full (non-incremental) request
    pub forced: bool,
    /// Abandoned because of a [`CollectorFault`]
    pub faulted: bool,
}

/// Totals over the collector's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorStats {
    pub collections: u64,
    pub faults: u64,
    pub out_of_memory: u64,
    pub freed_ref_counted: u64,
    pub freed_gced: u64,
    pub snow_white_freed: u64,
}

/// A single-threaded incremental cycle collector
///
/// The collector is neither `Send` nor `Sync`: it belongs to the thread that
/// created it, and every object it tracks must be used on that thread only.
pub struct CycleCollector {
    options: CollectorOptions,
    purple: RefCell<PurpleBuffer>,
    /// Suspected while a scan was reading the purple buffer
    deferred_suspects: RefCell<Vec<ObjectRef>>,
    graph: RefCell<Graph>,
    build: RefCell<BuildState>,
    phase: Cell<Phase>,
    scan_in_progress: Cell<bool>,
    actively_collecting: Cell<bool>,
    freeing_snow_white: Cell<bool>,
    traced_heap: RefCell<Option<Rc<dyn TracedHeap>>>,
    listener: RefCell<Option<Rc<dyn CollectorListener>>>,
    active_listener: RefCell<Option<Rc<dyn CollectorListener>>>,
    results: RefCell<CollectorResults>,
    last_results: RefCell<Option<CollectorResults>>,
    stats: RefCell<CollectorStats>,
    _non_send_or_sync: PhantomData<*const ()>,
}

impl Default for CycleCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleCollector {
    pub fn new() -> Self {
        Self::with_options(CollectorOptions::DEFAULT)
    }

    pub fn with_options(options: CollectorOptions) -> Self {
        Self {
            options,
            purple: RefCell::new(PurpleBuffer::new()),
            deferred_suspects: RefCell::new(Vec::new()),
            graph: RefCell::new(Graph::new(options.max_graph_nodes)),
            build: RefCell::new(BuildState::default()),
            phase: Cell::new(Phase::Idle),
            scan_in_progress: Cell::new(false),
            actively_collecting: Cell::new(false),
            freeing_snow_white: Cell::new(false),
            traced_heap: RefCell::new(None),
            listener: RefCell::new(None),
            active_listener: RefCell::new(None),
            results: RefCell::new(CollectorResults::default()),
            last_results: RefCell::new(None),
            stats: RefCell::new(CollectorStats::default()),
            _non_send_or_sync: PhantomData,
        }
    }

    pub fn options(&self) -> &CollectorOptions {
        &self.options
    }

    /// Attach the traced heap this collector cooperates with
    ///
    /// Any collection in progress is finished first.
    pub fn register_traced_heap(&self, heap: Rc<dyn TracedHeap>) {
        self.finish_before_reconfiguring();
        *self.traced_heap.borrow_mut() = Some(heap);
    }

    /// Detach the traced heap, finishing any collection in progress first
    pub fn unregister_traced_heap(&self) -> Option<Rc<dyn TracedHeap>> {
        self.finish_before_reconfiguring();
        self.traced_heap.borrow_mut().take()
    }

    fn finish_before_reconfiguring(&self) {
        if let Err(fault) = self.finish_any_current_collection() {
            log::error!("collection aborted while reconfiguring collector: {fault}");
        }
    }

    /// Attach a listener to all collections that begin from now on
    pub fn set_listener(&self, listener: Option<Rc<dyn CollectorListener>>) {
        *self.listener.borrow_mut() = listener;
    }

    /// Record `object` as a possible member of a garbage cycle
    ///
    /// Called when the object's count drops. While a scan is reading the
    /// purple buffer the object is queued instead and buffered once the scan
    /// ends. Returns whether the object is buffered afterwards.
    pub fn suspect(&self, object: ObjectRef) -> bool {
        let Some(refcount) = object.refcount() else {
            debug_assert!(false, "traced-heap objects cannot be suspected");
            return false;
        };
        if refcount.is_in_purple_buffer() {
            return true;
        }
        if self.scan_in_progress.get() {
            log::trace!("deferring suspect of {:#x} until the scan ends", object.addr());
            self.deferred_suspects.borrow_mut().push(object);
            return false;
        }
        self.purple.borrow_mut().put(object, refcount);
        true
    }

    /// Leave the scan state and buffer everything suspected during it
    fn end_scan(&self) {
        self.scan_in_progress.set(false);
        let deferred = std::mem::take(&mut *self.deferred_suspects.borrow_mut());
        for object in deferred {
            // a deferred object may have been queued more than once
            self.suspect(object);
        }
    }

    /// Number of entries in the purple buffer
    pub fn suspected_count(&self) -> usize {
        self.purple.borrow().len()
    }

    /// Whether enough objects are suspected to make a collection worthwhile
    pub fn should_collect(&self) -> bool {
        self.suspected_count() > self.options.purple_trigger
    }

    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    pub fn is_idle(&self) -> bool {
        self.phase.get() == Phase::Idle
    }

    /// Results of the most recent finished collection
    pub fn last_results(&self) -> Option<CollectorResults> {
        self.last_results.borrow().clone()
    }

    pub fn stats(&self) -> CollectorStats {
        self.stats.borrow().clone()
    }

    /// Color of `object` in the collection in progress
    pub fn node_color(&self, object: ObjectRef) -> Option<Color> {
        let graph = self.graph.try_borrow().ok()?;
        graph.find_node(object).map(|id| graph.node(id).color())
    }

    /// Number of nodes in the collection in progress
    pub fn graph_node_count(&self) -> usize {
        self.graph.try_borrow().map_or(0, |graph| graph.node_count())
    }

    /// Run one incremental slice with the configured default budget
    pub fn collect_incremental(&self) -> Result<bool, CollectorFault> {
        self.collect_slice(SliceBudget::time(self.options.slice_duration))
    }

    /// Advance the collection by one slice
    ///
    /// Starts a new collection when idle. Returns whether any garbage was
    /// found during this call. Calls made from inside a running slice (e.g.
    /// from a participant callback) do nothing.
    pub fn collect_slice(&self, mut budget: SliceBudget) -> Result<bool, CollectorFault> {
        self.run(&mut budget, false)
    }

    /// Run a complete collection synchronously
    ///
    /// A collection already in progress is finished first, then a fresh one is
    /// run from scratch.
    pub fn collect(&self) -> Result<bool, CollectorFault> {
        let finished_any = if self.is_idle() {
            false
        } else {
            self.finish_any_current_collection()?
        };
        let collected = self.run(&mut SliceBudget::unlimited(), true)?;
        Ok(finished_any || collected)
    }

    /// Drain the collection in progress, if any, with an unlimited budget
    pub fn finish_any_current_collection(&self) -> Result<bool, CollectorFault> {
        if self.is_idle() {
            return Ok(false);
        }
        if self.actively_collecting.get() {
            log::warn!("cannot finish the current collection from inside a slice");
            return Ok(false);
        }
        log::debug!("finishing cycle collection in phase {:?}", self.phase.get());
        self.run(&mut SliceBudget::unlimited(), false)
    }

    /// Called by the traced heap right before it runs a trace pass
    ///
    /// The traced heap may free objects the graph refers to, so a collection
    /// left in the middle of graph building is completed first.
    pub fn prepare_for_garbage_collection(&self) -> Result<bool, CollectorFault> {
        if self.is_idle() {
            debug_assert!(self.graph.borrow().is_empty());
            return Ok(false);
        }
        self.finish_any_current_collection()
    }

    fn run(&self, budget: &mut SliceBudget, forced: bool) -> Result<bool, CollectorFault> {
        if self.actively_collecting.get() || self.freeing_snow_white.get() {
            log::trace!("ignoring re-entrant collection request");
            return Ok(false);
        }
        self.actively_collecting.set(true);
        let result = self.run_slice(budget, forced);
        self.actively_collecting.set(false);
        result
    }

    fn run_slice(&self, budget: &mut SliceBudget, forced: bool) -> Result<bool, CollectorFault> {
        let started_idle = self.is_idle();
        let mut collected_any = false;

        if !started_idle {
            // BeginCollection takes care of this when starting from idle
            self.free_snow_white(true);
            self.results.borrow_mut().num_slices += 1;
        }

        let mut continue_slice = budget.is_unlimited() || !self.options.prefer_shorter_slices;
        let mut finished = false;
        loop {
            match self.phase.get() {
                Phase::Idle => self.begin_collection(forced),
                Phase::GraphBuilding => {
                    if let Err(fault) = self.mark_roots(budget) {
                        return Err(self.abort_collection(fault));
                    }
                    // Only keep going if the rest will probably be short, to
                    // bound the pause of this slice.
                    let num_slices = self.results.borrow().num_slices;
                    continue_slice = budget.is_unlimited()
                        || (num_slices < self.options.eager_slices
                            && !self.options.prefer_shorter_slices);
                }
                Phase::ScanAndCollectWhite => {
                    if let Err(fault) = self.scan_roots(started_idle) {
                        return Err(self.abort_collection(fault));
                    }
                    collected_any = self.collect_white();
                }
                Phase::Cleanup => {
                    self.cleanup_after_collection();
                    finished = true;
                }
            }
            if continue_slice {
                continue_slice = !budget.is_over_budget();
            }
            if !continue_slice || finished {
                break;
            }
        }
        log::trace!(
            "collector slice ended in phase {:?} (finished: {finished})",
            self.phase.get()
        );
        Ok(collected_any)
    }

    fn begin_collection(&self, forced: bool) {
        debug_assert!(self.is_idle());
        let suspected = self.suspected_count();
        log::debug!("beginning cycle collection with {suspected} suspected objects");

        self.free_snow_white(true);

        *self.results.borrow_mut() = CollectorResults {
            suspected_at_start: suspected,
            num_slices: 1,
            forced,
            ..CollectorResults::default()
        };
        let listener = self.listener.borrow().clone();
        if let Some(listener) = &listener {
            listener.begin();
        }
        *self.active_listener.borrow_mut() = listener.clone();
        let traced = self.traced_heap.borrow().clone();
        if let Some(traced) = &traced {
            traced.begin_cycle_collection();
        }

        self.phase.set(Phase::GraphBuilding);

        let mut graph = self.graph.borrow_mut();
        *graph = Graph::new(self.options.max_graph_nodes);
        let mut build = self.build.borrow_mut();
        *build = BuildState::default();
        let mut builder =
            GraphBuilder::new(&mut graph, &mut build, traced.as_deref(), listener.as_deref());

        if let Some(traced) = &traced {
            traced.traverse_roots(&mut builder);
        }

        // Canonicalization inside can_skip callbacks may suspect objects while
        // the purple buffer is being walked; those are buffered afterwards.
        self.scan_in_progress.set(true);
        let handles = self.purple.borrow().handles();
        for handle in handles {
            let Some(entry) = self.purple.borrow().get(handle).copied() else {
                continue;
            };
            let refcount = entry.refcount();
            if refcount.get() == 0 {
                // snow-white, left for the killer
                continue;
            }
            if !refcount.is_purple() || builder.add_purple_root(entry.object) {
                self.purple.borrow_mut().remove(handle);
            }
        }
        self.end_scan();

        builder.done_adding_roots();
        log::debug!("collection graph seeded with {} roots", graph.root_count());
    }

    fn mark_roots(&self, budget: &mut SliceBudget) -> Result<(), CollectorFault> {
        let traced = self.traced_heap.borrow().clone();
        let listener = self.active_listener.borrow().clone();
        let mut graph = self.graph.borrow_mut();
        let mut build = self.build.borrow_mut();
        let mut builder =
            GraphBuilder::new(&mut graph, &mut build, traced.as_deref(), listener.as_deref());
        if !builder.mark_roots(budget)? {
            return Ok(());
        }

        let mut results = self.results.borrow_mut();
        results.visited_ref_counted = build.visited_ref_counted;
        results.visited_gced = build.visited_gced;
        if build.ran_out_of_memory {
            log::warn!("abandoning cycle collection: graph building ran out of memory");
            results.ran_out_of_memory = true;
            self.stats.borrow_mut().out_of_memory += 1;
            self.phase.set(Phase::Cleanup);
            // Seeding took the roots out of the purple buffer; put them back
            // so the next collection looks at them again.
            let roots: Vec<ObjectRef> = (0..graph.root_count())
                .filter_map(|i| graph.nodes.id_at(i))
                .filter_map(|id| graph.node(id).object)
                .filter(|object| !object.is_traced())
                .collect();
            for &object in &roots {
                self.suspect(object);
            }
            log::debug!("re-suspected {} collection roots", roots.len());
        } else {
            log::trace!(
                "graph complete: {} nodes, {} edges",
                graph.node_count(),
                graph.edge_count()
            );
            self.phase.set(Phase::ScanAndCollectWhite);
        }
        Ok(())
    }

    fn scan_roots(&self, fully_synchronous: bool) -> Result<(), CollectorFault> {
        self.scan_in_progress.set(true);
        let result = self.scan_graph(fully_synchronous);
        self.end_scan();
        result
    }

    fn scan_graph(&self, fully_synchronous: bool) -> Result<(), CollectorFault> {
        let traced = self.traced_heap.borrow().clone();
        let listener = self.active_listener.borrow().clone();
        let mut graph = self.graph.borrow_mut();

        if !fully_synchronous {
            let purple = self.purple.borrow();
            let roots = scan::scan_incremental_roots(
                &mut graph,
                &purple,
                traced.as_deref(),
                listener.as_deref(),
            );
            log::trace!("{roots} incremental roots");
        }
        let white = scan::scan_white_nodes(&mut graph)?;
        scan::scan_black_nodes(&mut graph);
        scan::scan_weak_maps(&mut graph)?;
        log::trace!("{white} nodes white before propagating liveness");

        if let Some(listener) = &listener {
            listener.begin_results();
            for id in graph.nodes.ids() {
                let node = graph.node(id);
                let Some(object) = node.object else {
                    continue;
                };
                if !node.traversed {
                    continue;
                }
                match node.color {
                    Color::Black => {
                        if !node.traced && node.internal_refs != node.ref_count {
                            listener.describe_root(object.addr(), node.internal_refs);
                        }
                    }
                    Color::White => listener.describe_garbage(object.addr()),
                    Color::Grey => debug_assert!(false, "traversed node left grey"),
                }
            }
            listener.end();
        }
        Ok(())
    }

    /// Unlink every white node: root all, then unlink all, then unroot all
    fn collect_white(&self) -> bool {
        let traced = self.traced_heap.borrow().clone();
        let mut white_nodes = Vec::new();
        let mut white_traced = Vec::new();
        {
            let graph = self.graph.borrow();
            for id in graph.nodes.ids() {
                let node = graph.node(id);
                if node.color != Color::White {
                    continue;
                }
                let Some(object) = node.object else {
                    continue;
                };
                if node.traced {
                    white_traced.push(object);
                } else {
                    white_nodes.push(object);
                }
            }
        }

        if let Some(traced) = &traced {
            for &object in &white_traced {
                traced.note_white_traced(object);
            }
        }

        for object in &white_nodes {
            object.root();
        }
        for object in &white_nodes {
            object.unlink();
        }
        for object in &white_nodes {
            object.unroot();
        }

        {
            let mut results = self.results.borrow_mut();
            results.freed_ref_counted += white_nodes.len();
            results.freed_gced += white_traced.len();
        }
        log::debug!(
            "unlinked {} refcounted and {} traced garbage objects",
            white_nodes.len(),
            white_traced.len()
        );
        self.phase.set(Phase::Cleanup);
        !white_nodes.is_empty() || !white_traced.is_empty()
    }

    fn cleanup_after_collection(&self) {
        self.active_listener.borrow_mut().take();
        self.graph.borrow_mut().clear();
        *self.build.borrow_mut() = BuildState::default();
        self.phase.set(Phase::Idle);

        let results = self.results.borrow().clone();
        {
            let mut stats = self.stats.borrow_mut();
            stats.collections += 1;
            stats.freed_ref_counted += results.freed_ref_counted as u64;
            stats.freed_gced += results.freed_gced as u64;
            if results.faulted {
                stats.faults += 1;
            }
        }
        log::debug!(
            "cycle collection finished after {} slices: visited {} refcounted / {} traced, freed {} / {}",
            results.num_slices,
            results.visited_ref_counted,
            results.visited_gced,
            results.freed_ref_counted,
            results.freed_gced
        );
        *self.last_results.borrow_mut() = Some(results.clone());

        let traced = self.traced_heap.borrow().clone();
        if let Some(traced) = traced {
            traced.end_cycle_collection(&results);
        }
        self.free_snow_white(true);
    }

    fn abort_collection(&self, fault: CollectorFault) -> CollectorFault {
        log::error!("cycle collection aborted: {fault}");
        self.end_scan();
        self.results.borrow_mut().faulted = true;
        self.cleanup_after_collection();
        fault
    }

    /// Forget `object` if it is part of the graph being built
    ///
    /// Its node stays in the graph but is treated as dead from now on.
    pub fn remove_object_from_graph(&self, object: ObjectRef) {
        if self.is_idle() {
            return;
        }
        if let Some(id) = self.graph.borrow_mut().remove_object_from_map(object) {
            log::trace!("removed {:#x} from the collection graph ({id:?})", object.addr());
        }
    }

    /// Delete every purple object whose count already dropped to zero
    ///
    /// With `until_empty`, repeats until deleting objects stops producing new
    /// snow-white ones. Returns whether anything was deleted.
    pub fn free_snow_white(&self, until_empty: bool) -> bool {
        if self.freeing_snow_white.get() || self.graph.try_borrow_mut().is_err() {
            return false;
        }
        self.freeing_snow_white.set(true);
        let mut had_snow_white = false;
        loop {
            let mut freed = 0;
            // Entries are detached and deleted one at a time, so objects
            // released by a deletion are picked up later in the same pass.
            let handles = self.purple.borrow().handles();
            for handle in handles {
                let object = {
                    let mut purple = self.purple.borrow_mut();
                    let Some(entry) = purple.get(handle).copied() else {
                        continue;
                    };
                    if entry.refcount().get() != 0 {
                        continue;
                    }
                    entry.refcount().stabilize_for_deletion();
                    purple.remove(handle);
                    entry.object
                };
                self.kill_snow_white(object);
                freed += 1;
            }
            if freed == 0 {
                break;
            }
            had_snow_white = true;
            log::trace!("freed {freed} snow-white objects");
            if !until_empty {
                break;
            }
        }
        self.freeing_snow_white.set(false);
        had_snow_white
    }

    fn kill_snow_white(&self, object: ObjectRef) {
        self.remove_object_from_graph(object);
        let traced = self.traced_heap.borrow().clone();
        object.trace_for_cleanup(&mut |child| {
            if let Some(traced) = &traced {
                if child.is_traced() && traced.is_gray(child) {
                    traced.hold_for_cleanup(child);
                }
            }
        });
        // SAFETY: the count was zero and the entry has been detached, so no
        // one else can reach the object any more.
        unsafe { object.delete_cycle_collectable() };
        self.stats.borrow_mut().snow_white_freed += 1;
    }

    /// Drop purple entries that cannot be roots of a garbage cycle
    ///
    /// Frees snow-white objects, drops entries that are no longer purple or
    /// whose `can_skip` says so, and with `remove_childless_nodes` also those
    /// that have no children at all. Only runs between collections. Returns
    /// the number of entries dropped.
    pub fn forget_skippable(&self, mut budget: SliceBudget, remove_childless_nodes: bool) -> usize {
        if !self.is_idle() || self.freeing_snow_white.get() {
            // Dropping entries during graph building would lose track of
            // objects mutated in the meantime.
            return 0;
        }
        let mut removed = 0;
        let mut found_snow_white = false;
        let handles = self.purple.borrow().handles();
        for handle in handles {
            if budget.is_over_budget() {
                break;
            }
            budget.step(1);
            let Some(entry) = self.purple.borrow().get(handle).copied() else {
                continue;
            };
            let refcount = entry.refcount();
            if refcount.get() == 0 {
                found_snow_white = true;
                continue;
            }
            let keep = refcount.is_purple()
                && !entry.object.can_skip(true)
                && (!remove_childless_nodes || may_have_child(entry.object));
            if !keep {
                let mut purple = self.purple.borrow_mut();
                // a callback may have replaced the entry
                if purple.get(handle).is_some_and(|e| e.object == entry.object) {
                    purple.remove(handle);
                    removed += 1;
                }
            }
        }
        if found_snow_white {
            self.free_snow_white(false);
        }
        log::trace!("forget_skippable dropped {removed} purple entries");
        removed
    }

    /// Collect everything collectable and release the purple buffer
    ///
    /// Runs up to `options.shutdown_collections` full collections, stopping
    /// early once one finds no garbage.
    pub fn shutdown(&self) {
        log::debug!("shutting down cycle collector");
        if let Err(fault) = self.finish_any_current_collection() {
            log::error!("collection aborted during shutdown: {fault}");
        }
        self.free_snow_white(true);
        for _ in 0..self.options.shutdown_collections {
            match self.collect() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(fault) => {
                    log::error!("shutdown collection aborted: {fault}");
                    break;
                }
            }
        }
        self.free_snow_white(true);
        let mut purple = self.purple.borrow_mut();
        if !purple.is_empty() {
            log::debug!("{} objects still suspected at shutdown", purple.len());
        }
        purple.clear();
        purple.free_blocks();
    }

    #[cfg(test)]
    pub(crate) fn with_graph<R>(&self, f: impl FnOnce(&Graph) -> R) -> R {
        f(&self.graph.borrow())
    }
}

fn may_have_child(object: ObjectRef) -> bool {
    let mut finder = ChildFinder::default();
    object.traverse(&mut finder);
    finder.found
}
