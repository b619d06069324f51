//! Graph construction
//!
//! The builder turns the collection roots (traced-heap roots and surviving
//! purple entries) into graph nodes, then traverses nodes one at a time in
//! arena order, adding a node and an edge for every child reported. The
//! traversal position is kept in [`BuildState`] so graph building can be
//! spread over many slices.

use crate::arena::NodeId;
use crate::budget::SliceBudget;
use crate::error::CollectorFault;
use crate::graph::{Graph, WeakMapping};
use crate::listener::CollectorListener;
use crate::participant::{ObjectRef, TraversalCallback};
use crate::traced::TracedHeap;

/// Budget cost of traversing one node, on top of one step per child
pub const MARK_STEP: u64 = 1000;

/// Graph building progress that survives between slices
#[derive(Debug, Default, Clone)]
pub struct BuildState {
    /// Arena position of the next node to traverse
    pub(crate) cursor: usize,
    pub(crate) ran_out_of_memory: bool,
    pub(crate) visited_ref_counted: usize,
    pub(crate) visited_gced: usize,
}

/// Builds the graph on behalf of the collector for the duration of a slice
pub struct GraphBuilder<'a> {
    graph: &'a mut Graph,
    state: &'a mut BuildState,
    traced: Option<&'a dyn TracedHeap>,
    listener: Option<&'a dyn CollectorListener>,
    want_all_traces: bool,
    current: Option<ObjectRef>,
    note_child_count: u64,
    edge_name: String,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(
        graph: &'a mut Graph,
        state: &'a mut BuildState,
        traced: Option<&'a dyn TracedHeap>,
        listener: Option<&'a dyn CollectorListener>,
    ) -> Self {
        let want_all_traces = listener.is_some_and(|l| l.want_all_traces());
        Self {
            graph,
            state,
            traced,
            listener,
            want_all_traces,
            current: None,
            note_child_count: 0,
            edge_name: String::new(),
        }
    }

    pub fn ran_out_of_memory(&self) -> bool {
        self.state.ran_out_of_memory
    }

    fn add_node(&mut self, object: ObjectRef) -> Option<NodeId> {
        if self.state.ran_out_of_memory {
            return None;
        }
        match self.graph.add_node(object) {
            Ok((id, _)) => Some(id),
            Err(_) => {
                log::warn!(
                    "ran out of memory while building the collection graph ({} nodes)",
                    self.graph.node_count()
                );
                self.state.ran_out_of_memory = true;
                None
            }
        }
    }

    /// Whether a traced object is marked live by the traced heap
    fn is_black_traced(&self, object: ObjectRef) -> bool {
        object.is_traced() && self.traced.is_some_and(|heap| heap.is_black(object))
    }

    /// Seed a purple object as a root
    ///
    /// Returns false only if the graph ran out of memory; the entry then has
    /// to stay in the purple buffer.
    pub fn add_purple_root(&mut self, object: ObjectRef) -> bool {
        if self.want_all_traces || !object.can_skip_in_cc() {
            if self.add_node(object).is_none() {
                return false;
            }
        }
        if let Some(refcount) = object.refcount() {
            refcount.remove_purple();
        }
        true
    }

    /// Everything added so far is a root
    pub fn done_adding_roots(&mut self) {
        self.graph.root_count = self.graph.node_count();
    }

    /// Traverse nodes until the graph is complete or the budget runs out
    ///
    /// Returns `Ok(true)` once every node has been traversed (or building was
    /// abandoned for lack of memory).
    pub fn mark_roots(&mut self, budget: &mut SliceBudget) -> Result<bool, CollectorFault> {
        while !budget.is_over_budget() {
            if self.state.ran_out_of_memory {
                return Ok(true);
            }
            let Some(id) = self.graph.nodes.id_at(self.state.cursor) else {
                return Ok(true);
            };
            self.state.cursor += 1;
            self.note_child_count = 0;
            self.traverse_node(id)?;
            budget.step(MARK_STEP + self.note_child_count);
        }
        Ok(self.state.ran_out_of_memory || self.graph.nodes.id_at(self.state.cursor).is_none())
    }

    fn traverse_node(&mut self, id: NodeId) -> Result<(), CollectorFault> {
        let first_child = self.graph.edges.position();
        let node = self.graph.node_mut(id);
        node.first_child = first_child;
        node.last_child = first_child;
        let Some(object) = node.object else {
            // deleted before we got to it
            return Ok(());
        };

        self.describe(id, object)?;
        self.current = Some(object);
        object.traverse(&mut *self);
        self.current = None;

        let last_child = self.graph.edges.position();
        let node = self.graph.node_mut(id);
        node.last_child = last_child;
        node.traversed = true;
        Ok(())
    }

    fn describe(&mut self, id: NodeId, object: ObjectRef) -> Result<(), CollectorFault> {
        let address = object.addr();
        match object.refcount() {
            Some(refcount) => {
                let count = refcount.get();
                if count == 0 {
                    return Err(CollectorFault::ZeroRefCount { address });
                }
                if count >= u32::MAX as usize {
                    return Err(CollectorFault::SaturatedRefCount { address });
                }
                self.graph.node_mut(id).ref_count = count as u32;
                self.state.visited_ref_counted += 1;
                if let Some(listener) = self.listener {
                    listener.note_refcounted_object(address, count as u32, object.name());
                }
            }
            None => {
                // Marked objects reach the graph through all-traces listeners
                // and traced-heap roots; they must never be whitened.
                let marked = self.is_black_traced(object);
                let node = self.graph.node_mut(id);
                node.ref_count = 0;
                node.marked = marked;
                self.state.visited_gced += 1;
                if let Some(listener) = self.listener {
                    listener.note_traced_object(address, marked, object.name());
                }
            }
        }
        Ok(())
    }

    fn add_weak_map_node(&mut self, object: Option<ObjectRef>) -> Option<NodeId> {
        let object = object?;
        if !self.want_all_traces && self.is_black_traced(object) {
            return None;
        }
        self.add_node(object)
    }
}

impl TraversalCallback for GraphBuilder<'_> {
    fn note_child(&mut self, child: ObjectRef) {
        let edge_name = std::mem::take(&mut self.edge_name);
        if !self.want_all_traces {
            if child.is_traced() {
                if self.is_black_traced(child) {
                    return;
                }
            } else if child.can_skip_in_cc() {
                return;
            }
        }
        let Some(id) = self.add_node(child) else {
            return;
        };
        if self.graph.edges.add(id).is_err() {
            log::warn!("ran out of memory while adding graph edges");
            self.state.ran_out_of_memory = true;
            return;
        }
        let node = self.graph.node_mut(id);
        node.internal_refs = node.internal_refs.saturating_add(1);
        self.note_child_count += 1;
        if let (Some(listener), Some(current)) = (self.listener, self.current) {
            listener.note_edge(current.addr(), child.addr(), &edge_name);
        }
    }

    fn note_weak_mapping(
        &mut self,
        map: Option<ObjectRef>,
        key: Option<ObjectRef>,
        key_delegate: Option<ObjectRef>,
        value: Option<ObjectRef>,
    ) {
        let mapping = WeakMapping {
            map: self.add_weak_map_node(map),
            key: self.add_weak_map_node(key),
            key_delegate: self.add_weak_map_node(key_delegate),
            value: self.add_weak_map_node(value),
        };
        if self.state.ran_out_of_memory {
            return;
        }
        self.graph.weak_maps.push(mapping);
        if let Some(listener) = self.listener {
            let address = |id: Option<NodeId>| {
                id.and_then(|id| self.graph.node(id).object)
                    .map(|object| object.addr())
            };
            listener.note_weak_map_entry(
                address(mapping.map),
                address(mapping.key),
                address(mapping.key_delegate),
                address(mapping.value),
            );
        }
    }

    fn note_root(&mut self, root: ObjectRef) {
        self.add_node(root);
    }

    fn note_next_edge_name(&mut self, name: &str) {
        if self.listener.is_some() {
            self.edge_name.clear();
            self.edge_name.push_str(name);
        }
    }

    fn want_debug_info(&self) -> bool {
        self.listener.is_some()
    }
}
