//! The collection graph
//!
//! One `Graph` exists per collection. It owns the node and edge arenas, the
//! weak-map records found during traversal and the identity index that maps
//! an object to its node while the graph is being built and scanned.

use crate::arena::{EdgeIndex, EdgePool, Edges, NodeId, NodePool, PoolExhausted};
use crate::color::Color;
use crate::participant::ObjectRef;
use rustc_hash::FxHashMap;

/// A graph node
///
/// `color` and `internal_refs` are scratch state for a single collection.
#[derive(Debug, Clone)]
pub struct PtrInfo {
    pub(crate) object: Option<ObjectRef>,
    pub(crate) color: Color,
    /// Observed reference count; 0 for traced-heap objects
    pub(crate) ref_count: u32,
    /// Edges found pointing at this node
    pub(crate) internal_refs: u32,
    pub(crate) first_child: EdgeIndex,
    pub(crate) last_child: EdgeIndex,
    pub(crate) traversed: bool,
    pub(crate) traced: bool,
    /// Traced object the traced heap had marked live when it was described
    pub(crate) marked: bool,
}

impl PtrInfo {
    pub(crate) fn new(object: ObjectRef) -> Self {
        Self {
            traced: object.is_traced(),
            object: Some(object),
            color: Color::Grey,
            ref_count: 0,
            internal_refs: 0,
            first_child: EdgeIndex::default(),
            last_child: EdgeIndex::default(),
            traversed: false,
            marked: false,
        }
    }

    /// A node whose object no longer exists
    pub(crate) fn dead() -> Self {
        Self {
            object: None,
            color: Color::Grey,
            ref_count: 0,
            internal_refs: 0,
            first_child: EdgeIndex::default(),
            last_child: EdgeIndex::default(),
            traversed: false,
            traced: false,
            marked: false,
        }
    }

    pub fn object(&self) -> Option<ObjectRef> {
        self.object
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn internal_refs(&self) -> u32 {
        self.internal_refs
    }

    /// The object was destroyed while the graph existed
    pub fn is_dead(&self) -> bool {
        self.object.is_none()
    }

    pub fn was_traversed(&self) -> bool {
        self.traversed
    }

    /// Traced-heap object that the traced heap considered a candidate (gray)
    /// when it was described
    pub fn is_gray_traced(&self) -> bool {
        self.traced && !self.marked
    }

    /// Traced-heap object that was marked live when it was described
    pub fn is_marked_traced(&self) -> bool {
        self.traced && self.marked
    }
}

/// A weak-map entry found during traversal
///
/// `None` members are known to be live outside the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeakMapping {
    pub map: Option<NodeId>,
    pub key: Option<NodeId>,
    pub key_delegate: Option<NodeId>,
    pub value: Option<NodeId>,
}

/// Nodes, edges and weak maps of one collection
pub struct Graph {
    pub(crate) nodes: NodePool,
    pub(crate) edges: EdgePool,
    pub(crate) weak_maps: Vec<WeakMapping>,
    index: FxHashMap<ObjectRef, NodeId>,
    pub(crate) root_count: usize,
}

impl Graph {
    pub fn new(node_limit: usize) -> Self {
        Self {
            nodes: NodePool::new(node_limit),
            edges: EdgePool::new(),
            weak_maps: Vec::new(),
            index: FxHashMap::default(),
            root_count: 0,
        }
    }

    /// Find the node of `object`, if it is part of this graph
    pub fn find_node(&self, object: ObjectRef) -> Option<NodeId> {
        self.index.get(&object).copied()
    }

    /// Find or create the node of `object`
    ///
    /// Returns the node and whether it was newly created.
    pub fn add_node(&mut self, object: ObjectRef) -> Result<(NodeId, bool), PoolExhausted> {
        if let Some(id) = self.find_node(object) {
            return Ok((id, false));
        }
        self.index.try_reserve(1)?;
        let id = self.nodes.add(PtrInfo::new(object))?;
        self.index.insert(object, id);
        Ok((id, true))
    }

    /// Forget `object`: its node stays in the arena but turns dead
    pub fn remove_object_from_map(&mut self, object: ObjectRef) -> Option<NodeId> {
        let id = self.index.remove(&object)?;
        let node = self.nodes.get_mut(id);
        node.object = None;
        Some(id)
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &PtrInfo {
        self.nodes.get(id)
    }

    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut PtrInfo {
        self.nodes.get_mut(id)
    }

    /// Outgoing edges of a traversed node
    pub fn children(&self, id: NodeId) -> Edges<'_> {
        let node = self.nodes.get(id);
        self.edges.range(node.first_child, node.last_child)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn root_count(&self) -> usize {
        self.root_count
    }

    pub fn weak_maps(&self) -> &[WeakMapping] {
        &self.weak_maps
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of live entries in the identity index
    pub fn map_count(&self) -> usize {
        self.index.len()
    }

    /// Discard everything, releasing all blocks
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.weak_maps = Vec::new();
        self.index = FxHashMap::default();
        self.root_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHeap;

    #[test]
    fn index_dedups_identities() {
        let heap = TestHeap::new();
        let a = heap.object("a");
        let b = heap.object("b");
        let mut graph = Graph::new(usize::MAX);
        let (na, created) = graph.add_node(a).unwrap();
        assert!(created);
        let (again, created) = graph.add_node(a).unwrap();
        assert!(!created);
        assert_eq!(na, again);
        let (nb, _) = graph.add_node(b).unwrap();
        assert_ne!(na, nb);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.find_node(b), Some(nb));
    }

    #[test]
    fn removed_objects_leave_dead_nodes() {
        let heap = TestHeap::new();
        let a = heap.object("a");
        let mut graph = Graph::new(usize::MAX);
        let (id, _) = graph.add_node(a).unwrap();
        assert_eq!(graph.remove_object_from_map(a), Some(id));
        assert!(graph.node(id).is_dead());
        assert_eq!(graph.find_node(a), None);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.map_count(), 0);
        graph.clear();
        assert!(graph.is_empty());
    }
}
