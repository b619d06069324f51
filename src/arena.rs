//! Block arenas for graph nodes and edges
//!
//! Both pools hand out `Copy` index handles instead of references. Storage
//! grows one fixed-size block at a time and a block never reallocates once it
//! exists, so growth of the edge pool while a node is being traversed can never
//! invalidate anything already stored. Nothing is freed individually; the
//! whole pool is released by `clear` when the graph is discarded.

use std::collections::TryReserveError;
use std::fmt;

use crate::graph::PtrInfo;

/// Nodes per node block
pub const NODE_BLOCK_SIZE: usize = 4 * 1024;
/// Edges per edge block
pub const EDGE_BLOCK_SIZE: usize = 16 * 1024;

/// Allocation failure inside a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolExhausted;

impl From<TryReserveError> for PoolExhausted {
    fn from(_: TryReserveError) -> Self {
        PoolExhausted
    }
}

/// Handle of a node in the `NodePool`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Write position in the `EdgePool`
///
/// A node's children are the half-open range `[first_child, last_child)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct EdgeIndex(u32);

/// Vec-of-blocks storage with position addressing
struct BlockArena<T> {
    blocks: Vec<Vec<T>>,
    block_size: usize,
    len: usize,
    limit: usize,
}

impl<T> BlockArena<T> {
    fn new(block_size: usize, limit: usize) -> Self {
        Self {
            blocks: Vec::new(),
            block_size,
            len: 0,
            limit: limit.min(u32::MAX as usize),
        }
    }

    #[inline]
    fn locate(&self, pos: usize) -> (usize, usize) {
        (pos / self.block_size, pos % self.block_size)
    }

    fn try_push(&mut self, value: T) -> Result<usize, PoolExhausted> {
        if self.len >= self.limit {
            return Err(PoolExhausted);
        }
        let (block, _) = self.locate(self.len);
        if block == self.blocks.len() {
            let mut storage = Vec::new();
            storage.try_reserve_exact(self.block_size)?;
            self.blocks.try_reserve(1)?;
            self.blocks.push(storage);
        }
        // capacity was reserved up front, this never moves the block
        self.blocks[block].push(value);
        self.len += 1;
        Ok(self.len - 1)
    }

    #[inline]
    fn get(&self, pos: usize) -> &T {
        let (block, offset) = self.locate(pos);
        &self.blocks[block][offset]
    }

    #[inline]
    fn get_mut(&mut self, pos: usize) -> &mut T {
        let (block, offset) = self.locate(pos);
        &mut self.blocks[block][offset]
    }

    fn clear(&mut self) {
        self.blocks = Vec::new();
        self.len = 0;
    }

    fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

/// Arena of graph nodes
pub struct NodePool {
    arena: BlockArena<PtrInfo>,
}

impl NodePool {
    /// Create a pool holding at most `limit` nodes
    pub fn new(limit: usize) -> Self {
        Self {
            arena: BlockArena::new(NODE_BLOCK_SIZE, limit),
        }
    }

    pub fn add(&mut self, node: PtrInfo) -> Result<NodeId, PoolExhausted> {
        self.arena.try_push(node).map(|pos| NodeId(pos as u32))
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> &PtrInfo {
        self.arena.get(id.index())
    }

    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> &mut PtrInfo {
        self.arena.get_mut(id.index())
    }

    pub fn len(&self) -> usize {
        self.arena.len
    }

    pub fn is_empty(&self) -> bool {
        self.arena.len == 0
    }

    /// The node at arena position `index`, if it exists
    pub fn id_at(&self, index: usize) -> Option<NodeId> {
        (index < self.arena.len).then_some(NodeId(index as u32))
    }

    /// Iterate all node handles in allocation order
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + use<> {
        (0..self.arena.len as u32).map(NodeId)
    }

    pub fn block_count(&self) -> usize {
        self.arena.block_count()
    }

    pub fn clear(&mut self) {
        self.arena.clear();
    }
}

/// Arena of edges, stored contiguously per source node
pub struct EdgePool {
    arena: BlockArena<NodeId>,
}

impl EdgePool {
    pub fn new() -> Self {
        Self {
            arena: BlockArena::new(EDGE_BLOCK_SIZE, u32::MAX as usize),
        }
    }

    /// The position the next edge will be written to
    #[inline]
    pub fn position(&self) -> EdgeIndex {
        EdgeIndex(self.arena.len as u32)
    }

    pub fn add(&mut self, target: NodeId) -> Result<(), PoolExhausted> {
        self.arena.try_push(target).map(|_| ())
    }

    /// Iterate the targets in `[first, last)`
    pub fn range(&self, first: EdgeIndex, last: EdgeIndex) -> Edges<'_> {
        debug_assert!(first <= last);
        Edges {
            pool: self,
            next: first.0 as usize,
            end: last.0 as usize,
        }
    }

    pub fn len(&self) -> usize {
        self.arena.len
    }

    pub fn is_empty(&self) -> bool {
        self.arena.len == 0
    }

    pub fn block_count(&self) -> usize {
        self.arena.block_count()
    }

    pub fn clear(&mut self) {
        self.arena.clear();
    }
}

impl Default for EdgePool {
    fn default() -> Self {
        Self::new()
    }
}

/// Enumerator over a node's outgoing edges
///
/// Crosses block boundaries transparently.
pub struct Edges<'a> {
    pool: &'a EdgePool,
    next: usize,
    end: usize,
}

impl Iterator for Edges<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.next >= self.end {
            return None;
        }
        let target = *self.pool.arena.get(self.next);
        self.next += 1;
        Some(target)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Edges<'_> {}
