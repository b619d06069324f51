//! Trial deletion over a complete graph
//!
//! Scanning runs once graph building has finished:
//!
//! 1. incremental roots: nodes whose edges may have changed while the graph
//!    was built incrementally are forced black
//! 2. white: nodes whose references are all accounted for by graph edges,
//!    and traced nodes the traced heap has not marked
//! 3. black: everything else still grey has an external holder, so it and
//!    everything it reaches is live
//! 4. weak maps: black maps keep black-delegated keys and values of black keys
//!    alive, repeated until nothing changes
//!
//! Whatever is still white afterwards is garbage.

use crate::arena::NodeId;
use crate::color::Color;
use crate::error::CollectorFault;
use crate::graph::Graph;
use crate::listener::CollectorListener;
use crate::purple::PurpleBuffer;
use crate::traced::TracedHeap;

/// Color `start` and everything reachable from it black
///
/// Returns the number of nodes that changed color.
pub fn flood_black(graph: &mut Graph, start: NodeId) -> usize {
    if graph.node(start).color == Color::Black {
        return 0;
    }
    graph.node_mut(start).color = Color::Black;
    let mut flooded = 1;
    let mut stack = vec![start];
    while let Some(id) = stack.pop() {
        let (first, last) = {
            let node = graph.node(id);
            (node.first_child, node.last_child)
        };
        for child in graph.edges.range(first, last) {
            let child_node = graph.nodes.get_mut(child);
            if child_node.color != Color::Black {
                child_node.color = Color::Black;
                flooded += 1;
                stack.push(child);
            }
        }
    }
    flooded
}

/// Force black every node that may have been mutated during incremental
/// graph building
///
/// That is: objects suspected again since the collection began, traced
/// objects the traced heap has marked since they were added, and objects that
/// were traversed and then destroyed.
pub fn scan_incremental_roots(
    graph: &mut Graph,
    purple: &PurpleBuffer,
    traced: Option<&dyn TracedHeap>,
    listener: Option<&dyn CollectorListener>,
) -> usize {
    let mut roots = 0;
    for handle in purple.handles() {
        let Some(entry) = purple.get(handle) else {
            continue;
        };
        // snow-white, about to be deleted anyway
        if entry.refcount().get() == 0 {
            continue;
        }
        let Some(id) = graph.find_node(entry.object) else {
            continue;
        };
        if graph.node(id).color == Color::Black {
            continue;
        }
        if let Some(listener) = listener {
            listener.note_incremental_root(entry.object.addr());
        }
        flood_black(graph, id);
        roots += 1;
    }

    for id in graph.nodes.ids() {
        let node = graph.node(id);
        if node.color == Color::Black {
            continue;
        }
        let address = match node.object {
            Some(object) if node.traced => {
                if !traced.is_some_and(|heap| heap.is_black(object)) {
                    continue;
                }
                object.addr()
            }
            // A traversed object had a positive count when we saw it, so it
            // can only be dead now because its count dropped during building.
            None if node.traversed => 0,
            _ => continue,
        };
        if let Some(listener) = listener {
            if address != 0 {
                listener.note_incremental_root(address);
            }
        }
        flood_black(graph, id);
        roots += 1;
    }
    roots
}

/// Color white every grey node all of whose references come from the graph
///
/// Returns the number of nodes colored white.
pub fn scan_white_nodes(graph: &mut Graph) -> Result<usize, CollectorFault> {
    let mut white = 0;
    for id in graph.nodes.ids() {
        let node = graph.nodes.get_mut(id);
        if node.color == Color::Black {
            continue;
        }
        debug_assert_eq!(node.color, Color::Grey);
        if !node.traversed {
            // deleted before it was traversed
            continue;
        }
        if node.traced {
            // a marked traced object stays grey and is flooded black below
            if !node.marked {
                node.color = Color::White;
                white += 1;
            }
            continue;
        }
        if node.internal_refs == node.ref_count {
            node.color = Color::White;
            white += 1;
            continue;
        }
        if node.internal_refs > node.ref_count {
            return Err(CollectorFault::InternalRefsExceedRefCount {
                address: node.object.map_or(0, |object| object.addr()),
                internal_refs: node.internal_refs,
                ref_count: node.ref_count,
            });
        }
        // held from outside the graph, scan_black_nodes will flood it
    }
    Ok(white)
}

/// Flood black from every node that is still grey
pub fn scan_black_nodes(graph: &mut Graph) -> usize {
    let mut flooded = 0;
    for id in graph.nodes.ids() {
        let node = graph.node(id);
        if node.color == Color::Grey && node.traversed {
            flooded += flood_black(graph, id);
        }
    }
    flooded
}

fn weak_color(graph: &Graph, id: Option<NodeId>) -> Result<Color, CollectorFault> {
    let Some(id) = id else {
        return Ok(Color::Black);
    };
    let node = graph.node(id);
    match node.color {
        Color::Grey if node.is_dead() => Ok(Color::White),
        Color::Grey => Err(CollectorFault::UncoloredWeakMapEntry),
        color => Ok(color),
    }
}

/// Apply weak-map liveness until a full pass changes nothing
///
/// Returns the number of passes.
pub fn scan_weak_maps(graph: &mut Graph) -> Result<usize, CollectorFault> {
    let mut passes = 0;
    loop {
        passes += 1;
        let mut any_changed = false;
        for i in 0..graph.weak_maps.len() {
            let mapping = graph.weak_maps[i];
            let map = weak_color(graph, mapping.map)?;
            let key = weak_color(graph, mapping.key)?;
            let key_delegate = weak_color(graph, mapping.key_delegate)?;
            let value = weak_color(graph, mapping.value)?;

            if map == Color::Black && key != Color::Black && key_delegate == Color::Black {
                if let Some(key) = mapping.key {
                    flood_black(graph, key);
                    any_changed = true;
                }
            }

            let key = weak_color(graph, mapping.key)?;
            if map == Color::Black && key == Color::Black && value != Color::Black {
                if let Some(value) = mapping.value {
                    flood_black(graph, value);
                    any_changed = true;
                }
            }
        }
        if !any_changed {
            return Ok(passes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuildState, GraphBuilder};
    use crate::budget::SliceBudget;
    use crate::graph::WeakMapping;
    use crate::participant::ObjectRef;
    use crate::testing::TestHeap;

    fn build(roots: &[ObjectRef]) -> Graph {
        let mut graph = Graph::new(usize::MAX);
        let mut state = BuildState::default();
        let mut builder = GraphBuilder::new(&mut graph, &mut state, None, None);
        for &root in roots {
            builder.add_purple_root(root);
        }
        builder.done_adding_roots();
        builder.mark_roots(&mut SliceBudget::unlimited()).unwrap();
        graph
    }

    fn color(graph: &Graph, object: ObjectRef) -> Color {
        graph.node(graph.find_node(object).unwrap()).color()
    }

    #[test]
    fn pure_cycle_is_white() {
        let heap = TestHeap::new();
        let [a, b, c] = heap.objects(["a", "b", "c"]);
        heap.edge(a, b);
        heap.edge(b, c);
        heap.edge(c, a);

        let mut graph = build(&[a]);
        assert_eq!(scan_white_nodes(&mut graph), Ok(3));
        assert_eq!(scan_black_nodes(&mut graph), 0);
        for object in [a, b, c] {
            assert_eq!(color(&graph, object), Color::White);
        }
    }

    #[test]
    fn externally_held_member_keeps_cycle_alive() {
        let heap = TestHeap::new();
        let [a, b, c, d] = heap.objects(["a", "b", "c", "d"]);
        heap.edge(a, b);
        heap.edge(b, c);
        heap.edge(c, a);
        heap.edge(d, a);
        heap.hold(d);

        // d is not purple; a sees one reference from outside the graph
        let mut graph = build(&[a]);
        assert!(graph.find_node(d).is_none());
        scan_white_nodes(&mut graph).unwrap();
        assert_eq!(color(&graph, a), Color::Grey);
        assert_eq!(scan_black_nodes(&mut graph), 3);
        for object in [a, b, c] {
            assert_eq!(color(&graph, object), Color::Black);
        }
    }

    #[test]
    fn too_many_internal_refs_is_a_fault() {
        let heap = TestHeap::new();
        let [a, b] = heap.objects(["a", "b"]);
        heap.edge(a, b);
        heap.hold(a);
        // b reports one edge more than its count
        heap.phantom_edge(a, b);

        let mut graph = build(&[a]);
        assert_eq!(
            scan_white_nodes(&mut graph),
            Err(CollectorFault::InternalRefsExceedRefCount {
                address: b.addr(),
                internal_refs: 2,
                ref_count: 1,
            })
        );
    }

    #[test]
    fn black_map_with_black_delegate_keeps_key() {
        let heap = TestHeap::new();
        let [map, key, delegate, value] = heap.objects(["map", "key", "delegate", "value"]);
        let mut graph = build(&[]);
        let ids: Vec<_> = [map, key, delegate, value]
            .iter()
            .map(|&o| graph.add_node(o).unwrap().0)
            .collect();
        for &id in &ids {
            graph.node_mut(id).traversed = true;
        }
        graph.node_mut(ids[0]).color = Color::Black;
        graph.node_mut(ids[1]).color = Color::White;
        graph.node_mut(ids[2]).color = Color::Black;
        graph.node_mut(ids[3]).color = Color::White;
        graph.weak_maps.push(WeakMapping {
            map: Some(ids[0]),
            key: Some(ids[1]),
            key_delegate: Some(ids[2]),
            value: Some(ids[3]),
        });

        // key turns black, which then keeps the value; one more pass sees no change
        assert_eq!(scan_weak_maps(&mut graph), Ok(2));
        assert_eq!(graph.node(ids[1]).color(), Color::Black);
        assert_eq!(graph.node(ids[3]).color(), Color::Black);
    }

    #[test]
    fn weak_map_fixpoint_chains_across_entries() {
        let heap = TestHeap::new();
        let [map, k1, v1, k2, v2] = heap.objects(["map", "k1", "v1", "k2", "v2"]);
        let mut graph = build(&[]);
        let id = |graph: &mut Graph, o| graph.add_node(o).unwrap().0;
        let (m, k1, v1, k2, v2) = (
            id(&mut graph, map),
            id(&mut graph, k1),
            id(&mut graph, v1),
            id(&mut graph, k2),
            id(&mut graph, v2),
        );
        for n in [m, k1, v1, k2, v2] {
            graph.node_mut(n).color = Color::White;
            graph.node_mut(n).traversed = true;
        }
        graph.node_mut(m).color = Color::Black;
        graph.node_mut(k1).color = Color::Black;
        // k2 is delegated by v1, which only turns black through the second entry
        graph.weak_maps.push(WeakMapping {
            map: Some(m),
            key: Some(k2),
            key_delegate: Some(v1),
            value: Some(v2),
        });
        graph.weak_maps.push(WeakMapping {
            map: Some(m),
            key: Some(k1),
            key_delegate: None,
            value: Some(v1),
        });
        assert_eq!(scan_weak_maps(&mut graph), Ok(3));
        for n in [k1, v1, k2, v2] {
            assert_eq!(graph.node(n).color(), Color::Black);
        }
    }

    #[test]
    fn unchanged_pass_terminates_immediately() {
        let mut graph = build(&[]);
        graph.weak_maps.push(WeakMapping {
            map: None,
            key: None,
            key_delegate: None,
            value: None,
        });
        assert_eq!(scan_weak_maps(&mut graph), Ok(1));
    }

    #[test]
    fn grey_weak_map_is_a_fault() {
        let heap = TestHeap::new();
        let [map] = heap.objects(["map"]);
        let mut graph = build(&[]);
        let (m, _) = graph.add_node(map).unwrap();
        graph.weak_maps.push(WeakMapping {
            map: Some(m),
            key: None,
            key_delegate: None,
            value: None,
        });
        assert_eq!(scan_weak_maps(&mut graph), Err(CollectorFault::UncoloredWeakMapEntry));
    }
}
