use crate::store::{NodeId, Registry};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, VecDeque};

/// Finds a dependency cycle using Depth-First Search (DFS) with a recursion
/// stack.
///
/// Returns the nodes on the first cycle found, each consuming the next and the
/// last consuming the first. Nodes are visited in id order, so the answer is
/// deterministic.
pub fn find_cycle(registry: &Registry) -> Option<Vec<NodeId>> {
    // Edges point consumer -> producer; follow the producers.
    let cycle = find_cycle_by(registry.count(), |node, i| {
        registry.get_parents(NodeId::new(node)).get(i).map(|p| p.index())
    })?;
    Some(cycle.into_iter().map(NodeId::new).collect())
}

/// The same search over any graph of `count` nodes, where `edge(n, i)` is
/// the `i`-th successor of `n`.
///
/// The DFS keeps its own stack of `(node, next edge)` frames, so chain depth
/// is bounded by memory rather than by the thread stack.
pub fn find_cycle_by(count: usize, edge: impl Fn(usize, usize) -> Option<usize>) -> Option<Vec<usize>> {
    let mut state = vec![VisitState::None; count];
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in 0..count {
        if state[root] != VisitState::None {
            continue;
        }
        state[root] = VisitState::Visiting;
        stack.push((root, 0));

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let Some(next) = edge(node, frame.1) else {
                state[node] = VisitState::Visited;
                stack.pop();
                continue;
            };
            frame.1 += 1;

            match state[next] {
                VisitState::Visited => {}
                VisitState::Visiting => {
                    let start = stack.iter().position(|&(n, _)| n == next).unwrap_or(0);
                    return Some(stack[start..].iter().map(|&(n, _)| n).collect());
                }
                VisitState::None => {
                    state[next] = VisitState::Visiting;
                    stack.push((next, 0));
                }
            }
        }
    }
    None
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    None,
    Visiting, // On the DFS stack
    Visited,
}

/// Topological sort using Kahn's Algorithm with a priority queue, so that
/// among ready nodes the one with the smallest `rank` always goes first.
///
/// Returns `None` if the graph has a cycle.
pub fn sort_by_rank<K: Ord>(registry: &Registry, rank: impl Fn(NodeId) -> K) -> Option<Vec<NodeId>> {
    let count = registry.count();
    let mut in_degree: Vec<usize> = (0..count).map(|i| registry.get_parents(NodeId::new(i)).len()).collect();
    let mut ready = BinaryHeap::with_capacity(count);
    let mut order = Vec::with_capacity(count);

    for (i, &deg) in in_degree.iter().enumerate() {
        if deg == 0 {
            let id = NodeId::new(i);
            ready.push(Reverse((rank(id), id)));
        }
    }

    while let Some(Reverse((_, node))) = ready.pop() {
        order.push(node);
        for child in registry.children(node) {
            let c = child.index();
            in_degree[c] -= 1;
            if in_degree[c] == 0 {
                ready.push(Reverse((rank(child), child)));
            }
        }
    }

    if order.len() != count {
        return None;
    }
    Some(order)
}

/// Groups a topological order into waves: every node's producers sit in
/// earlier waves, so the nodes of one wave are mutually independent.
/// Within a wave the nodes keep their relative order from `order`.
pub fn waves(registry: &Registry, order: &[NodeId]) -> Vec<Vec<NodeId>> {
    let mut level = vec![0usize; registry.count()];
    let mut waves: Vec<Vec<NodeId>> = Vec::new();

    for &node in order {
        let l = registry
            .get_parents(node)
            .iter()
            .map(|p| level[p.index()] + 1)
            .max()
            .unwrap_or(0);
        level[node.index()] = l;
        if waves.len() <= l {
            waves.resize_with(l + 1, Vec::new);
        }
        waves[l].push(node);
    }
    waves
}

/// Identifies all nodes downstream from the given start nodes, the start
/// nodes included.
pub fn downstream_from(registry: &Registry, start_nodes: &[NodeId]) -> BTreeSet<NodeId> {
    let mut visited = BTreeSet::new();
    let mut queue = VecDeque::from(start_nodes.to_vec());

    while let Some(node) = queue.pop_front() {
        if visited.insert(node) {
            queue.extend(registry.children(node));
        }
    }
    visited
}

/// Identifies all nodes upstream from the given start nodes, the start nodes
/// included.
pub fn upstream_from(registry: &Registry, start_nodes: &[NodeId]) -> BTreeSet<NodeId> {
    let mut visited = BTreeSet::new();
    let mut queue = VecDeque::from(start_nodes.to_vec());

    while let Some(node) = queue.pop_front() {
        if visited.insert(node) {
            queue.extend(registry.get_parents(node).iter().copied());
        }
    }
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NodeKey, NodeMetadata};

    fn registry(edges: &[&[usize]]) -> Registry {
        let mut reg = Registry::new();
        for i in 0..edges.len() {
            let key = NodeKey::calculation("S", format!("n{}", i));
            reg.add_node(NodeMetadata { key, scope_index: 0, order: i as u32 }).unwrap();
        }
        for (i, parents) in edges.iter().enumerate() {
            let parents: Vec<NodeId> = parents.iter().map(|&p| NodeId::new(p)).collect();
            reg.set_parents(NodeId::new(i), &parents);
        }
        reg
    }

    #[test]
    fn test_sort_diamond_dependency() {
        // Shape: A -> B, A -> C, B+C -> D, declared as D, C, B, A.
        let reg = registry(&[&[1, 2], &[3], &[3], &[]]);
        let order = sort_by_rank(&reg, |id| id).unwrap();
        assert_eq!(order, vec![NodeId(3), NodeId(1), NodeId(2), NodeId(0)]);
    }

    #[test]
    fn test_rank_breaks_ties() {
        let reg = registry(&[&[], &[], &[]]);
        let order = sort_by_rank(&reg, |id| Reverse(id)).unwrap();
        assert_eq!(order, vec![NodeId(2), NodeId(1), NodeId(0)]);
    }

    #[test]
    fn test_cycle_reports_every_member() {
        // 0 -> 1 -> 2 -> 1, with 3 hanging off the cycle.
        let reg = registry(&[&[1], &[2], &[1], &[0]]);
        assert_eq!(find_cycle(&reg), Some(vec![NodeId(1), NodeId(2)]));
        assert_eq!(sort_by_rank(&reg, |id| id), None);
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let reg = registry(&[&[0]]);
        assert_eq!(find_cycle(&reg), Some(vec![NodeId(0)]));
    }

    #[test]
    fn test_acyclic_graph_has_no_cycle() {
        let reg = registry(&[&[], &[0, 0], &[1]]);
        assert_eq!(find_cycle(&reg), None);
    }

    #[test]
    fn test_cycle_search_over_adjacency_lists() {
        let edges: Vec<Vec<usize>> = vec![vec![1, 3], vec![2], vec![], vec![4], vec![0]];
        let cycle = find_cycle_by(edges.len(), |n, i| edges[n].get(i).copied());
        assert_eq!(cycle, Some(vec![0, 3, 4]));
        assert_eq!(find_cycle_by(3, |n, i| (i == 0 && n + 1 < 3).then_some(n + 1)), None);
    }

    #[test]
    fn test_long_chain_is_searched_without_recursion() {
        const LEN: usize = 200_000;
        let chain = |n: usize, i: usize| (i == 0 && n + 1 < LEN).then_some(n + 1);
        assert_eq!(find_cycle_by(LEN, chain), None);
        let ring = |n: usize, i: usize| (i == 0).then_some((n + 1) % LEN);
        assert_eq!(find_cycle_by(LEN, ring).map(|c| c.len()), Some(LEN));
    }

    #[test]
    fn test_waves_group_independent_nodes() {
        let reg = registry(&[&[], &[], &[0], &[0, 1], &[2, 3]]);
        let order = sort_by_rank(&reg, |id| id).unwrap();
        let waves = waves(&reg, &order);
        assert_eq!(
            waves,
            vec![vec![NodeId(0), NodeId(1)], vec![NodeId(2), NodeId(3)], vec![NodeId(4)]]
        );
    }

    #[test]
    fn test_upstream_and_downstream() {
        let reg = registry(&[&[], &[0], &[1], &[]]);
        let down: Vec<_> = downstream_from(&reg, &[NodeId(0)]).into_iter().collect();
        assert_eq!(down, vec![NodeId(0), NodeId(1), NodeId(2)]);
        let up: Vec<_> = upstream_from(&reg, &[NodeId(2)]).into_iter().collect();
        assert_eq!(up, vec![NodeId(0), NodeId(1), NodeId(2)]);
    }
}
