//! Undirected topology graph over logical node labels.
//!
//! Rebuilt wholesale from the latest connection set on every topology
//! pass, never patched incrementally. Path queries use plain BFS;
//! "no path" is an ordinary result, not an error.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::analysis::types::{ConnectionSet, MacLabelMap};

/// Undirected graph over u32 node labels.
#[derive(Debug, Clone, Default)]
pub struct GraphModel {
    adjacency: HashMap<u32, HashSet<u32>>,
}

impl GraphModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from a topology pass result. Unlinked addresses
    /// become isolated nodes; edges between addresses the label map does
    /// not know are skipped.
    pub fn from_topology(connections: &ConnectionSet, labels: &MacLabelMap) -> Self {
        let mut graph = Self::new();

        for mac in connections.unlinked() {
            if let Some(label) = labels.label_of(mac) {
                graph.add_node(label);
            }
        }

        for (a, b) in connections.edges() {
            match (labels.label_of(a), labels.label_of(b)) {
                (Some(la), Some(lb)) => graph.add_edge(la, lb),
                _ => log::warn!("Edge ({}, {}) references an unlabeled address", a, b),
            }
        }

        graph
    }

    pub fn add_node(&mut self, node: u32) {
        self.adjacency.entry(node).or_default();
    }

    pub fn add_edge(&mut self, a: u32, b: u32) {
        if a == b {
            return;
        }
        self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);
    }

    pub fn contains(&self, node: u32) -> bool {
        self.adjacency.contains_key(&node)
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(|n| n.len()).sum::<usize>() / 2
    }

    /// Neighbor set of a node; empty if the node is unknown.
    pub fn neighbors(&self, node: u32) -> HashSet<u32> {
        self.adjacency.get(&node).cloned().unwrap_or_default()
    }

    /// Full label -> neighbor-set map, the form the delivery and latency
    /// engines consume.
    pub fn neighbor_map(&self) -> HashMap<u32, HashSet<u32>> {
        self.adjacency.clone()
    }

    /// Number of nodes adjacent to both `a` and `b`.
    pub fn common_neighbor_count(&self, a: u32, b: u32) -> usize {
        match (self.adjacency.get(&a), self.adjacency.get(&b)) {
            (Some(na), Some(nb)) => na.intersection(nb).count(),
            _ => 0,
        }
    }

    pub fn has_path(&self, from: u32, to: u32) -> bool {
        self.shortest_path(from, to).is_some()
    }

    /// One shortest path from `from` to `to`, inclusive of both
    /// endpoints. `None` when either node is unknown or unreachable.
    ///
    /// Among equal-length paths the lowest-labeled neighbors win, so
    /// repeated queries on the same graph agree.
    pub fn shortest_path(&self, from: u32, to: u32) -> Option<Vec<u32>> {
        if !self.contains(from) || !self.contains(to) {
            return None;
        }
        if from == to {
            return Some(vec![from]);
        }

        let mut parent: HashMap<u32, u32> = HashMap::new();
        let mut visited: HashSet<u32> = HashSet::from([from]);
        let mut queue: VecDeque<u32> = VecDeque::from([from]);

        while let Some(node) = queue.pop_front() {
            let mut next: Vec<u32> = self.neighbors(node).into_iter().collect();
            next.sort_unstable();
            for neighbor in next {
                if visited.insert(neighbor) {
                    parent.insert(neighbor, node);
                    if neighbor == to {
                        return Some(walk_back(&parent, from, to));
                    }
                    queue.push_back(neighbor);
                }
            }
        }

        None
    }

    /// All shortest paths from `from` to `to`, sorted lexicographically.
    pub fn all_shortest_paths(&self, from: u32, to: u32) -> Vec<Vec<u32>> {
        if !self.contains(from) || !self.contains(to) {
            return Vec::new();
        }
        if from == to {
            return vec![vec![from]];
        }

        // BFS layering: every predecessor one level closer to the source.
        let mut distance: HashMap<u32, usize> = HashMap::from([(from, 0)]);
        let mut predecessors: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut queue: VecDeque<u32> = VecDeque::from([from]);

        while let Some(node) = queue.pop_front() {
            let d = distance[&node];
            if let Some(&dt) = distance.get(&to) {
                if d >= dt {
                    continue;
                }
            }
            let mut next: Vec<u32> = self.neighbors(node).into_iter().collect();
            next.sort_unstable();
            for neighbor in next {
                match distance.get(&neighbor) {
                    None => {
                        distance.insert(neighbor, d + 1);
                        predecessors.insert(neighbor, vec![node]);
                        queue.push_back(neighbor);
                    }
                    Some(&dn) if dn == d + 1 => {
                        predecessors.get_mut(&neighbor).expect("known node").push(node);
                    }
                    Some(_) => {}
                }
            }
        }

        if !distance.contains_key(&to) {
            return Vec::new();
        }

        let mut paths = Vec::new();
        let mut stack = vec![to];
        collect_paths(&predecessors, from, to, &mut stack, &mut paths);
        paths.sort();
        paths
    }

    /// For each intermediate position of a shortest path, the number of
    /// nodes that neighbor both ends of the two-hop segment starting
    /// there: the relay fan-out available at that hop.
    pub fn hop_fanout(&self, path: &[u32]) -> HashMap<u32, usize> {
        let mut fanout = HashMap::new();
        if path.len() < 3 {
            return fanout;
        }
        for window in path.windows(3) {
            fanout.insert(window[0], self.common_neighbor_count(window[0], window[2]));
        }
        fanout
    }
}

fn walk_back(parent: &HashMap<u32, u32>, from: u32, to: u32) -> Vec<u32> {
    let mut path = vec![to];
    let mut node = to;
    while node != from {
        node = parent[&node];
        path.push(node);
    }
    path.reverse();
    path
}

fn collect_paths(
    predecessors: &HashMap<u32, Vec<u32>>,
    from: u32,
    node: u32,
    stack: &mut Vec<u32>,
    paths: &mut Vec<Vec<u32>>,
) {
    if node == from {
        let mut path = stack.clone();
        path.reverse();
        paths.push(path);
        return;
    }
    let Some(preds) = predecessors.get(&node) else {
        return;
    };
    for &pred in preds {
        stack.push(pred);
        collect_paths(predecessors, from, pred, stack, paths);
        stack.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1-2-4 and 1-3-4 square with a 4-5 tail.
    fn square_graph() -> GraphModel {
        let mut graph = GraphModel::new();
        graph.add_edge(1, 2);
        graph.add_edge(1, 3);
        graph.add_edge(2, 4);
        graph.add_edge(3, 4);
        graph.add_edge(4, 5);
        graph
    }

    #[test]
    fn test_shortest_path() {
        let graph = square_graph();
        let path = graph.shortest_path(1, 5).unwrap();
        assert_eq!(path.len(), 4);
        assert_eq!(path[0], 1);
        assert_eq!(path[3], 5);
    }

    #[test]
    fn test_all_shortest_paths() {
        let graph = square_graph();
        let paths = graph.all_shortest_paths(1, 4);
        assert_eq!(paths, vec![vec![1, 2, 4], vec![1, 3, 4]]);
    }

    #[test]
    fn test_no_path_is_none_not_panic() {
        let mut graph = square_graph();
        graph.add_node(9);
        assert_eq!(graph.shortest_path(1, 9), None);
        assert!(!graph.has_path(1, 9));
        assert!(graph.all_shortest_paths(1, 9).is_empty());
        assert_eq!(graph.shortest_path(1, 77), None);
    }

    #[test]
    fn test_common_neighbor_count() {
        let graph = square_graph();
        assert_eq!(graph.common_neighbor_count(1, 4), 2);
        assert_eq!(graph.common_neighbor_count(1, 5), 1);
        assert_eq!(graph.common_neighbor_count(2, 3), 2);
    }

    #[test]
    fn test_hop_fanout_keys_hop_starts() {
        let graph = square_graph();
        let path = vec![1, 2, 4, 5];
        let fanout = graph.hop_fanout(&path);
        assert_eq!(fanout.len(), 2);
        assert_eq!(fanout[&1], 2); // 2 and 3 both bridge 1 and 4
        assert_eq!(fanout[&2], 1); // only 4's side has a bridge to 5
        assert!(graph.hop_fanout(&[1, 2]).is_empty());
    }

    #[test]
    fn test_self_loop_rejected() {
        let mut graph = GraphModel::new();
        graph.add_edge(7, 7);
        assert!(graph.neighbors(7).is_empty());
    }
}
