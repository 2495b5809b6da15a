//! Directed concept graph.
//!
//! An explicit adjacency structure: each node id maps to the set of
//! `(neighbour id, edge id)` pairs it points at, with a mirrored incoming map
//! so node removal can cascade without scanning.  A bidirectional edge is one
//! edge id registered in both directions.
//!
//! The graph only knows structure.  Edge payloads (relationship type,
//! strength) live with the owner of the graph.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use mnemos_types::MemoryError;

#[derive(Debug, Clone, PartialEq, Eq)]
struct EdgeEnds {
    from: String,
    to: String,
    bidirectional: bool,
}

#[derive(Debug, Default, Clone)]
pub struct ConceptGraph {
    outgoing: HashMap<String, BTreeSet<(String, String)>>,
    incoming: HashMap<String, BTreeSet<(String, String)>>,
    edges: HashMap<String, EdgeEnds>,
}

impl ConceptGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: &str) {
        self.outgoing.entry(id.to_string()).or_default();
        self.incoming.entry(id.to_string()).or_default();
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.outgoing.contains_key(id)
    }

    /// Remove `id` and every edge touching it.  Returns the removed edge ids.
    pub fn remove_node(&mut self, id: &str) -> Vec<String> {
        if !self.contains_node(id) {
            return Vec::new();
        }
        let touching: BTreeSet<String> = self.outgoing[id]
            .iter()
            .chain(self.incoming[id].iter())
            .map(|(_, edge)| edge.clone())
            .collect();
        for edge in &touching {
            self.remove_edge(edge);
        }
        self.outgoing.remove(id);
        self.incoming.remove(id);
        touching.into_iter().collect()
    }

    /// Register `edge_id` from `from` to `to` (and back when bidirectional).
    pub fn add_edge(&mut self, edge_id: &str, from: &str, to: &str, bidirectional: bool) -> Result<(), MemoryError> {
        for endpoint in [from, to] {
            if !self.contains_node(endpoint) {
                return Err(MemoryError::InvalidRelationship(format!("node {endpoint} does not exist")));
            }
        }
        if self.edges.contains_key(edge_id) {
            return Err(MemoryError::InvalidRelationship(format!("edge {edge_id} already exists")));
        }
        self.link(from, to, edge_id);
        if bidirectional {
            self.link(to, from, edge_id);
        }
        self.edges.insert(
            edge_id.to_string(),
            EdgeEnds { from: from.to_string(), to: to.to_string(), bidirectional },
        );
        Ok(())
    }

    fn link(&mut self, from: &str, to: &str, edge_id: &str) {
        if let Some(out) = self.outgoing.get_mut(from) {
            out.insert((to.to_string(), edge_id.to_string()));
        }
        if let Some(inc) = self.incoming.get_mut(to) {
            inc.insert((from.to_string(), edge_id.to_string()));
        }
    }

    fn unlink(&mut self, from: &str, to: &str, edge_id: &str) {
        if let Some(out) = self.outgoing.get_mut(from) {
            out.remove(&(to.to_string(), edge_id.to_string()));
        }
        if let Some(inc) = self.incoming.get_mut(to) {
            inc.remove(&(from.to_string(), edge_id.to_string()));
        }
    }

    pub fn remove_edge(&mut self, edge_id: &str) -> bool {
        let Some(ends) = self.edges.remove(edge_id) else {
            return false;
        };
        self.unlink(&ends.from, &ends.to, edge_id);
        if ends.bidirectional {
            self.unlink(&ends.to, &ends.from, edge_id);
        }
        true
    }

    /// Outgoing `(neighbour, edge id)` pairs of `id`.
    pub fn neighbors(&self, id: &str) -> impl Iterator<Item = (&str, &str)> {
        self.outgoing
            .get(id)
            .into_iter()
            .flat_map(|set| set.iter().map(|(n, e)| (n.as_str(), e.as_str())))
    }

    /// Edge ids linking `a` to `b` in that direction.
    pub fn edges_between(&self, a: &str, b: &str) -> Vec<&str> {
        self.neighbors(a).filter(|(n, _)| *n == b).map(|(_, e)| e).collect()
    }

    pub fn node_count(&self) -> usize {
        self.outgoing.len()
    }

    /// Logical edges (a bidirectional edge counts once).
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Directed arcs (a bidirectional edge counts twice).
    pub fn arc_count(&self) -> usize {
        self.outgoing.values().map(BTreeSet::len).sum()
    }

    /// Connected ordered pairs over `n · (n − 1)`, zero for fewer than two
    /// nodes.  Parallel arcs between the same pair count once.
    pub fn density(&self) -> f64 {
        let n = self.node_count();
        if n < 2 {
            return 0.0;
        }
        let pairs: usize = self
            .outgoing
            .values()
            .map(|arcs| arcs.iter().map(|(to, _)| to.as_str()).collect::<HashSet<_>>().len())
            .sum();
        pairs as f64 / (n * (n - 1)) as f64
    }

    /// Nodes reachable from `start` within `max_depth` hops along outgoing
    /// arcs, with their hop distance.  `start` itself is reported at depth 0.
    pub fn bfs(&self, start: &str, max_depth: usize) -> Vec<(String, usize)> {
        if !self.contains_node(start) {
            return Vec::new();
        }
        let mut seen = HashSet::from([start.to_string()]);
        let mut order = vec![(start.to_string(), 0)];
        let mut queue = VecDeque::from([(start.to_string(), 0usize)]);
        while let Some((node, depth)) = queue.pop_front() {
            if depth == max_depth {
                continue;
            }
            for (next, _) in self.neighbors(&node) {
                if seen.insert(next.to_string()) {
                    order.push((next.to_string(), depth + 1));
                    queue.push_back((next.to_string(), depth + 1));
                }
            }
        }
        order
    }

    /// Shortest path by hop count from `from` to `to`, inclusive of both
    /// ends.  `None` when unreachable or longer than `max_length` hops.
    pub fn shortest_path(&self, from: &str, to: &str, max_length: usize) -> Option<Vec<String>> {
        if !self.contains_node(from) || !self.contains_node(to) {
            return None;
        }
        if from == to {
            return Some(vec![from.to_string()]);
        }
        let mut parent: HashMap<String, String> = HashMap::new();
        let mut queue = VecDeque::from([(from.to_string(), 0usize)]);
        let mut seen = HashSet::from([from.to_string()]);
        while let Some((node, depth)) = queue.pop_front() {
            if depth == max_length {
                continue;
            }
            for (next, _) in self.neighbors(&node) {
                if !seen.insert(next.to_string()) {
                    continue;
                }
                parent.insert(next.to_string(), node.clone());
                if next == to {
                    let mut path = vec![to.to_string()];
                    let mut cursor = to;
                    while let Some(prev) = parent.get(cursor) {
                        path.push(prev.clone());
                        cursor = prev.as_str();
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back((next.to_string(), depth + 1));
            }
        }
        None
    }

    /// Connected components of the undirected projection with at least
    /// `min_size` members, largest first.  Members are sorted.
    pub fn connected_components(&self, min_size: usize) -> Vec<Vec<String>> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut components = Vec::new();
        let mut roots: Vec<&String> = self.outgoing.keys().collect();
        roots.sort();
        for root in roots {
            if !seen.insert(root.as_str()) {
                continue;
            }
            let mut members = vec![root.clone()];
            let mut stack = vec![root.as_str()];
            while let Some(node) = stack.pop() {
                let out = self.outgoing.get(node).into_iter().flatten();
                let inc = self.incoming.get(node).into_iter().flatten();
                for (next, _) in out.chain(inc) {
                    if seen.insert(next.as_str()) {
                        members.push(next.clone());
                        stack.push(next.as_str());
                    }
                }
            }
            if members.len() >= min_size {
                members.sort();
                components.push(members);
            }
        }
        components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        components
    }

    pub fn clear(&mut self) {
        self.outgoing.clear();
        self.incoming.clear();
        self.edges.clear();
    }
}
