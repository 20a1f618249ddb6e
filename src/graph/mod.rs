//! Property graph over concept/relation rows (spec §4.8 "Graph writer /
//! reader"). No teacher precedent exists for a graph layer; grounded on the
//! BFS/shortest-path/topological-sort algorithms as described in the spec
//! and written in the crate's existing idiom (typed errors, `serde_json`
//! for the JSON data path, `ciborium` for the lazy-CBOR path).

pub mod cbor;

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::error::{Error, Result};

pub type ConceptKey = String;

#[derive(Debug, Clone)]
pub struct Concept {
    /// Caller-supplied external identifier (`_concepts.id`, TEXT).
    pub id: String,
    pub key: ConceptKey,
    pub kind: String,
    pub data: Value,
    pub tokens: u64,
    pub alias: Option<String>,
    /// `_concepts.cvn`/`lvn`/`sync_status`: opaque passthrough columns (spec
    /// leaves their meaning to an integration layer).
    pub cvn: Option<String>,
    pub lvn: Option<String>,
    pub sync_status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Relation {
    pub row_id: i64,
    pub from_key: ConceptKey,
    pub to_key: ConceptKey,
    pub kind: String,
    pub data: Option<Value>,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

#[derive(Debug, Clone, Default)]
pub struct TraversalPolicy {
    pub direction: Option<Direction>,
    pub max_depth: Option<usize>,
    pub max_fan_out: Option<usize>,
    pub max_tokens: Option<u64>,
    pub timeout: Option<Duration>,
    pub target_type_filter: Option<String>,
    pub kind: Option<String>,
    pub stop_at_key: Option<ConceptKey>,
    pub include_paths: bool,
}

#[derive(Debug, Clone)]
pub struct TraversalNode {
    pub record: Concept,
    pub depth: usize,
    pub path: Option<Vec<ConceptKey>>,
}

#[derive(Debug, Clone)]
pub struct ContextSummary {
    pub records: Vec<Concept>,
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct CentralityEntry {
    pub key: ConceptKey,
    pub in_degree: usize,
    pub out_degree: usize,
    pub total_degree: usize,
}

/// The archive row written by `remove` when `_relations_history` exists.
#[derive(Debug, Clone)]
pub struct RelationHistoryEntry {
    pub relation: Relation,
    pub op: &'static str,
}

/// In-memory backing store for concepts and relations. A real deployment
/// persists these through the table/b-tree layers; this store captures the
/// graph-specific operations (idempotent intern, cascading remove, history
/// archival) independent of that wiring.
#[derive(Debug, Default)]
pub struct GraphStore {
    concepts: HashMap<ConceptKey, Concept>,
    relations: HashMap<i64, Relation>,
    next_relation_id: i64,
    outgoing: HashMap<ConceptKey, Vec<i64>>,
    incoming: HashMap<ConceptKey, Vec<i64>>,
    history: Option<Vec<RelationHistoryEntry>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables `_relations_history` archival on `remove`/`unlink`.
    pub fn with_history(mut self) -> Self {
        self.history = Some(Vec::new());
        self
    }

    pub fn history(&self) -> Option<&[RelationHistoryEntry]> {
        self.history.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&Concept> {
        self.concepts.get(key)
    }

    /// Idempotent in key: repeat inserts with the same key return the same
    /// key without duplicating the row (spec §4.8
    /// `intern(id, key, kind, data_json, tokens?, alias?) → key`).
    pub fn intern(
        &mut self,
        id: impl Into<String>,
        key: impl Into<ConceptKey>,
        kind: &str,
        data: Value,
        tokens: u64,
        alias: Option<String>,
    ) -> ConceptKey {
        let key = key.into();
        if self.concepts.contains_key(&key) {
            return key;
        }
        let concept = Concept {
            id: id.into(),
            key: key.clone(),
            kind: kind.to_string(),
            data,
            tokens,
            alias,
            cvn: None,
            lvn: None,
            sync_status: None,
        };
        self.concepts.insert(key.clone(), concept);
        key
    }

    pub fn link(
        &mut self,
        from_key: &str,
        to_key: &str,
        kind: &str,
        data: Option<Value>,
        weight: Option<f64>,
    ) -> Result<i64> {
        if !self.concepts.contains_key(from_key) || !self.concepts.contains_key(to_key) {
            return Err(Error::Other(format!("link endpoints must already be interned: {from_key} -> {to_key}")));
        }
        self.next_relation_id += 1;
        let row_id = self.next_relation_id;
        let relation = Relation {
            row_id,
            from_key: from_key.to_string(),
            to_key: to_key.to_string(),
            kind: kind.to_string(),
            data,
            weight,
        };
        self.outgoing.entry(from_key.to_string()).or_default().push(row_id);
        self.incoming.entry(to_key.to_string()).or_default().push(row_id);
        self.relations.insert(row_id, relation);
        Ok(row_id)
    }

    pub fn unlink(&mut self, edge_row_id: i64) -> bool {
        let Some(relation) = self.relations.remove(&edge_row_id) else {
            return false;
        };
        if let Some(list) = self.outgoing.get_mut(&relation.from_key) {
            list.retain(|&r| r != edge_row_id);
        }
        if let Some(list) = self.incoming.get_mut(&relation.to_key) {
            list.retain(|&r| r != edge_row_id);
        }
        if let Some(history) = &mut self.history {
            history.push(RelationHistoryEntry { relation, op: "delete" });
        }
        true
    }

    /// Removes a concept, cascading an archive-then-delete over every
    /// incident edge.
    pub fn remove(&mut self, key: &str) -> bool {
        if !self.concepts.contains_key(key) {
            return false;
        }
        let incident: Vec<i64> = self
            .outgoing
            .get(key)
            .into_iter()
            .flatten()
            .chain(self.incoming.get(key).into_iter().flatten())
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        for edge in incident {
            self.unlink(edge);
        }
        self.outgoing.remove(key);
        self.incoming.remove(key);
        self.concepts.remove(key);
        true
    }

    fn neighbors(&self, key: &str, direction: Direction, kind_filter: Option<&str>) -> Vec<(ConceptKey, Relation)> {
        let mut result = Vec::new();
        if direction == Direction::Outgoing || direction == Direction::Both {
            for &edge in self.outgoing.get(key).into_iter().flatten() {
                let relation = &self.relations[&edge];
                if kind_filter.map(|k| k == relation.kind).unwrap_or(true) {
                    result.push((relation.to_key.clone(), relation.clone()));
                }
            }
        }
        if direction == Direction::Incoming || direction == Direction::Both {
            for &edge in self.incoming.get(key).into_iter().flatten() {
                let relation = &self.relations[&edge];
                if kind_filter.map(|k| k == relation.kind).unwrap_or(true) {
                    result.push((relation.from_key.clone(), relation.clone()));
                }
            }
        }
        result
    }

    /// Breadth-first traversal honoring depth, fan-out, token, and
    /// wall-clock budgets (spec §4.8 "Reader").
    pub fn traverse(&self, start_key: &str, policy: &TraversalPolicy) -> Vec<TraversalNode> {
        let Some(start) = self.concepts.get(start_key) else {
            return Vec::new();
        };
        let direction = policy.direction.unwrap_or(Direction::Outgoing);
        let deadline = policy.timeout.map(|d| Instant::now() + d);

        let mut visited = HashSet::new();
        visited.insert(start_key.to_string());
        let mut queue = VecDeque::new();
        queue.push_back((start.clone(), 0usize, vec![start_key.to_string()]));
        let mut results = Vec::new();
        let mut tokens_used: u64 = 0;

        while let Some((concept, depth, path)) = queue.pop_front() {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    break;
                }
            }
            tokens_used += concept.tokens;
            let stop_here = policy.stop_at_key.as_deref() == Some(concept.key.as_str());
            results.push(TraversalNode {
                depth,
                path: if policy.include_paths { Some(path.clone()) } else { None },
                record: concept.clone(),
            });
            if stop_here {
                continue;
            }
            if let Some(max_depth) = policy.max_depth {
                if depth >= max_depth {
                    continue;
                }
            }

            let mut neighbors = self.neighbors(&concept.key, direction, policy.kind.as_deref());
            if let Some(max_fan_out) = policy.max_fan_out {
                neighbors.truncate(max_fan_out);
            }
            for (neighbor_key, _relation) in neighbors {
                if visited.contains(&neighbor_key) {
                    continue;
                }
                let Some(neighbor) = self.concepts.get(&neighbor_key) else { continue };
                if let Some(type_filter) = &policy.target_type_filter {
                    if &neighbor.kind != type_filter {
                        continue;
                    }
                }
                if let Some(max_tokens) = policy.max_tokens {
                    if tokens_used + neighbor.tokens > max_tokens {
                        continue;
                    }
                }
                visited.insert(neighbor_key.clone());
                let mut next_path = path.clone();
                next_path.push(neighbor_key.clone());
                queue.push_back((neighbor.clone(), depth + 1, next_path));
            }
        }

        results
    }

    pub fn shortest_path(&self, from: &str, to: &str, policy: Option<TraversalPolicy>) -> Option<Vec<ConceptKey>> {
        if from == to {
            return self.concepts.contains_key(from).then(|| vec![from.to_string()]);
        }
        let direction = policy.as_ref().and_then(|p| p.direction).unwrap_or(Direction::Outgoing);
        let kind = policy.and_then(|p| p.kind);

        let mut visited = HashSet::new();
        visited.insert(from.to_string());
        let mut queue = VecDeque::new();
        queue.push_back(vec![from.to_string()]);

        while let Some(path) = queue.pop_front() {
            let current = path.last().unwrap().clone();
            for (neighbor_key, _) in self.neighbors(&current, direction, kind.as_deref()) {
                if neighbor_key == to {
                    let mut full = path.clone();
                    full.push(neighbor_key);
                    return Some(full);
                }
                if visited.insert(neighbor_key.clone()) {
                    let mut next = path.clone();
                    next.push(neighbor_key);
                    queue.push_back(next);
                }
            }
        }
        None
    }

    pub fn get_context(&self, key: &str, max_depth: usize, max_tokens: Option<u64>) -> ContextSummary {
        let policy = TraversalPolicy {
            direction: Some(Direction::Both),
            max_depth: Some(max_depth),
            max_tokens,
            ..Default::default()
        };
        let nodes = self.traverse(key, &policy);
        let summary = if nodes.is_empty() {
            String::new()
        } else {
            format!("{} related record(s) within depth {}", nodes.len(), max_depth)
        };
        ContextSummary { records: nodes.into_iter().map(|n| n.record).collect(), summary }
    }

    /// Kahn's algorithm; `outgoing_fn` supplies each node's outgoing
    /// neighbor keys (optionally filtered by `kind`).
    pub fn topological_sort(&self, nodes: &[ConceptKey], kind: Option<&str>) -> Result<Vec<ConceptKey>> {
        let node_set: HashSet<&ConceptKey> = nodes.iter().collect();
        let mut in_degree: HashMap<ConceptKey, usize> = nodes.iter().map(|n| (n.clone(), 0)).collect();
        let mut adjacency: HashMap<ConceptKey, Vec<ConceptKey>> = HashMap::new();

        for key in nodes {
            for (neighbor, _) in self.neighbors(key, Direction::Outgoing, kind) {
                if node_set.contains(&neighbor) {
                    adjacency.entry(key.clone()).or_default().push(neighbor.clone());
                    *in_degree.get_mut(&neighbor).unwrap() += 1;
                }
            }
        }

        let mut queue: VecDeque<ConceptKey> =
            nodes.iter().filter(|n| in_degree[*n] == 0).cloned().collect();
        let mut order = Vec::new();
        while let Some(node) = queue.pop_front() {
            for neighbor in adjacency.get(&node).into_iter().flatten() {
                let degree = in_degree.get_mut(neighbor).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(neighbor.clone());
                }
            }
            order.push(node);
        }

        if order.len() != nodes.len() {
            return Err(Error::Other("cycle detected in topological_sort".into()));
        }
        Ok(order)
    }

    pub fn degree_centrality(&self, nodes: &[ConceptKey], kind: Option<&str>) -> Vec<CentralityEntry> {
        let mut entries: Vec<CentralityEntry> = nodes
            .iter()
            .map(|key| {
                let out_degree = self.neighbors(key, Direction::Outgoing, kind).len();
                let in_degree = self.neighbors(key, Direction::Incoming, kind).len();
                CentralityEntry { key: key.clone(), in_degree, out_degree, total_degree: in_degree + out_degree }
            })
            .collect();
        entries.sort_by(|a, b| b.total_degree.cmp(&a.total_degree));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with_chain(tokens: u64) -> GraphStore {
        let mut store = GraphStore::new();
        for key in ["A", "B", "C", "D"] {
            store.intern(key, key, "node", json!({}), tokens, None);
        }
        store.link("A", "B", "next", None, None).unwrap();
        store.link("B", "C", "next", None, None).unwrap();
        store.link("C", "D", "next", None, None).unwrap();
        store
    }

    #[test]
    fn intern_is_idempotent() {
        let mut store = GraphStore::new();
        let k1 = store.intern("id-a", "a", "node", json!({}), 0, None);
        let k2 = store.intern("id-a-again", "a", "node", json!({"x": 1}), 5, None);
        assert_eq!(k1, k2);
        assert_eq!(store.get("a").unwrap().tokens, 0);
        assert_eq!(store.get("a").unwrap().id, "id-a");
    }

    #[test]
    fn bfs_respects_token_budget() {
        let store = store_with_chain(100);
        let policy = TraversalPolicy {
            direction: Some(Direction::Outgoing),
            max_depth: Some(5),
            max_tokens: Some(250),
            ..Default::default()
        };
        let nodes = store.traverse("A", &policy);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes.iter().map(|n| n.record.key.clone()).collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn shortest_path_finds_chain() {
        let store = store_with_chain(0);
        let path = store.shortest_path("A", "D", None).unwrap();
        assert_eq!(path, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn topological_sort_detects_cycle() {
        let mut store = GraphStore::new();
        store.intern("a", "a", "node", json!({}), 0, None);
        store.intern("b", "b", "node", json!({}), 0, None);
        store.link("a", "b", "next", None, None).unwrap();
        store.link("b", "a", "next", None, None).unwrap();
        let nodes = vec!["a".to_string(), "b".to_string()];
        assert!(store.topological_sort(&nodes, None).is_err());
    }

    #[test]
    fn degree_centrality_sorts_descending() {
        let store = store_with_chain(0);
        let nodes = vec!["A".to_string(), "B".to_string(), "C".to_string(), "D".to_string()];
        let ranked = store.degree_centrality(&nodes, None);
        assert_eq!(ranked[0].total_degree, 2); // B and C both have in+out = 2
    }

    #[test]
    fn remove_cascades_and_archives_history() {
        let mut store = GraphStore::new().with_history();
        store.intern("a", "a", "node", json!({}), 0, None);
        store.intern("b", "b", "node", json!({}), 0, None);
        store.link("a", "b", "next", None, None).unwrap();
        assert!(store.remove("a"));
        assert!(store.get("a").is_none());
        assert_eq!(store.history().unwrap().len(), 1);
        assert_eq!(store.history().unwrap()[0].op, "delete");
    }
}
