//! HNSW (Hierarchical Navigable Small World) vector index (spec §4.6).
//!
//! No teacher precedent exists for approximate nearest-neighbor search; this
//! module is grounded on the algorithm description in the spec itself and
//! written in the surrounding crate's idiom (typed errors, `rand::StdRng`
//! seeded for reproducibility, `serde` for shadow-table persistence).

pub mod delta;
pub mod serde_format;

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

pub use delta::HnswIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    Euclidean,
    Cosine,
    DotProduct,
}

impl DistanceMetric {
    /// Raw metric value between two vectors, in the metric's own units
    /// (smaller is closer for Euclidean/Cosine, larger is closer for
    /// DotProduct).
    pub fn distance(self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            DistanceMetric::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (*x as f64 - *y as f64).powi(2))
                .sum::<f64>()
                .sqrt(),
            DistanceMetric::Cosine => {
                let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
                let na: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
                let nb: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
                if na == 0.0 || nb == 0.0 {
                    1.0
                } else {
                    1.0 - dot / (na * nb)
                }
            }
            DistanceMetric::DotProduct => a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum(),
        }
    }

    /// Distance used internally for min-heap search ordering: for
    /// DotProduct this is the negated value so "smaller is better" holds
    /// uniformly (spec §4.6 "Search").
    fn search_key(self, a: &[f32], b: &[f32]) -> f64 {
        let d = self.distance(a, b);
        match self {
            DistanceMetric::DotProduct => -d,
            _ => d,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    pub m: usize,
    pub m0: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub use_heuristic: bool,
    pub seed: i64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            m0: 32,
            ef_construction: 200,
            ef_search: 50,
            use_heuristic: true,
            seed: 0,
        }
    }
}

const MAX_LEVEL: u8 = 31;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub row_id: i64,
    pub level: u8,
    pub neighbors: Vec<Vec<u32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub row_id: i64,
    pub distance: f64,
}

/// The immutable (between compactions) base graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    pub metric: DistanceMetric,
    pub dimensions: usize,
    pub config: HnswConfig,
    pub nodes: Vec<Node>,
    pub vectors: Vec<Vec<f32>>,
    pub entry_point: Option<u32>,
    pub max_level: u8,
    #[serde(skip)]
    rng: Option<StdRng>,
}

#[derive(PartialEq)]
struct ScoredCandidate {
    key: f64,
    index: u32,
}

impl Eq for ScoredCandidate {}

impl PartialOrd for ScoredCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.partial_cmp(&other.key).unwrap_or(Ordering::Equal)
    }
}

impl Graph {
    pub fn new(metric: DistanceMetric, dimensions: usize, config: HnswConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed as u64);
        Self {
            metric,
            dimensions,
            config,
            nodes: Vec::new(),
            vectors: Vec::new(),
            entry_point: None,
            max_level: 0,
            rng: Some(rng),
        }
    }

    fn random_level(&mut self) -> u8 {
        let ml = 1.0 / (self.config.m as f64).ln();
        let rng = self.rng.get_or_insert_with(|| StdRng::seed_from_u64(self.config.seed as u64));
        let r: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
        let level = (-r.ln() * ml).floor() as i64;
        level.clamp(0, MAX_LEVEL as i64) as u8
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn vector(&self, index: u32) -> &[f32] {
        &self.vectors[index as usize]
    }

    /// Greedy single-best descent from `entry` at `from_level` down to
    /// `to_level` (exclusive of `to_level` itself being searched further).
    fn greedy_descend(&self, query: &[f32], mut current: u32, from_level: u8, to_level: u8) -> u32 {
        let mut current_key = self.metric.search_key(query, self.vector(current));
        for level in (to_level..=from_level).rev() {
            loop {
                let mut improved = false;
                for &neighbor in &self.nodes[current as usize].neighbors[level as usize] {
                    let key = self.metric.search_key(query, self.vector(neighbor));
                    if key < current_key {
                        current_key = key;
                        current = neighbor;
                        improved = true;
                    }
                }
                if !improved {
                    break;
                }
            }
            if level == to_level {
                break;
            }
        }
        current
    }

    /// Layer search (spec §4.6 "Search"): returns up to `ef` candidates
    /// ascending by search key.
    fn search_layer(&self, query: &[f32], entry: u32, ef: usize, level: u8) -> Vec<ScoredCandidate> {
        let mut visited = HashSet::new();
        visited.insert(entry);
        let entry_key = self.metric.search_key(query, self.vector(entry));

        let mut candidates = BinaryHeap::new(); // min-heap via Reverse-like ordering below
        candidates.push(std::cmp::Reverse(ScoredCandidate { key: entry_key, index: entry }));
        let mut best: Vec<ScoredCandidate> = vec![ScoredCandidate { key: entry_key, index: entry }];

        while let Some(std::cmp::Reverse(current)) = candidates.pop() {
            let worst_best = best.iter().map(|c| c.key).fold(f64::MIN, f64::max);
            if best.len() >= ef && current.key > worst_best {
                break;
            }
            for &neighbor in &self.nodes[current.index as usize].neighbors[level as usize] {
                if !visited.insert(neighbor) {
                    continue;
                }
                let key = self.metric.search_key(query, self.vector(neighbor));
                let worst_best = best.iter().map(|c| c.key).fold(f64::MIN, f64::max);
                if best.len() < ef || key < worst_best {
                    candidates.push(std::cmp::Reverse(ScoredCandidate { key, index: neighbor }));
                    best.push(ScoredCandidate { key, index: neighbor });
                    if best.len() > ef {
                        best.sort_by(|a, b| a.key.partial_cmp(&b.key).unwrap());
                        best.truncate(ef);
                    }
                }
            }
        }

        best.sort_by(|a, b| a.key.partial_cmp(&b.key).unwrap());
        best
    }

    /// Selects up to `m_eff` neighbors from `candidates` (ascending by key).
    fn select_neighbors(&self, candidates: &[ScoredCandidate], m_eff: usize) -> Vec<u32> {
        if !self.config.use_heuristic {
            return candidates.iter().take(m_eff).map(|c| c.index).collect();
        }
        let mut selected: Vec<&ScoredCandidate> = Vec::with_capacity(m_eff);
        for candidate in candidates {
            if selected.len() >= m_eff {
                break;
            }
            let keep = selected.iter().all(|kept| {
                let d_to_kept = self.metric.search_key(self.vector(candidate.index), self.vector(kept.index));
                candidate.key < d_to_kept
            });
            if keep {
                selected.push(candidate);
            }
        }
        selected.into_iter().map(|c| c.index).collect()
    }

    pub fn insert(&mut self, row_id: i64, vector: Vec<f32>) -> u32 {
        let node_index = self.nodes.len() as u32;
        let level = self.random_level();
        self.vectors.push(vector);
        self.nodes.push(Node {
            row_id,
            level,
            neighbors: vec![Vec::new(); level as usize + 1],
        });

        let Some(entry_point) = self.entry_point else {
            self.entry_point = Some(node_index);
            self.max_level = level;
            return node_index;
        };

        let query = self.vector(node_index).to_vec();
        let mut current = entry_point;
        if level < self.max_level {
            current = self.greedy_descend(&query, entry_point, self.max_level, level + 1);
        }

        let top = level.min(self.max_level);
        for l in (0..=top).rev() {
            let m_eff = if l == 0 { self.config.m0 } else { self.config.m };
            let candidates = self.search_layer(&query, current, self.config.ef_construction, l);
            let selected = self.select_neighbors(&candidates, m_eff);
            if let Some(&best) = selected.first() {
                current = best;
            }
            self.nodes[node_index as usize].neighbors[l as usize] = selected.clone();
            for &neighbor in &selected {
                self.connect(neighbor, node_index, l, m_eff);
            }
        }

        if level > self.max_level {
            self.entry_point = Some(node_index);
            self.max_level = level;
        }
        node_index
    }

    fn connect(&mut self, node: u32, new_neighbor: u32, level: u8, m_eff: usize) {
        let list = &mut self.nodes[node as usize].neighbors[level as usize];
        if list.contains(&new_neighbor) {
            return;
        }
        list.push(new_neighbor);
        if list.len() <= m_eff {
            return;
        }
        let node_vector = self.vector(node).to_vec();
        let mut candidates: Vec<ScoredCandidate> = self.nodes[node as usize].neighbors[level as usize]
            .iter()
            .map(|&n| ScoredCandidate {
                key: self.metric.search_key(&node_vector, self.vector(n)),
                index: n,
            })
            .collect();
        candidates.sort_by(|a, b| a.key.partial_cmp(&b.key).unwrap());
        let selected = self.select_neighbors(&candidates, m_eff);
        self.nodes[node as usize].neighbors[level as usize] = selected;
    }

    /// Returns up to `k` nearest nodes to `query`, ascending by raw metric
    /// distance (DotProduct callers should reverse for descending order).
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Vec<(u32, f64)> {
        let Some(entry_point) = self.entry_point else {
            return Vec::new();
        };
        let ef = ef.max(k);
        let mut current = entry_point;
        if self.max_level > 0 {
            current = self.greedy_descend(query, entry_point, self.max_level, 1);
        }
        let candidates = self.search_layer(query, current, ef, 0);
        candidates
            .into_iter()
            .take(k)
            .map(|c| (c.index, self.metric.distance(query, self.vector(c.index))))
            .collect()
    }

    pub fn node_row_id(&self, index: u32) -> i64 {
        self.nodes[index as usize].row_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(metric: DistanceMetric, vectors: &[(i64, Vec<f32>)]) -> Graph {
        let mut graph = Graph::new(metric, vectors[0].1.len(), HnswConfig::default());
        for (row_id, v) in vectors {
            graph.insert(*row_id, v.clone());
        }
        graph
    }

    #[test]
    fn nearest_neighbor_on_tiny_graph() {
        let graph = build(
            DistanceMetric::Euclidean,
            &[(10, vec![1.0, 0.0]), (20, vec![0.0, 1.0]), (30, vec![5.0, 5.0])],
        );
        let results = graph.search(&[0.9, 0.1], 1, 50);
        assert_eq!(results[0].0, graph.nodes.iter().position(|n| n.row_id == 10).unwrap() as u32);
    }

    #[test]
    fn recall_on_random_vectors_is_high() {
        use rand::Rng;
        let mut rng = StdRng::seed_from_u64(42);
        let dim = 32;
        let n = 2000;
        let vectors: Vec<(i64, Vec<f32>)> = (0..n)
            .map(|i| (i as i64, (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect()))
            .collect();
        let graph = build(DistanceMetric::Euclidean, &vectors);

        let queries = 20;
        let mut hits = 0;
        let mut total = 0;
        for q in 0..queries {
            let query = &vectors[q].1;
            let mut truth: Vec<(i64, f64)> = vectors
                .iter()
                .map(|(rid, v)| (*rid, DistanceMetric::Euclidean.distance(query, v)))
                .collect();
            truth.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
            let truth_top10: HashSet<i64> = truth.iter().take(10).map(|(rid, _)| *rid).collect();

            let approx = graph.search(query, 10, 150);
            let approx_ids: HashSet<i64> = approx.iter().map(|(idx, _)| graph.node_row_id(*idx)).collect();
            hits += truth_top10.intersection(&approx_ids).count();
            total += 10;
        }
        assert!(hits as f64 / total as f64 >= 0.85, "recall too low: {}/{}", hits, total);
    }
}
