//! Delta layer and tombstones over a base `Graph` (spec §4.6 "Delta and
//! tombstones").

use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};

use super::{DistanceMetric, Graph, HnswConfig, Match};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
struct DeltaLayer {
    nodes: Vec<(i64, Vec<f32>)>,
}

impl DeltaLayer {
    fn upsert(&mut self, row_id: i64, vector: Vec<f32>) {
        self.nodes.retain(|(r, _)| *r != row_id);
        self.nodes.push((row_id, vector));
    }

    fn remove(&mut self, row_id: i64) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|(r, _)| *r != row_id);
        before != self.nodes.len()
    }
}

/// Mutable vector index: a (mostly) immutable base graph plus a small
/// appendable delta and a tombstone set of retired base node indices.
#[derive(Debug, Clone)]
pub struct HnswIndex {
    base: Graph,
    delta: DeltaLayer,
    tombstones: HashSet<u32>,
    row_id_to_base_index: HashMap<i64, u32>,
    version: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub version: u64,
    pub checksum: u64,
    pub active_node_count: usize,
    pub pending_upsert_count: usize,
    pub pending_delete_count: usize,
}

impl HnswIndex {
    pub fn build(metric: DistanceMetric, dimensions: usize, config: HnswConfig, rows: &[(i64, Vec<f32>)]) -> Self {
        let mut base = Graph::new(metric, dimensions, config);
        let mut row_id_to_base_index = HashMap::new();
        for (row_id, vector) in rows {
            let index = base.insert(*row_id, vector.clone());
            row_id_to_base_index.insert(*row_id, index);
        }
        Self {
            base,
            delta: DeltaLayer::default(),
            tombstones: HashSet::new(),
            row_id_to_base_index,
            version: 0,
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.base.metric
    }

    pub fn dimensions(&self) -> usize {
        self.base.dimensions
    }

    pub fn base(&self) -> &Graph {
        &self.base
    }

    pub fn has_pending_mutations(&self) -> bool {
        !self.delta.nodes.is_empty() || !self.tombstones.is_empty()
    }

    pub fn upsert(&mut self, row_id: i64, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.base.dimensions {
            return Err(Error::VectorDimensionMismatch {
                expected: self.base.dimensions,
                actual: vector.len(),
            });
        }
        if let Some(base_index) = self.row_id_to_base_index.remove(&row_id) {
            self.tombstones.insert(base_index);
        }
        self.delta.upsert(row_id, vector);
        Ok(())
    }

    pub fn delete(&mut self, row_id: i64) {
        if let Some(base_index) = self.row_id_to_base_index.remove(&row_id) {
            self.tombstones.insert(base_index);
        }
        self.delta.remove(row_id);
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Match>> {
        self.search_with_ef(query, k, self.base.config.ef_search)
    }

    pub fn search_with_ef(&self, query: &[f32], k: usize, ef: usize) -> Result<Vec<Match>> {
        if query.len() != self.base.dimensions {
            return Err(Error::VectorDimensionMismatch {
                expected: self.base.dimensions,
                actual: query.len(),
            });
        }
        let widened = k + self.tombstones.len();
        let base_hits = self.base.search(query, widened.max(k), ef.max(widened));
        let metric = self.base.metric;

        let mut candidates: Vec<(i64, f64)> = base_hits
            .into_iter()
            .filter(|(index, _)| !self.tombstones.contains(index))
            .map(|(index, distance)| (self.base.node_row_id(index), distance))
            .collect();

        for (row_id, vector) in &self.delta.nodes {
            candidates.push((*row_id, metric.distance(query, vector)));
        }

        let descending = matches!(metric, DistanceMetric::DotProduct);
        candidates.sort_by(|a, b| {
            let ord = if descending {
                b.1.partial_cmp(&a.1).unwrap()
            } else {
                a.1.partial_cmp(&b.1).unwrap()
            };
            ord.then_with(|| a.0.cmp(&b.0))
        });
        candidates.truncate(k);
        Ok(candidates.into_iter().map(|(row_id, distance)| Match { row_id, distance }).collect())
    }

    pub fn snapshot(&self) -> Snapshot {
        let active_node_count = self.base.len() - self.tombstones.len() + self.delta.nodes.len();
        let mut hasher = Sha256::new();
        hasher.update(self.version.to_be_bytes());
        hasher.update((self.base.len() as u64).to_be_bytes());
        hasher.update((self.tombstones.len() as u64).to_be_bytes());
        hasher.update((self.delta.nodes.len() as u64).to_be_bytes());
        let digest = hasher.finalize();
        let checksum = u64::from_be_bytes(digest[..8].try_into().unwrap());
        Snapshot {
            version: self.version,
            checksum,
            active_node_count,
            pending_upsert_count: self.delta.nodes.len(),
            pending_delete_count: self.tombstones.len(),
        }
    }

    /// Folds tombstones into permanent deletions and re-inserts delta nodes
    /// through the regular insert path.
    pub fn merge_pending_mutations(&mut self) {
        let pending = std::mem::take(&mut self.delta.nodes);
        let merged = pending.len();
        for (row_id, vector) in pending {
            let index = self.base.insert(row_id, vector);
            self.row_id_to_base_index.insert(row_id, index);
        }
        self.version += 1;
        tracing::debug!(merged, version = self.version, "hnsw auto-maintenance merged delta into base graph");
    }

    /// Rebuilds the graph from only the currently live nodes.
    pub fn compact(&mut self) -> Result<()> {
        let mut live: Vec<(i64, Vec<f32>)> = Vec::new();
        for (index, node) in self.base.nodes.iter().enumerate() {
            if !self.tombstones.contains(&(index as u32)) {
                live.push((node.row_id, self.base.vectors[index].clone()));
            }
        }
        live.extend(self.delta.nodes.iter().cloned());
        if live.is_empty() {
            return Err(Error::Other("cannot compact an index with zero live nodes".into()));
        }
        live.sort_by_key(|(row_id, _)| *row_id);

        let metric = self.base.metric;
        let dimensions = self.base.dimensions;
        let config = self.base.config.clone();
        let mut base = Graph::new(metric, dimensions, config);
        let mut row_id_to_base_index = HashMap::new();
        for (row_id, vector) in live {
            let index = base.insert(row_id, vector);
            row_id_to_base_index.insert(row_id, index);
        }

        self.base = base;
        self.row_id_to_base_index = row_id_to_base_index;
        self.tombstones.clear();
        self.delta.nodes.clear();
        self.version += 1;
        tracing::info!(live_nodes = self.base.len(), version = self.version, "hnsw index compacted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::HnswConfig;

    #[test]
    fn delta_upsert_is_found_before_merge() {
        let mut index = HnswIndex::build(
            DistanceMetric::Euclidean,
            2,
            HnswConfig { seed: 7, ..HnswConfig::default() },
            &[(10, vec![1.0, 0.0]), (20, vec![0.0, 1.0])],
        );
        index.upsert(99, vec![0.99, 0.01]).unwrap();
        assert!(index.has_pending_mutations());

        let results = index.search(&[0.98, 0.02], 1).unwrap();
        assert_eq!(results[0].row_id, 99);
    }

    #[test]
    fn delete_tombstones_base_node() {
        let mut index = HnswIndex::build(
            DistanceMetric::Euclidean,
            2,
            HnswConfig::default(),
            &[(10, vec![1.0, 0.0]), (20, vec![0.0, 1.0])],
        );
        index.delete(10);
        let results = index.search(&[1.0, 0.0], 2).unwrap();
        assert!(results.iter().all(|m| m.row_id != 10));
    }

    #[test]
    fn compact_rebuilds_from_live_nodes_only() {
        let mut index = HnswIndex::build(
            DistanceMetric::Euclidean,
            2,
            HnswConfig::default(),
            &[(10, vec![1.0, 0.0]), (20, vec![0.0, 1.0])],
        );
        index.delete(10);
        index.upsert(30, vec![0.5, 0.5]).unwrap();
        index.compact().unwrap();
        assert!(!index.has_pending_mutations());
        let results = index.search(&[0.5, 0.5], 2).unwrap();
        let ids: Vec<i64> = results.iter().map(|m| m.row_id).collect();
        assert!(ids.contains(&30));
        assert!(!ids.contains(&10));
    }

    #[test]
    fn compact_with_no_live_nodes_errors() {
        let mut index = HnswIndex::build(DistanceMetric::Euclidean, 2, HnswConfig::default(), &[(10, vec![1.0, 0.0])]);
        index.delete(10);
        assert!(index.compact().is_err());
    }
}
