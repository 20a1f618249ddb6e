//! Hybrid vector search (spec §4.7 "VectorQuery").

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::hnsw::{DistanceMetric, HnswIndex, Match};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    FlatScan,
    HnswNearest,
    HnswReranked,
    HnswPostFilterWidening,
    HnswWithinDistanceWidening,
    ForceFlatScan,
}

#[derive(Debug, Default, Clone)]
pub struct QueryOptions {
    pub strategy: Option<Strategy>,
    /// Estimated number of rows the attached filter will let through; used
    /// by the dispatch policy to decide between widening and flat scan.
    pub estimated_filter_selectivity: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ExecutionInfo {
    pub strategy: Strategy,
    pub candidates_examined: usize,
    pub widened_ef: Option<usize>,
}

pub type RowEvaluator<'a> = dyn Fn(i64) -> bool + 'a;
pub type MetadataFilter<'a> = dyn Fn(i64) -> bool + 'a;

/// Source of raw rows for a brute-force flat scan.
pub trait FlatScanSource {
    fn rows(&self) -> Vec<(i64, Vec<f32>)>;
}

const FLAT_SCAN_SELECTIVITY_THRESHOLD: usize = 50;
const MAX_WIDEN_ROUNDS: usize = 5;
/// `HnswReranked` pulls this many times `k` candidates out of the ANN index
/// before handing them to the custom scorer (spec §4.7 "ANN top-K then
/// custom scorer").
const RERANK_OVERSAMPLE_FACTOR: usize = 4;

/// Re-scores an ANN candidate; higher is better. Receives the row id and the
/// index's own distance for that row.
pub type RerankScorer<'a> = dyn Fn(i64, f64) -> f64 + 'a;

pub struct VectorQuery<'a, S: FlatScanSource> {
    source: &'a S,
    metric: DistanceMetric,
    index: Option<&'a HnswIndex>,
    filter: Option<Box<MetadataFilter<'a>>>,
    row_evaluator: Option<Box<RowEvaluator<'a>>>,
    rerank_scorer: Option<Box<RerankScorer<'a>>>,
    last_execution_info: Option<ExecutionInfo>,
}

impl<'a, S: FlatScanSource> VectorQuery<'a, S> {
    pub fn new(source: &'a S, metric: DistanceMetric) -> Self {
        Self {
            source,
            metric,
            index: None,
            filter: None,
            row_evaluator: None,
            rerank_scorer: None,
            last_execution_info: None,
        }
    }

    pub fn use_index(mut self, index: &'a HnswIndex) -> Self {
        self.index = Some(index);
        self
    }

    /// Scorer used by `Strategy::HnswReranked`; required for that strategy
    /// to run. `k` ANN candidates are replaced by `k` candidates re-ordered
    /// by descending `scorer(row_id, ann_distance)`.
    pub fn with_rerank_scorer(mut self, scorer: impl Fn(i64, f64) -> f64 + 'a) -> Self {
        self.rerank_scorer = Some(Box::new(scorer));
        self
    }

    pub fn where_filter(mut self, filter: impl Fn(i64) -> bool + 'a) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn with_row_evaluator(mut self, evaluator: impl Fn(i64) -> bool + 'a) -> Self {
        self.row_evaluator = Some(Box::new(evaluator));
        self
    }

    pub fn clear_filters(mut self) -> Self {
        self.filter = None;
        self.row_evaluator = None;
        self
    }

    pub fn last_execution_info(&self) -> Option<&ExecutionInfo> {
        self.last_execution_info.as_ref()
    }

    fn passes_filters(&self, row_id: i64) -> bool {
        self.filter.as_ref().map(|f| f(row_id)).unwrap_or(true)
            && self.row_evaluator.as_ref().map(|f| f(row_id)).unwrap_or(true)
    }

    fn dispatch(&self, options: &QueryOptions) -> Strategy {
        if let Some(strategy) = options.strategy {
            return strategy;
        }
        if self.index.is_none() {
            return Strategy::FlatScan;
        }
        let has_filter = self.filter.is_some() || self.row_evaluator.is_some();
        if has_filter {
            let selectivity = options.estimated_filter_selectivity.unwrap_or(usize::MAX);
            if selectivity <= FLAT_SCAN_SELECTIVITY_THRESHOLD {
                return Strategy::FlatScan;
            }
            return Strategy::HnswPostFilterWidening;
        }
        Strategy::HnswNearest
    }

    fn flat_scan(&mut self, query: &[f32], k: usize) -> Result<Vec<Match>> {
        let mut candidates: Vec<(i64, f64)> = self
            .source
            .rows()
            .into_iter()
            .filter(|(row_id, _)| self.passes_filters(*row_id))
            .map(|(row_id, vector)| (row_id, self.metric.distance(query, &vector)))
            .collect();
        self.sort_and_truncate(&mut candidates, k);
        self.last_execution_info = Some(ExecutionInfo {
            strategy: Strategy::FlatScan,
            candidates_examined: candidates.len(),
            widened_ef: None,
        });
        Ok(candidates.into_iter().map(|(row_id, distance)| Match { row_id, distance }).collect())
    }

    fn sort_and_truncate(&self, candidates: &mut Vec<(i64, f64)>, k: usize) {
        let descending = matches!(self.metric, DistanceMetric::DotProduct);
        candidates.sort_by(|a, b| {
            let ord = if descending {
                b.1.partial_cmp(&a.1).unwrap()
            } else {
                a.1.partial_cmp(&b.1).unwrap()
            };
            ord.then_with(|| a.0.cmp(&b.0))
        });
        candidates.truncate(k);
    }

    pub fn nearest_to(&mut self, query: &[f32], k: usize, options: QueryOptions) -> Result<Vec<Match>> {
        if let Some(index) = self.index {
            if query.len() != index.dimensions() {
                return Err(Error::VectorDimensionMismatch { expected: index.dimensions(), actual: query.len() });
            }
            if index.metric() != self.metric {
                return Err(Error::VectorMetricMismatch { index: index.metric(), query: self.metric });
            }
        }

        let strategy = self.dispatch(&options);
        match strategy {
            Strategy::FlatScan | Strategy::ForceFlatScan => self.flat_scan(query, k),
            Strategy::HnswNearest => {
                let index = self.index.expect("dispatch only picks HNSW strategies when an index is attached");
                let hits = index.search(query, k)?;
                self.last_execution_info = Some(ExecutionInfo {
                    strategy,
                    candidates_examined: hits.len(),
                    widened_ef: None,
                });
                Ok(hits)
            }
            Strategy::HnswReranked => self.hnsw_reranked(query, k),
            Strategy::HnswPostFilterWidening => self.hnsw_post_filter_widening(query, k),
            Strategy::HnswWithinDistanceWidening => {
                unreachable!("within_distance dispatches separately")
            }
        }
    }

    /// ANN top-K, then rescored and reordered by the attached custom
    /// scorer (spec §4.7 "HnswReranked").
    fn hnsw_reranked(&mut self, query: &[f32], k: usize) -> Result<Vec<Match>> {
        let index = self.index.expect("dispatch only picks HNSW strategies when an index is attached");
        let scorer = self.rerank_scorer.as_ref().ok_or_else(|| {
            Error::Other("HnswReranked strategy requires a scorer set via VectorQuery::with_rerank_scorer".into())
        })?;

        let oversampled_k = (k * RERANK_OVERSAMPLE_FACTOR).max(k);
        let hits = index.search(query, oversampled_k)?;
        let mut rescored: Vec<(i64, f64, f64)> =
            hits.iter().map(|m| (m.row_id, scorer(m.row_id, m.distance), m.distance)).collect();
        rescored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then_with(|| a.0.cmp(&b.0)));
        rescored.truncate(k);

        self.last_execution_info = Some(ExecutionInfo {
            strategy: Strategy::HnswReranked,
            candidates_examined: hits.len(),
            widened_ef: None,
        });
        Ok(rescored.into_iter().map(|(row_id, _score, distance)| Match { row_id, distance }).collect())
    }

    fn hnsw_post_filter_widening(&mut self, query: &[f32], k: usize) -> Result<Vec<Match>> {
        let index = self.index.expect("post-filter widening requires an index");
        let mut ef = index.base().config.ef_search.max(k);
        let mut examined = 0;
        for _ in 0..MAX_WIDEN_ROUNDS {
            let hits = index.search_with_ef(query, ef.max(k * 4), ef)?;
            examined = hits.len();
            let filtered: Vec<Match> = hits.into_iter().filter(|m| self.passes_filters(m.row_id)).collect();
            if filtered.len() >= k || ef >= index.base().len().max(1) {
                self.last_execution_info = Some(ExecutionInfo {
                    strategy: Strategy::HnswPostFilterWidening,
                    candidates_examined: examined,
                    widened_ef: Some(ef),
                });
                return Ok(filtered.into_iter().take(k).collect());
            }
            ef *= 2;
        }
        let hits = index.search_with_ef(query, ef, ef)?;
        let filtered: Vec<Match> = hits.into_iter().filter(|m| self.passes_filters(m.row_id)).collect();
        self.last_execution_info = Some(ExecutionInfo {
            strategy: Strategy::HnswPostFilterWidening,
            candidates_examined: examined,
            widened_ef: Some(ef),
        });
        Ok(filtered.into_iter().take(k).collect())
    }

    pub fn within_distance(&mut self, query: &[f32], max_dist: f64, options: QueryOptions) -> Result<Vec<Match>> {
        if options.strategy == Some(Strategy::ForceFlatScan) || self.index.is_none() {
            let mut candidates: Vec<(i64, f64)> = self
                .source
                .rows()
                .into_iter()
                .filter(|(row_id, _)| self.passes_filters(*row_id))
                .map(|(row_id, vector)| (row_id, self.metric.distance(query, &vector)))
                .filter(|(_, d)| *d <= max_dist)
                .collect();
            let len = candidates.len();
            self.sort_and_truncate(&mut candidates, len);
            return Ok(candidates.into_iter().map(|(row_id, distance)| Match { row_id, distance }).collect());
        }

        let index = self.index.expect("checked above");
        let mut ef = index.base().config.ef_search;
        let mut previous_count = 0;
        for _ in 0..MAX_WIDEN_ROUNDS {
            let hits = index.search_with_ef(query, ef, ef)?;
            let within: Vec<Match> = hits
                .into_iter()
                .filter(|m| m.distance <= max_dist && self.passes_filters(m.row_id))
                .collect();
            if within.len() == previous_count {
                self.last_execution_info = Some(ExecutionInfo {
                    strategy: Strategy::HnswWithinDistanceWidening,
                    candidates_examined: within.len(),
                    widened_ef: Some(ef),
                });
                return Ok(within);
            }
            previous_count = within.len();
            ef *= 2;
            if ef >= index.base().len().max(1) {
                let hits = index.search_with_ef(query, ef, ef)?;
                let within: Vec<Match> = hits
                    .into_iter()
                    .filter(|m| m.distance <= max_dist && self.passes_filters(m.row_id))
                    .collect();
                self.last_execution_info = Some(ExecutionInfo {
                    strategy: Strategy::HnswWithinDistanceWidening,
                    candidates_examined: within.len(),
                    widened_ef: Some(ef),
                });
                return Ok(within);
            }
        }
        Ok(Vec::new())
    }
}

/// Reciprocal-rank fusion of a vector-search ranking and a text-search
/// ranking (spec §4.7 "Fusion").
pub struct RankFusion;

/// Sentinel meaning "not ranked by this retriever" (contributes 0 to the
/// fused score).
pub const UNRANKED_SENTINEL: usize = usize::MAX;

impl RankFusion {
    pub fn fuse(
        vector_ranked: &HashMap<i64, usize>,
        text_ranked: &HashMap<i64, usize>,
        top_k: usize,
        k: usize,
    ) -> Vec<(i64, f64)> {
        let mut ids: Vec<i64> = vector_ranked.keys().chain(text_ranked.keys()).copied().collect();
        ids.sort_unstable();
        ids.dedup();

        let contribution = |rank: Option<&usize>| -> f64 {
            match rank {
                Some(&r) if r != UNRANKED_SENTINEL => 1.0 / (k as f64 + r as f64),
                _ => 0.0,
            }
        };

        let mut scored: Vec<(i64, f64, usize)> = ids
            .into_iter()
            .map(|id| {
                let score = contribution(vector_ranked.get(&id)) + contribution(text_ranked.get(&id));
                let vector_rank = *vector_ranked.get(&id).unwrap_or(&UNRANKED_SENTINEL);
                (id, score, vector_rank)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then_with(|| a.2.cmp(&b.2)));
        scored.truncate(top_k);
        scored.into_iter().map(|(id, score, _)| (id, score)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct InMemoryRows(Vec<(i64, Vec<f32>)>);

    impl FlatScanSource for InMemoryRows {
        fn rows(&self) -> Vec<(i64, Vec<f32>)> {
            self.0.clone()
        }
    }

    #[test]
    fn flat_scan_orders_by_ascending_distance() {
        let source = InMemoryRows(vec![(1, vec![0.0, 0.0]), (2, vec![1.0, 0.0]), (3, vec![5.0, 0.0])]);
        let mut query = VectorQuery::new(&source, DistanceMetric::Euclidean);
        let results = query.nearest_to(&[0.0, 0.0], 2, QueryOptions::default()).unwrap();
        assert_eq!(results.iter().map(|m| m.row_id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn force_flat_scan_overrides_dispatch() {
        let source = InMemoryRows(vec![(1, vec![0.0, 0.0])]);
        let mut query = VectorQuery::new(&source, DistanceMetric::Euclidean);
        let options = QueryOptions { strategy: Some(Strategy::ForceFlatScan), ..Default::default() };
        query.nearest_to(&[0.0, 0.0], 1, options).unwrap();
        assert_eq!(query.last_execution_info().unwrap().strategy, Strategy::FlatScan);
    }

    #[test]
    fn hnsw_reranked_requires_a_scorer() {
        let index = HnswIndex::build(
            DistanceMetric::Euclidean,
            2,
            crate::hnsw::HnswConfig::default(),
            &[(1, vec![0.0, 0.0]), (2, vec![1.0, 0.0])],
        );
        let source = InMemoryRows(vec![(1, vec![0.0, 0.0]), (2, vec![1.0, 0.0])]);
        let mut query = VectorQuery::new(&source, DistanceMetric::Euclidean).use_index(&index);
        let options = QueryOptions { strategy: Some(Strategy::HnswReranked), ..Default::default() };
        assert!(query.nearest_to(&[0.0, 0.0], 1, options).is_err());
    }

    #[test]
    fn hnsw_reranked_applies_custom_scorer_order() {
        let index = HnswIndex::build(
            DistanceMetric::Euclidean,
            2,
            crate::hnsw::HnswConfig::default(),
            &[(1, vec![0.0, 0.0]), (2, vec![1.0, 0.0]), (3, vec![2.0, 0.0])],
        );
        let source = InMemoryRows(vec![(1, vec![0.0, 0.0]), (2, vec![1.0, 0.0]), (3, vec![2.0, 0.0])]);
        // Scorer inverts distance-based preference: row 3 (farthest by raw
        // distance) scores highest, so it must come out on top.
        let mut query = VectorQuery::new(&source, DistanceMetric::Euclidean)
            .use_index(&index)
            .with_rerank_scorer(|row_id, _distance| row_id as f64);
        let options = QueryOptions { strategy: Some(Strategy::HnswReranked), ..Default::default() };
        let results = query.nearest_to(&[0.0, 0.0], 2, options).unwrap();
        assert_eq!(results.iter().map(|m| m.row_id).collect::<Vec<_>>(), vec![3, 2]);
    }

    #[test]
    fn rank_fusion_prefers_items_ranked_by_both() {
        let mut vector_ranked = HashMap::new();
        vector_ranked.insert(1, 0);
        vector_ranked.insert(2, 1);
        let mut text_ranked = HashMap::new();
        text_ranked.insert(2, 0);
        text_ranked.insert(3, 1);

        let fused = RankFusion::fuse(&vector_ranked, &text_ranked, 3, 60);
        assert_eq!(fused[0].0, 2);
    }
}
