//! Exhaustive flat vector index.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::vector::{sort_and_truncate, Metric, Neighbor, VectorIndex};

pub struct FlatIndex {
    dim: usize,
    metric: Metric,
    vectors: HashMap<u64, Vec<f64>>,
}

impl FlatIndex {
    pub fn new(dim: usize, metric: Metric) -> Self {
        Self { dim, metric, vectors: HashMap::new() }
    }
}

impl VectorIndex for FlatIndex {
    fn dim(&self) -> usize {
        self.dim
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn add(&mut self, id: u64, vector: Vec<f64>) -> Result<()> {
        if vector.len() != self.dim {
            return Err(Error::ty(format!(
                "vector has dimension {}, index expects {}",
                vector.len(),
                self.dim
            )));
        }
        self.vectors.insert(id, vector);
        Ok(())
    }

    fn remove(&mut self, id: u64) -> Result<()> {
        self.vectors
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::catalog(format!("vector id {} not found", id)))
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn search(&self, query: &[f64], k: usize, threshold: f64) -> Result<Vec<Neighbor>> {
        if query.len() != self.dim {
            return Err(Error::ty(format!(
                "query has dimension {}, index expects {}",
                query.len(),
                self.dim
            )));
        }
        let hits: Vec<Neighbor> = self
            .vectors
            .iter()
            .map(|(&id, v)| Neighbor { id, distance: self.metric.distance(query, v) })
            .filter(|n| n.distance <= threshold)
            .collect();
        Ok(sort_and_truncate(hits, k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build() -> FlatIndex {
        let mut idx = FlatIndex::new(3, Metric::L2);
        idx.add(1, vec![0.0, 0.0, 0.0]).unwrap();
        idx.add(2, vec![1.0, 0.0, 0.0]).unwrap();
        idx.add(3, vec![0.0, 1.0, 0.0]).unwrap();
        idx.add(4, vec![10.0, 10.0, 10.0]).unwrap();
        idx
    }

    #[test]
    fn knn_matches_literal_scenario() {
        let idx = build();
        let hits = idx.search(&[0.0, 0.0, 0.0], 2, f64::INFINITY).unwrap();
        assert_eq!(hits, vec![Neighbor { id: 1, distance: 0.0 }, Neighbor { id: 2, distance: 1.0 }]);
    }

    #[test]
    fn k_greater_than_size_returns_everything() {
        let idx = build();
        let hits = idx.search(&[0.0, 0.0, 0.0], 100, f64::INFINITY).unwrap();
        assert_eq!(hits.len(), 4);
    }

    #[test]
    fn threshold_excludes_far_neighbors() {
        let idx = build();
        let hits = idx.search(&[0.0, 0.0, 0.0], 10, 5.0).unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut idx = build();
        assert!(idx.add(5, vec![1.0, 2.0]).is_err());
        assert!(idx.search(&[1.0, 2.0], 1, f64::INFINITY).is_err());
    }

    #[test]
    fn remove_then_search_excludes_it() {
        let mut idx = build();
        idx.remove(1).unwrap();
        let hits = idx.search(&[0.0, 0.0, 0.0], 1, f64::INFINITY).unwrap();
        assert_eq!(hits[0].id, 2);
    }
}
