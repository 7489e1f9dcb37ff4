//! Named vector index registry: `create_index`, `drop_index`, `add`,
//! `remove`, `search`.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::vector::hnsw::HnswConfig;
use crate::vector::{FlatIndex, HnswIndex, Metric, Neighbor, VectorIndex};

#[derive(Debug, Clone, Copy)]
pub enum IndexKind {
    Flat,
    Hnsw(HnswConfig),
}

pub struct VectorIndexRegistry {
    indexes: RwLock<HashMap<String, Box<dyn VectorIndex>>>,
}

impl VectorIndexRegistry {
    pub fn new() -> Self {
        Self { indexes: RwLock::new(HashMap::new()) }
    }

    pub fn create_index(&self, name: &str, dim: usize, metric: Metric, kind: IndexKind) -> Result<()> {
        let mut indexes = self.indexes.write().unwrap();
        if indexes.contains_key(name) {
            return Err(Error::catalog(format!("vector index '{}' already exists", name)));
        }
        let index: Box<dyn VectorIndex> = match kind {
            IndexKind::Flat => Box::new(FlatIndex::new(dim, metric)),
            IndexKind::Hnsw(config) => Box::new(HnswIndex::new(dim, metric, config)),
        };
        indexes.insert(name.to_string(), index);
        Ok(())
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.indexes
            .write()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::catalog(format!("vector index '{}' does not exist", name)))
    }

    pub fn add(&self, name: &str, id: u64, vector: Vec<f64>) -> Result<()> {
        let mut indexes = self.indexes.write().unwrap();
        let index = indexes
            .get_mut(name)
            .ok_or_else(|| Error::catalog(format!("vector index '{}' does not exist", name)))?;
        index.add(id, vector)
    }

    pub fn remove(&self, name: &str, id: u64) -> Result<()> {
        let mut indexes = self.indexes.write().unwrap();
        let index = indexes
            .get_mut(name)
            .ok_or_else(|| Error::catalog(format!("vector index '{}' does not exist", name)))?;
        index.remove(id)
    }

    pub fn search(&self, name: &str, query: &[f64], k: usize, threshold: f64) -> Result<Vec<Neighbor>> {
        let indexes = self.indexes.read().unwrap();
        let index = indexes
            .get(name)
            .ok_or_else(|| Error::catalog(format!("vector index '{}' does not exist", name)))?;
        index.search(query, k, threshold)
    }

    pub fn names(&self) -> Vec<String> {
        self.indexes.read().unwrap().keys().cloned().collect()
    }
}

impl Default for VectorIndexRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_add_search_round_trip() {
        let registry = VectorIndexRegistry::new();
        registry.create_index("v", 2, Metric::L2, IndexKind::Flat).unwrap();
        registry.add("v", 1, vec![0.0, 0.0]).unwrap();
        registry.add("v", 2, vec![1.0, 0.0]).unwrap();

        let hits = registry.search("v", &[0.0, 0.0], 1, f64::INFINITY).unwrap();
        assert_eq!(hits[0].id, 1);
    }

    #[test]
    fn duplicate_index_name_rejected() {
        let registry = VectorIndexRegistry::new();
        registry.create_index("v", 2, Metric::L2, IndexKind::Flat).unwrap();
        assert!(registry.create_index("v", 2, Metric::L2, IndexKind::Flat).is_err());
    }

    #[test]
    fn unknown_index_name_is_an_error() {
        let registry = VectorIndexRegistry::new();
        assert!(registry.search("missing", &[0.0], 1, f64::INFINITY).is_err());
    }

    #[test]
    fn drop_index_removes_it() {
        let registry = VectorIndexRegistry::new();
        registry.create_index("v", 2, Metric::L2, IndexKind::Flat).unwrap();
        registry.drop_index("v").unwrap();
        assert!(registry.names().is_empty());
    }
}
