//! Vector search: in-memory named indexes over f64 vectors.
//!
//! Shaped like `index::btree` (a named, independently owned structure
//! behind a trait boundary, `Result`-returning operations) but the
//! indexes themselves are pure in-memory structures — there is no paging
//! or WAL involvement; these indexes are not persisted across restarts.

pub mod distance;
pub mod flat;
pub mod hnsw;
pub mod registry;

pub use distance::Metric;
pub use flat::FlatIndex;
pub use hnsw::HnswIndex;
pub use registry::{IndexKind, VectorIndexRegistry};

use crate::error::Result;

/// A single nearest-neighbor hit: the id supplied at `add` time and its
/// distance to the query vector under the index's configured metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: u64,
    pub distance: f64,
}

/// Common surface for both the exhaustive flat index and the approximate
/// HNSW graph index, so callers (and the executor's vector-scan operator)
/// don't need to match on which one backs a given name.
pub trait VectorIndex: Send + Sync {
    fn dim(&self) -> usize;
    fn metric(&self) -> Metric;
    fn add(&mut self, id: u64, vector: Vec<f64>) -> Result<()>;
    fn remove(&mut self, id: u64) -> Result<()>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Return up to `k` nearest neighbors to `query` with distance no
    /// greater than `threshold` (`f64::INFINITY` for no threshold), nearest
    /// first, ties broken by lower id.
    fn search(&self, query: &[f64], k: usize, threshold: f64) -> Result<Vec<Neighbor>>;
}

pub(crate) fn sort_and_truncate(mut hits: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    hits.truncate(k);
    hits
}
