//! HNSW (Hierarchical Navigable Small World) approximate nearest-neighbor
//! index.
//!
//! Insert assigns a level by exponential decay over `ln(1/U)` scaled by
//! `1/ln(M)`, connects the new node to its `M` nearest already-inserted
//! neighbors at each layer from its level down to 0 (search bounded by
//! `ef_construction` candidates), and prunes each node's neighbor list back
//! down to `M` (or `2*M` at layer 0) by distance. Search descends greedily
//! from the top layer down to layer 1 one step at a time, then runs a
//! best-first expansion at layer 0 with candidate set size `ef_search`.

use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::Rng;

use crate::error::{Error, Result};
use crate::vector::{sort_and_truncate, Metric, Neighbor, VectorIndex};

#[derive(Debug, Clone, Copy)]
pub struct HnswConfig {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self { m: 16, ef_construction: 64, ef_search: 32 }
    }
}

struct Node {
    vector: Vec<f64>,
    /// `neighbors[layer]` holds this node's out-edges at that layer.
    neighbors: Vec<Vec<u64>>,
}

pub struct HnswIndex {
    dim: usize,
    metric: Metric,
    config: HnswConfig,
    nodes: HashMap<u64, Node>,
    entry_point: Option<u64>,
    top_layer: usize,
}

/// Max-heap-by-distance wrapper so `BinaryHeap` (a max-heap) can serve as a
/// bounded candidate set we pop the *farthest* element from.
#[derive(PartialEq)]
struct ByDistance(f64, u64);

impl Eq for ByDistance {}
impl PartialOrd for ByDistance {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ByDistance {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal).then(self.1.cmp(&other.1))
    }
}

impl HnswIndex {
    pub fn new(dim: usize, metric: Metric, config: HnswConfig) -> Self {
        Self { dim, metric, config, nodes: HashMap::new(), entry_point: None, top_layer: 0 }
    }

    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        self.metric.distance(a, b)
    }

    fn assign_level(&self) -> usize {
        let u: f64 = rand::thread_rng().gen_range(1e-12, 1.0);
        let scale = 1.0 / (self.config.m as f64).ln();
        (-u.ln() * scale).floor() as usize
    }

    /// Greedy single-step descent from `entry` down to (and including)
    /// `target_layer + 1`, returning the closest node found at that point.
    fn greedy_descend(&self, query: &[f64], entry: u64, from_layer: usize, target_layer: usize) -> u64 {
        let mut current = entry;
        let mut current_dist = self.distance(query, &self.nodes[&current].vector);

        for layer in (target_layer + 1..=from_layer).rev() {
            loop {
                let mut improved = false;
                if let Some(node) = self.nodes.get(&current) {
                    if let Some(edges) = node.neighbors.get(layer) {
                        for &candidate in edges {
                            let d = self.distance(query, &self.nodes[&candidate].vector);
                            if d < current_dist {
                                current_dist = d;
                                current = candidate;
                                improved = true;
                            }
                        }
                    }
                }
                if !improved {
                    break;
                }
            }
        }
        current
    }

    /// Best-first search at a single layer starting from `entry`, expanding
    /// up to `ef` candidates and returning the best ones found, nearest
    /// first.
    fn search_layer(&self, query: &[f64], entry: u64, layer: usize, ef: usize) -> Vec<(f64, u64)> {
        let mut visited = HashSet::new();
        visited.insert(entry);

        let entry_dist = self.distance(query, &self.nodes[&entry].vector);
        let mut candidates = BinaryHeap::new();
        candidates.push(std::cmp::Reverse(ByDistance(entry_dist, entry)));
        let mut best = BinaryHeap::new();
        best.push(ByDistance(entry_dist, entry));

        while let Some(std::cmp::Reverse(ByDistance(dist, node_id))) = candidates.pop() {
            if let Some(worst) = best.peek() {
                if best.len() >= ef && dist > worst.0 {
                    break;
                }
            }

            if let Some(node) = self.nodes.get(&node_id) {
                if let Some(edges) = node.neighbors.get(layer) {
                    for &neighbor in edges {
                        if visited.insert(neighbor) {
                            let d = self.distance(query, &self.nodes[&neighbor].vector);
                            if best.len() < ef || d < best.peek().map(|b| b.0).unwrap_or(f64::INFINITY) {
                                candidates.push(std::cmp::Reverse(ByDistance(d, neighbor)));
                                best.push(ByDistance(d, neighbor));
                                if best.len() > ef {
                                    best.pop();
                                }
                            }
                        }
                    }
                }
            }
        }

        let mut out: Vec<(f64, u64)> = best.into_iter().map(|ByDistance(d, id)| (d, id)).collect();
        out.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.cmp(&b.1)));
        out
    }
}

impl VectorIndex for HnswIndex {
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

        let level = self.assign_level();
        let entry_point = self.entry_point;

        self.nodes.insert(id, Node { vector: vector.clone(), neighbors: vec![Vec::new(); level + 1] });

        let mut entry = match entry_point {
            Some(e) => e,
            None => {
                self.entry_point = Some(id);
                self.top_layer = level;
                return Ok(());
            }
        };

        let prior_top = self.top_layer;
        if prior_top > level {
            entry = self.greedy_descend(&vector, entry, prior_top, level);
        }

        for layer in (0..=level.min(prior_top)).rev() {
            let ef = self.config.ef_construction;
            let candidates = self.search_layer(&vector, entry, layer, ef);
            let m = if layer == 0 { self.config.m * 2 } else { self.config.m };
            let chosen: Vec<u64> = candidates.iter().take(m).map(|(_, nid)| *nid).collect();

            for &neighbor_id in &chosen {
                self.nodes.get_mut(&id).unwrap().neighbors[layer].push(neighbor_id);
                let back = &mut self.nodes.get_mut(&neighbor_id).unwrap().neighbors;
                if layer < back.len() {
                    back[layer].push(id);
                    if back[layer].len() > m {
                        let origin = self.nodes[&neighbor_id].vector.clone();
                        let mut with_dist: Vec<(f64, u64)> = self.nodes[&neighbor_id].neighbors[layer]
                            .iter()
                            .map(|&n| (self.distance(&origin, &self.nodes[&n].vector), n))
                            .collect();
                        with_dist.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
                        with_dist.truncate(m);
                        self.nodes.get_mut(&neighbor_id).unwrap().neighbors[layer] =
                            with_dist.into_iter().map(|(_, n)| n).collect();
                    }
                }
            }
            if let Some((_, closest)) = candidates.first() {
                entry = *closest;
            }
        }

        if level > prior_top {
            self.entry_point = Some(id);
            self.top_layer = level;
        }
        Ok(())
    }

    fn remove(&mut self, id: u64) -> Result<()> {
        if self.nodes.remove(&id).is_none() {
            return Err(Error::catalog(format!("vector id {} not found", id)));
        }
        for node in self.nodes.values_mut() {
            for layer in node.neighbors.iter_mut() {
                layer.retain(|&n| n != id);
            }
        }
        if self.entry_point == Some(id) {
            self.entry_point = self.nodes.keys().next().copied();
            self.top_layer = self
                .entry_point
                .map(|e| self.nodes[&e].neighbors.len().saturating_sub(1))
                .unwrap_or(0);
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn search(&self, query: &[f64], k: usize, threshold: f64) -> Result<Vec<Neighbor>> {
        if query.len() != self.dim {
            return Err(Error::ty(format!(
                "query has dimension {}, index expects {}",
                query.len(),
                self.dim
            )));
        }
        let entry_point = match self.entry_point {
            Some(e) => e,
            None => return Ok(Vec::new()),
        };

        let entry = self.greedy_descend(query, entry_point, self.top_layer, 0);
        let ef = self.config.ef_search.max(k);
        let hits: Vec<Neighbor> = self
            .search_layer(query, entry, 0, ef)
            .into_iter()
            .filter(|(d, _)| *d <= threshold)
            .map(|(distance, id)| Neighbor { id, distance })
            .collect();
        Ok(sort_and_truncate(hits, k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(config: HnswConfig) -> HnswIndex {
        let mut idx = HnswIndex::new(3, Metric::L2, config);
        for i in 0..20u64 {
            let f = i as f64;
            idx.add(i, vec![f, f * 0.5, -f * 0.25]).unwrap();
        }
        idx
    }

    #[test]
    fn search_finds_exact_match_for_indexed_point() {
        let idx = build(HnswConfig::default());
        let hits = idx.search(&[5.0, 2.5, -1.25], 1, f64::INFINITY).unwrap();
        assert_eq!(hits[0].id, 5);
        assert!(hits[0].distance.abs() < 1e-9);
    }

    #[test]
    fn k_greater_than_size_returns_everything() {
        let mut idx = HnswIndex::new(2, Metric::L2, HnswConfig::default());
        idx.add(1, vec![0.0, 0.0]).unwrap();
        idx.add(2, vec![1.0, 1.0]).unwrap();
        let hits = idx.search(&[0.0, 0.0], 50, f64::INFINITY).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn empty_index_returns_no_hits() {
        let idx = HnswIndex::new(2, Metric::L2, HnswConfig::default());
        let hits = idx.search(&[0.0, 0.0], 5, f64::INFINITY).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn remove_drops_node_from_future_searches() {
        let mut idx = build(HnswConfig::default());
        idx.remove(5).unwrap();
        let hits = idx.search(&[5.0, 2.5, -1.25], 1, f64::INFINITY).unwrap();
        assert_ne!(hits[0].id, 5);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut idx = build(HnswConfig::default());
        assert!(idx.add(99, vec![1.0, 2.0]).is_err());
    }
}
