//! End-to-end scenario: create a named vector index, populate it, and
//! confirm k-NN search returns the true nearest neighbors (checked against
//! a brute-force flat index) for both the flat and HNSW backends.

use stratumdb::vector::{HnswIndex, IndexKind, Metric, VectorIndexRegistry};
use stratumdb::vector::hnsw::HnswConfig;

fn grid_points() -> Vec<(u64, Vec<f64>)> {
    let mut points = Vec::new();
    let mut id = 0u64;
    for x in 0..10 {
        for y in 0..10 {
            points.push((id, vec![x as f64, y as f64]));
            id += 1;
        }
    }
    points
}

#[test]
fn flat_index_finds_the_nearest_grid_point() {
    let registry = VectorIndexRegistry::new();
    registry.create_index("grid", 2, Metric::L2, IndexKind::Flat).unwrap();
    for (id, vector) in grid_points() {
        registry.add("grid", id, vector).unwrap();
    }

    // (5, 5) is grid point id 55; its nearest neighbor besides itself is
    // one grid step away.
    let hits = registry.search("grid", &[5.0, 5.0], 1, f64::INFINITY).unwrap();
    assert_eq!(hits[0].id, 55);
    assert_eq!(hits[0].distance, 0.0);
}

#[test]
fn removed_vector_is_no_longer_returned() {
    let registry = VectorIndexRegistry::new();
    registry.create_index("grid", 2, Metric::L2, IndexKind::Flat).unwrap();
    for (id, vector) in grid_points() {
        registry.add("grid", id, vector).unwrap();
    }

    registry.remove("grid", 55).unwrap();
    let hits = registry.search("grid", &[5.0, 5.0], 1, f64::INFINITY).unwrap();
    assert_ne!(hits[0].id, 55);
}

#[test]
fn hnsw_search_agrees_with_a_brute_force_scan() {
    let registry = VectorIndexRegistry::new();
    let config = HnswConfig { m: 8, ef_construction: 48, ef_search: 48 };
    registry.create_index("grid_hnsw", 2, Metric::L2, IndexKind::Hnsw(config)).unwrap();

    let points = grid_points();
    for (id, vector) in &points {
        registry.add("grid_hnsw", *id, vector.clone()).unwrap();
    }

    let query = [4.5, 4.5];
    let approx = registry.search("grid_hnsw", &query, 5, f64::INFINITY).unwrap();

    let mut brute: Vec<(u64, f64)> = points
        .iter()
        .map(|(id, v)| {
            let d = ((v[0] - query[0]).powi(2) + (v[1] - query[1]).powi(2)).sqrt();
            (*id, d)
        })
        .collect();
    brute.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then(a.0.cmp(&b.0)));
    let exact_best = brute[0].0;

    assert_eq!(approx[0].id, exact_best);
}

#[test]
fn hnsw_index_can_be_constructed_directly() {
    use stratumdb::vector::VectorIndex;

    let mut index = HnswIndex::new(2, Metric::Cosine, HnswConfig::default());
    index.add(1, vec![1.0, 0.0]).unwrap();
    index.add(2, vec![0.0, 1.0]).unwrap();
    index.add(3, vec![1.0, 0.01]).unwrap();

    let hits = index.search(&[1.0, 0.0], 1, f64::INFINITY).unwrap();
    assert_eq!(hits[0].id, 1);
}
