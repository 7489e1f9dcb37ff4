//! Distance metrics for vector search.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    L2,
    Cosine,
    NegatedDotProduct,
    Manhattan,
}

impl Metric {
    pub fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            Metric::L2 => l2(a, b),
            Metric::Cosine => cosine_distance(a, b),
            Metric::NegatedDotProduct => -dot(a, b),
            Metric::Manhattan => manhattan(a, b),
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn l2(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt()
}

fn manhattan(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}

/// 1 − cosine similarity. Zero-norm vectors are treated as maximally
/// dissimilar from everything, including each other, since cosine
/// similarity is undefined for them.
fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
    let norm_a = dot(a, a).sqrt();
    let norm_b = dot(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot(a, b) / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_matches_known_values() {
        assert_eq!(Metric::L2.distance(&[0.0, 0.0, 0.0], &[0.0, 0.0, 0.0]), 0.0);
        assert_eq!(Metric::L2.distance(&[0.0, 0.0, 0.0], &[1.0, 0.0, 0.0]), 1.0);
    }

    #[test]
    fn cosine_of_identical_direction_is_zero() {
        let d = Metric::Cosine.distance(&[1.0, 1.0], &[2.0, 2.0]);
        assert!(d.abs() < 1e-9);
    }

    #[test]
    fn negated_dot_product_rewards_alignment() {
        let aligned = Metric::NegatedDotProduct.distance(&[1.0, 0.0], &[1.0, 0.0]);
        let opposed = Metric::NegatedDotProduct.distance(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!(aligned < opposed);
    }

    #[test]
    fn manhattan_sums_absolute_differences() {
        assert_eq!(Metric::Manhattan.distance(&[0.0, 0.0], &[3.0, 4.0]), 7.0);
    }
}
