use crate::models::{DistanceMetric, VectorHit};
use crate::StoreError;

pub fn check_dimension(expected: usize, vector: &[f32]) -> Result<(), StoreError> {
    if vector.len() != expected {
        return Err(StoreError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Dimension check plus a finiteness check, run before a vector is stored
/// or used as a query. NaN and infinities cannot round-trip through the
/// JSON and pgvector text forms.
pub fn check_vector(expected: usize, vector: &[f32]) -> Result<(), StoreError> {
    check_dimension(expected, vector)?;
    match vector.iter().position(|value| !value.is_finite()) {
        Some(index) => Err(StoreError::NonFiniteVector {
            index,
            value: vector[index],
        }),
        None => Ok(()),
    }
}

pub fn l2_distance(left: &[f32], right: &[f32]) -> f64 {
    left.iter()
        .zip(right)
        .map(|(a, b)| {
            let delta = f64::from(*a) - f64::from(*b);
            delta * delta
        })
        .sum::<f64>()
        .sqrt()
}

/// `1 - cos(left, right)`. Zero vectors are treated as maximally distant.
pub fn cosine_distance(left: &[f32], right: &[f32]) -> f64 {
    let mut dot = 0f64;
    let mut left_norm = 0f64;
    let mut right_norm = 0f64;
    for (a, b) in left.iter().zip(right) {
        let (a, b) = (f64::from(*a), f64::from(*b));
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return 1.0;
    }

    1.0 - dot / (left_norm.sqrt() * right_norm.sqrt())
}

pub fn distance(metric: DistanceMetric, left: &[f32], right: &[f32]) -> f64 {
    match metric {
        DistanceMetric::L2 => l2_distance(left, right),
        DistanceMetric::Cosine => cosine_distance(left, right),
    }
}

pub fn rank_hits(mut hits: Vec<VectorHit>, top_k: usize) -> Vec<VectorHit> {
    hits.sort_by(|left, right| {
        left.distance
            .total_cmp(&right.distance)
            .then(left.chunk_id.cmp(&right.chunk_id))
    });
    hits.truncate(top_k);
    hits
}

/// Parses the `[1,2,3]` text form used by the JSON column and by pgvector.
pub fn parse_vector(text: &str) -> Result<Vec<f32>, StoreError> {
    Ok(serde_json::from_str(text)?)
}

pub fn format_vector(vector: &[f32]) -> String {
    let parts = vector.iter().map(f32::to_string).collect::<Vec<_>>();
    format!("[{}]", parts.join(","))
}
