//! Ten-point round score from per-unit differences against the teacher.

use crate::schema::FeatureSchema;
use crate::types::FeatureVector;

/// Best possible round score.
pub const MAX_ROUND_SCORE: f64 = 10.0;

/// Penalty for one unit's absolute difference. Large gaps are capped in
/// steps; differences under 0.1 are charged linearly.
pub fn penalty_for_difference(diff: f64) -> f64 {
    match diff {
        d if d >= 1.0 => 0.8,
        d if d >= 0.7 => 0.6,
        d if d >= 0.4 => 0.4,
        d if d >= 0.1 => 0.2,
        d => d * 5.0,
    }
}

/// `10 - Σ penalty(|user[k] - teacher[k]|)` over schema keys, floored at 0.
pub fn penalty_score(user: &FeatureVector, teacher: &FeatureVector, schema: &FeatureSchema) -> f64 {
    let total: f64 = schema
        .keys()
        .iter()
        .map(|k| penalty_for_difference((user.value(k) - teacher.value(k)).abs()))
        .sum();
    (MAX_ROUND_SCORE - total).max(0.0)
}
