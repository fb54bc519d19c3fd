//! Exponential-distance similarity between expression vectors.

use crate::schema::FeatureSchema;
use crate::types::{Embedding, FeatureVector};
use thiserror::Error;

/// Decay constant for `100 * exp(-k * d)`. Tuned by hand toward generous
/// scores, not calibrated; lower is more forgiving.
pub const DEFAULT_SIMILARITY_DECAY: f64 = 0.05;

/// Upper bound of the similarity scale.
pub const MAX_SIMILARITY: f64 = 100.0;

#[derive(Error, Debug, PartialEq)]
pub enum ScoreError {
    #[error("vector length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("decay must be finite and positive, got {0}")]
    InvalidDecay(f64),
}

/// Maps a pair of vectors to a score in `[0, 100]`.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityScorer {
    decay: f64,
}

impl Default for SimilarityScorer {
    fn default() -> Self {
        Self {
            decay: DEFAULT_SIMILARITY_DECAY,
        }
    }
}

impl SimilarityScorer {
    pub fn new(decay: f64) -> Result<Self, ScoreError> {
        if !decay.is_finite() || decay <= 0.0 {
            return Err(ScoreError::InvalidDecay(decay));
        }
        Ok(Self { decay })
    }

    pub fn decay(&self) -> f64 {
        self.decay
    }

    /// `100 * exp(-decay * |a - b|)`, floored at zero.
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> Result<f64, ScoreError> {
        if a.len() != b.len() {
            return Err(ScoreError::LengthMismatch {
                left: a.len(),
                right: b.len(),
            });
        }
        let distance = a
            .iter()
            .zip(b)
            .map(|(x, y)| {
                let d = *x as f64 - *y as f64;
                d * d
            })
            .sum::<f64>()
            .sqrt();
        Ok(self.score_for_distance(distance))
    }

    /// Score for a precomputed Euclidean distance.
    pub fn score_for_distance(&self, distance: f64) -> f64 {
        (MAX_SIMILARITY * (-self.decay * distance).exp()).max(0.0)
    }

    pub fn compare_embeddings(&self, a: &Embedding, b: &Embedding) -> Result<f64, ScoreError> {
        self.similarity(&a.values, &b.values)
    }

    /// Compare two feature vectors column by column in schema order.
    pub fn compare_features(
        &self,
        a: &FeatureVector,
        b: &FeatureVector,
        schema: &FeatureSchema,
    ) -> f64 {
        let distance = schema
            .keys()
            .iter()
            .map(|k| {
                let d = a.value(k) - b.value(k);
                d * d
            })
            .sum::<f64>()
            .sqrt();
        self.score_for_distance(distance)
    }
}
