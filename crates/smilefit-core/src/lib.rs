//! smilefit-core: facial action unit features and expression scoring.
//!
//! Turns face-mesh landmarks into a schema-ordered action-unit feature
//! vector, then scores it against a reference expression (bounded
//! similarity, ten-point penalty score) or with a trained regressor. The
//! landmark estimator, expression encoder and score regressor run via ONNX
//! Runtime for CPU inference.

pub mod au;
pub mod encoder;
pub mod estimator;
pub mod penalty;
pub mod predictor;
pub mod rehab;
pub mod schema;
pub mod similarity;
pub mod types;

pub use au::{AuExtractor, ExtractionReport};
pub use encoder::ExpressionEncoder;
pub use estimator::{FaceMeshEstimator, LandmarkEstimator};
pub use predictor::{OnnxRegressor, Regressor, ScorePredictor};
pub use schema::FeatureSchema;
pub use similarity::SimilarityScorer;
pub use types::{Embedding, FeatureVector, Landmark, LandmarkSet};

use std::path::PathBuf;

/// Default model directory: `$XDG_DATA_HOME/smilefit/models`, falling back
/// to `~/.local/share/smilefit/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("smilefit")
        .join("models")
}
