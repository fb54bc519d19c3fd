//! Expression score regressor via ONNX Runtime.
//!
//! The gradient-boosting model is trained offline and exported to ONNX. It
//! takes one row of AU features in schema column order and returns a scalar
//! score.

use crate::schema::FeatureSchema;
use crate::types::FeatureVector;
use ndarray::Array2;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictorError {
    #[error("model file not found: {0} (export the regressor to ONNX and place it in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("input row has {got} columns, model expects {expected}")]
    ColumnMismatch { expected: usize, got: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A regression model over a single feature row.
pub trait Regressor {
    fn predict_row(&mut self, row: &[f32]) -> Result<f32, PredictorError>;
}

/// Regressor backed by an ONNX session.
pub struct OnnxRegressor {
    session: Session,
    columns: usize,
}

impl OnnxRegressor {
    /// Load an exported regressor. `columns` is the schema length the model
    /// was trained on.
    pub fn load(model_path: &str, columns: usize) -> Result<Self, PredictorError> {
        if !Path::new(model_path).exists() {
            return Err(PredictorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            columns,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded score regressor"
        );

        Ok(Self { session, columns })
    }
}

impl Regressor for OnnxRegressor {
    fn predict_row(&mut self, row: &[f32]) -> Result<f32, PredictorError> {
        if row.len() != self.columns {
            return Err(PredictorError::ColumnMismatch {
                expected: self.columns,
                got: row.len(),
            });
        }

        let input = Array2::from_shape_vec((1, row.len()), row.to_vec())
            .map_err(|e| PredictorError::InferenceFailed(format!("input shape: {e}")))?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, values) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| PredictorError::InferenceFailed(format!("score extraction: {e}")))?;

        values
            .first()
            .copied()
            .ok_or_else(|| PredictorError::InferenceFailed("empty score tensor".into()))
    }
}

/// Adapter that feeds feature vectors to a regressor in schema order.
///
/// Without a model (failed load) every prediction is 0.0. The service keeps
/// running in that state and reports it through [`is_loaded`](Self::is_loaded).
pub struct ScorePredictor {
    model: Option<Box<dyn Regressor + Send>>,
    schema: FeatureSchema,
}

impl ScorePredictor {
    pub fn new(model: Option<Box<dyn Regressor + Send>>, schema: FeatureSchema) -> Self {
        if model.is_none() {
            tracing::warn!("score model unavailable; predictions will be 0.0");
        }
        Self { model, schema }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Predict a score for `features`. Never fails: a missing model or an
    /// inference error yields 0.0.
    pub fn predict(&mut self, features: &FeatureVector) -> f64 {
        let Some(model) = self.model.as_mut() else {
            tracing::debug!("predict called without a score model");
            return 0.0;
        };

        let row = features.row(&self.schema);
        match model.predict_row(&row) {
            Ok(score) if score.is_finite() => score as f64,
            Ok(score) => {
                tracing::warn!(score, "score model returned a non-finite value");
                0.0
            }
            Err(e) => {
                tracing::warn!(error = %e, "score model inference failed");
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::au::AuExtractor;
    use crate::types::{Landmark, LandmarkSet};
    use std::sync::{Arc, Mutex};

    /// Records the rows it sees and returns their weighted sum.
    struct RecordingRegressor {
        seen: Arc<Mutex<Vec<Vec<f32>>>>,
        weights: Vec<f32>,
    }

    impl Regressor for RecordingRegressor {
        fn predict_row(&mut self, row: &[f32]) -> Result<f32, PredictorError> {
            self.seen.lock().unwrap().push(row.to_vec());
            Ok(row.iter().zip(&self.weights).map(|(x, w)| x * w).sum())
        }
    }

    struct FailingRegressor;

    impl Regressor for FailingRegressor {
        fn predict_row(&mut self, _row: &[f32]) -> Result<f32, PredictorError> {
            Err(PredictorError::InferenceFailed("boom".into()))
        }
    }

    fn sample_features(schema: &FeatureSchema) -> FeatureVector {
        let mut points = vec![Landmark::default(); 468];
        points[133] = Landmark::new(0.0, 0.0, 0.0);
        points[362] = Landmark::new(10.0, 0.0, 0.0);
        points[13] = Landmark::new(0.0, 0.0, 0.0);
        points[14] = Landmark::new(0.0, 5.0, 0.0);
        AuExtractor::with_schema(schema.clone()).extract(Some(&LandmarkSet::new(points)))
    }

    #[test]
    fn test_rows_follow_schema_order() {
        let schema =
            FeatureSchema::from_keys(vec!["AU25_w".into(), "AU01".into(), "AU25".into()]).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let model = RecordingRegressor {
            seen: seen.clone(),
            weights: vec![1.0, 1.0, 1.0],
        };
        let mut predictor = ScorePredictor::new(Some(Box::new(model)), schema.clone());

        let score = predictor.predict(&sample_features(&schema));

        let rows = seen.lock().unwrap();
        assert_eq!(rows[0], vec![0.4, 0.0, 0.5]);
        assert!((score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_missing_model_predicts_zero() {
        let schema = FeatureSchema::default_au();
        let mut predictor = ScorePredictor::new(None, schema.clone());
        assert!(!predictor.is_loaded());
        assert_eq!(predictor.predict(&sample_features(&schema)), 0.0);
    }

    #[test]
    fn test_inference_error_predicts_zero() {
        let schema = FeatureSchema::default_au();
        let mut predictor = ScorePredictor::new(Some(Box::new(FailingRegressor)), schema.clone());
        assert!(predictor.is_loaded());
        assert_eq!(predictor.predict(&sample_features(&schema)), 0.0);
    }

    #[test]
    fn test_load_missing_model_file() {
        let err = OnnxRegressor::load("/nonexistent/expression_similarity.onnx", 12)
            .err()
            .unwrap();
        assert!(matches!(err, PredictorError::ModelNotFound(_)));
    }
}
