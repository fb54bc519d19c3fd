//! Expression encoder: the bottleneck half of an autoencoder trained on AU
//! feature rows, run via ONNX Runtime.

use crate::types::Embedding;
use ndarray::Array2;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct ExpressionEncoder {
    session: Session,
    model_version: String,
}

impl ExpressionEncoder {
    /// Load the encoder. The file stem doubles as the embedding's model version.
    pub fn load(model_path: &str) -> Result<Self, EncoderError> {
        let path = Path::new(model_path);
        if !path.exists() {
            return Err(EncoderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        let model_version = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());

        tracing::info!(path = model_path, version = %model_version, "loaded expression encoder");

        Ok(Self {
            session,
            model_version,
        })
    }

    /// Encode one feature row (schema column order) into a latent embedding.
    pub fn encode(&mut self, row: &[f32]) -> Result<Embedding, EncoderError> {
        let input = Array2::from_shape_vec((1, row.len()), row.to_vec())
            .map_err(|e| EncoderError::InferenceFailed(format!("input shape: {e}")))?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, latent) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncoderError::InferenceFailed(format!("latent extraction: {e}")))?;

        if latent.is_empty() {
            return Err(EncoderError::InferenceFailed("empty latent tensor".into()));
        }

        Ok(Embedding {
            values: latent.to_vec(),
            model_version: Some(self.model_version.clone()),
        })
    }
}
