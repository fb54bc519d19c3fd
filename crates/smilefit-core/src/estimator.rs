//! Face-mesh landmark estimator via ONNX Runtime.
//!
//! Runs a 468-point face-mesh model on a whole RGB image (the capture is
//! expected to be framed on a single face) and returns pixel-space landmarks.

use crate::types::{Landmark, LandmarkSet};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const MESH_INPUT_SIZE: u32 = 192;
const MESH_POINTS: usize = 468;
const MESH_COORDS: usize = 3;
/// Presence logit threshold (sigmoid 0.5).
const MESH_PRESENCE_LOGIT: f32 = 0.0;

#[derive(Error, Debug)]
pub enum EstimatorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("image has zero size")]
    EmptyImage,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Source of face landmarks for an image.
pub trait LandmarkEstimator {
    /// Landmarks for the most prominent face, or `None` when no face is found.
    fn estimate(&mut self, image: &RgbImage) -> Result<Option<LandmarkSet>, EstimatorError>;
}

/// Positions of the landmark and presence tensors among the model outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MeshOutputs {
    landmarks: usize,
    presence: Option<usize>,
}

/// Face-mesh estimator backed by an ONNX session.
pub struct FaceMeshEstimator {
    session: Session,
}

impl FaceMeshEstimator {
    pub fn load(model_path: &str) -> Result<Self, EstimatorError> {
        if !Path::new(model_path).exists() {
            return Err(EstimatorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face-mesh model"
        );

        Ok(Self { session })
    }

    /// Resize to the model input and lay out as NHWC floats in `[0, 1]`.
    fn preprocess(image: &RgbImage) -> Array4<f32> {
        let size = MESH_INPUT_SIZE as usize;
        let resized = image::imageops::resize(image, MESH_INPUT_SIZE, MESH_INPUT_SIZE, FilterType::Triangle);
        let mut tensor = Array4::<f32>::zeros((1, size, size, 3));

        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, y as usize, x as usize, c]] = pixel[c] as f32 / 255.0;
            }
        }

        tensor
    }
}

impl LandmarkEstimator for FaceMeshEstimator {
    fn estimate(&mut self, image: &RgbImage) -> Result<Option<LandmarkSet>, EstimatorError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(EstimatorError::EmptyImage);
        }

        let input = Self::preprocess(image);
        let output_count = self.session.outputs().len();
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut lengths = Vec::with_capacity(output_count);
        for i in 0..output_count {
            let (_, data) = outputs[i]
                .try_extract_tensor::<f32>()
                .map_err(|e| EstimatorError::InferenceFailed(format!("output {i}: {e}")))?;
            lengths.push(data.len());
        }

        let layout = discover_outputs(&lengths).ok_or_else(|| {
            EstimatorError::InferenceFailed(format!(
                "no output with {} landmark values (got lengths {lengths:?})",
                MESH_POINTS * MESH_COORDS
            ))
        })?;

        if let Some(idx) = layout.presence {
            let (_, presence) = outputs[idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| EstimatorError::InferenceFailed(format!("presence: {e}")))?;
            let logit = presence.first().copied().unwrap_or(f32::NEG_INFINITY);
            if logit < MESH_PRESENCE_LOGIT {
                tracing::debug!(logit, "face-mesh: no face present");
                return Ok(None);
            }
        }

        let (_, raw) = outputs[layout.landmarks]
            .try_extract_tensor::<f32>()
            .map_err(|e| EstimatorError::InferenceFailed(format!("landmarks: {e}")))?;

        Ok(Some(decode_landmarks(raw, image.width(), image.height())))
    }
}

/// Identify the landmark tensor (468×3 values) and the single-value presence
/// tensor by element count; output names differ between exports.
fn discover_outputs(lengths: &[usize]) -> Option<MeshOutputs> {
    let landmarks = lengths
        .iter()
        .position(|&n| n == MESH_POINTS * MESH_COORDS)?;
    let presence = lengths.iter().position(|&n| n == 1);
    Some(MeshOutputs {
        landmarks,
        presence,
    })
}

/// Convert raw model coordinates (input-pixel units) to image pixels.
fn decode_landmarks(raw: &[f32], width: u32, height: u32) -> LandmarkSet {
    let input = MESH_INPUT_SIZE as f32;
    let normalized: Vec<Landmark> = raw
        .chunks_exact(MESH_COORDS)
        .take(MESH_POINTS)
        .map(|c| Landmark::new(c[0] / input, c[1] / input, c[2] / input))
        .collect();
    LandmarkSet::from_normalized(&normalized, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_shape_and_range() {
        let image = RgbImage::from_pixel(640, 480, image::Rgb([255, 0, 128]));
        let tensor = FaceMeshEstimator::preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 192, 192, 3]);
        assert!((tensor[[0, 10, 10, 0]] - 1.0).abs() < 1e-6);
        assert_eq!(tensor[[0, 10, 10, 1]], 0.0);
        assert!((tensor[[0, 10, 10, 2]] - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_discover_outputs_by_length() {
        assert_eq!(
            discover_outputs(&[1, 1404]),
            Some(MeshOutputs { landmarks: 1, presence: Some(0) })
        );
        assert_eq!(
            discover_outputs(&[1404]),
            Some(MeshOutputs { landmarks: 0, presence: None })
        );
        assert_eq!(discover_outputs(&[10, 1]), None);
    }

    #[test]
    fn test_decode_landmarks_maps_to_image_pixels() {
        let mut raw = vec![0.0f32; MESH_POINTS * MESH_COORDS];
        raw[0] = 96.0; // x of point 0: center of the 192 input
        raw[1] = 48.0; // y: quarter height
        let set = decode_landmarks(&raw, 640, 480);
        assert_eq!(set.len(), MESH_POINTS);
        let p = set.get(0).unwrap();
        assert!((p.x - 320.0).abs() < 1e-3);
        assert!((p.y - 120.0).abs() < 1e-3);
    }

    #[test]
    fn test_load_missing_model_file() {
        let err = FaceMeshEstimator::load("/nonexistent/face_landmark.onnx").err().unwrap();
        assert!(matches!(err, EstimatorError::ModelNotFound(_)));
    }
}
