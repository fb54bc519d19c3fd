use crate::schema::FeatureSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single face-mesh landmark in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Ordered landmarks for one detected face, indexed by the face-mesh scheme
/// (468 points, 478 with iris refinement).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LandmarkSet {
    points: Vec<Landmark>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    /// Convert estimator output in normalized `[0, 1]` image coordinates to
    /// pixel coordinates. Depth is scaled by the image width, like the x axis.
    pub fn from_normalized(points: &[Landmark], width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self {
            points: points
                .iter()
                .map(|p| Landmark::new(p.x * w, p.y * h, p.z * w))
                .collect(),
        }
    }

    /// Inverse of [`from_normalized`](Self::from_normalized).
    pub fn to_normalized(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width.max(1) as f32, height.max(1) as f32);
        Self {
            points: self
                .points
                .iter()
                .map(|p| Landmark::new(p.x / w, p.y / h, p.z / w))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Landmark> {
        self.points.get(index)
    }

    pub fn points(&self) -> &[Landmark] {
        &self.points
    }

    /// Planar Euclidean distance between two landmarks.
    ///
    /// Returns `None` if either index is outside this set, which happens when
    /// a landmark model with a different point count produced the input.
    pub fn distance(&self, a: usize, b: usize) -> Option<f64> {
        let p = self.points.get(a)?;
        let q = self.points.get(b)?;
        let dx = p.x as f64 - q.x as f64;
        let dy = p.y as f64 - q.y as f64;
        Some((dx * dx + dy * dy).sqrt())
    }

    /// A copy with every coordinate multiplied by `factor`.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            points: self
                .points
                .iter()
                .map(|p| Landmark::new(p.x * factor, p.y * factor, p.z * factor))
                .collect(),
        }
    }
}

/// Named, normalized action-unit features for one detection event.
///
/// Only the extractor builds these from landmarks; stored vectors can be read
/// back through serde. There is no way to mutate a vector after construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector {
    values: BTreeMap<String, f64>,
}

impl FeatureVector {
    pub(crate) fn from_values(values: BTreeMap<String, f64>) -> Self {
        Self { values }
    }

    /// A vector with every schema key set to 0.0 ("no face").
    pub fn zeros(schema: &FeatureSchema) -> Self {
        Self {
            values: schema.keys().iter().map(|k| (k.clone(), 0.0)).collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Value for `key`, 0.0 when absent.
    pub fn value(&self, key: &str) -> f64 {
        self.get(key).unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_all_zero(&self) -> bool {
        self.values.values().all(|v| *v == 0.0)
    }

    /// Model input row in schema column order. Keys missing from this vector
    /// read as 0.0.
    pub fn row(&self, schema: &FeatureSchema) -> Vec<f32> {
        schema
            .keys()
            .iter()
            .map(|k| self.value(k) as f32)
            .collect()
    }
}

/// Expression embedding produced by the encoder model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "ae-v2").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Compute Euclidean distance between two embeddings.
    ///
    /// Only the common prefix is compared; use the similarity scorer when a
    /// length mismatch must be reported.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}
