//! Action-unit feature extraction.
//!
//! Each tracked unit is the distance between two face-mesh landmarks,
//! normalized by the inner eye-corner distance so the features do not change
//! with the face's distance from the camera. Every unit also gets a weighted
//! twin (`<key>_w`) because the score model was trained on both columns.

use crate::schema::{base_key, FeatureSchema};
use crate::types::{FeatureVector, LandmarkSet};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Suffix marking a weighted feature key.
pub const WEIGHTED_SUFFIX: &str = "_w";

/// Inner eye corners (left 133, right 362). Their distance is the scale
/// reference for every unit.
pub const SCALE_ANCHORS: (usize, usize) = (133, 362);

/// Scale distances below this are treated as degenerate.
pub const SCALE_EPSILON: f64 = 1e-6;

/// Emphasis applied to the weighted twin of each unit. Hand-tuned, not learned.
pub const DEFAULT_AU_WEIGHT: f64 = 0.8;

/// Output precision (decimal places).
const OUTPUT_DECIMALS: i32 = 4;

/// One tracked unit: a named landmark pair.
#[derive(Debug, Clone, Copy)]
pub struct AuDefinition {
    pub key: &'static str,
    pub landmarks: (usize, usize),
    pub description: &'static str,
}

/// Tracked units and the landmark pairs that define them.
pub static AU_DEFINITIONS: [AuDefinition; 6] = [
    AuDefinition { key: "AU01", landmarks: (336, 296), description: "inner brow raiser" },
    AuDefinition { key: "AU02", landmarks: (334, 298), description: "outer brow raiser" },
    AuDefinition { key: "AU04", landmarks: (9, 8), description: "brow lowerer" },
    AuDefinition { key: "AU06", landmarks: (205, 206), description: "cheek raiser" },
    AuDefinition { key: "AU12", landmarks: (308, 78), description: "lip corner puller" },
    AuDefinition { key: "AU25", landmarks: (13, 14), description: "lips part" },
];

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("AU weight must be finite and non-negative, got {0}")]
    InvalidWeight(f64),
}

/// Why the scale reference fell back to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleFallback {
    /// An anchor index is outside the landmark set.
    AnchorsOutOfRange,
    /// The anchors coincide (or the distance is NaN).
    Degenerate,
}

/// Fallbacks taken while extracting one vector.
///
/// Non-empty reports usually mean the landmark model and the definition
/// table disagree on the point count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionReport {
    /// No landmarks were supplied.
    pub no_face: bool,
    pub scale_fallback: Option<ScaleFallback>,
    /// Units whose landmark pair was out of range (recorded as 0.0).
    pub missing_units: Vec<&'static str>,
    /// Schema keys with no matching unit (recorded as 0.0).
    pub unknown_keys: Vec<String>,
}

impl ExtractionReport {
    pub fn has_drift(&self) -> bool {
        self.scale_fallback.is_some() || !self.missing_units.is_empty() || !self.unknown_keys.is_empty()
    }

    fn emit(&self, landmark_count: usize) {
        if !self.has_drift() {
            return;
        }
        tracing::warn!(
            target: "smilefit::drift",
            landmarks = landmark_count,
            scale_fallback = ?self.scale_fallback,
            missing_units = ?self.missing_units,
            unknown_keys = ?self.unknown_keys,
            "AU extraction fell back to defaults"
        );
    }
}

/// Round to the fixed output precision.
pub fn round_output(value: f64) -> f64 {
    let factor = 10f64.powi(OUTPUT_DECIMALS);
    (value * factor).round() / factor
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Maps landmark sets to fixed-schema feature vectors.
#[derive(Debug, Clone)]
pub struct AuExtractor {
    schema: FeatureSchema,
    weight: f64,
}

impl AuExtractor {
    pub fn new(schema: FeatureSchema, weight: f64) -> Result<Self, ExtractError> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(ExtractError::InvalidWeight(weight));
        }
        Ok(Self { schema, weight })
    }

    /// Extractor with the default weight.
    pub fn with_schema(schema: FeatureSchema) -> Self {
        Self {
            schema,
            weight: DEFAULT_AU_WEIGHT,
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Extract a feature vector. `None` or an empty set means no face and
    /// yields an all-zero vector with the full schema.
    pub fn extract(&self, landmarks: Option<&LandmarkSet>) -> FeatureVector {
        self.extract_with_report(landmarks).0
    }

    /// Like [`extract`](Self::extract), also returning the fallbacks taken.
    pub fn extract_with_report(
        &self,
        landmarks: Option<&LandmarkSet>,
    ) -> (FeatureVector, ExtractionReport) {
        let mut report = ExtractionReport::default();

        let Some(landmarks) = landmarks.filter(|l| !l.is_empty()) else {
            report.no_face = true;
            return (FeatureVector::zeros(&self.schema), report);
        };

        let scale = match landmarks.distance(SCALE_ANCHORS.0, SCALE_ANCHORS.1) {
            Some(d) if d >= SCALE_EPSILON => d,
            Some(_) => {
                report.scale_fallback = Some(ScaleFallback::Degenerate);
                1.0
            }
            None => {
                report.scale_fallback = Some(ScaleFallback::AnchorsOutOfRange);
                1.0
            }
        };

        let mut units: HashMap<&'static str, f64> = HashMap::with_capacity(AU_DEFINITIONS.len());
        for def in &AU_DEFINITIONS {
            let (a, b) = def.landmarks;
            let normalized = match landmarks.distance(a, b) {
                Some(d) => d / scale,
                None => {
                    report.missing_units.push(def.key);
                    0.0
                }
            };
            units.insert(def.key, round_output(finite_or_zero(normalized)));
        }

        let mut values = BTreeMap::new();
        for key in self.schema.keys() {
            let value = match base_key(key) {
                // Weighted twins derive from the rounded base so the stored
                // pair always satisfies `w == round(base * weight)`.
                Some(base) => units.get(base).map(|v| round_output(v * self.weight)),
                None => units.get(key.as_str()).copied(),
            };
            let value = value.unwrap_or_else(|| {
                report.unknown_keys.push(key.clone());
                0.0
            });
            values.insert(key.clone(), finite_or_zero(value));
        }

        report.emit(landmarks.len());
        (FeatureVector::from_values(values), report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Landmark;

    const MESH_POINTS: usize = 468;

    /// A flat synthetic mesh: every landmark at a distinct, deterministic spot.
    fn synthetic_mesh() -> LandmarkSet {
        let points = (0..MESH_POINTS)
            .map(|i| {
                let i = i as f32;
                Landmark::new(100.0 + (i * 7.0) % 211.0, 80.0 + (i * 13.0) % 173.0, 0.0)
            })
            .collect();
        LandmarkSet::new(points)
    }

    fn extractor() -> AuExtractor {
        AuExtractor::with_schema(FeatureSchema::default_au())
    }

    #[test]
    fn test_no_face_yields_all_zero_schema() {
        let ex = extractor();
        let (fv, report) = ex.extract_with_report(None);
        assert!(report.no_face);
        assert_eq!(fv.len(), ex.schema().len());
        assert!(fv.is_all_zero());

        let empty = LandmarkSet::default();
        let fv = ex.extract(Some(&empty));
        assert_eq!(fv.len(), ex.schema().len());
        assert!(fv.is_all_zero());
    }

    #[test]
    fn test_normalizes_by_eye_corner_distance() {
        let mut points = vec![Landmark::default(); MESH_POINTS];
        points[133] = Landmark::new(0.0, 0.0, 0.0);
        points[362] = Landmark::new(50.0, 0.0, 0.0);
        // AU25: lips 13/14 are 20px apart → 0.4
        points[13] = Landmark::new(10.0, 10.0, 0.0);
        points[14] = Landmark::new(10.0, 30.0, 0.0);
        let fv = extractor().extract(Some(&LandmarkSet::new(points)));
        assert_eq!(fv.get("AU25"), Some(0.4));
        assert_eq!(fv.get("AU25_w"), Some(0.32));
    }

    #[test]
    fn test_short_landmark_set_records_zero_per_unit() {
        // 300 points: AU01/AU02/AU12 reference indices above 300, the scale
        // anchor 362 is also missing.
        let points: Vec<Landmark> = (0..300).map(|i| Landmark::new(i as f32, 0.0, 0.0)).collect();
        let (fv, report) = extractor().extract_with_report(Some(&LandmarkSet::new(points)));

        assert_eq!(report.scale_fallback, Some(ScaleFallback::AnchorsOutOfRange));
        assert_eq!(report.missing_units, vec!["AU01", "AU02", "AU12"]);
        assert_eq!(fv.get("AU01"), Some(0.0));
        assert_eq!(fv.get("AU12_w"), Some(0.0));
        // AU04 (9, 8): 1px apart with scale 1.0
        assert_eq!(fv.get("AU04"), Some(1.0));
        assert_eq!(fv.len(), FeatureSchema::default_au().len());
    }

    #[test]
    fn test_degenerate_scale_falls_back_to_one() {
        let mut points = vec![Landmark::new(5.0, 5.0, 0.0); MESH_POINTS];
        points[13] = Landmark::new(0.0, 0.0, 0.0);
        points[14] = Landmark::new(0.0, 2.5, 0.0);
        let (fv, report) = extractor().extract_with_report(Some(&LandmarkSet::new(points)));
        assert_eq!(report.scale_fallback, Some(ScaleFallback::Degenerate));
        assert_eq!(fv.get("AU25"), Some(2.5));
    }

    #[test]
    fn test_nan_coordinates_become_zero() {
        let mut points = synthetic_mesh().points().to_vec();
        points[13] = Landmark::new(f32::NAN, 0.0, 0.0);
        let fv = extractor().extract(Some(&LandmarkSet::new(points)));
        assert_eq!(fv.get("AU25"), Some(0.0));
        assert_eq!(fv.get("AU25_w"), Some(0.0));
    }

    #[test]
    fn test_infinite_coordinates_become_zero() {
        let mut points = synthetic_mesh().points().to_vec();
        points[13] = Landmark::new(f32::INFINITY, 0.0, 0.0);
        let fv = extractor().extract(Some(&LandmarkSet::new(points)));
        assert_eq!(fv.get("AU25"), Some(0.0));
        assert_eq!(fv.get("AU25_w"), Some(0.0));
        assert!(fv.iter().all(|(_, v)| v.is_finite()));
        // Non-finite values would serialize as null and fail to decode.
        let json = serde_json::to_string(&fv).unwrap();
        assert!(!json.contains("null"), "{json}");
    }

    #[test]
    fn test_unknown_schema_keys_default_to_zero() {
        let schema =
            FeatureSchema::from_keys(vec!["AU12".into(), "AU43".into(), "AU43_w".into()]).unwrap();
        let (fv, report) = AuExtractor::with_schema(schema).extract_with_report(Some(&synthetic_mesh()));
        assert_eq!(fv.len(), 3);
        assert_eq!(fv.get("AU43"), Some(0.0));
        assert_eq!(report.unknown_keys, vec!["AU43".to_string(), "AU43_w".to_string()]);
        assert!(fv.get("AU12").unwrap() > 0.0);
    }

    #[test]
    fn test_only_schema_keys_are_emitted() {
        let schema = FeatureSchema::from_keys(vec!["AU12_w".into()]).unwrap();
        let fv = AuExtractor::with_schema(schema).extract(Some(&synthetic_mesh()));
        assert_eq!(fv.keys().collect::<Vec<_>>(), vec!["AU12_w"]);
    }

    #[test]
    fn test_weighted_law_on_synthetic_mesh() {
        let ex = extractor();
        let fv = ex.extract(Some(&synthetic_mesh()));
        for def in &AU_DEFINITIONS {
            let base = fv.get(def.key).unwrap();
            let weighted = fv.get(&format!("{}_w", def.key)).unwrap();
            assert_eq!(weighted, round_output(base * ex.weight()), "unit {}", def.key);
        }
    }

    #[test]
    fn test_custom_weight() {
        let ex = AuExtractor::new(FeatureSchema::default_au(), 0.5).unwrap();
        let fv = ex.extract(Some(&synthetic_mesh()));
        assert_eq!(fv.value("AU06_w"), round_output(fv.value("AU06") * 0.5));
    }

    #[test]
    fn test_invalid_weight_rejected() {
        assert!(AuExtractor::new(FeatureSchema::default_au(), -1.0).is_err());
        assert!(AuExtractor::new(FeatureSchema::default_au(), f64::NAN).is_err());
    }

    #[test]
    fn test_values_are_rounded_to_four_places() {
        let fv = extractor().extract(Some(&synthetic_mesh()));
        for (key, v) in fv.iter() {
            assert_eq!(v, round_output(v), "{key} = {v} not rounded");
        }
    }

    #[test]
    fn test_round_output() {
        assert_eq!(round_output(0.123_456), 0.1235);
        assert_eq!(round_output(2.0), 2.0);
    }
}
