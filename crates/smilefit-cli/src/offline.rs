//! Commands that run the core pipeline in-process, without the daemon.

use anyhow::{bail, Context, Result};
use image::RgbImage;
use smilefit_core::encoder::EncoderError;
use smilefit_core::predictor::PredictorError;
use smilefit_core::rehab::{self, Exercise, Muscle};
use smilefit_core::{
    AuExtractor, Embedding, ExpressionEncoder, ExtractionReport, FaceMeshEstimator, FeatureSchema,
    FeatureVector, LandmarkEstimator, LandmarkSet, OnnxRegressor, Regressor, ScorePredictor,
};
use smilefit_store::{TeacherDataset, TeacherReference};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const LANDMARK_MODEL: &str = "face_landmark.onnx";
const SCORE_MODEL: &str = "score_regressor.onnx";
const ENCODER_MODEL: &str = "expression_encoder.onnx";
const SCHEMA_FILE: &str = "feature_cols.json";

/// One image run through the pipeline.
pub struct ImageFeatures {
    pub features: FeatureVector,
    pub report: ExtractionReport,
    pub score: f64,
    pub embedding: Option<Embedding>,
}

/// Estimator and models loaded from a model directory.
pub struct Pipeline {
    estimator: FaceMeshEstimator,
    extractor: AuExtractor,
    predictor: ScorePredictor,
    encoder: Option<ExpressionEncoder>,
}

impl Pipeline {
    /// The landmark model is required. Without a schema file the default AU
    /// columns are used; the regressor and encoder are optional.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let path = |file: &str| model_dir.join(file).to_string_lossy().into_owned();

        let schema_path = model_dir.join(SCHEMA_FILE);
        let schema = if schema_path.exists() {
            FeatureSchema::load(&schema_path)?
        } else {
            tracing::warn!(path = %schema_path.display(), "no schema file, using default AU columns");
            FeatureSchema::default_au()
        };

        let estimator = FaceMeshEstimator::load(&path(LANDMARK_MODEL)).context("loading landmark model")?;

        let regressor: Option<Box<dyn Regressor + Send>> = match OnnxRegressor::load(&path(SCORE_MODEL), schema.len()) {
            Ok(r) => Some(Box::new(r)),
            Err(PredictorError::ModelNotFound(p)) => {
                tracing::warn!(path = %p, "no score regressor; scores will be 0.0");
                None
            }
            Err(e) => return Err(e).context("loading score regressor"),
        };

        let encoder = match ExpressionEncoder::load(&path(ENCODER_MODEL)) {
            Ok(e) => Some(e),
            Err(EncoderError::ModelNotFound(_)) => None,
            Err(e) => return Err(e).context("loading expression encoder"),
        };

        Ok(Self {
            estimator,
            extractor: AuExtractor::with_schema(schema.clone()),
            predictor: ScorePredictor::new(regressor, schema),
            encoder,
        })
    }

    pub fn landmarks(&mut self, image: &RgbImage) -> Result<Option<LandmarkSet>> {
        Ok(self.estimator.estimate(image)?)
    }

    pub fn analyze(&mut self, path: &Path) -> Result<ImageFeatures> {
        let image = load_rgb(path)?;
        let landmarks = self.landmarks(&image)?;
        let (features, report) = self.extractor.extract_with_report(landmarks.as_ref());
        let score = self.predictor.predict(&features);
        let embedding = match self.encoder.as_mut() {
            Some(encoder) if !report.no_face => Some(encoder.encode(&features.row(self.extractor.schema()))?),
            _ => None,
        };
        Ok(ImageFeatures {
            features,
            report,
            score,
            embedding,
        })
    }
}

pub fn load_rgb(path: &Path) -> Result<RgbImage> {
    Ok(image::open(path)
        .with_context(|| format!("reading image {}", path.display()))?
        .to_rgb8())
}

/// `<dir>/<teacher>/<teacher><round>.png`
pub fn teacher_image_path(dir: &Path, teacher: &str, round: u32) -> PathBuf {
    dir.join(teacher).join(format!("{teacher}{round}.png"))
}

/// Build references for rounds `1..=rounds` of every teacher. Rounds whose
/// image is missing or shows no face are skipped.
pub fn build_teachers(
    pipeline: &mut Pipeline,
    images: &Path,
    teachers: &[String],
    rounds: u32,
) -> Result<TeacherDataset> {
    let mut dataset = TeacherDataset::new();
    for teacher in teachers {
        for round in 1..=rounds {
            let path = teacher_image_path(images, teacher, round);
            if !path.exists() {
                tracing::warn!(path = %path.display(), "teacher image missing, skipping");
                continue;
            }
            let analysis = pipeline.analyze(&path)?;
            if analysis.report.no_face {
                tracing::warn!(path = %path.display(), "no face in teacher image, skipping");
                continue;
            }
            tracing::info!(teacher = %teacher, round, score = analysis.score, "teacher reference built");
            dataset.insert(TeacherReference {
                teacher_id: teacher.clone(),
                round,
                score: smilefit_core::au::round_output(analysis.score),
                features: analysis.features,
                embedding: analysis.embedding,
                image: Some(path.to_string_lossy().into_owned()),
            });
        }
    }
    Ok(dataset)
}

/// Rehabilitation metrics over normalized landmarks. `captures` keeps the
/// caller's numbering so the best capture index refers to the input list.
pub fn rehab_summary(
    neutral: &LandmarkSet,
    captures: &[(usize, LandmarkSet)],
    exercise: Exercise,
) -> Result<serde_json::Value> {
    if captures.is_empty() {
        bail!("no capture with a detected face");
    }
    let sets: Vec<LandmarkSet> = captures.iter().map(|(_, s)| s.clone()).collect();

    let usage = rehab::muscle_usage(neutral, &sets);
    let symmetry = rehab::symmetry(&usage, exercise);
    let activation = rehab::activation_rate(neutral, &sets, exercise);
    let best = rehab::best_capture(neutral, &sets, exercise).map(|i| captures[i].0);

    Ok(serde_json::json!({
        "exercise": exercise,
        "muscle_usage": usage.iter().copied().collect::<BTreeMap<Muscle, u8>>(),
        "top_muscles": rehab::top_muscles(&usage, 3),
        "symmetry": symmetry,
        "consistency": rehab::consistency(neutral, &sets, exercise),
        "activation_rate": activation,
        "best_capture": best,
        "feedback": rehab::rehab_feedback(symmetry.diff, activation),
    }))
}
