use smilefit_core::encoder::EncoderError;
use smilefit_core::estimator::EstimatorError;
use smilefit_core::{
    AuExtractor, Embedding, ExpressionEncoder, FaceMeshEstimator, FeatureVector, LandmarkEstimator,
    ScorePredictor,
};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("estimator error: {0}")]
    Estimator(#[from] EstimatorError),
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("image decode error: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("analysis timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of analysing one captured image.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// False when the estimator found no face; `features` is then all zero.
    pub face_detected: bool,
    pub features: FeatureVector,
    /// Regressor score, 0.0 when the model is unavailable.
    pub score: f64,
    pub embedding: Option<Embedding>,
    /// Number of landmarks the estimator returned.
    pub landmark_count: usize,
}

/// Models and extractor owned by the engine thread.
pub struct EngineParts {
    pub estimator: Box<dyn LandmarkEstimator + Send>,
    pub extractor: AuExtractor,
    pub predictor: ScorePredictor,
    pub encoder: Option<ExpressionEncoder>,
}

impl EngineParts {
    /// Load every model named by the paths. The landmark model and the
    /// extractor are required; a missing encoder is tolerated.
    pub fn load(
        landmark_path: &str,
        extractor: AuExtractor,
        predictor: ScorePredictor,
        encoder_path: &str,
    ) -> Result<Self, EngineError> {
        let estimator = FaceMeshEstimator::load(landmark_path)?;
        tracing::info!(path = landmark_path, "face-mesh estimator loaded");

        let encoder = match ExpressionEncoder::load(encoder_path) {
            Ok(e) => Some(e),
            Err(EncoderError::ModelNotFound(path)) => {
                tracing::info!(path = %path, "no expression encoder; similarity uses feature rows");
                None
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            estimator: Box::new(estimator),
            extractor,
            predictor,
            encoder,
        })
    }
}

/// Which models the engine runs with.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct EngineInfo {
    pub score_model_loaded: bool,
    pub encoder_loaded: bool,
    pub feature_columns: usize,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Analyze {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Analysis, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
    info: EngineInfo,
}

impl EngineHandle {
    pub fn info(&self) -> EngineInfo {
        self.info
    }

    /// Decode an image, estimate landmarks, extract features and score them.
    ///
    /// The timeout covers queueing behind a busy engine as well as the
    /// analysis itself. The engine keeps working on a request that timed
    /// out; its reply is dropped.
    pub async fn analyze(&self, image: Vec<u8>) -> Result<Analysis, EngineError> {
        let request = async {
            let (reply_tx, reply_rx) = oneshot::channel();
            self.tx
                .send(EngineRequest::Analyze {
                    image,
                    reply: reply_tx,
                })
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
        };

        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(self.timeout)),
        }
    }
}

/// Requests that may wait for the engine thread.
const QUEUE_DEPTH: usize = 4;

/// Spawn the engine on a dedicated OS thread. The estimator and models are
/// not thread-safe, so every analysis runs there in arrival order.
pub fn spawn_engine(mut parts: EngineParts, timeout: Duration) -> Result<EngineHandle, EngineError> {
    let info = EngineInfo {
        score_model_loaded: parts.predictor.is_loaded(),
        encoder_loaded: parts.encoder.is_some(),
        feature_columns: parts.extractor.schema().len(),
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(QUEUE_DEPTH);

    std::thread::Builder::new()
        .name("smilefit-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Analyze { image, reply } => {
                        let result = run_analyze(&mut parts, &image);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, timeout, info })
}

fn run_analyze(parts: &mut EngineParts, bytes: &[u8]) -> Result<Analysis, EngineError> {
    let image = image::load_from_memory(bytes)?.to_rgb8();
    let landmarks = parts.estimator.estimate(&image)?;
    let landmark_count = landmarks.as_ref().map_or(0, |l| l.len());

    let (features, report) = parts.extractor.extract_with_report(landmarks.as_ref());
    let face_detected = !report.no_face;
    let score = parts.predictor.predict(&features);

    let embedding = match parts.encoder.as_mut() {
        Some(encoder) if face_detected => {
            let row = features.row(parts.extractor.schema());
            match encoder.encode(&row) {
                Ok(e) => Some(e),
                Err(err) => {
                    tracing::warn!(error = %err, "encoding failed; falling back to feature rows");
                    None
                }
            }
        }
        _ => None,
    };

    tracing::debug!(
        width = image.width(),
        height = image.height(),
        face_detected,
        landmarks = landmark_count,
        score,
        "analysis complete"
    );

    Ok(Analysis {
        face_detected,
        features,
        score,
        embedding,
        landmark_count,
    })
}
