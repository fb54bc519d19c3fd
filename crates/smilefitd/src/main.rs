use anyhow::{Context, Result};
use smilefit_core::predictor::PredictorError;
use smilefit_core::{AuExtractor, FeatureSchema, OnnxRegressor, Regressor, ScorePredictor, SimilarityScorer};
use smilefit_store::{ImageStore, MemoryStore, ResultStore, SqliteStore, TeacherDataset};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod feedback;
mod mailer;

use config::{Config, StoreBackend};
use dbus_interface::SmileFitService;

const BUS_NAME: &str = "org.smilefit.SmileFit1";
const OBJECT_PATH: &str = "/org/smilefit/SmileFit1";

/// Load the score regressor. Without it every round scores 0.0, unless the
/// configuration requires the model.
fn load_regressor(config: &Config, columns: usize) -> Result<Option<Box<dyn Regressor + Send>>> {
    let path = config.score_model_path();
    match OnnxRegressor::load(&path, columns) {
        Ok(r) => {
            tracing::info!(path = %path, columns, "score regressor loaded");
            Ok(Some(Box::new(r)))
        }
        Err(e @ PredictorError::ModelNotFound(_)) if !config.require_score_model => {
            tracing::warn!(error = %e, "score regressor unavailable; rounds will score 0.0");
            Ok(None)
        }
        Err(e) => Err(e).context("loading score regressor"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("smilefitd starting");
    let config = Config::from_env();

    let schema = FeatureSchema::load(&config.schema_path).context("loading feature schema")?;
    let extractor = AuExtractor::new(schema.clone(), config.au_weight)?;
    let scorer = SimilarityScorer::new(config.similarity_decay)?;
    let predictor = ScorePredictor::new(load_regressor(&config, schema.len())?, schema.clone());

    let parts = engine::EngineParts::load(
        &config.landmark_model_path(),
        extractor,
        predictor,
        &config.encoder_model_path(),
    )?;
    let engine = engine::spawn_engine(parts, Duration::from_secs(config.inference_timeout_secs))?;

    let store: Arc<dyn ResultStore> = match config.store_backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(&config.db_path)?),
    };
    let images = ImageStore::new(config.image_dir());
    let teachers = TeacherDataset::load(&config.teacher_dataset_path)?;

    let feedback = feedback::FeedbackClient::new(
        &config.llm_endpoint,
        &config.llm_model,
        config.llm_api_key.clone(),
        &config.feedback_language,
    );
    let mailer = match mailer::Mailer::new(&config.smtp) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = %e, "email disabled");
            None
        }
    };

    let service = SmileFitService {
        engine,
        store: Arc::clone(&store),
        store_backend: config.store_backend,
        images: images.clone(),
        teachers,
        schema,
        scorer,
        feedback,
        mailer,
    };

    let _connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("registering D-Bus service")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "smilefitd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("smilefitd shutting down");

    if config.keep_results {
        tracing::info!("keeping results (SMILEFIT_KEEP_RESULTS)");
    } else {
        dbus_interface::teardown(store.as_ref(), &images);
    }

    Ok(())
}
