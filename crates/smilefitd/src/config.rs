use std::path::PathBuf;

/// Where round results are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Lost when the daemon exits.
    Memory,
    Sqlite,
}

impl StoreBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

/// Outgoing mail settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// From address; falls back to the username.
    pub sender: Option<String>,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Face-mesh landmark model file name (inside `model_dir`).
    pub landmark_model: String,
    /// Score regressor file name.
    pub score_model: String,
    /// Expression encoder file name.
    pub encoder_model: String,
    /// Feature column list the score model was trained on.
    pub schema_path: PathBuf,
    /// Precomputed teacher references.
    pub teacher_dataset_path: PathBuf,
    /// Root for captured images and the result database.
    pub data_dir: PathBuf,
    pub store_backend: StoreBackend,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Skip deleting sessions and images at shutdown.
    pub keep_results: bool,
    /// Weight for the `_w` feature twins.
    pub au_weight: f64,
    /// Decay constant of the similarity score.
    pub similarity_decay: f64,
    /// Refuse to start without the score model instead of scoring 0.0.
    pub require_score_model: bool,
    /// Timeout in seconds for one analysis on the engine thread.
    pub inference_timeout_secs: u64,
    /// Base URL of the generative language API.
    pub llm_endpoint: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    /// Language the feedback text is written in.
    pub feedback_language: String,
    pub smtp: SmtpConfig,
}

impl Config {
    /// Load configuration from `SMILEFIT_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("SMILEFIT_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| smilefit_core::default_model_dir());

        let data_dir = std::env::var("SMILEFIT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("smilefit")
            });

        let store_backend = match std::env::var("SMILEFIT_STORE") {
            Ok(v) => StoreBackend::parse(&v).unwrap_or_else(|| {
                tracing::warn!(value = %v, "unknown SMILEFIT_STORE, using memory");
                StoreBackend::Memory
            }),
            Err(_) => StoreBackend::Memory,
        };

        Self {
            schema_path: env_path("SMILEFIT_SCHEMA_PATH").unwrap_or_else(|| model_dir.join("feature_cols.json")),
            teacher_dataset_path: env_path("SMILEFIT_TEACHER_DATASET")
                .unwrap_or_else(|| data_dir.join("teachers.json")),
            db_path: env_path("SMILEFIT_DB_PATH").unwrap_or_else(|| data_dir.join("results.db")),
            landmark_model: env_string("SMILEFIT_LANDMARK_MODEL", "face_landmark.onnx"),
            score_model: env_string("SMILEFIT_SCORE_MODEL", "score_regressor.onnx"),
            encoder_model: env_string("SMILEFIT_ENCODER_MODEL", "expression_encoder.onnx"),
            model_dir,
            data_dir,
            store_backend,
            keep_results: env_flag("SMILEFIT_KEEP_RESULTS", false),
            au_weight: env_f64("SMILEFIT_AU_WEIGHT", smilefit_core::au::DEFAULT_AU_WEIGHT),
            similarity_decay: env_f64(
                "SMILEFIT_SIMILARITY_DECAY",
                smilefit_core::similarity::DEFAULT_SIMILARITY_DECAY,
            ),
            require_score_model: env_flag("SMILEFIT_REQUIRE_SCORE_MODEL", false),
            inference_timeout_secs: env_u64("SMILEFIT_INFERENCE_TIMEOUT_SECS", 10),
            llm_endpoint: env_string(
                "SMILEFIT_LLM_ENDPOINT",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            llm_model: env_string("SMILEFIT_LLM_MODEL", "gemini-1.5-pro-latest"),
            llm_api_key: std::env::var("SMILEFIT_LLM_API_KEY")
                .or_else(|_| std::env::var("GOOGLE_API_KEY"))
                .ok()
                .filter(|k| !k.is_empty()),
            feedback_language: env_string("SMILEFIT_FEEDBACK_LANGUAGE", "Korean"),
            smtp: SmtpConfig {
                host: env_string("SMILEFIT_SMTP_HOST", "smtp.gmail.com"),
                port: env_u16("SMILEFIT_SMTP_PORT", 587),
                username: std::env::var("SMILEFIT_SMTP_USER").ok(),
                password: std::env::var("SMILEFIT_SMTP_PASSWORD").ok(),
                sender: std::env::var("SMILEFIT_SMTP_SENDER").ok(),
            },
        }
    }

    /// Path to the face-mesh landmark model.
    pub fn landmark_model_path(&self) -> String {
        self.model_path(&self.landmark_model)
    }

    /// Path to the score regressor.
    pub fn score_model_path(&self) -> String {
        self.model_path(&self.score_model)
    }

    /// Path to the expression encoder.
    pub fn encoder_model_path(&self) -> String {
        self.model_path(&self.encoder_model)
    }

    /// Directory for captured round images.
    pub fn image_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }

    fn model_path(&self, file: &str) -> String {
        self.model_dir.join(file).to_string_lossy().into_owned()
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v != "0").unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
