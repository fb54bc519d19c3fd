use crate::config::StoreBackend;
use crate::engine::{Analysis, EngineHandle};
use crate::feedback::{failure_message, FeedbackClient};
use crate::mailer::Mailer;
use serde::Serialize;
use smilefit_core::au::round_output;
use smilefit_core::penalty::penalty_score;
use smilefit_core::{FeatureSchema, FeatureVector, SimilarityScorer};
use smilefit_store::{
    validate_session_id, ImageStore, ResultStore, RoundRecord, TeacherDataset, TeacherReference,
};
use std::sync::Arc;
use zbus::interface;

/// Reply to a round submission.
#[derive(Debug, Serialize)]
pub struct SubmitReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub au_values: Option<FeatureVector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_detected: Option<bool>,
    /// Present when a teacher reference exists for the round.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub penalty_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SubmitReply {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            score: None,
            au_values: None,
            image: None,
            face_detected: None,
            similarity: None,
            penalty_score: None,
            message: Some(message.into()),
        }
    }
}

/// D-Bus interface for the SmileFit daemon.
///
/// Bus name: org.smilefit.SmileFit1
/// Object path: /org/smilefit/SmileFit1
pub struct SmileFitService {
    pub engine: EngineHandle,
    pub store: Arc<dyn ResultStore>,
    pub store_backend: StoreBackend,
    pub images: ImageStore,
    pub teachers: TeacherDataset,
    pub schema: FeatureSchema,
    pub scorer: SimilarityScorer,
    pub feedback: FeedbackClient,
    pub mailer: Option<Mailer>,
}

impl SmileFitService {
    /// Score one captured image as `round` of `session_id` against `teacher_id`.
    pub async fn submit_round(
        &self,
        session_id: &str,
        teacher_id: &str,
        round: u32,
        image: Vec<u8>,
    ) -> SubmitReply {
        if let Err(e) = validate_session_id(session_id) {
            return SubmitReply::failed(e.to_string());
        }

        let extension = image::guess_format(&image)
            .ok()
            .and_then(|f| f.extensions_str().first().copied())
            .unwrap_or("png");

        let analysis = match self.engine.analyze(image.clone()).await {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(session = session_id, round, error = %e, "analysis failed");
                return SubmitReply::failed(format!("analysis failed: {e}"));
            }
        };

        let image_ref = match self.images.put(session_id, &image, extension) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(session = session_id, round, error = %e, "image store failed");
                return SubmitReply::failed(format!("could not store image: {e}"));
            }
        };

        let reference = self.teachers.get(teacher_id, round);
        if reference.is_none() {
            tracing::debug!(teacher = teacher_id, round, "no teacher reference for round");
        }
        let similarity = reference.map(|r| self.similarity(&analysis, r));
        let penalty = reference.map(|r| penalty_score(&analysis.features, &r.features, &self.schema));

        let score = round_output(analysis.score);
        let record = RoundRecord::new(session_id, teacher_id, round, score, analysis.features.clone())
            .with_embedding(analysis.embedding.clone())
            .with_image(Some(image_ref.clone()));

        if let Err(e) = self.store.append(record) {
            tracing::warn!(session = session_id, round, error = %e, "result store failed");
            // The record is lost; don't leave its image behind.
            if let Err(e) = self.images.delete(&image_ref) {
                tracing::warn!(image = %image_ref, error = %e, "orphaned image not removed");
            }
            return SubmitReply::failed(format!("could not save result: {e}"));
        }

        tracing::info!(
            session = session_id,
            teacher = teacher_id,
            round,
            score,
            face_detected = analysis.face_detected,
            similarity = ?similarity,
            "round submitted"
        );

        SubmitReply {
            ok: true,
            score: Some(score),
            au_values: Some(analysis.features),
            image: Some(image_ref),
            face_detected: Some(analysis.face_detected),
            similarity,
            penalty_score: penalty,
            message: None,
        }
    }

    /// Embeddings when both sides have one, feature rows otherwise.
    fn similarity(&self, analysis: &Analysis, reference: &TeacherReference) -> f64 {
        if let (Some(user), Some(teacher)) = (&analysis.embedding, &reference.embedding) {
            match self.scorer.compare_embeddings(user, teacher) {
                Ok(s) => return round_output(s),
                Err(e) => tracing::warn!(error = %e, "embedding comparison failed; using feature rows"),
            }
        }
        round_output(
            self.scorer
                .compare_features(&analysis.features, &reference.features, &self.schema),
        )
    }

    /// Delete a session's records and their images. Returns the record count.
    pub fn close_session(&self, session_id: &str) -> Result<usize, smilefit_store::StoreError> {
        let removed = self.store.delete_session(session_id)?;
        for image in removed.iter().filter_map(|r| r.image.as_deref()) {
            if let Err(e) = self.images.delete(image) {
                tracing::warn!(image, error = %e, "image delete failed");
            }
        }
        if validate_session_id(session_id).is_ok() {
            self.images.delete_session(session_id)?;
        }
        tracing::info!(session = session_id, records = removed.len(), "session ended");
        Ok(removed.len())
    }

    pub fn status_json(&self) -> serde_json::Value {
        let store = match self.store_backend {
            StoreBackend::Memory => "memory",
            StoreBackend::Sqlite => "sqlite",
        };
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "engine": self.engine.info(),
            "store": store,
            "sessions": self.store.sessions().map(|s| s.len()).unwrap_or(0),
            "teachers": self.teachers.teachers(),
            "teacher_references": self.teachers.len(),
            "feedback_configured": self.feedback.is_configured(),
            "email_configured": self.mailer.is_some(),
        })
    }
}

/// Remove every session and its images. Failures are logged and skipped.
pub fn teardown(store: &dyn ResultStore, images: &ImageStore) {
    let sessions = match store.sessions() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "teardown: listing sessions failed");
            return;
        }
    };
    for session in &sessions {
        match store.delete_session(session) {
            Ok(records) => tracing::debug!(session = %session, records = records.len(), "teardown: session removed"),
            Err(e) => tracing::warn!(session = %session, error = %e, "teardown: session delete failed"),
        }
        if let Err(e) = images.delete_session(session) {
            tracing::warn!(session = %session, error = %e, "teardown: image delete failed");
        }
    }
    tracing::info!(sessions = sessions.len(), "teardown complete");
}

fn parse_vector(name: &str, json: &str) -> zbus::fdo::Result<FeatureVector> {
    serde_json::from_str(json).map_err(|e| zbus::fdo::Error::InvalidArgs(format!("{name}: {e}")))
}

#[interface(name = "org.smilefit.SmileFit1")]
impl SmileFitService {
    /// Score a captured image for one round. Returns a JSON reply; failures
    /// are reported in-band as `{"ok": false, "message": ...}`.
    async fn submit(&self, session: &str, teacher_id: &str, round: u32, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(session, teacher_id, round, bytes = image.len(), "submit requested");
        let reply = self.submit_round(session, teacher_id, round, image).await;
        serde_json::to_string(&reply).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Records of a session as a JSON array, ordered by round.
    async fn list_results(&self, session: &str) -> zbus::fdo::Result<String> {
        let records = self
            .store
            .list(session)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        serde_json::to_string(&records).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Delete a session. Returns the number of records removed.
    async fn end_session(&self, session: &str) -> zbus::fdo::Result<u32> {
        self.close_session(session)
            .map(|n| n as u32)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Coaching text for a round. Generation failures return a message for
    /// the user instead of an error.
    async fn feedback(&self, score: f64, user_json: &str, teacher_json: &str) -> zbus::fdo::Result<String> {
        let user = parse_vector("user", user_json)?;
        let teacher = parse_vector("teacher", teacher_json)?;
        match self.feedback.feedback(score, &user, &teacher, self.schema.keys()).await {
            Ok(text) => Ok(text),
            Err(e) => {
                tracing::warn!(error = %e, "feedback failed");
                Ok(failure_message(&e))
            }
        }
    }

    /// Mail data-URL images to `address`. Returns `{"ok": bool, "message": ...}`.
    async fn send_email(&self, address: &str, images: Vec<String>) -> zbus::fdo::Result<String> {
        let result = match &self.mailer {
            Some(mailer) => mailer.send_images(address, &images).await.map_err(|e| e.to_string()),
            None => Err("email is not configured".to_string()),
        };
        let reply = match result {
            Ok(()) => serde_json::json!({ "ok": true, "message": "Email sent." }),
            Err(e) => {
                tracing::warn!(to = address, error = %e, "email failed");
                serde_json::json!({ "ok": false, "message": format!("Email failed: {e}") })
            }
        };
        Ok(reply.to_string())
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(self.status_json().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{spawn_engine, EngineParts};
    use image::{ImageFormat, RgbImage};
    use smilefit_core::estimator::EstimatorError;
    use smilefit_core::{AuExtractor, Landmark, LandmarkEstimator, LandmarkSet, ScorePredictor};
    use smilefit_store::MemoryStore;
    use std::io::Cursor;
    use std::time::Duration;

    struct FixedEstimator(Option<LandmarkSet>);

    impl LandmarkEstimator for FixedEstimator {
        fn estimate(&mut self, _image: &RgbImage) -> Result<Option<LandmarkSet>, EstimatorError> {
            Ok(self.0.clone())
        }
    }

    fn mesh() -> LandmarkSet {
        let mut points = vec![Landmark::default(); 468];
        points[362] = Landmark::new(10.0, 0.0, 0.0);
        points[14] = Landmark::new(0.0, 5.0, 0.0);
        LandmarkSet::new(points)
    }

    fn png() -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbImage::from_pixel(16, 16, image::Rgb([200, 180, 160]))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn service(dir: &std::path::Path, teachers: TeacherDataset) -> SmileFitService {
        let schema = FeatureSchema::default_au();
        let parts = EngineParts {
            estimator: Box::new(FixedEstimator(Some(mesh()))),
            extractor: AuExtractor::with_schema(schema.clone()),
            predictor: ScorePredictor::new(None, schema.clone()),
            encoder: None,
        };
        SmileFitService {
            engine: spawn_engine(parts, Duration::from_secs(5)).unwrap(),
            store: Arc::new(MemoryStore::new()),
            store_backend: StoreBackend::Memory,
            images: ImageStore::new(dir),
            teachers,
            schema,
            scorer: SimilarityScorer::default(),
            feedback: FeedbackClient::new("http://127.0.0.1:9", "gemini", None, "English"),
            mailer: None,
        }
    }

    #[tokio::test]
    async fn test_submit_stores_record_and_image() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), TeacherDataset::new());

        let reply = svc.submit_round("s1", "emma", 2, png()).await;
        assert!(reply.ok);
        assert_eq!(reply.face_detected, Some(true));
        assert_eq!(reply.au_values.as_ref().unwrap().get("AU25"), Some(0.5));
        assert!(reply.similarity.is_none());

        let image = reply.image.unwrap();
        assert!(image.ends_with(".png"));
        assert!(svc.images.read(&image).is_ok());

        let records = svc.store.list("s1").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].image.as_deref(), Some(image.as_str()));
    }

    #[tokio::test]
    async fn test_submit_scores_against_teacher_reference() {
        let dir = tempfile::tempdir().unwrap();
        let schema = FeatureSchema::default_au();
        let features = AuExtractor::with_schema(schema).extract(Some(&mesh()));
        let mut teachers = TeacherDataset::new();
        teachers.insert(TeacherReference {
            teacher_id: "emma".into(),
            round: 1,
            score: 8.0,
            features,
            embedding: None,
            image: None,
        });
        let svc = service(dir.path(), teachers);

        let reply = svc.submit_round("s1", "emma", 1, png()).await;
        assert_eq!(reply.similarity, Some(100.0));
        assert_eq!(reply.penalty_score, Some(10.0));
    }

    #[tokio::test]
    async fn test_submit_failures_are_in_band() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), TeacherDataset::new());

        let reply = svc.submit_round("../bad", "emma", 1, png()).await;
        assert!(!reply.ok);

        let reply = svc.submit_round("s1", "emma", 1, b"garbage".to_vec()).await;
        assert!(!reply.ok);
        assert!(reply.message.unwrap().contains("analysis failed"));
        assert!(svc.store.list("s1").unwrap().is_empty());

        let json = serde_json::to_value(SubmitReply::failed("x")).unwrap();
        assert_eq!(json, serde_json::json!({ "ok": false, "message": "x" }));
    }

    #[tokio::test]
    async fn test_end_session_removes_records_and_images() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), TeacherDataset::new());
        svc.submit_round("s1", "emma", 1, png()).await;
        svc.submit_round("s1", "emma", 2, png()).await;

        assert_eq!(svc.close_session("s1").unwrap(), 2);
        assert!(svc.store.list("s1").unwrap().is_empty());
        assert!(!dir.path().join("s1").exists());
    }

    #[tokio::test]
    async fn test_teardown_clears_every_session() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), TeacherDataset::new());
        svc.submit_round("a", "emma", 1, png()).await;
        svc.submit_round("b", "olivia", 1, png()).await;

        teardown(svc.store.as_ref(), &svc.images);
        assert!(svc.store.sessions().unwrap().is_empty());
        assert!(!dir.path().join("a").exists());
        assert!(!dir.path().join("b").exists());
    }

    #[test]
    fn test_parse_vector() {
        let v = parse_vector("user", r#"{"AU01": 0.3}"#).unwrap();
        assert_eq!(v.get("AU01"), Some(0.3));
        assert!(parse_vector("user", "[1, 2]").is_err());
    }
}
