use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smilefit_core::{Embedding, FeatureVector};
use uuid::Uuid;

/// One scored round of a session. Records are never updated after they are
/// appended; a retried round is a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub id: Uuid,
    pub session_id: String,
    pub teacher_id: String,
    pub round: u32,
    pub score: f64,
    pub features: FeatureVector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
    /// Relative path into the image store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RoundRecord {
    pub fn new(
        session_id: impl Into<String>,
        teacher_id: impl Into<String>,
        round: u32,
        score: f64,
        features: FeatureVector,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            teacher_id: teacher_id.into(),
            round,
            score,
            features,
            embedding: None,
            image: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_embedding(mut self, embedding: Option<Embedding>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_image(mut self, image: Option<String>) -> Self {
        self.image = image;
        self
    }
}

/// Precomputed features of one teacher's expression for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeacherReference {
    pub teacher_id: String,
    pub round: u32,
    /// Regressor score of the reference image.
    pub score: f64,
    pub features: FeatureVector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
    /// Source image path, as given to the builder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use smilefit_core::FeatureSchema;

    #[test]
    fn test_new_record_gets_fresh_id() {
        let features = FeatureVector::zeros(&FeatureSchema::default_au());
        let a = RoundRecord::new("s1", "emma", 1, 3.5, features.clone());
        let b = RoundRecord::new("s1", "emma", 1, 3.5, features);
        assert_ne!(a.id, b.id);
        assert_eq!(a.round, 1);
        assert!(a.image.is_none());
    }

    #[test]
    fn test_record_json_omits_absent_optionals() {
        let features = FeatureVector::zeros(&FeatureSchema::default_au());
        let record = RoundRecord::new("s1", "emma", 2, 1.0, features);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("embedding").is_none());
        assert!(json.get("image").is_none());
        assert_eq!(json["features"]["AU01"], 0.0);

        let back: RoundRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
