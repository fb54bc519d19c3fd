//! Feature schema: the ordered key list shared by the extractor and the
//! score model's input columns.

use crate::au::{AU_DEFINITIONS, WEIGHTED_SUFFIX};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("failed to read schema file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("schema file {path} is not a JSON array of strings: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("schema has no keys")]
    Empty,
    #[error("duplicate schema key: {0}")]
    DuplicateKey(String),
}

/// Ordered feature keys, e.g. `["AU01", "AU02", ..., "AU01_w", ...]`.
///
/// The score model was trained on this exact column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSchema {
    keys: Vec<String>,
}

impl FeatureSchema {
    pub fn from_keys(keys: Vec<String>) -> Result<Self, SchemaError> {
        if keys.is_empty() {
            return Err(SchemaError::Empty);
        }
        let mut seen = HashSet::with_capacity(keys.len());
        for key in &keys {
            if !seen.insert(key.as_str()) {
                return Err(SchemaError::DuplicateKey(key.clone()));
            }
        }
        Ok(Self { keys })
    }

    /// Load a schema from a JSON array file (`feature_cols.json`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let path_display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| SchemaError::Read {
            path: path_display.clone(),
            source,
        })?;
        let keys: Vec<String> = serde_json::from_str(&content).map_err(|source| {
            SchemaError::Parse {
                path: path_display.clone(),
                source,
            }
        })?;
        let schema = Self::from_keys(keys)?;
        tracing::info!(path = %path_display, keys = schema.len(), "loaded feature schema");
        Ok(schema)
    }

    /// Every tracked unit followed by its weighted twin.
    pub fn default_au() -> Self {
        let raw = AU_DEFINITIONS.iter().map(|d| d.key.to_string());
        let weighted = AU_DEFINITIONS
            .iter()
            .map(|d| format!("{}{WEIGHTED_SUFFIX}", d.key));
        Self {
            keys: raw.chain(weighted).collect(),
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }
}

/// Base unit of a weighted key (`"AU12_w"` → `Some("AU12")`).
pub fn base_key(key: &str) -> Option<&str> {
    key.strip_suffix(WEIGHTED_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_au_layout() {
        let schema = FeatureSchema::default_au();
        assert_eq!(schema.len(), AU_DEFINITIONS.len() * 2);
        assert_eq!(schema.keys()[0], "AU01");
        assert_eq!(schema.keys()[AU_DEFINITIONS.len()], "AU01_w");
    }

    #[test]
    fn test_rejects_empty_and_duplicates() {
        assert!(matches!(FeatureSchema::from_keys(vec![]), Err(SchemaError::Empty)));
        let dup = FeatureSchema::from_keys(vec!["AU01".into(), "AU01".into()]);
        assert!(matches!(dup, Err(SchemaError::DuplicateKey(k)) if k == "AU01"));
    }

    #[test]
    fn test_load_from_file_keeps_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"["AU12", "AU01", "AU12_w"]"#).unwrap();
        let schema = FeatureSchema::load(file.path()).unwrap();
        assert_eq!(schema.keys(), &["AU12", "AU01", "AU12_w"]);
    }

    #[test]
    fn test_load_rejects_non_array() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"AU01": 1}}"#).unwrap();
        assert!(matches!(FeatureSchema::load(file.path()), Err(SchemaError::Parse { .. })));
    }

    #[test]
    fn test_load_missing_file() {
        let err = FeatureSchema::load("/nonexistent/feature_cols.json").unwrap_err();
        assert!(matches!(err, SchemaError::Read { .. }));
    }

    #[test]
    fn test_base_key() {
        assert_eq!(base_key("AU12_w"), Some("AU12"));
        assert_eq!(base_key("AU12"), None);
    }
}
