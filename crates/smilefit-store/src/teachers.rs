//! Teacher reference dataset, kept as one JSON file.

use crate::record::TeacherReference;
use crate::StoreError;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

/// References keyed by (teacher, round).
#[derive(Debug, Clone, Default)]
pub struct TeacherDataset {
    references: BTreeMap<(String, u32), TeacherReference>,
}

impl TeacherDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a dataset written by [`save`](Self::save). A missing file yields
    /// an empty dataset; every lookup then misses.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "teacher dataset not found, starting empty");
                return Ok(Self::new());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let list: Vec<TeacherReference> = serde_json::from_str(&text)?;
        let mut dataset = Self::new();
        for reference in list {
            dataset.insert(reference);
        }
        tracing::info!(
            path = %path.display(),
            references = dataset.len(),
            teachers = dataset.teachers().len(),
            "loaded teacher dataset"
        );
        Ok(dataset)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let list: Vec<&TeacherReference> = self.references.values().collect();
        let json = serde_json::to_string_pretty(&list)?;
        std::fs::write(path, json).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Add a reference, replacing any earlier one for the same round.
    pub fn insert(&mut self, reference: TeacherReference) -> Option<TeacherReference> {
        self.references
            .insert((reference.teacher_id.clone(), reference.round), reference)
    }

    pub fn get(&self, teacher_id: &str, round: u32) -> Option<&TeacherReference> {
        self.references.get(&(teacher_id.to_string(), round))
    }

    /// Distinct teacher ids, sorted.
    pub fn teachers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.references.keys().map(|(t, _)| t.as_str()).collect();
        ids.dedup();
        ids
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smilefit_core::{FeatureSchema, FeatureVector};

    fn reference(teacher: &str, round: u32, score: f64) -> TeacherReference {
        TeacherReference {
            teacher_id: teacher.to_string(),
            round,
            score,
            features: FeatureVector::zeros(&FeatureSchema::default_au()),
            embedding: None,
            image: Some(format!("{teacher}/{teacher}{round}.png")),
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = TeacherDataset::load(dir.path().join("none.json")).unwrap();
        assert!(dataset.is_empty());
        assert!(dataset.get("emma", 1).is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refs/teachers.json");

        let mut dataset = TeacherDataset::new();
        dataset.insert(reference("sophia", 2, 6.0));
        dataset.insert(reference("emma", 1, 7.5));
        dataset.insert(reference("emma", 2, 8.0));
        dataset.save(&path).unwrap();

        let loaded = TeacherDataset::load(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.teachers(), vec!["emma", "sophia"]);
        assert_eq!(loaded.get("emma", 2).unwrap().score, 8.0);
        assert!(loaded.get("emma", 3).is_none());
    }

    #[test]
    fn test_insert_replaces_same_round() {
        let mut dataset = TeacherDataset::new();
        assert!(dataset.insert(reference("emma", 1, 1.0)).is_none());
        let old = dataset.insert(reference("emma", 1, 2.0)).unwrap();
        assert_eq!(old.score, 1.0);
        assert_eq!(dataset.get("emma", 1).unwrap().score, 2.0);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(TeacherDataset::load(&path), Err(StoreError::Json(_))));
    }
}
