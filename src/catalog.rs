//! Lesson catalog - read-only lesson metadata per learning path
//!
//! ```toml
//! [[lessons]]
//! id = "f-01"
//! title = "Orientation"
//! path = "foundational"
//! order_index = 1
//! estimated_minutes = 15
//! ```

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::info;

use crate::error::{GateError, Result};
use crate::model::{LearningPath, Lesson};

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    lessons: Vec<Lesson>,
}

/// Lessons grouped by path, each group sorted by `order_index`
#[derive(Debug, Clone, Default)]
pub struct LessonCatalog {
    paths: BTreeMap<LearningPath, Vec<Lesson>>,
}

impl LessonCatalog {
    /// Build a catalog, rejecting duplicate ids and duplicate order indexes within a path
    pub fn from_lessons(lessons: Vec<Lesson>) -> Result<Self> {
        let mut ids = HashSet::new();
        let mut paths: BTreeMap<LearningPath, Vec<Lesson>> = BTreeMap::new();

        for lesson in lessons {
            if !ids.insert(lesson.id.clone()) {
                return Err(GateError::Config(format!("duplicate lesson id '{}'", lesson.id)));
            }
            let group = paths.entry(lesson.path).or_default();
            if group.iter().any(|l| l.order_index == lesson.order_index) {
                return Err(GateError::Config(format!(
                    "order_index {} used twice on the {} path",
                    lesson.order_index, lesson.path
                )));
            }
            group.push(lesson);
        }

        for group in paths.values_mut() {
            group.sort_by_key(|l| l.order_index);
        }
        Ok(Self { paths })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(raw)?;
        Self::from_lessons(file.lessons)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let catalog = Self::from_toml_str(&raw)?;
        info!("Loaded lesson catalog from {:?}: {} lessons", path, catalog.len());
        Ok(catalog)
    }

    /// Ordered lessons for a path; empty when the path has none
    pub fn lessons_for(&self, path: LearningPath) -> &[Lesson] {
        self.paths.get(&path).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn lesson(&self, id: &str) -> Option<&Lesson> {
        self.paths.values().flatten().find(|l| l.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lesson(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.paths.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
