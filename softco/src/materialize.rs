//! Turn a finished run's history into a flat file set.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::extract::extract_files;
use crate::message::Message;

/// Path-ordered `(path, content)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectFiles {
    files: BTreeMap<String, String>,
}

impl ProjectFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later inserts for the same path overwrite earlier ones.
    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.files
    }
}

impl FromIterator<(String, String)> for ProjectFiles {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

/// Receives the materialized project.
#[async_trait]
pub trait ProjectSink: Send + Sync {
    async fn persist(&self, project: &str, files: &ProjectFiles) -> anyhow::Result<()>;
}

pub struct ProjectMaterializer {
    project_name: Option<String>,
}

impl ProjectMaterializer {
    pub fn new(project_name: Option<&str>) -> Self {
        Self {
            project_name: project_name.map(str::to_string),
        }
    }

    /// Apply every stage message in history order. Messages without a stage
    /// (the seed, custom actions) and error reports contribute nothing.
    pub fn materialize(&self, history: &[Message]) -> ProjectFiles {
        let mut files = ProjectFiles::new();
        for message in history {
            if message.is_error() {
                continue;
            }
            let Some(stage) = message.stage() else {
                continue;
            };
            match stage.document_path() {
                Some(path) => files.insert(path, message.content()),
                None => {
                    for file in extract_files(message.content(), self.project_name.as_deref()) {
                        files.insert(file.path, file.content);
                    }
                }
            }
        }
        tracing::debug!(files = files.len(), "Materialized project");
        files
    }
}
