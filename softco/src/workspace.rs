//! On-disk project directory for generated files.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::materialize::{ProjectFiles, ProjectSink};

/// Directory holding generated projects, one subdirectory each.
pub struct Workspace {
    base: PathBuf,
}

impl Workspace {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Directory of `project` inside the workspace.
    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.base.join(safe_name(project))
    }

    /// Write one file relative to the project directory, creating parents.
    pub async fn write_file(&self, project: &str, path: &str, content: &str) -> Result<PathBuf> {
        let full = self.resolve(project, path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&full, content)
            .await
            .with_context(|| format!("Failed to write {path}"))?;
        Ok(full)
    }

    pub async fn read_file(&self, project: &str, path: &str) -> Result<String> {
        let full = self.resolve(project, path)?;
        tokio::fs::read_to_string(&full)
            .await
            .with_context(|| format!("Failed to read {path}"))
    }

    /// Files under the project directory, relative and sorted.
    pub async fn list_files(&self, project: &str) -> Result<Vec<String>> {
        let root = self.project_dir(project);
        let mut files = tokio::task::spawn_blocking(move || list_files_sync(&root)).await?;
        files.sort();
        Ok(files)
    }

    /// Join `path` onto the project directory, refusing anything that would
    /// land outside it.
    fn resolve(&self, project: &str, path: &str) -> Result<PathBuf> {
        let rel = Path::new(path);
        let escapes = rel.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes || path.trim().is_empty() {
            anyhow::bail!("Refusing to write outside the project directory: {path}");
        }
        Ok(self.project_dir(project).join(rel))
    }
}

#[async_trait]
impl ProjectSink for Workspace {
    async fn persist(&self, project: &str, files: &ProjectFiles) -> Result<()> {
        let dir = self.project_dir(project);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        for (path, content) in files.iter() {
            self.write_file(project, path, content).await?;
        }
        tracing::info!(project, files = files.len(), dir = %dir.display(), "Wrote project files");
        Ok(())
    }
}

fn safe_name(project: &str) -> String {
    let name: String = project
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    if name.is_empty() { "project".to_string() } else { name }
}

fn list_files_sync(root: &Path) -> Vec<String> {
    let mut result = Vec::new();
    fn walk(dir: &Path, root: &Path, result: &mut Vec<String>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                let name = path.file_name().unwrap_or_default().to_string_lossy();
                if name.starts_with('.') || name == "node_modules" || name == "target" || name == "__pycache__" {
                    continue;
                }
                walk(&path, root, result);
            } else if let Ok(rel) = path.strip_prefix(root) {
                let rel: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect();
                result.push(rel.join("/"));
            }
        }
    }
    walk(root, root, &mut result);
    result
}
