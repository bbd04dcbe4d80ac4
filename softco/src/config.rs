//! Configuration: optional TOML file, then environment, then CLI flags.
//!
//! ```toml
//! [llm]
//! flavor = "openai"        # or "anthropic"
//! model = "gpt-4o"
//!
//! [project]
//! workspace = "workspace"
//!
//! [run]
//! investment = 3.0
//! rounds = 5
//!
//! [stream]
//! chunk_min_chars = 20
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::context::StreamPolicy;
use crate::llm::{Flavor, LlmClient, RetryPolicy};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub project: ProjectConfig,
    pub run: RunConfig,
    pub stream: StreamPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub flavor: Flavor,
    /// Defaults per flavor when unset.
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            flavor: Flavor::OpenAi,
            model: None,
            base_url: None,
            api_key: None,
            temperature: 0.7,
            max_tokens: 4096,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Generated projects are written under this directory.
    pub workspace: PathBuf,
    pub name: Option<String>,
    /// SQLite run log. No log when unset.
    pub db: Option<PathBuf>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("workspace"),
            name: None,
            db: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Budget in USD.
    pub investment: f64,
    pub rounds: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            investment: 3.0,
            rounds: 5,
        }
    }
}

impl Config {
    /// Read a config file. A missing explicit path is an error.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Can't read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Bad config file {}", path.display()))
    }

    /// File (if given) overlaid with the process environment. `flavor`
    /// overrides the file's flavor before the environment is read, so the
    /// matching API key variables are picked.
    pub fn load(path: Option<&Path>, flavor: Option<Flavor>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(flavor) = flavor {
            config.llm.flavor = flavor;
        }
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay environment variables, looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        match self.llm.flavor {
            Flavor::OpenAi => {
                if let Some(key) = var("OPENAI_API_KEY") {
                    self.llm.api_key = Some(key);
                }
                if let Some(model) = var("OPENAI_MODEL") {
                    self.llm.model = Some(model);
                }
                if let Some(url) = var("OPENAI_BASE_URL") {
                    self.llm.base_url = Some(url);
                }
            }
            Flavor::Anthropic => {
                if let Some(key) = var("ANTHROPIC_API_KEY") {
                    self.llm.api_key = Some(key);
                }
            }
        }
        if let Some(dir) = var("SOFTCO_WORKSPACE") {
            self.project.workspace = PathBuf::from(dir);
        }
    }

    pub fn model(&self) -> &str {
        self.llm
            .model
            .as_deref()
            .unwrap_or_else(|| self.llm.flavor.default_model())
    }

    pub fn llm_client(&self) -> LlmClient {
        let mut client = LlmClient::new(self.llm.flavor, self.llm.api_key.clone())
            .with_model(self.model())
            .with_temperature(self.llm.temperature)
            .with_max_tokens(self.llm.max_tokens)
            .with_retry(RetryPolicy {
                max_retries: self.llm.max_retries,
                ..RetryPolicy::default()
            });
        if let Some(url) = &self.llm.base_url {
            client = client.with_base_url(url);
        }
        client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_cli_defaults() {
        let config = Config::default();
        assert_eq!(config.run.investment, 3.0);
        assert_eq!(config.run.rounds, 5);
        assert_eq!(config.model(), "gpt-4-turbo");
        assert_eq!(config.project.workspace, PathBuf::from("workspace"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [llm]
            flavor = "anthropic"

            [run]
            rounds = 2

            [stream]
            sink_timeout = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.llm.flavor, Flavor::Anthropic);
        assert!(config.model().starts_with("claude-"));
        assert_eq!(config.run.rounds, 2);
        assert_eq!(config.run.investment, 3.0);
        assert_eq!(config.stream.sink_timeout, Duration::from_millis(250));
        assert_eq!(config.stream.chunk_min_chars, 20);
    }

    #[test]
    fn environment_overrides_file_for_the_active_flavor() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_MODEL", "gpt-4o"),
            ("ANTHROPIC_API_KEY", "ignored"),
            ("SOFTCO_WORKSPACE", "/tmp/out"),
        ]));
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.model(), "gpt-4o");
        assert_eq!(config.project.workspace, PathBuf::from("/tmp/out"));

        let mut config = Config::default();
        config.llm.flavor = Flavor::Anthropic;
        config.apply_env(env(&[("OPENAI_API_KEY", "ignored"), ("ANTHROPIC_API_KEY", "sk-ant")]));
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-ant"));
    }

    #[test]
    fn blank_environment_values_are_ignored() {
        let mut config = Config::default();
        config.llm.model = Some("gpt-4".into());
        config.apply_env(env(&[("OPENAI_MODEL", "  ")]));
        assert_eq!(config.model(), "gpt-4");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(err.to_string().contains("nope.toml"));
    }

    #[test]
    fn file_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("softco.toml");
        let mut config = Config::default();
        config.project.name = Some("calc".into());
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();
        assert_eq!(Config::from_file(&path).unwrap(), config);
    }
}
