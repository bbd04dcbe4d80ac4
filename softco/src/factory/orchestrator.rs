//! Company orchestrator: one idea in, one materialized project out.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;

use crate::config::Config;
use crate::context::RunContext;
use crate::cost::CostLedger;
use crate::llm::LlmProvider;
use crate::materialize::{ProjectFiles, ProjectMaterializer, ProjectSink};
use crate::progress::ProgressSink;
use crate::role::standard_team;
use crate::store::{ProjectStore, RunStatus};
use crate::team::Team;
use crate::workspace::Workspace;

/// Outcome of [`SoftwareCompany::generate`].
#[derive(Debug, Clone)]
pub struct ProjectReport {
    pub project: String,
    /// Project directory inside the workspace.
    pub path: PathBuf,
    pub files: ProjectFiles,
    pub ledger: CostLedger,
    /// Messages in the final history, seed included.
    pub messages: usize,
    pub status: RunStatus,
    /// Row in the run database, when one is attached.
    pub run_id: Option<i64>,
}

impl ProjectReport {
    pub fn cost_summary(&self) -> String {
        self.ledger.summary()
    }
}

/// Derive a project name from the first three words of an idea.
///
/// Words that are not purely alphanumeric are dropped. Falls back to
/// `project_<unix seconds>` when nothing usable remains.
pub fn project_name_for(idea: &str) -> String {
    let name = idea
        .to_lowercase()
        .split_whitespace()
        .take(3)
        .filter(|w| w.chars().all(char::is_alphanumeric))
        .collect::<Vec<_>>()
        .join("_");
    if name.is_empty() {
        format!("project_{}", Utc::now().timestamp())
    } else {
        name
    }
}

pub struct SoftwareCompany {
    config: Config,
    llm: Arc<dyn LlmProvider>,
    progress: Option<Arc<dyn ProgressSink>>,
    store: Option<ProjectStore>,
    workspace: Workspace,
}

impl SoftwareCompany {
    pub fn new(config: Config, llm: Arc<dyn LlmProvider>) -> Self {
        let workspace = Workspace::new(&config.project.workspace);
        Self {
            config,
            llm,
            progress: None,
            store: None,
            workspace,
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Record every run in `store`.
    pub fn with_store(mut self, store: ProjectStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn store(&self) -> Option<&ProjectStore> {
        self.store.as_ref()
    }

    /// Run the standard team on `idea` and write the resulting project.
    ///
    /// A run that exhausts its budget still materializes what was produced
    /// before the limit and reports [`RunStatus::BudgetExceeded`].
    pub async fn generate(&self, idea: &str) -> Result<ProjectReport> {
        let idea = idea.trim();
        if idea.is_empty() {
            anyhow::bail!("Idea must not be empty");
        }
        let project = self
            .config
            .project
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| project_name_for(idea));

        let run_id = match &self.store {
            Some(store) => Some(store.start_run(&project, idea)?),
            None => None,
        };

        tracing::info!(
            project = %project,
            investment = self.config.run.investment,
            rounds = self.config.run.rounds,
            model = self.llm.model(),
            "Starting company run"
        );

        let mut ctx = RunContext::new(Arc::clone(&self.llm))
            .with_project_name(&project)
            .with_policy(self.config.stream);
        if let Some(sink) = &self.progress {
            ctx = ctx.with_progress(Arc::clone(sink));
        }
        let mut team = Team::new(ctx);
        team.hire(standard_team(Arc::clone(&self.llm)));
        team.invest(self.config.run.investment);

        let status = match team.run(self.config.run.rounds, idea).await {
            Ok(_) => RunStatus::Completed,
            Err(e) if e.is_budget_exceeded() => {
                tracing::warn!(project = %project, "{e}");
                RunStatus::BudgetExceeded
            }
            Err(e) => {
                if let (Some(store), Some(run_id)) = (&self.store, run_id) {
                    let cost = team.env().context().ledger().total_cost;
                    store.finish_run(run_id, RunStatus::Failed, cost)?;
                }
                return Err(e.into());
            }
        };

        let history = team.env().history();
        let ledger = team.env().context().ledger();
        let files = ProjectMaterializer::new(Some(&project)).materialize(history);
        // The store attaches files to the project's latest run, the one started above.
        let mut sinks: Vec<&dyn ProjectSink> = vec![&self.workspace];
        if let Some(store) = &self.store {
            sinks.push(store);
        }
        for sink in sinks {
            sink.persist(&project, &files).await?;
        }

        if let (Some(store), Some(run_id)) = (&self.store, run_id) {
            store.record_messages(run_id, history)?;
            store.finish_run(run_id, status, ledger.total_cost)?;
        }

        let path = self.workspace.project_dir(&project);
        tracing::info!(
            project = %project,
            files = files.len(),
            cost = ledger.total_cost,
            status = status.as_str(),
            path = %path.display(),
            "Company run finished"
        );

        Ok(ProjectReport {
            project,
            path,
            files,
            ledger,
            messages: history.len(),
            status,
            run_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;
    use crate::stage::{DESIGN_PATH, PRD_PATH};

    fn company(dir: &std::path::Path, llm: ScriptedLlm) -> SoftwareCompany {
        let mut config = Config::default();
        config.project.workspace = dir.to_path_buf();
        SoftwareCompany::new(config, Arc::new(llm))
    }

    #[test]
    fn names_come_from_the_first_three_words() {
        assert_eq!(project_name_for("Create a 2048 game"), "create_a_2048");
        assert_eq!(project_name_for("Build a to-do app"), "build_a");
        assert!(project_name_for("!!! ???").starts_with("project_"));
        assert!(project_name_for("").starts_with("project_"));
    }

    #[tokio::test]
    async fn offline_run_writes_the_project() {
        let dir = tempfile::tempdir().unwrap();
        let company = company(dir.path(), ScriptedLlm::offline("Create a calculator"))
            .with_store(ProjectStore::in_memory().unwrap());

        let report = company.generate("Create a calculator").await.unwrap();

        assert_eq!(report.project, "create_a_calculator");
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.messages, 4);
        assert_eq!(
            report.files.paths(),
            vec![
                PRD_PATH.to_string(),
                DESIGN_PATH.to_string(),
                "src/README.md".to_string(),
                "src/main.py".to_string(),
            ]
        );
        assert!(report.path.join("src/main.py").is_file());
        assert!(report.ledger.total_cost > 0.0);

        let store = company.store().unwrap();
        let run = store.latest_run("create_a_calculator").unwrap().unwrap();
        assert_eq!(Some(run.id), report.run_id);
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(store.messages_for_run(run.id).unwrap().len(), 4);
        assert_eq!(store.files_for_run(run.id).unwrap(), report.files);
    }

    #[tokio::test]
    async fn configured_name_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut company = company(dir.path(), ScriptedLlm::offline("x"));
        company.config.project.name = Some("calc".into());
        let report = company.generate("Create a calculator").await.unwrap();
        assert_eq!(report.project, "calc");
        assert_eq!(report.path, dir.path().join("calc"));
    }

    #[tokio::test]
    async fn exhausted_budget_keeps_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut company = company(dir.path(), ScriptedLlm::offline("Create a calculator"))
            .with_store(ProjectStore::in_memory().unwrap());
        company.config.run.investment = 0.0;

        let report = company.generate("Create a calculator").await.unwrap();
        assert_eq!(report.status, RunStatus::BudgetExceeded);
        assert_eq!(report.messages, 1);
        assert!(report.files.is_empty());

        let run = company.store().unwrap().latest_run(&report.project).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::BudgetExceeded);
    }

    #[tokio::test]
    async fn empty_idea_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let company = company(dir.path(), ScriptedLlm::new("gpt-4"));
        assert!(company.generate("   ").await.is_err());
    }
}
