//! End-to-end runs of the standard team against a scripted LLM.
//!
//! Everything runs offline; no network or API key is needed.

use std::sync::Arc;

use softco::llm::ScriptedLlm;
use softco::materialize::ProjectMaterializer;
use softco::progress::{CollectingSink, ProgressEvent};
use softco::role::standard_team;
use softco::stage::{DESIGN_PATH, PRD_PATH};
use softco::{RunContext, Team};

const CODE: &str = "FILE: src/app.py\n---\nprint(1)\n---\nFILE: src/readme.md\n---\nhello\n---";

fn scripted() -> ScriptedLlm {
    ScriptedLlm::new("gpt-4")
        .with_reply("# PRD\n\n- add numbers\n")
        .with_reply("# Design\n\nOne module.\n")
        .with_reply(CODE)
}

fn team_with(llm: ScriptedLlm, sink: Option<Arc<CollectingSink>>) -> Team {
    let llm = Arc::new(llm);
    let mut ctx = RunContext::new(llm.clone()).with_project_name("calc");
    if let Some(sink) = sink {
        ctx = ctx.with_progress(sink);
    }
    let mut team = Team::new(ctx);
    team.hire(standard_team(llm));
    team
}

#[tokio::test]
async fn standard_team_runs_in_order_and_goes_idle() {
    let mut team = team_with(scripted(), None);
    team.invest(3.0);

    let history = team.run(5, "Create a calculator").await.unwrap();

    let senders: Vec<(&str, &str)> = history.iter().map(|m| (m.role(), m.cause_by())).collect();
    assert_eq!(
        senders,
        vec![
            ("", "UserRequirement"),
            ("Alice", "WritePRD"),
            ("Bob", "WriteDesign"),
            ("Charlie", "WriteCode"),
        ]
    );
    assert!(team.env().is_idle());
    assert!(team.env().context().ledger().total_cost > 0.0);
}

#[tokio::test]
async fn round_limit_returns_partial_history() {
    let mut team = team_with(scripted(), None);

    let history = team.run(2, "Create a calculator").await.unwrap();

    assert_eq!(history.len(), 3);
    assert_eq!(history[2].cause_by(), "WriteDesign");
    assert!(!team.env().is_idle());
}

#[tokio::test]
async fn budget_exhaustion_stops_the_run() {
    let mut team = team_with(scripted(), None);
    // The first PRD call costs more than this.
    team.invest(0.000_001);

    let err = team.run(5, "Create a calculator").await.unwrap_err();

    assert!(err.is_budget_exceeded());
    let history = team.env().history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].cause_by(), "WritePRD");
}

#[tokio::test]
async fn llm_failure_becomes_an_error_message_and_the_run_continues() {
    let llm = ScriptedLlm::new("gpt-4")
        .with_reply("# PRD\n")
        .with_failure("connection reset")
        .with_reply(CODE);
    let sink = Arc::new(CollectingSink::new());
    let mut team = team_with(llm, Some(sink.clone()));

    let history = team.run(5, "Create a calculator").await.unwrap();

    assert_eq!(history.len(), 4);
    let failed = &history[2];
    assert!(failed.is_error());
    assert_eq!(failed.role(), "Bob");
    assert!(failed.content().starts_with("Error during WriteDesign:"));
    assert!(failed.content().contains("connection reset"));

    // The engineer still reacts to the architect's (failed) output.
    assert_eq!(history[3].cause_by(), "WriteCode");
    assert!(
        sink.events()
            .iter()
            .any(|e| matches!(e, ProgressEvent::Error { role, .. } if role == "Bob"))
    );

    let files = ProjectMaterializer::new(Some("calc")).materialize(&history);
    assert_eq!(files.get(PRD_PATH), Some("# PRD\n"));
    assert_eq!(files.get(DESIGN_PATH), None);
    assert_eq!(files.get("src/app.py"), Some("print(1)\n"));
}

#[tokio::test]
async fn streamed_files_match_the_materialized_project() {
    let sink = Arc::new(CollectingSink::new());
    let mut team = team_with(scripted().with_chunk_size(3), Some(sink.clone()));

    let history = team.run(5, "Create a calculator").await.unwrap();
    let files = ProjectMaterializer::new(Some("calc")).materialize(&history);

    assert_eq!(&sink.completed_files(), files.as_map());
    assert_eq!(files.get("src/readme.md"), Some("hello\n"));

    let events = sink.events();
    let opened = events
        .iter()
        .position(|e| matches!(e, ProgressEvent::FileOpened { path, .. } if path == "src/app.py"))
        .unwrap();
    let completed = events
        .iter()
        .position(|e| matches!(e, ProgressEvent::FileComplete { path, .. } if path == "src/app.py"))
        .unwrap();
    assert!(opened < completed);
    assert!(events.iter().any(|e| matches!(e, ProgressEvent::StreamChunk { .. })));

    let completions = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::ActionCompleted { .. }))
        .count();
    assert_eq!(completions, 3);
}

#[tokio::test]
async fn prompts_carry_upstream_documents() {
    let llm = Arc::new(scripted());
    let mut team = Team::new(RunContext::new(llm.clone()));
    team.hire(standard_team(llm.clone()));

    team.run(5, "Create a calculator").await.unwrap();

    let prompts = llm.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[0].contains("Create a calculator"));
    assert!(prompts[1].contains("add numbers"));
    assert!(prompts[2].contains("One module."));
    assert!(prompts[2].contains("FILE:"));
}
