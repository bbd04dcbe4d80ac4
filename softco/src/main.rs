//! softco: turn a one-line idea into a project directory.
//!
//! A product manager, an architect and an engineer collaborate through
//! an LLM, producing a PRD, a system design and source files.
//!
//!   softco "Create a 2048 game"
//!   softco --offline --events json "Create a calculator"
//!
//! Reads OPENAI_API_KEY (or ANTHROPIC_API_KEY with `--flavor anthropic`),
//! from the environment or a `.env` file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use softco::config::Config;
use softco::factory::SoftwareCompany;
use softco::llm::{Flavor, LlmProvider, ScriptedLlm};
use softco::progress::{ConsoleSink, JsonLinesSink, ProgressSink};
use softco::store::ProjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Events {
    /// `[role] emoji text` lines
    Console,
    /// One JSON object per line
    Json,
    None,
}

#[derive(Parser)]
#[command(name = "softco", about = "Multi-agent software company")]
struct Args {
    /// What to build
    idea: String,

    /// Budget in USD
    #[arg(long)]
    investment: Option<f64>,

    /// Maximum collaboration rounds
    #[arg(long)]
    rounds: Option<usize>,

    /// Project name (derived from the idea when omitted)
    #[arg(long)]
    name: Option<String>,

    /// Workspace directory for generated projects
    #[arg(long)]
    path: Option<PathBuf>,

    /// TOML config file
    #[arg(long, env = "SOFTCO_CONFIG")]
    config: Option<PathBuf>,

    /// Model name
    #[arg(long)]
    model: Option<String>,

    /// API key (otherwise taken from the environment)
    #[arg(long)]
    api_key: Option<String>,

    /// API base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Wire protocol of the endpoint
    #[arg(long, value_enum)]
    flavor: Option<Flavor>,

    /// SQLite run log
    #[arg(long)]
    db: Option<PathBuf>,

    /// Use canned replies instead of calling an LLM
    #[arg(long)]
    offline: bool,

    /// Progress output
    #[arg(long, value_enum, default_value = "console")]
    events: Events,

    /// Log as JSON
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(investment) = self.investment {
            config.run.investment = investment;
        }
        if let Some(rounds) = self.rounds {
            config.run.rounds = rounds;
        }
        if let Some(name) = &self.name {
            config.project.name = Some(name.clone());
        }
        if let Some(path) = &self.path {
            config.project.workspace = path.clone();
        }
        if let Some(model) = &self.model {
            config.llm.model = Some(model.clone());
        }
        if let Some(key) = &self.api_key {
            config.llm.api_key = Some(key.clone());
        }
        if let Some(url) = &self.base_url {
            config.llm.base_url = Some(url.clone());
        }
        if let Some(db) = &self.db {
            config.project.db = Some(db.clone());
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "softco=info".into());
    let fmt = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        fmt.json().init();
    } else {
        fmt.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.log_json);

    let mut config = Config::load(args.config.as_deref(), args.flavor)?;
    args.apply(&mut config);

    let llm: Arc<dyn LlmProvider> = if args.offline {
        tracing::info!("Offline mode, using canned replies");
        Arc::new(ScriptedLlm::offline(&args.idea))
    } else {
        if config.llm.api_key.is_none() && config.llm.base_url.is_none() {
            anyhow::bail!(
                "No API key found. Set {} or pass --api-key (or use --offline).",
                match config.llm.flavor {
                    Flavor::OpenAi => "OPENAI_API_KEY",
                    Flavor::Anthropic => "ANTHROPIC_API_KEY",
                }
            );
        }
        Arc::new(config.llm_client())
    };

    let store = match &config.project.db {
        Some(db) => {
            if let Some(parent) = db.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            Some(ProjectStore::open(db)?)
        }
        None => None,
    };

    let progress: Option<Arc<dyn ProgressSink>> = match args.events {
        Events::Console => Some(Arc::new(ConsoleSink::default())),
        Events::Json => Some(Arc::new(JsonLinesSink::stdout())),
        Events::None => None,
    };

    let mut company = SoftwareCompany::new(config, llm);
    if let Some(sink) = progress {
        company = company.with_progress(sink);
    }
    if let Some(store) = store {
        company = company.with_store(store);
    }

    let report = company.generate(&args.idea).await?;

    if args.events != Events::Json {
        println!();
        for path in report.files.paths() {
            println!("  {path}");
        }
        println!("\n📁 Project: {}", report.path.display());
        println!("{}", report.cost_summary());
    }
    Ok(())
}
