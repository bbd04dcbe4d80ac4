//! softco: a multi-agent software company.
//!
//! Roles (product manager, architect, engineer) take turns over a shared
//! message bus, each turning the messages it watches into a new document
//! through an LLM. The engine provides:
//! - Cost accounting against a run budget
//! - Streaming file extraction from `FILE:` transcripts
//! - Progress events for terminals, JSON consumers and web layers
//! - Materialization of the final history into a project tree

pub mod actions;
pub mod config;
pub mod context;
pub mod cost;
pub mod environment;
pub mod error;
pub mod extract;
pub mod factory;
pub mod llm;
pub mod materialize;
pub mod message;
mod millis;
pub mod progress;
pub mod role;
pub mod stage;
pub mod store;
pub mod team;
pub mod workspace;

pub use context::RunContext;
pub use cost::CostLedger;
pub use environment::Environment;
pub use error::{EngineError, EngineResult};
pub use extract::StreamingFileExtractor;
pub use factory::{ProjectReport, SoftwareCompany};
pub use message::Message;
pub use role::Role;
pub use team::Team;
