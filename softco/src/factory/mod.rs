//! Software company facade.
//!
//! One call turns an idea into a project directory: the standard team
//! (product manager, architect, engineer) collaborates over the message
//! bus, the history is materialized into files, and the result is written
//! to the workspace and, optionally, the run database.

mod orchestrator;

pub use orchestrator::{ProjectReport, SoftwareCompany, project_name_for};
