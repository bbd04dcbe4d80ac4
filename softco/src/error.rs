//! Engine error conditions.
//!
//! Only two conditions ever leave the engine. Collaborators (HTTP client,
//! filesystem, SQLite) keep using `anyhow` and are wrapped at the seam.

/// Errors raised by the turn-taking engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The LLM capability failed to produce a completion for an action.
    ///
    /// Roles recover from this locally by publishing an error-content
    /// message, so callers of [`crate::team::Team::run`] normally only see
    /// it in message history.
    #[error("LLM call failed during {action}: {source}")]
    LlmCallFailed {
        action: String,
        #[source]
        source: anyhow::Error,
    },

    /// Accumulated spend reached the configured budget. Fatal for the run.
    #[error("Budget exceeded: ${cost:.4} >= ${budget:.2}")]
    BudgetExceeded { cost: f64, budget: f64 },
}

impl EngineError {
    pub fn is_budget_exceeded(&self) -> bool {
        matches!(self, EngineError::BudgetExceeded { .. })
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
