//! Actions: one prompt, one LLM call.
//!
//! An action is stateless. It turns the text a role has observed into a
//! prompt and runs it against its bound [`LlmProvider`]; retries, if any,
//! belong to the provider.

mod write_code;
mod write_design;
mod write_prd;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{EngineError, EngineResult};
use crate::llm::{ChunkSender, Completion, LlmProvider};
use crate::stage::Stage;

pub use write_code::WriteCode;
pub use write_design::WriteDesign;
pub use write_prd::WritePrd;

#[async_trait]
pub trait Action: Send + Sync {
    /// Recorded as `cause_by` on the message this action produces.
    fn name(&self) -> &str;

    /// Pipeline stage, if this action produces a project artifact.
    fn stage(&self) -> Option<Stage>;

    fn llm(&self) -> &Arc<dyn LlmProvider>;

    /// Pure prompt construction.
    fn build_prompt(&self, context: &str) -> String;

    /// Build the prompt and invoke the LLM once.
    async fn execute(
        &self,
        context: &str,
        system: Option<&str>,
        on_chunk: Option<ChunkSender>,
    ) -> EngineResult<Completion> {
        let prompt = self.build_prompt(context);
        self.llm()
            .invoke(&prompt, system, on_chunk)
            .await
            .map_err(|source| EngineError::LlmCallFailed {
                action: self.name().to_string(),
                source,
            })
    }
}

/// The three stage actions, in pipeline order.
pub fn standard(llm: Arc<dyn LlmProvider>) -> Vec<Box<dyn Action>> {
    vec![
        Box::new(WritePrd::new(Arc::clone(&llm))),
        Box::new(WriteDesign::new(Arc::clone(&llm))),
        Box::new(WriteCode::new(llm)),
    ]
}
