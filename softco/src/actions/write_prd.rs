use std::sync::Arc;

use super::Action;
use crate::llm::LlmProvider;
use crate::stage::Stage;

/// Requirements stage: user idea in, PRD markdown out.
pub struct WritePrd {
    llm: Arc<dyn LlmProvider>,
}

impl WritePrd {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

impl Action for WritePrd {
    fn name(&self) -> &str {
        Stage::Requirements.action_name()
    }

    fn stage(&self) -> Option<Stage> {
        Some(Stage::Requirements)
    }

    fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    fn build_prompt(&self, context: &str) -> String {
        format!(
            r#"You are a Product Manager. Write a Product Requirements Document (PRD) for the user requirement below.

User Requirement:
{context}

The PRD must cover:

1. **Project Overview**: what the product is, who it is for, the core value it delivers.
2. **Goals and Objectives**: primary goals, success metrics, key performance indicators.
3. **Core Features**: the main features, each with a priority (must-have, should-have, nice-to-have) and user stories.
4. **Technical Requirements**: target platform, suggested stack, performance and security requirements.
5. **User Interface Requirements**: UX principles, key user flows, accessibility.
6. **Constraints and Assumptions**: technical and business constraints, and the assumptions you made.
7. **Timeline and Milestones**: development phases and milestones.

Be specific and actionable: an architect and an engineer must be able to work from this document alone.

Output the PRD in markdown."#
        )
    }
}
