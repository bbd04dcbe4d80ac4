use std::sync::Arc;

use super::Action;
use crate::llm::LlmProvider;
use crate::stage::Stage;

/// Design stage: PRD in, system design markdown out.
pub struct WriteDesign {
    llm: Arc<dyn LlmProvider>,
}

impl WriteDesign {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

impl Action for WriteDesign {
    fn name(&self) -> &str {
        Stage::Design.action_name()
    }

    fn stage(&self) -> Option<Stage> {
        Some(Stage::Design)
    }

    fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    fn build_prompt(&self, context: &str) -> String {
        format!(
            r#"You are a Software Architect. Design the complete system for the PRD below, including the detailed application logic, not only the architecture.

PRD (Product Requirements Document):
{context}

The design document must cover:

1. **Architecture Overview**: architecture style, the main components and how they interact (described in text).
2. **Technology Stack**: languages, frameworks, storage and libraries, with a one-line justification each.
3. **System Components**: frontend, backend, storage schema, APIs.
4. **Data Models**: entities, their fields and relationships, and how data flows between them.
5. **API Specifications**: endpoints, request and response formats, authentication (if applicable).
6. **File Structure**: the project directory tree and what each file contains.
7. **Application Logic**: this section is required and must be detailed.
   - For games: rules, state machine (every state and transition), the game loop step by step, collision detection, movement, scoring, win and lose conditions, input mapping, and the behavior of every entity.
   - For web applications: business flows, state management, validation, and the handler for every user interaction.
   - For anything else: the core algorithms, business rules and event handling.
8. **Algorithms and Data Structures**: pseudocode for every major algorithm and the exact fields of every core data structure, including edge cases.
9. **User Interface Logic**: how input maps to state updates and visual feedback.
10. **Implementation Plan**: build order and dependencies between components.
11. **Non-Functional Requirements**: performance, security, error handling.

Never write vague instructions such as "implement the game loop". State exactly what happens, with concrete names, values and steps, so an engineer can implement the whole application from this document without further design work.

Output the design document in markdown."#
        )
    }
}
