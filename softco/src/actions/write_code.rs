use std::sync::Arc;

use super::Action;
use crate::llm::LlmProvider;
use crate::stage::Stage;

/// Code stage: design in, `FILE:` transcript out.
pub struct WriteCode {
    llm: Arc<dyn LlmProvider>,
}

impl WriteCode {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

impl Action for WriteCode {
    fn name(&self) -> &str {
        Stage::Code.action_name()
    }

    fn stage(&self) -> Option<Stage> {
        Some(Stage::Code)
    }

    fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    fn build_prompt(&self, context: &str) -> String {
        format!(
            r#"You are a Senior Software Engineer. Implement the complete, working application described by the system design below.

System Design Document:
{context}

Requirements:
- Write every file the design lists, fully implemented. No placeholders, stubs, empty functions or TODOs.
- Implement all of the application logic: for a game the loop, rendering, input, scoring and win/lose conditions; for a web app every page, endpoint and data operation.
- Include dependency manifests (package.json, requirements.txt or equivalent) and a README.md with setup instructions.
- Comments belong inside the code files. Write no prose outside of files.

OUTPUT FORMAT (STRICT):
FILE: path/to/file1.ext
---
<complete file content>
---

FILE: path/to/file2.ext
---
<complete file content>
---

Start directly with the first FILE: line and stop after the closing --- of the last file."#
        )
    }
}
