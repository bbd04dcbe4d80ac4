use std::collections::VecDeque;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ChunkSender, Completion, LlmProvider, estimate_tokens};

enum Step {
    Reply(String),
    Fail(String),
}

/// Deterministic provider that replays queued responses in order.
///
/// Streaming calls deliver the reply in fixed-size chunks, yielding to the
/// runtime between chunks so consumers see a real interleaving.
pub struct ScriptedLlm {
    model: String,
    chunk_size: usize,
    steps: Mutex<VecDeque<Step>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            chunk_size: 16,
            steps: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.steps.lock().push_back(Step::Reply(text.into()));
        self
    }

    /// Queue a failing call.
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.steps.lock().push_back(Step::Fail(message.into()));
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Canned PRD, design and code replies for an offline dry run of `idea`.
    pub fn offline(idea: &str) -> Self {
        let title = idea.lines().next().unwrap_or(idea).trim();
        Self::new("gpt-4o-mini")
            .with_reply(format!(
                "# Product Requirements Document\n\n## Product Goals\n- {title}\n\n\
                 ## User Stories\n- As a user, I want {title} so that I can get work done\n\n\
                 ## Requirements\n- P0: core workflow for {title}\n"
            ))
            .with_reply(
                "# System Design\n\n## Implementation Approach\nA single Python module with a small CLI.\n\n\
                 ## File List\n- main.py\n- README.md\n",
            )
            .with_reply(format!(
                "FILE: src/main.py\n---\ndef main():\n    print(\"{}\")\n\n\nif __name__ == \"__main__\":\n    main()\n---\n\
                 FILE: src/README.md\n---\n# {title}\n\nRun `python main.py`.\n---\n",
                title.replace('"', "'")
            ))
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model(&self) -> &str {
        &self.model
    }

    async fn invoke(
        &self,
        prompt: &str,
        system: Option<&str>,
        on_chunk: Option<ChunkSender>,
    ) -> Result<Completion> {
        self.prompts.lock().push(prompt.to_string());
        let step = self.steps.lock().pop_front();
        let text = match step {
            Some(Step::Reply(text)) => text,
            Some(Step::Fail(message)) => anyhow::bail!(message),
            None => anyhow::bail!("Scripted LLM has no replies left"),
        };

        if let Some(tx) = on_chunk {
            let chars: Vec<char> = text.chars().collect();
            for piece in chars.chunks(self.chunk_size) {
                let _ = tx.send(piece.iter().collect());
                tokio::task::yield_now().await;
            }
        }

        Ok(Completion {
            prompt_tokens: estimate_tokens(prompt) + system.map(estimate_tokens).unwrap_or(0),
            completion_tokens: estimate_tokens(&text),
            model: self.model.clone(),
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn replies_are_replayed_in_order() {
        let llm = ScriptedLlm::new("gpt-4").with_reply("one").with_reply("two");
        assert_eq!(llm.invoke("p1", None, None).await.unwrap().text, "one");
        assert_eq!(llm.invoke("p2", Some("sys"), None).await.unwrap().text, "two");
        assert!(llm.invoke("p3", None, None).await.is_err());
        assert_eq!(llm.prompts(), vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn streaming_delivers_all_chunks() {
        let llm = ScriptedLlm::new("gpt-4")
            .with_reply("FILE: a.py\nprint(1)\n")
            .with_chunk_size(3);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let completion = llm.invoke("p", None, Some(tx)).await.unwrap();

        let mut joined = String::new();
        while let Some(chunk) = rx.recv().await {
            assert!(chunk.chars().count() <= 3);
            joined.push_str(&chunk);
        }
        assert_eq!(joined, completion.text);
    }

    #[tokio::test]
    async fn failures_surface_as_errors() {
        let llm = ScriptedLlm::new("gpt-4").with_failure("rate limited");
        let err = llm.invoke("p", None, None).await.unwrap_err();
        assert_eq!(err.to_string(), "rate limited");
        assert_eq!(llm.remaining(), 0);
    }

    #[test]
    fn offline_script_covers_every_stage() {
        let llm = ScriptedLlm::offline("Create a calculator");
        assert_eq!(llm.remaining(), 3);
    }
}
