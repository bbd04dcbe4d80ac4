//! Per-run state shared by the scheduler, bus, roles and actions.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cost::CostLedger;
use crate::error::EngineResult;
use crate::extract::Throttle;
use crate::llm::{Completion, LlmProvider};
use crate::progress::{ProgressEvent, ProgressSink};

/// Streaming knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamPolicy {
    /// Characters that must accumulate before a `stream_chunk` event.
    pub chunk_min_chars: usize,
    /// Or time since the last `stream_chunk`, whichever comes first.
    #[serde(with = "crate::millis")]
    pub chunk_interval: Duration,
    /// Upper bound on a single progress sink delivery.
    #[serde(with = "crate::millis")]
    pub sink_timeout: Duration,
    pub file_throttle: Throttle,
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self {
            chunk_min_chars: 20,
            chunk_interval: Duration::from_millis(500),
            sink_timeout: Duration::from_secs(2),
            file_throttle: Throttle::default(),
        }
    }
}

/// Everything one run needs, passed by reference down the call chain.
pub struct RunContext {
    llm: Arc<dyn LlmProvider>,
    ledger: Mutex<CostLedger>,
    progress: Option<Arc<dyn ProgressSink>>,
    project_name: Option<String>,
    policy: StreamPolicy,
}

impl RunContext {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            ledger: Mutex::new(CostLedger::default()),
            progress: None,
            project_name: None,
            policy: StreamPolicy::default(),
        }
    }

    pub fn with_budget(self, max_budget: f64) -> Self {
        self.set_budget(max_budget);
        self
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = Some(name.into());
        self
    }

    pub fn with_policy(mut self, policy: StreamPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn llm(&self) -> Arc<dyn LlmProvider> {
        Arc::clone(&self.llm)
    }

    pub fn project_name(&self) -> Option<&str> {
        self.project_name.as_deref()
    }

    pub fn policy(&self) -> &StreamPolicy {
        &self.policy
    }

    pub fn has_progress(&self) -> bool {
        self.progress.is_some()
    }

    pub fn set_budget(&self, max_budget: f64) {
        self.ledger.lock().max_budget = max_budget;
    }

    /// Snapshot of the ledger.
    pub fn ledger(&self) -> CostLedger {
        self.ledger.lock().clone()
    }

    pub fn charge(&self, completion: &Completion) {
        let mut ledger = self.ledger.lock();
        ledger.charge(
            completion.prompt_tokens,
            completion.completion_tokens,
            &completion.model,
        );
        tracing::debug!(
            model = %completion.model,
            total_cost = ledger.total_cost,
            max_budget = ledger.max_budget,
            "Charged LLM call"
        );
    }

    pub fn enforce_budget(&self) -> EngineResult<()> {
        self.ledger.lock().enforce_budget()
    }

    /// Deliver an event to the sink, if any. Never fails.
    pub async fn notify(&self, event: ProgressEvent) {
        let Some(sink) = &self.progress else {
            return;
        };
        let kind = event.kind();
        match tokio::time::timeout(self.policy.sink_timeout, sink.emit(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(event = kind, "Progress sink failed: {e:#}"),
            Err(_) => tracing::warn!(
                event = kind,
                timeout_ms = self.policy.sink_timeout.as_millis() as u64,
                "Progress sink timed out"
            ),
        }
    }
}
