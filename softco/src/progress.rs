//! Progress events emitted while a run is in flight, and the sinks that
//! consume them.
//!
//! A sink is purely an observer. Delivery is bounded by a timeout and
//! failures are logged and dropped, so a slow or broken sink can never stall
//! or fail a run.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Everything a run reports about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    RoleThinking {
        role: String,
        action: String,
    },
    ActionStarted {
        role: String,
        action: String,
    },
    ActionExecuting {
        role: String,
        action: String,
    },
    /// Throttled batch of streamed text. `chunk` is what arrived since the
    /// previous event, `accumulated` the whole output so far.
    StreamChunk {
        role: String,
        action: String,
        chunk: String,
        accumulated: String,
    },
    FileOpened {
        role: String,
        path: String,
    },
    FileContent {
        role: String,
        path: String,
        content: String,
    },
    /// Authoritative final content for `path`.
    FileComplete {
        role: String,
        path: String,
        content: String,
    },
    ActionCompleted {
        role: String,
        action: String,
        chars: usize,
    },
    Error {
        role: String,
        action: String,
        message: String,
    },
}

impl ProgressEvent {
    pub fn role(&self) -> &str {
        match self {
            ProgressEvent::RoleThinking { role, .. }
            | ProgressEvent::ActionStarted { role, .. }
            | ProgressEvent::ActionExecuting { role, .. }
            | ProgressEvent::StreamChunk { role, .. }
            | ProgressEvent::FileOpened { role, .. }
            | ProgressEvent::FileContent { role, .. }
            | ProgressEvent::FileComplete { role, .. }
            | ProgressEvent::ActionCompleted { role, .. }
            | ProgressEvent::Error { role, .. } => role,
        }
    }

    /// Event name as it appears in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::RoleThinking { .. } => "role_thinking",
            ProgressEvent::ActionStarted { .. } => "action_started",
            ProgressEvent::ActionExecuting { .. } => "action_executing",
            ProgressEvent::StreamChunk { .. } => "stream_chunk",
            ProgressEvent::FileOpened { .. } => "file_opened",
            ProgressEvent::FileContent { .. } => "file_content",
            ProgressEvent::FileComplete { .. } => "file_complete",
            ProgressEvent::ActionCompleted { .. } => "action_completed",
            ProgressEvent::Error { .. } => "error",
        }
    }
}

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, event: ProgressEvent) -> anyhow::Result<()>;
}

/// One-line `[role] emoji text` status output on stdout.
pub struct ConsoleSink {
    width: usize,
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self { width: 120 }
    }
}

impl ConsoleSink {
    pub fn new(width: usize) -> Self {
        Self { width }
    }

    /// Render an event, or `None` for events too chatty for a terminal.
    pub fn format(&self, event: &ProgressEvent) -> Option<String> {
        let (emoji, text) = match event {
            ProgressEvent::RoleThinking { action, .. } => ("🤔", format!("Thinking about {action}")),
            ProgressEvent::ActionStarted { action, .. } => ("🔧", format!("Starting {action}")),
            ProgressEvent::ActionExecuting { .. } | ProgressEvent::StreamChunk { .. } => return None,
            ProgressEvent::FileOpened { path, .. } => ("📄", path.clone()),
            ProgressEvent::FileContent { .. } => return None,
            ProgressEvent::FileComplete { path, content, .. } => {
                ("📁", format!("{path} ({} lines)", content.lines().count()))
            }
            ProgressEvent::ActionCompleted { action, chars, .. } => {
                ("✅", format!("{action} done ({chars} chars)"))
            }
            ProgressEvent::Error { message, .. } => ("❌", message.clone()),
        };
        let line = format!("[{}] {} {}", event.role(), emoji, text);
        Some(wrap_lines(&line, self.width).join("\n    "))
    }
}

#[async_trait]
impl ProgressSink for ConsoleSink {
    async fn emit(&self, event: ProgressEvent) -> anyhow::Result<()> {
        if let Some(line) = self.format(&event) {
            println!("{line}");
        }
        Ok(())
    }
}

/// One JSON object per line, for external tooling.
pub struct JsonLinesSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesSink {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

#[async_trait]
impl ProgressSink for JsonLinesSink {
    async fn emit(&self, event: ProgressEvent) -> anyhow::Result<()> {
        let line = serde_json::to_string(&event)?;
        let mut out = self.out.lock();
        writeln!(out, "{line}").context("Failed to write progress event")?;
        out.flush()?;
        Ok(())
    }
}

/// Forwards events over a bounded channel, e.g. to a websocket layer.
pub struct ChannelSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ProgressSink for ChannelSink {
    async fn emit(&self, event: ProgressEvent) -> anyhow::Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| anyhow::anyhow!("Progress receiver dropped"))
    }
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// Final content per path from `file_complete` events, last one winning.
    pub fn completed_files(&self) -> BTreeMap<String, String> {
        let mut files = BTreeMap::new();
        for event in self.events.lock().iter() {
            if let ProgressEvent::FileComplete { path, content, .. } = event {
                files.insert(path.clone(), content.clone());
            }
        }
        files
    }
}

#[async_trait]
impl ProgressSink for CollectingSink {
    async fn emit(&self, event: ProgressEvent) -> anyhow::Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Wrap text into lines of max_len, breaking on word boundaries.
fn wrap_lines(text: &str, max_len: usize) -> Vec<String> {
    let mut result = Vec::new();
    for line in text.lines() {
        if line.chars().count() <= max_len {
            result.push(line.to_string());
            continue;
        }
        let mut current = String::new();
        for word in line.split_whitespace() {
            if !current.is_empty() && current.chars().count() + word.chars().count() + 1 > max_len {
                result.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            result.push(current);
        }
    }
    if result.is_empty() {
        result.push(String::new());
    }
    result
}
