//! Messages exchanged between roles on the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::stage::Stage;

/// `cause_by` of the seed message a run starts from.
pub const USER_REQUIREMENT: &str = "UserRequirement";

const STAGE_KEY: &str = "stage";
const ERROR_KEY: &str = "error";

/// One unit of communication. Immutable once built: the bus hands out
/// shared references and roles keep clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    content: String,
    role: String,
    cause_by: String,
    sent_from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    send_to: Option<String>,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl Message {
    /// A message produced by `role` running the action named `cause_by`.
    pub fn new(
        content: impl Into<String>,
        role: impl Into<String>,
        cause_by: impl Into<String>,
    ) -> Self {
        let role = role.into();
        Self {
            content: content.into(),
            sent_from: role.clone(),
            role,
            cause_by: cause_by.into(),
            send_to: None,
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    /// The seed message carrying the user's idea. It has no producing role.
    pub fn user_requirement(idea: impl Into<String>) -> Self {
        Self {
            content: idea.into(),
            role: String::new(),
            cause_by: USER_REQUIREMENT.to_string(),
            sent_from: String::new(),
            send_to: None,
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn with_send_to(mut self, target: impl Into<String>) -> Self {
        self.send_to = Some(target.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Tag the message with the stage that produced it.
    pub fn with_stage(self, stage: Stage) -> Self {
        self.with_metadata(STAGE_KEY, stage.to_string())
    }

    /// Mark the content as an error report rather than an artifact.
    pub fn as_error(self) -> Self {
        self.with_metadata(ERROR_KEY, true)
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn cause_by(&self) -> &str {
        &self.cause_by
    }

    pub fn sent_from(&self) -> &str {
        &self.sent_from
    }

    pub fn send_to(&self) -> Option<&str> {
        self.send_to.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn is_user_requirement(&self) -> bool {
        self.cause_by == USER_REQUIREMENT
    }

    pub fn stage(&self) -> Option<Stage> {
        let value = self.metadata.get(STAGE_KEY)?;
        serde_json::from_value(value.clone()).ok()
    }

    pub fn is_error(&self) -> bool {
        self.metadata
            .get(ERROR_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let preview: String = self.content.chars().take(100).collect();
        if preview.len() < self.content.len() {
            write!(f, "[{}] {}...", self.role, preview)
        } else {
            write!(f, "[{}] {}", self.role, preview)
        }
    }
}
