//! Roles: stateful participants on the bus.
//!
//! A role watches for messages caused by particular actions, queues them in
//! its inbox, and on its turn runs exactly one bound action over everything
//! queued. The result is returned as a new message for the bus to broadcast.
//!
//! ```text
//! Idle ──observe──► (inbox non-empty) ──run──► Selecting ► Acting ► Publishing ► Idle
//! ```

mod staff;

use std::collections::HashSet;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::actions::Action;
use crate::context::RunContext;
use crate::error::{EngineError, EngineResult};
use crate::extract::{FileEvent, StreamingFileExtractor};
use crate::llm::Completion;
use crate::message::Message;
use crate::progress::ProgressEvent;

pub use staff::{architect, engineer, product_manager, standard_team};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleState {
    Idle,
    Selecting,
    Acting,
    Publishing,
}

/// Picks which bound action a role runs for its current inbox.
pub trait ActionSelector: Send + Sync {
    fn select(&self, actions: &[Box<dyn Action>], news: &[Message]) -> Option<usize>;
}

/// Always the first bound action.
pub struct FirstAction;

impl ActionSelector for FirstAction {
    fn select(&self, actions: &[Box<dyn Action>], _news: &[Message]) -> Option<usize> {
        (!actions.is_empty()).then_some(0)
    }
}

impl<F> ActionSelector for F
where
    F: Fn(&[Box<dyn Action>], &[Message]) -> Option<usize> + Send + Sync,
{
    fn select(&self, actions: &[Box<dyn Action>], news: &[Message]) -> Option<usize> {
        self(actions, news)
    }
}

pub struct Role {
    name: String,
    profile: String,
    goal: String,
    constraints: String,
    actions: Vec<Box<dyn Action>>,
    watch: HashSet<String>,
    news: Vec<Message>,
    todo: Option<usize>,
    state: RoleState,
    selector: Box<dyn ActionSelector>,
}

impl std::fmt::Debug for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Role")
            .field("name", &self.name)
            .field("profile", &self.profile)
            .field("actions", &self.actions.iter().map(|a| a.name()).collect::<Vec<_>>())
            .field("watch", &self.watch)
            .field("news", &self.news.len())
            .field("state", &self.state)
            .finish()
    }
}

impl Role {
    pub fn new(name: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            profile: profile.into(),
            goal: String::new(),
            constraints: String::new(),
            actions: Vec::new(),
            watch: HashSet::new(),
            news: Vec::new(),
            todo: None,
            state: RoleState::Idle,
            selector: Box::new(FirstAction),
        }
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }

    pub fn with_constraints(mut self, constraints: impl Into<String>) -> Self {
        self.constraints = constraints.into();
        self
    }

    pub fn with_action(mut self, action: Box<dyn Action>) -> Self {
        self.actions.push(action);
        self
    }

    /// React to messages caused by these actions. An empty set reacts to
    /// everything.
    pub fn watching<I, S>(mut self, causes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.watch.extend(causes.into_iter().map(Into::into));
        self
    }

    pub fn with_selector(mut self, selector: impl ActionSelector + 'static) -> Self {
        self.selector = Box::new(selector);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn state(&self) -> RoleState {
        self.state
    }

    pub fn watches(&self) -> &HashSet<String> {
        &self.watch
    }

    pub fn news(&self) -> &[Message] {
        &self.news
    }

    pub fn action_names(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.name()).collect()
    }

    /// Queue `message` if it passes the watch filter. Returns whether it was
    /// queued.
    pub fn observe(&mut self, message: &Message) -> bool {
        if self.watch.is_empty() || self.watch.contains(message.cause_by()) {
            self.news.push(message.clone());
            true
        } else {
            false
        }
    }

    pub fn is_idle(&self) -> bool {
        self.news.is_empty() && self.todo.is_none()
    }

    /// System prompt for this role's LLM calls.
    pub fn system_prompt(&self) -> String {
        let mut prompt = format!("You are {}, a {}.", self.name, self.profile);
        if !self.goal.is_empty() {
            prompt.push_str(&format!(" Your goal is: {}.", self.goal.trim_end_matches('.')));
        }
        if !self.constraints.is_empty() {
            prompt.push_str(&format!(" Constraint: {}.", self.constraints.trim_end_matches('.')));
        }
        prompt
    }

    /// Take one turn. Returns the produced message, or `None` when idle.
    ///
    /// LLM failures do not escape: they become a message whose content is
    /// `Error during <action>: <cause>`, tagged as an error.
    pub async fn run(&mut self, ctx: &RunContext) -> Option<Message> {
        if self.is_idle() {
            return None;
        }

        self.state = RoleState::Selecting;
        let Some(index) = self
            .selector
            .select(&self.actions, &self.news)
            .filter(|i| *i < self.actions.len())
        else {
            tracing::warn!(role = %self.name, queued = self.news.len(), "No action selected, dropping inbox");
            self.news.clear();
            self.state = RoleState::Idle;
            return None;
        };
        self.todo = Some(index);

        let action = &self.actions[index];
        let action_name = action.name().to_string();
        let stage = action.stage();
        ctx.notify(ProgressEvent::RoleThinking {
            role: self.name.clone(),
            action: action_name.clone(),
        })
        .await;

        self.state = RoleState::Acting;
        tracing::info!(role = %self.name, action = %action_name, inputs = self.news.len(), "Role acting");
        ctx.notify(ProgressEvent::ActionStarted {
            role: self.name.clone(),
            action: action_name.clone(),
        })
        .await;

        let context = self
            .news
            .iter()
            .map(Message::content)
            .collect::<Vec<_>>()
            .join("\n");
        let system = self.system_prompt();

        ctx.notify(ProgressEvent::ActionExecuting {
            role: self.name.clone(),
            action: action_name.clone(),
        })
        .await;

        let mut extractor = StreamingFileExtractor::for_stage(
            stage,
            ctx.project_name().map(str::to_string),
            ctx.policy().file_throttle,
        );
        let result = if ctx.has_progress() {
            execute_streaming(&self.name, action.as_ref(), &context, &system, ctx, &mut extractor).await
        } else {
            action.execute(&context, Some(&system), None).await
        };

        self.state = RoleState::Publishing;
        let message = match result {
            Ok(completion) => {
                ctx.charge(&completion);
                if ctx.has_progress() {
                    for event in extractor.finish(&completion.text) {
                        ctx.notify(file_event(&self.name, event)).await;
                    }
                }
                ctx.notify(ProgressEvent::ActionCompleted {
                    role: self.name.clone(),
                    action: action_name.clone(),
                    chars: completion.text.chars().count(),
                })
                .await;
                tracing::info!(
                    role = %self.name,
                    action = %action_name,
                    prompt_tokens = completion.prompt_tokens,
                    completion_tokens = completion.completion_tokens,
                    "Action completed"
                );
                Message::new(completion.text, self.name.clone(), action_name)
            }
            Err(e) => {
                let cause = match e {
                    EngineError::LlmCallFailed { source, .. } => format!("{source:#}"),
                    other => other.to_string(),
                };
                let content = format!("Error during {action_name}: {cause}");
                tracing::error!(role = %self.name, action = %action_name, "{content}");
                ctx.notify(ProgressEvent::Error {
                    role: self.name.clone(),
                    action: action_name.clone(),
                    message: content.clone(),
                })
                .await;
                Message::new(content, self.name.clone(), action_name).as_error()
            }
        };
        let message = match stage {
            Some(stage) => message.with_stage(stage),
            None => message,
        };

        self.news.clear();
        self.todo = None;
        self.state = RoleState::Idle;
        Some(message)
    }
}

/// Drive the action with a chunk channel, polling the LLM call and the
/// chunk consumer together on this task.
async fn execute_streaming(
    role: &str,
    action: &dyn Action,
    context: &str,
    system: &str,
    ctx: &RunContext,
    extractor: &mut StreamingFileExtractor,
) -> EngineResult<Completion> {
    let policy = *ctx.policy();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let call = action.execute(context, Some(system), Some(tx));
    let consume = async {
        let mut accumulated = String::new();
        let mut pending = String::new();
        let mut last_emit = Instant::now();

        while let Some(chunk) = rx.recv().await {
            accumulated.push_str(&chunk);
            pending.push_str(&chunk);

            if pending.chars().count() >= policy.chunk_min_chars
                || last_emit.elapsed() >= policy.chunk_interval
            {
                ctx.notify(ProgressEvent::StreamChunk {
                    role: role.to_string(),
                    action: action.name().to_string(),
                    chunk: std::mem::take(&mut pending),
                    accumulated: accumulated.clone(),
                })
                .await;
                last_emit = Instant::now();
            }

            for event in extractor.feed(&accumulated) {
                ctx.notify(file_event(role, event)).await;
            }
        }

        if !pending.is_empty() {
            ctx.notify(ProgressEvent::StreamChunk {
                role: role.to_string(),
                action: action.name().to_string(),
                chunk: pending,
                accumulated,
            })
            .await;
        }
    };

    let (result, ()) = tokio::join!(call, consume);
    result
}

fn file_event(role: &str, event: FileEvent) -> ProgressEvent {
    let role = role.to_string();
    match event {
        FileEvent::Opened { path } => ProgressEvent::FileOpened { role, path },
        FileEvent::Content { path, content } => ProgressEvent::FileContent {
            role,
            path,
            content,
        },
        FileEvent::Complete { path, content } => ProgressEvent::FileComplete {
            role,
            path,
            content,
        },
    }
}
