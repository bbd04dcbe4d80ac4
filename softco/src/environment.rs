//! The message bus: role registry, append-only history, and the tick that
//! gives every active role one turn.

use std::collections::HashMap;

use crate::context::RunContext;
use crate::error::EngineResult;
use crate::message::Message;
use crate::role::Role;

pub struct Environment {
    roles: Vec<Role>,
    index: HashMap<String, usize>,
    history: Vec<Message>,
    ctx: RunContext,
}

impl Environment {
    pub fn new(ctx: RunContext) -> Self {
        Self {
            roles: Vec::new(),
            index: HashMap::new(),
            history: Vec::new(),
            ctx,
        }
    }

    /// Register roles by name. Re-registering a name replaces the earlier
    /// role in place, keeping its position in turn order.
    pub fn add_roles(&mut self, roles: impl IntoIterator<Item = Role>) {
        for role in roles {
            match self.index.get(role.name()) {
                Some(&i) => {
                    tracing::debug!(role = %role.name(), "Replacing registered role");
                    self.roles[i] = role;
                }
                None => {
                    self.index.insert(role.name().to_string(), self.roles.len());
                    self.roles.push(role);
                }
            }
        }
    }

    /// Append to history, then offer the message to every role in
    /// registration order.
    pub fn publish(&mut self, message: Message) {
        tracing::debug!(
            role = %message.role(),
            cause_by = %message.cause_by(),
            seq = self.history.len(),
            "Publishing message"
        );
        self.history.push(message);
        if let Some(message) = self.history.last() {
            for role in &mut self.roles {
                role.observe(message);
            }
        }
    }

    pub fn is_idle(&self) -> bool {
        self.roles.iter().all(Role::is_idle)
    }

    /// Run each role that was active when the tick began, once, in
    /// registration order. Output is published immediately, so a later role
    /// in the same tick may already see it; roles it wakes up wait for the
    /// next tick.
    pub async fn tick(&mut self) -> EngineResult<()> {
        let active: Vec<usize> = self
            .roles
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.is_idle())
            .map(|(i, _)| i)
            .collect();

        for i in active {
            if let Some(message) = self.roles[i].run(&self.ctx).await {
                self.publish(message);
                self.ctx.enforce_budget()?;
            }
        }
        Ok(())
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn role(&self, name: &str) -> Option<&Role> {
        self.index.get(name).map(|&i| &self.roles[i])
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }
}
