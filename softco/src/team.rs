//! Round scheduler over one [`Environment`].

use crate::context::RunContext;
use crate::environment::Environment;
use crate::error::EngineResult;
use crate::message::Message;
use crate::role::Role;

pub struct Team {
    env: Environment,
}

impl Team {
    pub fn new(ctx: RunContext) -> Self {
        Self {
            env: Environment::new(ctx),
        }
    }

    pub fn hire(&mut self, roles: impl IntoIterator<Item = Role>) {
        self.env.add_roles(roles);
    }

    /// Set the spend limit for the run, in USD.
    pub fn set_budget(&mut self, amount: f64) {
        tracing::info!(budget = amount, "Budget set");
        self.env.context().set_budget(amount);
    }

    pub fn invest(&mut self, amount: f64) {
        self.set_budget(amount);
    }

    /// Seed the bus with `idea` and run up to `max_rounds` ticks.
    ///
    /// Stops early once every role is idle. Running out of rounds is not an
    /// error; exceeding the budget is, and leaves the partial history
    /// readable through [`Team::env`].
    pub async fn run(&mut self, max_rounds: usize, idea: &str) -> EngineResult<Vec<Message>> {
        self.env.publish(Message::user_requirement(idea));

        let mut remaining = max_rounds;
        while remaining > 0 {
            if self.env.is_idle() {
                tracing::info!(rounds = max_rounds - remaining, "All roles idle, run finished");
                break;
            }
            self.env.context().enforce_budget()?;
            remaining -= 1;
            tracing::debug!(round = max_rounds - remaining, "Starting round");
            self.env.tick().await?;
        }
        if remaining == 0 && !self.env.is_idle() {
            tracing::warn!(max_rounds, "Round limit reached with work pending");
        }

        Ok(self.env.history().to_vec())
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;
    use crate::role::standard_team;
    use std::sync::Arc;

    fn test_team(llm: ScriptedLlm) -> Team {
        let llm = Arc::new(llm);
        let mut team = Team::new(RunContext::new(llm.clone()));
        team.hire(standard_team(llm));
        team
    }

    #[tokio::test]
    async fn idle_bus_stops_before_rounds_run_out() {
        let mut team = test_team(
            ScriptedLlm::new("gpt-4")
                .with_reply("prd")
                .with_reply("design")
                .with_reply("FILE: a.py\nx\n"),
        );
        let history = team.run(10, "Create a calculator").await.unwrap();
        assert_eq!(history.len(), 4);
        assert!(team.env().is_idle());
    }

    #[tokio::test]
    async fn zero_rounds_returns_only_the_seed() {
        let mut team = test_team(ScriptedLlm::new("gpt-4"));
        let history = team.run(0, "idea").await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].is_user_requirement());
    }

    #[tokio::test]
    async fn exhausted_budget_stops_before_the_round() {
        let mut team = test_team(ScriptedLlm::new("gpt-4").with_reply("prd"));
        team.set_budget(0.0);
        let err = team.run(5, "idea").await.unwrap_err();
        assert!(err.is_budget_exceeded());
        assert_eq!(team.env().history().len(), 1);
    }
}
