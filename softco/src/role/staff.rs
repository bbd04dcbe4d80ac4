//! The standard company: product manager, architect, engineer.

use std::sync::Arc;

use super::Role;
use crate::actions::{WriteCode, WriteDesign, WritePrd};
use crate::llm::LlmProvider;
use crate::message::USER_REQUIREMENT;
use crate::stage::Stage;

pub fn product_manager(llm: Arc<dyn LlmProvider>) -> Role {
    Role::new("Alice", "Product Manager")
        .with_goal("Create a comprehensive Product Requirements Document")
        .with_constraints("Use the same language as the user requirement")
        .with_action(Box::new(WritePrd::new(llm)))
        .watching([USER_REQUIREMENT])
}

pub fn architect(llm: Arc<dyn LlmProvider>) -> Role {
    Role::new("Bob", "Architect")
        .with_goal("Design a concise, usable, complete software system")
        .with_constraints("Use simple architecture and appropriate open source libraries")
        .with_action(Box::new(WriteDesign::new(llm)))
        .watching([Stage::Requirements.action_name()])
}

pub fn engineer(llm: Arc<dyn LlmProvider>) -> Role {
    Role::new("Charlie", "Engineer")
        .with_goal("Write clean, efficient, production-ready code")
        .with_constraints("Follow best practices and coding standards")
        .with_action(Box::new(WriteCode::new(llm)))
        .watching([Stage::Design.action_name()])
}

/// All three, in pipeline order.
pub fn standard_team(llm: Arc<dyn LlmProvider>) -> Vec<Role> {
    vec![
        product_manager(Arc::clone(&llm)),
        architect(Arc::clone(&llm)),
        engineer(llm),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;

    #[test]
    fn each_role_watches_the_previous_stage() {
        let team = standard_team(Arc::new(ScriptedLlm::new("gpt-4")));
        let names: Vec<&str> = team.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["Alice", "Bob", "Charlie"]);

        assert!(team[0].watches().contains(USER_REQUIREMENT));
        assert!(team[1].watches().contains("WritePRD"));
        assert!(team[2].watches().contains("WriteDesign"));
        assert_eq!(team[2].action_names(), vec!["WriteCode"]);
    }
}
