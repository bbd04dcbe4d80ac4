//! Pipeline stages. Stage-specific behavior (document vs multi-file output)
//! switches on this enum rather than on action names.

use serde::{Deserialize, Serialize};

pub const PRD_PATH: &str = "docs/prd/prd.md";
pub const DESIGN_PATH: &str = "docs/system_design/system_design.md";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Requirements,
    Design,
    Code,
}

impl Stage {
    /// Name of the standard action that implements this stage.
    pub fn action_name(self) -> &'static str {
        match self {
            Stage::Requirements => "WritePRD",
            Stage::Design => "WriteDesign",
            Stage::Code => "WriteCode",
        }
    }

    /// Fixed project path for single-document stages.
    pub fn document_path(self) -> Option<&'static str> {
        match self {
            Stage::Requirements => Some(PRD_PATH),
            Stage::Design => Some(DESIGN_PATH),
            Stage::Code => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Requirements => write!(f, "requirements"),
            Stage::Design => write!(f, "design"),
            Stage::Code => write!(f, "code"),
        }
    }
}
