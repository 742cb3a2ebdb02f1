//! Built-in workflow step type names

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Step types shipped with the engine
///
/// The registry is keyed by plain strings so embedders can add their own types;
/// this enum only names the ones the engine itself knows about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStepType {
    /// Search a document collection
    Retrieval,

    /// LLM text completion
    Completion,

    /// Boolean branch on an expression
    Conditional,

    /// Call an external HTTP endpoint
    HttpRequest,
}

impl BuiltinStepType {
    pub const ALL: [BuiltinStepType; 4] = [
        Self::Retrieval,
        Self::Completion,
        Self::Conditional,
        Self::HttpRequest,
    ];

    /// Registry key for this step type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retrieval => "retrieval",
            Self::Completion => "completion",
            Self::Conditional => "conditional",
            Self::HttpRequest => "http_request",
        }
    }
}

impl fmt::Display for BuiltinStepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuiltinStepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown built-in step type: {}", s))
    }
}

/// Registry key of the conditional step, whose output selects the next step
pub const CONDITIONAL_STEP_TYPE: &str = "conditional";
