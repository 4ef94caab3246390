//! Step definitions shared by the saga instance, the resolvers and the
//! step-execution commands.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discriminator selecting the executor that performs a step
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionType(String);

impl ExecutionType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExecutionType {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ExecutionType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub step_id: Uuid,
    pub order: i32,
    pub execution_type: ExecutionType,
    pub status: StepStatus,
}

impl StepDefinition {
    pub fn new(order: i32, execution_type: impl Into<ExecutionType>) -> Self {
        Self {
            step_id: Uuid::new_v4(),
            order,
            execution_type: execution_type.into(),
            status: StepStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_status_serde() {
        assert_eq!(
            serde_json::to_value(StepStatus::Completed).unwrap(),
            serde_json::json!("completed")
        );
        assert!(StepStatus::Failed.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
    }

    #[test]
    fn test_execution_type_is_transparent() {
        let step = StepDefinition::new(1, "classify");
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["execution_type"], "classify");
        assert_eq!(json["status"], "pending");
    }
}
