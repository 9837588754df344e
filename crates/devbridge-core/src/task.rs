//! Task progress notifications sent by short-lived tools.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Which part of a task a [`TaskUpdate`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Start,
    Update,
    End,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Start => "start",
            StepType::Update => "update",
            StepType::End => "end",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepType {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(StepType::Start),
            "update" => Ok(StepType::Update),
            "end" => Ok(StepType::End),
            _ => Err(ParamError::StepType),
        }
    }
}

/// One step of progress on a numbered task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub task_number: u64,
    pub step_type: StepType,
    pub summary: String,
}

impl TaskUpdate {
    /// Validate loosely-typed tool parameters.
    ///
    /// Checks run in a fixed order (number, summary, step type) so callers get
    /// the same error for the same input.
    pub fn from_params(params: &Value) -> Result<Self, ParamError> {
        let params = params.as_object().ok_or(ParamError::NotAnObject)?;

        let task_number = match params.get("task_number") {
            Some(Value::Number(n)) => n.as_u64().ok_or(ParamError::TaskNumber)?,
            _ => return Err(ParamError::TaskNumber),
        };
        let summary = match params.get("summary") {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(ParamError::Summary),
        };
        let step_type = params
            .get("step_type")
            .and_then(Value::as_str)
            .ok_or(ParamError::StepType)?
            .parse()?;

        Ok(Self {
            task_number,
            step_type,
            summary,
        })
    }
}

/// Rejected task update parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    #[error("Invalid arguments: expected an object")]
    NotAnObject,
    #[error("Invalid arguments: task number must be a number")]
    TaskNumber,
    #[error("Invalid arguments: summary must be a string")]
    Summary,
    #[error("Invalid arguments: step_type must be \"start\", \"update\", or \"end\"")]
    StepType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_valid_params() {
        let update = TaskUpdate::from_params(&json!({
            "task_number": 5,
            "step_type": "update",
            "summary": "editing main.rs",
        }))
        .unwrap();
        assert_eq!(update.task_number, 5);
        assert_eq!(update.step_type, StepType::Update);
        assert_eq!(update.summary, "editing main.rs");
    }

    #[test]
    fn string_task_number_is_rejected() {
        let err = TaskUpdate::from_params(&json!({
            "task_number": "5",
            "step_type": "start",
            "summary": "x",
        }))
        .unwrap_err();
        assert_eq!(err, ParamError::TaskNumber);
    }

    #[test]
    fn fractional_task_number_is_rejected() {
        let err = TaskUpdate::from_params(&json!({
            "task_number": 1.5,
            "step_type": "start",
            "summary": "x",
        }))
        .unwrap_err();
        assert_eq!(err, ParamError::TaskNumber);
    }

    #[test]
    fn summary_checked_before_step_type() {
        let err = TaskUpdate::from_params(&json!({
            "task_number": 1,
            "step_type": "later",
            "summary": 3,
        }))
        .unwrap_err();
        assert_eq!(err, ParamError::Summary);
    }

    #[test]
    fn unknown_step_type() {
        let err = TaskUpdate::from_params(&json!({
            "task_number": 1,
            "step_type": "later",
            "summary": "x",
        }))
        .unwrap_err();
        assert_eq!(err, ParamError::StepType);
        assert!(err.to_string().contains("\"start\", \"update\", or \"end\""));
    }

    #[test]
    fn not_an_object() {
        assert_eq!(
            TaskUpdate::from_params(&json!([1, 2])).unwrap_err(),
            ParamError::NotAnObject
        );
    }
}
