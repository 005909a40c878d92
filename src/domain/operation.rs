use std::fmt::Display;

use chrono::NaiveDateTime;
use serde::{Serialize, Deserialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid operation status value: '{0}'.")]
pub struct OperationStatusParseError(String);

impl TryFrom<&str> for OperationStatus {
    type Error = OperationStatusParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().trim() {
            "pending" => Ok(OperationStatus::Pending),
            "running" => Ok(OperationStatus::Running),
            "completed" => Ok(OperationStatus::Completed),
            "failed" => Ok(OperationStatus::Failed),
            "cancelled" => Ok(OperationStatus::Cancelled),
            _ => Err(OperationStatusParseError(value.to_string()))
        }
    }
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Running => "running",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled"
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled)
    }
}

impl Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warn,
    Error
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error"
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationLog {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: NaiveDateTime
}

/// A queue-scheduled job. The queue owns persistence and dispatch; the core
/// only publishes status, progress and log lines into it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub op_type: String,
    pub status: OperationStatus,
    pub progress: u8,
    pub created_at: NaiveDateTime,
    pub description: String,
    pub logs: Vec<OperationLog>
}

impl Operation {
    pub fn new<S>(op_type: S, description: S, now: NaiveDateTime) -> Self
    where S: Into<String>
    {
        Self {
            id: Uuid::new_v4(),
            op_type: op_type.into(),
            status: OperationStatus::Pending,
            progress: 0,
            created_at: now,
            description: description.into(),
            logs: Vec::new()
        }
    }
}
