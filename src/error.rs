//! Error taxonomy and the structured outcome returned by control-plane operations.

use crate::types::NameCheck;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Rejected before any mutation
    ValidationFailed,
    LockTimeout,

    // Lookups
    NotFound,

    // Host state forbids the operation right now
    PreconditionFailed,
    DuplicateName,

    // Collaborator failures
    HostSystemError,
}

/// Why a job blocks an operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BusyState {
    Building,
    Queued,
}

impl fmt::Display for BusyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusyState::Building => write!(f, "is currently building"),
            BusyState::Queued => write!(f, "is in the build queue"),
        }
    }
}

/// Domain error for every core operation.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A required field is blank, a name collides, or a request is malformed.
    #[error("{message}")]
    Validation { field: String, message: String },

    /// The mutual-exclusion gate was not acquired in time.
    #[error(
        "Could not acquire lock within {waited_ms} ms for '{operation}'. Another operation is in progress."
    )]
    LockTimeout { operation: String, waited_ms: u64 },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Workflow not found: {0}")]
    InstanceNotFound(String),

    #[error("Template '{0}' does not resolve to any jobs")]
    TemplateNotFound(String),

    /// A related job is building or queued.
    #[error("Job {job} {state}")]
    JobBusy { job: String, state: BusyState },

    #[error("Starting job(s) not defined for workflow '{0}'")]
    NoStartingJobs(String),

    #[error("Job already defined with name: '{0}'")]
    DuplicateJob(String),

    /// Any failure reported by the job store or registry storage.
    #[error("{0}")]
    Host(String),
}

impl WorkflowError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Error for a required request field that is missing or blank.
    pub fn blank(field: &str) -> Self {
        Self::validation(field, format!("Must not be blank: {}", field))
    }

    pub fn host(err: impl fmt::Display) -> Self {
        Self::Host(err.to_string())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            WorkflowError::Validation { .. } => ErrorCode::ValidationFailed,
            WorkflowError::LockTimeout { .. } => ErrorCode::LockTimeout,
            WorkflowError::JobNotFound(_)
            | WorkflowError::InstanceNotFound(_)
            | WorkflowError::TemplateNotFound(_) => ErrorCode::NotFound,
            WorkflowError::JobBusy { .. } | WorkflowError::NoStartingJobs(_) => {
                ErrorCode::PreconditionFailed
            }
            WorkflowError::DuplicateJob(_) => ErrorCode::DuplicateName,
            WorkflowError::Host(_) => ErrorCode::HostSystemError,
        }
    }

    /// Request field the error refers to, when there is one.
    pub fn field(&self) -> Option<&str> {
        match self {
            WorkflowError::Validation { field, .. } if !field.is_empty() => Some(field),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for WorkflowError {
    fn from(err: rusqlite::Error) -> Self {
        WorkflowError::host(err)
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        WorkflowError::host(err)
    }
}

impl From<std::io::Error> for WorkflowError {
    fn from(err: std::io::Error) -> Self {
        WorkflowError::host(err)
    }
}

// Allow using ? with anyhow errors by converting them
impl From<anyhow::Error> for WorkflowError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<WorkflowError>() {
            Ok(workflow_err) => workflow_err,
            Err(err) => WorkflowError::host(err),
        }
    }
}

/// Result type for core operations.
pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;

/// Structured result handed to the presentation layer: a success flag and a message,
/// never an unhandled fault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub result: bool,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Outcome {
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            result: true,
            msg: msg.into(),
            code: None,
            field: None,
            data: None,
        }
    }

    pub fn failure(err: &WorkflowError) -> Self {
        Self {
            result: false,
            msg: err.to_string(),
            code: Some(err.code()),
            field: err.field().map(String::from),
            data: None,
        }
    }

    /// Attach a serialisable payload. Serialisation failures drop the payload.
    pub fn with_data<T: Serialize>(mut self, data: &T) -> Self {
        self.data = serde_json::to_value(data).ok();
        self
    }

    /// A name check: `result` mirrors the check, which is also the payload.
    pub fn from_check(check: &NameCheck) -> Self {
        Self {
            result: check.result,
            msg: check.msg.clone(),
            code: None,
            field: None,
            data: None,
        }
        .with_data(check)
    }

    /// Convert a core result, rendering the success message from the value.
    pub fn from_result<T, F>(result: WorkflowResult<T>, message: F) -> Self
    where
        T: Serialize,
        F: FnOnce(&T) -> String,
    {
        match result {
            Ok(value) => Outcome::ok(message(&value)).with_data(&value),
            Err(err) => Outcome::failure(&err),
        }
    }
}
