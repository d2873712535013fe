//! Core types shared by the template engine, the instance registry and the control plane.

use crate::error::{BusyState, WorkflowError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Parameter name -> value. Sorted so forms and summaries list parameters stably.
pub type ParameterMap = BTreeMap<String, String>;

/// Template job name -> concrete materialized job name.
pub type JobMapping = BTreeMap<String, String>;

/// Case-insensitive name comparison used for template, instance and job names.
pub fn same_name(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

/// Snapshot of one job as seen in the host job store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub name: String,
    /// Serialized (XML-bearing) definition text.
    pub definition: String,
    pub enabled: bool,
    pub building: bool,
    pub queued: bool,
}

impl JobHandle {
    /// Whether the host scheduler currently holds this job.
    pub fn busy_state(&self) -> Option<BusyState> {
        if self.building {
            Some(BusyState::Building)
        } else if self.queued {
            Some(BusyState::Queued)
        } else {
            None
        }
    }
}

/// Template-membership marker carried by a template source job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMarker {
    /// Raw comma-separated template names.
    pub template_names: String,
    /// Scheduled when the workflow is executed.
    #[serde(default)]
    pub starting_job: bool,
}

impl TemplateMarker {
    pub fn new(template_names: impl Into<String>) -> Self {
        Self {
            template_names: template_names.into(),
            starting_job: false,
        }
    }

    pub fn starting(mut self) -> Self {
        self.starting_job = true;
        self
    }

    /// Trimmed, non-empty template names in marker order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.template_names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    pub fn belongs_to(&self, template_name: &str) -> bool {
        let wanted = template_name.trim();
        self.names().any(|name| same_name(name, wanted))
    }
}

/// Lifecycle status of a recorded instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InstanceStatus {
    #[default]
    Active,
    /// A host failure interrupted materialization; some jobs may hold stale content.
    Degraded { failed_job: String, reason: String },
}

impl InstanceStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, InstanceStatus::Degraded { .. })
    }
}

/// A named binding of a template's jobs to concrete job names and parameter values.
///
/// Instances are immutable snapshots: the registry swaps in a new value on every update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub instance_name: String,
    pub template_name: String,
    pub job_parameters: ParameterMap,
    pub related_jobs: JobMapping,
    /// Concrete job name -> whether this instance created it. Gates deletion.
    pub created_by_instance: BTreeMap<String, bool>,
    #[serde(default)]
    pub status: InstanceStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl WorkflowInstance {
    /// Registry key: instance names are unique case-insensitively.
    pub fn key(&self) -> String {
        instance_key(&self.instance_name)
    }

    pub fn was_created_by_instance(&self, job_name: &str) -> bool {
        self.created_by_instance
            .get(job_name)
            .copied()
            .unwrap_or(false)
    }

    /// Concrete job names in template-job order.
    pub fn concrete_jobs(&self) -> impl Iterator<Item = &str> {
        self.related_jobs.values().map(String::as_str)
    }
}

pub fn instance_key(instance_name: &str) -> String {
    instance_name.trim().to_lowercase()
}

/// Submit operation named by the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            other => Err(WorkflowError::validation(
                "template.operation",
                format!("Unknown operation: '{}'", other),
            )),
        }
    }
}

/// Value of the staged selection that selects the create form.
pub const CREATE_NEW_SELECTION: &str = "template.createNewTemplate";

/// Which instance subsequent form reads describe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "instance", rename_all = "snake_case")]
pub enum ActiveSelection {
    #[default]
    None,
    CreateNew,
    Instance(String),
}

impl ActiveSelection {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            ActiveSelection::None
        } else if raw == CREATE_NEW_SELECTION {
            ActiveSelection::CreateNew
        } else {
            ActiveSelection::Instance(raw.to_string())
        }
    }
}

/// Severity of a name check, doubling as the presentation's css class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckLevel {
    Info,
    Warning,
    Error,
}

/// Result of validating a prospective job or instance name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameCheck {
    #[serde(rename = "cssClass")]
    pub level: CheckLevel,
    pub msg: String,
    pub result: bool,
}

impl NameCheck {
    pub fn valid() -> Self {
        Self {
            level: CheckLevel::Info,
            msg: "Valid name".to_string(),
            result: true,
        }
    }

    pub fn warning(msg: impl Into<String>) -> Self {
        Self {
            level: CheckLevel::Warning,
            msg: msg.into(),
            result: true,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            level: CheckLevel::Error,
            msg: msg.into(),
            result: false,
        }
    }
}

/// What a successful submit did to each concrete job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReport {
    pub operation: Operation,
    pub instance: WorkflowInstance,
    pub created: Vec<String>,
    pub reused: Vec<String>,
    pub updated: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshFailure {
    pub instance: String,
    pub reason: String,
}

/// Result of refreshing every instance. Partial success is the normal case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub updated: Vec<String>,
    pub not_updated: Vec<RefreshFailure>,
}

impl RefreshSummary {
    pub fn message(&self) -> String {
        let mut parts = Vec::new();
        if !self.not_updated.is_empty() {
            let failed: Vec<String> = self
                .not_updated
                .iter()
                .map(|f| format!("{} ({})", f.instance, f.reason))
                .collect();
            parts.push(format!(
                "{} workflows have not been updated: {}",
                self.not_updated.len(),
                failed.join(", ")
            ));
        }
        if !self.updated.is_empty() {
            parts.push(format!(
                "{} workflows have been updated: {}",
                self.updated.len(),
                self.updated.join(", ")
            ));
        }
        if parts.is_empty() {
            "No workflows to update".to_string()
        } else {
            parts.join("; ")
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteReport {
    pub instance: String,
    pub scheduled: Vec<String>,
}

impl ExecuteReport {
    pub fn message(&self) -> String {
        let names: Vec<String> = self.scheduled.iter().map(|n| format!("'{}'", n)).collect();
        format!("{} scheduled", names.join(", "))
    }
}

impl SubmitReport {
    pub fn message(&self) -> String {
        let verb = match self.operation {
            Operation::Create => "created",
            Operation::Update => "updated",
        };
        format!("Workflow '{}' {}", self.instance.instance_name, verb)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteReport {
    pub instance: String,
    pub deleted_jobs: Vec<String>,
    pub kept_jobs: Vec<String>,
}

impl DeleteReport {
    pub fn message(&self) -> String {
        format!("Workflow '{}' deleted", self.instance)
    }
}

/// A template's jobs and parameters, used to build a user-facing form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateDescription {
    pub template_name: String,
    pub jobs: Vec<String>,
    /// Parameter name -> current value (None when never bound).
    pub parameters: BTreeMap<String, Option<String>>,
}

impl TemplateDescription {
    pub fn message(&self) -> String {
        format!(
            "Template '{}' has {} jobs and {} parameters",
            self.template_name,
            self.jobs.len(),
            self.parameters.len()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSlot {
    pub template_job: String,
    pub target: Option<String>,
}

/// Form model for the currently staged selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FormView {
    Idle {
        msg: String,
    },
    Create {
        template_name: String,
        jobs: Vec<JobSlot>,
        parameters: BTreeMap<String, Option<String>>,
    },
    Update {
        instance_name: String,
        template_name: String,
        jobs: Vec<JobSlot>,
        parameters: BTreeMap<String, Option<String>>,
        status: InstanceStatus,
    },
}

impl FormView {
    pub fn message(&self) -> String {
        match self {
            FormView::Idle { msg } => msg.clone(),
            FormView::Create { template_name, .. } => {
                format!("Create a workflow from template '{}'", template_name)
            }
            FormView::Update { instance_name, .. } => {
                format!("Update workflow '{}'", instance_name)
            }
        }
    }
}
