//! Host collaborator seams: the job store and instance-registry persistence.
//!
//! The core never talks to a host system directly. Everything it needs from the
//! job-management host goes through [`JobStore`], and the registry is persisted
//! through [`RegistryStore`]. [`crate::db::Database`] implements both on SQLite;
//! [`memory`] holds in-process versions.

pub mod definition;
pub mod memory;

use crate::error::WorkflowResult;
use crate::types::{JobHandle, TemplateMarker, WorkflowInstance};
use std::sync::Arc;

pub use memory::{MemoryJobStore, MemoryRegistryStore};

/// Narrow view of the host job-management system.
///
/// Job names are matched case-insensitively. Every write is durable when it returns.
pub trait JobStore: Send + Sync {
    /// All jobs in host enumeration order.
    fn list_jobs(&self) -> WorkflowResult<Vec<JobHandle>>;

    fn get_job(&self, name: &str) -> WorkflowResult<Option<JobHandle>>;

    /// Create a job from a definition. Fails with `DuplicateJob` if the name is taken.
    fn create_job(&self, name: &str, definition: &str) -> WorkflowResult<JobHandle>;

    /// Overwrite a job's definition. Like the host, this re-reads the `<disabled>`
    /// flag from the new definition when present.
    fn update_job(&self, job: &JobHandle, definition: &str) -> WorkflowResult<JobHandle>;

    fn set_enabled(&self, job: &JobHandle, enabled: bool) -> WorkflowResult<()>;

    /// Strip the membership marker so the job no longer sources a template.
    fn remove_template_marker(&self, job: &JobHandle) -> WorkflowResult<()>;

    fn delete_job(&self, job: &JobHandle) -> WorkflowResult<()>;

    /// Enqueue the job for execution.
    fn schedule_job(&self, job: &JobHandle) -> WorkflowResult<()>;

    /// Membership marker read from the job's definition.
    fn template_marker(&self, job: &JobHandle) -> Option<TemplateMarker> {
        definition::extract_marker(&job.definition)
    }
}

/// Durable storage for each container's instance registry.
pub trait RegistryStore: Send + Sync {
    fn load_instances(&self, container: &str) -> WorkflowResult<Vec<WorkflowInstance>>;

    /// Replace the container's stored registry atomically.
    fn save_instances(
        &self,
        container: &str,
        instances: &[Arc<WorkflowInstance>],
    ) -> WorkflowResult<()>;
}
