//! Execution and deletion of recorded instances.

use super::WorkflowContainer;
use crate::error::{BusyState, WorkflowError, WorkflowResult};
use crate::types::{DeleteReport, ExecuteReport, JobHandle, same_name};
use std::collections::BTreeMap;
use tracing::{error, info};

impl WorkflowContainer {
    /// Schedule the concrete job of every starting template job.
    ///
    /// The starting flag is read from the template job's marker at call time.
    pub fn execute_workflow(&self, instance_name: &str) -> WorkflowResult<ExecuteReport> {
        let _guard = self.gate.acquire("execute_workflow")?;

        let instance = self
            .registry
            .get(instance_name)
            .ok_or_else(|| WorkflowError::InstanceNotFound(instance_name.to_string()))?;

        let mut scheduled = Vec::new();
        for (template_job, target) in &instance.related_jobs {
            let source = self.require_job(template_job)?;
            let starting = self
                .jobs
                .template_marker(&source)
                .is_some_and(|marker| marker.starting_job);
            if !starting {
                continue;
            }
            let job = self.require_job(target)?;
            self.jobs.schedule_job(&job)?;
            info!(container = %self.name, instance = %instance.instance_name, job = %job.name, "Job scheduled");
            scheduled.push(job.name);
        }

        if scheduled.is_empty() {
            return Err(WorkflowError::NoStartingJobs(
                instance.instance_name.clone(),
            ));
        }
        Ok(ExecuteReport {
            instance: instance.instance_name.clone(),
            scheduled,
        })
    }

    /// Delete an instance and the jobs it created.
    ///
    /// Refused while any related job is building or queued. Jobs the instance
    /// reused are left in place. On a host failure the instance stays recorded.
    pub fn delete_instance(&self, instance_name: &str) -> WorkflowResult<DeleteReport> {
        let _guard = self.gate.acquire("delete_instance")?;

        let instance = self
            .registry
            .get(instance_name)
            .ok_or_else(|| WorkflowError::InstanceNotFound(instance_name.to_string()))?;

        let mut related = Vec::new();
        for target in instance.concrete_jobs() {
            if let Some(job) = self.jobs.get_job(target)? {
                related.push(job);
            }
        }

        // Building is reported ahead of queued.
        let busy = related
            .iter()
            .find(|job| job.building)
            .map(|job| (job, BusyState::Building))
            .or_else(|| {
                related
                    .iter()
                    .find(|job| job.queued)
                    .map(|job| (job, BusyState::Queued))
            });
        if let Some((job, state)) = busy {
            return Err(WorkflowError::JobBusy {
                job: job.name.clone(),
                state,
            });
        }

        let mut deleted_jobs = Vec::new();
        let mut kept_jobs = Vec::new();
        for job in related {
            if !created_by(&instance.created_by_instance, &job.name) {
                kept_jobs.push(job.name);
                continue;
            }
            if let Err(err) = self.jobs.delete_job(&job) {
                error!(container = %self.name, instance = %instance.instance_name, job = %job.name, error = %err, "Job deletion failed");
                return Err(WorkflowError::Host(format!(
                    "Failed to delete {}, please delete it manually",
                    job.name
                )));
            }
            deleted_jobs.push(job.name);
        }

        let before = self.registry.snapshot();
        self.registry.remove(&instance.instance_name);
        self.save_or_restore(before)?;

        info!(
            container = %self.name,
            instance = %instance.instance_name,
            deleted = deleted_jobs.len(),
            kept = kept_jobs.len(),
            "Workflow deleted"
        );
        Ok(DeleteReport {
            instance: instance.instance_name.clone(),
            deleted_jobs,
            kept_jobs,
        })
    }

    fn require_job(&self, name: &str) -> WorkflowResult<JobHandle> {
        self.jobs
            .get_job(name)?
            .ok_or_else(|| WorkflowError::JobNotFound(name.to_string()))
    }
}

/// Creation flag for a job, tolerating host-side case differences.
fn created_by(flags: &BTreeMap<String, bool>, job_name: &str) -> bool {
    flags
        .iter()
        .any(|(name, created)| *created && same_name(name, job_name))
}
