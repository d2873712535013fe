//! Name checks backing interactive form validation. None of these take the gate.

use super::WorkflowContainer;
use crate::error::WorkflowResult;
use crate::types::NameCheck;

impl WorkflowContainer {
    /// Whether `name` can receive a materialized job.
    ///
    /// A free name is valid. An existing plain job is a warning when reuse is
    /// allowed and an error otherwise. A template source job is always an error.
    pub fn validate_job_name(&self, name: &str, allow_reuse: bool) -> WorkflowResult<NameCheck> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(NameCheck::error("Job name can't be empty!"));
        }
        let Some(job) = self.jobs.get_job(name)? else {
            return Ok(NameCheck::valid());
        };
        if self.jobs.template_marker(&job).is_some() {
            return Ok(NameCheck::error(
                "You can't use a job that is a building block for a template workflow",
            ));
        }
        if allow_reuse {
            Ok(NameCheck::warning(format!(
                "Job '{}' already exists and will be used as is",
                job.name
            )))
        } else {
            Ok(NameCheck::error(format!(
                "Job already defined with name: '{}'",
                job.name
            )))
        }
    }

    /// Whether `name` is free for a new instance in this container.
    pub fn validate_instance_name(&self, name: &str) -> NameCheck {
        let name = name.trim();
        if name.is_empty() {
            return NameCheck::error("Workflow name can't be empty!");
        }
        match self.registry.get(name) {
            Some(existing) => NameCheck::error(format!(
                "Workflow already defined with name: '{}'",
                existing.instance_name
            )),
            None => NameCheck::valid(),
        }
    }

    /// Whether the job is idle. A missing job is not running.
    pub fn validate_job_is_not_running(&self, name: &str) -> WorkflowResult<NameCheck> {
        let job = self.jobs.get_job(name.trim())?;
        match job.as_ref().and_then(|j| j.busy_state().map(|state| (j, state))) {
            Some((job, state)) => Ok(NameCheck::error(format!("Job {} {}", job.name, state))),
            None => Ok(NameCheck::valid()),
        }
    }
}
