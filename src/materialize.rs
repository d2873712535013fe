//! Materialization: committing rewritten template jobs through the job store.
//!
//! Create never overwrites: a target that already exists is reused untouched.
//! Update requires the target to exist, unless the materializer is told to
//! recreate missing targets, and keeps its enabled flag. In both cases
//! the materialized job loses its membership marker, so it is a concrete job and
//! never a further template source.
//!
//! A batch is validated as a whole before the first write, but writes are not
//! transactional: a host failure mid-batch leaves earlier jobs materialized. The
//! [`BatchReport`] says exactly how far the batch got.
//!
//! A job that was created but could not be finished (marker strip or enable
//! failed) is deleted again. If that delete fails too, the failure is reported
//! with `created` set so the owning instance can still remove the job.

use crate::error::{WorkflowError, WorkflowResult};
use crate::store::JobStore;
use crate::template::Substitution;
use crate::types::{JobHandle, JobMapping, Operation, ParameterMap, same_name};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// What happened to one target job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Materialized {
    /// Newly created by this operation.
    Created,
    /// Already existed on create; left as it was.
    Reused,
    /// Existing job rewritten.
    Updated,
}

impl Materialized {
    /// Creation flag: `Some(true)` created, `Some(false)` reused, `None` for updates.
    pub fn created_flag(self) -> Option<bool> {
        match self {
            Materialized::Created => Some(true),
            Materialized::Reused => Some(false),
            Materialized::Updated => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub template_job: String,
    pub target: String,
    pub result: Materialized,
}

#[derive(Debug)]
pub struct BatchFailure {
    pub template_job: String,
    pub target: String,
    /// The target was created before the failure and is still in the store.
    pub created: bool,
    pub error: WorkflowError,
}

/// A host failure while committing one job.
struct Interrupted {
    error: WorkflowError,
    created: bool,
}

impl From<WorkflowError> for Interrupted {
    fn from(error: WorkflowError) -> Self {
        Self {
            error,
            created: false,
        }
    }
}

/// Progress of one batch: the jobs committed, and the failure that stopped it.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub completed: Vec<JobOutcome>,
    pub failure: Option<BatchFailure>,
}

impl BatchReport {
    /// Creation flags for committed jobs that have one, plus the failed target
    /// when it was left behind.
    pub fn created_flags(&self) -> BTreeMap<String, bool> {
        let mut flags: BTreeMap<String, bool> = self
            .completed
            .iter()
            .filter_map(|o| o.result.created_flag().map(|f| (o.target.clone(), f)))
            .collect();
        if let Some(failure) = self.failure.as_ref().filter(|f| f.created) {
            flags.insert(failure.target.clone(), true);
        }
        flags
    }

    /// Whether the batch stopped without leaving any job behind.
    pub fn committed_nothing(&self) -> bool {
        self.completed.is_empty() && !self.failure.as_ref().is_some_and(|f| f.created)
    }

    pub fn targets(&self, kind: Materialized) -> Vec<String> {
        self.completed
            .iter()
            .filter(|o| o.result == kind)
            .map(|o| o.target.clone())
            .collect()
    }
}

/// Target name bound to a template job, matched case-insensitively.
pub fn target_for<'m>(mapping: &'m JobMapping, template_job: &str) -> Option<&'m str> {
    mapping
        .get(template_job)
        .or_else(|| {
            mapping
                .iter()
                .find(|(k, _)| same_name(k, template_job))
                .map(|(_, v)| v)
        })
        .map(String::as_str)
}

/// Every template job must be bound to a non-blank target.
pub fn check_bindings(template_jobs: &[JobHandle], mapping: &JobMapping) -> WorkflowResult<()> {
    for job in template_jobs {
        if target_for(mapping, &job.name).is_none_or(|t| t.trim().is_empty()) {
            return Err(WorkflowError::validation(
                format!("template.{}", job.name),
                format!("Expected a target job name for '{}'", job.name),
            ));
        }
    }
    Ok(())
}

pub struct Materializer<'a> {
    store: &'a dyn JobStore,
    recreate_missing: bool,
}

impl<'a> Materializer<'a> {
    pub fn new(store: &'a dyn JobStore) -> Self {
        Self {
            store,
            recreate_missing: false,
        }
    }

    /// On update, create a missing target instead of failing with `JobNotFound`.
    pub fn recreate_missing(mut self, recreate: bool) -> Self {
        self.recreate_missing = recreate;
        self
    }

    /// Commit one rewritten definition under `target`.
    pub fn materialize(
        &self,
        target: &str,
        definition: &str,
        operation: Operation,
    ) -> WorkflowResult<Materialized> {
        self.commit(target, definition, operation)
            .map_err(|interrupted| interrupted.error)
    }

    fn commit(
        &self,
        target: &str,
        definition: &str,
        operation: Operation,
    ) -> Result<Materialized, Interrupted> {
        if target.trim().is_empty() {
            return Err(WorkflowError::blank("target job name").into());
        }
        if definition.trim().is_empty() {
            return Err(WorkflowError::blank("job definition").into());
        }

        match (operation, self.store.get_job(target)?) {
            (Operation::Create, Some(_)) => {
                debug!(job = %target, "Target job exists, reusing it");
                Ok(Materialized::Reused)
            }
            (Operation::Create, None) => self.create(target, definition),
            (Operation::Update, None) if self.recreate_missing => {
                debug!(job = %target, "Target job missing, creating it");
                self.create(target, definition)
            }
            (Operation::Update, None) => Err(WorkflowError::JobNotFound(target.to_string()).into()),
            (Operation::Update, Some(job)) => {
                let was_enabled = job.enabled;
                let job = self.store.update_job(&job, definition)?;
                // The rewritten content may carry the marker again.
                self.store.remove_template_marker(&job)?;
                self.store.set_enabled(&job, was_enabled)?;
                debug!(job = %target, enabled = was_enabled, "Job updated");
                Ok(Materialized::Updated)
            }
        }
    }

    fn create(&self, target: &str, definition: &str) -> Result<Materialized, Interrupted> {
        let job = self.store.create_job(target, definition)?;
        let finished = self
            .store
            .remove_template_marker(&job)
            .and_then(|_| self.store.set_enabled(&job, true));
        if let Err(error) = finished {
            return Err(self.abandon(&job, error));
        }
        debug!(job = %target, "Job created");
        Ok(Materialized::Created)
    }

    /// Delete a job that was created but not finished; it may still carry the marker.
    fn abandon(&self, job: &JobHandle, error: WorkflowError) -> Interrupted {
        match self.store.delete_job(job) {
            Ok(()) => {
                warn!(job = %job.name, error = %error, "Unfinished job removed");
                Interrupted {
                    error,
                    created: false,
                }
            }
            Err(cleanup) => {
                warn!(job = %job.name, error = %error, cleanup = %cleanup, "Unfinished job could not be removed");
                Interrupted {
                    error,
                    created: true,
                }
            }
        }
    }

    /// Rewrite and commit every template job, in template order.
    ///
    /// Returns `Err` only for validation failures, before any job is touched. A
    /// host failure stops the batch and is reported in [`BatchReport::failure`].
    pub fn apply(
        &self,
        template_jobs: &[JobHandle],
        mapping: &JobMapping,
        parameters: &ParameterMap,
        operation: Operation,
    ) -> WorkflowResult<BatchReport> {
        check_bindings(template_jobs, mapping)?;
        let substitution = Substitution::new(mapping, parameters)?;

        let mut report = BatchReport::default();
        for job in template_jobs {
            let target = target_for(mapping, &job.name).unwrap_or_default().to_string();
            let rendered = substitution.apply(&job.definition);
            match self.commit(&target, &rendered, operation) {
                Ok(result) => {
                    debug!(job = %job.name, concrete = %target, mode = %operation, ?result, "Materialized");
                    report.completed.push(JobOutcome {
                        template_job: job.name.clone(),
                        target,
                        result,
                    });
                }
                Err(Interrupted { error, created }) => {
                    report.failure = Some(BatchFailure {
                        template_job: job.name.clone(),
                        target,
                        created,
                        error,
                    });
                    break;
                }
            }
        }
        Ok(report)
    }
}
