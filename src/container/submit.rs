//! Create, update and bulk refresh.

use super::WorkflowContainer;
use super::request::{
    ALLOW_EXISTING_KEY, FormRequest, INSTANCE_NAME_KEY, OPERATION_KEY, TEMPLATE_NAME_KEY,
    field_key,
};
use crate::db::now_ms;
use crate::error::{WorkflowError, WorkflowResult};
use crate::materialize::{BatchReport, Materialized, Materializer, target_for};
use crate::template::{resolve, scanner};
use crate::types::{
    ActiveSelection, InstanceStatus, JobHandle, JobMapping, Operation, ParameterMap,
    RefreshFailure, RefreshSummary, SubmitReport, WorkflowInstance, same_name,
};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// A fully-read request: what to materialize and under which instance.
struct Binding {
    instance_name: String,
    template_name: String,
    operation: Operation,
    template_jobs: Vec<JobHandle>,
    parameters: ParameterMap,
    mapping: JobMapping,
}

/// Result of applying a binding. `recorded` is set when the registry changed
/// and must be saved, even if `result` is an error.
struct Applied {
    recorded: bool,
    result: WorkflowResult<SubmitReport>,
}

impl WorkflowContainer {
    /// Create or update one instance from a flat request.
    ///
    /// Validation failures change nothing. A host failure part way through the
    /// batch records the instance as degraded and is returned as the error.
    /// If the registry cannot be saved, the in-memory change is rolled back.
    pub fn submit(&self, form: &FormRequest) -> WorkflowResult<SubmitReport> {
        let _guard = self.gate.acquire("submit")?;

        let binding = self.read_binding(form)?;
        let before = self.registry.snapshot();
        let previous = self.registry.get(&binding.instance_name);
        let instance_name = binding.instance_name.clone();
        let applied = self.apply_binding(binding, previous.as_deref())?;
        if applied.recorded {
            self.save_or_restore(before)?;
        }
        let report = applied.result?;

        *self.active.lock() = ActiveSelection::Instance(instance_name);
        info!(
            container = %self.name,
            instance = %report.instance.instance_name,
            operation = %report.operation,
            created = report.created.len(),
            reused = report.reused.len(),
            updated = report.updated.len(),
            "Workflow submitted"
        );
        Ok(report)
    }

    /// Re-materialize every instance from its stored parameters and mapping.
    ///
    /// Each instance succeeds or fails on its own; failures are collected, never
    /// raised. The registry is saved once at the end.
    pub fn update_all(&self) -> WorkflowResult<RefreshSummary> {
        let _guard = self.gate.acquire("update_all")?;

        let before = self.registry.snapshot();
        let mut summary = RefreshSummary::default();
        let mut changed = false;
        for instance in self.registry.list() {
            let result = self
                .stored_binding(&instance)
                .and_then(|binding| self.apply_binding(binding, Some(instance.as_ref())));
            let result = match result {
                Ok(applied) => {
                    changed |= applied.recorded;
                    applied.result
                }
                Err(err) => Err(err),
            };
            match result {
                Ok(_) => summary.updated.push(instance.instance_name.clone()),
                Err(err) => {
                    warn!(container = %self.name, instance = %instance.instance_name, error = %err, "Workflow not updated");
                    summary.not_updated.push(RefreshFailure {
                        instance: instance.instance_name.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        if changed {
            self.save_or_restore(before)?;
        }
        info!(
            container = %self.name,
            updated = summary.updated.len(),
            failed = summary.not_updated.len(),
            "Bulk refresh finished"
        );
        Ok(summary)
    }

    /// Template jobs for `template_name`, skipping jobs an instance here
    /// materialized. Those only carry a marker when a create failed half way.
    pub(super) fn template_jobs(&self, template_name: &str) -> WorkflowResult<Vec<JobHandle>> {
        let instances = self.registry.snapshot();
        let mut jobs = resolve(self.jobs.as_ref(), template_name)?;
        jobs.retain(|job| {
            let owned = instances
                .values()
                .any(|instance| instance.concrete_jobs().any(|target| same_name(target, &job.name)));
            if owned {
                warn!(container = %self.name, job = %job.name, "Materialized job still carries a template marker");
            }
            !owned
        });
        Ok(jobs)
    }

    /// Like [`Self::template_jobs`], but an unknown template is an error.
    pub(super) fn resolve_template(&self, template_name: &str) -> WorkflowResult<Vec<JobHandle>> {
        let jobs = self.template_jobs(template_name)?;
        if jobs.is_empty() {
            return Err(WorkflowError::TemplateNotFound(template_name.to_string()));
        }
        Ok(jobs)
    }

    fn read_binding(&self, form: &FormRequest) -> WorkflowResult<Binding> {
        let operation: Operation = form.require(OPERATION_KEY)?.parse()?;
        let requested_name = form.require(INSTANCE_NAME_KEY)?.trim().to_string();
        let existing = self.registry.get(&requested_name);

        let (instance_name, template_name) = match (operation, existing) {
            (Operation::Create, Some(_)) => {
                return Err(WorkflowError::validation(
                    INSTANCE_NAME_KEY,
                    format!("Workflow already defined with name: '{}'", requested_name),
                ));
            }
            (Operation::Create, None) => (
                requested_name,
                form.require(TEMPLATE_NAME_KEY)?.trim().to_string(),
            ),
            (Operation::Update, None) => {
                return Err(WorkflowError::InstanceNotFound(requested_name));
            }
            (Operation::Update, Some(instance)) => {
                if let Some(requested) = form.optional(TEMPLATE_NAME_KEY)
                    && !same_name(requested.trim(), &instance.template_name)
                {
                    return Err(WorkflowError::validation(
                        TEMPLATE_NAME_KEY,
                        format!(
                            "Workflow '{}' was created from template '{}', not '{}'",
                            instance.instance_name,
                            instance.template_name,
                            requested.trim()
                        ),
                    ));
                }
                (
                    instance.instance_name.clone(),
                    instance.template_name.clone(),
                )
            }
        };

        let template_jobs = self.resolve_template(&template_name)?;

        let mut parameters = ParameterMap::new();
        for name in scanner::scan_jobs(&template_jobs).into_keys() {
            let value = form.require_field(&name)?.to_string();
            parameters.insert(name, value);
        }

        let mut mapping = JobMapping::new();
        for job in &template_jobs {
            let target = form.require_field(&job.name)?.trim().to_string();
            mapping.insert(job.name.clone(), target);
        }
        check_distinct_targets(&mapping)?;

        if operation == Operation::Create {
            let allow_reuse = form.flag(ALLOW_EXISTING_KEY).unwrap_or(true);
            for (template_job, target) in &mapping {
                let check = self.validate_job_name(target, allow_reuse)?;
                if !check.result {
                    return Err(WorkflowError::validation(field_key(template_job), check.msg));
                }
            }
        }

        Ok(Binding {
            instance_name,
            template_name,
            operation,
            template_jobs,
            parameters,
            mapping,
        })
    }

    /// Rebuild a binding from what an instance recorded, against the template's
    /// current jobs.
    fn stored_binding(&self, instance: &WorkflowInstance) -> WorkflowResult<Binding> {
        let template_jobs = self.resolve_template(&instance.template_name)?;

        let mut parameters = ParameterMap::new();
        for name in scanner::scan_jobs(&template_jobs).into_keys() {
            match instance.job_parameters.get(&name) {
                Some(value) if !value.trim().is_empty() => {
                    parameters.insert(name, value.clone());
                }
                _ => return Err(WorkflowError::blank(&field_key(&name))),
            }
        }

        let mut mapping = JobMapping::new();
        for job in &template_jobs {
            if let Some(target) = target_for(&instance.related_jobs, &job.name) {
                mapping.insert(job.name.clone(), target.to_string());
            }
        }

        Ok(Binding {
            instance_name: instance.instance_name.clone(),
            template_name: instance.template_name.clone(),
            operation: Operation::Update,
            template_jobs,
            parameters,
            mapping,
        })
    }

    /// Materialize a binding and record the resulting instance.
    ///
    /// `Err` means validation rejected the batch and nothing changed. A batch
    /// that failed before leaving any job behind keeps the registry untouched.
    /// Updating a degraded instance recreates targets its failed create never
    /// finished.
    fn apply_binding(
        &self,
        binding: Binding,
        previous: Option<&WorkflowInstance>,
    ) -> WorkflowResult<Applied> {
        let degraded = previous.is_some_and(|p| p.status.is_degraded());
        let report = Materializer::new(self.jobs.as_ref())
            .recreate_missing(degraded)
            .apply(
                &binding.template_jobs,
                &binding.mapping,
                &binding.parameters,
                binding.operation,
            )?;

        if report.failure.is_some() && report.committed_nothing() {
            let error = report
                .failure
                .map(|f| f.error)
                .unwrap_or_else(|| WorkflowError::host("materialization failed"));
            return Ok(Applied {
                recorded: false,
                result: Err(error),
            });
        }

        let instance = build_instance(&binding, previous, &report);
        let submit = SubmitReport {
            operation: binding.operation,
            instance: instance.clone(),
            created: report.targets(Materialized::Created),
            reused: report.targets(Materialized::Reused),
            updated: report.targets(Materialized::Updated),
        };
        self.registry.put(instance);

        let result = match report.failure {
            Some(failure) => {
                warn!(
                    container = %self.name,
                    instance = %binding.instance_name,
                    job = %failure.target,
                    error = %failure.error,
                    "Workflow degraded"
                );
                Err(failure.error)
            }
            None => Ok(submit),
        };
        Ok(Applied {
            recorded: true,
            result,
        })
    }
}

fn build_instance(
    binding: &Binding,
    previous: Option<&WorkflowInstance>,
    report: &BatchReport,
) -> WorkflowInstance {
    let now = now_ms();
    let flags = report.created_flags();
    let created_by_instance: BTreeMap<String, bool> = binding
        .mapping
        .values()
        .map(|target| {
            let created = flags.get(target).copied().unwrap_or(false)
                || previous.is_some_and(|p| p.was_created_by_instance(target));
            (target.clone(), created)
        })
        .collect();

    let status = match &report.failure {
        Some(failure) => InstanceStatus::Degraded {
            failed_job: failure.target.clone(),
            reason: failure.error.to_string(),
        },
        None => InstanceStatus::Active,
    };

    WorkflowInstance {
        instance_name: binding.instance_name.clone(),
        template_name: binding.template_name.clone(),
        job_parameters: binding.parameters.clone(),
        related_jobs: binding.mapping.clone(),
        created_by_instance,
        status,
        created_at: previous.map_or(now, |p| p.created_at),
        updated_at: now,
    }
}

/// Two template jobs may not share a target.
fn check_distinct_targets(mapping: &JobMapping) -> WorkflowResult<()> {
    let mut seen: Vec<(&str, &str)> = Vec::new();
    for (template_job, target) in mapping {
        if let Some((other, _)) = seen.iter().find(|(_, t)| same_name(t, target)) {
            return Err(WorkflowError::validation(
                field_key(template_job),
                format!(
                    "Jobs '{}' and '{}' are both mapped to '{}'",
                    other, template_job, target
                ),
            ));
        }
        seen.push((template_job, target));
    }
    Ok(())
}
