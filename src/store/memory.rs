//! In-process job store and registry store.

use super::definition;
use super::{JobStore, RegistryStore};
use crate::error::{WorkflowError, WorkflowResult};
use crate::types::{JobHandle, WorkflowInstance, same_name};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Job store held in memory, in insertion order.
///
/// Also exposes the scheduler state (`building`/`queued`) and write-failure
/// injection so callers can exercise host-side failures.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<Vec<JobHandle>>,
    failing: Mutex<HashSet<String>>,
    scheduled: Mutex<Vec<String>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a job, bypassing the duplicate check.
    pub fn put_job(&self, name: &str, definition: &str) -> JobHandle {
        let mut jobs = self.jobs.write();
        let enabled = definition::enabled_flag(definition).unwrap_or(true);
        if let Some(job) = jobs.iter_mut().find(|j| same_name(&j.name, name)) {
            job.definition = definition.to_string();
            job.enabled = enabled;
            return job.clone();
        }
        let job = JobHandle {
            name: name.to_string(),
            definition: definition.to_string(),
            enabled,
            building: false,
            queued: false,
        };
        jobs.push(job.clone());
        job
    }

    pub fn set_building(&self, name: &str, building: bool) {
        self.modify(name, |job| job.building = building);
    }

    pub fn set_queued(&self, name: &str, queued: bool) {
        self.modify(name, |job| job.queued = queued);
    }

    /// Make every subsequent create, update or delete of `name` fail like a host
    /// I/O error.
    pub fn fail_writes_to(&self, name: &str) {
        self.failing.lock().insert(name.to_lowercase());
    }

    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    /// Job names passed to `schedule_job`, in order.
    pub fn scheduled(&self) -> Vec<String> {
        self.scheduled.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    fn modify<F>(&self, name: &str, f: F) -> bool
    where
        F: FnOnce(&mut JobHandle),
    {
        let mut jobs = self.jobs.write();
        match jobs.iter_mut().find(|j| same_name(&j.name, name)) {
            Some(job) => {
                f(job);
                true
            }
            None => false,
        }
    }

    fn check_writable(&self, name: &str) -> WorkflowResult<()> {
        if self.failing.lock().contains(&name.to_lowercase()) {
            return Err(WorkflowError::Host(format!(
                "I/O error writing job '{}'",
                name
            )));
        }
        Ok(())
    }

    fn require(&self, name: &str) -> WorkflowResult<JobHandle> {
        self.get_job(name)?
            .ok_or_else(|| WorkflowError::JobNotFound(name.to_string()))
    }
}

impl JobStore for MemoryJobStore {
    fn list_jobs(&self) -> WorkflowResult<Vec<JobHandle>> {
        Ok(self.jobs.read().clone())
    }

    fn get_job(&self, name: &str) -> WorkflowResult<Option<JobHandle>> {
        Ok(self
            .jobs
            .read()
            .iter()
            .find(|j| same_name(&j.name, name))
            .cloned())
    }

    fn create_job(&self, name: &str, definition: &str) -> WorkflowResult<JobHandle> {
        self.check_writable(name)?;
        if self.get_job(name)?.is_some() {
            return Err(WorkflowError::DuplicateJob(name.to_string()));
        }
        Ok(self.put_job(name, definition))
    }

    fn update_job(&self, job: &JobHandle, definition: &str) -> WorkflowResult<JobHandle> {
        self.check_writable(&job.name)?;
        self.require(&job.name)?;
        Ok(self.put_job(&job.name, definition))
    }

    fn set_enabled(&self, job: &JobHandle, enabled: bool) -> WorkflowResult<()> {
        if self.modify(&job.name, |j| j.enabled = enabled) {
            Ok(())
        } else {
            Err(WorkflowError::JobNotFound(job.name.clone()))
        }
    }

    fn remove_template_marker(&self, job: &JobHandle) -> WorkflowResult<()> {
        let found = self.modify(&job.name, |j| {
            if let Some(stripped) = definition::strip_marker(&j.definition) {
                j.definition = stripped;
            }
        });
        if found {
            Ok(())
        } else {
            Err(WorkflowError::JobNotFound(job.name.clone()))
        }
    }

    fn delete_job(&self, job: &JobHandle) -> WorkflowResult<()> {
        self.check_writable(&job.name)?;
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|j| !same_name(&j.name, &job.name));
        if jobs.len() == before {
            return Err(WorkflowError::JobNotFound(job.name.clone()));
        }
        Ok(())
    }

    fn schedule_job(&self, job: &JobHandle) -> WorkflowResult<()> {
        if !self.modify(&job.name, |j| j.queued = true) {
            return Err(WorkflowError::JobNotFound(job.name.clone()));
        }
        self.scheduled.lock().push(job.name.clone());
        Ok(())
    }
}

/// Registry storage that keeps each container's registry as serialized JSON,
/// so reloads go through the same encoding as durable storage.
#[derive(Default)]
pub struct MemoryRegistryStore {
    saved: Mutex<HashMap<String, String>>,
    saves: Mutex<usize>,
    failing: Mutex<bool>,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save_instances` calls.
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }

    /// Make every subsequent save fail like a host I/O error, or stop doing so.
    pub fn fail_saves(&self, fail: bool) {
        *self.failing.lock() = fail;
    }
}

impl RegistryStore for MemoryRegistryStore {
    fn load_instances(&self, container: &str) -> WorkflowResult<Vec<WorkflowInstance>> {
        match self.saved.lock().get(container) {
            Some(json) => Ok(serde_json::from_str(json)?),
            None => Ok(Vec::new()),
        }
    }

    fn save_instances(
        &self,
        container: &str,
        instances: &[Arc<WorkflowInstance>],
    ) -> WorkflowResult<()> {
        if *self.failing.lock() {
            return Err(WorkflowError::Host(format!(
                "I/O error saving registry '{}'",
                container
            )));
        }
        let plain: Vec<&WorkflowInstance> = instances.iter().map(Arc::as_ref).collect();
        let json = serde_json::to_string(&plain)?;
        self.saved.lock().insert(container.to_string(), json);
        *self.saves.lock() += 1;
        Ok(())
    }
}
