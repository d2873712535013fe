//! The workflow container: owner of one instance registry and the control plane
//! over it.
//!
//! Each control-plane operation is one method. Mutating operations run under the
//! container's [`Gate`]; read-only ones (listing, describing, name checks) read
//! registry snapshots without it and may race a concurrent mutation.

mod describe;
mod manage;
pub mod request;
mod submit;
mod validate;

use crate::error::WorkflowResult;
use crate::gate::Gate;
use crate::registry::{InstanceMap, InstanceRegistry};
use crate::store::{JobStore, RegistryStore};
use crate::types::{ActiveSelection, WorkflowInstance};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use request::FormRequest;

pub struct WorkflowContainer {
    name: String,
    jobs: Arc<dyn JobStore>,
    persistence: Arc<dyn RegistryStore>,
    gate: Arc<Gate>,
    registry: InstanceRegistry,
    active: Mutex<ActiveSelection>,
}

impl WorkflowContainer {
    /// Open a container, loading its persisted registry.
    pub fn open(
        name: impl Into<String>,
        jobs: Arc<dyn JobStore>,
        persistence: Arc<dyn RegistryStore>,
        gate: Arc<Gate>,
    ) -> WorkflowResult<Self> {
        let name = name.into();
        let instances = persistence.load_instances(&name)?;
        info!(container = %name, instances = instances.len(), "Container opened");
        Ok(Self {
            name,
            jobs,
            persistence,
            gate,
            registry: InstanceRegistry::from_instances(instances),
            active: Mutex::new(ActiveSelection::None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gate(&self) -> &Arc<Gate> {
        &self.gate
    }

    pub fn job_store(&self) -> &dyn JobStore {
        self.jobs.as_ref()
    }

    /// All instances ordered by name. Advisory snapshot.
    pub fn instances(&self) -> Vec<Arc<WorkflowInstance>> {
        self.registry.list()
    }

    pub fn instance(&self, instance_name: &str) -> Option<Arc<WorkflowInstance>> {
        self.registry.get(instance_name)
    }

    pub fn project_description(&self) -> String {
        match self.registry.len() {
            0 => "This project does not have any associated workflows".to_string(),
            n => format!("This project has {} associated workflows", n),
        }
    }

    pub fn active_selection(&self) -> ActiveSelection {
        self.active.lock().clone()
    }

    /// Stage which instance subsequent form reads describe.
    pub fn set_active_instance(&self, selection: ActiveSelection) -> WorkflowResult<()> {
        let _guard = self.gate.acquire("set_active_instance")?;
        debug!(container = %self.name, ?selection, "Active selection staged");
        *self.active.lock() = selection;
        Ok(())
    }

    /// Persist the whole registry through the owning storage.
    fn save(&self) -> WorkflowResult<()> {
        let instances = self.registry.list();
        self.persistence.save_instances(&self.name, &instances)
    }

    /// Persist the registry, rolling it back to `before` if that fails.
    fn save_or_restore(&self, before: Arc<InstanceMap>) -> WorkflowResult<()> {
        if let Err(err) = self.save() {
            warn!(container = %self.name, error = %err, "Registry not saved, changes rolled back");
            self.registry.restore(before);
            return Err(err);
        }
        Ok(())
    }
}
