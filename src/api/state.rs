use crate::config::{Config, GateConfig};
use crate::container::WorkflowContainer;
use crate::db::Database;
use crate::error::{WorkflowError, WorkflowResult};
use crate::gate::Gate;
use crate::store::{JobStore, RegistryStore};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared handler state: the database and the containers opened so far.
#[derive(Clone)]
pub struct ApiState {
    db: Arc<Database>,
    gate: GateConfig,
    process_gate: Arc<Gate>,
    default_container: String,
    containers: Arc<RwLock<HashMap<String, Arc<WorkflowContainer>>>>,
}

impl ApiState {
    pub fn new(db: Arc<Database>, config: &Config) -> Self {
        Self {
            db,
            gate: config.gate.clone(),
            process_gate: config.gate.process_gate(),
            default_container: config.server.container.clone(),
            containers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn default_container(&self) -> &str {
        &self.default_container
    }

    /// The named container, opened and cached on first use.
    pub fn container(&self, name: &str) -> WorkflowResult<Arc<WorkflowContainer>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WorkflowError::blank("container"));
        }
        if let Some(container) = self.containers.read().get(name) {
            return Ok(Arc::clone(container));
        }

        let mut containers = self.containers.write();
        if let Some(container) = containers.get(name) {
            return Ok(Arc::clone(container));
        }
        let jobs: Arc<dyn JobStore> = self.db.clone();
        let persistence: Arc<dyn RegistryStore> = self.db.clone();
        let container = Arc::new(WorkflowContainer::open(
            name,
            jobs,
            persistence,
            self.gate.gate_for_container(&self.process_gate),
        )?);
        containers.insert(name.to_string(), Arc::clone(&container));
        Ok(container)
    }
}
