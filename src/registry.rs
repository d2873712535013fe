//! Instance registry: the named workflow instances owned by one container.
//!
//! Readers take lock-free snapshots; each write swaps in a new map holding new
//! immutable instance values. Writers are serialized by the gate, so a reader
//! racing a mutation sees either the state before it or the state after it.

use crate::types::{WorkflowInstance, instance_key};
use arc_swap::ArcSwap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Instances keyed by case-folded instance name.
pub type InstanceMap = BTreeMap<String, Arc<WorkflowInstance>>;

pub struct InstanceRegistry {
    instances: ArcSwap<InstanceMap>,
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self {
            instances: ArcSwap::from_pointee(InstanceMap::new()),
        }
    }

    /// Build a registry from persisted instances. Later duplicates (by
    /// case-insensitive name) win.
    pub fn from_instances(instances: Vec<WorkflowInstance>) -> Self {
        let map: InstanceMap = instances
            .into_iter()
            .map(|instance| (instance.key(), Arc::new(instance)))
            .collect();
        Self {
            instances: ArcSwap::from_pointee(map),
        }
    }

    /// Point-in-time view of every instance.
    pub fn snapshot(&self) -> Arc<InstanceMap> {
        self.instances.load_full()
    }

    pub fn get(&self, instance_name: &str) -> Option<Arc<WorkflowInstance>> {
        self.instances.load().get(&instance_key(instance_name)).cloned()
    }

    pub fn contains(&self, instance_name: &str) -> bool {
        self.instances
            .load()
            .contains_key(&instance_key(instance_name))
    }

    /// All instances ordered by name.
    pub fn list(&self) -> Vec<Arc<WorkflowInstance>> {
        self.instances.load().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.instances.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.load().is_empty()
    }

    /// Insert or replace an instance, returning the one it replaced.
    pub fn put(&self, instance: WorkflowInstance) -> Option<Arc<WorkflowInstance>> {
        let key = instance.key();
        let instance = Arc::new(instance);
        let previous = self.instances.rcu(|current| {
            let mut next = InstanceMap::clone(current);
            next.insert(key.clone(), Arc::clone(&instance));
            next
        });
        previous.get(&key).cloned()
    }

    /// Swap a snapshot taken by [`Self::snapshot`] back in, undoing later writes.
    pub fn restore(&self, snapshot: Arc<InstanceMap>) {
        self.instances.store(snapshot);
    }

    pub fn remove(&self, instance_name: &str) -> Option<Arc<WorkflowInstance>> {
        let key = instance_key(instance_name);
        let previous = self.instances.rcu(|current| {
            let mut next = InstanceMap::clone(current);
            next.remove(&key);
            next
        });
        previous.get(&key).cloned()
    }
}
