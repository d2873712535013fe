//! Instance-registry persistence in the `workflow_instances` table.
//!
//! Each container's registry is stored as one JSON payload per instance and
//! replaced wholesale inside a transaction on every save.

use super::{Database, now_ms};
use crate::error::WorkflowResult;
use crate::store::RegistryStore;
use crate::types::WorkflowInstance;
use rusqlite::params;
use std::sync::Arc;

impl RegistryStore for Database {
    fn load_instances(&self, container: &str) -> WorkflowResult<Vec<WorkflowInstance>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT payload FROM workflow_instances WHERE container = ?1 ORDER BY instance_key",
            )?;
            let payloads = stmt
                .query_map(params![container], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut instances = Vec::with_capacity(payloads.len());
            for payload in payloads {
                instances.push(serde_json::from_str(&payload)?);
            }
            Ok(instances)
        })
    }

    fn save_instances(
        &self,
        container: &str,
        instances: &[Arc<WorkflowInstance>],
    ) -> WorkflowResult<()> {
        let now = now_ms();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM workflow_instances WHERE container = ?1",
                params![container],
            )?;
            for instance in instances {
                let payload = serde_json::to_string(instance.as_ref())?;
                tx.execute(
                    "INSERT INTO workflow_instances (container, instance_key, payload, updated_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![container, instance.key(), payload, now],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }
}
