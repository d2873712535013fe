//! Template discovery over the job store.

use crate::error::WorkflowResult;
use crate::store::JobStore;
use crate::types::{JobHandle, same_name};

/// Jobs whose marker lists `template_name` (trimmed, case-insensitive), in host order.
pub fn resolve(store: &dyn JobStore, template_name: &str) -> WorkflowResult<Vec<JobHandle>> {
    let jobs = store.list_jobs()?;
    Ok(jobs
        .into_iter()
        .filter(|job| {
            store
                .template_marker(job)
                .is_some_and(|marker| marker.belongs_to(template_name))
        })
        .collect())
}

/// Every distinct template name referenced by any job, in first-seen order.
/// Names differing only in case count once, keeping the first spelling.
pub fn template_names(store: &dyn JobStore) -> WorkflowResult<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    for job in store.list_jobs()? {
        if let Some(marker) = store.template_marker(&job) {
            for name in marker.names() {
                if !names.iter().any(|n| same_name(n, name)) {
                    names.push(name.to_string());
                }
            }
        }
    }
    Ok(names)
}
