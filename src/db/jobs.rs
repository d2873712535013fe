//! Job store backed by the `jobs` table.

use super::{Database, now_ms};
use crate::error::{WorkflowError, WorkflowResult};
use crate::store::{JobStore, definition};
use crate::types::JobHandle;
use rusqlite::{Connection, OptionalExtension, Row, params};

const JOB_COLUMNS: &str = "name, definition, enabled, building, queued";

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<JobHandle> {
    Ok(JobHandle {
        name: row.get(0)?,
        definition: row.get(1)?,
        enabled: row.get(2)?,
        building: row.get(3)?,
        queued: row.get(4)?,
    })
}

/// Internal helper to get a job using an existing connection (avoids deadlock).
fn get_job_internal(conn: &Connection, name: &str) -> WorkflowResult<Option<JobHandle>> {
    let job = conn
        .query_row(
            &format!("SELECT {} FROM jobs WHERE name = ?1", JOB_COLUMNS),
            params![name],
            row_to_job,
        )
        .optional()?;
    Ok(job)
}

fn require_job(conn: &Connection, name: &str) -> WorkflowResult<JobHandle> {
    get_job_internal(conn, name)?.ok_or_else(|| WorkflowError::JobNotFound(name.to_string()))
}

fn insert_job(conn: &Connection, name: &str, job_definition: &str) -> WorkflowResult<()> {
    let now = now_ms();
    let enabled = definition::enabled_flag(job_definition).unwrap_or(true);
    conn.execute(
        "INSERT INTO jobs (name, seq, definition, enabled, created_at, updated_at)
         VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM jobs), ?2, ?3, ?4, ?4)",
        params![name, job_definition, enabled, now],
    )?;
    Ok(())
}

fn write_definition(conn: &Connection, name: &str, job_definition: &str) -> WorkflowResult<()> {
    let now = now_ms();
    let changed = match definition::enabled_flag(job_definition) {
        Some(enabled) => conn.execute(
            "UPDATE jobs SET definition = ?1, enabled = ?2, updated_at = ?3 WHERE name = ?4",
            params![job_definition, enabled, now, name],
        )?,
        None => conn.execute(
            "UPDATE jobs SET definition = ?1, updated_at = ?2 WHERE name = ?3",
            params![job_definition, now, name],
        )?,
    };
    if changed == 0 {
        return Err(WorkflowError::JobNotFound(name.to_string()));
    }
    Ok(())
}

fn set_flag(conn: &Connection, name: &str, column: &str, value: bool) -> WorkflowResult<()> {
    let changed = conn.execute(
        &format!(
            "UPDATE jobs SET {} = ?1, updated_at = ?2 WHERE name = ?3",
            column
        ),
        params![value, now_ms(), name],
    )?;
    if changed == 0 {
        return Err(WorkflowError::JobNotFound(name.to_string()));
    }
    Ok(())
}

impl Database {
    /// Insert or overwrite a job definition, e.g. when loading template sources.
    pub fn put_job(&self, name: &str, job_definition: &str) -> WorkflowResult<JobHandle> {
        self.with_conn(|conn| {
            if get_job_internal(conn, name)?.is_some() {
                write_definition(conn, name, job_definition)?;
            } else {
                insert_job(conn, name, job_definition)?;
            }
            require_job(conn, name)
        })
    }

    /// Record that the scheduler started or finished building a job.
    pub fn set_building(&self, name: &str, building: bool) -> WorkflowResult<()> {
        self.with_conn(|conn| set_flag(conn, name, "building", building))
    }

    /// Record that a job entered or left the build queue.
    pub fn set_queued(&self, name: &str, queued: bool) -> WorkflowResult<()> {
        self.with_conn(|conn| set_flag(conn, name, "queued", queued))
    }
}

impl JobStore for Database {
    fn list_jobs(&self) -> WorkflowResult<Vec<JobHandle>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM jobs ORDER BY seq",
                JOB_COLUMNS
            ))?;
            let jobs = stmt
                .query_map([], row_to_job)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(jobs)
        })
    }

    fn get_job(&self, name: &str) -> WorkflowResult<Option<JobHandle>> {
        self.with_conn(|conn| get_job_internal(conn, name))
    }

    fn create_job(&self, name: &str, job_definition: &str) -> WorkflowResult<JobHandle> {
        self.with_conn(|conn| {
            // Check if job name already exists
            if get_job_internal(conn, name)?.is_some() {
                return Err(WorkflowError::DuplicateJob(name.to_string()));
            }
            insert_job(conn, name, job_definition)?;
            require_job(conn, name)
        })
    }

    fn update_job(&self, job: &JobHandle, job_definition: &str) -> WorkflowResult<JobHandle> {
        self.with_conn(|conn| {
            write_definition(conn, &job.name, job_definition)?;
            require_job(conn, &job.name)
        })
    }

    fn set_enabled(&self, job: &JobHandle, enabled: bool) -> WorkflowResult<()> {
        self.with_conn(|conn| set_flag(conn, &job.name, "enabled", enabled))
    }

    fn remove_template_marker(&self, job: &JobHandle) -> WorkflowResult<()> {
        self.with_conn(|conn| {
            let current = require_job(conn, &job.name)?;
            if let Some(stripped) = definition::strip_marker(&current.definition) {
                conn.execute(
                    "UPDATE jobs SET definition = ?1, updated_at = ?2 WHERE name = ?3",
                    params![stripped, now_ms(), &job.name],
                )?;
            }
            Ok(())
        })
    }

    fn delete_job(&self, job: &JobHandle) -> WorkflowResult<()> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM jobs WHERE name = ?1", params![&job.name])?;
            if deleted == 0 {
                return Err(WorkflowError::JobNotFound(job.name.clone()));
            }
            Ok(())
        })
    }

    fn schedule_job(&self, job: &JobHandle) -> WorkflowResult<()> {
        self.with_conn(|conn| set_flag(conn, &job.name, "queued", true))
    }
}
