//! CLI command definitions for template-workflows
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

use crate::container::FormRequest;
use crate::container::request::{
    ALLOW_EXISTING_KEY, INSTANCE_NAME_KEY, OPERATION_KEY, TEMPLATE_NAME_KEY,
};
use crate::types::Operation;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;

/// Template workflows server and CLI tools
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<PathBuf>,

    /// Container owning the workflow instances (overrides config)
    #[arg(long, global = true)]
    pub container: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP server (default if no subcommand given)
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// List template names
    Templates,

    /// Show a template's jobs and parameters
    Describe { template: String },

    /// List workflow instances
    List,

    /// Show the form for a selection: an instance name or `template.createNewTemplate`
    Form {
        selection: String,

        /// Template for a create form
        #[arg(long)]
        template: Option<String>,
    },

    /// Create or update a workflow instance
    Submit(SubmitArgs),

    /// Re-apply every instance to its template's current jobs
    UpdateAll,

    /// Schedule an instance's starting jobs
    Execute { instance: String },

    /// Delete an instance and the jobs it created
    Delete { instance: String },

    /// Check a prospective target job name
    ValidateJobName {
        name: String,

        /// Treat an existing job as an error instead of reusing it
        #[arg(long)]
        no_reuse: bool,
    },

    /// Check a prospective instance name
    ValidateInstanceName { name: String },

    /// Check that a job is neither building nor queued
    ValidateJobRunning { name: String },

    /// Manage job definitions in the job store
    #[command(subcommand)]
    Job(JobCommand),
}

#[derive(Subcommand, Debug)]
pub enum JobCommand {
    /// Create or overwrite a job from a definition file
    Put { name: String, file: PathBuf },

    /// List jobs with their template membership
    List,

    /// Print a job's definition
    Show { name: String },
}

#[derive(Args, Debug, Default)]
pub struct SubmitArgs {
    /// create or update
    #[arg(long, default_value = "create")]
    pub operation: String,

    /// Template to instantiate (create only)
    #[arg(long)]
    pub template: Option<String>,

    /// Instance name
    #[arg(long)]
    pub instance: Option<String>,

    /// Target for a template job, as TEMPLATE_JOB=TARGET (repeatable)
    #[arg(long = "job", value_name = "TEMPLATE_JOB=TARGET")]
    pub jobs: Vec<String>,

    /// Parameter value, as NAME=VALUE (repeatable)
    #[arg(long = "param", value_name = "NAME=VALUE")]
    pub params: Vec<String>,

    /// Refuse to reuse existing jobs on create
    #[arg(long)]
    pub no_reuse: bool,

    /// JSON file with a flat request; flags given as well take precedence
    #[arg(long)]
    pub form: Option<PathBuf>,
}

impl SubmitArgs {
    /// Build the flat request the container reads.
    pub fn to_form(&self) -> Result<FormRequest> {
        let mut form = match &self.form {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                let fields: HashMap<String, String> = serde_json::from_str(&content)
                    .with_context(|| format!("parsing {}", path.display()))?;
                FormRequest::from(fields)
            }
            None => FormRequest::new(),
        };

        let operation: Operation = self.operation.parse()?;
        form = form.with(OPERATION_KEY, operation.as_str());
        if let Some(template) = &self.template {
            form = form.with(TEMPLATE_NAME_KEY, template);
        }
        if let Some(instance) = &self.instance {
            form = form.with(INSTANCE_NAME_KEY, instance);
        }
        for pair in &self.jobs {
            let (template_job, target) = split_pair(pair)?;
            form = form.job(template_job, target);
        }
        for pair in &self.params {
            let (name, value) = split_pair(pair)?;
            form = form.param(name, value);
        }
        if self.no_reuse {
            form = form.with(ALLOW_EXISTING_KEY, "off");
        }
        Ok(form)
    }
}

fn split_pair(pair: &str) -> Result<(&str, &str)> {
    pair.split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| (key.trim(), value))
        .with_context(|| format!("expected KEY=VALUE, got '{}'", pair))
}
