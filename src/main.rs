//! Template Workflows server and CLI
//!
//! Instantiates named workflow instances from templated job definitions and
//! keeps them in sync with their templates.

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::sync::Arc;
use template_workflows::api::{ApiState, start_server};
use template_workflows::cli::{Cli, Command, JobCommand};
use template_workflows::config::Config;
use template_workflows::container::WorkflowContainer;
use template_workflows::db::Database;
use template_workflows::error::{Outcome, WorkflowError};
use template_workflows::logging::{self, LogTarget};
use template_workflows::store::JobStore;
use template_workflows::template::template_names;
use template_workflows::types::ActiveSelection;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(&LogTarget::parse(&cli.log), cli.verbose)?;

    let mut config = Config::discover(cli.config.as_deref())?;
    if let Some(db_path) = &cli.database {
        config.server.db_path = db_path.clone();
    }
    if let Some(container) = &cli.container {
        config.server.container = container.clone();
    }
    debug!(?config, "Configuration loaded");

    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(config).await
        }
        command => {
            let outcome = run_command(&config, command)
                .unwrap_or_else(|err| Outcome::failure(&WorkflowError::from(err)));
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.result {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn run_server(config: Config) -> Result<()> {
    let db = Arc::new(Database::open(&config.server.db_path)?);
    info!(path = %config.server.db_path.display(), "Database opened");

    let state = ApiState::new(db, &config);
    let handle = start_server(state, config.server.port).await?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    handle.shutdown().await;
    Ok(())
}

fn open_container(config: &Config, db: &Arc<Database>) -> Result<WorkflowContainer> {
    let jobs: Arc<dyn JobStore> = db.clone();
    let container = WorkflowContainer::open(
        config.server.container.clone(),
        jobs,
        db.clone(),
        config.gate.process_gate(),
    )?;
    Ok(container)
}

fn run_command(config: &Config, command: Command) -> Result<Outcome> {
    let db = Arc::new(Database::open(&config.server.db_path)?);
    let open = || open_container(config, &db);

    let outcome = match command {
        Command::Serve { .. } => anyhow::bail!("serve is not a one-shot command"),
        Command::Templates => Outcome::from_result(template_names(db.as_ref()), |names| {
            format!("{} templates", names.len())
        }),
        Command::Describe { template } => {
            Outcome::from_result(open()?.describe_template(&template), |d| d.message())
        }
        Command::List => {
            let container = open()?;
            let instances: Vec<_> = container
                .instances()
                .iter()
                .map(|instance| instance.as_ref().clone())
                .collect();
            Outcome::ok(container.project_description()).with_data(&instances)
        }
        Command::Form {
            selection,
            template,
        } => {
            let container = open()?;
            let result = container
                .set_active_instance(ActiveSelection::parse(&selection))
                .and_then(|_| container.describe_active(template.as_deref()));
            Outcome::from_result(result, |view| view.message())
        }
        Command::Submit(args) => {
            let form = args.to_form()?;
            Outcome::from_result(open()?.submit(&form), |r| r.message())
        }
        Command::UpdateAll => Outcome::from_result(open()?.update_all(), |s| s.message()),
        Command::Execute { instance } => {
            Outcome::from_result(open()?.execute_workflow(&instance), |r| r.message())
        }
        Command::Delete { instance } => {
            Outcome::from_result(open()?.delete_instance(&instance), |r| r.message())
        }
        Command::ValidateJobName { name, no_reuse } => {
            Outcome::from_check(&open()?.validate_job_name(&name, !no_reuse)?)
        }
        Command::ValidateInstanceName { name } => {
            Outcome::from_check(&open()?.validate_instance_name(&name))
        }
        Command::ValidateJobRunning { name } => {
            Outcome::from_check(&open()?.validate_job_is_not_running(&name)?)
        }
        Command::Job(job) => run_job_command(&db, job)?,
    };
    Ok(outcome)
}

fn run_job_command(db: &Database, command: JobCommand) -> Result<Outcome> {
    let outcome = match command {
        JobCommand::Put { name, file } => {
            let definition = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let job = db.put_job(&name, &definition)?;
            Outcome::ok(format!("Job '{}' saved", job.name)).with_data(&job)
        }
        JobCommand::List => {
            let jobs: Vec<_> = db
                .list_jobs()?
                .into_iter()
                .map(|job| {
                    let marker = db.template_marker(&job);
                    json!({
                        "name": job.name,
                        "enabled": job.enabled,
                        "building": job.building,
                        "queued": job.queued,
                        "templates": marker.as_ref().map(|m| m.names().collect::<Vec<_>>()),
                        "starting_job": marker.as_ref().is_some_and(|m| m.starting_job),
                    })
                })
                .collect();
            Outcome::ok(format!("{} jobs", jobs.len())).with_data(&jobs)
        }
        JobCommand::Show { name } => {
            let job = db
                .get_job(&name)?
                .ok_or_else(|| WorkflowError::JobNotFound(name.clone()))?;
            Outcome::ok(job.definition.clone()).with_data(&job)
        }
    };
    Ok(outcome)
}
