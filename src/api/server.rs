//! axum router and handlers.

use super::ApiState;
use crate::container::{FormRequest, WorkflowContainer};
use crate::error::{ErrorCode, Outcome, WorkflowError, WorkflowResult};
use crate::template::template_names;
use crate::types::{ActiveSelection, WorkflowInstance};
use axum::{
    Router,
    extract::{Form, Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

type Reply = (StatusCode, Json<Outcome>);

fn status_for(code: Option<ErrorCode>) -> StatusCode {
    match code {
        None => StatusCode::OK,
        Some(ErrorCode::ValidationFailed) | Some(ErrorCode::DuplicateName) => {
            StatusCode::BAD_REQUEST
        }
        Some(ErrorCode::NotFound) => StatusCode::NOT_FOUND,
        Some(ErrorCode::PreconditionFailed) => StatusCode::CONFLICT,
        Some(ErrorCode::LockTimeout) => StatusCode::SERVICE_UNAVAILABLE,
        Some(ErrorCode::HostSystemError) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reply(outcome: Outcome) -> Reply {
    (status_for(outcome.code), Json(outcome))
}

/// Run a core call on the blocking pool.
async fn blocking<T, F>(f: F) -> WorkflowResult<T>
where
    F: FnOnce() -> WorkflowResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(WorkflowError::host)?
}

/// Run a core call against a container, opening it if needed.
async fn with_container<T, F>(state: ApiState, container: String, f: F) -> WorkflowResult<T>
where
    F: FnOnce(&WorkflowContainer) -> WorkflowResult<T> + Send + 'static,
    T: Send + 'static,
{
    blocking(move || {
        let container = state.container(&container)?;
        f(&container)
    })
    .await
}

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_templates(State(state): State<ApiState>) -> Reply {
    let db = Arc::clone(state.db());
    let result = blocking(move || template_names(db.as_ref())).await;
    reply(Outcome::from_result(result, |names| {
        format!("{} templates", names.len())
    }))
}

async fn describe_template(
    State(state): State<ApiState>,
    Path(template): Path<String>,
) -> Reply {
    let container = state.default_container().to_string();
    let result = with_container(state, container, move |c| c.describe_template(&template)).await;
    reply(Outcome::from_result(result, |d| d.message()))
}

async fn list_instances(State(state): State<ApiState>, Path(container): Path<String>) -> Reply {
    let result = with_container(state, container, |c| {
        let instances: Vec<WorkflowInstance> =
            c.instances().iter().map(|i| WorkflowInstance::clone(i)).collect();
        Ok((c.project_description(), instances))
    })
    .await;
    match result {
        Ok((description, instances)) => reply(Outcome::ok(description).with_data(&instances)),
        Err(err) => reply(Outcome::failure(&err)),
    }
}

async fn submit(
    State(state): State<ApiState>,
    Path(container): Path<String>,
    Form(fields): Form<HashMap<String, String>>,
) -> Reply {
    let form = FormRequest::from(fields);
    let result = with_container(state, container, move |c| c.submit(&form)).await;
    reply(Outcome::from_result(result, |r| r.message()))
}

async fn update_all(State(state): State<ApiState>, Path(container): Path<String>) -> Reply {
    let result = with_container(state, container, |c| c.update_all()).await;
    reply(Outcome::from_result(result, |s| s.message()))
}

#[derive(Deserialize)]
struct ActiveBody {
    #[serde(default)]
    selection: String,
}

async fn set_active(
    State(state): State<ApiState>,
    Path(container): Path<String>,
    Json(body): Json<ActiveBody>,
) -> Reply {
    let selection = ActiveSelection::parse(&body.selection);
    let result = with_container(state, container, move |c| {
        c.set_active_instance(selection.clone())?;
        Ok(selection)
    })
    .await;
    reply(Outcome::from_result(result, |_| "Selection staged".to_string()))
}

#[derive(Deserialize)]
struct FormQuery {
    template: Option<String>,
}

async fn active_form(
    State(state): State<ApiState>,
    Path(container): Path<String>,
    Query(query): Query<FormQuery>,
) -> Reply {
    let result = with_container(state, container, move |c| {
        c.describe_active(query.template.as_deref())
    })
    .await;
    reply(Outcome::from_result(result, |view| view.message()))
}

async fn execute(
    State(state): State<ApiState>,
    Path((container, instance)): Path<(String, String)>,
) -> Reply {
    let result = with_container(state, container, move |c| c.execute_workflow(&instance)).await;
    reply(Outcome::from_result(result, |r| r.message()))
}

async fn delete_instance(
    State(state): State<ApiState>,
    Path((container, instance)): Path<(String, String)>,
) -> Reply {
    let result = with_container(state, container, move |c| c.delete_instance(&instance)).await;
    reply(Outcome::from_result(result, |r| r.message()))
}

#[derive(Deserialize)]
struct NameQuery {
    #[serde(default)]
    name: String,
    allow_existing: Option<bool>,
}

async fn validate_job_name(
    State(state): State<ApiState>,
    Path(container): Path<String>,
    Query(query): Query<NameQuery>,
) -> Reply {
    let allow_reuse = query.allow_existing.unwrap_or(true);
    let result = with_container(state, container, move |c| {
        c.validate_job_name(&query.name, allow_reuse)
    })
    .await;
    match result {
        Ok(check) => reply(Outcome::from_check(&check)),
        Err(err) => reply(Outcome::failure(&err)),
    }
}

async fn validate_instance_name(
    State(state): State<ApiState>,
    Path(container): Path<String>,
    Query(query): Query<NameQuery>,
) -> Reply {
    let result = with_container(state, container, move |c| {
        Ok(c.validate_instance_name(&query.name))
    })
    .await;
    match result {
        Ok(check) => reply(Outcome::from_check(&check)),
        Err(err) => reply(Outcome::failure(&err)),
    }
}

async fn validate_job_running(
    State(state): State<ApiState>,
    Path(container): Path<String>,
    Query(query): Query<NameQuery>,
) -> Reply {
    let result = with_container(state, container, move |c| {
        c.validate_job_is_not_running(&query.name)
    })
    .await;
    match result {
        Ok(check) => reply(Outcome::from_check(&check)),
        Err(err) => reply(Outcome::failure(&err)),
    }
}

/// Build the router with all routes.
pub fn build_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/templates", get(list_templates))
        .route("/api/templates/{template}", get(describe_template))
        .route("/api/containers/{container}/instances", get(list_instances))
        .route("/api/containers/{container}/submit", post(submit))
        .route("/api/containers/{container}/update-all", post(update_all))
        .route("/api/containers/{container}/active", post(set_active))
        .route("/api/containers/{container}/form", get(active_form))
        .route(
            "/api/containers/{container}/instances/{instance}/execute",
            post(execute),
        )
        .route(
            "/api/containers/{container}/instances/{instance}",
            axum::routing::delete(delete_instance),
        )
        .route(
            "/api/containers/{container}/validate/job-name",
            get(validate_job_name),
        )
        .route(
            "/api/containers/{container}/validate/instance-name",
            get(validate_instance_name),
        )
        .route(
            "/api/containers/{container}/validate/job-running",
            get(validate_job_running),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A running server.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the server is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

/// Start the HTTP server on localhost. Port 0 picks a free port.
pub async fn start_server(state: ApiState, port: u16) -> anyhow::Result<ServerHandle> {
    let app = build_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    info!("API server listening on http://{}", bound_addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                info!("API server shutting down");
            })
            .await
        {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(ServerHandle {
        addr: bound_addr,
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}
