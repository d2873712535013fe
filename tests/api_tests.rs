//! Integration tests for the HTTP API.
//!
//! Each test starts the server on a free port and talks plain HTTP/1.1 to it.

use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use template_workflows::api::{ApiState, start_server};
use template_workflows::config::Config;
use template_workflows::db::Database;
use template_workflows::store::definition::marker_element;
use template_workflows::types::TemplateMarker;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn setup_db() -> Arc<Database> {
    let db = Database::open_in_memory().expect("Failed to create in-memory database");
    let marker = marker_element(&TemplateMarker::new("nightly").starting());
    db.put_job(
        "nightly-build",
        &format!("<project>{}<cmd>make @@TARGET@@</cmd></project>", marker),
    )
    .expect("Failed to store template job");
    Arc::new(db)
}

/// Send one request and return the status code and JSON body.
async fn request(addr: SocketAddr, method: &str, path: &str, body: Option<(&str, &str)>) -> (u16, Value) {
    let mut stream = TcpStream::connect(addr).await.expect("connect failed");
    let (content_type, body) = body.unwrap_or(("text/plain", ""));
    let raw = format!(
        "{} {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n{}",
        method,
        path,
        content_type,
        body.len(),
        body
    );
    stream.write_all(raw.as_bytes()).await.expect("write failed");

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.expect("read failed");
    let response = String::from_utf8(response).expect("response is not utf-8");
    let (head, body) = response
        .split_once("\r\n\r\n")
        .expect("malformed response");
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("missing status code");
    let json = serde_json::from_str(body).unwrap_or(Value::Null);
    (status, json)
}

const FORM: &str = "application/x-www-form-urlencoded";

#[tokio::test]
async fn health_reports_ok() {
    let handle = start_server(ApiState::new(setup_db(), &Config::default()), 0)
        .await
        .expect("server failed to start");

    let (status, body) = request(handle.addr(), "GET", "/health", None).await;

    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    handle.shutdown().await;
}

#[tokio::test]
async fn submit_execute_and_delete_over_http() {
    let db = setup_db();
    let handle = start_server(ApiState::new(db.clone(), &Config::default()), 0)
        .await
        .expect("server failed to start");
    let addr = handle.addr();

    let (status, body) = request(addr, "GET", "/api/templates/nightly", None).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["jobs"][0], "nightly-build");

    let form = "template.operation=create&template.templateName=nightly\
                &template.templateInstanceName=web&template.nightly-build=web-build\
                &template.TARGET=all";
    let (status, body) = request(addr, "POST", "/api/containers/ci/submit", Some((FORM, form))).await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["msg"], "Workflow 'web' created");

    let (status, body) = request(addr, "GET", "/api/containers/ci/instances", None).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"][0]["instance_name"], "web");

    let (status, body) = request(addr, "GET", "/api/containers/ci/form", None).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["mode"], "update");

    let (status, _) = request(addr, "POST", "/api/containers/ci/instances/web/execute", None).await;
    assert_eq!(status, 200);

    let (status, body) = request(addr, "DELETE", "/api/containers/ci/instances/web", None).await;
    assert_eq!(status, 409);
    assert_eq!(body["code"], "PRECONDITION_FAILED");

    db.set_queued("web-build", false).unwrap();
    let (status, _) = request(addr, "DELETE", "/api/containers/ci/instances/web", None).await;
    assert_eq!(status, 200);

    handle.shutdown().await;
}

#[tokio::test]
async fn errors_map_to_status_codes() {
    let handle = start_server(ApiState::new(setup_db(), &Config::default()), 0)
        .await
        .expect("server failed to start");
    let addr = handle.addr();

    let form = "template.operation=create&template.templateName=nightly&template.templateInstanceName=web";
    let (status, body) = request(addr, "POST", "/api/containers/ci/submit", Some((FORM, form))).await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "VALIDATION_FAILED");
    assert_eq!(body["field"], "template.TARGET");

    let (status, _) = request(addr, "POST", "/api/containers/ci/instances/ghost/execute", None).await;
    assert_eq!(status, 404);

    let (status, body) = request(
        addr,
        "GET",
        "/api/containers/ci/validate/job-name?name=nightly-build",
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], false);
    assert_eq!(body["data"]["cssClass"], "error");

    handle.shutdown().await;
}
