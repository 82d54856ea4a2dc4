//! Drives [`RestClient`] against a small in-process HTTP stand-in for the
//! emulator's REST surface.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use fnemu_core::{ErrorDetail, ErrorKind, FunctionDescriptor, FunctionName, Trigger};
use fnemu_transport::{ClientConfig, RestClient, TransportClient};
use serde_json::{Value, json};

type Functions = Arc<Mutex<BTreeMap<String, Value>>>;

fn error(status: StatusCode, message: &str) -> Response {
    let body = json!({
        "error": { "code": status.as_u16(), "message": message, "status": "ERROR" }
    });
    (status, Json(body)).into_response()
}

async fn list(State(functions): State<Functions>) -> Json<Value> {
    let functions: Vec<Value> = functions.lock().unwrap().values().cloned().collect();
    Json(json!({ "functions": functions }))
}

async fn create(State(functions): State<Functions>, Json(body): Json<Value>) -> Response {
    let name = body["name"].as_str().unwrap_or_default().to_string();
    let mut functions = functions.lock().unwrap();
    if functions.contains_key(&name) {
        return error(StatusCode::CONFLICT, "Function already exists");
    }
    functions.insert(name.clone(), body);
    Json(json!({ "name": format!("operations/{name}"), "done": true })).into_response()
}

async fn get_function(
    State(functions): State<Functions>,
    Path((project, region, name)): Path<(String, String, String)>,
) -> Response {
    let key = FunctionName::format(&project, &region, &name);
    match functions.lock().unwrap().get(&key) {
        Some(f) => Json(f.clone()).into_response(),
        None => error(StatusCode::NOT_FOUND, &format!("Function {name} not found.")),
    }
}

async fn delete_function(
    State(functions): State<Functions>,
    Path((project, region, name)): Path<(String, String, String)>,
) -> Response {
    let key = FunctionName::format(&project, &region, &name);
    match functions.lock().unwrap().remove(&key) {
        Some(_) => Json(json!({ "done": true })).into_response(),
        None => error(StatusCode::NOT_FOUND, &format!("Function {name} not found.")),
    }
}

async fn call_function(
    State(functions): State<Functions>,
    Path((project, region, name)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let Some(name) = name.strip_suffix(":call") else {
        return error(StatusCode::BAD_REQUEST, "unsupported method");
    };
    let key = FunctionName::format(&project, &region, name);
    if !functions.lock().unwrap().contains_key(&key) {
        return error(StatusCode::NOT_FOUND, &format!("Function {name} not found."));
    }
    Json(json!({ "executionId": "exec-1", "result": body["data"].to_string() })).into_response()
}

async fn spawn_emulator() -> u16 {
    let functions: Functions = Arc::default();
    let app = Router::new()
        .route("/$discovery/rest", get(|| async { Json(json!({ "kind": "discovery#restDescription" })) }))
        .route(
            "/v1beta2/projects/:project/locations/:region/functions",
            get(list).post(create),
        )
        .route(
            "/v1beta2/projects/:project/locations/:region/functions/:name",
            get(get_function).delete(delete_function).post(call_function),
        )
        .with_state(functions);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

fn client(port: u16) -> RestClient {
    RestClient::new(&ClientConfig {
        service_mode: "rest".into(),
        host: "127.0.0.1".into(),
        port,
        project_id: "demo".into(),
        region: "us-central1".into(),
        request_timeout: Duration::from_secs(2),
    })
    .unwrap()
}

fn http_function(name: &str) -> FunctionDescriptor {
    FunctionDescriptor {
        trigger: Some(Trigger::Http { url: None }),
        source_archive_url: Some(format!("/tmp/{name}.zip")),
        timeout: Some(Duration::from_secs(30)),
        ..FunctionDescriptor::new(FunctionName::format("demo", "us-central1", name))
    }
}

#[tokio::test]
async fn full_lifecycle_over_rest() {
    let port = spawn_emulator().await;
    let client = client(port);

    client.test_connection().await.unwrap();
    assert!(client.list_functions().await.unwrap().is_empty());

    client.create_function(&http_function("hello")).await.unwrap();

    let listed = client.list_functions().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].short_name(), "hello");

    let described = client.get_function("hello").await.unwrap();
    assert_eq!(described.trigger, Some(Trigger::Http { url: None }));
    assert_eq!(described.timeout, Some(Duration::from_secs(30)));
    assert_eq!(described.source_archive_url.as_deref(), Some("/tmp/hello.zip"));

    let result = client
        .call_function("hello", &json!({ "message": "hi" }))
        .await
        .unwrap();
    assert_eq!(result.execution_id, "exec-1");
    assert!(result.result.unwrap().contains("hi"));

    client.delete_function("hello").await.unwrap();
    assert!(client.list_functions().await.unwrap().is_empty());
}

#[tokio::test]
async fn http_failures_map_to_structured_kinds() {
    let port = spawn_emulator().await;
    let client = client(port);

    let err = client.get_function("missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.message(), "Function missing not found.");
    assert!(err.details().iter().any(|d| matches!(
        d,
        ErrorDetail::ResourceInfo { resource_name, .. }
            if resource_name == "projects/demo/locations/us-central1/functions/missing"
    )));

    client.create_function(&http_function("twice")).await.unwrap();
    let err = client.create_function(&http_function("twice")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = client.delete_function("missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn unreachable_emulator_is_internal() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = client(port).test_connection().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
}
