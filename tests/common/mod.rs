#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use entity_rest::{
    common_routes, load_from_dir, resolve, FullConfig, MemoryStore, ResourceRegistry, UnresolvedIds,
};
use serde_json::Value;
use tower::ServiceExt;

pub const EDITOR: &[(&str, &str)] = &[("x-user-id", "ada"), ("x-principals", "group:editors")];
pub const ANONYMOUS: &[(&str, &str)] = &[];

pub fn app_from(config: &FullConfig, policy: UnresolvedIds) -> Router {
    let model = resolve(config).expect("declarations should resolve");
    let registry = ResourceRegistry::build(&model, &config.resources, Arc::new(MemoryStore::new()), policy)
        .expect("resources should build");
    Router::new().merge(common_routes()).merge(registry.router())
}

/// App over the declarations shipped in `sample/`.
pub async fn sample_app(policy: UnresolvedIds) -> Router {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("sample");
    let config = load_from_dir(dir).await.expect("sample declarations should load");
    app_from(&config, policy)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("response expected");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body should be readable");
    if body.is_empty() {
        return (status, Value::Null);
    }
    let json = serde_json::from_slice::<Value>(&body).expect("body should be valid JSON");
    (status, json)
}

pub async fn send_raw(
    app: &Router,
    method: Method,
    uri: &str,
    body: &str,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(Body::from(body.to_string())).expect("request should build");
    send(app, request).await
}

pub async fn send_json(
    app: &Router,
    method: Method,
    uri: &str,
    payload: Value,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    send_raw(app, method, uri, &payload.to_string(), headers).await
}

pub async fn send_empty(app: &Router, method: Method, uri: &str, headers: &[(&str, &str)]) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(Body::empty()).expect("request should build");
    send(app, request).await
}
