#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{to_bytes, Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use telemon_common::transport::DecoderOptions;
use telemon_common::types::{Metric, MetricKind};
use telemon_server::app;
use telemon_server::state::AppState;
use telemon_storage::memory::MemStorage;
use telemon_storage::{MetricMap, Storage};
use tower::util::ServiceExt;

pub const TEST_KEY: &str = "test-secret";

pub struct TestContext {
    pub storage: Arc<MemStorage>,
    pub state: AppState,
    pub app: axum::Router,
}

pub fn build_test_context() -> TestContext {
    build_context_with(DecoderOptions::default())
}

/// Server that requires `HashSHA256` under [`TEST_KEY`].
pub fn build_signed_context() -> TestContext {
    build_context_with(DecoderOptions {
        key: Some(TEST_KEY.as_bytes().to_vec()),
        ..Default::default()
    })
}

pub fn build_context_with(opts: DecoderOptions) -> TestContext {
    let storage = Arc::new(MemStorage::new());
    let state = AppState::new(storage.clone(), opts, 1024 * 1024);
    let app = app::build_http_app(state.clone(), Duration::from_secs(5));
    TestContext {
        storage,
        state,
        app,
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("response body should be JSON")
    }
}

pub async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: impl Into<Body>,
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let req = builder.body(body.into()).expect("request should build");

    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn request_json(app: &axum::Router, method: &str, uri: &str, body: Value) -> TestResponse {
    send(
        app,
        method,
        uri,
        &[("Content-Type", "application/json")],
        body.to_string(),
    )
    .await
}

pub async fn request_no_body(app: &axum::Router, method: &str, uri: &str) -> TestResponse {
    send(app, method, uri, &[], Body::empty()).await
}

/// Delays every update, for exercising the request timeout.
pub struct SlowStorage {
    pub inner: MemStorage,
    pub delay: Duration,
}

#[async_trait]
impl Storage for SlowStorage {
    fn backend(&self) -> &'static str {
        "slow"
    }

    async fn update(&self, metric: &Metric) -> telemon_storage::Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.update(metric).await
    }

    async fn get(&self, kind: MetricKind, id: &str) -> telemon_storage::Result<Metric> {
        self.inner.get(kind, id).await
    }

    async fn get_all(&self) -> telemon_storage::Result<MetricMap> {
        self.inner.get_all().await
    }

    async fn ping(&self) -> telemon_storage::Result<()> {
        self.inner.ping().await
    }
}
