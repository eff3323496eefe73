mod common;

use axum::http::StatusCode;
use common::{build_signed_context, build_test_context, request_no_body, TEST_KEY};
use telemon_common::hash::{self, HASH_METADATA};
use telemon_common::proto::metrics_server::Metrics;
use telemon_common::proto::{AddCounterMetricRequest, AddGaugeMetricRequest};
use telemon_common::types::Metric;
use telemon_server::grpc::MetricsService;
use tonic::metadata::MetadataValue;
use tonic::{Code, Request};

fn signed<T>(msg: T, metric: &Metric) -> Request<T> {
    let json = serde_json::to_vec(metric).expect("metric should serialize");
    let tag = hash::sign(&json, TEST_KEY.as_bytes());
    let mut req = Request::new(msg);
    req.metadata_mut().insert(
        HASH_METADATA,
        MetadataValue::try_from(tag.as_str()).expect("hex is valid metadata"),
    );
    req
}

#[tokio::test]
async fn grpc_updates_are_visible_over_http() {
    let ctx = build_test_context();
    let service = MetricsService::new(ctx.state.clone());

    service
        .add_gauge_metric(Request::new(AddGaugeMetricRequest {
            name: "Alloc".into(),
            value: 9.5,
        }))
        .await
        .expect("gauge update should succeed");
    for _ in 0..2 {
        service
            .add_counter_metric(Request::new(AddCounterMetricRequest {
                name: "PollCount".into(),
                value: 3,
            }))
            .await
            .expect("counter update should succeed");
    }

    let resp = request_no_body(&ctx.app, "GET", "/value/gauge/Alloc").await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.text(), "9.5");
    let resp = request_no_body(&ctx.app, "GET", "/value/counter/PollCount").await;
    assert_eq!(resp.text(), "6");
}

#[tokio::test]
async fn grpc_rejects_invalid_arguments() {
    let ctx = build_test_context();
    let service = MetricsService::new(ctx.state.clone());

    let err = service
        .add_counter_metric(Request::new(AddCounterMetricRequest {
            name: String::new(),
            value: 1,
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let err = service
        .add_gauge_metric(Request::new(AddGaugeMetricRequest {
            name: "Alloc".into(),
            value: f64::NAN,
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert!(ctx.storage.is_empty());
}

#[tokio::test]
async fn grpc_checks_signature_metadata() {
    let ctx = build_signed_context();
    let service = MetricsService::new(ctx.state.clone());

    let err = service
        .add_gauge_metric(Request::new(AddGaugeMetricRequest {
            name: "Alloc".into(),
            value: 1.0,
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unauthenticated);

    // Signed for a different value.
    let err = service
        .add_gauge_metric(signed(
            AddGaugeMetricRequest {
                name: "Alloc".into(),
                value: 1.0,
            },
            &Metric::gauge("Alloc", 2.0),
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unauthenticated);
    assert!(ctx.storage.is_empty());

    service
        .add_counter_metric(signed(
            AddCounterMetricRequest {
                name: "PollCount".into(),
                value: 2,
            },
            &Metric::counter("PollCount", 2),
        ))
        .await
        .expect("signed update should succeed");
    assert_eq!(ctx.storage.len(), 1);
}

#[tokio::test]
async fn grpc_counter_overflow_is_internal() {
    let ctx = build_test_context();
    let service = MetricsService::new(ctx.state.clone());
    let add = |value| {
        Request::new(AddCounterMetricRequest {
            name: "Big".into(),
            value,
        })
    };

    service.add_counter_metric(add(i64::MAX)).await.expect("first update fits");
    let err = service.add_counter_metric(add(1)).await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);
}
