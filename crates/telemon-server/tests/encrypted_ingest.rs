mod common;

use axum::http::StatusCode;
use common::{build_context_with, request_no_body, send, TEST_KEY};
use rsa::{RsaPrivateKey, RsaPublicKey};
use telemon_common::transport::{DecoderOptions, Encoder, EncoderOptions};
use telemon_common::types::Metric;

fn key_pair() -> (RsaPrivateKey, RsaPublicKey) {
    let private_key =
        RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("key generation should succeed");
    let public_key = RsaPublicKey::from(&private_key);
    (private_key, public_key)
}

#[tokio::test]
async fn encrypted_signed_gzip_batch_is_accepted() {
    let (private_key, public_key) = key_pair();
    let ctx = build_context_with(DecoderOptions {
        key: Some(TEST_KEY.as_bytes().to_vec()),
        private_key: Some(private_key),
        ..Default::default()
    });
    let encoder = Encoder::new(EncoderOptions {
        key: Some(TEST_KEY.as_bytes().to_vec()),
        compress: true,
        public_key: Some(public_key),
    });

    let payload = encoder
        .encode_batch(&[Metric::counter("PollCount", 4)])
        .expect("payload should encode");
    assert!(payload.encrypted);
    let signature = payload.signature.clone().expect("payload should be signed");

    let resp = send(
        &ctx.app,
        "POST",
        "/updates/",
        &[
            ("Content-Type", "application/json"),
            ("Content-Encoding", "gzip"),
            ("HashSHA256", signature.as_str()),
        ],
        payload.body,
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = request_no_body(&ctx.app, "GET", "/value/counter/PollCount").await;
    assert_eq!(resp.text(), "4");
}

#[tokio::test]
async fn undecryptable_body_is_rejected() {
    let (private_key, _) = key_pair();
    let ctx = build_context_with(DecoderOptions {
        key: None,
        private_key: Some(private_key),
        ..Default::default()
    });

    let resp = send(
        &ctx.app,
        "POST",
        "/update/",
        &[("Content-Type", "application/json")],
        r#"{"id":"Alloc","type":"gauge","value":1.0}"#,
    )
    .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert!(ctx.storage.is_empty());
}
