use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use telemon_common::hash;
use telemon_common::transport::TransportError;

/// `HashSHA256`, in the lowercase form header maps store.
static HASH_HEADER: HeaderName = HeaderName::from_static("hashsha256");

fn is_gzip(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|enc| enc.trim().eq_ignore_ascii_case("gzip")))
        .unwrap_or(false)
}

/// Turns the wire body of a `POST` back into the plain JSON the handlers
/// parse: decrypt, gunzip, then check `HashSHA256` against the result.
/// Any failure answers 400 before a handler runs.
pub async fn decode_payload(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if req.method() != Method::POST {
        return next.run(req).await;
    }

    let gzip = is_gzip(&req);
    let signature = req
        .headers()
        .get(&HASH_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let (mut parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read request body");
            return (StatusCode::BAD_REQUEST, "unreadable request body").into_response();
        }
    };

    let plain = match state.decoder.decode(&bytes, gzip, signature.as_deref()) {
        Ok(plain) => plain,
        Err(e) => {
            tracing::warn!(path = %parts.uri.path(), error = %e, "Rejected request payload");
            let (status, msg) = match e {
                TransportError::MissingSignature => {
                    (StatusCode::BAD_REQUEST, "missing HashSHA256 header")
                }
                TransportError::SignatureMismatch => {
                    (StatusCode::BAD_REQUEST, "HashSHA256 does not match payload")
                }
                TransportError::Decryption(_) => {
                    (StatusCode::BAD_REQUEST, "payload could not be decrypted")
                }
                TransportError::InflatedTooLarge { .. } => {
                    (StatusCode::PAYLOAD_TOO_LARGE, "decompressed payload too large")
                }
                _ => (StatusCode::BAD_REQUEST, "payload could not be decoded"),
            };
            return (status, msg).into_response();
        }
    };

    parts.headers.remove(header::CONTENT_ENCODING);
    parts.headers.remove(header::CONTENT_LENGTH);
    next.run(Request::from_parts(parts, Body::from(plain))).await
}

/// Adds `HashSHA256` over the response body when a key is configured.
pub async fn sign_response(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let response = next.run(req).await;
    let Some(key) = state.key.as_deref() else {
        return response;
    };

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Failed to buffer response for signing");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if let Ok(value) = HeaderValue::from_str(&hash::sign(&bytes, key)) {
        parts.headers.insert(HASH_HEADER.clone(), value);
    }
    Response::from_parts(parts, Body::from(bytes))
}
