//! Admission middleware.
//!
//! Runs before every metered route: extracts the caller key, asks the
//! admission policy for a decision, and turns rejections into HTTP 429
//! responses with a `Retry-After` hint. The admission core never logs its
//! own decisions; rejections are logged here.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::RETRY_AFTER, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use crate::admission::{AdmissionPolicy, Decision};

/// Key used when the caller cannot be identified at all.
const UNKNOWN_CALLER: &str = "unknown";

/// Gate a request through the admission policy before dispatching it.
pub async fn admit_request<P: AdmissionPolicy + 'static>(
    State(policy): State<Arc<P>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let key = caller_key(request.headers(), connect_info.map(|ConnectInfo(addr)| addr));
    let path = request.uri().path().to_string();

    match policy.admit(&key, &path, Instant::now()) {
        Decision::Allowed => {
            let response = next.run(request).await;
            policy.on_response(&key, &path);
            response
        }
        Decision::Rejected {
            retry_after_secs,
            message,
        } => {
            warn!(
                key = %key,
                path = %path,
                retry_after_secs,
                "request rejected by admission control"
            );
            rejection_response(retry_after_secs, &message)
        }
    }
}

fn rejection_response(retry_after_secs: u64, message: &str) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(RETRY_AFTER, retry_after_secs.to_string())],
        Json(json!({
            "error": "rate_limit_exceeded",
            "message": message,
            "retryAfter": retry_after_secs,
        })),
    )
        .into_response()
}

/// Identify the caller, preferring proxy-forwarded addresses over the peer
/// address. Falls back to a constant placeholder so the admission contract
/// (non-empty key) always holds.
fn caller_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        let first_hop = forwarded.split(',').next().unwrap_or("").trim();
        if !first_hop.is_empty() {
            return first_hop.to_string();
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => UNKNOWN_CALLER.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_caller_key_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("192.168.1.1, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.42"));

        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(caller_key(&headers, Some(peer)), "192.168.1.1");
    }

    #[test]
    fn test_caller_key_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.42"));

        assert_eq!(caller_key(&headers, None), "203.0.113.42");
    }

    #[test]
    fn test_caller_key_falls_back_to_peer_address() {
        let peer: SocketAddr = "10.1.2.3:55000".parse().unwrap();
        assert_eq!(caller_key(&HeaderMap::new(), Some(peer)), "10.1.2.3");
    }

    #[test]
    fn test_caller_key_never_empty() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(""));

        assert_eq!(caller_key(&headers, None), UNKNOWN_CALLER);
    }
}
