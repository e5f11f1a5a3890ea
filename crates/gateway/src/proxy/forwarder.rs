//! Upstream request forwarding
//!
//! Builds the outbound request from the inbound one: copy headers minus a
//! deny-list, swap the caller's credential for the provider's upstream key,
//! preserve method, query string and body verbatim. This module never
//! touches the balance or the audit log; its only side effect is the
//! outbound call.

use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};

use crate::error::ApiError;
use crate::proxy::resolver::{API_KEY_HEADER, API_KEY_HEADER_ALT};

/// Headers never copied to the upstream request: hop-by-hop headers, proxy
/// internals, and client tooling noise.
const EXCLUDED_HEADERS: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "transfer-encoding",
    // Edge proxy internals
    "x-consumer-username",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-port",
    "x-forwarded-proto",
    "x-real-ip",
    // Client tooling
    "postman-token",
    "cache-control",
];

/// Raw upstream response, read once and reused for both the audit log and
/// the caller-facing reply
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: String,
    pub content_type: Option<String>,
}

/// Build the outbound target URL from the route config plus inbound query
pub fn build_target_url(host: &str, path: &str, query: Option<&str>) -> String {
    let mut url = format!(
        "{}{}{}",
        host.trim_end_matches('/'),
        if path.starts_with('/') { "" } else { "/" },
        path
    );

    if let Some(q) = query {
        if !q.is_empty() {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(q);
        }
    }

    url
}

/// Copy inbound headers minus the deny-list, substituting the upstream key
pub fn sanitize_headers(
    inbound: &HeaderMap,
    upstream_api_key: Option<&str>,
    has_body: bool,
) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in inbound {
        let lower = name.as_str().to_lowercase();
        if EXCLUDED_HEADERS.contains(&lower.as_str()) {
            continue;
        }
        // Identity-aware edge proxies decorate requests with x-clerk-* auth
        // headers; none of them belong upstream.
        if lower.starts_with("x-clerk-") {
            continue;
        }
        // The inbound credential never reaches the provider
        if lower == API_KEY_HEADER || lower == API_KEY_HEADER_ALT {
            continue;
        }
        headers.insert(name.clone(), value.clone());
    }

    if let Some(key) = upstream_api_key {
        if let Ok(value) = HeaderValue::from_str(key) {
            headers.insert(API_KEY_HEADER, value);
        }
    }

    if has_body && !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
    }

    headers
}

/// Send the outbound request and read the response body once
pub async fn forward(
    client: &reqwest::Client,
    method: Method,
    target_url: &str,
    headers: HeaderMap,
    body: Option<String>,
) -> Result<UpstreamResponse, ApiError> {
    let mut request = client.request(method, target_url).headers(headers);
    if let Some(body) = body {
        request = request.body(body);
    }

    let response = request.send().await.map_err(|e| {
        tracing::error!(target_url = %target_url, error = %e, "upstream request failed");
        ApiError::UpstreamUnavailable
    })?;

    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let body = response.text().await.map_err(|e| {
        tracing::error!(target_url = %target_url, error = %e, "failed reading upstream body");
        ApiError::UpstreamUnavailable
    })?;

    Ok(UpstreamResponse {
        status,
        body,
        content_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_target_url() {
        assert_eq!(
            build_target_url("https://api.example.com/", "/v1/send", None),
            "https://api.example.com/v1/send"
        );
        assert_eq!(
            build_target_url("https://api.example.com", "v1/send", Some("a=1&b=2")),
            "https://api.example.com/v1/send?a=1&b=2"
        );
        // Query appended to a path that already has one
        assert_eq!(
            build_target_url("https://api.example.com", "/v1/send?fixed=1", Some("a=1")),
            "https://api.example.com/v1/send?fixed=1&a=1"
        );
        assert_eq!(
            build_target_url("https://api.example.com", "/v1/send", Some("")),
            "https://api.example.com/v1/send"
        );
    }

    #[test]
    fn test_sanitize_headers_denylist_and_credential_swap() {
        let mut inbound = HeaderMap::new();
        inbound.insert("host", "gateway.local".parse().unwrap());
        inbound.insert("x-forwarded-for", "1.2.3.4".parse().unwrap());
        inbound.insert("postman-token", "abc".parse().unwrap());
        inbound.insert("x-clerk-auth-status", "signed-in".parse().unwrap());
        inbound.insert("x-clerk-auth-token", "jwt".parse().unwrap());
        inbound.insert("x-api-key", "caller-credential".parse().unwrap());
        inbound.insert("apikey", "caller-credential".parse().unwrap());
        inbound.insert("x-custom", "keep-me".parse().unwrap());
        inbound.insert("content-type", "text/plain".parse().unwrap());

        let headers = sanitize_headers(&inbound, Some("upstream-secret"), true);

        assert!(headers.get("host").is_none());
        assert!(headers.get("x-forwarded-for").is_none());
        assert!(headers.get("postman-token").is_none());
        assert!(headers.get("x-clerk-auth-status").is_none());
        assert!(headers.get("x-clerk-auth-token").is_none());
        assert!(headers.get("apikey").is_none());
        assert_eq!(headers.get("x-custom").unwrap(), "keep-me");
        assert_eq!(headers.get("x-api-key").unwrap(), "upstream-secret");
        // Existing content type preserved
        assert_eq!(headers.get("content-type").unwrap(), "text/plain");
    }

    #[test]
    fn test_sanitize_headers_defaults_content_type_for_body() {
        let headers = sanitize_headers(&HeaderMap::new(), None, true);
        assert_eq!(headers.get("content-type").unwrap(), "application/json");

        let headers = sanitize_headers(&HeaderMap::new(), None, false);
        assert!(headers.get("content-type").is_none());
    }

    #[tokio::test]
    async fn test_forward_swaps_credential_and_reads_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/send")
            .match_header("x-api-key", "upstream-secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"Success":true}"#)
            .create_async()
            .await;

        let mut inbound = HeaderMap::new();
        inbound.insert("x-api-key", "caller-credential".parse().unwrap());

        let headers = sanitize_headers(&inbound, Some("upstream-secret"), true);
        let url = build_target_url(&server.url(), "/v1/send", None);
        let client = reqwest::Client::new();

        let response = forward(&client, Method::POST, &url, headers, Some("{}".to_string()))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, r#"{"Success":true}"#);
        assert_eq!(response.content_type.as_deref(), Some("application/json"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_forward_maps_network_failure() {
        let client = reqwest::Client::new();
        // Nothing listens on port 1
        let result = forward(
            &client,
            Method::GET,
            "http://127.0.0.1:1/nope",
            HeaderMap::new(),
            None,
        )
        .await;

        assert!(matches!(result, Err(ApiError::UpstreamUnavailable)));
    }
}
