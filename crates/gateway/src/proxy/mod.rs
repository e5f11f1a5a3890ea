//! The metered proxy endpoint
//!
//! One wildcard route that authenticates the caller, forwards the request to
//! the configured upstream, classifies the outcome, and hands settlement to
//! the billing crate in a spawned task. Once the upstream has answered,
//! nothing that happens in billing can change what the caller receives.

pub mod classifier;
pub mod forwarder;
pub mod resolver;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, Method, Request},
    response::Response,
};
use serde_json::Value;
use tollgate_billing::AuditEntry;

use crate::error::ApiError;
use crate::state::AppState;

/// Handle one proxied call
pub async fn handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request: Request<Body>,
) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let method = parts.method;
    let headers = parts.headers;
    let query = parts.uri.query().map(str::to_owned);

    // 1. Authenticate the caller and run the pre-flight checks. Everything
    //    failing here returns synchronously; no upstream call, no billing.
    let api_key = resolver::extract_api_key(&headers).ok_or(ApiError::Unauthenticated)?;
    let credential = resolver::resolve(&state.pool, api_key).await?;
    credential.authorize()?;

    // 2. Read the inbound body once; it is reused for forwarding and logging.
    let body_bytes = axum::body::to_bytes(body, state.config.max_request_body_bytes)
        .await
        .map_err(|_| ApiError::BadRequest("Request body too large".to_string()))?;
    let request_body = String::from_utf8_lossy(&body_bytes).into_owned();

    // Logical request identity for the audit trail, e.g. "GET /getArticle"
    let request_api = format!("{} /{}", method, path);

    // GET carries no body; log its query parameters as JSON so the audit
    // trail stays uniform across methods.
    let logged_request_body = if method == Method::GET {
        query.as_deref().map(query_to_json).unwrap_or_default()
    } else {
        request_body.clone()
    };

    // 3. Forward to the upstream provider.
    let target_url = forwarder::build_target_url(
        &credential.upstream_host,
        &credential.upstream_path,
        query.as_deref(),
    );
    let has_body = method != Method::GET && !request_body.is_empty();
    let outbound_headers = forwarder::sanitize_headers(
        &headers,
        credential.upstream_api_key.as_deref(),
        has_body,
    );
    let outbound_body = has_body.then(|| request_body.clone());

    let upstream = forwarder::forward(
        &state.http,
        method,
        &target_url,
        outbound_headers,
        outbound_body,
    )
    .await?;

    // 4. Derive the caller-facing body. The raw body is always what gets
    //    persisted; the filtered copy is what the caller sees and what the
    //    log keeps as the display variant.
    let (client_body, display_body) = match &credential.strip_field {
        Some(field) => {
            let filtered = classifier::filter_response_body(
                &upstream.body,
                upstream.content_type.as_deref(),
                field,
            );
            (filtered.clone(), Some(filtered))
        }
        None => (upstream.body.clone(), None),
    };

    // 5. Classify and settle off the critical path.
    let billable = state.outcome.is_billable(
        upstream.status,
        upstream.content_type.as_deref(),
        &upstream.body,
    );

    let entry = AuditEntry {
        account_id: credential.account_id,
        provider: credential.provider.clone(),
        request_api,
        request_body: logged_request_body,
        response_body: upstream.body.clone(),
        display_response_body: display_body,
    };

    spawn_settlement(&state, &credential, billable, entry);

    // 6. Answer the caller with the upstream's status and the filtered body.
    let content_type = upstream
        .content_type
        .as_deref()
        .filter(|ct| !ct.is_empty())
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));

    Response::builder()
        .status(upstream.status)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(client_body))
        .map_err(|_| ApiError::Internal)
}

/// Kick off settlement (or the zero-cost log write) in a background task
///
/// The caller's response is already prepared; from here on, failures only
/// degrade to retry-then-compensate and are operator-visible, never
/// caller-visible.
fn spawn_settlement(
    state: &AppState,
    credential: &resolver::ResolvedCredential,
    billable: bool,
    entry: AuditEntry,
) {
    let settlement = state.settlement.clone();
    let retry = state.retry.clone();

    if billable {
        let compensation = state.compensation.clone();
        let binding_id = credential.binding_id;
        let amount_cents = credential.price_cents;
        tokio::spawn(async move {
            tollgate_billing::settle_with_recovery(
                &settlement,
                &compensation,
                &retry,
                binding_id,
                amount_cents,
                &entry,
            )
            .await;
        });
    } else {
        tokio::spawn(async move {
            tollgate_billing::retry::log_unbilled_with_retry(&settlement, &retry, &entry).await;
        });
    }
}

/// Serialize a query string into a JSON object for the audit log
fn query_to_json(query: &str) -> String {
    let params: serde_json::Map<String, Value> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
        .collect();
    Value::Object(params).to_string()
}
