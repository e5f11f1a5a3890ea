//! Outcome classification and response filtering
//!
//! Decides whether an upstream response represents business-level success,
//! which alone gates settlement. Providers do not agree on how they signal
//! failure inside a 2xx response, so the default heuristic sniffs the common
//! field conventions in a fixed priority order. The trait seam exists so a
//! provider with known semantics can get its own policy instead.

use axum::http::StatusCode;
use serde_json::Value;

/// Billability strategy for upstream responses
pub trait OutcomePolicy: Send + Sync {
    fn is_billable(&self, status: StatusCode, content_type: Option<&str>, body: &str) -> bool;
}

/// Default field-sniffing heuristic
///
/// Priority order on a JSON object body with 2xx status:
/// `Success`/`success` boolean, then `Code`/`code` zero-means-success, then
/// error/message fields, then success by default. Anything unparseable or
/// non-JSON counts as success as long as the status was 2xx.
pub struct FieldHeuristic;

impl OutcomePolicy for FieldHeuristic {
    fn is_billable(&self, status: StatusCode, content_type: Option<&str>, body: &str) -> bool {
        if !status.is_success() {
            return false;
        }

        // Empty 2xx body: some providers respond with no content
        if body.is_empty() {
            return true;
        }

        if !content_type
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false)
        {
            return true;
        }

        let Ok(value) = serde_json::from_str::<Value>(body) else {
            return true;
        };

        let Value::Object(obj) = value else {
            return true;
        };

        if let Some(v) = obj.get("Success").or_else(|| obj.get("success")) {
            return truthy(v);
        }

        if let Some(v) = obj.get("Code") {
            return is_zero(v);
        }
        if let Some(v) = obj.get("code") {
            return is_zero(v) || v.as_str() == Some("success");
        }

        if ["error", "Error", "message", "Message"]
            .iter()
            .any(|k| obj.contains_key(*k))
        {
            let has_error = obj.get("error").map(non_empty).unwrap_or(false)
                || obj.get("Error").map(non_empty).unwrap_or(false)
                || message_mentions_error(obj.get("message"))
                || message_mentions_error(obj.get("Message"));
            return !has_error;
        }

        // No recognizable field and the status was 2xx
        true
    }
}

/// `true` or the string `"true"`
fn truthy(v: &Value) -> bool {
    v == &Value::Bool(true) || v.as_str() == Some("true")
}

/// Numeric or string zero
fn is_zero(v: &Value) -> bool {
    v.as_i64() == Some(0) || v.as_str() == Some("0")
}

/// JS-style truthiness: null, false, 0 and "" don't count as an error value
fn non_empty(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64() != Some(0.0),
        _ => true,
    }
}

/// A message field only signals failure when its text mentions "error"
fn message_mentions_error(v: Option<&Value>) -> bool {
    v.and_then(Value::as_str)
        .map(|s| s.to_lowercase().contains("error"))
        .unwrap_or(false)
}

/// Recursively remove `field` from every object in a JSON tree
pub fn strip_sensitive_field(value: Value, field: &str) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| strip_sensitive_field(item, field))
                .collect(),
        ),
        Value::Object(obj) => Value::Object(
            obj.into_iter()
                .filter(|(key, _)| key != field)
                .map(|(key, item)| (key, strip_sensitive_field(item, field)))
                .collect(),
        ),
        other => other,
    }
}

/// Produce the caller-facing/display copy of a response body
///
/// Strips `field` recursively when the body is JSON; non-JSON bodies pass
/// through unchanged. The raw body is what gets persisted for
/// reconciliation, never this.
pub fn filter_response_body(body: &str, content_type: Option<&str>, field: &str) -> String {
    let is_json = content_type
        .map(|ct| ct.contains("application/json"))
        .unwrap_or(false);
    if !is_json || body.is_empty() {
        return body.to_string();
    }

    match serde_json::from_str::<Value>(body) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => {
            let filtered = strip_sensitive_field(value, field);
            serde_json::to_string(&filtered).unwrap_or_else(|_| body.to_string())
        }
        _ => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: Option<&str> = Some("application/json");

    fn billable(status: u16, content_type: Option<&str>, body: &str) -> bool {
        FieldHeuristic.is_billable(
            StatusCode::from_u16(status).unwrap(),
            content_type,
            body,
        )
    }

    #[test]
    fn test_non_2xx_never_billable() {
        assert!(!billable(500, JSON, r#"{"Success":true}"#));
        assert!(!billable(404, None, ""));
    }

    #[test]
    fn test_success_field_wins() {
        assert!(billable(200, JSON, r#"{"Success":true}"#));
        assert!(billable(200, JSON, r#"{"Success":"true"}"#));
        assert!(!billable(200, JSON, r#"{"Success":false}"#));
        assert!(!billable(200, JSON, r#"{"success":false,"code":0}"#));
    }

    #[test]
    fn test_code_zero_is_success() {
        assert!(billable(200, JSON, r#"{"Code":0}"#));
        assert!(billable(200, JSON, r#"{"code":"0"}"#));
        assert!(billable(200, JSON, r#"{"code":"success"}"#));
        assert!(!billable(200, JSON, r#"{"Code":-1}"#));
    }

    #[test]
    fn test_error_message_detection() {
        // Scenario: 200 with a business-level error in the message field
        assert!(!billable(
            200,
            JSON,
            r#"{"code":-1,"message":"error: invalid token"}"#
        ));
        assert!(!billable(200, JSON, r#"{"error":"bad token"}"#));
        // A benign message does not fail the call
        assert!(billable(200, JSON, r#"{"message":"created"}"#));
        // Empty error value is not an error
        assert!(billable(200, JSON, r#"{"error":""}"#));
    }

    #[test]
    fn test_unrecognized_shapes_default_to_success() {
        assert!(billable(200, JSON, ""));
        assert!(billable(200, JSON, "[1,2,3]"));
        assert!(billable(200, JSON, "not json at all"));
        assert!(billable(200, Some("text/html"), "<html></html>"));
        assert!(billable(200, None, "plain"));
        assert!(billable(200, JSON, r#"{"data":{"id":1}}"#));
    }

    #[test]
    fn test_strip_field_recurses_objects_and_arrays() {
        let value: Value = serde_json::from_str(
            r#"{"remaining_calls":3,"data":[{"remaining_calls":1,"id":7},{"nested":{"remaining_calls":2}}]}"#,
        )
        .unwrap();

        let stripped = strip_sensitive_field(value, "remaining_calls");
        assert_eq!(
            stripped,
            serde_json::from_str::<Value>(r#"{"data":[{"id":7},{"nested":{}}]}"#).unwrap()
        );
    }

    #[test]
    fn test_filter_passes_non_json_through() {
        assert_eq!(
            filter_response_body("<xml/>", Some("text/xml"), "secret"),
            "<xml/>"
        );
        assert_eq!(filter_response_body("oops", JSON, "secret"), "oops");
    }

    #[test]
    fn test_filter_strips_json() {
        let out = filter_response_body(r#"{"ok":true,"secret":"x"}"#, JSON, "secret");
        assert_eq!(
            serde_json::from_str::<Value>(&out).unwrap(),
            serde_json::from_str::<Value>(r#"{"ok":true}"#).unwrap()
        );
    }
}
