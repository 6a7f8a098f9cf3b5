use crate::guard::ClientIdentity;
use crate::sanitize::{is_valid_email_value, is_valid_uuid_value, sanitize_object};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

/// Echo a JSON object back with every string field sanitized.
///
/// Fields named `email`/`*_email` and `id`/`*_id` also report whether they
/// are a plausible email address or a v4 UUID.
pub async fn sanitize_echo(
    Extension(identity): Extension<ClientIdentity>,
    Json(payload): Json<Value>,
) -> Response {
    let Value::Object(fields) = payload else {
        debug!(identifier = %identity.0, "Rejected non-object payload");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Request body must be a JSON object." })),
        )
            .into_response();
    };

    info!(
        identifier = %identity.0,
        fields = fields.len(),
        "Sanitizing submitted fields"
    );

    let checks: Map<String, Value> = fields
        .iter()
        .filter_map(|(key, value)| {
            let key_lower = key.to_ascii_lowercase();
            if key_lower == "email" || key_lower.ends_with("_email") {
                Some((key.clone(), json!({ "email": is_valid_email_value(value) })))
            } else if key_lower == "id" || key_lower.ends_with("_id") {
                Some((key.clone(), json!({ "uuid": is_valid_uuid_value(value) })))
            } else {
                None
            }
        })
        .collect();

    Json(json!({
        "fields": sanitize_object(&fields),
        "checks": checks,
    }))
    .into_response()
}

/// Liveness probe (never guarded)
pub async fn health() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sanitize_echo() {
        let payload = json!({
            "name": "<b>Alice</b>",
            "contact_email": "alice@example.com",
            "report_id": "not-a-uuid",
            "pages": 3
        });

        let response = sanitize_echo(
            Extension(ClientIdentity("192.0.2.1".to_string())),
            Json(payload),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["fields"]["name"], json!("Alice"));
        assert_eq!(body["fields"]["pages"], json!(3));
        assert_eq!(body["checks"]["contact_email"]["email"], json!(true));
        assert_eq!(body["checks"]["report_id"]["uuid"], json!(false));
        assert!(body["checks"].get("name").is_none());
    }

    #[tokio::test]
    async fn test_sanitize_echo_rejects_non_object() {
        let response = sanitize_echo(
            Extension(ClientIdentity("192.0.2.1".to_string())),
            Json(json!(["a", "b"])),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
