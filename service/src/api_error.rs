use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;

use crate::registry::RegistryStoreError;

pub type ApiErrorTuple = (StatusCode, Json<ApiErrorBody>);

/// Wire shape for every failed call: `{"error": "..."}`, plus the store key
/// on the one path that reports it for diagnostics.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

pub fn bad_request(message: impl Into<String>) -> ApiErrorTuple {
    error_response(StatusCode::BAD_REQUEST, message)
}

pub fn forbidden(message: impl Into<String>) -> ApiErrorTuple {
    error_response(StatusCode::FORBIDDEN, message)
}

pub fn not_found(message: impl Into<String>) -> ApiErrorTuple {
    error_response(StatusCode::NOT_FOUND, message)
}

pub fn not_found_with_key(message: impl Into<String>, key: String) -> ApiErrorTuple {
    (
        StatusCode::NOT_FOUND,
        Json(ApiErrorBody {
            error: message.into(),
            key: Some(key),
        }),
    )
}

pub fn internal_error(message: impl Into<String>) -> ApiErrorTuple {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, message)
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> ApiErrorTuple {
    (
        status,
        Json(ApiErrorBody {
            error: message.into(),
            key: None,
        }),
    )
}

pub fn map_store_error(error: RegistryStoreError) -> ApiErrorTuple {
    match error {
        RegistryStoreError::NotFound => not_found("Request not found"),
        RegistryStoreError::Forbidden => forbidden("Unauthorized"),
        RegistryStoreError::Validation { field, message } => {
            bad_request(format!("{field}: {message}"))
        }
        RegistryStoreError::Persistence { message } => internal_error(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_serializes_to_flat_error_field() {
        let (status, payload) = bad_request("Token address is required");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body = serde_json::to_value(payload.0).expect("serialize payload");
        assert_eq!(body["error"], "Token address is required");
        assert!(body.get("key").is_none());
    }

    #[test]
    fn not_found_with_key_carries_store_key() {
        let (status, payload) =
            not_found_with_key("Request not found", "sponsored-request:abc".to_string());
        assert_eq!(status, StatusCode::NOT_FOUND);
        let body = serde_json::to_value(payload.0).expect("serialize payload");
        assert_eq!(body["key"], "sponsored-request:abc");
    }

    #[test]
    fn store_errors_map_to_expected_statuses() {
        let (status, _) = map_store_error(RegistryStoreError::NotFound);
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = map_store_error(RegistryStoreError::Forbidden);
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = map_store_error(RegistryStoreError::Persistence {
            message: "disk gone".to_string(),
        });
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
