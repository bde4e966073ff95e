use std::collections::HashMap;

use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;

pub type ApiErrorTuple = (StatusCode, Json<ApiErrorResponse>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCode {
    InvalidRequest,
    NotFound,
    Conflict,
    UpstreamFailed,
    ServiceUnavailable,
}

impl ApiErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::UpstreamFailed => "upstream_failed",
            Self::ServiceUnavailable => "service_unavailable",
        }
    }

    pub const fn default_status(self) -> StatusCode {
        match self {
            Self::InvalidRequest => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::UpstreamFailed => StatusCode::BAD_GATEWAY,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    pub code: &'static str,
    /// Library error code (`app_not_found`, `invalid_field`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    /// Stable numeric identifier of `reason`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<u32>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub message: String,
    pub error: ApiErrorDetail,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<HashMap<String, Vec<String>>>,
}

#[derive(Debug, Serialize)]
pub struct ApiDataEnvelope<T> {
    pub data: T,
}

pub fn ok_data<T: Serialize>(data: T) -> (StatusCode, Json<ApiDataEnvelope<T>>) {
    (StatusCode::OK, Json(ApiDataEnvelope { data }))
}

pub fn created_data<T: Serialize>(data: T) -> (StatusCode, Json<ApiDataEnvelope<T>>) {
    (StatusCode::CREATED, Json(ApiDataEnvelope { data }))
}

pub fn error_response(code: ApiErrorCode, message: impl Into<String>) -> ApiErrorTuple {
    error_response_with_fields(code.default_status(), code, None, message, None)
}

pub fn error_response_with_fields(
    status: StatusCode,
    code: ApiErrorCode,
    reason: Option<appstore::ErrorCode>,
    message: impl Into<String>,
    errors: Option<HashMap<String, Vec<String>>>,
) -> ApiErrorTuple {
    let message = message.into();
    (
        status,
        Json(ApiErrorResponse {
            message: message.clone(),
            error: ApiErrorDetail {
                code: code.as_str(),
                reason: reason.map(appstore::ErrorCode::as_str),
                reason_code: reason.map(appstore::ErrorCode::as_u32),
                message,
            },
            errors,
        }),
    )
}

pub fn validation_error(field: &str, message: &str) -> ApiErrorTuple {
    let mut errors = HashMap::new();
    errors.insert(field.to_string(), vec![message.to_string()]);

    error_response_with_fields(
        StatusCode::UNPROCESSABLE_ENTITY,
        ApiErrorCode::InvalidRequest,
        None,
        message.to_string(),
        Some(errors),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_uses_code_default_status() -> anyhow::Result<()> {
        let (status, payload) = error_response(ApiErrorCode::Conflict, "already installed");
        assert_eq!(status, StatusCode::CONFLICT);
        let body = serde_json::to_value(payload.0)?;
        assert_eq!(body["error"]["code"], "conflict");
        assert_eq!(body["message"], "already installed");
        assert!(body.get("errors").is_none());
        Ok(())
    }

    #[test]
    fn library_reason_is_exposed_with_numeric_code() -> anyhow::Result<()> {
        let (_status, payload) = error_response_with_fields(
            StatusCode::NOT_FOUND,
            ApiErrorCode::NotFound,
            Some(appstore::ErrorCode::AppNotFound),
            "missing",
            None,
        );
        let body = serde_json::to_value(payload.0)?;
        assert_eq!(body["error"]["reason"], "app_not_found");
        assert_eq!(body["error"]["reason_code"], appstore::ErrorCode::APP_WAS_NOT_FOUND);
        Ok(())
    }

    #[test]
    fn validation_error_maps_to_expected_shape() -> anyhow::Result<()> {
        let (status, payload) = validation_error("password", "password: value is required");
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let body = serde_json::to_value(payload.0)?;
        assert_eq!(body["error"]["code"], "invalid_request");
        assert_eq!(body["errors"]["password"][0], "password: value is required");
        assert!(body["error"].get("reason").is_none());
        Ok(())
    }

    #[test]
    fn ok_data_wraps_payload_in_data_envelope() -> anyhow::Result<()> {
        let (_status, payload) = ok_data(serde_json::json!({"ok": true}));
        let body = serde_json::to_value(payload.0)?;
        assert_eq!(body["data"]["ok"], true);
        Ok(())
    }
}
