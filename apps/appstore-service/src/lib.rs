use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use appstore::{
    AppStoreError, ApplicationManager, ApplicationRegistry, InstallStore, PasswordUpdate,
    ReqwestTransport,
};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub mod api_envelope;
pub mod config;

use crate::api_envelope::{
    ApiErrorCode, ApiErrorResponse, created_data, error_response, error_response_with_fields,
    ok_data, validation_error,
};
use crate::config::Config;

const SERVICE_NAME: &str = "appstore-service";

#[derive(Clone)]
struct AppState {
    manager: ApplicationManager,
    started_at: SystemTime,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    uptime_seconds: u64,
    applications: usize,
}

#[derive(Debug, Deserialize)]
struct AuthorizeRequest {
    redirect_url: String,
}

/// Manager wired to the JSON snapshot store, the reqwest transport and the
/// reference connectors, as configured.
pub fn build_manager(config: &Config) -> ApplicationManager {
    let registry = ApplicationRegistry::with_reference_connectors(&config.webhook_provider_base_url);
    let store = InstallStore::open(config.store_path.clone());
    ApplicationManager::new(
        Arc::new(registry),
        Arc::new(store),
        Arc::new(ReqwestTransport::new()),
        config.manager_options(),
    )
}

pub fn build_router(config: Config) -> Router {
    build_router_with_manager(build_manager(&config))
}

pub fn build_router_with_manager(manager: ApplicationManager) -> Router {
    let state = AppState {
        manager,
        started_at: SystemTime::now(),
    };

    let install_routes = Router::new()
        .route("/api/applications", get(list_applications))
        .route("/api/users/:user/applications", get(installed_applications))
        .route(
            "/api/users/:user/applications/:key",
            get(installed_application_detail)
                .post(install_application)
                .delete(uninstall_application),
        )
        .route(
            "/api/users/:user/applications/:key/settings",
            get(application_settings).put(save_application_settings),
        )
        .route(
            "/api/users/:user/applications/:key/password",
            put(save_application_password),
        )
        .route(
            "/api/users/:user/applications/:key/authorize",
            post(authorize_application),
        )
        .route(
            "/api/users/:user/applications/:key/authorize/token",
            get(authorization_callback).post(save_authorization_token),
        )
        .route(
            "/api/users/:user/applications/:key/authorized",
            get(application_authorized),
        )
        .route(
            "/api/users/:user/applications/:key/webhooks/subscribe",
            post(subscribe_webhooks),
        )
        .route(
            "/api/users/:user/applications/:key/webhooks/unsubscribe",
            post(unsubscribe_webhooks),
        );

    Router::new()
        .route("/healthz", get(health))
        .merge(install_routes)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        )
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = match state.started_at.elapsed() {
        Ok(duration) => duration.as_secs(),
        Err(_) => 0,
    };

    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
        applications: state.manager.list_applications().len(),
    })
}

async fn list_applications(State(state): State<AppState>) -> impl IntoResponse {
    ok_data(state.manager.list_applications())
}

async fn installed_applications(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiErrorResponse>)> {
    let items = state
        .manager
        .get_installed_applications(&user)
        .await
        .map_err(map_app_store_error)?;
    Ok(ok_data(json!({ "items": items })))
}

async fn installed_application_detail(
    State(state): State<AppState>,
    Path((user, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiErrorResponse>)> {
    let detail = state
        .manager
        .get_installed_application_detail(&key, &user)
        .await
        .map_err(map_app_store_error)?;
    Ok(ok_data(detail))
}

async fn install_application(
    State(state): State<AppState>,
    Path((user, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiErrorResponse>)> {
    let installed = state
        .manager
        .install_application(&key, &user)
        .await
        .map_err(map_app_store_error)?;
    Ok(created_data(installed))
}

async fn uninstall_application(
    State(state): State<AppState>,
    Path((user, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiErrorResponse>)> {
    let report = state
        .manager
        .uninstall_application(&key, &user)
        .await
        .map_err(map_app_store_error)?;
    Ok(ok_data(report))
}

async fn application_settings(
    State(state): State<AppState>,
    Path((user, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiErrorResponse>)> {
    let forms = state
        .manager
        .get_application_settings(&key, &user)
        .await
        .map_err(map_app_store_error)?;
    Ok(ok_data(forms))
}

async fn save_application_settings(
    State(state): State<AppState>,
    Path((user, key)): Path<(String, String)>,
    Json(payload): Json<Map<String, Value>>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiErrorResponse>)> {
    let detail = state
        .manager
        .save_application_settings(&key, &user, payload)
        .await
        .map_err(map_app_store_error)?;
    Ok(ok_data(detail))
}

async fn save_application_password(
    State(state): State<AppState>,
    Path((user, key)): Path<(String, String)>,
    Json(payload): Json<PasswordUpdate>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiErrorResponse>)> {
    if payload.password.is_none() {
        return Err(validation_error("password", "password: value is required"));
    }
    let detail = state
        .manager
        .save_application_password(&key, &user, payload)
        .await
        .map_err(map_app_store_error)?;
    Ok(ok_data(detail))
}

async fn authorize_application(
    State(state): State<AppState>,
    Path((user, key)): Path<(String, String)>,
    Json(payload): Json<AuthorizeRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiErrorResponse>)> {
    if payload.redirect_url.trim().is_empty() {
        return Err(validation_error("redirect_url", "redirect_url: value is required"));
    }
    let target = state
        .manager
        .authorize_application(&key, &user, &payload.redirect_url)
        .await
        .map_err(map_app_store_error)?;
    Ok(ok_data(target))
}

async fn save_authorization_token(
    State(state): State<AppState>,
    Path((user, key)): Path<(String, String)>,
    Json(payload): Json<Map<String, Value>>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiErrorResponse>)> {
    let redirect_url = state
        .manager
        .save_authorization_token(&key, &user, payload)
        .await
        .map_err(map_app_store_error)?;
    Ok(ok_data(json!({ "redirect_url": redirect_url })))
}

/// Provider redirect target: stores the query payload as the token and
/// sends the browser back to where authorization started.
async fn authorization_callback(
    State(state): State<AppState>,
    Path((user, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiErrorResponse>)> {
    if query.is_empty() {
        return Err(error_response(
            ApiErrorCode::InvalidRequest,
            "authorization callback carried no parameters",
        ));
    }
    let payload = query
        .into_iter()
        .map(|(name, value)| (name, Value::String(value)))
        .collect::<Map<String, Value>>();
    let redirect_url = state
        .manager
        .save_authorization_token(&key, &user, payload)
        .await
        .map_err(map_app_store_error)?;
    Ok(Redirect::temporary(&redirect_url))
}

async fn application_authorized(
    State(state): State<AppState>,
    Path((user, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiErrorResponse>)> {
    let authorized = state
        .manager
        .is_authorized(&key, &user)
        .await
        .map_err(map_app_store_error)?;
    Ok(ok_data(json!({ "authorized": authorized })))
}

async fn subscribe_webhooks(
    State(state): State<AppState>,
    Path((user, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiErrorResponse>)> {
    let report = state
        .manager
        .subscribe_application_webhooks(&key, &user)
        .await
        .map_err(map_app_store_error)?;
    Ok(ok_data(report))
}

async fn unsubscribe_webhooks(
    State(state): State<AppState>,
    Path((user, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiErrorResponse>)> {
    let report = state
        .manager
        .unsubscribe_webhooks(&key, &user)
        .await
        .map_err(map_app_store_error)?;
    Ok(ok_data(report))
}

fn map_app_store_error(error: AppStoreError) -> (StatusCode, Json<ApiErrorResponse>) {
    let reason = error.code();
    let message = error.to_string();
    let (status, code, errors) = match &error {
        AppStoreError::AppNotFound { .. } | AppStoreError::UnknownApplication { .. } => {
            (StatusCode::NOT_FOUND, ApiErrorCode::NotFound, None)
        }
        AppStoreError::DuplicateInstall { .. } | AppStoreError::InvalidState { .. } => {
            (StatusCode::CONFLICT, ApiErrorCode::Conflict, None)
        }
        AppStoreError::InvalidField { form, field, .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            ApiErrorCode::InvalidRequest,
            Some(field_errors(format!("{form}.{field}"), &message)),
        ),
        AppStoreError::MissingCredentials { fields, .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            ApiErrorCode::InvalidRequest,
            Some(
                fields
                    .iter()
                    .map(|field| (field.clone(), vec![format!("{field} is required")]))
                    .collect(),
            ),
        ),
        AppStoreError::InvalidArgument { .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            ApiErrorCode::InvalidRequest,
            None,
        ),
        AppStoreError::Transport(_) | AppStoreError::RemoteRejected { .. } => {
            tracing::warn!(
                target: "appstore.service",
                code = reason.as_str(),
                error = %error,
                "upstream provider call failed",
            );
            (StatusCode::BAD_GATEWAY, ApiErrorCode::UpstreamFailed, None)
        }
        AppStoreError::Persistence { .. } => {
            tracing::error!(
                target: "appstore.service",
                error = %error,
                "install store unavailable",
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiErrorCode::ServiceUnavailable,
                None,
            )
        }
    };
    error_response_with_fields(status, code, Some(reason), message, errors)
}

fn field_errors(field: String, message: &str) -> HashMap<String, Vec<String>> {
    let mut errors = HashMap::new();
    errors.insert(field, vec![message.to_string()]);
    errors
}

#[cfg(test)]
mod tests;
