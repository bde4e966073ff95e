use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::LOCATION;
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::tempdir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use crate::build_router;
use crate::config::Config;

#[derive(Clone, Default)]
struct ProviderState {
    subscribed: Arc<AtomicUsize>,
    unsubscribed: Arc<AtomicUsize>,
}

async fn start_provider() -> Result<(SocketAddr, ProviderState, JoinHandle<()>)> {
    let state = ProviderState::default();
    let router = Router::new()
        .route(
            "/webhook/subscribe",
            post(
                |State(state): State<ProviderState>, Json(body): Json<Value>| async move {
                    let count = state.subscribed.fetch_add(1, Ordering::SeqCst) + 1;
                    let has_url = body["url"].as_str().is_some_and(|url| url.contains("/token/"));
                    if has_url {
                        (StatusCode::OK, Json(json!({ "id": format!("remote-{count}") })))
                    } else {
                        (StatusCode::BAD_REQUEST, Json(json!({ "error": "url" })))
                    }
                },
            ),
        )
        .route(
            "/webhook/unsubscribe",
            post(|State(state): State<ProviderState>| async move {
                state.unsubscribed.fetch_add(1, Ordering::SeqCst);
                Json(json!({ "success": true }))
            }),
        )
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, state, handle))
}

async fn unreachable_base_url() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{addr}"))
}

async fn read_json(response: axum::response::Response) -> Result<Value> {
    let bytes = response.into_body().collect().await?.to_bytes();
    let value = serde_json::from_slice::<Value>(&bytes)?;
    Ok(value)
}

fn json_request(method: &str, uri: &str, body: &Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))?)
}

fn empty_request(method: &str, uri: &str) -> Result<Request<Body>> {
    Ok(Request::builder().method(method).uri(uri).body(Body::empty())?)
}

#[tokio::test]
async fn healthz_route_returns_ok() -> Result<()> {
    let app = build_router(Config::for_tests());
    let response = app.oneshot(empty_request("GET", "/healthz")?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let body = read_json(response).await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["applications"], 3);
    Ok(())
}

#[tokio::test]
async fn catalog_lists_reference_connectors() -> Result<()> {
    let app = build_router(Config::for_tests());
    let response = app.oneshot(empty_request("GET", "/api/applications")?).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await?;
    let keys = body["data"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry["key"].as_str().map(ToString::to_string))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    assert_eq!(keys, vec!["null", "null2", "webhook"]);
    assert_eq!(body["data"][1]["authorization_type"], "oauth2");
    Ok(())
}

#[tokio::test]
async fn duplicate_install_conflicts_and_missing_install_is_404() -> Result<()> {
    let app = build_router(Config::for_tests());

    let first = app
        .clone()
        .oneshot(empty_request("POST", "/api/users/user/applications/null")?)
        .await?;
    assert_eq!(first.status(), StatusCode::CREATED);
    let first = read_json(first).await?;
    assert_eq!(first["data"]["name"], "Null");
    assert_eq!(first["data"]["enabled"], true);

    let second = app
        .clone()
        .oneshot(empty_request("POST", "/api/users/user/applications/null")?)
        .await?;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let second = read_json(second).await?;
    assert_eq!(second["error"]["reason"], "duplicate_install");

    let missing = app
        .clone()
        .oneshot(empty_request("GET", "/api/users/user/applications/webhook")?)
        .await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let missing = read_json(missing).await?;
    assert_eq!(missing["error"]["reason_code"], 3001);

    let unknown = app
        .oneshot(empty_request("POST", "/api/users/user/applications/nope")?)
        .await?;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn settings_and_password_flow_masks_secrets() -> Result<()> {
    let dir = tempdir()?;
    let store_path = dir.path().join("installs.json");
    let mut config = Config::for_tests();
    config.store_path = Some(store_path.clone());
    let app = build_router(config);

    app.clone()
        .oneshot(empty_request("POST", "/api/users/user/applications/null")?)
        .await?;

    let detail = read_json(
        app.clone()
            .oneshot(empty_request("GET", "/api/users/user/applications/null")?)
            .await?,
    )
    .await?;
    assert_eq!(detail["data"]["settings"][0]["fields"][0]["value"], Value::Null);
    assert_eq!(detail["data"]["settings"][0]["fields"][1]["value"], false);

    let saved = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/users/user/applications/null/settings",
            &json!({ "authorization_form": { "user": "alice" } }),
        )?)
        .await?;
    assert_eq!(saved.status(), StatusCode::OK);

    let missing_password = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/users/user/applications/null/password",
            &json!({ "formKey": "authorization_form", "fieldKey": "password" }),
        )?)
        .await?;
    assert_eq!(missing_password.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let updated = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/users/user/applications/null/password",
            &json!({
                "formKey": "authorization_form",
                "fieldKey": "password",
                "password": "secret1",
            }),
        )?)
        .await?;
    assert_eq!(updated.status(), StatusCode::OK);
    let updated_text = read_json(updated).await?.to_string();
    assert!(!updated_text.contains("secret1"));

    let settings = read_json(
        app.oneshot(empty_request(
            "GET",
            "/api/users/user/applications/null/settings",
        )?)
        .await?,
    )
    .await?;
    assert_eq!(settings["data"][0]["fields"][0]["value"], "alice");
    assert_eq!(settings["data"][0]["fields"][1]["value"], true);

    let snapshot: Value = serde_json::from_str(&std::fs::read_to_string(&store_path)?)?;
    let record = snapshot["installs"]
        .as_array()
        .and_then(|records| {
            records
                .iter()
                .find(|record| record["key"] == "null" && record["user"] == "user")
        })
        .cloned()
        .unwrap_or_default();
    assert_eq!(record["settings"]["authorization_form"]["password"], "secret1");
    assert_eq!(record["settings"]["authorization_form"]["user"], "alice");
    Ok(())
}

#[tokio::test]
async fn undeclared_setting_is_rejected_with_field_errors() -> Result<()> {
    let app = build_router(Config::for_tests());
    app.clone()
        .oneshot(empty_request("POST", "/api/users/user/applications/null")?)
        .await?;

    let response = app
        .oneshot(json_request(
            "PUT",
            "/api/users/user/applications/null/settings",
            &json!({ "authorization_form": { "api_key": "x" } }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json(response).await?;
    assert_eq!(body["error"]["reason"], "invalid_field");
    assert!(body["errors"]["authorization_form.api_key"].is_array());
    Ok(())
}

#[tokio::test]
async fn basic_authorize_requires_credentials() -> Result<()> {
    let app = build_router(Config::for_tests());
    app.clone()
        .oneshot(empty_request("POST", "/api/users/user/applications/null")?)
        .await?;

    let rejected = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/users/user/applications/null/authorize",
            &json!({ "redirect_url": "https://ui.example/done" }),
        )?)
        .await?;
    assert_eq!(rejected.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let rejected = read_json(rejected).await?;
    assert_eq!(rejected["error"]["reason"], "missing_credentials");

    app.clone()
        .oneshot(json_request(
            "PUT",
            "/api/users/user/applications/null/settings",
            &json!({ "authorization_form": { "user": "alice", "password": "pw" } }),
        )?)
        .await?;
    let accepted = read_json(
        app.clone()
            .oneshot(json_request(
                "POST",
                "/api/users/user/applications/null/authorize",
                &json!({ "redirect_url": "https://ui.example/done" }),
            )?)
            .await?,
    )
    .await?;
    assert_eq!(accepted["data"]["state"], "authorized");

    let authorized = read_json(
        app.oneshot(empty_request(
            "GET",
            "/api/users/user/applications/null/authorized",
        )?)
        .await?,
    )
    .await?;
    assert_eq!(authorized["data"]["authorized"], true);
    Ok(())
}

#[tokio::test]
async fn oauth_callback_redirects_back_to_origin() -> Result<()> {
    let app = build_router(Config::for_tests());
    app.clone()
        .oneshot(empty_request("POST", "/api/users/user/applications/null2")?)
        .await?;

    let early = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/users/user/applications/null2/authorize/token",
            &json!({ "access_token": "tok" }),
        )?)
        .await?;
    assert_eq!(early.status(), StatusCode::CONFLICT);

    let started = read_json(
        app.clone()
            .oneshot(json_request(
                "POST",
                "/api/users/user/applications/null2/authorize",
                &json!({ "redirect_url": "https://ui.example/back" }),
            )?)
            .await?,
    )
    .await?;
    assert_eq!(started["data"]["state"], "authorization_pending");
    let provider_url = started["data"]["redirect_url"].as_str().unwrap_or_default();
    let nonce = provider_url
        .split("state=")
        .nth(1)
        .and_then(|rest| rest.split('&').next())
        .unwrap_or_default()
        .to_string();
    assert!(!nonce.is_empty());

    let callback = app
        .clone()
        .oneshot(empty_request(
            "GET",
            &format!(
                "/api/users/user/applications/null2/authorize/token?access_token=tok&state={nonce}"
            ),
        )?)
        .await?;
    assert_eq!(callback.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        callback
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok()),
        Some("https://ui.example/back")
    );

    let authorized = read_json(
        app.clone()
            .oneshot(empty_request(
                "GET",
                "/api/users/user/applications/null2/authorized",
            )?)
            .await?,
    )
    .await?;
    assert_eq!(authorized["data"]["authorized"], true);

    let refreshed = app
        .oneshot(json_request(
            "POST",
            "/api/users/user/applications/null2/authorize/token",
            &json!({ "access_token": "tok-2" }),
        )?)
        .await?;
    assert_eq!(refreshed.status(), StatusCode::OK);
    let refreshed = read_json(refreshed).await?;
    assert_eq!(refreshed["data"]["redirect_url"], "https://ui.example/back");
    Ok(())
}

#[tokio::test]
async fn password_route_rejects_token_and_reserved_prefix() -> Result<()> {
    let app = build_router(Config::for_tests());
    app.clone()
        .oneshot(empty_request("POST", "/api/users/user/applications/null2")?)
        .await?;
    app.clone()
        .oneshot(empty_request("POST", "/api/users/user/applications/null")?)
        .await?;

    let forged = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/users/user/applications/null2/password",
            &json!({
                "formKey": "authorization_form",
                "fieldKey": "token",
                "password": "{\"access_token\":\"forged\"}",
            }),
        )?)
        .await?;
    assert_eq!(forged.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let reserved = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/users/user/applications/null/password",
            &json!({
                "formKey": "authorization_form",
                "fieldKey": "password",
                "password": "enc:v1:my-literal-password",
            }),
        )?)
        .await?;
    assert_eq!(reserved.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let listed = app
        .clone()
        .oneshot(empty_request("GET", "/api/users/user/applications")?)
        .await?;
    assert_eq!(listed.status(), StatusCode::OK);
    let listed = read_json(listed).await?;
    assert_eq!(listed["data"]["items"].as_array().map(Vec::len), Some(2));

    let authorized = read_json(
        app.oneshot(empty_request(
            "GET",
            "/api/users/user/applications/null2/authorized",
        )?)
        .await?,
    )
    .await?;
    assert_eq!(authorized["data"]["authorized"], false);
    Ok(())
}

#[tokio::test]
async fn webhook_subscribe_and_uninstall_against_provider() -> Result<()> {
    let (addr, provider, handle) = start_provider().await?;
    let mut config = Config::for_tests();
    config.webhook_provider_base_url = format!("http://{addr}");
    let app = build_router(config);

    app.clone()
        .oneshot(empty_request("POST", "/api/users/user/applications/webhook")?)
        .await?;
    let report = read_json(
        app.clone()
            .oneshot(empty_request(
                "POST",
                "/api/users/user/applications/webhook/webhooks/subscribe",
            )?)
            .await?,
    )
    .await?;
    assert_eq!(report["data"]["outcomes"][0]["status"], "subscribed");
    assert_eq!(report["data"]["outcomes"][0]["remote_id"], "remote-1");

    let again = read_json(
        app.clone()
            .oneshot(empty_request(
                "POST",
                "/api/users/user/applications/webhook/webhooks/subscribe",
            )?)
            .await?,
    )
    .await?;
    assert_eq!(again["data"]["outcomes"][0]["status"], "already_subscribed");
    assert_eq!(provider.subscribed.load(Ordering::SeqCst), 1);

    let detail = read_json(
        app.clone()
            .oneshot(empty_request("GET", "/api/users/user/applications/webhook")?)
            .await?,
    )
    .await?;
    assert_eq!(detail["data"]["webhooks"][0]["remote_id"], "remote-1");
    assert!(detail["data"]["webhooks"][0].get("callback_token").is_none());

    let uninstall = app
        .clone()
        .oneshot(empty_request("DELETE", "/api/users/user/applications/webhook")?)
        .await?;
    assert_eq!(uninstall.status(), StatusCode::OK);
    let uninstall = read_json(uninstall).await?;
    assert_eq!(uninstall["data"]["webhooks"]["outcomes"][0]["status"], "unsubscribed");
    assert_eq!(provider.unsubscribed.load(Ordering::SeqCst), 1);

    let gone = app
        .oneshot(empty_request("GET", "/api/users/user/applications/webhook")?)
        .await?;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);

    handle.abort();
    Ok(())
}

#[tokio::test]
async fn uninstall_succeeds_when_provider_is_down() -> Result<()> {
    let dir = tempdir()?;
    let store_path = dir.path().join("installs.json");
    let (addr, _provider, handle) = start_provider().await?;

    let mut config = Config::for_tests();
    config.store_path = Some(store_path.clone());
    config.webhook_provider_base_url = format!("http://{addr}");
    let app = build_router(config.clone());
    app.clone()
        .oneshot(empty_request("POST", "/api/users/user/applications/webhook")?)
        .await?;
    app.oneshot(empty_request(
        "POST",
        "/api/users/user/applications/webhook/webhooks/subscribe",
    )?)
    .await?;
    handle.abort();

    config.webhook_provider_base_url = unreachable_base_url().await?;
    config.webhook_timeout_ms = 500;
    let app = build_router(config);
    let uninstall = app
        .clone()
        .oneshot(empty_request("DELETE", "/api/users/user/applications/webhook")?)
        .await?;
    assert_eq!(uninstall.status(), StatusCode::OK);
    let uninstall = read_json(uninstall).await?;
    assert_eq!(uninstall["data"]["webhooks"]["outcomes"][0]["status"], "failed");
    assert_eq!(
        uninstall["data"]["webhooks"]["outcomes"][0]["code"],
        "transport_error"
    );

    let listed = read_json(
        app.oneshot(empty_request("GET", "/api/users/user/applications")?)
            .await?,
    )
    .await?;
    assert_eq!(listed["data"]["items"], json!([]));
    Ok(())
}
