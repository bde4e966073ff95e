//! Authorization state machine:
//! `Unauthorized -> AuthorizationPending -> Authorized`.
//!
//! Basic-credential applications skip the pending state. Token applications
//! park the record in `AuthorizationPending` with a state nonce until the
//! provider calls back with a token (or a code to exchange for one). A token
//! callback is also accepted outside the pending state once the record knows
//! where to send the user back, which covers re-authorization.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::application::Application;
use crate::error::{AppStoreError, Result};
use crate::form::{AUTHORIZATION_FORM, TOKEN};
use crate::record::{ApplicationInstall, AuthorizationRecord, AuthorizationState};
use crate::settings::SettingsManager;
use crate::transport::HttpTransport;

const STATE_PARAM: &str = "state";
const CODE_PARAM: &str = "code";

/// Where the caller should send the end user next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectTarget {
    pub redirect_url: String,
    pub state: AuthorizationState,
}

#[derive(Clone)]
pub struct AuthorizationOrchestrator {
    settings: SettingsManager,
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
}

impl AuthorizationOrchestrator {
    pub fn new(
        settings: SettingsManager,
        transport: Arc<dyn HttpTransport>,
        timeout: Duration,
    ) -> Self {
        Self {
            settings,
            transport,
            timeout,
        }
    }

    /// Starts authorization on the stored record. Runs inside a record mutation.
    pub fn authorize(
        &self,
        application: &dyn Application,
        install: &mut ApplicationInstall,
        redirect_url: &str,
    ) -> Result<RedirectTarget> {
        let redirect_url = redirect_url.trim();
        if redirect_url.is_empty() {
            return Err(AppStoreError::invalid_argument(
                "redirect_url: value is required",
            ));
        }
        let revealed = self.settings.reveal(application, install)?;

        if let Some(token) = application.as_token() {
            let nonce = Uuid::new_v4().simple().to_string();
            let location = token.authorize_url(&revealed, redirect_url, &nonce)?;
            install.authorization = AuthorizationRecord {
                state: AuthorizationState::AuthorizationPending,
                redirect_url: Some(redirect_url.to_string()),
                oauth_state: Some(nonce),
                authorized_at: install.authorization.authorized_at,
            };
            return Ok(RedirectTarget {
                redirect_url: location,
                state: AuthorizationState::AuthorizationPending,
            });
        }

        if let Some(basic) = application.as_basic() {
            let missing = basic.missing_credentials(&revealed);
            if !missing.is_empty() {
                return Err(AppStoreError::MissingCredentials {
                    key: application.key().to_string(),
                    fields: missing,
                });
            }
        }

        install.authorization = AuthorizationRecord {
            state: AuthorizationState::Authorized,
            redirect_url: Some(redirect_url.to_string()),
            oauth_state: None,
            authorized_at: Some(Utc::now()),
        };
        Ok(RedirectTarget {
            redirect_url: redirect_url.to_string(),
            state: AuthorizationState::Authorized,
        })
    }

    /// Turns the provider callback payload into the token to persist. A
    /// `code` is exchanged when the connector declares an exchange request;
    /// otherwise the payload itself (minus `state`) is the token.
    pub async fn resolve_token(
        &self,
        application: &dyn Application,
        revealed: &ApplicationInstall,
        callback: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        check_callback(application, revealed, callback)?;
        let Some(token_capability) = application.as_token() else {
            return Err(AppStoreError::invalid_state(format!(
                "application '{}' does not use token authorization",
                application.key()
            )));
        };

        let exchange = match callback.get(CODE_PARAM).and_then(Value::as_str) {
            Some(code) => token_capability.token_exchange_request(revealed, code)?,
            None => None,
        };

        let mut token = match exchange {
            Some(request) => {
                let response = self.transport.send(request, self.timeout).await?;
                if !response.is_success() {
                    tracing::warn!(
                        target: "appstore.authorization",
                        key = %revealed.key,
                        user = %revealed.user,
                        status = response.status,
                        "token exchange rejected by provider",
                    );
                    return Err(AppStoreError::RemoteRejected {
                        status: response.status,
                        body: response.body,
                    });
                }
                token_capability.parse_token_response(&response)?
            }
            None => {
                let mut token = callback.clone();
                token.remove(STATE_PARAM);
                token
            }
        };

        if token.is_empty() {
            return Err(AppStoreError::invalid_argument("token: value is required"));
        }
        stamp_expiry(&mut token);
        Ok(token)
    }

    /// Persists `token` and completes the flow. Returns the redirect URL
    /// captured by [`Self::authorize`].
    pub fn complete(
        &self,
        application: &dyn Application,
        install: &mut ApplicationInstall,
        callback: &Map<String, Value>,
        token: &Map<String, Value>,
    ) -> Result<String> {
        let redirect_url = check_callback(application, install, callback)?;

        let encoded = Value::Object(token.clone()).to_string();
        self.settings
            .store_secret(install, AUTHORIZATION_FORM, TOKEN, &encoded)?;
        install.authorization = AuthorizationRecord {
            state: AuthorizationState::Authorized,
            redirect_url: Some(redirect_url.clone()),
            oauth_state: None,
            authorized_at: Some(Utc::now()),
        };
        Ok(redirect_url)
    }
}

/// A callback needs a redirect URL to send the user back to, and a supplied
/// `state` must match the nonce issued with the last provider redirect.
fn check_callback(
    application: &dyn Application,
    install: &ApplicationInstall,
    callback: &Map<String, Value>,
) -> Result<String> {
    let Some(redirect_url) = install.authorization.redirect_url.clone() else {
        return Err(AppStoreError::invalid_state(format!(
            "application '{}' for user '{}' has no redirect url to return to",
            application.key(),
            install.user,
        )));
    };
    if let Some(supplied) = callback.get(STATE_PARAM).and_then(Value::as_str) {
        if install.authorization.oauth_state.as_deref() != Some(supplied) {
            return Err(AppStoreError::invalid_state(
                "authorization state does not match",
            ));
        }
    }
    Ok(redirect_url)
}

fn stamp_expiry(token: &mut Map<String, Value>) {
    if token.contains_key("expires_at") {
        return;
    }
    let Some(seconds) = token.get("expires_in").and_then(Value::as_i64) else {
        return;
    };
    let expires_at = Utc::now() + chrono::Duration::seconds(seconds);
    token.insert(
        "expires_at".to_string(),
        Value::String(expires_at.to_rfc3339()),
    );
}
