//! Application descriptors and the capability traits connectors implement.
//!
//! A connector exposes each capability it supports through the `as_*`
//! accessors on [`Application`]. Callers dispatch on those accessors only;
//! nothing downcasts to a concrete connector type.

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{AppStoreError, Result};
use crate::form::{self, AUTHORIZATION_FORM, FormSchema, PASSWORD, TOKEN, USER};
use crate::record::{ApplicationInstall, SubscriptionKey};
use crate::transport::{RequestDto, ResponseDto};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationType {
    Basic,
    #[serde(rename = "oauth")]
    OAuth,
    Webhook,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationType {
    Basic,
    #[serde(rename = "oauth2")]
    OAuth2,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationDescriptor {
    pub key: String,
    pub name: String,
    pub description: String,
    pub application_type: ApplicationType,
}

impl ApplicationDescriptor {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        application_type: ApplicationType,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            description: description.into(),
            application_type,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub basic_authorization: bool,
    pub token_authorization: bool,
    pub webhooks: bool,
    pub request_shaping: bool,
}

impl Capabilities {
    pub fn authorization_type(self) -> AuthorizationType {
        if self.token_authorization {
            AuthorizationType::OAuth2
        } else if self.basic_authorization {
            AuthorizationType::Basic
        } else {
            AuthorizationType::None
        }
    }
}

pub trait Application: Send + Sync {
    fn descriptor(&self) -> &ApplicationDescriptor;

    /// Forms the settings of an install are validated against.
    fn schema(&self) -> FormSchema;

    fn as_basic(&self) -> Option<&dyn BasicAuthorization> {
        None
    }

    fn as_token(&self) -> Option<&dyn TokenAuthorization> {
        None
    }

    fn as_webhook(&self) -> Option<&dyn WebhookCapable> {
        None
    }

    fn as_request_shaper(&self) -> Option<&dyn RequestShaper> {
        None
    }

    fn key(&self) -> &str {
        &self.descriptor().key
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            basic_authorization: self.as_basic().is_some(),
            token_authorization: self.as_token().is_some(),
            webhooks: self.as_webhook().is_some(),
            request_shaping: self.as_request_shaper().is_some(),
        }
    }

    /// Delegates to the connector's own authorization check.
    /// Applications without an authorization capability are always authorized.
    fn is_authorized(&self, install: &ApplicationInstall) -> bool {
        if let Some(token) = self.as_token() {
            return token.has_valid_token(install);
        }
        if let Some(basic) = self.as_basic() {
            return basic.has_credentials(install);
        }
        true
    }
}

/// Static username/password style credentials kept in the authorization form.
pub trait BasicAuthorization: Send + Sync {
    fn required_fields(&self) -> Vec<&'static str> {
        vec![USER, PASSWORD]
    }

    fn missing_credentials(&self, install: &ApplicationInstall) -> Vec<String> {
        self.required_fields()
            .into_iter()
            .filter(|field| {
                !install
                    .setting(AUTHORIZATION_FORM, field)
                    .is_some_and(form::is_present)
            })
            .map(ToString::to_string)
            .collect()
    }

    fn has_credentials(&self, install: &ApplicationInstall) -> bool {
        self.missing_credentials(install).is_empty()
    }
}

/// Redirect + callback style credentials.
pub trait TokenAuthorization: Send + Sync {
    /// Provider URL the end user is sent to. `callback_url` is where the
    /// provider returns, `state` must round-trip unchanged.
    fn authorize_url(
        &self,
        install: &ApplicationInstall,
        callback_url: &str,
        state: &str,
    ) -> Result<String>;

    /// Request exchanging an authorization `code` for a token, if the
    /// provider needs one. `None` stores the callback payload as the token.
    fn token_exchange_request(
        &self,
        _install: &ApplicationInstall,
        _code: &str,
    ) -> Result<Option<RequestDto>> {
        Ok(None)
    }

    fn parse_token_response(&self, response: &ResponseDto) -> Result<Map<String, Value>> {
        match response.json() {
            Some(Value::Object(token)) => Ok(token),
            _ => Err(AppStoreError::RemoteRejected {
                status: response.status,
                body: "token response is not a JSON object".to_string(),
            }),
        }
    }

    /// A stored token counts when present and, if it carries `expires_at`, not expired.
    fn has_valid_token(&self, install: &ApplicationInstall) -> bool {
        let Some(raw) = install.setting_str(AUTHORIZATION_FORM, TOKEN) else {
            return false;
        };
        let Ok(Value::Object(token)) = serde_json::from_str::<Value>(raw) else {
            return !raw.trim().is_empty();
        };
        match token
            .get("expires_at")
            .and_then(Value::as_str)
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        {
            Some(expires_at) => expires_at.with_timezone(&Utc) > Utc::now(),
            None => !token.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookSubscription {
    pub node: String,
    pub topology: String,
    pub parameters: Map<String, Value>,
}

impl WebhookSubscription {
    pub fn new(node: impl Into<String>, topology: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            topology: topology.into(),
            parameters: Map::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.node.clone(), self.topology.clone())
    }
}

pub trait WebhookCapable: Send + Sync {
    fn subscriptions(&self) -> Vec<WebhookSubscription>;

    fn subscribe_request(
        &self,
        install: &ApplicationInstall,
        subscription: &WebhookSubscription,
        callback_url: &str,
    ) -> Result<RequestDto>;

    fn unsubscribe_request(&self, install: &ApplicationInstall, remote_id: &str)
    -> Result<RequestDto>;

    /// Extracts the remote subscription id.
    fn process_subscribe_response(
        &self,
        response: &ResponseDto,
        install: &ApplicationInstall,
    ) -> Result<String>;

    fn process_unsubscribe_response(&self, response: &ResponseDto) -> bool;
}

/// Shapes outbound API calls made on behalf of an install.
pub trait RequestShaper: Send + Sync {
    fn request(
        &self,
        install: &ApplicationInstall,
        method: Method,
        url: Option<&str>,
        body: Option<&str>,
    ) -> Result<RequestDto>;
}
