use reqwest::{Method, Url};

use crate::application::{Application, ApplicationDescriptor, ApplicationType, TokenAuthorization};
use crate::error::{AppStoreError, Result};
use crate::form::{AUTHORIZATION_FORM, Field, FieldType, Form, FormSchema, TOKEN};
use crate::record::ApplicationInstall;
use crate::transport::RequestDto;

pub const CLIENT_ID: &str = "client_id";
pub const CLIENT_SECRET: &str = "client_secret";

const AUTHORIZE_URL: &str = "https://identity.example.com/oauth2/authorize";

/// Token-authorized connector. Exchanges the callback `code` only when a
/// token endpoint is configured; otherwise the callback payload is the token.
pub struct NullOAuthApplication {
    descriptor: ApplicationDescriptor,
    authorize_url: String,
    token_url: Option<String>,
}

impl NullOAuthApplication {
    pub fn new() -> Self {
        Self {
            descriptor: ApplicationDescriptor::new(
                "null2",
                "Null2",
                "Application with OAuth2 authorization",
                ApplicationType::OAuth,
            ),
            authorize_url: AUTHORIZE_URL.to_string(),
            token_url: None,
        }
    }

    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = Some(token_url.into());
        self
    }
}

impl Default for NullOAuthApplication {
    fn default() -> Self {
        Self::new()
    }
}

impl Application for NullOAuthApplication {
    fn descriptor(&self) -> &ApplicationDescriptor {
        &self.descriptor
    }

    fn schema(&self) -> FormSchema {
        FormSchema::new(vec![
            Form::new(AUTHORIZATION_FORM)
                .with_field(Field::new(FieldType::Text, CLIENT_ID, "Client id").required())
                .with_field(Field::new(FieldType::Password, CLIENT_SECRET, "Client secret"))
                .with_field(Field::new(FieldType::Password, TOKEN, "Token").read_only()),
        ])
    }

    fn as_token(&self) -> Option<&dyn TokenAuthorization> {
        Some(self)
    }
}

impl TokenAuthorization for NullOAuthApplication {
    fn authorize_url(
        &self,
        install: &ApplicationInstall,
        callback_url: &str,
        state: &str,
    ) -> Result<String> {
        let client_id = install
            .setting_str(AUTHORIZATION_FORM, CLIENT_ID)
            .unwrap_or_default();
        let url = Url::parse_with_params(
            &self.authorize_url,
            &[
                ("response_type", "code"),
                ("client_id", client_id),
                ("redirect_uri", callback_url),
                ("state", state),
            ],
        )
        .map_err(|error| {
            AppStoreError::invalid_argument(format!("invalid authorize url: {error}"))
        })?;
        Ok(url.into())
    }

    fn token_exchange_request(
        &self,
        install: &ApplicationInstall,
        code: &str,
    ) -> Result<Option<RequestDto>> {
        let Some(token_url) = self.token_url.as_deref() else {
            return Ok(None);
        };
        let client_id = install
            .setting_str(AUTHORIZATION_FORM, CLIENT_ID)
            .unwrap_or_default();
        let client_secret = install
            .setting_str(AUTHORIZATION_FORM, CLIENT_SECRET)
            .unwrap_or_default();
        let redirect_uri = install.authorization.redirect_url.as_deref().unwrap_or("");

        let body = Url::parse_with_params(
            "http://form.local/",
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("redirect_uri", redirect_uri),
            ],
        )
        .map_err(|error| AppStoreError::invalid_argument(format!("invalid token form: {error}")))?
        .query()
        .unwrap_or_default()
        .to_string();

        Ok(Some(
            RequestDto::new(Method::POST, token_url)
                .with_header("content-type", "application/x-www-form-urlencoded")
                .with_header("accept", "application/json")
                .with_body(body),
        ))
    }
}
