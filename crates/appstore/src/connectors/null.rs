use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::Method;

use crate::application::{
    Application, ApplicationDescriptor, ApplicationType, BasicAuthorization, RequestShaper,
};
use crate::error::{AppStoreError, Result};
use crate::form::{AUTHORIZATION_FORM, Field, FieldType, Form, FormSchema, PASSWORD, USER};
use crate::record::ApplicationInstall;
use crate::transport::RequestDto;

const DEFAULT_API_URL: &str = "https://example.com";

/// Basic-credential connector that signs requests with HTTP basic auth.
pub struct NullApplication {
    descriptor: ApplicationDescriptor,
}

impl NullApplication {
    pub fn new() -> Self {
        Self {
            descriptor: ApplicationDescriptor::new(
                "null",
                "Null",
                "Application with basic authorization",
                ApplicationType::Basic,
            ),
        }
    }
}

impl Default for NullApplication {
    fn default() -> Self {
        Self::new()
    }
}

impl Application for NullApplication {
    fn descriptor(&self) -> &ApplicationDescriptor {
        &self.descriptor
    }

    fn schema(&self) -> FormSchema {
        FormSchema::new(vec![
            Form::new(AUTHORIZATION_FORM)
                .with_field(Field::new(FieldType::Text, USER, "Username").required())
                .with_field(Field::new(FieldType::Password, PASSWORD, "Password").required()),
        ])
    }

    fn as_basic(&self) -> Option<&dyn BasicAuthorization> {
        Some(self)
    }

    fn as_request_shaper(&self) -> Option<&dyn RequestShaper> {
        Some(self)
    }
}

impl BasicAuthorization for NullApplication {}

impl RequestShaper for NullApplication {
    fn request(
        &self,
        install: &ApplicationInstall,
        method: Method,
        url: Option<&str>,
        body: Option<&str>,
    ) -> Result<RequestDto> {
        let missing = self.missing_credentials(install);
        if !missing.is_empty() {
            return Err(AppStoreError::MissingCredentials {
                key: self.descriptor.key.clone(),
                fields: missing,
            });
        }
        let user = install
            .setting_str(AUTHORIZATION_FORM, USER)
            .unwrap_or_default();
        let password = install
            .setting_str(AUTHORIZATION_FORM, PASSWORD)
            .unwrap_or_default();
        let credentials = STANDARD.encode(format!("{user}:{password}"));

        let mut request = RequestDto::new(method, url.unwrap_or(DEFAULT_API_URL))
            .with_header("authorization", format!("Basic {credentials}"))
            .with_header("accept", "application/json");
        if let Some(body) = body {
            request = request
                .with_header("content-type", "application/json")
                .with_body(body);
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::{Map, json};

    use super::*;
    use crate::record::AuthorizationRecord;

    fn install(settings: serde_json::Value) -> ApplicationInstall {
        ApplicationInstall {
            id: "app_1".to_string(),
            key: "null".to_string(),
            user: "user".to_string(),
            settings: settings.as_object().cloned().unwrap_or_else(Map::new),
            enabled: true,
            authorization: AuthorizationRecord::default(),
            webhooks: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn authorized_only_with_user_and_password() {
        let app = NullApplication::new();
        assert!(!app.is_authorized(&install(json!({}))));
        assert!(!app.is_authorized(&install(json!({
            AUTHORIZATION_FORM: { USER: "alice", PASSWORD: "  " }
        }))));
        assert!(app.is_authorized(&install(json!({
            AUTHORIZATION_FORM: { USER: "alice", PASSWORD: "secret" }
        }))));
    }

    #[test]
    fn request_carries_basic_auth_header() -> anyhow::Result<()> {
        let app = NullApplication::new();
        let record = install(json!({
            AUTHORIZATION_FORM: { USER: "alice", PASSWORD: "secret" }
        }));
        let request = app.request(&record, Method::POST, None, Some("{\"a\":1}"))?;

        assert_eq!(request.url, DEFAULT_API_URL);
        assert_eq!(
            request.header("authorization"),
            Some(format!("Basic {}", STANDARD.encode("alice:secret")).as_str())
        );
        assert_eq!(request.body.as_deref(), Some("{\"a\":1}"));
        Ok(())
    }

    #[test]
    fn request_without_credentials_fails() {
        let app = NullApplication::new();
        let error = app
            .request(&install(json!({})), Method::GET, None, None)
            .expect_err("missing credentials");
        assert!(matches!(
            error,
            AppStoreError::MissingCredentials { ref fields, .. } if fields.len() == 2
        ));
    }
}
