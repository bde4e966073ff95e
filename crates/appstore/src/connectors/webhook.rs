use reqwest::Method;
use serde_json::{Value, json};

use crate::application::{
    Application, ApplicationDescriptor, ApplicationType, BasicAuthorization, WebhookCapable,
    WebhookSubscription,
};
use crate::error::{AppStoreError, Result};
use crate::form::FormSchema;
use crate::record::ApplicationInstall;
use crate::transport::{RequestDto, ResponseDto};

/// Webhook-capable connector against a provider exposing
/// `POST /webhook/subscribe` and `POST /webhook/unsubscribe`.
pub struct WebhookApplication {
    descriptor: ApplicationDescriptor,
    base_url: String,
    subscriptions: Vec<WebhookSubscription>,
}

impl WebhookApplication {
    pub fn new(base_url: &str) -> Self {
        Self {
            descriptor: ApplicationDescriptor::new(
                "webhook",
                "Webhook",
                "Webhook",
                ApplicationType::Webhook,
            ),
            base_url: base_url.trim_end_matches('/').to_string(),
            subscriptions: vec![WebhookSubscription::new("node", "topology")],
        }
    }

    pub fn with_subscriptions(mut self, subscriptions: Vec<WebhookSubscription>) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/webhook/{path}", self.base_url)
    }
}

impl Application for WebhookApplication {
    fn descriptor(&self) -> &ApplicationDescriptor {
        &self.descriptor
    }

    fn schema(&self) -> FormSchema {
        FormSchema::default()
    }

    fn as_basic(&self) -> Option<&dyn BasicAuthorization> {
        Some(self)
    }

    fn as_webhook(&self) -> Option<&dyn WebhookCapable> {
        Some(self)
    }
}

impl BasicAuthorization for WebhookApplication {
    fn required_fields(&self) -> Vec<&'static str> {
        Vec::new()
    }
}

impl WebhookCapable for WebhookApplication {
    fn subscriptions(&self) -> Vec<WebhookSubscription> {
        self.subscriptions.clone()
    }

    fn subscribe_request(
        &self,
        _install: &ApplicationInstall,
        subscription: &WebhookSubscription,
        callback_url: &str,
    ) -> Result<RequestDto> {
        let mut payload = json!({ "url": callback_url });
        if !subscription.parameters.is_empty() {
            payload["parameters"] = Value::Object(subscription.parameters.clone());
        }
        Ok(RequestDto::new(Method::POST, self.endpoint("subscribe")).with_json(&payload))
    }

    fn unsubscribe_request(
        &self,
        _install: &ApplicationInstall,
        remote_id: &str,
    ) -> Result<RequestDto> {
        Ok(RequestDto::new(Method::POST, self.endpoint("unsubscribe"))
            .with_json(&json!({ "id": remote_id })))
    }

    fn process_subscribe_response(
        &self,
        response: &ResponseDto,
        _install: &ApplicationInstall,
    ) -> Result<String> {
        response
            .json()
            .and_then(|body| match body.get("id") {
                Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
                Some(Value::Number(id)) => Some(id.to_string()),
                _ => None,
            })
            .ok_or_else(|| AppStoreError::RemoteRejected {
                status: response.status,
                body: "subscribe response did not include an id".to_string(),
            })
    }

    fn process_unsubscribe_response(&self, response: &ResponseDto) -> bool {
        response
            .json()
            .and_then(|body| body.get("success").and_then(Value::as_bool))
            .unwrap_or(false)
    }
}
