use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::application::{
    Application, ApplicationDescriptor, ApplicationType, AuthorizationType, Capabilities,
};
use crate::connectors::{NullApplication, NullOAuthApplication, WebhookApplication};
use crate::error::{AppStoreError, Result};

/// Static catalog of connectors, keyed by application key.
#[derive(Clone, Default)]
pub struct ApplicationRegistry {
    applications: BTreeMap<String, Arc<dyn Application>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub key: String,
    pub name: String,
    pub description: String,
    pub application_type: ApplicationType,
    pub authorization_type: AuthorizationType,
    pub capabilities: Capabilities,
}

impl CatalogEntry {
    pub fn from_application(application: &dyn Application) -> Self {
        let ApplicationDescriptor {
            key,
            name,
            description,
            application_type,
        } = application.descriptor().clone();
        let capabilities = application.capabilities();
        Self {
            key,
            name,
            description,
            application_type,
            authorization_type: capabilities.authorization_type(),
            capabilities,
        }
    }
}

impl ApplicationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the reference connectors.
    pub fn with_reference_connectors(webhook_base_url: &str) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(NullApplication::new()));
        registry.register(Arc::new(NullOAuthApplication::new()));
        registry.register(Arc::new(WebhookApplication::new(webhook_base_url)));
        registry
    }

    /// Adds `application`, replacing any connector registered under the same key.
    pub fn register(&mut self, application: Arc<dyn Application>) -> &mut Self {
        let key = application.key().to_string();
        if self.applications.insert(key.clone(), application).is_some() {
            tracing::warn!(
                target: "appstore.registry",
                key = %key,
                "application key registered twice; keeping the latest connector",
            );
        }
        self
    }

    pub fn resolve(&self, key: &str) -> Result<Arc<dyn Application>> {
        self.applications
            .get(key)
            .cloned()
            .ok_or_else(|| AppStoreError::UnknownApplication {
                key: key.to_string(),
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.applications.contains_key(key)
    }

    pub fn catalog(&self) -> Vec<CatalogEntry> {
        self.applications
            .values()
            .map(|application| CatalogEntry::from_application(application.as_ref()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn resolve_unknown_key_fails_with_unknown_application() {
        let registry = ApplicationRegistry::with_reference_connectors("https://example.com");
        let error = registry
            .resolve("missing")
            .err()
            .map(|error| error.code());
        assert_eq!(error, Some(ErrorCode::UnknownApplication));
    }

    #[test]
    fn catalog_is_sorted_and_reports_capabilities() {
        let registry = ApplicationRegistry::with_reference_connectors("https://example.com");
        let catalog = registry.catalog();
        let keys = catalog
            .iter()
            .map(|entry| entry.key.as_str())
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["null", "null2", "webhook"]);

        let null = &catalog[0];
        assert_eq!(null.name, "Null");
        assert_eq!(null.authorization_type, AuthorizationType::Basic);
        assert!(null.capabilities.request_shaping);
        assert!(!null.capabilities.webhooks);

        let oauth = &catalog[1];
        assert_eq!(oauth.authorization_type, AuthorizationType::OAuth2);

        let webhook = &catalog[2];
        assert!(webhook.capabilities.webhooks);
        assert_eq!(webhook.application_type, ApplicationType::Webhook);
    }

    #[test]
    fn register_replaces_existing_key() {
        let mut registry = ApplicationRegistry::new();
        registry.register(Arc::new(WebhookApplication::new("https://one.example")));
        registry.register(Arc::new(WebhookApplication::new("https://two.example")));
        assert_eq!(registry.catalog().len(), 1);
        assert!(registry.contains("webhook"));
    }
}
