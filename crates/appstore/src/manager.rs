use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::application::Application;
use crate::authorization::{AuthorizationOrchestrator, RedirectTarget};
use crate::error::{AppStoreError, Result};
use crate::form::FormView;
use crate::record::{ApplicationInstall, AuthorizationState, SubscriptionKey};
use crate::registry::{ApplicationRegistry, CatalogEntry};
use crate::secrets::SecretCipher;
use crate::settings::{PasswordUpdate, SettingsManager};
use crate::store::ApplicationInstallStore;
use crate::transport::{HttpTransport, RequestDto};
use crate::webhooks::{self, WebhookReconciler, WebhookReport};

pub const DEFAULT_CALLBACK_BASE_URL: &str = "http://127.0.0.1:8788";
pub const DEFAULT_OUTBOUND_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Base of the callback URLs handed to webhook providers.
    pub callback_base_url: String,
    /// Timeout applied to every outbound provider call.
    pub outbound_timeout: Duration,
    /// Upper bound on concurrent provider calls within one reconciliation.
    pub webhook_concurrency: usize,
    pub cipher: Option<SecretCipher>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            callback_base_url: DEFAULT_CALLBACK_BASE_URL.to_string(),
            outbound_timeout: Duration::from_millis(DEFAULT_OUTBOUND_TIMEOUT_MS),
            webhook_concurrency: webhooks::DEFAULT_CONCURRENCY,
            cipher: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookView {
    pub node: String,
    pub topology: String,
    pub remote_id: String,
    pub subscribed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstalledApplication {
    pub id: String,
    pub user: String,
    #[serde(flatten)]
    pub application: CatalogEntry,
    pub enabled: bool,
    pub authorized: bool,
    pub authorization_state: AuthorizationState,
    pub webhooks: Vec<WebhookView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstalledApplicationDetail {
    #[serde(flatten)]
    pub install: InstalledApplication,
    pub settings: Vec<FormView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UninstallReport {
    pub key: String,
    pub user: String,
    pub webhooks: WebhookReport,
}

/// Entry point for the handler layer. Composes the registry, the install
/// store and the settings, authorization and webhook components.
#[derive(Clone)]
pub struct ApplicationManager {
    registry: Arc<ApplicationRegistry>,
    store: Arc<dyn ApplicationInstallStore>,
    settings: SettingsManager,
    authorization: AuthorizationOrchestrator,
    webhooks: WebhookReconciler,
}

impl ApplicationManager {
    pub fn new(
        registry: Arc<ApplicationRegistry>,
        store: Arc<dyn ApplicationInstallStore>,
        transport: Arc<dyn HttpTransport>,
        options: ManagerOptions,
    ) -> Self {
        let settings = SettingsManager::new(options.cipher);
        let authorization = AuthorizationOrchestrator::new(
            settings.clone(),
            transport.clone(),
            options.outbound_timeout,
        );
        let webhooks = WebhookReconciler::new(
            transport,
            &options.callback_base_url,
            options.outbound_timeout,
            options.webhook_concurrency,
        );
        Self {
            registry,
            store,
            settings,
            authorization,
            webhooks,
        }
    }

    pub fn registry(&self) -> &ApplicationRegistry {
        &self.registry
    }

    pub fn list_applications(&self) -> Vec<CatalogEntry> {
        self.registry.catalog()
    }

    pub async fn install_application(&self, key: &str, user: &str) -> Result<InstalledApplication> {
        let application = self.registry.resolve(key.trim())?;
        let record = self.store.create(application.key(), user).await?;
        tracing::info!(
            target: "appstore.manager",
            key = %record.key,
            user = %record.user,
            install_id = %record.id,
            "application installed",
        );
        Ok(self.summarize(application.as_ref(), &record))
    }

    /// Best-effort unsubscribes every tracked webhook, then deletes the record
    /// regardless of the remote outcome.
    pub async fn uninstall_application(&self, key: &str, user: &str) -> Result<UninstallReport> {
        let record = self.store.find(key, user).await?;
        let application = self.registry.resolve(&record.key).ok();

        let webhooks = if record.webhooks.is_empty() {
            WebhookReport::default()
        } else {
            let revealed = match application.as_deref() {
                Some(application) => self.reveal_or_stored(application, &record),
                None => record.clone(),
            };
            self.webhooks
                .unsubscribe(application.as_deref(), &revealed)
                .await
        };

        self.store.delete(&record.key, &record.user).await?;
        tracing::info!(
            target: "appstore.manager",
            key = %record.key,
            user = %record.user,
            webhooks_failed = webhooks.failure_count(),
            "application uninstalled",
        );
        Ok(UninstallReport {
            key: record.key,
            user: record.user,
            webhooks,
        })
    }

    pub async fn get_installed_applications(&self, user: &str) -> Result<Vec<InstalledApplication>> {
        let records = self.store.list(user).await?;
        let mut installs = Vec::with_capacity(records.len());
        for record in records {
            let Ok(application) = self.registry.resolve(&record.key) else {
                tracing::warn!(
                    target: "appstore.manager",
                    key = %record.key,
                    user = %record.user,
                    "installed application is no longer registered; skipping",
                );
                continue;
            };
            installs.push(self.summarize(application.as_ref(), &record));
        }
        Ok(installs)
    }

    pub async fn get_installed_application_detail(
        &self,
        key: &str,
        user: &str,
    ) -> Result<InstalledApplicationDetail> {
        let (application, record) = self.load(key, user).await?;
        Ok(InstalledApplicationDetail {
            install: self.summarize(application.as_ref(), &record),
            settings: self.settings.render(application.as_ref(), &record),
        })
    }

    pub async fn get_application_settings(&self, key: &str, user: &str) -> Result<Vec<FormView>> {
        let (application, record) = self.load(key, user).await?;
        Ok(self.settings.render(application.as_ref(), &record))
    }

    pub async fn save_application_settings(
        &self,
        key: &str,
        user: &str,
        settings: Map<String, Value>,
    ) -> Result<InstalledApplicationDetail> {
        let application = self.resolve_installed(key, user).await?;
        let manager = self.settings.clone();
        let target = application.clone();
        let record = self
            .store
            .update(
                key,
                user,
                Box::new(move |record| manager.merge(target.as_ref(), record, &settings)),
            )
            .await?;

        tracing::info!(
            target: "appstore.manager",
            key = %record.key,
            user = %record.user,
            "application settings saved",
        );
        Ok(InstalledApplicationDetail {
            install: self.summarize(application.as_ref(), &record),
            settings: self.settings.render(application.as_ref(), &record),
        })
    }

    pub async fn save_application_password(
        &self,
        key: &str,
        user: &str,
        update: PasswordUpdate,
    ) -> Result<InstalledApplicationDetail> {
        let application = self.resolve_installed(key, user).await?;
        let manager = self.settings.clone();
        let target = application.clone();
        let form_key = update.form_key.clone();
        let field_key = update.field_key.clone();
        let record = self
            .store
            .update(
                key,
                user,
                Box::new(move |record| manager.update_password(target.as_ref(), record, &update)),
            )
            .await?;

        tracing::info!(
            target: "appstore.manager",
            key = %record.key,
            user = %record.user,
            form = %form_key,
            field = %field_key,
            "application credential updated",
        );
        Ok(InstalledApplicationDetail {
            install: self.summarize(application.as_ref(), &record),
            settings: self.settings.render(application.as_ref(), &record),
        })
    }

    pub async fn authorize_application(
        &self,
        key: &str,
        user: &str,
        redirect_url: &str,
    ) -> Result<RedirectTarget> {
        let application = self.resolve_installed(key, user).await?;
        let (record, target) = self
            .store
            .update_with(key, user, |record| {
                self.authorization
                    .authorize(application.as_ref(), record, redirect_url)
            })
            .await?;

        tracing::info!(
            target: "appstore.manager",
            key = %record.key,
            user = %record.user,
            state = record.authorization.state.as_str(),
            "application authorization started",
        );
        Ok(target)
    }

    /// Stores the token from a provider callback and returns the redirect URL
    /// recorded by the last `authorize_application`.
    pub async fn save_authorization_token(
        &self,
        key: &str,
        user: &str,
        callback: Map<String, Value>,
    ) -> Result<String> {
        let (application, record) = self.load(key, user).await?;
        let revealed = self.settings.reveal(application.as_ref(), &record)?;
        let token = self
            .authorization
            .resolve_token(application.as_ref(), &revealed, &callback)
            .await?;

        let (record, redirect_url) = self
            .store
            .update_with(key, user, |record| {
                self.authorization
                    .complete(application.as_ref(), record, &callback, &token)
            })
            .await?;

        tracing::info!(
            target: "appstore.manager",
            key = %record.key,
            user = %record.user,
            "application authorized with token",
        );
        Ok(redirect_url)
    }

    pub async fn is_authorized(&self, key: &str, user: &str) -> Result<bool> {
        let (application, record) = self.load(key, user).await?;
        Ok(self.authorized(application.as_ref(), &record))
    }

    /// Subscribes the declared webhooks of an installed record and persists
    /// the confirmed entries. Remote failures only show up in the report.
    pub async fn subscribe_webhooks(&self, record: &ApplicationInstall) -> Result<WebhookReport> {
        let application = self.registry.resolve(&record.key)?;
        let revealed = self.settings.reveal(application.as_ref(), record)?;
        let result = self.webhooks.subscribe(application.as_ref(), &revealed).await;

        if !result.entries.is_empty() {
            let entries = result.entries;
            self.store
                .update(
                    &record.key,
                    &record.user,
                    Box::new(move |record| {
                        for entry in entries {
                            record.upsert_webhook(entry);
                        }
                        Ok(())
                    }),
                )
                .await?;
        }
        Ok(result.report)
    }

    pub async fn subscribe_application_webhooks(
        &self,
        key: &str,
        user: &str,
    ) -> Result<WebhookReport> {
        let record = self.store.find(key, user).await?;
        self.subscribe_webhooks(&record).await
    }

    /// Unsubscribes every tracked webhook. Local entries are removed even
    /// when the provider call fails.
    pub async fn unsubscribe_webhooks(&self, key: &str, user: &str) -> Result<WebhookReport> {
        let (application, record) = self.load(key, user).await?;
        if record.webhooks.is_empty() {
            return Ok(WebhookReport::default());
        }
        let revealed = self.reveal_or_stored(application.as_ref(), &record);
        let report = self
            .webhooks
            .unsubscribe(Some(application.as_ref()), &revealed)
            .await;

        let removed = record
            .webhooks
            .iter()
            .map(|entry| entry.key())
            .collect::<Vec<SubscriptionKey>>();
        self.store
            .update(
                key,
                user,
                Box::new(move |record| {
                    for key in &removed {
                        record.remove_webhook(key);
                    }
                    Ok(())
                }),
            )
            .await?;
        Ok(report)
    }

    /// Builds an outbound API request for a request-shaping connector.
    pub async fn build_request(
        &self,
        key: &str,
        user: &str,
        method: Method,
        url: Option<&str>,
        body: Option<&str>,
    ) -> Result<RequestDto> {
        let (application, record) = self.load(key, user).await?;
        let Some(shaper) = application.as_request_shaper() else {
            return Err(AppStoreError::invalid_argument(format!(
                "application '{}' does not build requests",
                application.key()
            )));
        };
        let revealed = self.settings.reveal(application.as_ref(), &record)?;
        shaper.request(&revealed, method, url, body)
    }

    async fn load(&self, key: &str, user: &str) -> Result<(Arc<dyn Application>, ApplicationInstall)> {
        let record = self.store.find(key, user).await?;
        let application = self.registry.resolve(&record.key)?;
        Ok((application, record))
    }

    async fn resolve_installed(&self, key: &str, user: &str) -> Result<Arc<dyn Application>> {
        self.load(key, user).await.map(|(application, _)| application)
    }

    fn reveal_or_stored(
        &self,
        application: &dyn Application,
        record: &ApplicationInstall,
    ) -> ApplicationInstall {
        match self.settings.reveal(application, record) {
            Ok(revealed) => revealed,
            Err(error) => {
                tracing::warn!(
                    target: "appstore.manager",
                    key = %record.key,
                    user = %record.user,
                    error = %error,
                    "failed to reveal settings; using stored values",
                );
                record.clone()
            }
        }
    }

    /// Records whose secrets cannot be opened count as unauthorized.
    fn authorized(&self, application: &dyn Application, record: &ApplicationInstall) -> bool {
        match self.settings.reveal(application, record) {
            Ok(revealed) => application.is_authorized(&revealed),
            Err(error) => {
                tracing::warn!(
                    target: "appstore.manager",
                    key = %record.key,
                    user = %record.user,
                    error = %error,
                    "failed to reveal settings; reporting application as unauthorized",
                );
                false
            }
        }
    }

    fn summarize(
        &self,
        application: &dyn Application,
        record: &ApplicationInstall,
    ) -> InstalledApplication {
        InstalledApplication {
            id: record.id.clone(),
            user: record.user.clone(),
            application: CatalogEntry::from_application(application),
            enabled: record.enabled,
            authorized: self.authorized(application, record),
            authorization_state: record.authorization.state,
            webhooks: record
                .webhooks
                .iter()
                .map(|entry| WebhookView {
                    node: entry.node.clone(),
                    topology: entry.topology.clone(),
                    remote_id: entry.remote_id.clone(),
                    subscribed_at: entry.subscribed_at,
                })
                .collect(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
