//! Reconciles an application's declared webhook subscriptions with the
//! remote provider.
//!
//! Each `(node, topology)` pair is handled independently. Remote failures
//! become per-pair outcomes in a [`WebhookReport`]; they are never raised for
//! the whole batch. Outcomes are sorted by pair regardless of completion order.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{StreamExt, stream};
use serde::Serialize;
use uuid::Uuid;

use crate::application::{Application, WebhookCapable, WebhookSubscription};
use crate::error::{AppStoreError, Result};
use crate::record::{ApplicationInstall, SubscriptionKey, WebhookEntry};
use crate::transport::HttpTransport;

pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Subscribed { remote_id: String },
    AlreadySubscribed { remote_id: String },
    Unsubscribed { remote_success: bool },
    Failed { code: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionOutcome {
    pub node: String,
    pub topology: String,
    #[serde(flatten)]
    pub status: SubscriptionStatus,
}

impl SubscriptionOutcome {
    fn new(key: &SubscriptionKey, status: SubscriptionStatus) -> Self {
        Self {
            node: key.node.clone(),
            topology: key.topology.clone(),
            status,
        }
    }

    fn failed(key: &SubscriptionKey, error: &AppStoreError) -> Self {
        Self::new(
            key,
            SubscriptionStatus::Failed {
                code: error.code().as_str().to_string(),
                message: error.to_string(),
            },
        )
    }

    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.node.clone(), self.topology.clone())
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, SubscriptionStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WebhookReport {
    pub outcomes: Vec<SubscriptionOutcome>,
}

impl WebhookReport {
    fn from_outcomes(mut outcomes: Vec<SubscriptionOutcome>) -> Self {
        outcomes.sort_by_key(SubscriptionOutcome::key);
        Self { outcomes }
    }

    pub fn failures(&self) -> impl Iterator<Item = &SubscriptionOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.is_failure())
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Result of a subscribe pass: the report plus the entries to persist.
#[derive(Debug, Clone, Default)]
pub struct SubscribeResult {
    pub report: WebhookReport,
    pub entries: Vec<WebhookEntry>,
}

#[derive(Clone)]
pub struct WebhookReconciler {
    transport: Arc<dyn HttpTransport>,
    callback_base_url: String,
    timeout: Duration,
    concurrency: usize,
}

impl WebhookReconciler {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        callback_base_url: &str,
        timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            transport,
            callback_base_url: callback_base_url.trim_end_matches('/').to_string(),
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    pub fn callback_url(&self, subscription: &WebhookSubscription, token: &str) -> String {
        format!(
            "{}/webhook/topologies/{}/nodes/{}/token/{}",
            self.callback_base_url, subscription.topology, subscription.node, token
        )
    }

    /// Subscribes every declared pair not tracked on `install` yet.
    /// `install` must carry revealed settings.
    pub async fn subscribe(
        &self,
        application: &dyn Application,
        install: &ApplicationInstall,
    ) -> SubscribeResult {
        let Some(webhook) = application.as_webhook() else {
            return SubscribeResult::default();
        };

        let results = stream::iter(webhook.subscriptions())
            .map(|subscription| self.subscribe_one(webhook, install, subscription))
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut outcomes = Vec::with_capacity(results.len());
        let mut entries = Vec::new();
        for (outcome, entry) in results {
            outcomes.push(outcome);
            entries.extend(entry);
        }
        entries.sort_by_key(WebhookEntry::key);

        let report = WebhookReport::from_outcomes(outcomes);
        tracing::info!(
            target: "appstore.webhooks",
            key = %install.key,
            user = %install.user,
            subscribed = entries.len(),
            failed = report.failure_count(),
            "webhook subscribe pass finished",
        );
        SubscribeResult { report, entries }
    }

    /// Sends an unsubscribe for every tracked entry. The caller drops the
    /// local entries whatever the outcome.
    pub async fn unsubscribe(
        &self,
        application: Option<&dyn Application>,
        install: &ApplicationInstall,
    ) -> WebhookReport {
        let webhook = application.and_then(|application| application.as_webhook());

        let pending: Vec<_> = install
            .webhooks
            .iter()
            .map(|entry| self.unsubscribe_one(webhook, install, entry))
            .collect();
        let outcomes = stream::iter(pending)
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let report = WebhookReport::from_outcomes(outcomes);
        if !report.is_empty() {
            tracing::info!(
                target: "appstore.webhooks",
                key = %install.key,
                user = %install.user,
                removed = report.outcomes.len(),
                failed = report.failure_count(),
                "webhook unsubscribe pass finished",
            );
        }
        report
    }

    async fn subscribe_one(
        &self,
        webhook: &dyn WebhookCapable,
        install: &ApplicationInstall,
        subscription: WebhookSubscription,
    ) -> (SubscriptionOutcome, Option<WebhookEntry>) {
        let key = subscription.key();
        if let Some(existing) = install.webhook(&key) {
            let status = SubscriptionStatus::AlreadySubscribed {
                remote_id: existing.remote_id.clone(),
            };
            return (SubscriptionOutcome::new(&key, status), None);
        }

        let callback_token = Uuid::new_v4().simple().to_string();
        match self
            .request_subscription(webhook, install, &subscription, &callback_token)
            .await
        {
            Ok(remote_id) => {
                let entry = WebhookEntry {
                    node: subscription.node,
                    topology: subscription.topology,
                    remote_id: remote_id.clone(),
                    callback_token,
                    subscribed_at: Utc::now(),
                };
                let status = SubscriptionStatus::Subscribed { remote_id };
                (SubscriptionOutcome::new(&key, status), Some(entry))
            }
            Err(error) => {
                tracing::warn!(
                    target: "appstore.webhooks",
                    key = %install.key,
                    user = %install.user,
                    node = %key.node,
                    topology = %key.topology,
                    code = error.code().as_str(),
                    error = %error,
                    "webhook subscription failed",
                );
                (SubscriptionOutcome::failed(&key, &error), None)
            }
        }
    }

    async fn request_subscription(
        &self,
        webhook: &dyn WebhookCapable,
        install: &ApplicationInstall,
        subscription: &WebhookSubscription,
        callback_token: &str,
    ) -> Result<String> {
        let callback_url = self.callback_url(subscription, callback_token);
        let request = webhook.subscribe_request(install, subscription, &callback_url)?;
        let response = self.transport.send(request, self.timeout).await?;
        if !response.is_success() {
            return Err(AppStoreError::RemoteRejected {
                status: response.status,
                body: response.body,
            });
        }
        webhook.process_subscribe_response(&response, install)
    }

    async fn unsubscribe_one(
        &self,
        webhook: Option<&dyn WebhookCapable>,
        install: &ApplicationInstall,
        entry: &WebhookEntry,
    ) -> SubscriptionOutcome {
        let key = entry.key();
        let result = match webhook {
            Some(webhook) => self.request_unsubscribe(webhook, install, entry).await,
            None => Err(AppStoreError::invalid_state(format!(
                "application '{}' no longer supports webhooks",
                install.key
            ))),
        };

        match result {
            Ok(remote_success) => {
                if !remote_success {
                    tracing::warn!(
                        target: "appstore.webhooks",
                        key = %install.key,
                        user = %install.user,
                        remote_id = %entry.remote_id,
                        "provider did not confirm webhook removal",
                    );
                }
                SubscriptionOutcome::new(&key, SubscriptionStatus::Unsubscribed { remote_success })
            }
            Err(error) => {
                tracing::warn!(
                    target: "appstore.webhooks",
                    key = %install.key,
                    user = %install.user,
                    remote_id = %entry.remote_id,
                    code = error.code().as_str(),
                    error = %error,
                    "webhook unsubscribe failed; dropping local entry",
                );
                SubscriptionOutcome::failed(&key, &error)
            }
        }
    }

    async fn request_unsubscribe(
        &self,
        webhook: &dyn WebhookCapable,
        install: &ApplicationInstall,
        entry: &WebhookEntry,
    ) -> Result<bool> {
        let request = webhook.unsubscribe_request(install, &entry.remote_id)?;
        let response = self.transport.send(request, self.timeout).await?;
        if !response.is_success() {
            return Err(AppStoreError::RemoteRejected {
                status: response.status,
                body: response.body,
            });
        }
        Ok(webhook.process_unsubscribe_response(&response))
    }
}
