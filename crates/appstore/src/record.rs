use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationState {
    #[default]
    Unauthorized,
    AuthorizationPending,
    Authorized,
}

impl AuthorizationState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::AuthorizationPending => "authorization_pending",
            Self::Authorized => "authorized",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationRecord {
    pub state: AuthorizationState,
    pub redirect_url: Option<String>,
    pub oauth_state: Option<String>,
    pub authorized_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub node: String,
    pub topology: String,
}

impl SubscriptionKey {
    pub fn new(node: impl Into<String>, topology: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            topology: topology.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEntry {
    pub node: String,
    pub topology: String,
    pub remote_id: String,
    pub callback_token: String,
    pub subscribed_at: DateTime<Utc>,
}

impl WebhookEntry {
    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.node.clone(), self.topology.clone())
    }

    fn matches(&self, key: &SubscriptionKey) -> bool {
        self.node == key.node && self.topology == key.topology
    }
}

/// Per-user installed application. Identity is `(key, user)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationInstall {
    pub id: String,
    pub key: String,
    pub user: String,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub authorization: AuthorizationRecord,
    #[serde(default)]
    pub webhooks: Vec<WebhookEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl ApplicationInstall {
    /// Form values for `form`, if the form has been saved at least once.
    pub fn form(&self, form: &str) -> Option<&Map<String, Value>> {
        self.settings.get(form).and_then(Value::as_object)
    }

    pub fn setting(&self, form: &str, field: &str) -> Option<&Value> {
        self.form(form).and_then(|values| values.get(field))
    }

    pub fn setting_str(&self, form: &str, field: &str) -> Option<&str> {
        self.setting(form, field).and_then(Value::as_str)
    }

    /// Writes one field, creating the form if needed and keeping sibling order.
    pub fn set_setting(&mut self, form: &str, field: &str, value: Value) {
        let entry = self
            .settings
            .entry(form.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(values) = entry {
            values.insert(field.to_string(), value);
        }
    }

    pub fn webhook(&self, key: &SubscriptionKey) -> Option<&WebhookEntry> {
        self.webhooks.iter().find(|entry| entry.matches(key))
    }

    pub fn upsert_webhook(&mut self, entry: WebhookEntry) {
        let key = entry.key();
        self.webhooks.retain(|existing| !existing.matches(&key));
        self.webhooks.push(entry);
        self.webhooks.sort_by_key(WebhookEntry::key);
    }

    pub fn remove_webhook(&mut self, key: &SubscriptionKey) -> Option<WebhookEntry> {
        let index = self.webhooks.iter().position(|entry| entry.matches(key))?;
        Some(self.webhooks.remove(index))
    }
}
