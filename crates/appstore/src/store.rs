use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppStoreError, Result};
use crate::record::{ApplicationInstall, AuthorizationRecord};

/// Read-modify-write applied to one record under the store's write lock.
pub type RecordMutation<'a> = Box<dyn FnOnce(&mut ApplicationInstall) -> Result<()> + Send + 'a>;

/// Persistence of installed-application records keyed by `(key, user)`.
/// Every operation is atomic for a single record.
#[async_trait]
pub trait ApplicationInstallStore: Send + Sync {
    async fn find(&self, key: &str, user: &str) -> Result<ApplicationInstall>;

    async fn list(&self, user: &str) -> Result<Vec<ApplicationInstall>>;

    async fn create(&self, key: &str, user: &str) -> Result<ApplicationInstall>;

    /// Replaces the stored record with the same identity.
    async fn save(&self, record: ApplicationInstall) -> Result<ApplicationInstall>;

    async fn update(
        &self,
        key: &str,
        user: &str,
        mutation: RecordMutation<'_>,
    ) -> Result<ApplicationInstall>;

    async fn delete(&self, key: &str, user: &str) -> Result<()>;
}

impl dyn ApplicationInstallStore {
    /// [`ApplicationInstallStore::update`] for mutations that also produce a value.
    pub async fn update_with<T, F>(
        &self,
        key: &str,
        user: &str,
        mutation: F,
    ) -> Result<(ApplicationInstall, T)>
    where
        T: Send,
        F: FnOnce(&mut ApplicationInstall) -> Result<T> + Send,
    {
        let mut output = None;
        let record = self
            .update(
                key,
                user,
                Box::new(|record| {
                    output = Some(mutation(record)?);
                    Ok(())
                }),
            )
            .await?;
        match output {
            Some(output) => Ok((record, output)),
            None => Err(AppStoreError::persistence(
                "record mutation was not applied",
            )),
        }
    }
}

/// In-memory store with an optional JSON snapshot on disk.
#[derive(Clone, Default)]
pub struct InstallStore {
    state: Arc<RwLock<InstallStoreState>>,
    path: Option<PathBuf>,
}

/// `(user, key)` of a record.
type Slot = (String, String);

/// Snapshot layout on disk: `{"installs": [record, ...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct InstallStoreState {
    #[serde(with = "records")]
    installs: BTreeMap<Slot, ApplicationInstall>,
}

mod records {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};

    use super::{Slot, slot};
    use crate::record::ApplicationInstall;

    pub fn serialize<S: Serializer>(
        installs: &BTreeMap<Slot, ApplicationInstall>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(installs.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<Slot, ApplicationInstall>, D::Error> {
        let records = Vec::<ApplicationInstall>::deserialize(deserializer)?;
        Ok(records
            .into_iter()
            .map(|record| (slot(&record.key, &record.user), record))
            .collect())
    }
}

impl InstallStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the snapshot at `path` (if any) and persists every mutation there.
    pub fn open(path: Option<PathBuf>) -> Self {
        let state = Self::load_state(path.as_ref());
        Self {
            state: Arc::new(RwLock::new(state)),
            path,
        }
    }

    pub async fn count(&self) -> usize {
        self.state.read().await.installs.len()
    }

    fn load_state(path: Option<&PathBuf>) -> InstallStoreState {
        let Some(path) = path else {
            return InstallStoreState::default();
        };

        let raw = match std::fs::read_to_string(path) {
            Ok(value) => value,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return InstallStoreState::default();
            }
            Err(error) => {
                tracing::warn!(
                    target: "appstore.store",
                    path = %path.display(),
                    error = %error,
                    "failed to read install store; booting with empty state",
                );
                return InstallStoreState::default();
            }
        };

        match serde_json::from_str::<InstallStoreState>(&raw) {
            Ok(state) => state,
            Err(error) => {
                tracing::warn!(
                    target: "appstore.store",
                    path = %path.display(),
                    error = %error,
                    "failed to parse install store; booting with empty state",
                );
                InstallStoreState::default()
            }
        }
    }

    async fn persist_state(&self, snapshot: &InstallStoreState) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|error| {
                AppStoreError::persistence(format!(
                    "failed to prepare install store directory: {error}"
                ))
            })?;
        }

        let payload = serde_json::to_vec(snapshot).map_err(|error| {
            AppStoreError::persistence(format!("failed to encode install store payload: {error}"))
        })?;

        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&temp_path, payload)
            .await
            .map_err(|error| {
                AppStoreError::persistence(format!(
                    "failed to write install store payload: {error}"
                ))
            })?;

        tokio::fs::rename(&temp_path, path).await.map_err(|error| {
            AppStoreError::persistence(format!(
                "failed to finalize install store payload: {error}"
            ))
        })?;

        Ok(())
    }

    async fn mutate<T, F>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(&mut InstallStoreState) -> Result<T>,
    {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let result = operation(&mut next)?;
        // Commit only once the snapshot is on disk so a failed write leaves memory untouched.
        self.persist_state(&next).await?;
        *state = next;
        Ok(result)
    }
}

#[async_trait]
impl ApplicationInstallStore for InstallStore {
    async fn find(&self, key: &str, user: &str) -> Result<ApplicationInstall> {
        let state = self.state.read().await;
        state
            .installs
            .get(&slot(key, user))
            .cloned()
            .ok_or_else(|| AppStoreError::not_found(key, user))
    }

    async fn list(&self, user: &str) -> Result<Vec<ApplicationInstall>> {
        let user = normalize_non_empty(user, "user")?;
        let state = self.state.read().await;
        let mut installs = state
            .installs
            .values()
            .filter(|record| record.user == user)
            .cloned()
            .collect::<Vec<_>>();
        installs.sort_by(|left, right| left.key.cmp(&right.key));
        Ok(installs)
    }

    async fn create(&self, key: &str, user: &str) -> Result<ApplicationInstall> {
        let key = normalize_non_empty(key, "key")?;
        let user = normalize_non_empty(user, "user")?;

        self.mutate(move |state| {
            let entry = slot(&key, &user);
            if state.installs.contains_key(&entry) {
                return Err(AppStoreError::DuplicateInstall { key, user });
            }

            let now = Utc::now();
            let record = ApplicationInstall {
                id: format!("app_{}", Uuid::new_v4().simple()),
                key,
                user,
                settings: Map::new(),
                enabled: true,
                authorization: AuthorizationRecord::default(),
                webhooks: Vec::new(),
                created_at: now,
                updated_at: now,
            };
            state.installs.insert(entry, record.clone());
            Ok(record)
        })
        .await
    }

    async fn save(&self, record: ApplicationInstall) -> Result<ApplicationInstall> {
        self.mutate(move |state| {
            let Some(existing) = state.installs.get_mut(&slot(&record.key, &record.user)) else {
                return Err(AppStoreError::not_found(&record.key, &record.user));
            };

            let created_at = existing.created_at;
            *existing = record;
            existing.created_at = created_at;
            existing.updated_at = Utc::now();
            Ok(existing.clone())
        })
        .await
    }

    async fn update(
        &self,
        key: &str,
        user: &str,
        mutation: RecordMutation<'_>,
    ) -> Result<ApplicationInstall> {
        self.mutate(move |state| {
            let Some(existing) = state.installs.get_mut(&slot(key, user)) else {
                return Err(AppStoreError::not_found(key, user));
            };

            let mut draft = existing.clone();
            mutation(&mut draft)?;
            draft.id = existing.id.clone();
            draft.key = existing.key.clone();
            draft.user = existing.user.clone();
            draft.created_at = existing.created_at;
            draft.updated_at = Utc::now();
            *existing = draft;
            Ok(existing.clone())
        })
        .await
    }

    async fn delete(&self, key: &str, user: &str) -> Result<()> {
        self.mutate(|state| {
            state
                .installs
                .remove(&slot(key, user))
                .map(|_| ())
                .ok_or_else(|| AppStoreError::not_found(key, user))
        })
        .await
    }
}

fn slot(key: &str, user: &str) -> Slot {
    (user.trim().to_string(), key.trim().to_string())
}

fn normalize_non_empty(value: &str, field: &'static str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppStoreError::invalid_argument(format!("{field}: value is required")));
    }
    Ok(trimmed.to_string())
}
