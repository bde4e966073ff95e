//! Settings and credential updates against an application's form schema.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::application::Application;
use crate::error::{AppStoreError, Result};
use crate::form::{self, Field, FormView};
use crate::record::ApplicationInstall;
use crate::secrets::{self, SecretCipher};

/// Single-field credential update. `password` is mandatory even though the
/// type allows it to be absent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordUpdate {
    pub form_key: String,
    pub field_key: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl PasswordUpdate {
    pub fn new(
        form_key: impl Into<String>,
        field_key: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            form_key: form_key.into(),
            field_key: field_key.into(),
            password: Some(password.into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsManager {
    cipher: Option<SecretCipher>,
}

impl SettingsManager {
    pub fn new(cipher: Option<SecretCipher>) -> Self {
        Self { cipher }
    }

    pub fn render(&self, application: &dyn Application, install: &ApplicationInstall) -> Vec<FormView> {
        form::render(&application.schema(), &install.settings)
    }

    /// Deep-merges `partial` (form key -> field key -> value) into `install`.
    /// Everything is validated before the first write. `null` values leave the
    /// stored field as it is.
    pub fn merge(
        &self,
        application: &dyn Application,
        install: &mut ApplicationInstall,
        partial: &Map<String, Value>,
    ) -> Result<()> {
        let schema = application.schema();
        let mut writes = Vec::new();

        for (form_key, values) in partial {
            let Value::Object(values) = values else {
                return Err(AppStoreError::invalid_argument(format!(
                    "settings for form '{form_key}' must be an object"
                )));
            };
            if schema.form(form_key).is_none() {
                return Err(invalid_field(application, form_key, ""));
            }

            for (field_key, value) in values {
                let Some(field) = schema.field(form_key, field_key) else {
                    return Err(invalid_field(application, form_key, field_key));
                };
                if field.read_only {
                    return Err(read_only(form_key, field_key));
                }
                if value.is_null() {
                    continue;
                }
                writes.push((form_key.as_str(), field, value));
            }
        }

        let prepared = writes
            .into_iter()
            .map(|(form_key, field, value)| {
                self.stored_value(install, form_key, field, value)
                    .map(|stored| (form_key, field, stored))
            })
            .collect::<Result<Vec<_>>>()?;
        for (form_key, field, stored) in prepared {
            install.set_setting(form_key, &field.key, stored);
        }
        Ok(())
    }

    /// Overwrites exactly one declared field. Siblings keep value and position.
    pub fn update_password(
        &self,
        application: &dyn Application,
        install: &mut ApplicationInstall,
        update: &PasswordUpdate,
    ) -> Result<()> {
        let Some(password) = update.password.as_deref() else {
            return Err(AppStoreError::invalid_argument(
                "password: value is required",
            ));
        };
        let form_key = update.form_key.trim();
        let field_key = update.field_key.trim();
        if form_key.is_empty() || field_key.is_empty() {
            return Err(AppStoreError::invalid_argument(
                "formKey and fieldKey are required",
            ));
        }

        let schema = application.schema();
        let Some(field) = schema.field(form_key, field_key) else {
            return Err(invalid_field(application, form_key, field_key));
        };
        if field.read_only {
            return Err(read_only(form_key, field_key));
        }

        let value = Value::String(password.to_string());
        let stored = self.stored_value(install, form_key, field, &value)?;
        install.set_setting(form_key, field_key, stored);
        Ok(())
    }

    /// Seals a value into a secret slot that is written by the system rather
    /// than the user (tokens).
    pub fn store_secret(
        &self,
        install: &mut ApplicationInstall,
        form_key: &str,
        field_key: &str,
        plaintext: &str,
    ) -> Result<()> {
        let stored = secrets::protect(plaintext, self.cipher.as_ref())?;
        install.set_setting(form_key, field_key, Value::String(stored));
        Ok(())
    }

    /// Copy of `install` with every secret field decrypted, for connector callbacks.
    pub fn reveal(
        &self,
        application: &dyn Application,
        install: &ApplicationInstall,
    ) -> Result<ApplicationInstall> {
        let mut revealed = install.clone();
        for form in application.schema().forms {
            for field in form.fields.iter().filter(|field| field.secret) {
                let Some(stored) = install.setting_str(&form.key, &field.key) else {
                    continue;
                };
                let plaintext = secrets::reveal(stored, self.cipher.as_ref())?;
                revealed.set_setting(&form.key, &field.key, Value::String(plaintext));
            }
        }
        Ok(revealed)
    }

    fn stored_value(
        &self,
        install: &ApplicationInstall,
        form_key: &str,
        field: &Field,
        value: &Value,
    ) -> Result<Value> {
        if !field.secret {
            return Ok(value.clone());
        }
        let Value::String(plaintext) = value else {
            return Err(AppStoreError::invalid_argument(format!(
                "field '{form_key}.{}' expects a string value",
                field.key
            )));
        };

        // Keep the current envelope when the secret did not change.
        if let Some(current) = install.setting_str(form_key, &field.key) {
            if secrets::reveal(current, self.cipher.as_ref()).ok().as_deref() == Some(plaintext) {
                return Ok(Value::String(current.to_string()));
            }
        }
        Ok(Value::String(secrets::protect(plaintext, self.cipher.as_ref())?))
    }
}

fn read_only(form: &str, field: &str) -> AppStoreError {
    AppStoreError::invalid_argument(format!("field '{form}.{field}' is read-only"))
}

fn invalid_field(application: &dyn Application, form: &str, field: &str) -> AppStoreError {
    AppStoreError::InvalidField {
        key: application.key().to_string(),
        form: form.to_string(),
        field: field.to_string(),
    }
}
