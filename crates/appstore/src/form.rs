//! Schema-driven settings forms.
//!
//! Every application declares its forms once. Stored settings are validated
//! against that declaration and rendered back in declaration order, with
//! secret fields reduced to a presence flag.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const AUTHORIZATION_FORM: &str = "authorization_form";
pub const USER: &str = "user";
pub const PASSWORD: &str = "password";
pub const TOKEN: &str = "token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Url,
    Password,
    Number,
    Checkbox,
    Selectbox,
}

impl FieldType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Url => "url",
            Self::Password => "password",
            Self::Number => "number",
            Self::Checkbox => "checkbox",
            Self::Selectbox => "selectbox",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub secret: bool,
    pub required: bool,
    pub read_only: bool,
}

impl Field {
    pub fn new(field_type: FieldType, key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            field_type,
            secret: field_type == FieldType::Password,
            required: false,
            read_only: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Form {
    pub key: String,
    pub fields: Vec<Field>,
}

impl Form {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn field(&self, key: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.key == key)
    }
}

/// The full set of forms an application declares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormSchema {
    pub forms: Vec<Form>,
}

impl FormSchema {
    pub fn new(forms: Vec<Form>) -> Self {
        Self { forms }
    }

    pub fn form(&self, key: &str) -> Option<&Form> {
        self.forms.iter().find(|form| form.key == key)
    }

    pub fn field(&self, form: &str, field: &str) -> Option<&Field> {
        self.form(form).and_then(|form| form.field(field))
    }

    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldView {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub value: Value,
    pub required: bool,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormView {
    pub key: String,
    pub fields: Vec<FieldView>,
}

impl FormView {
    pub fn field(&self, key: &str) -> Option<&FieldView> {
        self.fields.iter().find(|field| field.key == key)
    }
}

/// Renders stored settings against `schema`. Secret values never leave as plaintext.
pub fn render(schema: &FormSchema, settings: &Map<String, Value>) -> Vec<FormView> {
    schema
        .forms
        .iter()
        .map(|form| {
            let stored = settings.get(&form.key).and_then(Value::as_object);
            let fields = form
                .fields
                .iter()
                .map(|field| {
                    let value = stored.and_then(|values| values.get(&field.key));
                    FieldView {
                        key: field.key.clone(),
                        label: field.label.clone(),
                        field_type: field.field_type,
                        value: if field.secret {
                            Value::Bool(value.is_some_and(is_present))
                        } else {
                            value.cloned().unwrap_or(Value::Null)
                        },
                        required: field.required,
                        read_only: field.read_only,
                    }
                })
                .collect();
            FormView {
                key: form.key.clone(),
                fields,
            }
        })
        .collect()
}

pub(crate) fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.trim().is_empty(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn basic_schema() -> FormSchema {
        FormSchema::new(vec![
            Form::new(AUTHORIZATION_FORM)
                .with_field(Field::new(FieldType::Text, USER, "Username").required())
                .with_field(Field::new(FieldType::Password, PASSWORD, "Password").required())
                .with_field(Field::new(FieldType::Password, "api_key", "API key")),
        ])
    }

    #[test]
    fn password_fields_are_secret_by_default() {
        let field = Field::new(FieldType::Password, PASSWORD, "Password");
        assert!(field.secret);
        assert!(!Field::new(FieldType::Text, USER, "User").secret);
        assert!(Field::new(FieldType::Text, "client_id", "Client").secret().secret);
    }

    #[test]
    fn render_follows_schema_order_and_masks_secrets() {
        let settings = json!({
            AUTHORIZATION_FORM: {
                PASSWORD: "hunter2",
                USER: "alice",
            }
        });
        let settings = settings.as_object().cloned().unwrap_or_default();

        let views = render(&basic_schema(), &settings);
        assert_eq!(views.len(), 1);
        let fields = &views[0].fields;
        assert_eq!(fields[0].key, USER);
        assert_eq!(fields[0].value, json!("alice"));
        assert_eq!(fields[1].key, PASSWORD);
        assert_eq!(fields[1].value, json!(true));
        assert_eq!(fields[2].value, json!(false));

        let wire = serde_json::to_string(&views).unwrap_or_default();
        assert!(!wire.contains("hunter2"));
    }

    #[test]
    fn render_without_settings_yields_empty_fields() {
        let views = render(&basic_schema(), &Map::new());
        let form = &views[0];
        assert_eq!(form.field(USER).map(|field| &field.value), Some(&Value::Null));
        assert_eq!(form.field(PASSWORD).map(|field| &field.value), Some(&json!(false)));
    }
}
