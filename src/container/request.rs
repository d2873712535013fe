//! Flat key -> value requests from the presentation layer.
//!
//! Every field the core reads lives under the `template.` prefix: the operation,
//! the template and instance names, one target name per template job and one
//! value per template parameter.

use crate::error::{WorkflowError, WorkflowResult};
use crate::types::Operation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const FIELD_PREFIX: &str = "template.";
pub const OPERATION_KEY: &str = "template.operation";
pub const TEMPLATE_NAME_KEY: &str = "template.templateName";
pub const INSTANCE_NAME_KEY: &str = "template.templateInstanceName";
/// Checkbox allowing create to reuse existing plain jobs.
pub const ALLOW_EXISTING_KEY: &str = "allow_exist_name";

/// Key of the request field carrying a job target or a parameter value.
pub fn field_key(name: &str) -> String {
    format!("{}{}", FIELD_PREFIX, name)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormRequest {
    fields: HashMap<String, String>,
}

impl FormRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a create request.
    pub fn create(template_name: &str, instance_name: &str) -> Self {
        Self::new()
            .with(OPERATION_KEY, Operation::Create.as_str())
            .with(TEMPLATE_NAME_KEY, template_name)
            .with(INSTANCE_NAME_KEY, instance_name)
    }

    /// Start an update request; the template comes from the instance.
    pub fn update(instance_name: &str) -> Self {
        Self::new()
            .with(OPERATION_KEY, Operation::Update.as_str())
            .with(INSTANCE_NAME_KEY, instance_name)
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.insert(key, value);
        self
    }

    /// Bind a template job to its target job name.
    pub fn job(self, template_job: &str, target: &str) -> Self {
        self.with(&field_key(template_job), target)
    }

    /// Bind a template parameter.
    pub fn param(self, name: &str, value: &str) -> Self {
        self.with(&field_key(name), value)
    }

    pub fn allow_existing(self, allow: bool) -> Self {
        self.with(ALLOW_EXISTING_KEY, if allow { "on" } else { "off" })
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.fields.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Non-blank value, or `None`.
    pub fn optional(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }

    /// Non-blank value, or a validation error naming the key.
    pub fn require(&self, key: &str) -> WorkflowResult<&str> {
        self.optional(key).ok_or_else(|| WorkflowError::blank(key))
    }

    /// Required `template.<name>` field.
    pub fn require_field(&self, name: &str) -> WorkflowResult<&str> {
        self.require(&field_key(name))
    }

    /// Checkbox-style boolean: `on`/`true`/`yes`/`1` or `off`/`false`/`no`/`0`.
    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.optional(key)?.trim().to_lowercase().as_str() {
            "on" | "true" | "yes" | "1" => Some(true),
            "off" | "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<HashMap<String, String>> for FormRequest {
    fn from(fields: HashMap<String, String>) -> Self {
        Self { fields }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormRequest {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
