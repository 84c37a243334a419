//! Op templates: the adapter-agnostic description of one kind of op.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// A template field is either fixed or computed per cycle from a binding spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldValue {
    /// Same value for every cycle.
    Static(Value),
    /// Binding function spec evaluated per cycle.
    Binding(String),
}

/// One op template as loaded from a workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpTemplate {
    name: String,
    ref_key: u32,
    ratio: u64,
    fields: BTreeMap<String, FieldValue>,
    bindings: BTreeMap<String, String>,
}

impl OpTemplate {
    /// Creates a template with ratio 1 and no fields.
    #[must_use]
    pub fn new(name: impl Into<String>, ref_key: u32) -> Self {
        Self {
            name: name.into(),
            ref_key,
            ratio: 1,
            fields: BTreeMap::new(),
            bindings: BTreeMap::new(),
        }
    }

    /// Sets the relative frequency of this template; 0 excludes it.
    #[must_use]
    pub fn with_ratio(mut self, ratio: u64) -> Self {
        self.ratio = ratio;
        self
    }

    /// Adds a fixed field.
    #[must_use]
    pub fn with_static(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), FieldValue::Static(value.into()));
        self
    }

    /// Adds a per-cycle field computed by `spec`.
    #[must_use]
    pub fn with_binding(mut self, field: impl Into<String>, spec: impl Into<String>) -> Self {
        self.fields.insert(field.into(), FieldValue::Binding(spec.into()));
        self
    }

    /// Adds a named binding available for placeholder rendering.
    #[must_use]
    pub fn with_named_binding(mut self, name: impl Into<String>, spec: impl Into<String>) -> Self {
        self.bindings.insert(name.into(), spec.into());
        self
    }

    /// Stable template name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable key for caching per-template resources.
    #[must_use]
    pub fn ref_key(&self) -> u32 {
        self.ref_key
    }

    /// Relative frequency in the op sequence.
    #[must_use]
    pub fn ratio(&self) -> u64 {
        self.ratio
    }

    /// Whether `field` is defined at all.
    #[must_use]
    pub fn is_defined(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Whether `field` is defined and fixed.
    #[must_use]
    pub fn is_static(&self, field: &str) -> bool {
        matches!(self.fields.get(field), Some(FieldValue::Static(_)))
    }

    /// Raw field definition.
    #[must_use]
    pub fn field(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Fixed value of `field`, if it is static.
    #[must_use]
    pub fn static_value(&self, field: &str) -> Option<&Value> {
        match self.fields.get(field) {
            Some(FieldValue::Static(value)) => Some(value),
            _ => None,
        }
    }

    /// Fixed string value of `field`.
    #[must_use]
    pub fn static_str(&self, field: &str) -> Option<&str> {
        self.static_value(field).and_then(Value::as_str)
    }

    /// Binding spec of `field`, if it is per-cycle.
    #[must_use]
    pub fn binding_spec(&self, field: &str) -> Option<&str> {
        match self.fields.get(field) {
            Some(FieldValue::Binding(spec)) => Some(spec),
            _ => None,
        }
    }

    /// Field names in sorted order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Named bindings for placeholder rendering.
    #[must_use]
    pub fn bindings(&self) -> &BTreeMap<String, String> {
        &self.bindings
    }

    /// Rejects fields outside `allowed` and fields given under two synonyms.
    ///
    /// `synonyms` pairs an alternative name with its canonical name; both
    /// must also appear in `allowed`.
    pub fn check_fields(
        &self,
        allowed: &[&str],
        synonyms: &[(&str, &str)],
    ) -> Result<(), ConfigError> {
        let mut errors = ConfigError::default();
        for field in self.fields.keys() {
            if !allowed.contains(&field.as_str()) {
                errors.push(format!(
                    "op `{}`: unknown field `{field}` (allowed: {})",
                    self.name,
                    allowed.join(", ")
                ));
            }
        }
        for (alternative, canonical) in synonyms {
            if self.is_defined(alternative) && self.is_defined(canonical) {
                errors.push(format!(
                    "op `{}`: `{alternative}` and `{canonical}` mean the same thing; give only one",
                    self.name
                ));
            }
        }
        errors.into_result(())
    }
}
