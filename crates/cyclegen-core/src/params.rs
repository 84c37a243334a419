//! Raw activity parameters and the model that validates their names.
//!
//! A [`ParamMap`] is an ordered bag of `key=value` strings. A [`ParamModel`]
//! knows which keys are legal, which names are synonyms of each other and
//! what the defaults are. Resolving a map against a model reports every
//! unknown key and synonym conflict at once.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Ordered `key=value` parameters as given by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamMap {
    entries: BTreeMap<String, String>,
}

impl ParamMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `k=v;k=v` (also accepting newlines as separators).
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Self::from_pairs(
            text.split(|c| c == ';' || c == '\n')
                .map(str::trim)
                .filter(|s| !s.is_empty()),
        )
    }

    /// Builds a map from `k=v` words, e.g. command line arguments.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut map = Self::new();
        let mut errors = ConfigError::default();
        for pair in pairs {
            match pair.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    let key = key.trim().to_string();
                    if map.entries.contains_key(&key) {
                        errors.push(format!("parameter `{key}` given more than once"));
                    }
                    map.entries.insert(key, value.trim().to_string());
                }
                _ => errors.push(format!("`{pair}` is not a key=value pair")),
            }
        }
        errors.into_result(map)
    }

    /// Sets a value, replacing any previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Builder-style [`ParamMap::set`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Value for `key`, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Removes and returns the value for `key`.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Copies every entry of `other` over `self`.
    pub fn merge(&mut self, other: &ParamMap) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    /// Iterates over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no parameter is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for ParamMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.entries {
            if !first {
                f.write_str(";")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for ParamMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// One declared parameter: a canonical name, its synonyms and an optional default.
#[derive(Debug, Clone)]
pub struct Param {
    names: Vec<&'static str>,
    default: Option<&'static str>,
    description: &'static str,
}

impl Param {
    /// Optional parameter without a default.
    #[must_use]
    pub fn optional(name: &'static str, description: &'static str) -> Self {
        Self {
            names: vec![name],
            default: None,
            description,
        }
    }

    /// Parameter that falls back to `default` when absent.
    #[must_use]
    pub fn defaulted(name: &'static str, default: &'static str, description: &'static str) -> Self {
        Self {
            names: vec![name],
            default: Some(default),
            description,
        }
    }

    /// Adds alternative spellings; the first name stays canonical.
    #[must_use]
    pub fn synonyms(mut self, synonyms: &[&'static str]) -> Self {
        self.names.extend_from_slice(synonyms);
        self
    }

    /// Canonical name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.names[0]
    }

    /// All accepted names, canonical first.
    #[must_use]
    pub fn names(&self) -> &[&'static str] {
        &self.names
    }

    /// Default value, if any.
    #[must_use]
    pub fn default_value(&self) -> Option<&'static str> {
        self.default
    }

    /// One-line description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        self.description
    }
}

/// Set of legal parameters for an activity or adapter.
#[derive(Debug, Clone, Default)]
pub struct ParamModel {
    params: Vec<Param>,
}

impl ParamModel {
    /// Empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter.
    #[must_use]
    pub fn add(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Declared parameters in declaration order.
    #[must_use]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    fn lookup(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.names.contains(&name))
    }

    /// Maps every key to its canonical name and fills in defaults.
    ///
    /// Reports unknown keys and keys given under more than one synonym.
    pub fn resolve(&self, input: &ParamMap) -> Result<ParamMap, ConfigError> {
        self.resolve_inner(input, true)
    }

    /// Like [`ParamModel::resolve`] but without defaults, for partial updates.
    pub fn resolve_partial(&self, input: &ParamMap) -> Result<ParamMap, ConfigError> {
        self.resolve_inner(input, false)
    }

    fn resolve_inner(&self, input: &ParamMap, with_defaults: bool) -> Result<ParamMap, ConfigError> {
        let mut errors = ConfigError::default();
        let mut resolved = ParamMap::new();
        let mut seen_as: BTreeMap<&'static str, &str> = BTreeMap::new();

        for (key, value) in input.iter() {
            let Some(param) = self.lookup(key) else {
                errors.push(format!("unknown parameter `{key}`"));
                continue;
            };
            if let Some(previous) = seen_as.insert(param.name(), key) {
                errors.push(format!(
                    "`{previous}` and `{key}` are synonyms for `{}`; give only one",
                    param.name()
                ));
                continue;
            }
            resolved.set(param.name(), value);
        }

        if with_defaults {
            for param in &self.params {
                if let Some(default) = param.default {
                    if !resolved.contains(param.name()) {
                        resolved.set(param.name(), default);
                    }
                }
            }
        }

        errors.into_result(resolved)
    }
}
