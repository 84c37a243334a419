//! TOML workload loader.
//!
//! ```toml
//! [bindings]
//! id = "Hash(); Mod(1000000)"
//!
//! [[ops]]
//! name = "insert"
//! ratio = 3
//! stmt = "insert into t values ({id})"
//!
//! [[ops]]
//! name = "slow"
//! op = "delay"
//! delay = "{{HashRange(1000, 50000)}}"
//! ```
//!
//! Keys other than `name`, `ratio` and `bindings` become template fields.
//! A string field written `{{spec}}` is an inline binding; a string field
//! written `{name}` that names a known binding refers to that binding.
//! Everything else is static.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, CoreResult};
use crate::template::OpTemplate;

#[derive(Debug, Deserialize)]
struct WorkloadFile {
    #[serde(default)]
    bindings: BTreeMap<String, String>,
    #[serde(default)]
    ops: Vec<BTreeMap<String, toml::Value>>,
}

/// Op templates loaded from a workload file.
#[derive(Debug, Clone, Default)]
pub struct Workload {
    templates: Vec<OpTemplate>,
}

impl Workload {
    /// Wraps already-built templates.
    #[must_use]
    pub fn from_templates(templates: Vec<OpTemplate>) -> Self {
        Self { templates }
    }

    /// Reads and parses a TOML workload file.
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parses a TOML workload, reporting every malformed op.
    pub fn from_toml_str(text: &str) -> CoreResult<Self> {
        let file: WorkloadFile = toml::from_str(text)?;
        let mut errors = ConfigError::default();
        let mut names = HashSet::new();
        let mut templates = Vec::with_capacity(file.ops.len());

        if file.ops.is_empty() {
            errors.push("workload defines no ops");
        }

        for (index, mut table) in file.ops.into_iter().enumerate() {
            let name = match table.remove("name") {
                Some(toml::Value::String(name)) if !name.is_empty() => name,
                Some(_) => {
                    errors.push(format!("op #{index}: `name` must be a non-empty string"));
                    continue;
                }
                None => format!("op{index}"),
            };
            if !names.insert(name.clone()) {
                errors.push(format!("op `{name}` is defined more than once"));
            }

            let Ok(ref_key) = u32::try_from(index) else {
                errors.push("workload has too many ops");
                break;
            };
            let mut template = OpTemplate::new(name.clone(), ref_key);

            match table.remove("ratio") {
                None => {}
                Some(toml::Value::Integer(ratio)) if ratio >= 0 => {
                    template = template.with_ratio(ratio as u64);
                }
                Some(other) => errors.push(format!(
                    "op `{name}`: `ratio` must be a non-negative integer, got {other}"
                )),
            }

            let mut bindings = file.bindings.clone();
            match table.remove("bindings") {
                None => {}
                Some(toml::Value::Table(local)) => {
                    for (key, value) in local {
                        match value {
                            toml::Value::String(spec) => {
                                bindings.insert(key, spec);
                            }
                            _ => errors.push(format!(
                                "op `{name}`: binding `{key}` must be a string"
                            )),
                        }
                    }
                }
                Some(_) => errors.push(format!("op `{name}`: `bindings` must be a table")),
            }

            for (field, value) in table {
                template = match value {
                    toml::Value::String(text) => match binding_reference(&text, &bindings) {
                        Some(spec) => template.with_binding(field, spec),
                        None => template.with_static(field, Value::String(text)),
                    },
                    other => match serde_json::to_value(&other) {
                        Ok(json) => template.with_static(field, json),
                        Err(err) => {
                            errors.push(format!("op `{name}`: field `{field}`: {err}"));
                            template
                        }
                    },
                };
            }
            for (binding, spec) in bindings {
                template = template.with_named_binding(binding, spec);
            }
            templates.push(template);
        }

        Ok(errors.into_result(Self { templates })?)
    }

    /// Loaded templates in file order.
    #[must_use]
    pub fn templates(&self) -> &[OpTemplate] {
        &self.templates
    }

    /// Consumes the workload.
    #[must_use]
    pub fn into_templates(self) -> Vec<OpTemplate> {
        self.templates
    }
}

fn binding_reference(text: &str, bindings: &BTreeMap<String, String>) -> Option<String> {
    let trimmed = text.trim();
    if let Some(inline) = trimmed
        .strip_prefix("{{")
        .and_then(|rest| rest.strip_suffix("}}"))
    {
        return Some(inline.trim().to_string());
    }
    let name = trimmed.strip_prefix('{')?.strip_suffix('}')?;
    bindings.get(name).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::FieldValue;

    const WORKLOAD: &str = r#"
        [bindings]
        id = "Hash(); Mod(100)"

        [[ops]]
        name = "insert"
        ratio = 3
        stmt = "insert {id}"
        key = "{id}"

        [[ops]]
        name = "slow"
        op = "delay"
        delay = "{{HashRange(10, 20)}}"
        retryable = true

        [ops.bindings]
        local = "Identity()"
    "#;

    #[test]
    fn test_load_templates() {
        let workload = Workload::from_toml_str(WORKLOAD).unwrap();
        let templates = workload.templates();
        assert_eq!(templates.len(), 2);

        let insert = &templates[0];
        assert_eq!(insert.name(), "insert");
        assert_eq!(insert.ref_key(), 0);
        assert_eq!(insert.ratio(), 3);
        assert_eq!(insert.static_str("stmt"), Some("insert {id}"));
        assert_eq!(insert.binding_spec("key"), Some("Hash(); Mod(100)"));
        assert_eq!(insert.bindings().len(), 1);

        let slow = &templates[1];
        assert_eq!(slow.ref_key(), 1);
        assert_eq!(slow.ratio(), 1);
        assert_eq!(slow.binding_spec("delay"), Some("HashRange(10, 20)"));
        assert_eq!(
            slow.field("retryable"),
            Some(&FieldValue::Static(Value::Bool(true)))
        );
        assert!(slow.bindings().contains_key("local"));
        assert!(slow.bindings().contains_key("id"));
    }

    #[test]
    fn test_unknown_placeholder_stays_static() {
        let workload = Workload::from_toml_str(
            r#"
            [[ops]]
            name = "a"
            value = "{nope}"
            "#,
        )
        .unwrap();
        assert!(workload.templates()[0].is_static("value"));
    }

    #[test]
    fn test_reports_every_problem() {
        let err = Workload::from_toml_str(
            r#"
            [[ops]]
            name = "a"
            ratio = -1

            [[ops]]
            name = "a"
            bindings = 5
            "#,
        )
        .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("ratio"), "{text}");
        assert!(text.contains("more than once"), "{text}");
        assert!(text.contains("bindings"), "{text}");
    }

    #[test]
    fn test_empty_workload_rejected() {
        assert!(Workload::from_toml_str("").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workload.toml");
        std::fs::write(&path, WORKLOAD).unwrap();
        assert_eq!(Workload::from_file(&path).unwrap().templates().len(), 2);
    }
}
