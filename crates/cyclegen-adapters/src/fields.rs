//! Template field helpers shared by the adapters.
//!
//! Every helper records problems in a `ConfigError` instead of returning at
//! the first one, so a template with several bad fields reports them all.

use cyclegen_binder::{Binding, BoundValue};
use cyclegen_core::units::parse_count;
use cyclegen_core::{ConfigError, OpTemplate};
use serde_json::Value;

/// A numeric field, fixed or computed per cycle.
#[derive(Debug, Clone)]
pub(crate) enum NumberField {
    Fixed(u64),
    Bound(Binding),
}

impl NumberField {
    /// Reads `field` from `template`; `None` when absent or invalid.
    pub(crate) fn read(template: &OpTemplate, field: &str, errors: &mut ConfigError) -> Option<Self> {
        if let Some(spec) = template.binding_spec(field) {
            return match Binding::parse(spec) {
                Ok(binding) if binding.is_text() => {
                    errors.push(format!(
                        "op `{}`: `{field}` must be numeric but `{spec}` yields text",
                        template.name()
                    ));
                    None
                }
                Ok(binding) => Some(Self::Bound(binding)),
                Err(err) => {
                    errors.push(format!("op `{}`: {err}", template.name()));
                    None
                }
            };
        }
        let value = template.static_value(field)?;
        let parsed = match value {
            Value::Number(n) => n.as_u64().ok_or_else(|| format!("{n} is not a non-negative integer")),
            Value::String(text) => parse_count(text),
            other => Err(format!("{other} is not a number")),
        };
        match parsed {
            Ok(n) => Some(Self::Fixed(n)),
            Err(message) => {
                errors.push(format!("op `{}`: `{field}`: {message}", template.name()));
                None
            }
        }
    }

    pub(crate) fn value(&self, cycle: u64) -> u64 {
        match self {
            Self::Fixed(n) => *n,
            Self::Bound(binding) => binding.apply_numeric(cycle),
        }
    }
}

/// Static boolean field; accepts `true`/`false` as booleans or strings.
pub(crate) fn read_flag(template: &OpTemplate, field: &str, errors: &mut ConfigError) -> Option<bool> {
    let value = template.static_value(field)?;
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) if text.eq_ignore_ascii_case("true") => Some(true),
        Value::String(text) if text.eq_ignore_ascii_case("false") => Some(false),
        other => {
            errors.push(format!(
                "op `{}`: `{field}` must be true or false, got {other}",
                template.name()
            ));
            None
        }
    }
}

/// Named bindings of a template, compiled once.
#[derive(Debug, Clone, Default)]
pub(crate) struct NamedBindings {
    entries: Vec<(String, Binding)>,
}

impl NamedBindings {
    pub(crate) fn compile(template: &OpTemplate, errors: &mut ConfigError) -> Self {
        let mut entries = Vec::with_capacity(template.bindings().len());
        for (name, spec) in template.bindings() {
            match Binding::parse(spec) {
                Ok(binding) => entries.push((name.clone(), binding)),
                Err(err) => errors.push(format!("op `{}`: binding `{name}`: {err}", template.name())),
            }
        }
        Self { entries }
    }

    pub(crate) fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub(crate) fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Values of every binding for `cycle`, in name order.
    pub(crate) fn apply(&self, cycle: u64) -> Vec<BoundValue> {
        self.entries.iter().map(|(_, binding)| binding.apply(cycle)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Text(String),
    Slot(usize),
}

/// Text with `{name}` placeholders resolved to binding positions.
#[derive(Debug, Clone)]
pub(crate) struct StmtTemplate {
    parts: Vec<Part>,
}

impl StmtTemplate {
    /// Parses `text`; every placeholder must name one of `bindings`.
    ///
    /// `{{` and `}}` stand for literal braces.
    pub(crate) fn parse(
        op: &str,
        text: &str,
        bindings: &NamedBindings,
        errors: &mut ConfigError,
    ) -> Self {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let name: String = chars.by_ref().take_while(|c| *c != '}').collect();
                    match bindings.position(name.trim()) {
                        Some(index) => {
                            if !literal.is_empty() {
                                parts.push(Part::Text(std::mem::take(&mut literal)));
                            }
                            parts.push(Part::Slot(index));
                        }
                        None => errors.push(format!("op `{op}`: no binding named `{}`", name.trim())),
                    }
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            parts.push(Part::Text(literal));
        }
        Self { parts }
    }

    pub(crate) fn render(&self, values: &[BoundValue]) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Slot(index) => {
                    if let Some(value) = values.get(*index) {
                        out.push_str(&value.to_string());
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> OpTemplate {
        OpTemplate::new("t", 0)
            .with_named_binding("id", "Mod(100)")
            .with_named_binding("name", "Template('user-{}')")
    }

    #[test]
    fn test_number_field_forms() {
        let mut errors = ConfigError::default();
        let t = OpTemplate::new("t", 0)
            .with_static("a", 42u64)
            .with_static("b", "2k")
            .with_binding("c", "Add(1)")
            .with_static("d", true)
            .with_binding("e", "ToString()");

        assert_eq!(NumberField::read(&t, "a", &mut errors).unwrap().value(9), 42);
        assert_eq!(NumberField::read(&t, "b", &mut errors).unwrap().value(9), 2000);
        assert_eq!(NumberField::read(&t, "c", &mut errors).unwrap().value(9), 10);
        assert!(NumberField::read(&t, "missing", &mut errors).is_none());
        assert!(errors.is_empty());

        assert!(NumberField::read(&t, "d", &mut errors).is_none());
        assert!(NumberField::read(&t, "e", &mut errors).is_none());
        assert_eq!(errors.violations.len(), 2);
    }

    #[test]
    fn test_flag_field() {
        let mut errors = ConfigError::default();
        let t = OpTemplate::new("t", 0)
            .with_static("yes", true)
            .with_static("no", "False")
            .with_static("bad", 3u64);
        assert_eq!(read_flag(&t, "yes", &mut errors), Some(true));
        assert_eq!(read_flag(&t, "no", &mut errors), Some(false));
        assert_eq!(read_flag(&t, "bad", &mut errors), None);
        assert_eq!(errors.violations.len(), 1);
    }

    #[test]
    fn test_stmt_renders_placeholders() {
        let mut errors = ConfigError::default();
        let bindings = NamedBindings::compile(&template(), &mut errors);
        let stmt = StmtTemplate::parse("t", "insert {{ {id}, '{name}' }}", &bindings, &mut errors);
        assert!(errors.is_empty());
        assert_eq!(stmt.render(&bindings.apply(142)), "insert { 42, 'user-142' }");
    }

    #[test]
    fn test_stmt_reports_unknown_placeholders() {
        let mut errors = ConfigError::default();
        let bindings = NamedBindings::compile(&template(), &mut errors);
        StmtTemplate::parse("t", "{id} {nope} {also_nope}", &bindings, &mut errors);
        assert_eq!(errors.violations.len(), 2);
    }
}
