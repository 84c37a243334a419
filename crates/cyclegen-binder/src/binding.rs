//! Binding function chains evaluated per cycle.
//!
//! A binding spec is a `;`-separated chain of calls applied left to right,
//! starting from the cycle number:
//!
//! ```text
//! Hash(); Mod(1000); Template('user-{}')
//! ```
//!
//! Numeric stages: `Identity()`, `Add(n)`, `Mul(n)`, `Div(n)`, `Mod(n)`,
//! `Hash()`, `HashRange(max)`, `HashRange(min, max)`, `FixedValue(n)`.
//! Text stages: `ToString()`, `Combinations('spec')`, `Template('..{}..')`.
//! Once a chain produces text, only `Template` may follow.

use std::fmt;

use serde_json::Value;

use crate::combiner::Combiner;
use crate::error::{BinderError, BinderResult};
use crate::hash::{hash_range, hash_u64};

/// Value produced by a binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BoundValue {
    Long(u64),
    Text(String),
}

impl BoundValue {
    /// Numeric value, if the binding produced one.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Long(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    /// JSON rendering.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Long(v) => Value::from(*v),
            Self::Text(s) => Value::String(s.clone()),
        }
    }

    /// Length of the rendered value in bytes.
    #[must_use]
    pub fn rendered_len(&self) -> usize {
        match self {
            Self::Long(v) => v.to_string().len(),
            Self::Text(s) => s.len(),
        }
    }
}

impl fmt::Display for BoundValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone)]
enum NumericStep {
    Add(u64),
    Mul(u64),
    Div(u64),
    Mod(u64),
    Hash,
    HashRange(u64, u64),
    Fixed(u64),
}

#[derive(Debug, Clone)]
enum TextStep {
    ToText,
    Combinations(Combiner<u64>),
    Template(String),
}

/// A parsed binding chain. Cheap to clone and safe to share across workers.
#[derive(Debug, Clone)]
pub struct Binding {
    spec: String,
    numeric: Vec<NumericStep>,
    text: Vec<TextStep>,
}

impl Binding {
    /// Parses a binding chain.
    pub fn parse(spec: &str) -> BinderResult<Self> {
        let calls = split_top_level(spec, ';')
            .map_err(|message| BinderError::binding(spec, message))?;
        let mut numeric = Vec::new();
        let mut text = Vec::new();

        for call in calls.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
            let (name, args) = parse_call(call).map_err(|m| BinderError::binding(spec, m))?;
            let arity = |expected: usize| -> BinderResult<()> {
                if args.len() == expected {
                    Ok(())
                } else {
                    Err(BinderError::binding(
                        spec,
                        format!("{name} takes {expected} argument(s), got {}", args.len()),
                    ))
                }
            };
            let producing_text = !text.is_empty();
            match name {
                "Identity" => arity(0)?,
                "Add" | "Mul" | "Div" | "Mod" | "FixedValue" | "Hash" | "HashRange"
                    if producing_text =>
                {
                    return Err(BinderError::binding(
                        spec,
                        format!("{name} cannot follow a text stage"),
                    ));
                }
                "Add" => {
                    arity(1)?;
                    numeric.push(NumericStep::Add(number(spec, &args[0])?));
                }
                "Mul" => {
                    arity(1)?;
                    numeric.push(NumericStep::Mul(number(spec, &args[0])?));
                }
                "Div" | "Mod" => {
                    arity(1)?;
                    let n = number(spec, &args[0])?;
                    if n == 0 {
                        return Err(BinderError::binding(spec, format!("{name}(0) is undefined")));
                    }
                    numeric.push(if name == "Div" {
                        NumericStep::Div(n)
                    } else {
                        NumericStep::Mod(n)
                    });
                }
                "FixedValue" => {
                    arity(1)?;
                    numeric.push(NumericStep::Fixed(number(spec, &args[0])?));
                }
                "Hash" => {
                    arity(0)?;
                    numeric.push(NumericStep::Hash);
                }
                "HashRange" => {
                    let (min, max) = match args.as_slice() {
                        [max] => (0, number(spec, max)?),
                        [min, max] => (number(spec, min)?, number(spec, max)?),
                        _ => {
                            return Err(BinderError::binding(
                                spec,
                                "HashRange takes (max) or (min, max)",
                            ))
                        }
                    };
                    if min > max {
                        return Err(BinderError::binding(
                            spec,
                            format!("HashRange({min}, {max}) has min above max"),
                        ));
                    }
                    numeric.push(NumericStep::HashRange(min, max));
                }
                "ToString" => {
                    arity(0)?;
                    if producing_text {
                        return Err(BinderError::binding(spec, "value is already text"));
                    }
                    text.push(TextStep::ToText);
                }
                "Combinations" => {
                    arity(1)?;
                    if producing_text {
                        return Err(BinderError::binding(
                            spec,
                            "Combinations needs a numeric input",
                        ));
                    }
                    let columns = quoted(spec, &args[0])?;
                    text.push(TextStep::Combinations(Combiner::indexed(&columns)?));
                }
                "Template" => {
                    arity(1)?;
                    let template = quoted(spec, &args[0])?;
                    if !template.contains("{}") {
                        return Err(BinderError::binding(
                            spec,
                            "Template text needs a `{}` placeholder",
                        ));
                    }
                    text.push(TextStep::Template(template));
                }
                other => {
                    return Err(BinderError::binding(
                        spec,
                        format!("unknown function `{other}`"),
                    ))
                }
            }
        }

        Ok(Self {
            spec: spec.trim().to_string(),
            numeric,
            text,
        })
    }

    /// The spec this binding was parsed from.
    #[must_use]
    pub fn spec(&self) -> &str {
        &self.spec
    }

    /// Whether the binding yields text.
    #[must_use]
    pub fn is_text(&self) -> bool {
        !self.text.is_empty()
    }

    /// Evaluates the chain for `cycle`.
    #[must_use]
    pub fn apply(&self, cycle: u64) -> BoundValue {
        let value = self.apply_numeric(cycle);
        if self.text.is_empty() {
            return BoundValue::Long(value);
        }
        let mut rendered = String::new();
        for step in &self.text {
            rendered = match step {
                TextStep::ToText => value.to_string(),
                TextStep::Combinations(combiner) => combiner.get_encoding(value),
                TextStep::Template(template) => {
                    let current = if rendered.is_empty() {
                        value.to_string()
                    } else {
                        rendered
                    };
                    template.replacen("{}", &current, 1)
                }
            };
        }
        BoundValue::Text(rendered)
    }

    /// Numeric part of the chain; text stages are ignored.
    #[must_use]
    pub fn apply_numeric(&self, cycle: u64) -> u64 {
        self.numeric.iter().fold(cycle, |value, step| match step {
            NumericStep::Add(n) => value.wrapping_add(*n),
            NumericStep::Mul(n) => value.wrapping_mul(*n),
            NumericStep::Div(n) => value / n,
            NumericStep::Mod(n) => value % n,
            NumericStep::Hash => hash_u64(value),
            NumericStep::HashRange(min, max) => hash_range(value, *min, *max),
            NumericStep::Fixed(n) => *n,
        })
    }
}

fn number(spec: &str, arg: &str) -> BinderResult<u64> {
    cyclegen_core::units::parse_count(arg).map_err(|m| BinderError::binding(spec, m))
}

fn quoted(spec: &str, arg: &str) -> BinderResult<String> {
    let arg = arg.trim();
    for quote in ['\'', '"'] {
        if let Some(inner) = arg
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return Ok(inner.to_string());
        }
    }
    Err(BinderError::binding(
        spec,
        format!("expected a quoted string, got `{arg}`"),
    ))
}

fn parse_call(call: &str) -> Result<(&str, Vec<String>), String> {
    let open = call
        .find('(')
        .ok_or_else(|| format!("`{call}` is not a function call"))?;
    let inner = call[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| format!("`{call}` is missing `)`"))?;
    let name = call[..open].trim();
    if name.is_empty() {
        return Err(format!("`{call}` has no function name"));
    }
    let args = if inner.trim().is_empty() {
        Vec::new()
    } else {
        split_top_level(inner, ',')?
            .into_iter()
            .map(|a| a.trim().to_string())
            .collect()
    };
    Ok((name, args))
}

/// Splits on `sep` outside quotes and parentheses.
fn split_top_level(text: &str, sep: char) -> Result<Vec<String>, String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;

    for c in text.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                current.push(c);
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    current.push(c);
                }
                '(' => {
                    depth += 1;
                    current.push(c);
                }
                ')' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| "unbalanced `)`".to_string())?;
                    current.push(c);
                }
                c if c == sep && depth == 0 => parts.push(std::mem::take(&mut current)),
                c => current.push(c),
            },
        }
    }
    if quote.is_some() {
        return Err("unterminated quote".to_string());
    }
    if depth != 0 {
        return Err("unbalanced `(`".to_string());
    }
    parts.push(current);
    Ok(parts)
}
