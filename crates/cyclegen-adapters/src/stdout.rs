//! Stdout adapter: writes one rendered line per cycle.
//!
//! A template's `stmt` field is rendered with `{name}` placeholders filled
//! from its named bindings. Without `stmt`, a line is generated from every
//! named binding in the selected `format`.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use cyclegen_core::{
    ConfigError, CoreResult, DriverAdapter, Op, OpDispenser, OpFailure, OpResult, OpSuccess,
    OpTemplate, WorkerContext,
};

use crate::fields::{read_flag, NamedBindings, StmtTemplate};

const FIELDS: &[&str] = &["stmt", "format", "newline"];

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Line layout generated when a template has no `stmt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// `a={a}, b={b}`
    Assignments,
    /// `{"a":"{a}","b":"{b}"}`
    Json,
    /// `{a},{b}`
    Csv,
}

impl OutputFormat {
    fn generate<'a>(self, names: impl Iterator<Item = &'a str>) -> String {
        let names: Vec<&str> = names.collect();
        match self {
            Self::Assignments => names
                .iter()
                .map(|name| format!("{name}={{{name}}}"))
                .collect::<Vec<_>>()
                .join(", "),
            Self::Json => {
                let body = names
                    .iter()
                    .map(|name| format!("\"{name}\":\"{{{name}}}\""))
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{{{{{body}}}}}")
            }
            Self::Csv => names
                .iter()
                .map(|name| format!("{{{name}}}"))
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "assignments" => Ok(Self::Assignments),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!(
                "unknown format `{other}` (expected assignments, json or csv)"
            )),
        }
    }
}

/// Adapter for the `stdout` driver.
pub struct StdoutAdapter {
    target: String,
    writer: SharedWriter,
}

impl fmt::Debug for StdoutAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdoutAdapter")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl StdoutAdapter {
    /// Writes to the process standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::with_writer("stdout", io::stdout())
    }

    /// Writes to `path`, truncating it.
    pub fn to_file(path: &Path) -> CoreResult<Self> {
        let file = File::create(path)?;
        Ok(Self::with_writer(
            path.display().to_string(),
            BufWriter::new(file),
        ))
    }

    /// Writes to any writer; `target` names it in logs.
    pub fn with_writer(target: impl Into<String>, writer: impl Write + Send + 'static) -> Self {
        Self {
            target: target.into(),
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }
}

impl DriverAdapter for StdoutAdapter {
    fn name(&self) -> &str {
        "stdout"
    }

    fn dispenser(&self, template: &OpTemplate) -> CoreResult<Arc<dyn OpDispenser>> {
        let name = template.name();
        let mut errors = ConfigError::default();
        if let Err(violations) = template.check_fields(FIELDS, &[]) {
            errors.extend(violations);
        }

        let bindings = NamedBindings::compile(template, &mut errors);
        let format = match template.static_str("format").map(str::parse::<OutputFormat>) {
            None => OutputFormat::Assignments,
            Some(Ok(format)) => format,
            Some(Err(message)) => {
                errors.push(format!("op `{name}`: {message}"));
                OutputFormat::Assignments
            }
        };
        let text = match template.static_str("stmt") {
            Some(stmt) => stmt.to_string(),
            None if template.is_defined("stmt") => {
                errors.push(format!("op `{name}`: `stmt` must be a fixed string"));
                String::new()
            }
            None if bindings.is_empty() => {
                errors.push(format!("op `{name}`: needs a `stmt` or at least one binding"));
                String::new()
            }
            None => format.generate(bindings.names()),
        };
        let stmt = StmtTemplate::parse(name, &text, &bindings, &mut errors);
        let newline = read_flag(template, "newline", &mut errors).unwrap_or(true) && !text.ends_with('\n');

        if !errors.is_empty() {
            return Err(errors.into());
        }
        tracing::debug!(op = %name, output = %self.target, stmt = %text, "Stdout op ready");
        Ok(Arc::new(StdoutDispenser {
            name: name.to_string(),
            bindings,
            stmt,
            newline,
            writer: Arc::clone(&self.writer),
        }))
    }

    fn shutdown(&self) {
        if let Err(err) = self.writer.lock().flush() {
            tracing::warn!(output = %self.target, error = %err, "Failed to flush output");
        }
    }
}

struct StdoutDispenser {
    name: String,
    bindings: NamedBindings,
    stmt: StmtTemplate,
    newline: bool,
    writer: SharedWriter,
}

impl OpDispenser for StdoutDispenser {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, cycle: u64, _ctx: &mut WorkerContext) -> CoreResult<Box<dyn Op>> {
        let mut line = self.stmt.render(&self.bindings.apply(cycle));
        if self.newline {
            line.push('\n');
        }
        Ok(Box::new(WriteLine {
            line,
            writer: Arc::clone(&self.writer),
        }))
    }
}

struct WriteLine {
    line: String,
    writer: SharedWriter,
}

#[async_trait]
impl Op for WriteLine {
    async fn execute(&mut self) -> OpResult {
        self.writer
            .lock()
            .write_all(self.line.as_bytes())
            .map_err(|err| OpFailure::retryable("io", err.to_string()))?;
        Ok(OpSuccess::with_payload(self.line.len() as u64))
    }

    fn describe(&self) -> String {
        self.line.trim_end().to_string()
    }
}
