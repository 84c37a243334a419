//! Building and running one activity from command-line input.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

use cyclegen_adapters::adapter_for;
use cyclegen_core::{
    ActivityConfig, ConfigError, CoreError, CoreResult, OpTemplate, ParamMap, Workload,
};
use cyclegen_engine::{Activity, ActivityController, ActivitySummary};

/// Where an activity's settings and ops come from.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ActivityArgs {
    /// TOML workload file; without it a single default op is used
    #[arg(long)]
    pub workload: Option<PathBuf>,

    /// TOML or JSON file of activity parameters
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Activity parameters, e.g. `cycles=1M threads=8 cyclerate=1000`
    #[arg(value_name = "KEY=VALUE")]
    pub params: Vec<String>,
}

/// Validates everything and builds the activity, reporting all problems at once.
pub fn load_activity(args: &ActivityArgs) -> CoreResult<Activity> {
    let mut errors = ConfigError::default();

    let params = ParamMap::from_pairs(args.params.iter().map(String::as_str))
        .unwrap_or_else(|err| {
            errors.extend(err);
            ParamMap::new()
        });
    let config = ActivityConfig::load(args.config.as_deref(), &params)
        .map_err(|err| errors.extend(err))
        .ok();
    let workload = match &args.workload {
        Some(path) => Workload::from_file(path)
            .map_err(|err| errors.extend(err.into_config()))
            .ok(),
        None => Some(Workload::from_templates(vec![OpTemplate::new("default", 0)])),
    };

    let (Some(config), Some(workload)) = (config, workload) else {
        return Err(CoreError::Config(errors));
    };
    if !errors.is_empty() {
        return Err(errors.into());
    }

    tracing::debug!(
        driver = %config.driver,
        ops = workload.templates().len(),
        "Loaded activity definition"
    );
    let adapter = adapter_for(&config.driver)?;
    Activity::new(config, adapter, workload.templates())
}

/// Runs `activity` to a terminal state.
///
/// Ctrl-C asks the activity to stop; in-flight ops get the configured grace
/// period.
pub async fn run_activity(activity: Activity, progress: bool) -> Result<ActivitySummary> {
    let controller = Arc::new(ActivityController::new(activity)?);
    controller.start()?;

    let interrupt = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!(activity = %controller.alias(), "Interrupted, stopping activity");
                controller.request_stop("interrupted");
            }
        })
    };
    let spinner = if progress {
        Some(spawn_progress(Arc::clone(&controller))?)
    } else {
        None
    };

    let summary = controller.await_completion().await;
    interrupt.abort();
    if let Some((bar, ticker)) = spinner {
        ticker.abort();
        bar.finish_and_clear();
    }
    Ok(summary?)
}

fn spawn_progress(
    controller: Arc<ActivityController>,
) -> Result<(ProgressBar, tokio::task::JoinHandle<()>)> {
    let total = controller.config().total_cycles();
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?,
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    let ticker = {
        let bar = bar.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(250));
            loop {
                tick.tick().await;
                let counts = controller.snapshot();
                bar.set_message(format!(
                    "{}/{} cycles, {} errors, {} in flight",
                    counts.completed, total, counts.errors, counts.in_flight
                ));
            }
        })
    };
    Ok((bar, ticker))
}

/// One-line-per-field rendering of the resolved activity.
pub fn describe(activity: &Activity) -> String {
    let config = activity.config();
    let mut out = format!(
        "activity: {}\ndriver: {}\ncycles: {} ({})\nparameters:\n",
        config.alias,
        config.driver,
        config.cycles.spec(),
        config.cycles
    );
    for (key, value) in config.params().iter() {
        out.push_str(&format!("  {key}={value}\n"));
    }
    out.push_str(&format!("ops: {}\n", activity.op_names().join(", ")));
    out.push_str(&format!("plan: {}\n", activity.plan().join(" ")));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(params: &[&str]) -> ActivityArgs {
        ActivityArgs {
            params: params.iter().map(|p| p.to_string()).collect(),
            ..ActivityArgs::default()
        }
    }

    #[test]
    fn test_error_spec_survives_as_one_word() {
        let activity = load_activity(&args(&["cycles=10", "errors=diag:stop;*:warn,count"])).unwrap();
        assert_eq!(
            activity.config().params().get("errors"),
            Some("diag:stop;*:warn,count")
        );
    }

    #[test]
    fn test_bare_words_are_config_errors() {
        let err = load_activity(&args(&["cycles", "=3"])).err().unwrap();
        let CoreError::Config(config) = err else {
            panic!("expected a config error");
        };
        assert_eq!(config.violations.len(), 2, "{config}");
    }

    #[test]
    fn test_default_workload_uses_diag_noop() {
        let activity = load_activity(&args(&["cycles=5"])).unwrap();
        assert_eq!(activity.op_names(), vec!["default".to_string()]);
        assert!(describe(&activity).contains("plan: default"));
    }

    #[test]
    fn test_describe_echoes_cycles_as_written() {
        let activity = load_activity(&args(&["cycles=1K..+500"])).unwrap();
        assert!(describe(&activity).contains("cycles: 1K..+500 (1000..1500)"));
    }

    #[test]
    fn test_collects_problems_from_every_source() {
        let mut workload = tempfile::NamedTempFile::new().unwrap();
        writeln!(workload, "[[ops]]\nname = 1").unwrap();
        let err = load_activity(&ActivityArgs {
            workload: Some(workload.path().to_path_buf()),
            config: None,
            params: vec!["threads=none".to_string(), "bogus=1".to_string()],
        })
        .err()
        .unwrap();
        let CoreError::Config(config) = err else {
            panic!("expected a config error");
        };
        assert!(config.violations.len() >= 2, "{config}");
    }

    #[test]
    fn test_unknown_driver_is_a_config_error() {
        let err = load_activity(&args(&["driver=cql"])).err().unwrap();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[tokio::test]
    async fn test_runs_to_completion() {
        let activity = load_activity(&args(&["cycles=100", "threads=2", "interval=0"])).unwrap();
        let summary = run_activity(activity, false).await.unwrap();
        assert_eq!(summary.counts.completed, 100);
    }
}
