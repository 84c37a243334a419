//! Workloads loaded from TOML and run end to end through the engine.

use std::io::Write;
use std::sync::Arc;

use cyclegen_adapters::{adapter_for, DiagAdapter, StdoutAdapter};
use cyclegen_core::{ActivityConfig, ParamMap, Workload};
use cyclegen_engine::{Activity, ActivityController, ActivityState};

const MIXED: &str = r#"
[bindings]
id = "Mod(1000)"

[[ops]]
name = "read"
ratio = 3
op = "noop"
result = "{{Mod(3)}}"

[[ops]]
name = "slow"
op = "delay"
delay = "{{HashRange(1000, 50000)}}"

[[ops]]
name = "flaky"
op = "fail"
error = "timeout"
succeed_after = 1
"#;

fn config(params: &str) -> ActivityConfig {
    ActivityConfig::from_params(&ParamMap::parse(params).unwrap()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mixed_diag_workload_completes() {
    let workload = Workload::from_toml_str(MIXED).unwrap();
    let activity = Activity::new(
        config("alias=mixed;driver=diag;cycles=1000;threads=4;interval=0"),
        adapter_for("diag").unwrap(),
        workload.templates(),
    )
    .unwrap();
    assert_eq!(activity.plan().len(), 5);

    let controller = ActivityController::new(activity).unwrap();
    let summary = controller.run().await.unwrap();
    assert_eq!(summary.state, ActivityState::Finished);
    assert_eq!(summary.counts.completed, 1000);
    assert_eq!(summary.counts.success, 1000);
    assert_eq!(summary.counts.errors, 0);
}

#[tokio::test]
async fn test_workload_file_with_dispense_failures() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[[ops]]\nname = \"picky\"\nprepare = true\ndispense_fail_modulo = 4"
    )
    .unwrap();
    let workload = Workload::from_file(file.path()).unwrap();

    let adapter = Arc::new(DiagAdapter::new());
    let activity = Activity::new(
        config("alias=picky;cycles=100;interval=0"),
        adapter.clone(),
        workload.templates(),
    )
    .unwrap();
    assert_eq!(adapter.prepared(), 0);

    let summary = ActivityController::new(activity).unwrap().run().await.unwrap();
    assert_eq!(summary.counts.completed, 100);
    assert_eq!(summary.counts.errors, 25);
    assert_eq!(adapter.prepared(), 1);
}

#[tokio::test]
async fn test_stdout_workload_writes_every_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lines.txt");
    let workload = Workload::from_toml_str(
        r#"
[bindings]
user = "Template('user-{}')"

[[ops]]
name = "greet"
stmt = "hello {user}"
"#,
    )
    .unwrap();

    let activity = Activity::new(
        config("alias=lines;driver=stdout;cycles=10;threads=2;interval=0"),
        Arc::new(StdoutAdapter::to_file(&path).unwrap()),
        workload.templates(),
    )
    .unwrap();
    let summary = ActivityController::new(activity).unwrap().run().await.unwrap();
    assert_eq!(summary.counts.success, 10);

    let text = std::fs::read_to_string(&path).unwrap();
    let mut lines: Vec<&str> = text.lines().collect();
    lines.sort_unstable();
    let mut expected: Vec<String> = (0..10).map(|i| format!("hello user-{i}")).collect();
    expected.sort_unstable();
    assert_eq!(lines, expected);
}

#[test]
fn test_bad_workload_reports_all_templates() {
    let workload = Workload::from_toml_str(
        r#"
[[ops]]
name = "a"
op = "warp"

[[ops]]
name = "b"
op = "delay"
"#,
    )
    .unwrap();
    let err = Activity::new(config("driver=diag"), adapter_for("diag").unwrap(), workload.templates())
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("warp"));
    assert!(message.contains("`delay` op needs a `delay` field"));
}
