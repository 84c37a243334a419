use cyclegen_adapters::adapter_for;
use cyclegen_core::{ActivityConfig, CoreResult, OpTemplate, ParamMap};
use cyclegen_engine::{Activity, ActivityController};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Combiner specs from narrow to wide label spaces.
pub const COMBINER_SPECS: [(&str, &str); 3] = [
    ("digits", "0-9*4"),
    ("alnum", "A-Z;a-z;0-9*4"),
    ("wide", "A-Z*6;0-9*6"),
];

/// Reproducible random cycle numbers.
pub fn random_cycles(count: usize, seed: u64) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count).map(|_| rng.gen()).collect()
}

/// A read-heavy diag workload with bound fields.
pub fn diag_templates() -> Vec<OpTemplate> {
    vec![
        OpTemplate::new("read", 0)
            .with_ratio(3)
            .with_static("op", "noop")
            .with_binding("result", "Mod(3)"),
        OpTemplate::new("write", 1)
            .with_static("op", "bind")
            .with_named_binding("id", "Hash(); Mod(1000000)")
            .with_named_binding("name", "Combinations('A-Z;a-z*7')"),
    ]
}

/// Controller for a diag activity over `cycles` with `threads` workers.
///
/// Extra `params` are `k=v;k=v` pairs appended to the defaults.
pub fn diag_controller(cycles: u64, threads: usize, params: &str) -> CoreResult<ActivityController> {
    let mut merged = ParamMap::parse(params)?;
    merged.set("alias", "bench");
    merged.set("driver", "diag");
    merged.set("cycles", cycles.to_string());
    merged.set("threads", threads.to_string());
    merged.set("interval", "0");
    let config = ActivityConfig::from_params(&merged)?;
    let activity = Activity::new(config, adapter_for("diag")?, &diag_templates())?;
    ActivityController::new(activity)
}
