use postpulse_core::Database;
use serde_json::Value;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

const SMALL_SEED_CONFIG: &str = r#"
[seed]
authors = 12
items = 120
events = 4000
rng_seed = 7

[cache]
persist = true
"#;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
    xdg_runtime: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");
        let xdg_runtime = base.join("xdg-runtime");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(xdg_config.join("postpulse")).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");
        fs::create_dir_all(&xdg_runtime).expect("failed to create XDG_RUNTIME_DIR");

        fs::write(xdg_config.join("postpulse/config.toml"), SMALL_SEED_CONFIG)
            .expect("failed to write config");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
            xdg_runtime,
        }
    }

    fn db_path(&self) -> PathBuf {
        self.xdg_data.join("postpulse/data.db")
    }
}

fn run_bin(env: &CliTestEnv, bin_name: &str, args: &[&str]) -> Output {
    let bin_path = match bin_name {
        "postpulse" => PathBuf::from(assert_cmd::cargo::cargo_bin!("postpulse")),
        "postpulse-refresh" => PathBuf::from(assert_cmd::cargo::cargo_bin!("postpulse-refresh")),
        "postpulse-seed" => PathBuf::from(assert_cmd::cargo::cargo_bin!("postpulse-seed")),
        _ => panic!("unsupported binary in test harness: {bin_name}"),
    };

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env("XDG_RUNTIME_DIR", &env.xdg_runtime)
        .output()
        .unwrap_or_else(|e| panic!("failed to execute {bin_name}: {e}"))
}

fn assert_success(bin_name: &str, args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "{bin_name} {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn query_json(env: &CliTestEnv, args: &[&str]) -> Value {
    let mut full = vec!["--format", "json"];
    full.extend_from_slice(args);
    let output = run_bin(env, "postpulse", &full);
    assert_success("postpulse", &full, &output);
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "postpulse {} did not print JSON: {e}\n{}",
            full.join(" "),
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

fn seed_and_refresh(env: &CliTestEnv) {
    let output = run_bin(env, "postpulse-seed", &[]);
    assert_success("postpulse-seed", &[], &output);

    let output = run_bin(env, "postpulse-refresh", &[]);
    assert_success("postpulse-refresh", &[], &output);
}

#[test]
fn seed_and_refresh_populate_db() {
    let env = CliTestEnv::new();

    let output = run_bin(&env, "postpulse-seed", &[]);
    assert_success("postpulse-seed", &[], &output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Seed complete:"), "got:\n{stdout}");

    let output = run_bin(&env, "postpulse-refresh", &[]);
    assert_success("postpulse-refresh", &[], &output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Refresh complete:"), "got:\n{stdout}");
    assert!(stdout.contains("Generation:     1"), "got:\n{stdout}");

    let db = Database::open(&env.db_path()).expect("failed to open db");
    db.migrate().expect("failed to migrate db");
    let counts = db.table_counts().expect("failed to count rows");
    assert_eq!(counts.authors, 12);
    assert_eq!(counts.items, 120);
    assert!(counts.events > 0 && counts.events <= 4000);
}

#[test]
fn query_restores_persisted_generation() {
    let env = CliTestEnv::new();
    seed_and_refresh(&env);

    let status = query_json(&env, &["status"]);
    assert_eq!(status["current_generation_id"], 1);
    assert_eq!(status["degraded"], false);

    let summary = query_json(&env, &["summary"]);
    assert_eq!(summary["generation_id"], 1);
    assert_eq!(summary["total_items"], 120);
    assert_eq!(summary["total_authors"], 12);

    let refreshed = query_json(&env, &["--refresh", "summary"]);
    assert_eq!(refreshed["generation_id"], 2);
    assert_eq!(refreshed["total_events"], summary["total_events"]);
}

#[test]
fn second_seed_is_refused_without_force() {
    let env = CliTestEnv::new();

    let output = run_bin(&env, "postpulse-seed", &[]);
    assert_success("postpulse-seed", &[], &output);

    let output = run_bin(&env, "postpulse-seed", &[]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("already seeded"), "got:\n{stderr}");

    let output = run_bin(&env, "postpulse-seed", &["--force"]);
    assert_success("postpulse-seed", &["--force"], &output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Events inserted:  0"), "got:\n{stdout}");
}

#[test]
fn analytics_commands_emit_json() {
    let env = CliTestEnv::new();
    seed_and_refresh(&env);

    let top = query_json(&env, &["top-authors", "--limit", "3", "--all-time"]);
    let top = top.as_array().expect("top-authors should be an array");
    assert!(!top.is_empty() && top.len() <= 3);
    assert_eq!(top[0]["overall_rank"], 1);
    let totals: Vec<u64> = top
        .iter()
        .map(|r| r["total_engagement"].as_u64().unwrap())
        .collect();
    assert!(totals.windows(2).all(|w| w[0] >= w[1]));

    let patterns = query_json(&env, &["patterns", "--all-time"]);
    assert_eq!(patterns["buckets"].as_array().unwrap().len(), 168);

    let categories = query_json(&env, &["categories"]);
    let categories = categories.as_array().unwrap();
    assert!(!categories.is_empty() && categories.len() <= 6);

    let ranked = query_json(&env, &["top-categories", "--metric", "items", "--limit", "2"]);
    assert_eq!(ranked.as_array().unwrap().len(), 2);
    assert_eq!(ranked[0]["rank"], 1);

    let snapshot = query_json(&env, &["snapshot", "1"]);
    let counts = &snapshot["counts"];
    let sum = ["views", "likes", "comments", "shares"]
        .iter()
        .map(|k| counts[*k].as_u64().unwrap())
        .sum::<u64>();
    assert_eq!(snapshot["total"].as_u64().unwrap(), sum);

    for category in ["tech", "lifestyle", "business", "health", "finance", "entertainment"] {
        let records = query_json(&env, &["opportunities", category, "--all-time"]);
        for record in records.as_array().unwrap() {
            assert_eq!(record["category"], category);
        }
    }

    let check = query_json(&env, &["check"]);
    assert_eq!(check["consistent"], true);
}

#[test]
fn invalid_queries_fail() {
    let env = CliTestEnv::new();
    seed_and_refresh(&env);

    for limit in ["0", "51"] {
        let args = ["top-authors", "--limit", limit];
        let output = run_bin(&env, "postpulse", &args);
        assert!(!output.status.success(), "limit {limit} should be rejected");
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("invalid limit"), "got:\n{stderr}");
    }

    let args = ["patterns", "--since", "2025-03-01", "--until", "2025-02-01"];
    let output = run_bin(&env, "postpulse", &args);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid window"));

    let output = run_bin(&env, "postpulse", &["benchmark", "gardening"]);
    assert!(!output.status.success());

    let output = run_bin(&env, "postpulse", &["snapshot", "999999"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No item found"));
}

#[test]
fn empty_database_answers_with_zeroes() {
    let env = CliTestEnv::new();

    let summary = query_json(&env, &["summary"]);
    assert_eq!(summary["total_items"], 0);
    assert_eq!(summary["total_events"], 0);

    let top = query_json(&env, &["top-authors"]);
    assert!(top.as_array().unwrap().is_empty());

    let benchmark = query_json(&env, &["benchmark", "tech"]);
    assert!(benchmark.is_null());
}
