//! Config discovery and `MTRACK_*` overrides.
//!
//! These tests mutate the process environment and run serially.

#![allow(unsafe_code)]

use mtrack_common::config::file::CONFIG_PATH_ENV;
use mtrack_common::{
    ConfigError, ConfigSource, ErrorCode, ExecOutput, HarnessConfig, ScriptedExecutor, TestSession,
};
use serial_test::serial;
use std::env;
use std::io::Write;

const VARS: &[&str] = &[
    CONFIG_PATH_ENV,
    "MTRACK_LOG_LEVEL",
    "MTRACK_CLI_BINARY",
    "MTRACK_COMMAND_TIMEOUT",
    "MTRACK_PRIVILEGED_TIMEOUT",
    "MTRACK_PLAN_TIMEOUT",
    "MTRACK_POLL_INTERVAL",
    "MTRACK_CONVERGENCE_SKEW",
    "MTRACK_HOLDING_DIR",
];

fn clear() {
    for var in VARS {
        // SAFETY: serialized by #[serial]; no other thread reads the environment.
        unsafe { env::remove_var(var) };
    }
}

fn set(var: &str, value: &str) {
    // SAFETY: serialized by #[serial]; no other thread reads the environment.
    unsafe { env::set_var(var, value) };
}

fn config_file(body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_config_env_var_locates_file_and_overrides_apply() {
    clear();
    let file = config_file(
        r#"
[general]
cli_binary = "litp"

[timeouts]
plan_secs = 7200

[[endpoints]]
id = "ms1"
host = "10.0.0.1"
"#,
    );
    set(CONFIG_PATH_ENV, file.path().to_str().unwrap());
    set("MTRACK_POLL_INTERVAL", "5");
    set("MTRACK_HOLDING_DIR", "/var/tmp/hold");

    let (config, loaded) = HarnessConfig::load_with_sources(None).unwrap();
    clear();

    assert_eq!(loaded.path.as_deref(), Some(file.path()));
    assert_eq!(config.timeouts.plan_secs, 7200);
    assert_eq!(config.timeouts.poll_interval_secs, 5);
    assert_eq!(config.paths.holding_dir, "/var/tmp/hold");
    assert_eq!(config.endpoints.len(), 1);

    let fields: Vec<&str> = loaded.overrides.iter().map(|(f, _)| f.as_str()).collect();
    assert_eq!(fields, vec!["timeouts.poll_interval_secs", "paths.holding_dir"]);
    let (_, poll) = &loaded.overrides[0];
    assert_eq!(poll.source, ConfigSource::Environment);
    assert_eq!(poll.env_var.as_deref(), Some("MTRACK_POLL_INTERVAL"));
}

#[test]
#[serial]
fn test_bad_env_values_are_reported_together() {
    clear();
    set("MTRACK_PLAN_TIMEOUT", "forever");
    set("MTRACK_POLL_INTERVAL", "0");

    let err = HarnessConfig::load(None).unwrap_err();
    clear();

    assert_eq!(err.code(), ErrorCode::ConfigEnvError);
    let ConfigError::Env(errors) = err else {
        panic!("expected env error");
    };
    assert_eq!(errors.len(), 2);
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_session_uses_overridden_binary() {
    clear();
    set("MTRACK_CLI_BINARY", "/usr/bin/litp");
    let config = HarnessConfig::load(None).unwrap();
    clear();

    let exec = ScriptedExecutor::new();
    exec.always("show_plan", ExecOutput::ok(&["Plan Status: Successful"]));
    let mut session = TestSession::new(exec.clone(), &config);
    session
        .run(&"ms1".into(), "/usr/bin/litp create -p /a -t t")
        .await
        .unwrap();
    assert_eq!(session.registry().ledger.len(), 1);

    session.cleanup().await.unwrap();
    assert!(exec.commands().contains(&"/usr/bin/litp remove -p /a".to_string()));
}
