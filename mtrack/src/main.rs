//! mtrack - operator CLI
//!
//! Runs single commands on configured endpoints, inspects and steers the
//! deployment plan, and shows the effective harness configuration.

#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use mtrack_common::{
    EndpointId, ExecRequest, HarnessConfig, LogConfig, PlanMonitor, PlanState, RemoteExecutor,
    Severity, SshExecutor, WaitOutcome, WaitPolicy, init_logging,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "mtrack")]
#[command(author, version, about = "mtrack - tracked commands against remote model endpoints")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to $MTRACK_CONFIG, then the user config dir)
    #[arg(short, long, global = true, env = "MTRACK_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Machine-readable JSON output; log lines on stderr switch to JSON too
    #[arg(long, global = true)]
    json: bool,

    /// Also write JSON logs to a daily-rotated file in this directory
    #[arg(long, global = true, env = "MTRACK_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one command on an endpoint
    Exec {
        /// Endpoint id from the configuration
        endpoint: String,

        /// Command line to run
        command: String,

        /// Run through sudo when the login user is not root
        #[arg(long)]
        privileged: bool,

        /// Per-command timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Inspect or steer the deployment plan
    Plan {
        #[command(subcommand)]
        action: PlanAction,
    },

    /// Show or validate the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum PlanAction {
    /// Print the current plan state
    State { endpoint: String },

    /// Poll until the plan reaches a state
    Wait {
        endpoint: String,

        #[arg(long, value_enum, default_value = "complete")]
        target: TargetState,

        /// Overall wait timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Seconds between polls
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Stop a running plan and wait for it to settle
    Stop { endpoint: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Report configuration warnings
    Validate,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TargetState {
    Complete,
    Stopped,
    Failed,
    Running,
}

impl From<TargetState> for PlanState {
    fn from(target: TargetState) -> Self {
        match target {
            TargetState::Complete => PlanState::Complete,
            TargetState::Stopped => PlanState::Stopped,
            TargetState::Failed => PlanState::Failed,
            TargetState::Running => PlanState::InProgress,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _logging_guards = init_logging(&log_config(&cli))?;

    let (config, loaded) = HarnessConfig::load_with_sources(cli.config.as_deref())
        .context("failed to load configuration")?;
    debug!(path = ?loaded.path, overrides = loaded.overrides.len(), "configuration loaded");

    match cli.command {
        Commands::Exec {
            endpoint,
            command,
            privileged,
            timeout,
        } => {
            let exit_code = exec(&config, &endpoint, &command, privileged, timeout, cli.json).await?;
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
            Ok(())
        }
        Commands::Plan { action } => plan(&config, action, cli.json).await,
        Commands::Config { action } => config_command(&config, &loaded, action, cli.json),
    }
}

fn log_config(cli: &Cli) -> LogConfig {
    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    if cli.json {
        log_config = log_config.with_json(true);
    }
    if let Some(dir) = &cli.log_dir {
        log_config = log_config.with_file(dir);
    }
    log_config
}

async fn exec(
    config: &HarnessConfig,
    endpoint: &str,
    command: &str,
    privileged: bool,
    timeout: Option<u64>,
    json: bool,
) -> Result<i32> {
    let executor = SshExecutor::new(config);
    let timeout = timeout.map(Duration::from_secs).unwrap_or(if privileged {
        config.timeouts.privileged()
    } else {
        config.timeouts.command()
    });
    let request = ExecRequest::new(EndpointId::new(endpoint), command, timeout).privileged(privileged);
    let output = executor
        .execute(&request)
        .await
        .with_context(|| format!("failed to run command on {endpoint}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for line in &output.stdout {
            println!("{line}");
        }
        for line in &output.stderr {
            eprintln!("{line}");
        }
    }
    Ok(output.exit_code)
}

async fn plan(config: &HarnessConfig, action: PlanAction, json: bool) -> Result<()> {
    let executor = SshExecutor::new(config);
    let monitor = PlanMonitor::new(config.general.cli_binary.clone(), config.timeouts.command());

    match action {
        PlanAction::State { endpoint } => {
            let state = monitor.current_state(&executor, &EndpointId::new(endpoint)).await;
            if json {
                println!("{}", serde_json::json!({ "state": state }));
            } else {
                println!("{state}");
            }
            Ok(())
        }
        PlanAction::Wait {
            endpoint,
            target,
            timeout,
            interval,
        } => {
            let endpoint = EndpointId::new(endpoint);
            let mut policy = WaitPolicy::from_config(&config.timeouts);
            if let Some(secs) = timeout {
                policy.timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = interval {
                policy.poll_interval = Duration::from_secs(secs);
            }
            let target = PlanState::from(target);
            info!(endpoint = %endpoint, target = %target, timeout_secs = policy.timeout.as_secs(), "waiting for plan");
            let outcome = monitor.wait_for(&executor, &endpoint, target, policy).await;
            report_outcome(&outcome, json)?;
            outcome.into_result(&endpoint, target)?;
            Ok(())
        }
        PlanAction::Stop { endpoint } => {
            let endpoint = EndpointId::new(endpoint);
            let policy = WaitPolicy::from_config(&config.timeouts);
            match monitor.stop(&executor, &endpoint, policy).await? {
                None => {
                    if json {
                        println!("{}", serde_json::json!({ "outcome": "idle" }));
                    } else {
                        println!("no active plan");
                    }
                    Ok(())
                }
                Some(outcome) => {
                    report_outcome(&outcome, json)?;
                    match outcome {
                        WaitOutcome::TimedOut { last } => bail!("plan on {endpoint} still {last} after stop"),
                        WaitOutcome::Unexpected { state } if state.is_active() => {
                            bail!("plan on {endpoint} is {state} after stop")
                        }
                        _ => Ok(()),
                    }
                }
            }
        }
    }
}

fn report_outcome(outcome: &WaitOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(outcome)?);
    } else {
        match outcome {
            WaitOutcome::Reached => println!("reached"),
            WaitOutcome::Unexpected { state } => println!("unexpected state: {state}"),
            WaitOutcome::TimedOut { last } => println!("timed out (last state: {last})"),
        }
    }
    Ok(())
}

fn config_command(
    config: &HarnessConfig,
    loaded: &mtrack_common::config::LoadedFrom,
    action: ConfigAction,
    json: bool,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                match &loaded.path {
                    Some(path) => println!("# file: {}", path.display()),
                    None => println!("# file: (none, built-in defaults)"),
                }
                for (field, sourced) in &loaded.overrides {
                    let var = sourced.env_var.as_deref().unwrap_or("-");
                    println!("# {field} = {} (from {var})", sourced.value);
                }
                print!("{}", toml::to_string_pretty(config)?);
            }
            Ok(())
        }
        ConfigAction::Validate => {
            let warnings = config.validate();
            if json {
                println!("{}", serde_json::to_string_pretty(&warnings)?);
            } else if warnings.is_empty() {
                println!("configuration OK");
            } else {
                for warning in &warnings {
                    println!("{:?}: {}: {}", warning.severity, warning.field, warning.message);
                }
            }
            if warnings.iter().any(|w| w.severity == Severity::Error) {
                bail!("configuration has errors");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_args() {
        let cli = Cli::try_parse_from([
            "mtrack",
            "exec",
            "ms1",
            "litp show -p /",
            "--privileged",
            "--timeout",
            "30",
        ])
        .unwrap();
        match cli.command {
            Commands::Exec {
                endpoint,
                command,
                privileged,
                timeout,
            } => {
                assert_eq!(endpoint, "ms1");
                assert_eq!(command, "litp show -p /");
                assert!(privileged);
                assert_eq!(timeout, Some(30));
            }
            _ => panic!("expected exec"),
        }
    }

    #[test]
    fn test_plan_wait_defaults_to_complete() {
        let cli = Cli::try_parse_from(["mtrack", "--json", "plan", "wait", "ms1"]).unwrap();
        assert!(cli.json);
        let Commands::Plan {
            action: PlanAction::Wait { target, timeout, .. },
        } = cli.command
        else {
            panic!("expected plan wait");
        };
        assert_eq!(PlanState::from(target), PlanState::Complete);
        assert_eq!(timeout, None);
    }

    #[test]
    fn test_json_flag_switches_log_format() {
        let cli = Cli::try_parse_from([
            "mtrack",
            "plan",
            "state",
            "ms1",
            "--json",
            "-v",
            "--log-dir",
            "/var/log/mtrack",
        ])
        .unwrap();
        let config = log_config(&cli);
        assert!(config.json);
        assert!(config.stderr);
        assert_eq!(config.level, "debug");
        assert_eq!(config.file_dir, Some(PathBuf::from("/var/log/mtrack")));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["mtrack", "config", "validate", "-v", "--config", "/tmp/x.toml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.toml")));
    }
}
