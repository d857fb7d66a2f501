//! TOML configuration file.
//!
//! ```toml
//! [general]
//! log_level = "info"
//! cli_binary = "litp"
//!
//! [timeouts]
//! command_secs = 600
//! plan_secs = 3600
//!
//! [[endpoints]]
//! id = "ms1"
//! host = "10.44.86.10"
//! user = "root"
//! identity_file = "~/.ssh/id_rsa"
//! ```

use super::source::Sourced;
use super::{ConfigError, ConfigWarning, EnvParser, Severity};
use crate::types::{EndpointId, Transport};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "MTRACK_CONFIG";

/// Where a loaded configuration came from.
#[derive(Debug, Clone, Default)]
pub struct LoadedFrom {
    pub path: Option<PathBuf>,
    /// Environment overrides applied on top of the file, by field.
    pub overrides: Vec<(String, Sourced<String>)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub general: GeneralConfig,
    pub timeouts: TimeoutsConfig,
    pub convergence: ConvergenceConfig,
    pub paths: PathsConfig,
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    /// Name of the model CLI binary on the endpoints.
    pub cli_binary: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            cli_binary: "litp".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub command_secs: u64,
    pub privileged_secs: u64,
    pub plan_secs: u64,
    pub poll_interval_secs: u64,
    pub connect_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            command_secs: 600,
            privileged_secs: 600,
            plan_secs: 3600,
            poll_interval_secs: 3,
            connect_secs: 10,
        }
    }
}

impl TimeoutsConfig {
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub fn privileged(&self) -> Duration {
        Duration::from_secs(self.privileged_secs)
    }

    pub fn plan(&self) -> Duration {
        Duration::from_secs(self.plan_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Settings for the configuration-management agent that periodically
/// re-applies the model on each node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    pub interval_secs: u64,
    pub skew_secs: u64,
    /// Command that disables the agent for the duration of a test.
    pub pause_command: String,
    /// Command that re-enables the agent after a test disabled it.
    pub resume_command: String,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1800,
            skew_secs: 60,
            pause_command: "puppet agent --disable".to_string(),
            resume_command: "puppet agent --enable".to_string(),
        }
    }
}

impl ConvergenceConfig {
    /// One full cycle plus skew.
    pub fn wait_duration(&self) -> Duration {
        Duration::from_secs(self.interval_secs + self.skew_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Remote directory that holds moved-aside files.
    pub holding_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            holding_dir: "/tmp/mtrack-holding".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub id: EndpointId,
    pub host: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub identity_file: Option<String>,
    #[serde(default)]
    pub transport: Transport,
}

fn default_user() -> String {
    "root".to_string()
}

fn default_port() -> u16 {
    22
}

impl EndpointConfig {
    /// Identity file with `~` and `$VAR` expanded.
    pub fn identity_path(&self) -> Option<PathBuf> {
        self.identity_file.as_ref().map(|raw| {
            let expanded = shellexpand::full(raw)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| shellexpand::tilde(raw).into_owned());
            PathBuf::from(expanded)
        })
    }
}

impl HarnessConfig {
    /// Locate and load configuration, then apply `MTRACK_*` overrides.
    ///
    /// Lookup order: `explicit`, then `MTRACK_CONFIG`, then the user config
    /// directory. Falls back to defaults when none of those exist. An explicit
    /// path that does not exist is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_sources(explicit).map(|(config, _)| config)
    }

    /// Like [`HarnessConfig::load`], also returning the file used and the
    /// values taken from the environment.
    pub fn load_with_sources(
        explicit: Option<&Path>,
    ) -> Result<(Self, LoadedFrom), ConfigError> {
        let path = Self::locate(explicit)?;
        let mut config = match &path {
            Some(path) => Self::from_file(path)?,
            None => {
                debug!("no config file found, using defaults");
                Self::default()
            }
        };
        let overrides = config.apply_env_overrides()?;
        Ok((config, LoadedFrom { path, overrides }))
    }

    fn locate(explicit: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            return Ok(Some(path.to_path_buf()));
        }

        if let Ok(raw) = std::env::var(CONFIG_PATH_ENV)
            && !raw.is_empty()
        {
            let path = PathBuf::from(shellexpand::tilde(&raw).into_owned());
            if !path.exists() {
                return Err(ConfigError::NotFound { path });
            }
            return Ok(Some(path));
        }

        Ok(Self::user_config_path().filter(|p| p.exists()))
    }

    /// `<config_dir>/mtrack/config.toml`.
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mtrack").join("config.toml"))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        debug!(path = %path.display(), endpoints = config.endpoints.len(), "loaded config file");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Apply `MTRACK_*` overrides and return the fields they changed.
    ///
    /// Every bad variable is reported together in [`ConfigError::Env`].
    pub fn apply_env_overrides(&mut self) -> Result<Vec<(String, Sourced<String>)>, ConfigError> {
        let mut parser = EnvParser::new();
        let mut applied = Vec::new();

        let level = parser.log_level("LOG_LEVEL", &self.general.log_level);
        let binary = parser.string("CLI_BINARY", &self.general.cli_binary);
        let command = parser.seconds("COMMAND_TIMEOUT", self.timeouts.command_secs, 1..=86_400);
        let privileged =
            parser.seconds("PRIVILEGED_TIMEOUT", self.timeouts.privileged_secs, 1..=86_400);
        let plan = parser.seconds("PLAN_TIMEOUT", self.timeouts.plan_secs, 1..=7 * 86_400);
        let poll = parser.seconds("POLL_INTERVAL", self.timeouts.poll_interval_secs, 1..=600);
        let skew = parser.seconds("CONVERGENCE_SKEW", self.convergence.skew_secs, 0..=3600);
        let holding = parser.non_empty("HOLDING_DIR");

        if parser.has_errors() {
            return Err(ConfigError::Env(parser.take_errors()));
        }

        self.general.log_level = record(&mut applied, "general.log_level", level);
        self.general.cli_binary = record(&mut applied, "general.cli_binary", binary);
        self.timeouts.command_secs = record(&mut applied, "timeouts.command_secs", command);
        self.timeouts.privileged_secs =
            record(&mut applied, "timeouts.privileged_secs", privileged);
        self.timeouts.plan_secs = record(&mut applied, "timeouts.plan_secs", plan);
        self.timeouts.poll_interval_secs =
            record(&mut applied, "timeouts.poll_interval_secs", poll);
        self.convergence.skew_secs = record(&mut applied, "convergence.skew_secs", skew);
        if let Some(holding) = holding {
            self.paths.holding_dir = record(&mut applied, "paths.holding_dir", holding);
        }

        Ok(applied)
    }

    pub fn endpoint(&self, id: &EndpointId) -> Option<&EndpointConfig> {
        self.endpoints.iter().find(|e| &e.id == id)
    }

    /// Check for values that load fine but will misbehave at runtime.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            if !seen.insert(endpoint.id.as_str()) {
                warnings.push(ConfigWarning::new(
                    "endpoints",
                    format!("duplicate endpoint id '{}'", endpoint.id),
                    Severity::Error,
                ));
            }
            if endpoint.host.trim().is_empty() {
                warnings.push(ConfigWarning::new(
                    format!("endpoints.{}.host", endpoint.id),
                    "host is empty",
                    Severity::Error,
                ));
            }
            if let Some(path) = endpoint.identity_path()
                && !path.exists()
            {
                warnings.push(ConfigWarning::new(
                    format!("endpoints.{}.identity_file", endpoint.id),
                    format!("{} does not exist", path.display()),
                    Severity::Warning,
                ));
            }
        }

        for (field, value) in [
            ("timeouts.command_secs", self.timeouts.command_secs),
            ("timeouts.privileged_secs", self.timeouts.privileged_secs),
            ("timeouts.plan_secs", self.timeouts.plan_secs),
            ("timeouts.poll_interval_secs", self.timeouts.poll_interval_secs),
        ] {
            if value == 0 {
                warnings.push(ConfigWarning::new(field, "timeout is zero", Severity::Error));
            }
        }

        if self.timeouts.poll_interval_secs >= self.timeouts.plan_secs {
            warnings.push(ConfigWarning::new(
                "timeouts.poll_interval_secs",
                "poll interval is not shorter than the plan timeout; plans get a single poll",
                Severity::Warning,
            ));
        }

        if self.endpoints.is_empty() {
            warnings.push(ConfigWarning::new(
                "endpoints",
                "no endpoints configured",
                Severity::Info,
            ));
        }

        warnings
    }
}

fn record<T: ToString + Clone>(
    applied: &mut Vec<(String, Sourced<String>)>,
    field: &str,
    sourced: Sourced<T>,
) -> T {
    if sourced.is_from_env() {
        applied.push((
            field.to_string(),
            Sourced {
                value: sourced.value.to_string(),
                source: sourced.source,
                env_var: sourced.env_var.clone(),
            },
        ));
    }
    sourced.value
}
