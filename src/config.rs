use crate::readiness::ReadinessWaiter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "readyprobe.toml";

/// Top-level configuration loaded from readyprobe.toml.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
#[derive(Default)]
pub struct ProbeConfig {
    pub service: ServiceConfig,
    pub probe: ProbeSettings,
    pub preflight: PreflightConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Name used in log lines and error messages.
    pub name: String,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub url: String,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub allow_any_status: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PreflightConfig {
    pub check_port: bool,
    pub check_executable: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub grace_secs: u64,
}

// --- Default implementations ---

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "service".to_string(),
            command: None,
            args: Vec::new(),
            url: "http://127.0.0.1:8080/".to_string(),
            env: BTreeMap::new(),
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            poll_interval_ms: 1,
            allow_any_status: false,
        }
    }
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            check_port: true,
            check_executable: true,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_secs: 5 }
    }
}

/// Values given on the command line; `Some`/`true` wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub name: Option<String>,
    pub url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub allow_any_status: bool,
    pub no_port_check: bool,
    /// Command followed by its arguments.
    pub command: Vec<String>,
}

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl ProbeConfig {
    /// Load config from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(name) = &overrides.name {
            self.service.name = name.clone();
        }
        if let Some(url) = &overrides.url {
            self.service.url = url.clone();
        }
        if let Some(secs) = overrides.timeout_secs {
            self.probe.timeout_secs = secs;
        }
        if let Some(ms) = overrides.poll_interval_ms {
            self.probe.poll_interval_ms = ms;
        }
        if overrides.allow_any_status {
            self.probe.allow_any_status = true;
        }
        if overrides.no_port_check {
            self.preflight.check_port = false;
        }
        if let Some((command, args)) = overrides.command.split_first() {
            self.service.command = Some(command.clone());
            self.service.args = args.to_vec();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.service.command.as_deref() {
            Some(c) if !c.trim().is_empty() => {}
            _ => {
                return Err(ConfigError::Invalid(
                    "no service command (set [service].command or pass one after --)".to_string(),
                ))
            }
        }
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::Invalid("service name is empty".to_string()));
        }
        if let Err(e) = reqwest::Url::parse(&self.service.url) {
            return Err(ConfigError::Invalid(format!(
                "service url '{}' is not valid: {}",
                self.service.url, e
            )));
        }
        if self.probe.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "probe.poll_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.probe.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.probe.poll_interval_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.shutdown.grace_secs)
    }

    /// Readiness waiter configured from the `[probe]` table.
    pub fn waiter(&self) -> ReadinessWaiter {
        ReadinessWaiter::new()
            .timeout(self.timeout())
            .poll_interval(self.poll_interval())
            .allow_any_status(self.probe.allow_any_status)
    }
}
