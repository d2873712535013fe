//! Configuration loading and management.

use crate::gate::{DEFAULT_GATE_TIMEOUT, Gate};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Project-local config file name.
pub const PROJECT_CONFIG_FILE: &str = "template-workflows.yaml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub gate: GateConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// HTTP port for `serve`.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Container used when a command does not name one.
    #[serde(default = "default_container")]
    pub container: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            port: default_port(),
            container: default_container(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".template-workflows/workflows.db")
}

fn default_port() -> u16 {
    31995
}

fn default_container() -> String {
    "default".to_string()
}

/// Which operations contend for the same gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateScope {
    /// One gate for every container in the process.
    #[default]
    Process,
    /// Each container has its own gate.
    Container,
}

impl std::str::FromStr for GateScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "process" => Ok(GateScope::Process),
            "container" => Ok(GateScope::Container),
            other => anyhow::bail!("unknown gate scope '{}'", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub scope: GateScope,

    /// Bounded wait for the gate, in milliseconds.
    #[serde(default = "default_gate_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            scope: GateScope::default(),
            timeout_ms: default_gate_timeout_ms(),
        }
    }
}

fn default_gate_timeout_ms() -> u64 {
    DEFAULT_GATE_TIMEOUT.as_millis() as u64
}

impl GateConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The gate shared by every container in this process.
    pub fn process_gate(&self) -> Arc<Gate> {
        if self.timeout() == DEFAULT_GATE_TIMEOUT {
            Gate::process()
        } else {
            Arc::new(Gate::new(self.timeout()))
        }
    }

    /// Gate for a newly opened container.
    pub fn gate_for_container(&self, process_gate: &Arc<Gate>) -> Arc<Gate> {
        match self.scope {
            GateScope::Process => Arc::clone(process_gate),
            GateScope::Container => Arc::new(Gate::new(self.timeout())),
        }
    }
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// Files searched when no explicit path is given, in priority order.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(PROJECT_CONFIG_FILE)];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".template-workflows").join("config.yaml"));
        }
        paths
    }

    /// Load from `explicit`, or the first search path that exists, or defaults;
    /// then apply environment overrides. An explicit path must exist.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => Self::load_first(&Self::search_paths())?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_first(paths: &[PathBuf]) -> Result<Self> {
        for path in paths {
            if path.is_file() {
                debug!(path = %path.display(), "Loading config");
                return Self::load(path);
            }
        }
        Ok(Self::default())
    }

    /// Override loaded values from `TEMPLATE_WORKFLOWS_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db_path) = lookup("TEMPLATE_WORKFLOWS_DB_PATH") {
            self.server.db_path = PathBuf::from(db_path);
        }
        if let Some(port) = lookup("TEMPLATE_WORKFLOWS_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!(value = %port, "Ignoring invalid TEMPLATE_WORKFLOWS_PORT"),
            }
        }
        if let Some(timeout) = lookup("TEMPLATE_WORKFLOWS_GATE_TIMEOUT_MS") {
            match timeout.parse() {
                Ok(timeout) => self.gate.timeout_ms = timeout,
                Err(_) => {
                    warn!(value = %timeout, "Ignoring invalid TEMPLATE_WORKFLOWS_GATE_TIMEOUT_MS")
                }
            }
        }
        if let Some(scope) = lookup("TEMPLATE_WORKFLOWS_GATE_SCOPE") {
            match scope.parse() {
                Ok(scope) => self.gate.scope = scope,
                Err(err) => warn!(error = %err, "Ignoring TEMPLATE_WORKFLOWS_GATE_SCOPE"),
            }
        }
    }
}
