//! Configuration model.
//!
//! The top-level file names include directories and web settings; every file
//! found in the include directories describes exactly one target. Both are
//! parsed strictly: unknown keys are rejected.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use common::error::{Error, Result};

pub mod cli;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/cradle_exporter/config.yml";
pub const DEFAULT_LISTEN_ADDRESS: &str = ":9231";
pub const DEFAULT_METRIC_PATH: &str = "/metrics";
pub const DEFAULT_PROBE_PATH: &str = "/probe";

/// Identity given to target configs parsed from memory.
pub const IN_MEMORY_PATH: &str = "<mem>";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub include_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub cli: CliConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_metric_path")]
    pub metric_path: String,
    #[serde(default = "default_probe_path")]
    pub probe_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_tls_cert_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_tls_key_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ca_path: Option<PathBuf>,
}

fn default_listen_address() -> String {
    DEFAULT_LISTEN_ADDRESS.to_string()
}

fn default_metric_path() -> String {
    DEFAULT_METRIC_PATH.to_string()
}

fn default_probe_path() -> String {
    DEFAULT_PROBE_PATH.to_string()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            metric_path: default_metric_path(),
            probe_path: default_probe_path(),
            server_tls_cert_path: None,
            server_tls_key_path: None,
            client_ca_path: None,
        }
    }
}

impl WebConfig {
    /// Address in a form `TcpListener::bind` accepts. `:9231` means every
    /// IPv4 interface.
    pub fn bind_address(&self) -> String {
        if self.listen_address.starts_with(':') {
            format!("0.0.0.0{}", self.listen_address)
        } else {
            self.listen_address.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    #[serde(default)]
    pub standard_log: bool,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::config(path.display().to_string(), e))?;
        Self::from_yaml(&text).map_err(|e| match e {
            Error::Config { message, .. } => Error::config(path.display().to_string(), message),
            other => other,
        })
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yaml::from_str(text).map_err(|e| Error::config(IN_MEMORY_PATH, e))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterConfig {
    #[serde(default)]
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CronJobConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    pub every: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticFileConfig {
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

/// One per-target file. Exactly one payload must be present; that is checked
/// when the target is built, not here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    #[serde(skip)]
    pub config_file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exporter: Option<ExporterConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<ScriptConfig>,
    #[serde(default, rename = "cron", skip_serializing_if = "Option::is_none")]
    pub cron_job: Option<CronJobConfig>,
    #[serde(default, rename = "static", skip_serializing_if = "Option::is_none")]
    pub static_files: Option<StaticFileConfig>,
}

impl TargetConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|e| Error::config(display.clone(), e))?;
        let mut config = Self::from_yaml(&text).map_err(|e| match e {
            Error::Config { message, .. } => Error::config(display.clone(), message),
            other => other,
        })?;
        config.config_file_path = display;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let mut config: TargetConfig = if text.trim().is_empty() {
            TargetConfig::default()
        } else {
            serde_yaml::from_str(text).map_err(|e| Error::config(IN_MEMORY_PATH, e))?
        };
        config.config_file_path = IN_MEMORY_PATH.to_string();
        Ok(config)
    }

    /// Names of the payload keys that are set, in file order of the schema.
    pub fn payload_keys(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.exporter.is_some() {
            keys.push("exporter");
        }
        if self.service.is_some() {
            keys.push("service");
        }
        if self.script.is_some() {
            keys.push("script");
        }
        if self.cron_job.is_some() {
            keys.push("cron");
        }
        if self.static_files.is_some() {
            keys.push("static");
        }
        keys
    }
}
