use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

use super::{Config, DEFAULT_CONFIG_PATH};

/// Aggregates metrics from exporters, scripts, cron jobs, supervised services
/// and static files into one Prometheus endpoint.
#[derive(Debug, Clone, Parser)]
#[command(name = "cradle_exporter", version)]
pub struct Args {
    /// Config file path
    #[arg(long = "config", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Check config file and exit.
    #[arg(short = 't', long = "test-config")]
    pub test_config: bool,

    /// Print logs in standard format, not in json
    #[arg(long = "cli.standard-log")]
    pub standard_log: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long = "log.level", default_value = "info")]
    pub log_level: LevelFilter,

    /// Address to listen on for web interface and telemetry.
    #[arg(long = "web.listen-address")]
    pub listen_address: Option<String>,

    /// Path under which to expose the exporter's own metrics
    #[arg(long = "web.metric-path")]
    pub metric_path: Option<String>,

    /// Path under which to expose collected metrics
    #[arg(long = "web.probe-path", visible_alias = "web.collected-path")]
    pub probe_path: Option<String>,

    #[arg(long = "server-tls-cert-path")]
    pub server_tls_cert_path: Option<PathBuf>,

    #[arg(long = "server-tls-key-path")]
    pub server_tls_key_path: Option<PathBuf>,

    #[arg(long = "client-ca-path")]
    pub client_ca_path: Option<PathBuf>,
}

impl Args {
    /// Applies the flags that were given on the command line on top of the file.
    pub fn apply(&self, config: &mut Config) {
        if self.standard_log {
            config.cli.standard_log = true;
        }
        if let Some(addr) = &self.listen_address {
            config.web.listen_address = addr.clone();
        }
        if let Some(path) = &self.metric_path {
            config.web.metric_path = path.clone();
        }
        if let Some(path) = &self.probe_path {
            config.web.probe_path = path.clone();
        }
        if let Some(path) = &self.server_tls_cert_path {
            config.web.server_tls_cert_path = Some(path.clone());
        }
        if let Some(path) = &self.server_tls_key_path {
            config.web.server_tls_key_path = Some(path.clone());
        }
        if let Some(path) = &self.client_ca_path {
            config.web.client_ca_path = Some(path.clone());
        }
    }

    /// Reads the config file and applies overrides. Called at startup and on
    /// every reload signal.
    pub fn load_config(&self) -> common::error::Result<Config> {
        let mut config = Config::from_file(&self.config)?;
        self.apply(&mut config);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_only_when_given() {
        let args = Args::parse_from(["cradle_exporter", "--web.probe-path", "/collected"]);
        let mut config = Config::from_yaml("web: { listen_address: \"127.0.0.1:1234\" }\n").unwrap();
        args.apply(&mut config);
        assert_eq!(config.web.listen_address, "127.0.0.1:1234");
        assert_eq!(config.web.probe_path, "/collected");
        assert_eq!(config.web.metric_path, "/metrics");
        assert!(!config.cli.standard_log);
    }

    #[test]
    fn defaults() {
        let args = Args::parse_from(["cradle_exporter", "-t"]);
        assert!(args.test_config);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(args.log_level, LevelFilter::Info);
    }
}
