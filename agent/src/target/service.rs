use std::process::ExitStatus;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use common::logging::Logger;

use crate::config::ServiceConfig;
use crate::metrics::Metrics;
use crate::scrape::scrape_endpoint;
use crate::target::command::{describe_exit, CommandSpec};
use crate::target::{lock, Scrape};

/// Supervision state of a service, as shown on the index page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub restarts: u64,
    pub last_exit: Option<String>,
}

/// A long-running process kept alive by the runner. Scrapes only reach its
/// sidecar endpoints.
pub struct ServiceTarget {
    config_file_path: String,
    command: CommandSpec,
    endpoints: Vec<String>,
    client: reqwest::Client,
    status: Mutex<ServiceStatus>,
    metrics: Metrics,
    log: Logger,
}

impl ServiceTarget {
    pub fn new(
        config_file_path: String,
        config: &ServiceConfig,
        client: reqwest::Client,
        metrics: Metrics,
        log: Logger,
    ) -> Self {
        Self {
            config_file_path,
            command: CommandSpec::new(config.path.clone(), config.args.clone()),
            endpoints: config.endpoints.clone(),
            client,
            status: Mutex::new(ServiceStatus::default()),
            metrics,
            log,
        }
    }

    pub fn config_file_path(&self) -> &str {
        &self.config_file_path
    }

    pub fn command(&self) -> &CommandSpec {
        &self.command
    }

    pub fn status(&self) -> ServiceStatus {
        lock(&self.status).clone()
    }

    pub(crate) fn record_start(&self, pid: Option<u32>) {
        let mut status = lock(&self.status);
        status.running = true;
        status.pid = pid;
        self.metrics.service_up.with_label_values(&[self.config_file_path.as_str()]).set(1);
    }

    /// Records a process exit. `exit` is an error when the process never started.
    pub(crate) fn record_exit(&self, exit: Result<ExitStatus, String>) {
        let (description, code) = match &exit {
            Ok(status) => (describe_exit(status), status.code().map(i64::from).unwrap_or(-1)),
            Err(reason) => (reason.clone(), -1),
        };
        let mut status = lock(&self.status);
        status.running = false;
        status.pid = None;
        status.last_exit = Some(description);
        self.metrics.service_up.with_label_values(&[self.config_file_path.as_str()]).set(0);
        self.metrics
            .service_last_exit_code
            .with_label_values(&[self.config_file_path.as_str()])
            .set(code);
    }

    pub(crate) fn record_restart(&self) {
        lock(&self.status).restarts += 1;
        self.metrics
            .service_restarts
            .with_label_values(&[self.config_file_path.as_str()])
            .inc();
    }
}

#[async_trait]
impl Scrape for ServiceTarget {
    async fn scrape(&self, cancel: &CancellationToken, w: &mut Vec<u8>) {
        for endpoint in &self.endpoints {
            scrape_endpoint(&self.client, &self.log, cancel, w, &self.config_file_path, endpoint).await;
        }
    }
}
