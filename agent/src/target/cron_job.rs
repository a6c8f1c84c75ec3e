use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error};
use tokio_util::sync::CancellationToken;

use common::error::Result;
use common::exposition::BlockHeader;
use common::logging::Logger;

use crate::config::CronJobConfig;
use crate::metrics::Metrics;
use crate::target::command::{run_to_completion, CommandSpec};
use crate::target::schedule::CronSchedule;
use crate::target::{lock, Scrape};

pub const CRON_JOB_TARGET: &str = "Cron Job Target";

/// A command run on a schedule. Scrapes serve the output of the last
/// successful run.
pub struct CronJobTarget {
    config_file_path: String,
    command: CommandSpec,
    schedule: CronSchedule,
    last_result: Mutex<Option<Bytes>>,
    metrics: Metrics,
    log: Logger,
}

impl CronJobTarget {
    pub fn new(config_file_path: String, config: &CronJobConfig, metrics: Metrics, log: Logger) -> Result<Self> {
        let schedule = CronSchedule::parse(&config.every)?;
        Ok(Self {
            config_file_path,
            command: CommandSpec::new(config.path.clone(), config.args.clone()),
            schedule,
            last_result: Mutex::new(None),
            metrics,
            log,
        })
    }

    pub fn config_file_path(&self) -> &str {
        &self.config_file_path
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    pub fn last_result(&self) -> Option<Bytes> {
        lock(&self.last_result).clone()
    }

    /// Runs the job once and replaces the cached result on success. A failed
    /// run leaves the previous result in place.
    pub async fn update(&self, cancel: &CancellationToken) -> Result<()> {
        debug!(target: self.log.target(), "running cron job: config-file-path={} command={}", self.config_file_path, self.command);
        match run_to_completion(&self.command, cancel).await {
            Ok(stdout) => {
                *lock(&self.last_result) = Some(Bytes::from(stdout));
                self.record_run("success");
                Ok(())
            }
            Err(err) => {
                self.record_run("failure");
                Err(err)
            }
        }
    }

    fn record_run(&self, result: &str) {
        self.metrics
            .cron_job_runs
            .with_label_values(&[self.config_file_path.as_str(), result])
            .inc();
    }
}

#[async_trait]
impl Scrape for CronJobTarget {
    async fn scrape(&self, cancel: &CancellationToken, w: &mut Vec<u8>) {
        let header = BlockHeader::new(CRON_JOB_TARGET).field("Config", &self.config_file_path);

        let cached = match self.last_result() {
            Some(cached) => cached,
            None => {
                if let Err(err) = self.update(cancel).await {
                    error!(target: self.log.target(), "Failed to update target (on the fly): config-file-path={} err={}", self.config_file_path, err);
                    header.write_error(w, "Failed to execute target (on the fly)", &err);
                    return;
                }
                self.last_result().unwrap_or_default()
            }
        };
        header.write_payload(w, &cached);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cron_job(body: &str, every: &str) -> Result<CronJobTarget> {
        let config = CronJobConfig {
            path: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), body.to_string()],
            every: every.to_string(),
        };
        CronJobTarget::new("/etc/c.yml".to_string(), &config, Metrics::new()?, Logger::new("test"))
    }

    #[tokio::test]
    async fn first_scrape_runs_once_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("runs");
        let body = format!("echo x >> {0}; echo \"job_runs $(wc -l < {0} | tr -d ' ')\"", counter.display());
        let target = cron_job(&body, "@every 1h").unwrap();

        let mut first = Vec::new();
        target.scrape(&CancellationToken::new(), &mut first).await;
        let mut second = Vec::new();
        target.scrape(&CancellationToken::new(), &mut second).await;

        assert_eq!(first, second);
        assert_eq!(
            String::from_utf8(first).unwrap(),
            "### Cron Job Target\n### Config: /etc/c.yml\njob_runs 1\n"
        );
        assert_eq!(std::fs::read_to_string(&counter).unwrap(), "x\n");
    }

    #[tokio::test]
    async fn failed_run_on_the_fly_is_an_error_block() {
        let target = cron_job("exit 1", "@hourly").unwrap();
        let mut out = Vec::new();
        target.scrape(&CancellationToken::new(), &mut out).await;
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("### Cron Job Target\n### Err: Failed to execute target (on the fly)\n"));
        assert!(target.last_result().is_none());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_result() {
        let dir = tempfile::tempdir().unwrap();
        let flag = dir.path().join("fail");
        let body = format!("test -e {} && exit 1; echo ok 1", flag.display());
        let target = cron_job(&body, "@every 1m").unwrap();

        target.update(&CancellationToken::new()).await.unwrap();
        std::fs::write(&flag, "").unwrap();
        assert!(target.update(&CancellationToken::new()).await.is_err());
        assert_eq!(target.last_result().unwrap(), Bytes::from_static(b"ok 1\n"));
    }

    #[test]
    fn invalid_schedule_is_rejected() {
        assert!(cron_job("true", "every minute").is_err());
    }
}
