//! Background work of one generation: cron schedules and supervised services.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use common::error::Result;
use common::logging::Logger;

use crate::common::component::Component;
use crate::target::{Target, Targets};

pub mod scheduler;
pub mod supervisor;

/// Upper bound on how long a stop waits for schedules and services to wind
/// down. Longer than the supervisor's SIGTERM grace period.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

pub struct Runner {
    targets: Arc<Targets>,
    cancel: CancellationToken,
    state: watch::Sender<RunnerState>,
    log: Logger,
}

impl Runner {
    pub fn new(targets: Arc<Targets>, log: Logger) -> Self {
        let (state, _) = watch::channel(RunnerState::Created);
        Self {
            targets,
            cancel: CancellationToken::new(),
            state,
            log,
        }
    }

    pub fn state(&self) -> RunnerState {
        *self.state.borrow()
    }

    /// Starts every schedule and supervision loop, then blocks until `stop`.
    /// Calling it on a runner that already ran or was stopped returns at once.
    pub async fn run(&self) -> Result<()> {
        let started = self.state.send_if_modified(|state| {
            if *state == RunnerState::Created {
                *state = RunnerState::Running;
                return true;
            }
            false
        });
        if !started {
            return Ok(());
        }

        let mut tasks = JoinSet::new();
        let mut schedules = 0;
        let mut services = 0;
        for target in self.targets.values() {
            match &**target {
                Target::CronJob(_) => {
                    schedules += 1;
                    tasks.spawn(scheduler::run_schedule(
                        target.clone(),
                        self.cancel.clone(),
                        self.log.scoped("cron"),
                    ));
                }
                Target::Service(_) => {
                    services += 1;
                    let target = target.clone();
                    let cancel = self.cancel.clone();
                    let log = self.log.scoped("service");
                    tasks.spawn(async move {
                        if let Target::Service(service) = &*target {
                            supervisor::supervise(service, &cancel, &log).await;
                        }
                    });
                }
                _ => {}
            }
        }
        info!(target: self.log.target(), "runner started: schedules={} services={}", schedules, services);

        self.cancel.cancelled().await;

        let drained = tokio::time::timeout(STOP_TIMEOUT, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(target: self.log.target(), "runner tasks did not stop within {:?}; aborting them", STOP_TIMEOUT);
            tasks.abort_all();
        }

        self.state.send_replace(RunnerState::Stopped);
        info!(target: self.log.target(), "runner stopped");
        Ok(())
    }

    /// Stops the scheduler and every supervised service and waits (bounded)
    /// until `run` has wound down.
    pub async fn stop(&self) {
        let mut waiting = self.state.subscribe();
        self.state.send_modify(|state| {
            *state = match *state {
                RunnerState::Created => RunnerState::Stopped,
                RunnerState::Running => RunnerState::Stopping,
                other => other,
            }
        });
        self.cancel.cancel();

        let stopped = waiting.wait_for(|state| *state == RunnerState::Stopped);
        if tokio::time::timeout(STOP_TIMEOUT + Duration::from_secs(1), stopped).await.is_err() {
            warn!(target: self.log.target(), "runner did not report stopped in time");
        }
    }
}

#[async_trait]
impl Component for Runner {
    async fn run(&self) -> Result<()> {
        Runner::run(self).await
    }

    async fn shutdown(&self) -> Result<()> {
        self.stop().await;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    use crate::config::TargetConfig;
    use crate::metrics::Metrics;
    use crate::target::{new_target, TargetContext};

    fn targets(yamls: &[(&str, String)]) -> Arc<Targets> {
        let ctx = TargetContext {
            client: reqwest::Client::new(),
            metrics: Metrics::new().unwrap(),
            log: Logger::new("test"),
        };
        let mut targets = Targets::new();
        for (path, yaml) in yamls {
            let mut config = TargetConfig::from_yaml(yaml).unwrap();
            config.config_file_path = path.to_string();
            targets.insert(path.to_string(), Arc::new(new_target(&config, &ctx).unwrap()));
        }
        Arc::new(targets)
    }

    fn service_status(targets: &Targets, path: &str) -> crate::target::ServiceStatus {
        match &*targets[path] {
            Target::Service(service) => service.status(),
            _ => panic!("not a service"),
        }
    }

    #[tokio::test]
    async fn stop_before_run_is_terminal() {
        let runner = Runner::new(Arc::new(Targets::new()), Logger::new("test"));
        runner.stop().await;
        assert_eq!(runner.state(), RunnerState::Stopped);
        runner.run().await.unwrap();
        assert_eq!(runner.state(), RunnerState::Stopped);
    }

    #[tokio::test]
    async fn crashing_service_is_respawned() {
        let targets = targets(&[("/svc.yml", "service: { path: /bin/sh, args: [\"-c\", \"exit 3\"] }".to_string())]);
        let runner = Arc::new(Runner::new(targets.clone(), Logger::new("test")));
        let handle = tokio::spawn({
            let runner = runner.clone();
            async move { runner.run().await }
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        runner.stop().await;
        handle.await.unwrap().unwrap();

        let status = service_status(&targets, "/svc.yml");
        assert!(status.restarts >= 1, "{:?}", status);
        assert!(status.last_exit.is_some());
        assert!(!status.running);
        assert_eq!(runner.state(), RunnerState::Stopped);
    }

    #[tokio::test]
    async fn grandchild_holding_output_does_not_stall_respawns() {
        let targets = targets(&[(
            "/svc.yml",
            "service: { path: /bin/sh, args: [\"-c\", \"sleep 3 & echo up; exit 3\"] }".to_string(),
        )]);
        let runner = Arc::new(Runner::new(targets.clone(), Logger::new("test")));
        let handle = tokio::spawn({
            let runner = runner.clone();
            async move { runner.run().await }
        });

        tokio::time::sleep(Duration::from_millis(1800)).await;
        let started = Instant::now();
        runner.stop().await;
        handle.await.unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));

        let status = service_status(&targets, "/svc.yml");
        assert!(status.restarts >= 2, "{:?}", status);
        assert!(!status.running);
    }

    #[tokio::test]
    async fn stop_terminates_long_running_service() {
        let targets = targets(&[("/svc.yml", "service: { path: /bin/sleep, args: [\"30\"] }".to_string())]);
        let runner = Arc::new(Runner::new(targets.clone(), Logger::new("test")));
        let handle = tokio::spawn({
            let runner = runner.clone();
            async move { runner.run().await }
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(service_status(&targets, "/svc.yml").running);

        let started = Instant::now();
        runner.stop().await;
        handle.await.unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));

        let status = service_status(&targets, "/svc.yml");
        assert!(!status.running);
        assert_eq!(status.restarts, 0);
        assert_eq!(status.last_exit.as_deref(), Some("terminated by signal 15"));
    }

    #[tokio::test]
    async fn cron_jobs_fire_on_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("ticks");
        let yaml = format!(
            "cron: {{ path: /bin/sh, args: [\"-c\", \"echo tick >> {}; echo ok 1\"], every: \"@every 1s\" }}",
            counter.display()
        );
        let targets = targets(&[("/cron.yml", yaml)]);
        let runner = Arc::new(Runner::new(targets.clone(), Logger::new("test")));
        let handle = tokio::spawn({
            let runner = runner.clone();
            async move { runner.run().await }
        });

        tokio::time::sleep(Duration::from_millis(2500)).await;
        runner.stop().await;
        handle.await.unwrap().unwrap();

        let ticks = std::fs::read_to_string(&counter).unwrap();
        assert!(ticks.lines().count() >= 1);
        match &*targets["/cron.yml"] {
            Target::CronJob(job) => assert_eq!(job.last_result().unwrap().as_ref(), b"ok 1\n"),
            _ => panic!("not a cron job"),
        }
    }
}
