//! The orchestrator: owns the active generation and swaps it on reload.
//!
//! A generation is one immutable `{config, targets, server, runner}` record
//! behind a single atomic reference. Request handlers and run loops load it
//! once and keep using that snapshot, so nothing ever observes a mix of two
//! generations.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use log::{error, info, warn};
use tokio::sync::{watch, Mutex};

use common::error::{Error, Result};
use common::logging::Logger;

use crate::common::component::Component;
use crate::config::Config;
use crate::metrics::Metrics;
use crate::runner::Runner;
use crate::scrape::new_client;
use crate::server::Server;
use crate::target::{new_targets, TargetContext, TargetKind, Targets};

/// How long a final shutdown waits for open connections.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Generation {
    pub id: u64,
    pub config: Config,
    pub targets: Arc<Targets>,
    pub server: Arc<Server>,
    pub runner: Arc<Runner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CradleState {
    Unconfigured,
    Active,
    ShuttingDown,
    Halted,
}

pub struct Cradle {
    current: ArcSwapOption<Generation>,
    next_id: AtomicU64,
    halted: AtomicBool,
    state: watch::Sender<CradleState>,
    reload_lock: Mutex<()>,
    client: reqwest::Client,
    metrics: Metrics,
    log: Logger,
}

impl Cradle {
    pub fn new(metrics: Metrics, log: Logger) -> Result<Self> {
        let (state, _) = watch::channel(CradleState::Unconfigured);
        Ok(Self {
            current: ArcSwapOption::empty(),
            next_id: AtomicU64::new(1),
            halted: AtomicBool::new(false),
            state,
            reload_lock: Mutex::new(()),
            client: new_client()?,
            metrics,
            log,
        })
    }

    pub fn current(&self) -> Option<Arc<Generation>> {
        self.current.load_full()
    }

    pub fn state(&self) -> CradleState {
        *self.state.borrow()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Validates that every target of `config` can be built. Nothing is
    /// started or installed.
    pub fn check(&self, config: &Config) -> Result<()> {
        new_targets(config, &self.target_context()).map(|_| ())
    }

    /// Builds a new generation from `config` and installs it. Targets, TLS
    /// material and the listen socket are all set up before the swap; on any
    /// failure the active generation is left untouched and keeps serving.
    pub async fn reload(&self, config: Config) -> Result<()> {
        let _serial = self.reload_lock.lock().await;
        if self.halted.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        let generation = match self.build(config) {
            Ok(generation) => generation,
            Err(err) => {
                error!(target: self.log.target(), "Failed to load config. Nothing reloaded: {}", err);
                self.metrics.reloads.with_label_values(&["failure"]).inc();
                return Err(err);
            }
        };
        let id = generation.id;
        let target_count = generation.targets.len();
        self.record_targets(&generation.targets);

        let previous = self.current.swap(Some(Arc::new(generation)));
        self.state.send_replace(CradleState::Active);
        self.metrics.reloads.with_label_values(&["success"]).inc();
        info!(target: self.log.target(), "generation installed: id={} targets={}", id, target_count);

        if let Some(previous) = previous {
            previous.server.shutdown();
            previous.runner.stop().await;
            info!(target: self.log.target(), "previous generation stopped: id={}", previous.id);
        }
        Ok(())
    }

    /// Runs the server and the runner of whichever generation is installed,
    /// switching to the new instances after every reload. Returns once
    /// `shutdown` has been called and both have stopped.
    pub async fn run(&self) -> Result<()> {
        tokio::join!(
            self.run_component("server", |g| g.server.clone()),
            self.run_component("runner", |g| g.runner.clone()),
        );
        Ok(())
    }

    /// Stops the current server and runner for good and waits (bounded) for
    /// open connections to finish.
    pub async fn shutdown(&self) {
        let _serial = self.reload_lock.lock().await;
        if self.halted.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.send_replace(CradleState::ShuttingDown);
        info!(target: self.log.target(), "shutting down");

        if let Some(generation) = self.current.load_full() {
            generation.server.shutdown();
            generation.runner.stop().await;
            if !generation.server.drain(DRAIN_TIMEOUT).await {
                warn!(target: self.log.target(), "connections still open after {:?}", DRAIN_TIMEOUT);
            }
        }
        self.state.send_replace(CradleState::Halted);
        info!(target: self.log.target(), "halted");
    }

    fn build(&self, config: Config) -> Result<Generation> {
        let targets = Arc::new(new_targets(&config, &self.target_context())?);
        let inherited = match self.current.load_full() {
            Some(previous) if previous.server.address() == config.web.bind_address() => {
                previous.server.share_listener()?
            }
            _ => None,
        };
        let server = Server::new(
            &config.web,
            inherited,
            targets.clone(),
            self.metrics.clone(),
            self.log.scoped("server"),
        )?;
        let runner = Runner::new(targets.clone(), self.log.scoped("runner"));
        Ok(Generation {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            config,
            targets,
            server: Arc::new(server),
            runner: Arc::new(runner),
        })
    }

    fn target_context(&self) -> TargetContext {
        TargetContext {
            client: self.client.clone(),
            metrics: self.metrics.clone(),
            log: self.log.scoped("target"),
        }
    }

    fn record_targets(&self, targets: &Targets) {
        let mut counts: BTreeMap<TargetKind, i64> = TargetKind::ALL.iter().map(|k| (*k, 0)).collect();
        for target in targets.values() {
            *counts.entry(target.kind()).or_default() += 1;
        }
        for (kind, count) in counts {
            self.metrics.targets.with_label_values(&[kind.label()]).set(count);
        }
    }

    async fn run_component<F, C>(&self, name: &str, pick: F)
    where
        F: Fn(&Generation) -> Arc<C>,
        C: Component + ?Sized,
    {
        let mut changes = self.state.subscribe();
        let mut last_run = None;

        while !self.halted.load(Ordering::SeqCst) {
            changes.borrow_and_update();
            let pending = self
                .current
                .load_full()
                .filter(|g| last_run != Some(g.id))
                .map(|g| (g.id, pick(g.as_ref())));

            if let Some((id, component)) = pending {
                last_run = Some(id);
                if let Err(err) = component.run().await {
                    error!(target: self.log.target(), "Failed to run {}: generation={} err={}", name, id, err);
                }
                continue;
            }
            if changes.changed().await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::net::TcpListener as StdListener;
    use std::path::Path;

    use crate::config::WebConfig;
    use crate::runner::RunnerState;

    fn free_port() -> u16 {
        StdListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
    }

    fn config(include_dir: &Path) -> Config {
        Config {
            include_dirs: vec![include_dir.to_path_buf()],
            web: WebConfig {
                listen_address: format!("127.0.0.1:{}", free_port()),
                ..WebConfig::default()
            },
            ..Config::default()
        }
    }

    fn cradle() -> Cradle {
        Cradle::new(Metrics::new().unwrap(), Logger::new("test")).unwrap()
    }

    #[tokio::test]
    async fn failed_reload_keeps_active_generation() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yml"), "static: { paths: [] }\n").unwrap();
        let cradle = cradle();
        cradle.reload(config(dir.path())).await.unwrap();
        let before = cradle.current().unwrap();

        fs::write(dir.path().join("b.yml"), "{}\n").unwrap();
        assert!(cradle.reload(config(dir.path())).await.is_err());

        let after = cradle.current().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(cradle.state(), CradleState::Active);
        assert_eq!(cradle.metrics().reloads.with_label_values(&["failure"]).get(), 1);
    }

    #[tokio::test]
    async fn identical_reloads_install_equivalent_generations() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yml"), "static: { paths: [] }\n").unwrap();
        fs::write(dir.path().join("b.yml"), "script: { path: /bin/true }\n").unwrap();
        let cradle = cradle();
        let config = config(dir.path());

        cradle.reload(config.clone()).await.unwrap();
        let first = cradle.current().unwrap();
        cradle.reload(config).await.unwrap();
        let second = cradle.current().unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(first.config, second.config);
        assert_eq!(
            first.targets.keys().collect::<Vec<_>>(),
            second.targets.keys().collect::<Vec<_>>()
        );
        assert_eq!(first.runner.state(), RunnerState::Stopped);
        assert_eq!(cradle.metrics().targets.with_label_values(&["static"]).get(), 1);
    }

    #[tokio::test]
    async fn check_installs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yml"), "static: { paths: [] }\n").unwrap();
        let cradle = cradle();
        cradle.check(&config(dir.path())).unwrap();
        assert!(cradle.current().is_none());
        assert_eq!(cradle.state(), CradleState::Unconfigured);

        fs::write(dir.path().join("bad.yml"), "unknown: {}\n").unwrap();
        assert!(cradle.check(&config(dir.path())).is_err());
    }

    #[tokio::test]
    async fn shutdown_stops_server_and_runner() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("svc.yml"), "service: { path: /bin/sleep, args: [\"30\"] }\n").unwrap();
        let cradle = Arc::new(cradle());
        cradle.reload(config(dir.path())).await.unwrap();

        let running = tokio::spawn({
            let cradle = cradle.clone();
            async move { cradle.run().await }
        });
        tokio::time::sleep(Duration::from_millis(300)).await;

        cradle.shutdown().await;
        tokio::time::timeout(Duration::from_secs(10), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let generation = cradle.current().unwrap();
        assert_eq!(generation.runner.state(), RunnerState::Stopped);
        assert_eq!(cradle.state(), CradleState::Halted);
        assert!(matches!(cradle.reload(config(dir.path())).await, Err(Error::Closed)));
    }
}
