//! The five target kinds behind one tagged union.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use common::error::{Error, Result};
use common::logging::Logger;

use crate::config::{Config, TargetConfig};
use crate::discover::collect_target_configs;
use crate::metrics::Metrics;

pub mod command;
pub mod cron_job;
pub mod exporter;
pub mod schedule;
pub mod script;
pub mod service;
pub mod static_file;

pub use cron_job::CronJobTarget;
pub use exporter::ExporterTarget;
pub use script::ScriptTarget;
pub use service::{ServiceStatus, ServiceTarget};
pub use static_file::StaticFileTarget;

/// Targets keyed and ordered by the path of the file that configured them.
pub type Targets = BTreeMap<String, Arc<Target>>;

#[async_trait]
pub trait Scrape {
    /// Appends this target's block to `w`. Failures become commented error
    /// blocks; nothing is ever propagated to the caller.
    async fn scrape(&self, cancel: &CancellationToken, w: &mut Vec<u8>);
}

pub enum Target {
    Exporter(ExporterTarget),
    Script(ScriptTarget),
    Service(ServiceTarget),
    CronJob(CronJobTarget),
    StaticFile(StaticFileTarget),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TargetKind {
    Exporter,
    Script,
    Service,
    CronJob,
    StaticFile,
}

impl TargetKind {
    pub const ALL: [TargetKind; 5] = [
        TargetKind::Exporter,
        TargetKind::Script,
        TargetKind::Service,
        TargetKind::CronJob,
        TargetKind::StaticFile,
    ];

    /// Short name used as a metric label.
    pub fn label(self) -> &'static str {
        match self {
            TargetKind::Exporter => "exporter",
            TargetKind::Script => "script",
            TargetKind::Service => "service",
            TargetKind::CronJob => "cron",
            TargetKind::StaticFile => "static",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetKind::Exporter => "ExporterTarget",
            TargetKind::Script => "ScriptTarget",
            TargetKind::Service => "ServiceTarget",
            TargetKind::CronJob => "CronJobTarget",
            TargetKind::StaticFile => "StaticFileTarget",
        };
        f.write_str(name)
    }
}

impl Target {
    pub fn kind(&self) -> TargetKind {
        match self {
            Target::Exporter(_) => TargetKind::Exporter,
            Target::Script(_) => TargetKind::Script,
            Target::Service(_) => TargetKind::Service,
            Target::CronJob(_) => TargetKind::CronJob,
            Target::StaticFile(_) => TargetKind::StaticFile,
        }
    }

    pub fn config_file_path(&self) -> &str {
        match self {
            Target::Exporter(t) => t.config_file_path(),
            Target::Script(t) => t.config_file_path(),
            Target::Service(t) => t.config_file_path(),
            Target::CronJob(t) => t.config_file_path(),
            Target::StaticFile(t) => t.config_file_path(),
        }
    }
}

#[async_trait]
impl Scrape for Target {
    async fn scrape(&self, cancel: &CancellationToken, w: &mut Vec<u8>) {
        match self {
            Target::Exporter(t) => t.scrape(cancel, w).await,
            Target::Script(t) => t.scrape(cancel, w).await,
            Target::Service(t) => t.scrape(cancel, w).await,
            Target::CronJob(t) => t.scrape(cancel, w).await,
            Target::StaticFile(t) => t.scrape(cancel, w).await,
        }
    }
}

/// What targets need from their generation to be built.
#[derive(Clone)]
pub struct TargetContext {
    pub client: reqwest::Client,
    pub metrics: Metrics,
    pub log: Logger,
}

/// Builds the target for one config file.
///
/// Exactly one payload must be set; none or several is an error.
pub fn new_target(config: &TargetConfig, ctx: &TargetContext) -> Result<Target> {
    let path = config.config_file_path.clone();
    let keys = config.payload_keys();
    if keys.len() > 1 {
        return Err(Error::InvalidTarget {
            path,
            reason: format!("multiple target payloads set: {}", keys.join(", ")),
        });
    }

    let log = ctx.log.clone();
    if let Some(exporter) = &config.exporter {
        return Ok(Target::Exporter(ExporterTarget::new(path, exporter, ctx.client.clone(), log)));
    }
    if let Some(script) = &config.script {
        return Ok(Target::Script(ScriptTarget::new(path, script, log)));
    }
    if let Some(service) = &config.service {
        return Ok(Target::Service(ServiceTarget::new(
            path,
            service,
            ctx.client.clone(),
            ctx.metrics.clone(),
            log,
        )));
    }
    if let Some(cron_job) = &config.cron_job {
        return Ok(Target::CronJob(CronJobTarget::new(path, cron_job, ctx.metrics.clone(), log)?));
    }
    if let Some(static_files) = &config.static_files {
        return Ok(Target::StaticFile(StaticFileTarget::new(path, static_files, log)));
    }
    Err(Error::InvalidTarget {
        path,
        reason: "no target payload set (expected one of exporter, script, service, cron, static)".to_string(),
    })
}

/// Discovers and builds every target below the config's include directories.
/// The first failure aborts the whole set.
pub fn new_targets(config: &Config, ctx: &TargetContext) -> Result<Targets> {
    let configs = collect_target_configs(&config.include_dirs)?;
    let mut targets = Targets::new();
    for (path, target_config) in configs {
        let target = new_target(&target_config, ctx)?;
        targets.insert(path, Arc::new(target));
    }
    Ok(targets)
}

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
