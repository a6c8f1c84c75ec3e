//! Native metrics of the exporter itself, served on the metric path.
//!
//! One registry lives for the whole process; reloads swap targets but keep
//! counting into the same series.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

use common::error::{Error, Result};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub probe_requests: IntCounter,
    pub probe_duration: Histogram,
    pub reloads: IntCounterVec,
    pub service_restarts: IntCounterVec,
    pub service_last_exit_code: IntGaugeVec,
    pub service_up: IntGaugeVec,
    pub cron_job_runs: IntCounterVec,
    pub targets: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let probe_requests = IntCounter::new(
            "cradle_probe_requests_total",
            "Requests served on the probe path",
        )
        .map_err(metrics_err)?;
        let probe_duration = Histogram::with_opts(HistogramOpts::new(
            "cradle_probe_duration_seconds",
            "Time spent producing the composite probe response",
        ))
        .map_err(metrics_err)?;
        let reloads = IntCounterVec::new(
            Opts::new("cradle_reloads_total", "Configuration reloads by result"),
            &["result"],
        )
        .map_err(metrics_err)?;
        let service_restarts = IntCounterVec::new(
            Opts::new(
                "cradle_service_restarts_total",
                "Times a supervised service was respawned",
            ),
            &["config"],
        )
        .map_err(metrics_err)?;
        let service_last_exit_code = IntGaugeVec::new(
            Opts::new(
                "cradle_service_last_exit_code",
                "Exit code of the last service exit, -1 when killed by a signal",
            ),
            &["config"],
        )
        .map_err(metrics_err)?;
        let service_up = IntGaugeVec::new(
            Opts::new("cradle_service_up", "Whether the supervised service is running"),
            &["config"],
        )
        .map_err(metrics_err)?;
        let cron_job_runs = IntCounterVec::new(
            Opts::new("cradle_cron_job_runs_total", "Cron job executions by result"),
            &["config", "result"],
        )
        .map_err(metrics_err)?;
        let targets = IntGaugeVec::new(
            Opts::new("cradle_targets", "Targets of the active configuration by kind"),
            &["kind"],
        )
        .map_err(metrics_err)?;

        registry.register(Box::new(probe_requests.clone())).map_err(metrics_err)?;
        registry.register(Box::new(probe_duration.clone())).map_err(metrics_err)?;
        registry.register(Box::new(reloads.clone())).map_err(metrics_err)?;
        registry.register(Box::new(service_restarts.clone())).map_err(metrics_err)?;
        registry.register(Box::new(service_last_exit_code.clone())).map_err(metrics_err)?;
        registry.register(Box::new(service_up.clone())).map_err(metrics_err)?;
        registry.register(Box::new(cron_job_runs.clone())).map_err(metrics_err)?;
        registry.register(Box::new(targets.clone())).map_err(metrics_err)?;

        #[cfg(target_os = "linux")]
        registry
            .register(Box::new(prometheus::process_collector::ProcessCollector::for_self()))
            .map_err(metrics_err)?;

        Ok(Self {
            registry,
            probe_requests,
            probe_duration,
            reloads,
            service_restarts,
            service_last_exit_code,
            service_up,
            cron_job_runs,
            targets,
        })
    }

    /// Renders every registered family in the text exposition format.
    pub fn encode(&self) -> Result<(Vec<u8>, String)> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf).map_err(metrics_err)?;
        Ok((buf, encoder.format_type().to_string()))
    }
}

fn metrics_err(err: prometheus::Error) -> Error {
    Error::Metrics(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_registered_families() {
        let metrics = Metrics::new().unwrap();
        metrics.probe_requests.inc();
        metrics.reloads.with_label_values(&["success"]).inc();
        metrics.service_up.with_label_values(&["/etc/svc.yml"]).set(1);

        let (body, content_type) = metrics.encode().unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("cradle_probe_requests_total 1"));
        assert!(text.contains("cradle_reloads_total{result=\"success\"} 1"));
        assert!(text.contains("cradle_service_up{config=\"/etc/svc.yml\"} 1"));
    }
}
