use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use askama::Template;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use log::{debug, error};
use tokio_util::sync::CancellationToken;

use common::exposition::write_banner;
use common::logging::Logger;

use crate::config::WebConfig;
use crate::metrics::Metrics;
use crate::target::{Scrape, ServiceStatus, Target, TargetKind, Targets};

pub const SCRAPE_TIMEOUT_HEADER: &str = "X-Prometheus-Scrape-Timeout-Seconds";

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

pub type Body = Full<Bytes>;

#[derive(Template)]
#[template(path = "index.html", escape = "html")]
struct IndexPage<'a> {
    listen_address: &'a str,
    metric_path: &'a str,
    probe_path: &'a str,
    targets: Vec<IndexEntry<'a>>,
}

struct IndexEntry<'a> {
    kind: TargetKind,
    name: &'a str,
    service: Option<ServiceStatus>,
}

/// Request routing for one generation's server.
pub struct Routes {
    web: WebConfig,
    targets: Arc<Targets>,
    metrics: Metrics,
    log: Logger,
}

impl Routes {
    pub fn new(web: WebConfig, targets: Arc<Targets>, metrics: Metrics, log: Logger) -> Self {
        Self {
            web,
            targets,
            metrics,
            log,
        }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Result<Response<Body>, Infallible> {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return Ok(plain(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n"));
        }

        let path = req.uri().path();
        let response = if path == "/" {
            self.index()
        } else if path == self.web.metric_path {
            self.native_metrics()
        } else if path == self.web.probe_path {
            self.probe(req.headers()).await
        } else {
            plain(StatusCode::NOT_FOUND, "404 page not found\n")
        };
        Ok(response)
    }

    fn index(&self) -> Response<Body> {
        let targets = self
            .targets
            .iter()
            .map(|(name, target)| IndexEntry {
                kind: target.kind(),
                name,
                service: match &**target {
                    Target::Service(service) => Some(service.status()),
                    _ => None,
                },
            })
            .collect();
        let page = IndexPage {
            listen_address: &self.web.listen_address,
            metric_path: &self.web.metric_path,
            probe_path: &self.web.probe_path,
            targets,
        };

        match page.render() {
            Ok(html) => {
                let mut response = Response::new(Body::from(html));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
                response
            }
            Err(err) => {
                error!(target: self.log.target(), "failed to render index: {}", err);
                plain(StatusCode::INTERNAL_SERVER_ERROR, &format!("{}\n", err))
            }
        }
    }

    fn native_metrics(&self) -> Response<Body> {
        match self.metrics.encode() {
            Ok((body, content_type)) => {
                let mut response = Response::new(Body::from(body));
                if let Ok(value) = HeaderValue::from_str(&content_type) {
                    response.headers_mut().insert(CONTENT_TYPE, value);
                }
                response
            }
            Err(err) => {
                error!(target: self.log.target(), "failed to encode metrics: {}", err);
                plain(StatusCode::INTERNAL_SERVER_ERROR, &format!("{}\n", err))
            }
        }
    }

    /// Every target's block, each behind a banner naming its config file.
    ///
    /// The request token is cancelled when this future is dropped (the client
    /// went away) or when the collector's scrape timeout passes.
    async fn probe(&self, headers: &HeaderMap) -> Response<Body> {
        self.metrics.probe_requests.inc();
        let timer = self.metrics.probe_duration.start_timer();

        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();
        if let Some(timeout) = scrape_timeout(headers) {
            let deadline = cancel.clone();
            tokio::spawn(async move {
                if deadline.run_until_cancelled(tokio::time::sleep(timeout)).await.is_some() {
                    deadline.cancel();
                }
            });
        }

        let mut body = Vec::new();
        for (name, target) in self.targets.iter() {
            let mut block = Vec::new();
            target.scrape(&cancel, &mut block).await;
            write_banner(&mut body, name, &block);
        }
        debug!(target: self.log.target(), "probe served: targets={} bytes={}", self.targets.len(), body.len());
        timer.observe_duration();

        let mut response = Response::new(Body::from(body));
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
        response
    }
}

fn scrape_timeout(headers: &HeaderMap) -> Option<Duration> {
    let secs: f64 = headers.get(SCRAPE_TIMEOUT_HEADER)?.to_str().ok()?.trim().parse().ok()?;
    if secs <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

fn plain(status: StatusCode, text: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(text.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
    response
}
