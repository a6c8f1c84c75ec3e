//! HTTP(S) listener of one generation.

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use common::error::{Error, Result};
use common::logging::Logger;

use crate::common::component::Component;
use crate::config::WebConfig;
use crate::metrics::Metrics;
use crate::target::{lock, Targets};

pub mod routes;
pub mod tls;

use routes::Routes;

pub struct Server {
    address: String,
    listener: Mutex<Option<StdTcpListener>>,
    tls: Option<TlsAcceptor>,
    routes: Arc<Routes>,
    shutdown: CancellationToken,
    connections: TaskTracker,
    log: Logger,
}

impl Server {
    /// Binds the listen address and prepares TLS. Bad TLS material and an
    /// unusable address both fail here, so a broken reload is rejected before
    /// anything changes.
    ///
    /// `inherited` is the socket of the previous generation when it listens on
    /// the same address; both generations then accept from one socket.
    pub fn new(
        web: &WebConfig,
        inherited: Option<StdTcpListener>,
        targets: Arc<Targets>,
        metrics: Metrics,
        log: Logger,
    ) -> Result<Self> {
        let tls = tls::server_config(web)?.map(TlsAcceptor::from);
        let address = web.bind_address();
        let listener = match inherited {
            Some(listener) => listener,
            None => bind(&address)?,
        };
        let routes = Routes::new(web.clone(), targets, metrics, log.clone());
        Ok(Self {
            address,
            listener: Mutex::new(Some(listener)),
            tls,
            routes: Arc::new(routes),
            shutdown: CancellationToken::new(),
            connections: TaskTracker::new(),
            log,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// A second handle on the bound socket, `None` once shut down.
    pub fn share_listener(&self) -> Result<Option<StdTcpListener>> {
        match lock(&self.listener).as_ref() {
            Some(listener) => Ok(Some(listener.try_clone()?)),
            None => Ok(None),
        }
    }

    /// Serves until `shutdown`.
    pub async fn run(&self) -> Result<()> {
        let listener = match self.share_listener()? {
            Some(listener) if !self.shutdown.is_cancelled() => TcpListener::from_std(listener)?,
            _ => return Ok(()),
        };
        info!(target: self.log.target(), "listening: address={} tls={}", self.address, self.tls.is_some());

        loop {
            let accepted = match self.shutdown.run_until_cancelled(listener.accept()).await {
                Some(accepted) => accepted,
                None => break,
            };
            match accepted {
                Ok((stream, peer)) => self.serve_connection(stream, peer),
                Err(err) => {
                    warn!(target: self.log.target(), "Error accepting connection: {}", err);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }

        drop(listener);
        info!(target: self.log.target(), "listener closed: address={}", self.address);
        Ok(())
    }

    /// Closes the listener; open connections finish their in-flight request.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        lock(&self.listener).take();
    }

    /// Waits up to `timeout` for every connection to close. Returns whether
    /// they all did.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.connections.close();
        tokio::time::timeout(timeout, self.connections.wait()).await.is_ok()
    }

    fn serve_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let tls = self.tls.clone();
        let routes = self.routes.clone();
        let shutdown = self.shutdown.clone();
        let log = self.log.clone();

        self.connections.spawn(async move {
            match tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => serve_http(TokioIo::new(stream), routes, shutdown, &log, peer).await,
                    Err(err) => warn!(target: log.target(), "TLS handshake failed: peer={} err={}", peer, err),
                },
                None => serve_http(TokioIo::new(stream), routes, shutdown, &log, peer).await,
            }
        });
    }
}

fn bind(address: &str) -> Result<StdTcpListener> {
    let listener = StdTcpListener::bind(address).map_err(|source| Error::Bind {
        addr: address.to_string(),
        source,
    })?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

async fn serve_http<I>(io: I, routes: Arc<Routes>, shutdown: CancellationToken, log: &Logger, peer: SocketAddr)
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let service = service_fn(move |req| {
        let routes = routes.clone();
        async move { routes.handle(req).await }
    });
    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };
    if let Err(err) = result {
        debug!(target: log.target(), "Error serving connection: peer={} err={}", peer, err);
    }
}

#[async_trait]
impl Component for Server {
    async fn run(&self) -> Result<()> {
        Server::run(self).await
    }

    async fn shutdown(&self) -> Result<()> {
        Server::shutdown(self);
        Ok(())
    }
}
