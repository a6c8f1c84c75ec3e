#![allow(dead_code)]

use std::fs;
use std::net::{SocketAddr, TcpListener as StdListener};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use agent::config::{Config, WebConfig};
use agent::cradle::Cradle;
use agent::metrics::Metrics;
use common::error::Result;
use common::logging::Logger;

pub fn free_port() -> u16 {
    StdListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

pub fn config(include_dir: &Path, port: u16) -> Config {
    Config {
        include_dirs: vec![include_dir.to_path_buf()],
        web: WebConfig {
            listen_address: format!("127.0.0.1:{}", port),
            ..WebConfig::default()
        },
        ..Config::default()
    }
}

pub fn write_target(include_dir: &Path, name: &str, yaml: &str) -> String {
    let path = include_dir.join(name);
    fs::write(&path, yaml).unwrap();
    path.display().to_string()
}

/// Waits until something accepts connections on `port`.
pub async fn wait_listening(port: u16) {
    for _ in 0..100 {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("nothing listening on port {}", port);
}

/// A cradle with its run loop spawned.
pub struct Running {
    pub cradle: Arc<Cradle>,
    pub port: u16,
    task: JoinHandle<Result<()>>,
}

impl Running {
    pub async fn start(config: Config) -> Running {
        let port: u16 = config
            .web
            .listen_address
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap();
        let cradle = Arc::new(Cradle::new(Metrics::new().unwrap(), Logger::new("test")).unwrap());
        cradle.reload(config).await.unwrap();
        let task = tokio::spawn({
            let cradle = cradle.clone();
            async move { cradle.run().await }
        });
        wait_listening(port).await;
        Running { cradle, port, task }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub async fn stop(self) {
        self.cradle.shutdown().await;
        tokio::time::timeout(Duration::from_secs(15), self.task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

/// Plays a remote exporter: answers every request with a fixed body.
pub struct Responder {
    pub addr: SocketAddr,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl Responder {
    pub async fn start(body: &'static str) -> Responder {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stop = CancellationToken::new();
        let task = tokio::spawn({
            let stop = stop.clone();
            async move {
                while let Some(Ok((stream, _))) = stop.run_until_cancelled(listener.accept()).await {
                    tokio::spawn(answer(stream, body));
                }
            }
        });
        Responder { addr, stop, task }
    }

    pub fn url(&self) -> String {
        format!("http://{}/metrics", self.addr)
    }

    /// Closes the listening socket; later connections are refused.
    pub async fn stop(self) {
        self.stop.cancel();
        self.task.await.unwrap();
    }
}

async fn answer(mut stream: TcpStream, body: &'static str) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}
