use std::error::Error as StdError;
use std::time::Duration;

use log::{debug, error, warn};
use tokio_util::sync::CancellationToken;
use url::Url;

use common::error::{Error, Result};
use common::exposition::BlockHeader;
use common::logging::Logger;

pub const SCRAPING_TARGET: &str = "Scraping Target";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client shared by every endpoint scrape of one generation.
pub fn new_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("cradle_exporter/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| Error::Http(error_chain(&e)))
}

/// Scrapes one remote endpoint into `w`.
///
/// Never fails: request, transport and body errors are written as a commented
/// error block so the surrounding composite output stays usable. A body that
/// breaks off early is still forwarded after its error block.
pub async fn scrape_endpoint(
    client: &reqwest::Client,
    log: &Logger,
    cancel: &CancellationToken,
    w: &mut Vec<u8>,
    config_file_path: &str,
    endpoint: &str,
) {
    let header = BlockHeader::new(SCRAPING_TARGET)
        .field("URL", endpoint)
        .field("Config", config_file_path);

    let url = match Url::parse(endpoint) {
        Ok(url) => url,
        Err(err) => {
            error!(target: log.target(), "Failed to create request: config-file-path={} endpoint={} err={}", config_file_path, endpoint, err);
            header.write_error(w, "Failed to create request", &err);
            return;
        }
    };

    debug!(target: log.target(), "scraping endpoint={}", endpoint);
    let mut response = match cancel.run_until_cancelled(client.get(url).send()).await {
        Some(Ok(response)) => response,
        Some(Err(err)) => {
            let err = Error::Http(error_chain(&err));
            error!(target: log.target(), "Failed to execute request: config-file-path={} endpoint={} err={}", config_file_path, endpoint, err);
            header.write_error(w, "Failed to execute request", &err);
            return;
        }
        None => {
            warn!(target: log.target(), "Request cancelled: config-file-path={} endpoint={}", config_file_path, endpoint);
            header.write_error(w, "Failed to execute request", &Error::Cancelled);
            return;
        }
    };

    let content_length = response.content_length();
    let mut body = Vec::new();
    let read = loop {
        match cancel.run_until_cancelled(response.chunk()).await {
            Some(Ok(Some(chunk))) => body.extend_from_slice(&chunk),
            Some(Ok(None)) => break Ok(()),
            Some(Err(err)) => break Err(Error::Http(error_chain(&err))),
            None => break Err(Error::Cancelled),
        }
    };
    // Drops the connection if the body was not read to the end.
    drop(response);

    if let Err(err) = read {
        error!(target: log.target(), "Failed to read response body: config-file-path={} endpoint={} err={}", config_file_path, endpoint, err);
        header.write_error(w, "Failed to read response body", &err);
    }
    if let Some(declared) = content_length {
        if declared != body.len() as u64 {
            warn!(
                target: log.target(),
                "Body length does not match to content-length header: config-file-path={} endpoint={} written={} content-length={}",
                config_file_path, endpoint, body.len(), declared
            );
        }
    }
    header.write_payload(w, &body);
}

/// Flattens an error and its sources into one line.
pub fn error_chain(err: &dyn StdError) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    async fn read_request(stream: &mut TcpStream) {
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }
    }

    /// Answers one request with `response` verbatim and closes.
    async fn answer_once(response: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_request(&mut stream).await;
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        });
        addr
    }

    /// Reads the request and never answers. Reports when the client hangs up.
    async fn never_answer() -> (SocketAddr, oneshot::Receiver<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (hung_up, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_request(&mut stream).await;
            let mut buf = [0u8; 64];
            while let Ok(n) = stream.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
            let _ = hung_up.send(());
        });
        (addr, rx)
    }

    async fn scrape(cancel: &CancellationToken, endpoint: &str) -> String {
        let client = new_client().unwrap();
        let mut out = Vec::new();
        scrape_endpoint(&client, &Logger::new("test"), cancel, &mut out, "/etc/e.yml", endpoint).await;
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn copies_the_body_behind_a_header() {
        let addr = answer_once("HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nup 1\n").await;
        let url = format!("http://{}/metrics", addr);
        let text = scrape(&CancellationToken::new(), &url).await;
        assert_eq!(
            text,
            format!("### Scraping Target\n### URL: {}\n### Config: /etc/e.yml\nup 1\n", url)
        );
    }

    #[tokio::test]
    async fn unparsable_url_is_an_error_block() {
        let text = scrape(&CancellationToken::new(), "not a url").await;
        assert!(text.starts_with("### Scraping Target\n### Err: Failed to create request\n"), "{}", text);
        assert!(text.lines().all(|l| l.starts_with("###")));
    }

    #[tokio::test]
    async fn short_body_is_reported_and_still_forwarded() {
        let addr = answer_once("HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\nup 1\n").await;
        let text = scrape(&CancellationToken::new(), &format!("http://{}/metrics", addr)).await;
        assert!(text.contains("### Err: Failed to read response body\n"), "{}", text);
        assert!(text.ends_with("up 1\n"), "{}", text);
    }

    #[tokio::test]
    async fn cancelled_request_is_abandoned() {
        let (addr, hung_up) = never_answer().await;
        let cancel = CancellationToken::new();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                cancel.cancel();
            }
        });

        let text = scrape(&cancel, &format!("http://{}/metrics", addr)).await;
        assert!(text.contains("### Err: Failed to execute request\n"), "{}", text);
        assert!(text.ends_with("### cancelled\n"), "{}", text);

        tokio::time::timeout(Duration::from_secs(5), hung_up).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn already_cancelled_token_skips_the_request() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let text = scrape(&cancel, "http://127.0.0.1:9/metrics").await;
        assert!(text.contains("### Err: Failed to execute request\n"), "{}", text);
        assert!(text.ends_with("### cancelled\n"), "{}", text);
    }

    #[test]
    fn error_chain_joins_sources() {
        let err = Error::Bind {
            addr: "127.0.0.1:1".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(error_chain(&err), "failed to listen on 127.0.0.1:1: in use: in use");
    }
}
