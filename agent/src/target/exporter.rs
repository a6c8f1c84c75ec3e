use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use common::logging::Logger;

use crate::config::ExporterConfig;
use crate::scrape::scrape_endpoint;
use crate::target::Scrape;

/// Remote exporters scraped over HTTP, one block per endpoint.
pub struct ExporterTarget {
    config_file_path: String,
    endpoints: Vec<String>,
    client: reqwest::Client,
    log: Logger,
}

impl ExporterTarget {
    pub fn new(config_file_path: String, config: &ExporterConfig, client: reqwest::Client, log: Logger) -> Self {
        Self {
            config_file_path,
            endpoints: config.endpoints.clone(),
            client,
            log,
        }
    }

    pub fn config_file_path(&self) -> &str {
        &self.config_file_path
    }
}

#[async_trait]
impl Scrape for ExporterTarget {
    async fn scrape(&self, cancel: &CancellationToken, w: &mut Vec<u8>) {
        for endpoint in &self.endpoints {
            scrape_endpoint(&self.client, &self.log, cancel, w, &self.config_file_path, endpoint).await;
        }
    }
}
