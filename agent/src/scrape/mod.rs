//! Remote endpoint scraping shared by exporter and service targets.

pub mod scrape;

pub use scrape::{error_chain, new_client, scrape_endpoint, SCRAPING_TARGET};
