pub mod common;
pub mod config;
pub mod cradle;
pub mod discover;
pub mod logger;
pub mod metrics;
pub mod runner;
pub mod scrape;
pub mod server;
pub mod target;
