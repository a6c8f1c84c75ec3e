use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid config {path}: {message}")]
    Config { path: String, message: String },
    #[error("invalid target config {path}: {reason}")]
    InvalidTarget { path: String, reason: String },
    #[error("invalid schedule {expr:?}: {reason}")]
    Schedule { expr: String, reason: String },
    #[error("tls: {0}")]
    Tls(String),
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("http: {0}")]
    Http(String),
    #[error("metrics: {0}")]
    Metrics(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("cancelled")]
    Cancelled,
    #[error("closed")]
    Closed,
}

impl Error {
    pub fn config(path: impl Into<String>, message: impl ToString) -> Self {
        Error::Config {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
