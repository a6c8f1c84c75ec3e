//! Logging capability handed to components.
//!
//! The sink is whatever `log` backend the binary installs. Components only get
//! a named scope and log through `target: log.target()`, so they never decide
//! on their own where or under which name their records go.

use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct Logger {
    target: Arc<str>,
}

impl Logger {
    pub fn new(target: &str) -> Self {
        Self {
            target: Arc::from(target),
        }
    }

    /// Derives a child scope, e.g. `cradle_exporter` -> `cradle_exporter::runner`.
    pub fn scoped(&self, name: &str) -> Self {
        Self::new(&format!("{}::{}", self.target, name))
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Logger").field(&&*self.target).finish()
    }
}
