use common::error::Result;

use async_trait::async_trait;

/// A long-running part of a generation. `run` blocks until `shutdown` has
/// been requested (or a fatal error occurs); `shutdown` may be called from
/// any task, before or during `run`.
#[async_trait]
pub trait Component: Send + Sync {
    async fn run(&self) -> Result<()>;
    async fn shutdown(&self) -> Result<()>;
}
