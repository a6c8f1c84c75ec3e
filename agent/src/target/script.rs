use async_trait::async_trait;
use log::warn;
use tokio_util::sync::CancellationToken;

use common::exposition::BlockHeader;
use common::logging::Logger;

use crate::config::ScriptConfig;
use crate::target::command::{run_to_completion, CommandSpec};
use crate::target::Scrape;

pub const SCRIPT_FILE_TARGET: &str = "Script File Target";

/// A command executed on every scrape; its stdout is the payload.
pub struct ScriptTarget {
    config_file_path: String,
    command: CommandSpec,
    log: Logger,
}

impl ScriptTarget {
    pub fn new(config_file_path: String, config: &ScriptConfig, log: Logger) -> Self {
        Self {
            config_file_path,
            command: CommandSpec::new(config.path.clone(), config.args.clone()),
            log,
        }
    }

    pub fn config_file_path(&self) -> &str {
        &self.config_file_path
    }
}

#[async_trait]
impl Scrape for ScriptTarget {
    async fn scrape(&self, cancel: &CancellationToken, w: &mut Vec<u8>) {
        let header = BlockHeader::new(SCRIPT_FILE_TARGET).field("Config", &self.config_file_path);

        match run_to_completion(&self.command, cancel).await {
            Ok(stdout) => header.write_payload(w, &stdout),
            Err(err) => {
                warn!(target: self.log.target(), "Failed to execute script: config-file-path={} err={}", self.config_file_path, err);
                header.write_error(w, "Failed to execute script", &err);
            }
        }
    }
}
