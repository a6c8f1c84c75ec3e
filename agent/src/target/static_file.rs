use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::warn;
use tokio_util::sync::CancellationToken;

use common::exposition::BlockHeader;
use common::logging::Logger;

use crate::config::StaticFileConfig;
use crate::discover::resolve_link;
use crate::target::Scrape;

pub const STATIC_FILE_TARGET: &str = "Static File Target";

const MAX_SYMLINK_HOPS: usize = 40;

/// Files (or directory trees of files) whose contents are served as is.
pub struct StaticFileTarget {
    config_file_path: Arc<str>,
    paths: Arc<[PathBuf]>,
    log: Logger,
}

impl StaticFileTarget {
    pub fn new(config_file_path: String, config: &StaticFileConfig, log: Logger) -> Self {
        Self {
            config_file_path: Arc::from(config_file_path),
            paths: Arc::from(config.paths.clone()),
            log,
        }
    }

    pub fn config_file_path(&self) -> &str {
        &self.config_file_path
    }
}

#[async_trait]
impl Scrape for StaticFileTarget {
    async fn scrape(&self, _cancel: &CancellationToken, w: &mut Vec<u8>) {
        let walker = Walker {
            config_file_path: self.config_file_path.clone(),
            log: self.log.clone(),
        };
        let paths = self.paths.clone();
        let job = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            for path in paths.iter() {
                walker.scrape_path(&mut out, path, 0);
            }
            out
        });

        match job.await {
            Ok(out) => w.extend_from_slice(&out),
            Err(err) => {
                warn!(target: self.log.target(), "static file scrape aborted: config-file-path={} err={}", self.config_file_path, err);
                BlockHeader::new(STATIC_FILE_TARGET)
                    .field("Config", &self.config_file_path)
                    .write_error(w, "Failed to read files", &err);
            }
        }
    }
}

struct Walker {
    config_file_path: Arc<str>,
    log: Logger,
}

impl Walker {
    fn scrape_path(&self, w: &mut Vec<u8>, path: &Path, hops: usize) {
        let display = path.display().to_string();
        let header = BlockHeader::new(STATIC_FILE_TARGET)
            .field("Path", &display)
            .field("Config", &self.config_file_path);

        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(err) => return header.write_error(w, "Failed to lstat file", &err),
        };
        let file_type = meta.file_type();

        if file_type.is_symlink() {
            if hops >= MAX_SYMLINK_HOPS {
                return header.write_error(w, "Failed to eval symlink", &"too many levels of symbolic links");
            }
            match resolve_link(path) {
                Ok(resolved) => self.scrape_path(w, &resolved, hops + 1),
                Err(err) => header.write_error(w, "Failed to eval symlink", &err),
            }
            return;
        }

        if file_type.is_file() {
            let mut file = match File::open(path) {
                Ok(file) => file,
                Err(err) => return header.write_error(w, "Failed to open file", &err),
            };
            let mut buf = Vec::with_capacity(meta.len() as usize);
            if let Err(err) = file.read_to_end(&mut buf) {
                header.write_error(w, "Failed to read file", &err);
            }
            if buf.len() as u64 != meta.len() {
                warn!(target: self.log.target(), "Failed to copy all contents of the file: path={} size={} written={}", display, meta.len(), buf.len());
            }
            header.write_payload(w, &buf);
            return;
        }

        if file_type.is_dir() {
            match sorted_entries(path) {
                Ok(entries) => {
                    for entry in entries {
                        self.scrape_path(w, &entry, hops);
                    }
                }
                Err(err) => header.write_error(w, "Failed to read directory", &err),
            }
            return;
        }

        let kind = describe_file_type(&file_type);
        warn!(target: self.log.target(), "Unknown file type: path={} type={}", display, kind);
        header
            .field("FileType", &kind)
            .write_error(w, "Unknown file type", &format!("{} is not a regular file", display));
    }
}

fn sorted_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

fn describe_file_type(file_type: &fs::FileType) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if file_type.is_fifo() {
            return "named pipe".to_string();
        }
        if file_type.is_socket() {
            return "socket".to_string();
        }
        if file_type.is_block_device() {
            return "block device".to_string();
        }
        if file_type.is_char_device() {
            return "character device".to_string();
        }
    }
    format!("{:?}", file_type)
}
