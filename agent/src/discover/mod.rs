//! Target discovery from include directories.
//!
//! Every non-directory entry below an include directory is one target config.
//! Symlinks (the include directory itself or an entry) are followed one level;
//! the resolved path becomes the target's identity.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use common::error::{Error, Result};

use crate::config::TargetConfig;

pub type TargetConfigs = BTreeMap<String, TargetConfig>;

pub fn collect_target_configs(include_dirs: &[PathBuf]) -> Result<TargetConfigs> {
    let mut configs = TargetConfigs::new();
    for dir in include_dirs {
        collect_from_dir(dir, &mut configs)?;
    }
    Ok(configs)
}

fn collect_from_dir(dir: &Path, dst: &mut TargetConfigs) -> Result<()> {
    let mut dir = dir.to_path_buf();
    let mut meta = fs::symlink_metadata(&dir).map_err(|e| config_err(&dir, e))?;
    if meta.file_type().is_symlink() {
        dir = read_link_once(&dir)?;
        meta = fs::symlink_metadata(&dir).map_err(|e| config_err(&dir, e))?;
    }
    if !meta.is_dir() {
        return Err(config_err(&dir, "config dir is not a directory"));
    }
    walk(&dir, dst)
}

fn walk(dir: &Path, dst: &mut TargetConfigs) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| config_err(dir, e))?
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| config_err(dir, e))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let mut path = entry.path();
        let file_type = entry.file_type().map_err(|e| config_err(&path, e))?;
        if file_type.is_dir() {
            walk(&path, dst)?;
            continue;
        }
        if file_type.is_symlink() {
            path = read_link_once(&path)?;
        }
        let config = TargetConfig::from_file(&path)?;
        dst.insert(config.config_file_path.clone(), config);
    }
    Ok(())
}

fn read_link_once(path: &Path) -> Result<PathBuf> {
    resolve_link(path).map_err(|e| config_err(path, e))
}

/// Follows exactly one level of symlink. Relative links resolve against the
/// link's own directory.
pub(crate) fn resolve_link(path: &Path) -> io::Result<PathBuf> {
    let target = fs::read_link(path)?;
    if target.is_absolute() {
        return Ok(target);
    }
    Ok(path.parent().map(|p| p.join(&target)).unwrap_or(target))
}

fn config_err(path: &Path, message: impl ToString) -> Error {
    Error::config(path.display().to_string(), message)
}
