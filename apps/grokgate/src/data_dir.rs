use std::path::{Path, PathBuf};

use anyhow::Context;

pub(crate) const DEFAULT_DATA_DIR: &str = "./data";

pub(crate) fn resolve_data_dir(cli_value: Option<&str>) -> PathBuf {
    match cli_value.map(str::trim) {
        Some(value) if !value.is_empty() => PathBuf::from(value),
        _ => PathBuf::from(DEFAULT_DATA_DIR),
    }
}

/// Creates the data directory up front so a bad path fails at startup
/// instead of on the first status write.
pub(crate) fn prepare_data_dir(dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create data dir {}", dir.display()))
}
