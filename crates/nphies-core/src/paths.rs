use std::path::{Path, PathBuf};

pub const NPHIES_DIR: &str = ".nphies";
pub const CONFIG_FILE: &str = ".nphies/config.yaml";
pub const DB_FILE: &str = ".nphies/poller.db";

pub fn nphies_dir(root: &Path) -> PathBuf {
    root.join(NPHIES_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn db_path(root: &Path) -> PathBuf {
    root.join(DB_FILE)
}
