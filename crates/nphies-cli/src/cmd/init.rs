use anyhow::Context;
use nphies_core::{config::Config, io, paths, PollStore};
use std::path::Path;

pub fn run(root: &Path, endpoint: Option<&str>, interval_secs: Option<u64>) -> anyhow::Result<()> {
    println!("Initializing NPHIES poller in: {}", root.display());

    let dir = paths::nphies_dir(root);
    io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    if paths::config_path(root).exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
    } else {
        let endpoint = endpoint.context("--endpoint is required on first init")?;
        let mut config = Config::new(endpoint);
        config.schedule.interval_secs = interval_secs;
        for w in config.validate() {
            println!("  warning: {}", w.message);
        }
        config.save(root).context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    }

    let db = paths::db_path(root);
    let existed = db.exists();
    PollStore::open(&db).with_context(|| format!("failed to open {}", db.display()))?;
    if existed {
        println!("  exists:  {}", paths::DB_FILE);
    } else {
        println!("  created: {}", paths::DB_FILE);
    }

    println!("\nNext: nphies poll   (or: nphies serve)");
    Ok(())
}
