use std::path::Path;

use anyhow::Context;
use chrono::Utc;
use nphies_core::{paths, query, PollStore};

use crate::output::{print_json, timestamp};

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let store = open_store(root)?;
    let stats = query::get_stats(&store, Utc::now())?;

    if json {
        return print_json(&stats);
    }
    println!("Polls:      {} today, {} total", stats.polls_today, stats.total_polls);
    println!(
        "Messages:   {} today, {} total",
        stats.messages_today, stats.total_messages
    );
    println!(
        "Matched:    {} today, {} total ({:.1}%)",
        stats.matched_today, stats.total_matched, stats.match_rate_percent
    );
    match stats.last_poll_at {
        Some(at) => println!("Last poll:  {}", timestamp(at)),
        None => println!("Last poll:  never"),
    }
    Ok(())
}

/// Open the poller database, refusing to create one outside an initialized root.
pub(crate) fn open_store(root: &Path) -> anyhow::Result<PollStore> {
    if !paths::config_path(root).exists() {
        anyhow::bail!("not initialized: run `nphies init --endpoint <url>` first");
    }
    let db = paths::db_path(root);
    PollStore::open(&db).with_context(|| format!("failed to open {}", db.display()))
}
