use std::path::Path;

use nphies_core::query;

use super::stats::open_store;
use crate::output::{cell, print_json, print_table, timestamp};

pub fn run(root: &Path, page: usize, limit: usize, json: bool) -> anyhow::Result<()> {
    let store = open_store(root)?;
    let logs = query::get_logs(&store, page, limit)?;

    if json {
        return print_json(&logs);
    }
    if logs.logs.is_empty() {
        println!("No poll runs recorded.");
        return Ok(());
    }
    let rows = logs
        .logs
        .iter()
        .map(|l| {
            vec![
                l.id.to_string(),
                l.trigger_type.to_string(),
                timestamp(l.started_at),
                l.status.to_string(),
                l.messages_received.to_string(),
                l.messages_matched.to_string(),
                l.messages_unmatched.to_string(),
                l.messages_errored.to_string(),
                cell(l.duration_ms),
            ]
        })
        .collect();
    print_table(
        &[
            "ID", "TRIGGER", "STARTED", "STATUS", "RECV", "MATCHED", "UNMATCHED", "ERRORS", "MS",
        ],
        rows,
    );
    println!("\npage {} of {} ({} runs)", logs.page, logs.total_pages.max(1), logs.total);
    Ok(())
}
