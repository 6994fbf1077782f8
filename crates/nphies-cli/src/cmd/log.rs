use std::path::Path;

use nphies_core::query;

use super::stats::open_store;
use crate::output::{cell, print_json, print_table, timestamp};

pub fn run(root: &Path, id: i64, json: bool) -> anyhow::Result<()> {
    let store = open_store(root)?;
    let detail = query::get_log(&store, id)?;

    if json {
        return print_json(&detail);
    }
    let log = &detail.log;
    println!("Poll #{} [{}] {}", log.id, log.status, log.trigger_type);
    println!("Started:   {}", timestamp(log.started_at));
    if let Some(finished) = log.finished_at {
        println!("Finished:  {} ({}ms)", timestamp(finished), cell(log.duration_ms));
    }
    println!(
        "Messages:  {} received, {} matched, {} unmatched, {} errored",
        log.messages_received, log.messages_matched, log.messages_unmatched, log.messages_errored
    );
    for e in &log.errors {
        println!("Error:     {}: {}", e.code, e.detail);
    }

    if !detail.messages.is_empty() {
        println!();
        let rows = detail
            .messages
            .iter()
            .map(|m| {
                vec![
                    m.entry_index.to_string(),
                    m.resource_type.clone(),
                    m.message_type.to_string(),
                    m.processing_status.to_string(),
                    cell(m.matched_table),
                    cell(m.matched_record_id),
                    cell(m.match_strategy),
                    cell(m.processing_error.as_deref()),
                ]
            })
            .collect();
        print_table(
            &["#", "RESOURCE", "TYPE", "STATUS", "TABLE", "RECORD", "STRATEGY", "ERROR"],
            rows,
        );

        println!();
        let rows = detail
            .processing_summary
            .iter()
            .map(|(resource, s)| {
                vec![
                    resource.clone(),
                    s.matched.to_string(),
                    s.new_records.to_string(),
                    s.unmatched.to_string(),
                    s.errors.to_string(),
                ]
            })
            .collect();
        print_table(&["RESOURCE", "MATCHED", "NEW", "UNMATCHED", "ERRORS"], rows);
    }
    Ok(())
}
