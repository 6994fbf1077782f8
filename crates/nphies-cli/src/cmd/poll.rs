use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use nphies_core::{config::Config, query::TriggerResponse, types::TriggerType, Poller};

use crate::output::{cell, print_json, print_table};

/// Run one manual poll in the foreground. Ctrl-C cancels the run, which is
/// still finalized before the process exits.
pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let rt = tokio::runtime::Runtime::new()?;
    let run = rt
        .block_on(async {
            let poller = Arc::new(Poller::from_config(root, &config)?);
            let watcher = {
                let poller = Arc::clone(&poller);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        poller.cancel();
                    }
                })
            };
            let run = poller.trigger(TriggerType::Manual).await;
            watcher.abort();
            run
        })
        .context("poll could not run")?;

    let response = TriggerResponse::from_run(&run);
    if json {
        print_json(&response)?;
    } else {
        println!("Poll #{} [{}]", response.poll_log_id, response.status);
        println!("{}", response.message);
        if !response.messages.is_empty() {
            println!();
            let rows = response
                .messages
                .iter()
                .map(|m| {
                    vec![
                        m.resource_type.clone(),
                        m.message_type.to_string(),
                        cell(m.event_code.as_deref()),
                        cell(m.matched_table),
                        cell(m.matched_record_id),
                        cell(m.match_strategy),
                    ]
                })
                .collect();
            print_table(
                &["RESOURCE", "TYPE", "EVENT", "TABLE", "RECORD", "STRATEGY"],
                rows,
            );
        }
    }

    if !response.success {
        anyhow::bail!("poll #{} ended with status {}", response.poll_log_id, response.status);
    }
    Ok(())
}
