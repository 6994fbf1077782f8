use std::path::Path;

use super::stats::open_store;
use crate::output::print_json;

/// Finalize a run a crashed process left in progress.
pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let store = open_store(root)?;
    let recovered = store.startup_recovery()?;
    if json {
        print_json(&serde_json::json!({ "recovered": recovered }))?;
    } else if recovered == 0 {
        println!("No interrupted runs.");
    } else {
        println!("Recovered {recovered} interrupted run(s).");
    }
    Ok(())
}
