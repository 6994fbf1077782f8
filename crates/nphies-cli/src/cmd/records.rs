use std::path::Path;

use chrono::NaiveDate;
use clap::Subcommand;
use nphies_core::store::NewRecord;
use nphies_core::types::{BusinessTable, RecordStatus};

use super::stats::open_store;
use crate::output::{cell, print_json, print_table, timestamp};

// ---------------------------------------------------------------------------
// Subcommand definition
// ---------------------------------------------------------------------------

#[derive(Subcommand, Debug)]
pub enum RecordsSubcommand {
    /// Register a local business record so inbound responses can match it
    Add {
        /// prior_authorizations, claim_submissions, advanced_authorizations,
        /// communications or eligibility_checks
        table: BusinessTable,
        /// Id of the outbound request this record was sent as
        #[arg(long)]
        correlation_id: Option<String>,
        /// Payer-assigned business identifier
        #[arg(long)]
        business_id: Option<String>,
        #[arg(long, requires_all = ["provider", "service_date"])]
        patient: Option<String>,
        #[arg(long, requires_all = ["patient", "service_date"])]
        provider: Option<String>,
        /// YYYY-MM-DD
        #[arg(long, requires_all = ["patient", "provider"])]
        service_date: Option<NaiveDate>,
        #[arg(long, default_value = "pending")]
        status: RecordStatus,
    },
    /// List records in a table, newest first
    List {
        table: BusinessTable,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Cancel a record; later responses for it are refused
    Cancel { table: BusinessTable, id: i64 },
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: RecordsSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        RecordsSubcommand::Add {
            table,
            correlation_id,
            business_id,
            patient,
            provider,
            service_date,
            status,
        } => {
            let mut record = match correlation_id {
                Some(corr) => NewRecord::awaiting(table, corr),
                None => NewRecord::uncorrelated(table),
            }
            .with_status(status);
            if let Some(business_id) = business_id {
                record = record.with_business_id(business_id);
            }
            if let (Some(p), Some(prov), Some(date)) = (patient, provider, service_date) {
                record = record.with_counterparts(p, prov, date);
            }
            add(root, &record, json)
        }
        RecordsSubcommand::List { table, limit } => list(root, table, limit, json),
        RecordsSubcommand::Cancel { table, id } => cancel(root, table, id, json),
    }
}

fn add(root: &Path, record: &NewRecord, json: bool) -> anyhow::Result<()> {
    let store = open_store(root)?;
    let id = store.insert_record(record)?;
    if json {
        print_json(&store.get_record(record.table, id)?)?;
    } else {
        println!("Added {} #{id}", record.table);
    }
    Ok(())
}

fn list(root: &Path, table: BusinessTable, limit: usize, json: bool) -> anyhow::Result<()> {
    let store = open_store(root)?;
    let records = store.list_records(table, limit)?;
    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No {table} records.");
        return Ok(());
    }
    let rows = records
        .iter()
        .map(|r| {
            vec![
                r.id.to_string(),
                r.status.to_string(),
                cell(r.correlation_id.as_deref()),
                cell(r.business_id.as_deref()),
                cell(r.patient_id.as_deref()),
                cell(r.service_date),
                if r.created_by_poll { "poll" } else { "local" }.to_string(),
                timestamp(r.updated_at),
            ]
        })
        .collect();
    print_table(
        &["ID", "STATUS", "CORRELATION", "BUSINESS ID", "PATIENT", "SERVICE", "ORIGIN", "UPDATED"],
        rows,
    );
    Ok(())
}

fn cancel(root: &Path, table: BusinessTable, id: i64, json: bool) -> anyhow::Result<()> {
    let store = open_store(root)?;
    store.cancel_record(table, id)?;
    if json {
        print_json(&store.get_record(table, id)?)?;
    } else {
        println!("Cancelled {table} #{id}");
    }
    Ok(())
}
