//! CSV loaders for the account mapping and the ledger export.

use crate::chart_of_accounts::MappingTable;
use crate::error::{LedgerError, Result};
use crate::schema::{AccountType, MappingEntry, RawTransaction};
use crate::utils::{parse_amount, parse_ledger_date};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;

pub const MAPPING_REQUIRED_COLUMNS: [&str; 3] = ["gl_account", "bucket", "type"];
pub const LEDGER_REQUIRED_COLUMNS: [&str; 4] = ["posting_date", "doc_id", "gl_account", "amount"];

/// Renames source headers to canonical column names, e.g.
/// `"Posting Date" -> "posting_date"`. Headers not listed pass through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub renames: BTreeMap<String, String>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rename(mut self, source: &str, canonical: &str) -> Self {
        self.renames.insert(source.to_string(), canonical.to_string());
        self
    }

    fn canonical<'a>(&'a self, header: &'a str) -> &'a str {
        self.renames
            .get(header)
            .map(String::as_str)
            .unwrap_or(header)
    }
}

struct HeaderIndex {
    columns: BTreeMap<String, usize>,
}

impl HeaderIndex {
    fn build(headers: &csv::StringRecord, renames: &ColumnMapping) -> Self {
        let columns = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (renames.canonical(h.trim()).to_string(), i))
            .collect();
        Self { columns }
    }

    fn require(&self, required: &[&str], source_name: &str) -> Result<()> {
        let missing: Vec<String> = required
            .iter()
            .filter(|c| !self.columns.contains_key(**c))
            .map(|c| c.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(LedgerError::MissingColumns {
                source_name: source_name.to_string(),
                missing,
            })
        }
    }

    fn has(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    fn get<'r>(&self, record: &'r csv::StringRecord, column: &str) -> Option<&'r str> {
        let idx = self.columns.get(column)?;
        record.get(*idx).map(str::trim).filter(|v| !v.is_empty())
    }
}

fn reader_for<R: Read>(source: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(source)
}

/// Loads the GL classification table.
///
/// Rows with an empty required field are dropped, duplicates keep the first
/// occurrence and unknown `type` labels fall back to `Other`.
pub fn load_mapping_csv<R: Read>(source: R) -> Result<MappingTable> {
    let mut reader = reader_for(source);
    let index = HeaderIndex::build(reader.headers()?, &ColumnMapping::default());
    index.require(&MAPPING_REQUIRED_COLUMNS, "mapping")?;

    let mut entries = Vec::new();
    let mut dropped = 0usize;

    for record in reader.records() {
        let record = record?;
        let (Some(gl), Some(bucket), Some(type_label)) = (
            index.get(&record, "gl_account"),
            index.get(&record, "bucket"),
            index.get(&record, "type"),
        ) else {
            dropped += 1;
            continue;
        };

        let account_type = AccountType::from_label(type_label).unwrap_or_else(|| {
            warn!(
                "Unknown account type '{}' for GL account {}, treating as Other",
                type_label, gl
            );
            AccountType::Other
        });

        entries.push(MappingEntry {
            gl_account: gl.to_string(),
            bucket: bucket.to_string(),
            account_type,
            entity: index.get(&record, "entity").map(str::to_string),
            notes: index.get(&record, "notes").map(str::to_string),
            statement_tag: index.get(&record, "statement_tag").map(str::to_string),
        });
    }

    if dropped > 0 {
        warn!("Dropped {} mapping rows with empty required fields", dropped);
    }

    let table = MappingTable::from_entries(entries);
    info!("Loaded mapping with {} GL accounts", table.len());
    Ok(table)
}

/// Loads a ledger export.
///
/// Unparsable posting dates or amounts are kept as `None` so that the
/// validator can count them. When the export has no `open_amount` column the
/// full amount is treated as open.
pub fn load_transactions_csv<R: Read>(
    source: R,
    columns: &ColumnMapping,
) -> Result<Vec<RawTransaction>> {
    let mut reader = reader_for(source);
    let index = HeaderIndex::build(reader.headers()?, columns);
    index.require(&LEDGER_REQUIRED_COLUMNS, "ledger")?;

    let has_open_amount = index.has("open_amount");
    if !has_open_amount {
        info!("open_amount column not found, using amount as open_amount");
    }

    let mut rows = Vec::new();
    let mut bad_dates = 0usize;
    let mut bad_amounts = 0usize;

    for (line, record) in reader.records().enumerate() {
        let record = record?;

        let posting_date = match index.get(&record, "posting_date") {
            Some(raw) => match parse_ledger_date(raw) {
                Ok(date) => Some(date),
                Err(e) => {
                    debug!("Row {}: {}", line + 1, e);
                    bad_dates += 1;
                    None
                }
            },
            None => {
                bad_dates += 1;
                None
            }
        };

        let amount = index.get(&record, "amount").and_then(parse_amount);
        if amount.is_none() {
            bad_amounts += 1;
        }

        let open_amount = if has_open_amount {
            index.get(&record, "open_amount").and_then(parse_amount)
        } else {
            amount
        };

        rows.push(RawTransaction {
            posting_date,
            doc_id: index.get(&record, "doc_id").unwrap_or_default().to_string(),
            gl_account: index.get(&record, "gl_account").unwrap_or_default().to_string(),
            amount,
            currency: index.get(&record, "currency").map(str::to_uppercase),
            customer_vendor: index.get(&record, "customer_vendor").map(str::to_string),
            due_date: index
                .get(&record, "due_date")
                .and_then(|raw| parse_ledger_date(raw).ok()),
            open_amount,
            company_code: index.get(&record, "company_code").map(str::to_string),
            posting_text: index.get(&record, "posting_text").map(str::to_string),
        });
    }

    if bad_dates > 0 {
        warn!("Found {} rows with invalid posting_date", bad_dates);
    }
    if bad_amounts > 0 {
        warn!("Found {} rows with invalid amount", bad_amounts);
    }

    rows.sort_by_key(|r| r.posting_date);
    info!("Loaded {} ledger rows", rows.len());
    Ok(rows)
}
