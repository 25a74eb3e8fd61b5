use crate::error::{LedgerError, Result};
use crate::schema::{AccountType, MappingEntry};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable GL account classification, keyed by `gl_account`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingTable {
    entries: BTreeMap<String, MappingEntry>,
}

impl MappingTable {
    /// Builds the table, keeping the first entry for any duplicated account.
    pub fn from_entries(entries: impl IntoIterator<Item = MappingEntry>) -> Self {
        let mut map = BTreeMap::new();
        for entry in entries {
            let key = entry.gl_account.trim().to_string();
            if map.contains_key(&key) {
                warn!("Duplicate mapping for GL account {}, keeping the first", key);
                continue;
            }
            map.insert(key, entry);
        }
        Self { entries: map }
    }

    pub fn lookup(&self, gl_account: &str) -> Option<&MappingEntry> {
        self.entries.get(gl_account.trim())
    }

    pub fn contains(&self, gl_account: &str) -> bool {
        self.lookup(gl_account).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &MappingEntry> {
        self.entries.values()
    }

    pub fn by_type(&self) -> BTreeMap<AccountType, Vec<&MappingEntry>> {
        let mut grouped: BTreeMap<AccountType, Vec<&MappingEntry>> = BTreeMap::new();
        for entry in self.entries.values() {
            grouped.entry(entry.account_type).or_default().push(entry);
        }
        grouped
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(
            &self.entries.values().collect::<Vec<_>>(),
        )?)
    }

    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
        writer.write_record(["gl_account", "bucket", "type", "entity", "notes", "statement_tag"])?;

        for entry in self.entries.values() {
            writer.write_record([
                entry.gl_account.as_str(),
                entry.bucket.as_str(),
                entry.account_type.as_str(),
                entry.entity.as_deref().unwrap_or(""),
                entry.notes.as_deref().unwrap_or(""),
                entry.statement_tag.as_deref().unwrap_or(""),
            ])?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| LedgerError::IoError(e.into_error()))?;
        Ok(String::from_utf8(bytes)?)
    }

    pub fn to_markdown(&self) -> String {
        let mut output = String::new();

        output.push_str("# Account Mapping\n\n");
        output.push_str(&format!("**Accounts:** {}\n\n", self.len()));

        for (account_type, entries) in self.by_type() {
            output.push_str(&format!("## {}\n\n", account_type));
            for entry in entries {
                let tag = entry
                    .statement_tag
                    .as_deref()
                    .map(|t| format!(" _({})_", t))
                    .unwrap_or_default();
                output.push_str(&format!("- `{}` {}{}\n", entry.gl_account, entry.bucket, tag));
            }
            output.push('\n');
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::load_mapping_csv;

    fn sample_table() -> MappingTable {
        MappingTable::from_entries(vec![
            MappingEntry::new("400000", "Revenue - Products", AccountType::Revenue),
            MappingEntry::new("600000", "Rent", AccountType::Opex)
                .with_statement_tag("Operating expenses"),
            MappingEntry::new("400000", "Duplicate", AccountType::Other),
            MappingEntry::new("140000", "Trade debtors, domestic", AccountType::Receivable),
        ])
    }

    #[test]
    fn test_duplicates_keep_first() {
        let table = sample_table();
        assert_eq!(table.len(), 3);
        assert_eq!(table.lookup("400000").unwrap().bucket, "Revenue - Products");
        assert!(table.contains(" 600000 "));
        assert!(!table.contains("999999"));
    }

    #[test]
    fn test_group_by_type() {
        let table = sample_table();
        let grouped = table.by_type();
        assert_eq!(grouped[&AccountType::Revenue].len(), 1);
        assert!(!grouped.contains_key(&AccountType::Other));
    }

    #[test]
    fn test_mapping_to_csv() {
        let csv = sample_table().to_csv().unwrap();
        assert!(csv.starts_with("gl_account,bucket,type"));
        assert!(csv.contains("600000,Rent,OPEX,,,Operating expenses"));
        assert!(csv.contains("\"Trade debtors, domestic\""));
    }

    #[test]
    fn test_csv_export_reloads_multiline_fields() {
        let table = MappingTable::from_entries(vec![
            MappingEntry::new("400000", "Sales\nDomestic", AccountType::Revenue),
            MappingEntry::new("600000", "Rent", AccountType::Opex),
        ]);
        let csv = table.to_csv().unwrap();

        let reloaded = load_mapping_csv(csv.as_bytes()).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.lookup("400000").unwrap().bucket, "Sales\nDomestic");
        assert_eq!(reloaded.lookup("600000").unwrap().account_type, AccountType::Opex);
    }

    #[test]
    fn test_mapping_to_markdown() {
        let markdown = sample_table().to_markdown();
        assert!(markdown.contains("# Account Mapping"));
        assert!(markdown.contains("## OPEX"));
        assert!(markdown.contains("_(Operating expenses)_"));
    }
}
