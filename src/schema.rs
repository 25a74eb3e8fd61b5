use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account classification carried by a mapping entry.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema,
)]
pub enum AccountType {
    #[schemars(description = "Sales of goods or services")]
    Revenue,

    #[serde(rename = "OPEX")]
    #[schemars(description = "Operating expenses other than payroll")]
    Opex,

    #[schemars(description = "Salaries, wages and related charges")]
    Payroll,

    #[schemars(description = "Interest income or expense")]
    Interest,

    #[schemars(description = "Open items owed by customers (AR)")]
    Receivable,

    #[schemars(description = "Open items owed to vendors (AP)")]
    Payable,

    #[schemars(description = "Anything else, including unmapped accounts")]
    Other,
}

impl AccountType {
    pub const ALL: [AccountType; 7] = [
        AccountType::Revenue,
        AccountType::Opex,
        AccountType::Payroll,
        AccountType::Interest,
        AccountType::Receivable,
        AccountType::Payable,
        AccountType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Revenue => "Revenue",
            AccountType::Opex => "OPEX",
            AccountType::Payroll => "Payroll",
            AccountType::Interest => "Interest",
            AccountType::Receivable => "Receivable",
            AccountType::Payable => "Payable",
            AccountType::Other => "Other",
        }
    }

    /// Case-insensitive lookup of the labels used in mapping spreadsheets.
    pub fn from_label(label: &str) -> Option<Self> {
        let needle = label.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(needle))
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the GL account classification table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct MappingEntry {
    #[schemars(description = "General ledger account identifier (unique key)")]
    pub gl_account: String,

    #[schemars(description = "Human readable reporting bucket, e.g. 'Revenue - Product A'")]
    pub bucket: String,

    #[serde(rename = "type")]
    pub account_type: AccountType,

    #[serde(default)]
    pub entity: Option<String>,

    #[serde(default)]
    pub notes: Option<String>,

    #[serde(default)]
    #[schemars(
        description = "Financial-statement category tag (ABCOTD), e.g. 'Cash and cash equivalents'. Drives balance sheet synthesis."
    )]
    pub statement_tag: Option<String>,
}

impl MappingEntry {
    pub fn new(gl_account: &str, bucket: &str, account_type: AccountType) -> Self {
        Self {
            gl_account: gl_account.to_string(),
            bucket: bucket.to_string(),
            account_type,
            entity: None,
            notes: None,
            statement_tag: None,
        }
    }

    pub fn with_statement_tag(mut self, tag: &str) -> Self {
        self.statement_tag = Some(tag.to_string());
        self
    }
}

/// A ledger row as it arrives from an export, before any cleaning.
///
/// Posting date and amount are optional here so that unparsable cells can be
/// counted by the validator instead of aborting the load.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawTransaction {
    pub posting_date: Option<NaiveDate>,
    pub doc_id: String,
    pub gl_account: String,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub customer_vendor: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub open_amount: Option<f64>,
    pub company_code: Option<String>,
    pub posting_text: Option<String>,
}

impl RawTransaction {
    pub fn new(posting_date: NaiveDate, doc_id: &str, gl_account: &str, amount: f64) -> Self {
        Self {
            posting_date: Some(posting_date),
            doc_id: doc_id.to_string(),
            gl_account: gl_account.to_string(),
            amount: Some(amount),
            ..Default::default()
        }
    }
}

/// Calendar month key used for all monthly aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self::new(self.year + 1, 1)
        } else {
            Self::new(self.year, self.month + 1)
        }
    }

    /// Number of months from `self` to `other` (negative when `other` is earlier).
    pub fn months_until(&self, other: &YearMonth) -> i32 {
        (other.year - self.year) * 12 + other.month as i32 - self.month as i32
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl From<YearMonth> for String {
    fn from(value: YearMonth) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for YearMonth {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        let (year, month) = value
            .split_once('-')
            .ok_or_else(|| format!("Expected YYYY-MM, got '{}'", value))?;
        let year: i32 = year.parse().map_err(|_| format!("Invalid year in '{}'", value))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("Invalid month in '{}'", value))?;
        if !(1..=12).contains(&month) {
            return Err(format!("Month out of range in '{}'", value));
        }
        Ok(Self { year, month })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct YearQuarter {
    pub year: i32,
    pub quarter: u32,
}

impl fmt::Display for YearQuarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}Q{}", self.year, self.quarter)
    }
}

impl From<YearQuarter> for String {
    fn from(value: YearQuarter) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for YearQuarter {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        let (year, quarter) = value
            .split_once('Q')
            .ok_or_else(|| format!("Expected YYYYQn, got '{}'", value))?;
        let year: i32 = year.parse().map_err(|_| format!("Invalid year in '{}'", value))?;
        let quarter: u32 = quarter
            .parse()
            .map_err(|_| format!("Invalid quarter in '{}'", value))?;
        if !(1..=4).contains(&quarter) {
            return Err(format!("Quarter out of range in '{}'", value));
        }
        Ok(Self { year, quarter })
    }
}

/// Canonical ledger row produced by the normalizer. Every analytics engine
/// reads only this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub posting_date: NaiveDate,
    pub doc_id: String,
    pub gl_account: String,
    pub amount: f64,
    pub currency: String,
    pub customer_vendor: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub open_amount: Option<f64>,
    pub company_code: Option<String>,

    // Classification
    pub bucket: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub entity_mapped: Option<String>,
    pub statement_tag: Option<String>,
    pub is_mapped: bool,

    // Temporal
    pub year: i32,
    pub month: u32,
    pub quarter: u32,
    pub year_month: YearMonth,
    pub year_quarter: YearQuarter,
    /// Monday = 0
    pub day_of_week: u32,
    /// ISO week number
    pub week_of_year: u32,

    // Type flags
    pub is_receivable: bool,
    pub is_payable: bool,
    pub is_revenue: bool,
    pub is_opex: bool,
    pub is_payroll: bool,

    // Overdue
    pub days_overdue: i64,
    pub is_overdue: bool,
}

impl Transaction {
    /// Open amount that is present and non-zero.
    pub fn open_item(&self) -> Option<f64> {
        self.open_amount.filter(|v| *v != 0.0)
    }

    pub fn party(&self) -> &str {
        self.customer_vendor.as_deref().unwrap_or("Unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_type_labels() {
        assert_eq!(AccountType::from_label("opex"), Some(AccountType::Opex));
        assert_eq!(AccountType::from_label(" Revenue "), Some(AccountType::Revenue));
        assert_eq!(AccountType::from_label("Equity"), None);

        let json = serde_json::to_string(&AccountType::Opex).unwrap();
        assert_eq!(json, "\"OPEX\"");
    }

    #[test]
    fn test_year_month_ordering_and_format() {
        let dec = YearMonth::new(2023, 12);
        let jan = dec.next();
        assert_eq!(jan, YearMonth::new(2024, 1));
        assert!(dec < jan);
        assert_eq!(jan.to_string(), "2024-01");
        assert_eq!(dec.months_until(&YearMonth::new(2024, 12)), 12);

        let parsed = YearMonth::try_from("2024-03".to_string()).unwrap();
        assert_eq!(parsed, YearMonth::new(2024, 3));
        assert!(YearMonth::try_from("2024-13".to_string()).is_err());
    }

    #[test]
    fn test_mapping_entry_deserializes_type_field() {
        let json = r#"{"gl_account":"400000","bucket":"Revenue","type":"Revenue"}"#;
        let entry: MappingEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.account_type, AccountType::Revenue);
        assert!(entry.statement_tag.is_none());
    }
}
