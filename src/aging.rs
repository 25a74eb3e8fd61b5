use crate::config::{AgingBucket, AnalysisConfig};
use crate::normalizer::reference_date;
use crate::schema::{AccountType, Transaction};
use crate::utils::safe_pct;
use chrono::{Days, NaiveDate};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const UNKNOWN_AGING_BUCKET: &str = "Unknown";

/// Buckets whose label contains this marker are not counted as overdue.
const CURRENT_MARKER: &str = "Current";

/// Length of each comparison window in the deterioration check.
const DETERIORATION_WINDOW_DAYS: u64 = 90;
/// Increase in overdue share (percentage points) that counts as deterioration.
const DETERIORATION_THRESHOLD_PCT: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgingSide {
    Receivables,
    Payables,
}

impl AgingSide {
    fn account_type(self) -> AccountType {
        match self {
            AgingSide::Receivables => AccountType::Receivable,
            AgingSide::Payables => AccountType::Payable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgingBucketSummary {
    pub aging_bucket: String,
    pub outstanding_amount: f64,
    pub item_count: usize,
    pub pct_of_total: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgingSummary {
    pub total_outstanding: f64,
    pub item_count: usize,
    pub overdue_amount: f64,
    pub overdue_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverdueItem {
    pub posting_date: NaiveDate,
    pub doc_id: String,
    pub gl_account: String,
    pub bucket: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub customer_vendor: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub days_overdue: i64,
    pub open_amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverdueParty {
    pub party: String,
    pub overdue_amount: f64,
    pub item_count: usize,
    pub max_days_overdue: i64,
    pub pct_of_total_overdue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgingDeterioration {
    pub current_overdue_pct: f64,
    pub historical_overdue_pct: f64,
    pub deterioration_pct: f64,
    pub is_deteriorating: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgingResult {
    pub as_of_date: Option<NaiveDate>,
    pub ar_aging: Vec<AgingBucketSummary>,
    pub ap_aging: Vec<AgingBucketSummary>,
    pub ar_summary: AgingSummary,
    pub ap_summary: AgingSummary,
    pub overdue_items: Vec<OverdueItem>,
    pub top_overdue_customers: Vec<OverdueParty>,
    pub top_overdue_vendors: Vec<OverdueParty>,
    pub deterioration: Option<AgingDeterioration>,
}

/// Label of the first configured bucket covering `days`, or "Unknown".
pub fn assign_bucket(buckets: &[AgingBucket], days: i64) -> &str {
    buckets
        .iter()
        .find(|b| b.contains(days))
        .map(|b| b.label.as_str())
        .unwrap_or(UNKNOWN_AGING_BUCKET)
}

pub struct AgingAnalyzer<'a> {
    transactions: &'a [Transaction],
    config: &'a AnalysisConfig,
}

impl<'a> AgingAnalyzer<'a> {
    pub fn new(transactions: &'a [Transaction], config: &'a AnalysisConfig) -> Self {
        Self {
            transactions,
            config,
        }
    }

    pub fn analyze_all(&self) -> AgingResult {
        let as_of_date = reference_date(self.transactions, self.config);
        info!(
            "[{}] Starting aging analysis as of {:?}",
            self.config.run_label, as_of_date
        );

        let (ar_aging, ar_summary) = self.analyze_side(AgingSide::Receivables);
        let (ap_aging, ap_summary) = self.analyze_side(AgingSide::Payables);
        let overdue_items = self.overdue_items();
        let top_overdue_customers = self.top_overdue(AgingSide::Receivables);
        let top_overdue_vendors = self.top_overdue(AgingSide::Payables);
        let deterioration = as_of_date.and_then(|d| aging_deterioration(self.transactions, d));

        info!(
            "[{}] Aging analysis complete: {} AR buckets, {} AP buckets, {} overdue items",
            self.config.run_label,
            ar_aging.len(),
            ap_aging.len(),
            overdue_items.len()
        );

        AgingResult {
            as_of_date,
            ar_aging,
            ap_aging,
            ar_summary,
            ap_summary,
            overdue_items,
            top_overdue_customers,
            top_overdue_vendors,
            deterioration,
        }
    }

    /// Bucket table for one side, in configured order. "Unknown" is appended
    /// only when some item fell outside every bucket.
    pub fn analyze_side(&self, side: AgingSide) -> (Vec<AgingBucketSummary>, AgingSummary) {
        let account_type = side.account_type();
        let open_items: Vec<(&Transaction, f64)> = self
            .transactions
            .iter()
            .filter(|t| t.account_type == account_type)
            .filter_map(|t| t.open_item().map(|open| (t, open)))
            .collect();

        if open_items.is_empty() {
            warn!("No open {:?} found", side);
            return (Vec::new(), AgingSummary::default());
        }

        let buckets = &self.config.aging.buckets;
        let mut totals: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
        for (t, open) in &open_items {
            let slot = totals.entry(assign_bucket(buckets, t.days_overdue)).or_default();
            slot.0 += open;
            slot.1 += 1;
        }

        let total_outstanding: f64 = open_items.iter().map(|(_, open)| open).sum();

        let mut labels: Vec<&str> = buckets.iter().map(|b| b.label.as_str()).collect();
        if totals.contains_key(UNKNOWN_AGING_BUCKET) {
            labels.push(UNKNOWN_AGING_BUCKET);
        }

        let rows: Vec<AgingBucketSummary> = labels
            .into_iter()
            .map(|label| {
                let (amount, count) = totals.get(label).copied().unwrap_or((0.0, 0));
                AgingBucketSummary {
                    aging_bucket: label.to_string(),
                    outstanding_amount: amount,
                    item_count: count,
                    pct_of_total: safe_pct(amount, total_outstanding),
                }
            })
            .collect();

        let overdue_amount: f64 = rows
            .iter()
            .filter(|r| !r.aging_bucket.contains(CURRENT_MARKER))
            .map(|r| r.outstanding_amount)
            .sum();

        let summary = AgingSummary {
            total_outstanding,
            item_count: open_items.len(),
            overdue_amount,
            overdue_pct: safe_pct(overdue_amount, total_outstanding),
        };

        info!(
            "{:?} aging analyzed: total {:.2}, overdue {:.1}%",
            side, summary.total_outstanding, summary.overdue_pct
        );

        (rows, summary)
    }

    pub fn overdue_items(&self) -> Vec<OverdueItem> {
        let mut items: Vec<OverdueItem> = self
            .transactions
            .iter()
            .filter(|t| t.is_overdue)
            .map(|t| OverdueItem {
                posting_date: t.posting_date,
                doc_id: t.doc_id.clone(),
                gl_account: t.gl_account.clone(),
                bucket: t.bucket.clone(),
                account_type: t.account_type,
                customer_vendor: t.customer_vendor.clone(),
                due_date: t.due_date,
                days_overdue: t.days_overdue,
                open_amount: t.open_amount,
            })
            .collect();
        items.sort_by(|a, b| b.days_overdue.cmp(&a.days_overdue));
        items
    }

    pub fn top_overdue(&self, side: AgingSide) -> Vec<OverdueParty> {
        let account_type = side.account_type();
        let overdue: Vec<&Transaction> = self
            .transactions
            .iter()
            .filter(|t| t.account_type == account_type && t.is_overdue)
            .collect();

        let mut grouped: BTreeMap<&str, (f64, usize, i64)> = BTreeMap::new();
        for t in &overdue {
            let slot = grouped.entry(t.party()).or_insert((0.0, 0, i64::MIN));
            slot.0 += t.open_amount.unwrap_or(0.0);
            slot.1 += 1;
            slot.2 = slot.2.max(t.days_overdue);
        }

        let total_overdue: f64 = overdue.iter().filter_map(|t| t.open_amount).sum();
        let mut parties: Vec<OverdueParty> = grouped
            .into_iter()
            .map(|(party, (amount, count, max_days))| OverdueParty {
                party: party.to_string(),
                overdue_amount: amount,
                item_count: count,
                max_days_overdue: max_days,
                pct_of_total_overdue: safe_pct(amount, total_overdue),
            })
            .collect();
        parties.sort_by(|a, b| b.overdue_amount.abs().total_cmp(&a.overdue_amount.abs()));
        parties.truncate(self.config.aging.top_n_parties);
        parties
    }
}

/// Overdue share of receivables posted in the last 90 days against those
/// posted 90 to 180 days before `as_of`. `None` when either window is empty.
pub fn aging_deterioration(transactions: &[Transaction], as_of: NaiveDate) -> Option<AgingDeterioration> {
    let recent_start = as_of.checked_sub_days(Days::new(DETERIORATION_WINDOW_DAYS))?;
    let prior_start = as_of.checked_sub_days(Days::new(2 * DETERIORATION_WINDOW_DAYS))?;

    let overdue_share = |rows: Vec<&Transaction>| -> Option<f64> {
        if rows.is_empty() {
            return None;
        }
        let overdue = rows.iter().filter(|t| t.is_overdue).count();
        Some(overdue as f64 / rows.len() as f64 * 100.0)
    };

    let receivables = transactions.iter().filter(|t| t.is_receivable);
    let current = overdue_share(
        receivables
            .clone()
            .filter(|t| t.posting_date >= recent_start)
            .collect(),
    )?;
    let historical = overdue_share(
        receivables
            .filter(|t| t.posting_date >= prior_start && t.posting_date < recent_start)
            .collect(),
    )?;

    let deterioration = current - historical;
    Some(AgingDeterioration {
        current_overdue_pct: current,
        historical_overdue_pct: historical,
        deterioration_pct: deterioration,
        is_deteriorating: deterioration > DETERIORATION_THRESHOLD_PCT,
    })
}

pub fn calculate_aging(transactions: &[Transaction], config: &AnalysisConfig) -> AgingResult {
    AgingAnalyzer::new(transactions, config).analyze_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart_of_accounts::MappingTable;
    use crate::config::default_aging_buckets;
    use crate::normalizer::normalize;
    use crate::schema::{MappingEntry, RawTransaction};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn open_item(doc: &str, gl: &str, party: &str, due: NaiveDate, open: f64) -> RawTransaction {
        let mut row = RawTransaction::new(date(2024, 1, 1), doc, gl, open);
        row.due_date = Some(due);
        row.open_amount = Some(open);
        row.customer_vendor = Some(party.to_string());
        row
    }

    fn ledger() -> Vec<Transaction> {
        let mapping = MappingTable::from_entries(vec![
            MappingEntry::new("140000", "Trade receivables", AccountType::Receivable),
            MappingEntry::new("160000", "Trade payables", AccountType::Payable),
            MappingEntry::new("400000", "Revenue", AccountType::Revenue),
        ]);
        // as of 2024-06-30
        let rows = vec![
            open_item("A1", "140000", "Acme", date(2024, 6, 30), 100.0),
            open_item("A2", "140000", "Acme", date(2024, 6, 10), 200.0),
            open_item("A3", "140000", "Globex", date(2024, 5, 1), 300.0),
            open_item("A4", "140000", "Globex", date(2024, 2, 1), 400.0),
            open_item("A5", "140000", "Initech", date(2024, 7, 15), 50.0),
            open_item("P1", "160000", "Supplier", date(2024, 4, 1), 250.0),
            RawTransaction::new(date(2024, 6, 30), "R1", "400000", 1000.0),
        ];
        normalize(&rows, &mapping, &AnalysisConfig::default())
            .unwrap()
            .transactions
    }

    #[test]
    fn test_assign_bucket_partition() {
        let buckets = default_aging_buckets();
        assert_eq!(assign_bucket(&buckets, 0), "Current");
        assert_eq!(assign_bucket(&buckets, 1), "0-30 days");
        assert_eq!(assign_bucket(&buckets, 60), "31-60 days");
        assert_eq!(assign_bucket(&buckets, 1_000), ">90 days");
        assert_eq!(assign_bucket(&buckets, -15), UNKNOWN_AGING_BUCKET);
    }

    #[test]
    fn test_receivable_buckets_keep_configured_order() {
        let txns = ledger();
        let config = AnalysisConfig::default();
        let (rows, summary) = AgingAnalyzer::new(&txns, &config).analyze_side(AgingSide::Receivables);

        let labels: Vec<&str> = rows.iter().map(|r| r.aging_bucket.as_str()).collect();
        assert_eq!(
            labels,
            vec!["Current", "0-30 days", "31-60 days", "61-90 days", ">90 days", "Unknown"]
        );

        // every open item lands in exactly one bucket
        let counted: usize = rows.iter().map(|r| r.item_count).sum();
        assert_eq!(counted, summary.item_count);
        assert_eq!(summary.item_count, 5);
        assert!((summary.total_outstanding - 1050.0).abs() < 0.01);

        assert!((rows[0].outstanding_amount - 100.0).abs() < 0.01);
        assert!((rows[1].outstanding_amount - 200.0).abs() < 0.01);
        assert!((rows[2].outstanding_amount - 300.0).abs() < 0.01);
        assert!((rows[4].outstanding_amount - 400.0).abs() < 0.01);
        assert!((rows[5].outstanding_amount - 50.0).abs() < 0.01);

        // everything except "Current"
        assert!((summary.overdue_amount - 950.0).abs() < 0.01);
    }

    #[test]
    fn test_top_overdue_customers() {
        let txns = ledger();
        let config = AnalysisConfig::default();
        let top = AgingAnalyzer::new(&txns, &config).top_overdue(AgingSide::Receivables);

        // only A3 (60 days) and A4 (150 days) exceed the 30 day threshold
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].party, "Globex");
        assert_eq!(top[0].item_count, 2);
        assert_eq!(top[0].max_days_overdue, 150);
        assert!((top[0].pct_of_total_overdue - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_overdue_items_sorted() {
        let txns = ledger();
        let config = AnalysisConfig::default();
        let items = AgingAnalyzer::new(&txns, &config).overdue_items();
        let days: Vec<i64> = items.iter().map(|i| i.days_overdue).collect();
        assert_eq!(days, vec![150, 90, 60]);
    }

    #[test]
    fn test_deterioration_needs_both_windows() {
        let txns = ledger();
        // all receivables were posted on 2024-01-01, more than 90 days before
        assert!(aging_deterioration(&txns, date(2024, 6, 30)).is_none());
    }

    #[test]
    fn test_deterioration_detected() {
        let mapping = MappingTable::from_entries(vec![
            MappingEntry::new("140000", "Trade receivables", AccountType::Receivable),
            MappingEntry::new("400000", "Revenue", AccountType::Revenue),
        ]);
        let mut recent = open_item("A1", "140000", "Acme", date(2024, 5, 1), 100.0);
        recent.posting_date = Some(date(2024, 6, 1));
        let mut prior = open_item("A2", "140000", "Acme", date(2024, 6, 30), 100.0);
        prior.posting_date = Some(date(2024, 2, 1));
        let rows = vec![
            recent,
            prior,
            RawTransaction::new(date(2024, 6, 30), "R1", "400000", 10.0),
        ];
        let txns = normalize(&rows, &mapping, &AnalysisConfig::default())
            .unwrap()
            .transactions;

        let result = aging_deterioration(&txns, date(2024, 6, 30)).unwrap();
        assert!((result.current_overdue_pct - 100.0).abs() < 0.01);
        assert!(result.historical_overdue_pct.abs() < 0.01);
        assert!(result.is_deteriorating);
    }
}
