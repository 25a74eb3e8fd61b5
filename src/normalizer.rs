//! Joins the raw feed with the account mapping and derives the canonical
//! [`Transaction`] rows every engine consumes.

use crate::chart_of_accounts::MappingTable;
use crate::config::{AnalysisConfig, SignConvention};
use crate::error::{LedgerError, Result};
use crate::schema::{AccountType, RawTransaction, Transaction, YearQuarter};
use crate::utils::{quarter_of, year_month_of};
use chrono::{Datelike, Days, NaiveDate};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const UNMAPPED_BUCKET: &str = "Unmapped";

/// Days added to the posting date when an item carries no due date.
pub const SYNTHETIC_PAYMENT_TERMS_DAYS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationOutcome {
    pub transactions: Vec<Transaction>,
    pub as_of_date: NaiveDate,
    pub mapped_count: usize,
    pub unmapped_count: usize,
    pub unmapped_pct: f64,
    /// Rows whose overdue days were computed from posting date + 30 days.
    pub used_synthetic_due_dates: usize,
    /// Raw rows dropped for lacking a posting date or amount.
    pub skipped_rows: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmappedAccount {
    pub gl_account: String,
    pub transaction_count: usize,
    pub total_amount: f64,
}

pub struct Normalizer<'a> {
    mapping: &'a MappingTable,
    config: &'a AnalysisConfig,
}

impl<'a> Normalizer<'a> {
    pub fn new(mapping: &'a MappingTable, config: &'a AnalysisConfig) -> Self {
        Self { mapping, config }
    }

    pub fn normalize(&self, raw: &[RawTransaction]) -> Result<NormalizationOutcome> {
        let label = &self.config.run_label;
        info!("[{}] Starting normalization of {} rows", label, raw.len());

        let usable: Vec<(NaiveDate, f64, &RawTransaction)> = raw
            .iter()
            .filter_map(|t| Some((t.posting_date?, t.amount?, t)))
            .collect();
        let skipped_rows = raw.len() - usable.len();
        if skipped_rows > 0 {
            warn!(
                "[{}] Skipping {} rows without posting date or amount",
                label, skipped_rows
            );
        }

        let as_of_date = match self.config.as_of_date {
            Some(date) => date,
            None => usable
                .iter()
                .map(|(date, _, _)| *date)
                .max()
                .ok_or(LedgerError::EmptyFeed)?,
        };
        debug!("[{}] Overdue reference date: {}", label, as_of_date);

        let mut warnings = Vec::new();
        let mut synthetic = 0usize;
        let mut transactions = Vec::with_capacity(usable.len());

        for (posting_date, amount, row) in usable {
            let (amount, open_amount) = self.apply_sign(amount, row.open_amount);
            let mut txn = self.classify(posting_date, amount, open_amount, row);

            let due_date = match row.due_date {
                Some(due) => due,
                None => {
                    synthetic += 1;
                    posting_date
                        .checked_add_days(Days::new(SYNTHETIC_PAYMENT_TERMS_DAYS))
                        .unwrap_or(posting_date)
                }
            };
            txn.days_overdue = (as_of_date - due_date).num_days();
            txn.is_overdue = txn.days_overdue > self.config.overdue_threshold_days
                && txn.open_item().is_some();

            transactions.push(txn);
        }

        if synthetic > 0 {
            let message = format!(
                "{} rows have no due date; using posting date + {} days",
                synthetic, SYNTHETIC_PAYMENT_TERMS_DAYS
            );
            warn!("[{}] {}", label, message);
            warnings.push(message);
        }

        let unmapped_count = transactions.iter().filter(|t| !t.is_mapped).count();
        let mapped_count = transactions.len() - unmapped_count;
        let unmapped_pct = if transactions.is_empty() {
            0.0
        } else {
            unmapped_count as f64 / transactions.len() as f64 * 100.0
        };
        if unmapped_count > 0 {
            let message = format!(
                "{} rows ({:.1}%) are not covered by the account mapping",
                unmapped_count, unmapped_pct
            );
            warn!("[{}] {}", label, message);
            warnings.push(message);
        }

        let overdue = transactions.iter().filter(|t| t.is_overdue).count();
        info!(
            "[{}] Normalization complete: {} rows, {} mapped, {} overdue (threshold {} days)",
            label,
            transactions.len(),
            mapped_count,
            overdue,
            self.config.overdue_threshold_days
        );

        Ok(NormalizationOutcome {
            transactions,
            as_of_date,
            mapped_count,
            unmapped_count,
            unmapped_pct,
            used_synthetic_due_dates: synthetic,
            skipped_rows,
            warnings,
        })
    }

    fn apply_sign(&self, amount: f64, open_amount: Option<f64>) -> (f64, Option<f64>) {
        match self.config.sign_convention {
            SignConvention::PositiveDebit => (amount, open_amount),
            SignConvention::PositiveCredit => (-amount, open_amount.map(|v| -v)),
        }
    }

    fn classify(
        &self,
        posting_date: NaiveDate,
        amount: f64,
        open_amount: Option<f64>,
        row: &RawTransaction,
    ) -> Transaction {
        let gl_account = row.gl_account.trim().to_string();
        let entry = self.mapping.lookup(&gl_account);

        let (bucket, account_type, entity_mapped, statement_tag) = match entry {
            Some(e) => (
                e.bucket.clone(),
                e.account_type,
                e.entity.clone(),
                e.statement_tag.clone(),
            ),
            None => (UNMAPPED_BUCKET.to_string(), AccountType::Other, None, None),
        };

        let month = posting_date.month();
        let quarter = quarter_of(month);

        Transaction {
            posting_date,
            doc_id: row.doc_id.clone(),
            gl_account,
            amount,
            currency: row
                .currency
                .clone()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| self.config.default_currency.clone()),
            customer_vendor: row.customer_vendor.clone().filter(|p| !p.trim().is_empty()),
            due_date: row.due_date,
            open_amount,
            company_code: row.company_code.clone(),
            bucket,
            account_type,
            entity_mapped,
            statement_tag,
            is_mapped: entry.is_some(),
            year: posting_date.year(),
            month,
            quarter,
            year_month: year_month_of(posting_date),
            year_quarter: YearQuarter {
                year: posting_date.year(),
                quarter,
            },
            day_of_week: posting_date.weekday().num_days_from_monday(),
            week_of_year: posting_date.iso_week().week(),
            is_receivable: account_type == AccountType::Receivable,
            is_payable: account_type == AccountType::Payable,
            is_revenue: account_type == AccountType::Revenue,
            is_opex: account_type == AccountType::Opex,
            is_payroll: account_type == AccountType::Payroll,
            days_overdue: 0,
            is_overdue: false,
        }
    }
}

pub fn normalize(
    raw: &[RawTransaction],
    mapping: &MappingTable,
    config: &AnalysisConfig,
) -> Result<NormalizationOutcome> {
    Normalizer::new(mapping, config).normalize(raw)
}

/// The configured as-of date, or the latest posting date of the feed.
pub fn reference_date(transactions: &[Transaction], config: &AnalysisConfig) -> Option<NaiveDate> {
    config
        .as_of_date
        .or_else(|| transactions.iter().map(|t| t.posting_date).max())
}

/// Unmapped GL accounts with their row counts and totals, largest absolute
/// total first.
pub fn unmapped_summary(transactions: &[Transaction]) -> Vec<UnmappedAccount> {
    let mut grouped: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    for t in transactions.iter().filter(|t| !t.is_mapped) {
        let slot = grouped.entry(t.gl_account.as_str()).or_default();
        slot.0 += 1;
        slot.1 += t.amount;
    }

    let mut summary: Vec<UnmappedAccount> = grouped
        .into_iter()
        .map(|(gl, (count, total))| UnmappedAccount {
            gl_account: gl.to_string(),
            transaction_count: count,
            total_amount: total,
        })
        .collect();
    summary.sort_by(|a, b| b.total_amount.abs().total_cmp(&a.total_amount.abs()));
    summary
}
