//! Data-quality checks over the raw feed.
//!
//! Nothing here aborts on its own. Issues are collected as warnings or
//! errors and folded into a 0..1 quality score; the pipeline decides whether
//! the score is good enough to continue.

use crate::chart_of_accounts::MappingTable;
use crate::config::AnalysisConfig;
use crate::schema::{RawTransaction, YearMonth};
use crate::utils::{mean, missing_months, sample_std, year_month_of};
use chrono::NaiveDate;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const UNMAPPED_WEIGHT: f64 = 0.3;
const UNMAPPED_MAX_DEDUCTION: f64 = 0.3;
const MISSING_DATE_WEIGHT: f64 = 0.5;
const MISSING_DATE_MAX_DEDUCTION: f64 = 0.3;
const MISSING_AMOUNT_WEIGHT: f64 = 0.5;
const MISSING_AMOUNT_MAX_DEDUCTION: f64 = 0.4;
const GAP_MONTH_DEDUCTION: f64 = 0.02;
const GAP_MAX_DEDUCTION: f64 = 0.1;
const ZERO_AMOUNT_WARN_PCT: f64 = 5.0;
const OUTLIER_SIGMAS: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub is_valid: bool,
    pub quality_score: f64,
    pub total_rows: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub unmapped_accounts: Vec<String>,
    pub missing_dates_count: usize,
    pub missing_amounts_count: usize,
    /// Rows lacking a posting date or an amount; these never reach normalization.
    pub unusable_rows: usize,
    pub currency_distribution: BTreeMap<String, usize>,
    pub date_gaps: Vec<YearMonth>,
    pub duplicate_count: usize,
    pub zero_amount_count: usize,
    pub outlier_count: usize,
}

impl QualityReport {
    fn new(total_rows: usize) -> Self {
        Self {
            is_valid: true,
            quality_score: 1.0,
            total_rows,
            warnings: Vec::new(),
            errors: Vec::new(),
            unmapped_accounts: Vec::new(),
            missing_dates_count: 0,
            missing_amounts_count: 0,
            unusable_rows: 0,
            currency_distribution: BTreeMap::new(),
            date_gaps: Vec::new(),
            duplicate_count: 0,
            zero_amount_count: 0,
            outlier_count: 0,
        }
    }
}

pub fn validate(
    transactions: &[RawTransaction],
    mapping: &MappingTable,
    config: &AnalysisConfig,
) -> QualityReport {
    let checks = &config.validation;
    let mut report = QualityReport::new(transactions.len());
    info!(
        "[{}] Validating {} ledger rows against {} mapped accounts",
        config.run_label,
        transactions.len(),
        mapping.len()
    );

    if checks.warn_unmapped_accounts {
        check_unmapped(transactions, mapping, &mut report);
    }
    check_missing_data(transactions, &mut report);
    if checks.check_date_continuity {
        check_date_continuity(transactions, &mut report);
    }
    if checks.check_currency_consistency {
        check_currency(transactions, &config.default_currency, &mut report);
    }
    check_amounts(transactions, &mut report);
    check_duplicates(transactions, &mut report);

    report.quality_score = quality_score(transactions, &report);
    report.is_valid =
        report.errors.is_empty() && report.quality_score >= checks.min_data_quality_score;

    info!(
        "[{}] Validation complete: valid={}, score={:.2}, {} warnings, {} errors",
        config.run_label,
        report.is_valid,
        report.quality_score,
        report.warnings.len(),
        report.errors.len()
    );

    report
}

fn pct_of(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

fn check_unmapped(transactions: &[RawTransaction], mapping: &MappingTable, report: &mut QualityReport) {
    let unmapped: BTreeSet<&str> = transactions
        .iter()
        .map(|t| t.gl_account.trim())
        .filter(|gl| !mapping.contains(gl))
        .collect();

    if unmapped.is_empty() {
        return;
    }

    let unmapped_rows: Vec<&RawTransaction> = transactions
        .iter()
        .filter(|t| unmapped.contains(t.gl_account.trim()))
        .collect();
    let unmapped_amount: f64 = unmapped_rows.iter().filter_map(|t| t.amount).sum();
    let total_amount: f64 = transactions.iter().filter_map(|t| t.amount).sum();
    let amount_pct = if total_amount != 0.0 {
        unmapped_amount.abs() / total_amount.abs() * 100.0
    } else {
        0.0
    };

    report.warnings.push(format!(
        "Found {} unmapped GL accounts ({:.1}% of rows, {:.1}% of amount)",
        unmapped.len(),
        pct_of(unmapped_rows.len(), transactions.len()),
        amount_pct
    ));
    warn!(
        "Unmapped GL accounts detected: {} accounts, {} rows, amount {:.2}",
        unmapped.len(),
        unmapped_rows.len(),
        unmapped_amount
    );

    report.unmapped_accounts = unmapped.into_iter().map(str::to_string).collect();
}

fn check_missing_data(transactions: &[RawTransaction], report: &mut QualityReport) {
    let total = transactions.len();

    let missing_dates = transactions.iter().filter(|t| t.posting_date.is_none()).count();
    if missing_dates > 0 {
        report.missing_dates_count = missing_dates;
        report.warnings.push(format!(
            "Missing posting_date in {} rows ({:.1}%)",
            missing_dates,
            pct_of(missing_dates, total)
        ));
    }

    let missing_amounts = transactions.iter().filter(|t| t.amount.is_none()).count();
    if missing_amounts > 0 {
        report.missing_amounts_count = missing_amounts;
        report.errors.push(format!(
            "Missing amount in {} rows ({:.1}%)",
            missing_amounts,
            pct_of(missing_amounts, total)
        ));
    }

    report.unusable_rows = transactions
        .iter()
        .filter(|t| t.posting_date.is_none() || t.amount.is_none())
        .count();

    let missing_open = transactions.iter().filter(|t| t.open_amount.is_none()).count();
    if missing_open > 0 && missing_open < total {
        report.warnings.push(format!(
            "Missing open_amount in {} rows ({:.1}%) - AR/AP aging may be affected",
            missing_open,
            pct_of(missing_open, total)
        ));
    }

    let missing_due = transactions.iter().filter(|t| t.due_date.is_none()).count();
    if missing_due > 0 && missing_due < total {
        report.warnings.push(format!(
            "Missing due_date in {} rows ({:.1}%) - aging analysis may be incomplete",
            missing_due,
            pct_of(missing_due, total)
        ));
    }
}

fn check_date_continuity(transactions: &[RawTransaction], report: &mut QualityReport) {
    let observed: Vec<YearMonth> = transactions
        .iter()
        .filter_map(|t| t.posting_date)
        .map(year_month_of)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let gaps = missing_months(&observed);
    if gaps.is_empty() {
        return;
    }

    let preview: Vec<String> = gaps.iter().take(5).map(|m| m.to_string()).collect();
    report.warnings.push(format!(
        "Found {} months with no data: {}",
        gaps.len(),
        preview.join(", ")
    ));
    warn!("Date gaps detected in {} months", gaps.len());
    report.date_gaps = gaps;
}

fn check_currency(transactions: &[RawTransaction], default_currency: &str, report: &mut QualityReport) {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for currency in transactions.iter().filter_map(|t| t.currency.as_deref()) {
        let currency = currency.trim();
        if !currency.is_empty() {
            *counts.entry(currency.to_uppercase()).or_default() += 1;
        }
    }

    if counts.len() > 1 {
        let non_default: usize = counts
            .iter()
            .filter(|(code, _)| !code.eq_ignore_ascii_case(default_currency))
            .map(|(_, n)| *n)
            .sum();
        let listing: Vec<String> = counts.iter().map(|(c, n)| format!("{}: {}", c, n)).collect();
        report.warnings.push(format!(
            "Multiple currencies detected ({}) - {:.1}% of data is not in {}",
            listing.join(", "),
            pct_of(non_default, transactions.len()),
            default_currency
        ));
        info!("Currency distribution: {}", listing.join(", "));
    }

    report.currency_distribution = counts;
}

fn check_amounts(transactions: &[RawTransaction], report: &mut QualityReport) {
    let amounts: Vec<f64> = transactions.iter().filter_map(|t| t.amount).collect();
    if amounts.is_empty() {
        return;
    }

    let zero_count = amounts.iter().filter(|a| **a == 0.0).count();
    report.zero_amount_count = zero_count;
    let zero_pct = pct_of(zero_count, amounts.len());
    if zero_pct > ZERO_AMOUNT_WARN_PCT {
        report.warnings.push(format!(
            "High number of zero amounts: {} ({:.1}%)",
            zero_count, zero_pct
        ));
    }

    if let (Some(m), Some(std)) = (mean(&amounts), sample_std(&amounts)) {
        if std > 0.0 {
            let outliers = amounts
                .iter()
                .filter(|a| (*a - m).abs() > OUTLIER_SIGMAS * std)
                .count();
            if outliers > 0 {
                report.outlier_count = outliers;
                report.warnings.push(format!(
                    "Found {} extreme outliers (>5 std deviations)",
                    outliers
                ));
            }
        }
    }
}

fn check_duplicates(transactions: &[RawTransaction], report: &mut QualityReport) {
    type Key<'a> = (Option<NaiveDate>, &'a str, &'a str, Option<u64>);

    let mut groups: BTreeMap<Key, usize> = BTreeMap::new();
    for t in transactions {
        let key = (
            t.posting_date,
            t.doc_id.as_str(),
            t.gl_account.trim(),
            t.amount.map(f64::to_bits),
        );
        *groups.entry(key).or_default() += 1;
    }

    let dup_count: usize = groups.values().filter(|n| **n > 1).sum();
    if dup_count > 0 {
        report.duplicate_count = dup_count;
        report.warnings.push(format!(
            "Found {} potential duplicate entries ({:.1}%)",
            dup_count,
            pct_of(dup_count, transactions.len())
        ));
    }
}

fn quality_score(transactions: &[RawTransaction], report: &QualityReport) -> f64 {
    let total = transactions.len().max(1) as f64;
    let mut score = 1.0;

    if !report.unmapped_accounts.is_empty() {
        let distinct: BTreeSet<&str> = transactions.iter().map(|t| t.gl_account.trim()).collect();
        let share = report.unmapped_accounts.len() as f64 / distinct.len().max(1) as f64;
        score -= (share * UNMAPPED_WEIGHT).min(UNMAPPED_MAX_DEDUCTION);
    }

    if report.missing_dates_count > 0 {
        let share = report.missing_dates_count as f64 / total;
        score -= (share * MISSING_DATE_WEIGHT).min(MISSING_DATE_MAX_DEDUCTION);
    }

    if report.missing_amounts_count > 0 {
        let share = report.missing_amounts_count as f64 / total;
        score -= (share * MISSING_AMOUNT_WEIGHT).min(MISSING_AMOUNT_MAX_DEDUCTION);
    }

    if !report.date_gaps.is_empty() {
        score -= (report.date_gaps.len() as f64 * GAP_MONTH_DEDUCTION).min(GAP_MAX_DEDUCTION);
    }

    f64::max(score, 0.0)
}
