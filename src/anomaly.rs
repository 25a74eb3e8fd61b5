//! Outlier detection over monthly bucket totals.
//!
//! Three detectors share the same (month, bucket) series: z-score, MAD
//! (modified z-score) and an isolation forest. Each one skips a bucket whose
//! history is too short. Flags for the same month and bucket are merged into
//! one anomaly carrying the worst severity, and every survivor is explained
//! with its largest counterparties.

use crate::config::{AnalysisConfig, SeverityBands};
use crate::isolation_forest::{outlier_mask, IsolationForest};
use crate::schema::{AccountType, Transaction, YearMonth};
use crate::utils::{mean, median, median_abs_deviation, sample_std};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Consistency constant relating MAD to the standard deviation of a normal.
pub const MAD_SCALE: f64 = 0.6745;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    /// Sort rank, high first.
    pub fn rank(self) -> u8 {
        match self {
            Severity::High => 0,
            Severity::Medium => 1,
            Severity::Low => 2,
        }
    }

    /// Classifies a score that grows with abnormality.
    pub fn from_score(score: f64, bands: &SeverityBands) -> Self {
        if score > bands.high {
            Severity::High
        } else if score > bands.medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    #[serde(rename = "zscore")]
    ZScore,
    Mad,
    IsolationForest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contributor {
    pub party: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub period: YearMonth,
    pub bucket: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub amount: f64,
    pub expected_amount: f64,
    pub deviation: f64,
    pub deviation_pct: f64,
    pub severity: Severity,
    pub method: DetectionMethod,
    /// Method-specific score: |z|, |modified z| or the isolation score.
    pub score: f64,
    pub explanation: String,
    pub top_contributors: Vec<Contributor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub total_count: usize,
    pub high_severity_count: usize,
    pub medium_severity_count: usize,
    pub low_severity_count: usize,
    pub by_type: BTreeMap<AccountType, usize>,
    pub by_bucket: BTreeMap<String, usize>,
    /// (bucket, method) pairs skipped for short history or zero spread.
    pub skipped_series: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub anomalies: Vec<Anomaly>,
    pub summary: AnomalySummary,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SeriesPoint {
    period: YearMonth,
    account_type: AccountType,
    amount: f64,
}

/// Monthly totals per bucket, keyed by bucket, points in period order.
fn bucket_series(transactions: &[Transaction]) -> BTreeMap<String, Vec<SeriesPoint>> {
    let mut sums: BTreeMap<(String, YearMonth, AccountType), f64> = BTreeMap::new();
    for t in transactions {
        *sums
            .entry((t.bucket.clone(), t.year_month, t.account_type))
            .or_default() += t.amount;
    }

    let mut series: BTreeMap<String, Vec<SeriesPoint>> = BTreeMap::new();
    for ((bucket, period, account_type), amount) in sums {
        series.entry(bucket).or_default().push(SeriesPoint {
            period,
            account_type,
            amount,
        });
    }
    series
}

fn deviation_pct(amount: f64, expected: f64) -> f64 {
    if expected == 0.0 {
        0.0
    } else {
        (amount - expected) / expected.abs() * 100.0
    }
}

fn flag(
    bucket: &str,
    point: &SeriesPoint,
    expected: f64,
    score: f64,
    severity: Severity,
    method: DetectionMethod,
) -> Anomaly {
    Anomaly {
        period: point.period,
        bucket: bucket.to_string(),
        account_type: point.account_type,
        amount: point.amount,
        expected_amount: expected,
        deviation: point.amount - expected,
        deviation_pct: deviation_pct(point.amount, expected),
        severity,
        method,
        score,
        explanation: String::new(),
        top_contributors: Vec::new(),
    }
}

pub struct AnomalyDetector<'a> {
    transactions: &'a [Transaction],
    config: &'a AnalysisConfig,
}

impl<'a> AnomalyDetector<'a> {
    pub fn new(transactions: &'a [Transaction], config: &'a AnalysisConfig) -> Self {
        Self {
            transactions,
            config,
        }
    }

    pub fn detect_all(&self) -> AnomalyResult {
        let settings = &self.config.anomaly;
        info!("[{}] Starting anomaly detection", self.config.run_label);

        let series = bucket_series(self.transactions);
        let mut flagged = Vec::new();
        let mut skipped = 0usize;

        for (bucket, points) in &series {
            match self.zscore(bucket, points) {
                Some(found) => flagged.extend(found),
                None => skipped += 1,
            }
            match self.mad(bucket, points) {
                Some(found) => flagged.extend(found),
                None => skipped += 1,
            }
            if settings.use_isolation_forest {
                match self.isolation_forest(bucket, points) {
                    Some(found) => flagged.extend(found),
                    None => skipped += 1,
                }
            }
        }
        debug!(
            "[{}] {} raw flags across {} buckets, {} series skipped",
            self.config.run_label,
            flagged.len(),
            series.len(),
            skipped
        );

        let mut anomalies = deduplicate(flagged);
        for anomaly in &mut anomalies {
            self.explain(anomaly);
        }
        sort_for_report(&mut anomalies);

        let summary = summarize(&anomalies, skipped);
        info!(
            "[{}] Anomaly detection complete: {} anomalies, {} high severity",
            self.config.run_label, summary.total_count, summary.high_severity_count
        );

        AnomalyResult { anomalies, summary }
    }

    /// Raw flags of a single detector across every bucket, before merging.
    pub fn detect_with(&self, method: DetectionMethod) -> Vec<Anomaly> {
        bucket_series(self.transactions)
            .iter()
            .filter_map(|(bucket, points)| match method {
                DetectionMethod::ZScore => self.zscore(bucket, points),
                DetectionMethod::Mad => self.mad(bucket, points),
                DetectionMethod::IsolationForest => self.isolation_forest(bucket, points),
            })
            .flatten()
            .collect()
    }

    /// `None` when the bucket was skipped.
    fn zscore(&self, bucket: &str, points: &[SeriesPoint]) -> Option<Vec<Anomaly>> {
        let settings = &self.config.anomaly;
        if points.len() < settings.min_history_statistical {
            return None;
        }
        let amounts: Vec<f64> = points.iter().map(|p| p.amount).collect();
        let m = mean(&amounts)?;
        let std = sample_std(&amounts)?;
        if std == 0.0 {
            return None;
        }

        Some(
            points
                .iter()
                .filter_map(|p| {
                    let z = ((p.amount - m) / std).abs();
                    (z > settings.zscore_threshold).then(|| {
                        let severity = Severity::from_score(z, &settings.severity.zscore);
                        flag(bucket, p, m, z, severity, DetectionMethod::ZScore)
                    })
                })
                .collect(),
        )
    }

    fn mad(&self, bucket: &str, points: &[SeriesPoint]) -> Option<Vec<Anomaly>> {
        let settings = &self.config.anomaly;
        if points.len() < settings.min_history_statistical {
            return None;
        }
        let amounts: Vec<f64> = points.iter().map(|p| p.amount).collect();
        let med = median(&amounts)?;
        let mad = median_abs_deviation(&amounts)?;
        if mad == 0.0 {
            return None;
        }

        Some(
            points
                .iter()
                .filter_map(|p| {
                    let score = (MAD_SCALE * (p.amount - med) / mad).abs();
                    (score > settings.mad_threshold).then(|| {
                        let severity = Severity::from_score(score, &settings.severity.mad);
                        flag(bucket, p, med, score, severity, DetectionMethod::Mad)
                    })
                })
                .collect(),
        )
    }

    fn isolation_forest(&self, bucket: &str, points: &[SeriesPoint]) -> Option<Vec<Anomaly>> {
        let settings = &self.config.anomaly;
        if points.len() < settings.min_history_isolation {
            return None;
        }
        let amounts: Vec<f64> = points.iter().map(|p| p.amount).collect();
        let forest = IsolationForest::fit(&amounts, settings.isolation_trees, settings.random_seed)?;
        let scores = forest.score_samples(&amounts);
        let mask = outlier_mask(&scores, settings.isolation_contamination);

        let inliers: Vec<f64> = amounts
            .iter()
            .zip(&mask)
            .filter(|(_, outlier)| !**outlier)
            .map(|(a, _)| *a)
            .collect();
        let expected = median(&inliers).or_else(|| median(&amounts))?;

        Some(
            points
                .iter()
                .zip(scores.iter().zip(&mask))
                .filter(|(_, (_, outlier))| **outlier)
                .map(|(p, (score, _))| {
                    let s = -score;
                    let severity = Severity::from_score(s, &settings.severity.isolation_forest);
                    flag(bucket, p, expected, s, severity, DetectionMethod::IsolationForest)
                })
                .collect(),
        )
    }

    fn explain(&self, anomaly: &mut Anomaly) {
        let mut by_party: BTreeMap<&str, f64> = BTreeMap::new();
        let mut any = false;
        for t in self
            .transactions
            .iter()
            .filter(|t| t.year_month == anomaly.period && t.bucket == anomaly.bucket)
        {
            any = true;
            if let Some(party) = t.customer_vendor.as_deref() {
                *by_party.entry(party).or_default() += t.amount;
            }
        }
        if !any {
            return;
        }

        let mut contributors: Vec<Contributor> = by_party
            .into_iter()
            .map(|(party, amount)| Contributor {
                party: party.to_string(),
                amount: amount.abs(),
            })
            .collect();
        contributors.sort_by(|a, b| b.amount.total_cmp(&a.amount));
        contributors.truncate(self.config.anomaly.top_contributors);

        let direction = if anomaly.deviation > 0.0 {
            "increase"
        } else {
            "decrease"
        };
        let mut explanation = format!(
            "{:.1}% {} vs expected in {}",
            anomaly.deviation_pct.abs(),
            direction,
            anomaly.bucket
        );
        if let Some(top) = contributors.first() {
            let share = if anomaly.amount != 0.0 {
                top.amount / anomaly.amount.abs() * 100.0
            } else {
                0.0
            };
            explanation.push_str(&format!(
                ". Top contributor: {} ({:.0}% of total)",
                top.party, share
            ));
        }

        anomaly.explanation = explanation;
        anomaly.top_contributors = contributors;
    }
}

/// Keeps one anomaly per (period, bucket): the most severe, earliest method
/// winning ties.
pub fn deduplicate(mut anomalies: Vec<Anomaly>) -> Vec<Anomaly> {
    anomalies.sort_by(|a, b| {
        (a.period, &a.bucket, a.severity.rank()).cmp(&(b.period, &b.bucket, b.severity.rank()))
    });

    let mut seen: BTreeSet<(YearMonth, String)> = BTreeSet::new();
    anomalies
        .into_iter()
        .filter(|a| seen.insert((a.period, a.bucket.clone())))
        .collect()
}

/// Severity (high first), then ascending absolute deviation percentage.
pub fn sort_for_report(anomalies: &mut [Anomaly]) {
    anomalies.sort_by(|a, b| {
        a.severity
            .rank()
            .cmp(&b.severity.rank())
            .then(a.deviation_pct.abs().total_cmp(&b.deviation_pct.abs()))
    });
}

fn summarize(anomalies: &[Anomaly], skipped_series: usize) -> AnomalySummary {
    let mut summary = AnomalySummary {
        total_count: anomalies.len(),
        skipped_series,
        ..Default::default()
    };
    for a in anomalies {
        match a.severity {
            Severity::High => summary.high_severity_count += 1,
            Severity::Medium => summary.medium_severity_count += 1,
            Severity::Low => summary.low_severity_count += 1,
        }
        *summary.by_type.entry(a.account_type).or_default() += 1;
        *summary.by_bucket.entry(a.bucket.clone()).or_default() += 1;
    }
    summary
}

pub fn detect_anomalies(transactions: &[Transaction], config: &AnalysisConfig) -> AnomalyResult {
    AnomalyDetector::new(transactions, config).detect_all()
}
