//! Strongly typed analysis configuration.
//!
//! Every option recognised by the engines lives here with its default. A
//! configuration is validated when it is loaded, so the engines can trust
//! bucket ordering, threshold ranges and policy tables without re-checking.

use crate::error::{LedgerError, Result};
use crate::ratios::RatioPolicy;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignConvention {
    #[default]
    #[schemars(description = "Debits are positive, credits negative (amounts pass through)")]
    PositiveDebit,

    #[schemars(
        description = "Credits are positive in the export; amounts and open amounts are negated once on load"
    )]
    PositiveCredit,
}

/// A closed day range `[min_days, max_days]` on the days-overdue axis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct AgingBucket {
    pub min_days: i64,
    pub max_days: i64,
    pub label: String,
}

impl AgingBucket {
    pub fn new(min_days: i64, max_days: i64, label: &str) -> Self {
        Self {
            min_days,
            max_days,
            label: label.to_string(),
        }
    }

    pub fn contains(&self, days: i64) -> bool {
        days >= self.min_days && days <= self.max_days
    }
}

pub fn default_aging_buckets() -> Vec<AgingBucket> {
    vec![
        AgingBucket::new(0, 0, "Current"),
        AgingBucket::new(1, 30, "0-30 days"),
        AgingBucket::new(31, 60, "31-60 days"),
        AgingBucket::new(61, 90, "61-90 days"),
        AgingBucket::new(91, 999_999, ">90 days"),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct AgingConfig {
    #[schemars(
        description = "Ordered, non-overlapping day ranges. Items outside every range are reported as 'Unknown'."
    )]
    pub buckets: Vec<AgingBucket>,

    pub top_n_parties: usize,
}

impl Default for AgingConfig {
    fn default() -> Self {
        Self {
            buckets: default_aging_buckets(),
            top_n_parties: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct KpiConfig {
    pub enable_growth_metrics: bool,
    pub enable_ratios: bool,
    pub calculate_dso: bool,
    pub calculate_dpo: bool,
    #[schemars(description = "Trailing window (days) used for the DSO/DPO run rate")]
    pub run_rate_window_days: i64,
    pub top_n_buckets: usize,
}

impl Default for KpiConfig {
    fn default() -> Self {
        Self {
            enable_growth_metrics: true,
            enable_ratios: true,
            calculate_dso: true,
            calculate_dpo: true,
            run_rate_window_days: 90,
            top_n_buckets: 10,
        }
    }
}

/// Score cut-offs for one detection method. A score strictly above `high`
/// is high severity, strictly above `medium` is medium, anything else low.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct SeverityBands {
    pub high: f64,
    pub medium: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct SeverityPolicy {
    #[schemars(description = "Applied to |z|")]
    pub zscore: SeverityBands,
    #[schemars(description = "Applied to |modified z|")]
    pub mad: SeverityBands,
    #[schemars(description = "Applied to the isolation anomaly score s in (0, 1]")]
    pub isolation_forest: SeverityBands,
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        Self {
            zscore: SeverityBands {
                high: 4.0,
                medium: 3.5,
            },
            mad: SeverityBands {
                high: 5.0,
                medium: 4.0,
            },
            isolation_forest: SeverityBands {
                high: 0.7,
                medium: 0.6,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct AnomalyConfig {
    pub enabled: bool,
    pub zscore_threshold: f64,
    pub mad_threshold: f64,
    pub use_isolation_forest: bool,
    #[schemars(description = "Expected share of outliers per bucket, in (0, 0.5]")]
    pub isolation_contamination: f64,
    pub isolation_trees: usize,
    pub random_seed: u64,
    pub min_history_statistical: usize,
    pub min_history_isolation: usize,
    pub top_contributors: usize,
    pub severity: SeverityPolicy,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            zscore_threshold: 3.0,
            mad_threshold: 3.5,
            use_isolation_forest: true,
            isolation_contamination: 0.1,
            isolation_trees: 100,
            random_seed: 42,
            min_history_statistical: 6,
            min_history_isolation: 10,
            top_contributors: 3,
            severity: SeverityPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct TrendConfig {
    pub rolling_windows: Vec<usize>,
    pub enable_seasonality: bool,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            rolling_windows: vec![3, 6, 12],
            enable_seasonality: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct ForecastConfig {
    pub enabled: bool,
    pub periods: usize,
    pub confidence_level: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            periods: 6,
            confidence_level: 0.95,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct ValidationConfig {
    pub warn_unmapped_accounts: bool,
    pub check_date_continuity: bool,
    pub check_currency_consistency: bool,
    #[schemars(description = "Runs scoring below this value (0.0 - 1.0) are aborted")]
    pub min_data_quality_score: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            warn_unmapped_accounts: true,
            check_date_continuity: true,
            check_currency_consistency: true,
            min_data_quality_score: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct AnalysisConfig {
    #[schemars(description = "Label attached to every log line of a run")]
    pub run_label: String,

    pub sign_convention: SignConvention,

    pub default_currency: String,

    #[schemars(
        description = "Reference date for days-overdue. Defaults to the latest posting date in the feed so results are reproducible."
    )]
    pub as_of_date: Option<NaiveDate>,

    #[schemars(description = "Items more than this many days past due are flagged overdue")]
    pub overdue_threshold_days: i64,

    pub aging: AgingConfig,
    pub kpi: KpiConfig,
    pub anomaly: AnomalyConfig,
    pub trends: TrendConfig,
    pub forecast: ForecastConfig,
    pub validation: ValidationConfig,
    pub ratios: RatioPolicy,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            run_label: "ledger-review".to_string(),
            sign_convention: SignConvention::PositiveDebit,
            default_currency: "EUR".to_string(),
            as_of_date: None,
            overdue_threshold_days: 30,
            aging: AgingConfig::default(),
            kpi: KpiConfig::default(),
            anomaly: AnomalyConfig::default(),
            trends: TrendConfig::default(),
            forecast: ForecastConfig::default(),
            validation: ValidationConfig::default(),
            ratios: RatioPolicy::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: AnalysisConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(AnalysisConfig)
    }

    pub fn validate(&self) -> Result<()> {
        validate_aging_buckets(&self.aging.buckets)?;

        if self.overdue_threshold_days < 0 {
            return Err(invalid(
                "overdue_threshold_days",
                format!("must be >= 0, got {}", self.overdue_threshold_days),
            ));
        }

        if self.kpi.run_rate_window_days <= 0 {
            return Err(invalid(
                "kpi.run_rate_window_days",
                format!("must be > 0, got {}", self.kpi.run_rate_window_days),
            ));
        }

        let anomaly = &self.anomaly;
        if anomaly.zscore_threshold <= 0.0 {
            return Err(invalid("anomaly.zscore_threshold", "must be > 0".to_string()));
        }
        if anomaly.mad_threshold <= 0.0 {
            return Err(invalid("anomaly.mad_threshold", "must be > 0".to_string()));
        }
        if anomaly.isolation_contamination <= 0.0 || anomaly.isolation_contamination > 0.5 {
            return Err(invalid(
                "anomaly.isolation_contamination",
                format!(
                    "must be in (0, 0.5], got {}",
                    anomaly.isolation_contamination
                ),
            ));
        }
        if anomaly.isolation_trees == 0 {
            return Err(invalid("anomaly.isolation_trees", "must be > 0".to_string()));
        }
        if anomaly.min_history_statistical < 2 || anomaly.min_history_isolation < 2 {
            return Err(invalid(
                "anomaly.min_history",
                "at least two periods are required".to_string(),
            ));
        }
        for (name, bands) in [
            ("zscore", anomaly.severity.zscore),
            ("mad", anomaly.severity.mad),
            ("isolation_forest", anomaly.severity.isolation_forest),
        ] {
            if bands.high < bands.medium {
                return Err(invalid(
                    &format!("anomaly.severity.{}", name),
                    format!(
                        "high cut-off {} must not be below medium {}",
                        bands.high, bands.medium
                    ),
                ));
            }
        }

        if self.trends.rolling_windows.iter().any(|w| *w == 0) {
            return Err(invalid(
                "trends.rolling_windows",
                "windows must be >= 1".to_string(),
            ));
        }

        let level = self.forecast.confidence_level;
        if !(level > 0.0 && level < 1.0) {
            return Err(invalid(
                "forecast.confidence_level",
                format!("must be in (0, 1), got {}", level),
            ));
        }

        let min_score = self.validation.min_data_quality_score;
        if !(0.0..=1.0).contains(&min_score) {
            return Err(invalid(
                "validation.min_data_quality_score",
                format!("must be in [0, 1], got {}", min_score),
            ));
        }

        self.ratios.validate()?;

        Ok(())
    }
}

fn invalid(field: &str, details: String) -> LedgerError {
    LedgerError::InvalidConfig {
        field: field.to_string(),
        details,
    }
}

/// Buckets must be non-empty, each well formed, sorted and free of overlaps.
/// Gaps between consecutive buckets are rejected as well, so every integer day
/// between the first minimum and the last maximum lands in exactly one bucket.
pub fn validate_aging_buckets(buckets: &[AgingBucket]) -> Result<()> {
    if buckets.is_empty() {
        return Err(invalid("aging.buckets", "at least one bucket is required".to_string()));
    }

    for bucket in buckets {
        if bucket.label.trim().is_empty() {
            return Err(LedgerError::InvalidAgingBucket {
                label: bucket.label.clone(),
                details: "label must not be empty".to_string(),
            });
        }
        if bucket.min_days > bucket.max_days {
            return Err(LedgerError::InvalidAgingBucket {
                label: bucket.label.clone(),
                details: format!(
                    "min_days {} is greater than max_days {}",
                    bucket.min_days, bucket.max_days
                ),
            });
        }
    }

    for pair in buckets.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.min_days <= prev.max_days {
            return Err(LedgerError::InvalidAgingBucket {
                label: next.label.clone(),
                details: format!("overlaps or precedes bucket '{}'", prev.label),
            });
        }
        if next.min_days != prev.max_days + 1 {
            return Err(LedgerError::InvalidAgingBucket {
                label: next.label.clone(),
                details: format!(
                    "leaves a gap after bucket '{}' (days {}..{})",
                    prev.label,
                    prev.max_days + 1,
                    next.min_days - 1
                ),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.aging.buckets.len(), 5);
        assert_eq!(config.sign_convention, SignConvention::PositiveDebit);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "sign_convention": "positive_credit",
            "anomaly": { "zscore_threshold": 2.5 }
        }"#;
        let config = AnalysisConfig::from_json_str(json).unwrap();
        assert_eq!(config.sign_convention, SignConvention::PositiveCredit);
        assert_eq!(config.anomaly.zscore_threshold, 2.5);
        assert_eq!(config.anomaly.mad_threshold, 3.5);
        assert_eq!(config.default_currency, "EUR");
    }

    #[test]
    fn test_overlapping_buckets_rejected() {
        let buckets = vec![
            AgingBucket::new(0, 30, "0-30"),
            AgingBucket::new(20, 60, "20-60"),
        ];
        assert!(validate_aging_buckets(&buckets).is_err());
    }

    #[test]
    fn test_gapped_buckets_rejected() {
        let buckets = vec![
            AgingBucket::new(0, 30, "0-30"),
            AgingBucket::new(40, 60, "40-60"),
        ];
        let err = validate_aging_buckets(&buckets).unwrap_err();
        assert!(err.to_string().contains("gap"));
    }

    #[test]
    fn test_invalid_contamination_rejected() {
        let mut config = AnalysisConfig::default();
        config.anomaly.isolation_contamination = 0.8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_schema_generation() {
        let schema = AnalysisConfig::json_schema();
        let json = serde_json::to_string_pretty(&schema).unwrap();
        assert!(json.contains("sign_convention"));
        assert!(json.contains("aging"));
    }
}
