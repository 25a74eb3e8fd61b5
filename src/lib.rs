//! # Ledger Insights
//!
//! Analytics core for general-ledger exports. A raw transaction feed and a GL
//! account mapping go in; a typed, serialisable review comes out.
//!
//! ## Core Concepts
//!
//! - **Mapping**: every GL account is classified into a reporting bucket and an
//!   [`AccountType`]; an optional statement tag places it on the synthesised
//!   balance sheet, income statement and cash-flow views
//! - **Canonical table**: the [`normalizer`] joins the feed with the mapping
//!   once, applies the sign convention and derives calendar, type and overdue
//!   fields. Every engine reads only this table
//! - **Engines**: KPIs, aging, anomalies, trends, forecasts and ratios are
//!   independent read-only passes and run concurrently
//! - **Reproducibility**: overdue days are measured against the latest posting
//!   date (or an explicit `as_of_date`), and the isolation forest is seeded
//!
//! ## Example
//!
//! ```rust,ignore
//! use ledger_insights::*;
//! use chrono::NaiveDate;
//!
//! let mapping = vec![MappingEntry::new("400000", "Product sales", AccountType::Revenue)];
//! let feed = vec![RawTransaction::new(
//!     NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
//!     "INV-1",
//!     "400000",
//!     1000.0,
//! )];
//!
//! let report = run_review(&feed, mapping, &AnalysisConfig::default())?;
//! println!("{}", report.to_json()?);
//! ```

pub mod aging;
pub mod anomaly;
pub mod chart_of_accounts;
pub mod config;
pub mod error;
pub mod forecasting;
pub mod ingestion;
pub mod isolation_forest;
pub mod kpi;
pub mod normalizer;
pub mod ratios;
pub mod schema;
pub mod statements;
pub mod trends;
pub mod utils;
pub mod validation;

pub use aging::{calculate_aging, AgingAnalyzer, AgingResult};
pub use anomaly::{detect_anomalies, Anomaly, AnomalyDetector, AnomalyResult, DetectionMethod, Severity};
pub use chart_of_accounts::MappingTable;
pub use config::*;
pub use error::{LedgerError, Result};
pub use forecasting::{generate_forecasts, ForecastResult, Forecaster};
pub use ingestion::*;
pub use kpi::{calculate_kpis, KpiCalculator, KpiResult};
pub use normalizer::{normalize, unmapped_summary, NormalizationOutcome, Normalizer, UnmappedAccount};
pub use ratios::{
    analyze_ratios, assess_going_concern, GoingConcernAssessment, GoingConcernStatus, RatioAnalyzer,
    RatioResult, RatioStatus,
};
pub use schema::*;
pub use statements::{synthesize_statements, FinancialStatements};
pub use trends::{analyze_trends, TrendAnalyzer, TrendResult};
pub use validation::{validate, QualityReport};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::thread;

/// Everything one review run produces. Sections for disabled engines are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewReport {
    pub quality: QualityReport,
    pub normalization: NormalizationOutcome,
    pub unmapped_accounts: Vec<UnmappedAccount>,
    pub kpis: KpiResult,
    pub aging: AgingResult,
    pub anomalies: Option<AnomalyResult>,
    pub trends: TrendResult,
    pub forecast: Option<ForecastResult>,
    pub statements: FinancialStatements,
    pub ratios: Vec<RatioResult>,
    pub going_concern: GoingConcernAssessment,
}

impl ReviewReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub struct ReviewPipeline<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> ReviewPipeline<'a> {
    pub fn new(config: &'a AnalysisConfig) -> Self {
        Self { config }
    }

    /// Runs the full review over one feed.
    ///
    /// The run aborts with [`LedgerError::DataQuality`] when validation reports
    /// any error or the quality score falls below
    /// `validation.min_data_quality_score`. A single row without an amount is
    /// such an error, so feeds must be cleaned of missing amounts first; unmapped
    /// accounts and missing posting dates only produce warnings.
    pub fn run(&self, raw: &[RawTransaction], mapping: &MappingTable) -> Result<ReviewReport> {
        let config = self.config;
        config.validate()?;

        info!(
            "[{}] Starting review of {} rows against {} mapped accounts",
            config.run_label,
            raw.len(),
            mapping.len()
        );

        let quality = validate(raw, mapping, config);
        if !quality.is_valid {
            return Err(LedgerError::DataQuality {
                score: quality.quality_score,
                minimum: config.validation.min_data_quality_score,
                errors: quality.errors.len(),
            });
        }

        let normalization = normalize(raw, mapping, config)?;
        let unmapped_accounts = unmapped_summary(&normalization.transactions);
        let transactions = normalization.transactions.as_slice();

        let (kpis, aging, anomalies, trends, forecast, ratio_analysis) = thread::scope(|s| {
            let kpis = s.spawn(|| calculate_kpis(transactions, config));
            let aging = s.spawn(|| calculate_aging(transactions, config));
            let anomalies = s.spawn(|| {
                config
                    .anomaly
                    .enabled
                    .then(|| detect_anomalies(transactions, config))
            });
            let trends = s.spawn(|| analyze_trends(transactions, config));
            let forecast = s.spawn(|| {
                config
                    .forecast
                    .enabled
                    .then(|| generate_forecasts(transactions, config))
            });
            let ratios = s.spawn(|| analyze_ratios(transactions, config));

            // all handles are joined before any error propagates
            let kpis = join_engine(kpis, "kpi");
            let aging = join_engine(aging, "aging");
            let anomalies = join_engine(anomalies, "anomaly");
            let trends = join_engine(trends, "trends");
            let forecast = join_engine(forecast, "forecast");
            let ratios = join_engine(ratios, "ratios");

            Ok::<_, LedgerError>((kpis?, aging?, anomalies?, trends?, forecast?, ratios?))
        })?;

        debug!(
            "[{}] All engines joined ({} canonical rows)",
            config.run_label,
            transactions.len()
        );
        info!(
            "[{}] Review complete: quality {:.2}, going concern {}",
            config.run_label,
            quality.quality_score,
            ratio_analysis.going_concern.overall_status.as_str()
        );

        Ok(ReviewReport {
            quality,
            unmapped_accounts,
            kpis,
            aging,
            anomalies,
            trends,
            forecast,
            statements: ratio_analysis.statements,
            ratios: ratio_analysis.ratios,
            going_concern: ratio_analysis.going_concern,
            normalization,
        })
    }
}

fn join_engine<T>(handle: thread::ScopedJoinHandle<'_, T>, engine: &str) -> Result<T> {
    handle
        .join()
        .map_err(|_| LedgerError::EngineFailure(engine.to_string()))
}

/// Validates, normalizes and runs every enabled engine over one ledger feed.
pub fn run_review(
    raw: &[RawTransaction],
    mapping_entries: Vec<MappingEntry>,
    config: &AnalysisConfig,
) -> Result<ReviewReport> {
    let mapping = MappingTable::from_entries(mapping_entries);
    ReviewPipeline::new(config).run(raw, &mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn feed() -> Vec<RawTransaction> {
        (0..12u32)
            .flat_map(|m| {
                let date = NaiveDate::from_ymd_opt(2024, m + 1, 10).unwrap();
                vec![
                    RawTransaction::new(date, &format!("S{}", m), "400000", 1000.0 + 10.0 * m as f64),
                    RawTransaction::new(date, &format!("R{}", m), "600000", 400.0),
                ]
            })
            .collect()
    }

    fn mapping() -> Vec<MappingEntry> {
        vec![
            MappingEntry::new("400000", "Product sales", AccountType::Revenue),
            MappingEntry::new("600000", "Rent", AccountType::Opex),
        ]
    }

    #[test]
    fn test_end_to_end_review() {
        let report = run_review(&feed(), mapping(), &AnalysisConfig::default()).unwrap();

        assert!(report.quality.is_valid);
        assert_eq!(report.normalization.transactions.len(), 24);
        assert_eq!(report.kpis.monthly.len(), 12);
        assert!(report.anomalies.is_some());
        assert!(report.forecast.is_some());
        assert_eq!(report.ratios.len(), ratios::RATIO_DEFINITIONS.len());

        let json = report.to_json().unwrap();
        assert!(json.contains("\"going_concern\""));
    }

    #[test]
    fn test_disabled_engines_yield_none() {
        let mut config = AnalysisConfig::default();
        config.anomaly.enabled = false;
        config.forecast.enabled = false;

        let report = run_review(&feed(), mapping(), &config).unwrap();
        assert!(report.anomalies.is_none());
        assert!(report.forecast.is_none());
    }

    #[test]
    fn test_low_quality_feed_aborts() {
        let mut rows = feed();
        rows.push(RawTransaction {
            posting_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            doc_id: "X".to_string(),
            gl_account: "400000".to_string(),
            amount: None,
            ..Default::default()
        });

        let err = run_review(&rows, mapping(), &AnalysisConfig::default()).unwrap_err();
        assert!(matches!(err, LedgerError::DataQuality { errors, .. } if errors > 0));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = AnalysisConfig::default();
        config.forecast.confidence_level = 1.5;
        assert!(matches!(
            run_review(&feed(), mapping(), &config),
            Err(LedgerError::InvalidConfig { .. })
        ));
    }
}
