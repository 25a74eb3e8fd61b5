//! Short-horizon forecasts of monthly revenue, OPEX and payroll.

use crate::config::AnalysisConfig;
use crate::kpi::monthly_series;
use crate::schema::{AccountType, Transaction, YearMonth};
use crate::utils::{mean, sample_std};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::BTreeMap;

pub const METHOD_WEIGHTED_MOVING_AVERAGE: &str = "Weighted Moving Average";
pub const MIN_MONTHS_FOR_FORECAST: usize = 3;
/// Months averaged for the base level, and the lookback of the trend step.
pub const LOOKBACK_MONTHS: usize = 6;

const FORECAST_TYPES: [AccountType; 3] = [AccountType::Revenue, AccountType::Opex, AccountType::Payroll];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub period: YearMonth,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub forecast: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSummary {
    pub forecast_avg: f64,
    pub historical_avg: f64,
    pub expected_growth_pct: f64,
    pub range_min: f64,
    pub range_max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub forecasts: Vec<ForecastPoint>,
    pub summary: BTreeMap<AccountType, ForecastSummary>,
    pub method_used: String,
    pub confidence_level: f64,
}

/// Two-sided standard normal quantile for a confidence level in (0, 1).
pub fn z_for_confidence(level: f64) -> Option<f64> {
    let normal = Normal::new(0.0, 1.0).ok()?;
    Some(normal.inverse_cdf(1.0 - (1.0 - level) / 2.0))
}

/// Linearly weighted mean of the last `k = min(6, n)` values, newest heaviest.
pub fn weighted_recent_mean(values: &[f64]) -> Option<f64> {
    let k = values.len().min(LOOKBACK_MONTHS);
    if k == 0 {
        return None;
    }
    let recent = &values[values.len() - k..];
    let weight_sum = (k * (k + 1) / 2) as f64;
    Some(
        recent
            .iter()
            .enumerate()
            .map(|(i, v)| (i + 1) as f64 * v)
            .sum::<f64>()
            / weight_sum,
    )
}

pub struct Forecaster<'a> {
    transactions: &'a [Transaction],
    config: &'a AnalysisConfig,
}

impl<'a> Forecaster<'a> {
    pub fn new(transactions: &'a [Transaction], config: &'a AnalysisConfig) -> Self {
        Self {
            transactions,
            config,
        }
    }

    pub fn forecast_all(&self) -> ForecastResult {
        let settings = &self.config.forecast;
        info!(
            "[{}] Generating forecasts for {} periods",
            self.config.run_label, settings.periods
        );

        let z = z_for_confidence(settings.confidence_level).unwrap_or(1.96);
        let mut forecasts = Vec::new();
        let mut summary = BTreeMap::new();

        for account_type in FORECAST_TYPES {
            let series = monthly_series(self.transactions, account_type);
            let Some(points) = self.forecast_series(account_type, &series, z) else {
                debug!(
                    "[{}] Skipping {} forecast: {} months of history",
                    self.config.run_label,
                    account_type,
                    series.len()
                );
                continue;
            };

            let history: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
            let historical_avg = mean(&history).unwrap_or(0.0);
            let forecast_avg =
                points.iter().map(|p| p.forecast).sum::<f64>() / points.len().max(1) as f64;
            summary.insert(
                account_type,
                ForecastSummary {
                    forecast_avg,
                    historical_avg,
                    expected_growth_pct: if historical_avg != 0.0 {
                        (forecast_avg - historical_avg) / historical_avg.abs() * 100.0
                    } else {
                        0.0
                    },
                    range_min: points.iter().map(|p| p.lower_bound).fold(f64::INFINITY, f64::min),
                    range_max: points
                        .iter()
                        .map(|p| p.upper_bound)
                        .fold(f64::NEG_INFINITY, f64::max),
                },
            );
            forecasts.extend(points);
        }

        ForecastResult {
            forecasts,
            summary,
            method_used: METHOD_WEIGHTED_MOVING_AVERAGE.to_string(),
            confidence_level: settings.confidence_level,
        }
    }

    fn forecast_series(
        &self,
        account_type: AccountType,
        series: &[(YearMonth, f64)],
        z: f64,
    ) -> Option<Vec<ForecastPoint>> {
        if series.len() < MIN_MONTHS_FOR_FORECAST || self.config.forecast.periods == 0 {
            return None;
        }
        let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
        let n = values.len();

        let base = weighted_recent_mean(&values)?;
        let trend = if n >= LOOKBACK_MONTHS {
            (values[n - 1] - values[n - LOOKBACK_MONTHS]) / LOOKBACK_MONTHS as f64
        } else {
            0.0
        };
        let std = sample_std(&values).unwrap_or(0.0);

        let mut period = series[n - 1].0;
        Some(
            (1..=self.config.forecast.periods)
                .map(|step| {
                    period = period.next();
                    let forecast = base + trend * step as f64;
                    let margin = z * std * (step as f64).sqrt();
                    ForecastPoint {
                        period,
                        account_type,
                        forecast,
                        lower_bound: forecast - margin,
                        upper_bound: forecast + margin,
                    }
                })
                .collect(),
        )
    }
}

pub fn generate_forecasts(transactions: &[Transaction], config: &AnalysisConfig) -> ForecastResult {
    Forecaster::new(transactions, config).forecast_all()
}
