//! Time-series views over monthly totals per account type: rolling averages,
//! fitted trend direction, seasonal decomposition, cross-type correlation,
//! change points and volatility.

use crate::config::AnalysisConfig;
use crate::kpi::{monthly_series, monthly_totals_by_type};
use crate::schema::{AccountType, Transaction, YearMonth};
use crate::utils::{linear_regression, mean, pct_changes, pearson, population_variance, rolling_mean, sample_std};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SEASONAL_PERIOD: usize = 12;
pub const MIN_MONTHS_FOR_SEASONALITY: usize = 24;
pub const MIN_MONTHS_FOR_TREND: usize = 3;
pub const MIN_MONTHS_FOR_CHANGE_POINTS: usize = 6;
/// Minimum (month, type) observations before correlating types.
pub const MIN_OBSERVATIONS_FOR_CORRELATION: usize = 12;
const SIGNIFICANCE_LEVEL: f64 = 0.05;
const HIGH_CONFIDENCE_LEVEL: f64 = 0.01;
const SEASONAL_STRENGTH_DETECTED: f64 = 0.1;
const SEASONAL_STRENGTH_HIGH: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Increasing,
    Decreasing,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TypeTrend {
    InsufficientData,
    NoVariation,
    Fitted {
        direction: Direction,
        slope: f64,
        r_squared: f64,
        p_value: f64,
        confidence: Confidence,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingRow {
    pub year_month: YearMonth,
    pub totals: BTreeMap<AccountType, f64>,
    /// Window length -> trailing mean per type.
    pub averages: BTreeMap<usize, BTreeMap<AccountType, f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Seasonality {
    InsufficientData {
        months: usize,
    },
    Decomposed {
        detected: bool,
        strength: f64,
        /// 1-based positions within the 12-month cycle.
        peak_months: Vec<usize>,
        trough_months: Vec<usize>,
        confidence: Confidence,
        seasonal_indices: Vec<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePoint {
    pub period: YearMonth,
    pub change_pct: f64,
    pub previous_value: f64,
    pub new_value: f64,
    pub significance: Confidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub rolling_averages: Vec<RollingRow>,
    pub trend_direction: BTreeMap<AccountType, TypeTrend>,
    /// `None` when there is no revenue or seasonality is disabled.
    pub seasonality: Option<Seasonality>,
    /// Pearson coefficients over months where both types post; `None` entries
    /// for constant series.
    pub correlation_matrix: Option<BTreeMap<AccountType, BTreeMap<AccountType, Option<f64>>>>,
    pub change_points: BTreeMap<AccountType, Vec<ChangePoint>>,
    /// Coefficient of variation in percent.
    pub volatility: BTreeMap<AccountType, f64>,
}

/// Additive decomposition output, all vectors the length of the input.
#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    pub trend: Vec<f64>,
    pub seasonal: Vec<f64>,
    pub residual: Vec<f64>,
}

/// Classical additive decomposition with a centred 2x`period` moving average.
/// Trend values the moving average cannot reach are extrapolated linearly from
/// the nearest `period + 1` points. Needs at least two full cycles.
pub fn decompose_additive(values: &[f64], period: usize) -> Option<Decomposition> {
    let n = values.len();
    if period < 2 || n < 2 * period {
        return None;
    }

    let half = period / 2;
    let mut weights = vec![1.0 / period as f64; period + 1];
    if period % 2 == 0 {
        weights[0] = 0.5 / period as f64;
        weights[period] = 0.5 / period as f64;
    } else {
        weights.truncate(period);
    }
    let span = weights.len();

    let mut trend: Vec<Option<f64>> = vec![None; n];
    for (center, slot) in trend.iter_mut().enumerate().take(n - (span - 1 - half)).skip(half) {
        let start = center - half;
        *slot = Some(
            weights
                .iter()
                .zip(&values[start..start + span])
                .map(|(w, v)| w * v)
                .sum(),
        );
    }
    let trend = extrapolate_trend(&trend, period + 1)?;

    let detrended: Vec<f64> = values.iter().zip(&trend).map(|(v, t)| v - t).collect();
    let mut indices: Vec<f64> = (0..period)
        .map(|phase| {
            let cycle: Vec<f64> = detrended.iter().skip(phase).step_by(period).copied().collect();
            mean(&cycle).unwrap_or(0.0)
        })
        .collect();
    let center = mean(&indices).unwrap_or(0.0);
    indices.iter_mut().for_each(|v| *v -= center);

    let seasonal: Vec<f64> = (0..n).map(|i| indices[i % period]).collect();
    let residual = values
        .iter()
        .zip(&trend)
        .zip(&seasonal)
        .map(|((v, t), s)| v - t - s)
        .collect();

    Some(Decomposition {
        trend,
        seasonal,
        residual,
    })
}

fn extrapolate_trend(trend: &[Option<f64>], points: usize) -> Option<Vec<f64>> {
    let first = trend.iter().position(Option::is_some)?;
    let last = trend.iter().rposition(Option::is_some)?;
    let known: Vec<(f64, f64)> = trend
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i as f64, v)))
        .collect();
    let take = points.min(known.len());

    let fit = |pts: &[(f64, f64)]| -> (f64, f64) {
        let xs: Vec<f64> = pts.iter().map(|p| p.0).collect();
        let ys: Vec<f64> = pts.iter().map(|p| p.1).collect();
        let mx = mean(&xs).unwrap_or(0.0);
        let my = mean(&ys).unwrap_or(0.0);
        let sxx: f64 = xs.iter().map(|x| (x - mx).powi(2)).sum();
        let slope = if sxx == 0.0 {
            0.0
        } else {
            xs.iter().zip(&ys).map(|(x, y)| (x - mx) * (y - my)).sum::<f64>() / sxx
        };
        (slope, my - slope * mx)
    };
    let (front_slope, front_intercept) = fit(&known[..take]);
    let (back_slope, back_intercept) = fit(&known[known.len() - take..]);

    Some(
        trend
            .iter()
            .enumerate()
            .map(|(i, v)| match v {
                Some(v) => *v,
                None if i < first => front_intercept + front_slope * i as f64,
                None if i > last => back_intercept + back_slope * i as f64,
                None => 0.0,
            })
            .collect(),
    )
}

/// Positions (0-based) of the `k` largest or smallest values, ties kept in
/// index order.
fn top_positions(values: &[f64], k: usize, largest: bool) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|a, b| {
        let cmp = values[*a].total_cmp(&values[*b]);
        if largest {
            cmp.reverse()
        } else {
            cmp
        }
    });
    order.truncate(k);
    order
}

pub struct TrendAnalyzer<'a> {
    transactions: &'a [Transaction],
    config: &'a AnalysisConfig,
}

impl<'a> TrendAnalyzer<'a> {
    pub fn new(transactions: &'a [Transaction], config: &'a AnalysisConfig) -> Self {
        Self {
            transactions,
            config,
        }
    }

    pub fn analyze_all(&self) -> TrendResult {
        info!("[{}] Starting trend analysis", self.config.run_label);

        let result = TrendResult {
            rolling_averages: self.rolling_averages(),
            trend_direction: self.trend_direction(),
            seasonality: if self.config.trends.enable_seasonality {
                self.seasonality()
            } else {
                None
            },
            correlation_matrix: self.correlations(),
            change_points: [
                AccountType::Revenue,
                AccountType::Opex,
                AccountType::Payroll,
                AccountType::Interest,
            ]
            .into_iter()
            .map(|t| (t, self.change_points(t)))
            .filter(|(_, points)| !points.is_empty())
            .collect(),
            volatility: self.volatility(),
        };

        info!("[{}] Trend analysis complete", self.config.run_label);
        result
    }

    fn present_types(&self) -> Vec<AccountType> {
        let mut types: Vec<AccountType> = self.transactions.iter().map(|t| t.account_type).collect();
        types.sort();
        types.dedup();
        types
    }

    /// Monthly totals pivoted per type, zero-filled; windows longer than the
    /// history are skipped.
    pub fn rolling_averages(&self) -> Vec<RollingRow> {
        let pivot = monthly_totals_by_type(self.transactions);
        let types = self.present_types();
        let months: Vec<YearMonth> = pivot.keys().copied().collect();

        let columns: BTreeMap<AccountType, Vec<f64>> = types
            .iter()
            .map(|t| {
                let column = months
                    .iter()
                    .map(|m| pivot.get(m).and_then(|row| row.get(t)).copied().unwrap_or(0.0))
                    .collect();
                (*t, column)
            })
            .collect();

        let windows: Vec<usize> = self
            .config
            .trends
            .rolling_windows
            .iter()
            .copied()
            .filter(|w| months.len() >= *w)
            .collect();
        let rolled: BTreeMap<usize, BTreeMap<AccountType, Vec<f64>>> = windows
            .iter()
            .map(|w| {
                let per_type = columns
                    .iter()
                    .map(|(t, column)| (*t, rolling_mean(column, *w)))
                    .collect();
                (*w, per_type)
            })
            .collect();

        months
            .iter()
            .enumerate()
            .map(|(i, month)| RollingRow {
                year_month: *month,
                totals: columns.iter().map(|(t, c)| (*t, c[i])).collect(),
                averages: rolled
                    .iter()
                    .map(|(w, per_type)| (*w, per_type.iter().map(|(t, c)| (*t, c[i])).collect()))
                    .collect(),
            })
            .collect()
    }

    pub fn trend_direction(&self) -> BTreeMap<AccountType, TypeTrend> {
        self.present_types()
            .into_iter()
            .map(|t| {
                let values: Vec<f64> = monthly_series(self.transactions, t)
                    .into_iter()
                    .map(|(_, v)| v)
                    .collect();
                (t, classify_trend(&values))
            })
            .collect()
    }

    pub fn seasonality(&self) -> Option<Seasonality> {
        let revenue: Vec<f64> = monthly_series(self.transactions, AccountType::Revenue)
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        if revenue.is_empty() {
            warn!("[{}] No revenue data for seasonality analysis", self.config.run_label);
            return None;
        }
        if revenue.len() < MIN_MONTHS_FOR_SEASONALITY {
            warn!(
                "[{}] Insufficient data for seasonality detection ({} months, need {})",
                self.config.run_label,
                revenue.len(),
                MIN_MONTHS_FOR_SEASONALITY
            );
            return Some(Seasonality::InsufficientData {
                months: revenue.len(),
            });
        }

        let decomposition = decompose_additive(&revenue, SEASONAL_PERIOD)?;
        let series_var = population_variance(&revenue).unwrap_or(0.0);
        let strength = if series_var == 0.0 {
            0.0
        } else {
            population_variance(&decomposition.seasonal).unwrap_or(0.0) / series_var
        };
        let cycle = &decomposition.seasonal[..SEASONAL_PERIOD];

        Some(Seasonality::Decomposed {
            detected: strength > SEASONAL_STRENGTH_DETECTED,
            strength,
            peak_months: top_positions(cycle, 3, true).into_iter().map(|i| i + 1).collect(),
            trough_months: top_positions(cycle, 3, false).into_iter().map(|i| i + 1).collect(),
            confidence: if strength > SEASONAL_STRENGTH_HIGH {
                Confidence::High
            } else {
                Confidence::Medium
            },
            seasonal_indices: cycle.to_vec(),
        })
    }

    pub fn correlations(
        &self,
    ) -> Option<BTreeMap<AccountType, BTreeMap<AccountType, Option<f64>>>> {
        let pivot = monthly_totals_by_type(self.transactions);
        let observations: usize = pivot.values().map(BTreeMap::len).sum();
        if observations < MIN_OBSERVATIONS_FOR_CORRELATION {
            warn!("[{}] Insufficient data for correlation analysis", self.config.run_label);
            return None;
        }
        let types = self.present_types();
        if types.len() < 2 {
            warn!("[{}] Need at least 2 types for correlation analysis", self.config.run_label);
            return None;
        }

        let mut matrix = BTreeMap::new();
        for a in &types {
            let mut row = BTreeMap::new();
            for b in &types {
                let (xs, ys): (Vec<f64>, Vec<f64>) = pivot
                    .values()
                    .filter_map(|month| Some((*month.get(a)?, *month.get(b)?)))
                    .unzip();
                row.insert(*b, pearson(&xs, &ys));
            }
            matrix.insert(*a, row);
        }
        Some(matrix)
    }

    /// Month-over-month moves larger than twice the standard deviation of all
    /// moves, largest first.
    pub fn change_points(&self, account_type: AccountType) -> Vec<ChangePoint> {
        let series = monthly_series(self.transactions, account_type);
        if series.len() < MIN_MONTHS_FOR_CHANGE_POINTS {
            return Vec::new();
        }
        let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
        let changes = pct_changes(&values);
        let defined: Vec<f64> = changes.iter().flatten().copied().collect();
        let threshold = match sample_std(&defined) {
            Some(std) => 2.0 * std,
            None => return Vec::new(),
        };

        let mut points: Vec<ChangePoint> = changes
            .iter()
            .enumerate()
            .filter_map(|(i, change)| {
                let change = (*change)?;
                (change.abs() > threshold).then(|| ChangePoint {
                    period: series[i + 1].0,
                    change_pct: change,
                    previous_value: series[i].1,
                    new_value: series[i + 1].1,
                    significance: if change.abs() > 3.0 * threshold {
                        Confidence::High
                    } else {
                        Confidence::Medium
                    },
                })
            })
            .collect();
        points.sort_by(|a, b| b.change_pct.abs().total_cmp(&a.change_pct.abs()));
        points
    }

    pub fn volatility(&self) -> BTreeMap<AccountType, f64> {
        self.present_types()
            .into_iter()
            .filter_map(|t| {
                let values: Vec<f64> = monthly_series(self.transactions, t)
                    .into_iter()
                    .map(|(_, v)| v)
                    .collect();
                let m = mean(&values)?;
                let std = sample_std(&values)?;
                (m != 0.0).then(|| (t, std / m.abs() * 100.0))
            })
            .collect()
    }
}

pub fn classify_trend(values: &[f64]) -> TypeTrend {
    if values.len() < MIN_MONTHS_FOR_TREND {
        return TypeTrend::InsufficientData;
    }
    if values.iter().all(|v| *v == 0.0) {
        return TypeTrend::NoVariation;
    }
    match linear_regression(values) {
        Some(fit) => TypeTrend::Fitted {
            direction: if fit.p_value >= SIGNIFICANCE_LEVEL {
                Direction::Flat
            } else if fit.slope > 0.0 {
                Direction::Increasing
            } else {
                Direction::Decreasing
            },
            slope: fit.slope,
            r_squared: fit.r_squared,
            p_value: fit.p_value,
            confidence: if fit.p_value < HIGH_CONFIDENCE_LEVEL {
                Confidence::High
            } else {
                Confidence::Medium
            },
        },
        None => TypeTrend::InsufficientData,
    }
}

pub fn analyze_trends(transactions: &[Transaction], config: &AnalysisConfig) -> TrendResult {
    TrendAnalyzer::new(transactions, config).analyze_all()
}
