use crate::error::{LedgerError, Result};
use crate::schema::YearMonth;
use chrono::{Datelike, NaiveDate};

pub fn year_month_of(date: NaiveDate) -> YearMonth {
    YearMonth::new(date.year(), date.month())
}

pub fn quarter_of(month: u32) -> u32 {
    (month - 1) / 3 + 1
}

/// Every calendar month from `start` to `end` inclusive.
pub fn month_range(start: YearMonth, end: YearMonth) -> Vec<YearMonth> {
    let mut months = Vec::new();
    let mut current = start;
    while current <= end {
        months.push(current);
        current = current.next();
    }
    months
}

/// Months strictly between consecutive observed months.
pub fn missing_months(observed: &[YearMonth]) -> Vec<YearMonth> {
    let (Some(first), Some(last)) = (observed.iter().min(), observed.iter().max()) else {
        return Vec::new();
    };
    month_range(*first, *last)
        .into_iter()
        .filter(|m| !observed.contains(m))
        .collect()
}

/// Parses a ledger date in any of the accepted export layouts.
pub fn parse_ledger_date(value: &str) -> Result<NaiveDate> {
    const FORMATS: [&str; 3] = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"];
    let trimmed = value.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| {
            LedgerError::DateError(format!(
                "Invalid date '{}'. Expected YYYY-MM-DD, DD.MM.YYYY or DD/MM/YYYY",
                value
            ))
        })
}

/// Parses an amount, accepting a decimal comma when no dot is present.
pub fn parse_amount(value: &str) -> Option<f64> {
    let trimmed = value.trim().replace(' ', "");
    if trimmed.is_empty() {
        return None;
    }
    let normalized = if trimmed.contains(',') && !trimmed.contains('.') {
        trimmed.replace(',', ".")
    } else {
        trimmed.replace(',', "")
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

// ---------------------------------------------------------------------------
// Descriptive statistics over plain slices
// ---------------------------------------------------------------------------

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator).
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

/// Population variance (n denominator).
pub fn population_variance(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    Some(values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Median absolute deviation around the median.
pub fn median_abs_deviation(values: &[f64]) -> Option<f64> {
    let med = median(values)?;
    let deviations: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
    median(&deviations)
}

/// Percentage change between consecutive values. A zero predecessor yields
/// `None` for that step.
pub fn pct_changes(values: &[f64]) -> Vec<Option<f64>> {
    values
        .windows(2)
        .map(|w| {
            if w[0] == 0.0 {
                None
            } else {
                Some((w[1] - w[0]) / w[0] * 100.0)
            }
        })
        .collect()
}

/// Guarded percentage: `numerator / denominator * 100`, or 0 on a zero denominator.
pub fn safe_pct(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator * 100.0
    }
}

/// Trailing mean with `min_periods = 1` semantics.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let slice = &values[start..=i];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let mx = mean(x)?;
    let my = mean(y)?;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some(sxy / (sxx * syy).sqrt())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub p_value: f64,
}

/// Ordinary least squares of `y` against its index, with a two-sided
/// p-value for the slope from Student's t with n - 2 degrees of freedom.
pub fn linear_regression(y: &[f64]) -> Option<LinearFit> {
    use statrs::distribution::{ContinuousCDF, StudentsT};

    let n = y.len();
    if n < 3 {
        return None;
    }
    let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let mx = mean(&x)?;
    let my = mean(y)?;
    let sxx: f64 = x.iter().map(|v| (v - mx).powi(2)).sum();
    let sxy: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
    let syy: f64 = y.iter().map(|v| (v - my).powi(2)).sum();

    let slope = sxy / sxx;
    let intercept = my - slope * mx;

    if syy == 0.0 {
        return Some(LinearFit {
            slope,
            intercept,
            r_squared: 0.0,
            p_value: 1.0,
        });
    }

    let r = sxy / (sxx * syy).sqrt();
    let r_squared = r * r;
    let df = (n - 2) as f64;
    let residual = (1.0 - r_squared).max(0.0);

    let p_value = if residual == 0.0 {
        0.0
    } else {
        let t = r * (df / residual).sqrt();
        let dist = StudentsT::new(0.0, 1.0, df).ok()?;
        2.0 * (1.0 - dist.cdf(t.abs()))
    };

    Some(LinearFit {
        slope,
        intercept,
        r_squared,
        p_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_months() {
        let observed = vec![
            YearMonth::new(2023, 11),
            YearMonth::new(2024, 2),
            YearMonth::new(2023, 12),
        ];
        assert_eq!(missing_months(&observed), vec![YearMonth::new(2024, 1)]);
        assert!(missing_months(&[]).is_empty());
    }

    #[test]
    fn test_parse_ledger_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(parse_ledger_date("2024-03-15").unwrap(), expected);
        assert_eq!(parse_ledger_date("15.03.2024").unwrap(), expected);
        assert_eq!(parse_ledger_date("15/03/2024").unwrap(), expected);
        assert!(parse_ledger_date("March 15").is_err());
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1234.50"), Some(1234.5));
        assert_eq!(parse_amount("1234,50"), Some(1234.5));
        assert_eq!(parse_amount("1,234.50"), Some(1234.5));
        assert_eq!(parse_amount("-20"), Some(-20.0));
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("abc"), None);
    }

    #[test]
    fn test_basic_statistics() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&values).unwrap() - 5.0).abs() < 1e-12);
        assert!((sample_std(&values).unwrap() - 2.138089935).abs() < 1e-6);
        assert!((median(&values).unwrap() - 4.5).abs() < 1e-12);
        assert!((median_abs_deviation(&values).unwrap() - 0.5).abs() < 1e-12);
        assert!(sample_std(&[1.0]).is_none());
    }

    #[test]
    fn test_rolling_mean_min_periods() {
        let rolled = rolling_mean(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(rolled, vec![1.0, 1.5, 2.0, 3.0]);
    }

    #[test]
    fn test_pct_changes_guard_zero() {
        let changes = pct_changes(&[0.0, 100.0, 110.0]);
        assert_eq!(changes[0], None);
        assert!((changes[1].unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_linear_regression_perfect_line() {
        let y: Vec<f64> = (0..10).map(|i| 3.0 + 2.0 * i as f64).collect();
        let fit = linear_regression(&y).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-9);
        assert!((fit.intercept - 3.0).abs() < 1e-9);
        assert!(fit.p_value < 0.01);
    }

    #[test]
    fn test_linear_regression_noise_not_significant() {
        let y = [5.0, 1.0, 5.0, 1.0, 5.0, 1.0, 5.0, 1.0];
        let fit = linear_regression(&y).unwrap();
        assert!(fit.p_value > 0.05);
    }

    #[test]
    fn test_pearson() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [2.0, 4.0, 6.0, 8.0];
        assert!((pearson(&x, &y).unwrap() - 1.0).abs() < 1e-12);
        assert!(pearson(&x, &[1.0, 1.0, 1.0, 1.0]).is_none());
    }
}
