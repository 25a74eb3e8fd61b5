//! Financial ratios and the going-concern assessment built on them.

use crate::config::AnalysisConfig;
use crate::error::{LedgerError, Result};
use crate::schema::Transaction;
use crate::statements::{synthesize_statements, FinancialStatements, INVENTORY_SHARE_OF_CURRENT_ASSETS};
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const SCORE_EXCELLENT: f64 = 90.0;
pub const SCORE_GOOD: f64 = 75.0;
pub const SCORE_WARNING: f64 = 50.0;
pub const SCORE_CRITICAL: f64 = 25.0;
/// Sub-score of a category with no applicable ratio.
pub const NEUTRAL_SCORE: f64 = 50.0;

pub const MAX_RISKS: usize = 5;
pub const MAX_STRENGTHS: usize = 5;
pub const MAX_RECOMMENDATIONS: usize = 6;
const MAX_WARNING_RISKS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RatioCategory {
    Liquidity,
    Solvency,
    #[serde(rename = "Cash Flow")]
    CashFlow,
    Profitability,
    Efficiency,
}

impl fmt::Display for RatioCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RatioCategory::Liquidity => "Liquidity",
            RatioCategory::Solvency => "Solvency",
            RatioCategory::CashFlow => "Cash Flow",
            RatioCategory::Profitability => "Profitability",
            RatioCategory::Efficiency => "Efficiency",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatioStatus {
    Excellent,
    Good,
    Warning,
    Critical,
}

impl RatioStatus {
    pub fn score(self) -> f64 {
        match self {
            RatioStatus::Excellent => SCORE_EXCELLENT,
            RatioStatus::Good => SCORE_GOOD,
            RatioStatus::Warning => SCORE_WARNING,
            RatioStatus::Critical => SCORE_CRITICAL,
        }
    }

    fn title(self) -> &'static str {
        match self {
            RatioStatus::Excellent => "Excellent",
            RatioStatus::Good => "Good",
            RatioStatus::Warning => "Warning",
            RatioStatus::Critical => "Critical",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdDirection {
    #[default]
    HigherIsBetter,
    LowerIsBetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RatioThresholds {
    pub excellent: f64,
    pub good: f64,
    pub warning: f64,
    #[schemars(description = "Informational floor; anything failing 'warning' is critical")]
    pub critical: f64,
    #[serde(default)]
    pub direction: ThresholdDirection,
}

impl RatioThresholds {
    const fn higher(excellent: f64, good: f64, warning: f64, critical: f64) -> Self {
        Self {
            excellent,
            good,
            warning,
            critical,
            direction: ThresholdDirection::HigherIsBetter,
        }
    }

    const fn lower(excellent: f64, good: f64, warning: f64, critical: f64) -> Self {
        Self {
            excellent,
            good,
            warning,
            critical,
            direction: ThresholdDirection::LowerIsBetter,
        }
    }

    /// Best tier whose threshold the value meets.
    pub fn status(&self, value: f64) -> RatioStatus {
        let meets = |threshold: f64| match self.direction {
            ThresholdDirection::HigherIsBetter => value >= threshold,
            ThresholdDirection::LowerIsBetter => value <= threshold,
        };
        if meets(self.excellent) {
            RatioStatus::Excellent
        } else if meets(self.good) {
            RatioStatus::Good
        } else if meets(self.warning) {
            RatioStatus::Warning
        } else {
            RatioStatus::Critical
        }
    }

    fn is_ordered(&self) -> bool {
        let tiers = [self.excellent, self.good, self.warning, self.critical];
        match self.direction {
            ThresholdDirection::HigherIsBetter => tiers.windows(2).all(|w| w[0] >= w[1]),
            ThresholdDirection::LowerIsBetter => tiers.windows(2).all(|w| w[0] <= w[1]),
        }
    }
}

/// Fixed description of one ratio. Thresholds here are the defaults of
/// [`RatioPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct RatioDefinition {
    pub name: &'static str,
    pub formula: &'static str,
    pub benchmark: &'static str,
    pub category: RatioCategory,
    pub thresholds: RatioThresholds,
    /// Statement lines the ratio reads.
    pub inputs: &'static [&'static str],
}

pub static RATIO_DEFINITIONS: [RatioDefinition; 20] = [
    RatioDefinition {
        name: "current_ratio",
        formula: "Current Assets / Current Liabilities",
        benchmark: "> 1.5 is good, < 1 is concern",
        category: RatioCategory::Liquidity,
        thresholds: RatioThresholds::higher(2.0, 1.5, 1.0, 0.5),
        inputs: &["Current Assets", "Current Liabilities"],
    },
    RatioDefinition {
        name: "quick_ratio",
        formula: "(Current Assets - Inventories) / Current Liabilities",
        benchmark: "> 1 is healthy",
        category: RatioCategory::Liquidity,
        thresholds: RatioThresholds::higher(1.5, 1.0, 0.8, 0.5),
        inputs: &["Current Assets", "Current Liabilities"],
    },
    RatioDefinition {
        name: "cash_ratio",
        formula: "(Cash + Marketable Securities) / Current Liabilities",
        benchmark: "> 0.5 is okay, > 1 is strong",
        category: RatioCategory::Liquidity,
        thresholds: RatioThresholds::higher(1.0, 0.5, 0.3, 0.1),
        inputs: &["Cash and Cash Equivalents", "Current Liabilities"],
    },
    RatioDefinition {
        name: "operating_cash_flow_ratio",
        formula: "Cash Flow from Operations / Current Liabilities",
        benchmark: "> 1 is ideal",
        category: RatioCategory::Liquidity,
        thresholds: RatioThresholds::higher(1.5, 1.0, 0.8, 0.5),
        inputs: &["Operating Cash Flow", "Current Liabilities"],
    },
    RatioDefinition {
        name: "working_capital",
        formula: "Current Assets - Current Liabilities",
        benchmark: "Positive value preferred",
        category: RatioCategory::Liquidity,
        thresholds: RatioThresholds::higher(1_000_000.0, 500_000.0, 0.0, -500_000.0),
        inputs: &["Current Assets", "Current Liabilities"],
    },
    RatioDefinition {
        name: "net_working_capital_ratio",
        formula: "(Current Assets - Current Liabilities) / Total Assets",
        benchmark: "> 0.1 is decent",
        category: RatioCategory::Liquidity,
        thresholds: RatioThresholds::higher(0.2, 0.1, 0.05, 0.0),
        inputs: &["Current Assets", "Current Liabilities", "Total Assets"],
    },
    RatioDefinition {
        name: "debt_to_equity_ratio",
        formula: "Total Debt / Total Equity",
        benchmark: "< 1.5 is typical; > 2 is high risk",
        category: RatioCategory::Solvency,
        thresholds: RatioThresholds::lower(0.5, 1.5, 2.0, 3.0),
        inputs: &["Total Liabilities", "Total Equity"],
    },
    RatioDefinition {
        name: "equity_ratio",
        formula: "Total Equity / Total Assets",
        benchmark: "> 0.4 is good",
        category: RatioCategory::Solvency,
        thresholds: RatioThresholds::higher(0.6, 0.4, 0.3, 0.2),
        inputs: &["Total Equity", "Total Assets"],
    },
    RatioDefinition {
        name: "debt_ratio",
        formula: "Total Debt / Total Assets",
        benchmark: "< 0.5 preferred",
        category: RatioCategory::Solvency,
        thresholds: RatioThresholds::lower(0.3, 0.5, 0.7, 0.8),
        inputs: &["Total Liabilities", "Total Assets"],
    },
    RatioDefinition {
        name: "interest_coverage_ratio",
        formula: "EBIT / Interest Expense",
        benchmark: "> 3 is strong, < 1.5 is concerning",
        category: RatioCategory::Solvency,
        thresholds: RatioThresholds::higher(5.0, 3.0, 1.5, 1.0),
        inputs: &["EBIT", "Interest Expense"],
    },
    RatioDefinition {
        name: "fixed_charge_coverage_ratio",
        formula: "(EBIT + Lease Payments) / (Interest + Lease Payments)",
        benchmark: "> 2 is safe",
        category: RatioCategory::Solvency,
        thresholds: RatioThresholds::higher(3.0, 2.0, 1.5, 1.0),
        inputs: &["EBIT", "Interest Expense", "Lease Payments"],
    },
    RatioDefinition {
        name: "long_term_debt_to_capitalization",
        formula: "Long-term Debt / (Long-term Debt + Equity)",
        benchmark: "< 0.5 ideal",
        category: RatioCategory::Solvency,
        thresholds: RatioThresholds::lower(0.3, 0.5, 0.7, 0.8),
        inputs: &["Long-term Debt", "Total Equity"],
    },
    RatioDefinition {
        name: "cash_flow_to_debt_ratio",
        formula: "Operating Cash Flow / Total Debt",
        benchmark: "> 0.2-0.3 is healthy",
        category: RatioCategory::CashFlow,
        thresholds: RatioThresholds::higher(0.4, 0.3, 0.2, 0.1),
        inputs: &["Operating Cash Flow", "Total Liabilities"],
    },
    RatioDefinition {
        name: "free_cash_flow",
        formula: "Operating Cash Flow - Capital Expenditures",
        benchmark: "Positive value is good",
        category: RatioCategory::CashFlow,
        thresholds: RatioThresholds::higher(1_000_000.0, 500_000.0, 0.0, -500_000.0),
        inputs: &["Free Cash Flow"],
    },
    RatioDefinition {
        name: "free_cash_flow_to_revenue",
        formula: "Free Cash Flow / Revenue",
        benchmark: "> 5% is considered healthy",
        category: RatioCategory::CashFlow,
        thresholds: RatioThresholds::higher(0.1, 0.05, 0.02, 0.0),
        inputs: &["Free Cash Flow", "Revenue"],
    },
    RatioDefinition {
        name: "current_liability_coverage_ratio",
        formula: "Free Cash Flow / Current Liabilities",
        benchmark: "> 1 is ideal",
        category: RatioCategory::CashFlow,
        thresholds: RatioThresholds::higher(1.5, 1.0, 0.8, 0.5),
        inputs: &["Free Cash Flow", "Current Liabilities"],
    },
    RatioDefinition {
        name: "net_profit_margin",
        formula: "Net Income / Revenue",
        benchmark: "Varies by industry, but positive is essential",
        category: RatioCategory::Profitability,
        thresholds: RatioThresholds::higher(0.15, 0.10, 0.05, 0.0),
        inputs: &["Net Income", "Revenue"],
    },
    RatioDefinition {
        name: "return_on_assets",
        formula: "Net Income / Total Assets",
        benchmark: "> 5% generally decent",
        category: RatioCategory::Profitability,
        thresholds: RatioThresholds::higher(0.10, 0.05, 0.03, 0.0),
        inputs: &["Net Income", "Total Assets"],
    },
    RatioDefinition {
        name: "return_on_equity",
        formula: "Net Income / Equity",
        benchmark: "> 10-15% is strong",
        category: RatioCategory::Profitability,
        thresholds: RatioThresholds::higher(0.20, 0.15, 0.10, 0.05),
        inputs: &["Net Income", "Total Equity"],
    },
    RatioDefinition {
        name: "asset_turnover",
        formula: "Revenue / Total Assets",
        benchmark: "> 1 indicates efficient use of assets",
        category: RatioCategory::Efficiency,
        thresholds: RatioThresholds::higher(1.5, 1.0, 0.8, 0.5),
        inputs: &["Revenue", "Total Assets"],
    },
];

/// Threshold table keyed by ratio name. Ratios absent from the table fall
/// back to their built-in thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct RatioPolicy {
    pub thresholds: BTreeMap<String, RatioThresholds>,
}

impl Default for RatioPolicy {
    fn default() -> Self {
        Self {
            thresholds: RATIO_DEFINITIONS
                .iter()
                .map(|d| (d.name.to_string(), d.thresholds))
                .collect(),
        }
    }
}

impl RatioPolicy {
    pub fn thresholds_for(&self, definition: &RatioDefinition) -> RatioThresholds {
        self.thresholds
            .get(definition.name)
            .copied()
            .unwrap_or(definition.thresholds)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, thresholds) in &self.thresholds {
            if !RATIO_DEFINITIONS.iter().any(|d| d.name == name) {
                return Err(LedgerError::InvalidConfig {
                    field: format!("ratios.thresholds.{}", name),
                    details: "unknown ratio".to_string(),
                });
            }
            if !thresholds.is_ordered() {
                return Err(LedgerError::InvalidConfig {
                    field: format!("ratios.thresholds.{}", name),
                    details: format!(
                        "tiers must be monotonic for {:?}: {} / {} / {} / {}",
                        thresholds.direction,
                        thresholds.excellent,
                        thresholds.good,
                        thresholds.warning,
                        thresholds.critical
                    ),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioResult {
    pub name: String,
    /// 0.0 when not applicable.
    pub value: f64,
    pub category: RatioCategory,
    /// `None` when not applicable.
    pub status: Option<RatioStatus>,
    pub applicable: bool,
    pub formula: String,
    pub benchmark: String,
    pub interpretation: String,
    pub direction: ThresholdDirection,
    pub missing_inputs: Vec<String>,
}

impl RatioResult {
    /// "current_ratio" -> "Current Ratio"
    pub fn display_name(&self) -> String {
        self.name
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            })
            .collect::<Vec<String>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoingConcernStatus {
    Strong,
    Adequate,
    Concerning,
    Critical,
}

impl GoingConcernStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            GoingConcernStatus::Strong
        } else if score >= 60.0 {
            GoingConcernStatus::Adequate
        } else if score >= 40.0 {
            GoingConcernStatus::Concerning
        } else {
            GoingConcernStatus::Critical
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GoingConcernStatus::Strong => "strong",
            GoingConcernStatus::Adequate => "adequate",
            GoingConcernStatus::Concerning => "concerning",
            GoingConcernStatus::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoingConcernAssessment {
    pub overall_status: GoingConcernStatus,
    pub overall_score: f64,
    pub liquidity_score: f64,
    pub solvency_score: f64,
    pub cash_flow_score: f64,
    pub key_risks: Vec<String>,
    pub key_strengths: Vec<String>,
    pub recommendations: Vec<String>,
    pub detailed_analysis: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioAnalysis {
    pub statements: FinancialStatements,
    pub ratios: Vec<RatioResult>,
    pub going_concern: GoingConcernAssessment,
}

fn divide(numerator: f64, denominator: f64) -> Option<f64> {
    (denominator != 0.0).then(|| numerator / denominator)
}

pub struct RatioAnalyzer<'a> {
    statements: &'a FinancialStatements,
    policy: &'a RatioPolicy,
}

impl<'a> RatioAnalyzer<'a> {
    pub fn new(statements: &'a FinancialStatements, policy: &'a RatioPolicy) -> Self {
        Self { statements, policy }
    }

    /// Raw value, or `None` when an input is missing or a denominator is zero.
    pub fn ratio_value(&self, name: &str) -> Option<f64> {
        let bs = &self.statements.balance_sheet;
        let is = &self.statements.income_statement;
        let cf = &self.statements.cash_flow;

        match name {
            "current_ratio" => divide(bs.current_assets, bs.current_liabilities),
            "quick_ratio" => {
                let inventory = bs.current_assets * INVENTORY_SHARE_OF_CURRENT_ASSETS;
                divide(bs.current_assets - inventory, bs.current_liabilities)
            }
            "cash_ratio" => divide(cf.cash_and_equivalents, bs.current_liabilities),
            "operating_cash_flow_ratio" => divide(cf.operating_cash_flow, bs.current_liabilities),
            "working_capital" => Some(bs.current_assets - bs.current_liabilities),
            "net_working_capital_ratio" => {
                divide(bs.current_assets - bs.current_liabilities, bs.total_assets)
            }
            "debt_to_equity_ratio" => divide(bs.total_liabilities, bs.total_equity),
            "equity_ratio" => divide(bs.total_equity, bs.total_assets),
            "debt_ratio" => divide(bs.total_liabilities, bs.total_assets),
            "interest_coverage_ratio" => divide(is.ebit, is.interest_expense),
            "cash_flow_to_debt_ratio" => divide(cf.operating_cash_flow, bs.total_liabilities),
            "free_cash_flow" => Some(cf.free_cash_flow),
            "free_cash_flow_to_revenue" => divide(cf.free_cash_flow, is.revenue),
            "current_liability_coverage_ratio" => {
                divide(cf.free_cash_flow, bs.current_liabilities)
            }
            "net_profit_margin" => divide(is.net_income, is.revenue),
            "return_on_assets" => divide(is.net_income, bs.total_assets),
            "return_on_equity" => divide(is.net_income, bs.total_equity),
            "asset_turnover" => divide(is.revenue, bs.total_assets),
            // Lease payments and long-term debt are not in a ledger extract.
            _ => None,
        }
    }

    fn missing_inputs(&self, definition: &RatioDefinition) -> Vec<String> {
        definition
            .inputs
            .iter()
            .filter(|line| self.statements.line(line).map_or(true, |v| v == 0.0))
            .map(|line| line.to_string())
            .collect()
    }

    pub fn evaluate(&self, definition: &RatioDefinition) -> RatioResult {
        let thresholds = self.policy.thresholds_for(definition);
        let base = RatioResult {
            name: definition.name.to_string(),
            value: 0.0,
            category: definition.category,
            status: None,
            applicable: false,
            formula: definition.formula.to_string(),
            benchmark: definition.benchmark.to_string(),
            interpretation: "Not applicable - insufficient data".to_string(),
            direction: thresholds.direction,
            missing_inputs: Vec::new(),
        };

        match self.ratio_value(definition.name) {
            Some(value) if value.is_finite() => {
                let status = thresholds.status(value);
                RatioResult {
                    value,
                    status: Some(status),
                    applicable: true,
                    interpretation: interpretation(definition.name, value, status),
                    ..base
                }
            }
            _ => RatioResult {
                missing_inputs: self.missing_inputs(definition),
                ..base
            },
        }
    }

    pub fn calculate_all(&self) -> Vec<RatioResult> {
        RATIO_DEFINITIONS.iter().map(|d| self.evaluate(d)).collect()
    }
}

fn interpretation(name: &str, value: f64, status: RatioStatus) -> String {
    use RatioStatus::*;
    let text = match (name, status) {
        ("current_ratio", Excellent) => "Excellent liquidity position (Current Ratio: {v}). The entity has strong ability to meet short-term obligations.",
        ("current_ratio", Good) => "Good liquidity position (Current Ratio: {v}). The entity can comfortably meet short-term obligations.",
        ("current_ratio", Warning) => "Moderate liquidity concern (Current Ratio: {v}). The entity may face challenges meeting short-term obligations.",
        ("current_ratio", Critical) => "Critical liquidity issue (Current Ratio: {v}). The entity may struggle to meet short-term obligations.",
        ("quick_ratio", Excellent) => "Excellent quick liquidity (Quick Ratio: {v}). Strong ability to meet obligations without relying on inventory sales.",
        ("quick_ratio", Good) => "Good quick liquidity (Quick Ratio: {v}). Adequate liquid assets to meet short-term obligations.",
        ("quick_ratio", Warning) => "Concerning quick liquidity (Quick Ratio: {v}). Limited liquid assets relative to short-term obligations.",
        ("quick_ratio", Critical) => "Critical quick liquidity issue (Quick Ratio: {v}). Insufficient liquid assets to meet short-term obligations.",
        ("cash_ratio", Excellent) => "Excellent cash position (Cash Ratio: {v}). Strong ability to cover liabilities with cash alone.",
        ("cash_ratio", Good) => "Good cash position (Cash Ratio: {v}). Adequate cash reserves relative to current liabilities.",
        ("cash_ratio", Warning) => "Moderate cash concern (Cash Ratio: {v}). Limited cash reserves relative to current liabilities.",
        ("cash_ratio", Critical) => "Critical cash shortage (Cash Ratio: {v}). Insufficient cash to cover current liabilities.",
        ("debt_to_equity_ratio", Excellent) => "Excellent capital structure (Debt-to-Equity: {v}). Low leverage indicates strong financial stability.",
        ("debt_to_equity_ratio", Good) => "Good capital structure (Debt-to-Equity: {v}). Moderate leverage with acceptable risk levels.",
        ("debt_to_equity_ratio", Warning) => "High leverage concern (Debt-to-Equity: {v}). Elevated debt levels may increase financial risk.",
        ("debt_to_equity_ratio", Critical) => "Critical leverage issue (Debt-to-Equity: {v}). Excessive debt levels pose significant solvency risk.",
        _ => return format!("Ratio value: {:.4} (Status: {})", value, status.title()),
    };
    text.replace("{v}", &format!("{:.2}", value))
}

fn category_score(ratios: &[RatioResult], category: RatioCategory) -> f64 {
    let scores: Vec<f64> = ratios
        .iter()
        .filter(|r| r.category == category)
        .filter_map(|r| r.status.map(RatioStatus::score))
        .collect();
    if scores.is_empty() {
        NEUTRAL_SCORE
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

fn risk_statement(ratio: &RatioResult) -> Option<String> {
    let (label, consequence) = match ratio.category {
        RatioCategory::Liquidity => ("liquidity", "severe short-term financial stress"),
        RatioCategory::Solvency => ("solvency", "high long-term financial risk"),
        RatioCategory::CashFlow => ("cash flow", "severe cash generation problems"),
        _ => return None,
    };
    Some(format!(
        "Critical {} risk: {} indicates {}",
        label,
        ratio.display_name(),
        consequence
    ))
}

fn strength_statement(ratio: &RatioResult) -> Option<String> {
    let (label, consequence) = match ratio.category {
        RatioCategory::Liquidity => ("liquidity", "excellent short-term financial health"),
        RatioCategory::Solvency => ("solvency", "excellent long-term financial stability"),
        RatioCategory::CashFlow => ("cash flow", "excellent cash generation"),
        _ => return None,
    };
    Some(format!(
        "Strong {}: {} indicates {}",
        label,
        ratio.display_name(),
        consequence
    ))
}

fn with_status(ratios: &[RatioResult], status: RatioStatus) -> impl Iterator<Item = &RatioResult> {
    ratios.iter().filter(move |r| r.status == Some(status))
}

fn key_risks(ratios: &[RatioResult]) -> Vec<String> {
    let mut risks: Vec<String> = with_status(ratios, RatioStatus::Critical)
        .filter_map(risk_statement)
        .collect();
    risks.extend(
        with_status(ratios, RatioStatus::Warning)
            .take(MAX_WARNING_RISKS)
            .map(|r| format!("Moderate risk: {} requires monitoring", r.display_name())),
    );
    risks.truncate(MAX_RISKS);
    risks
}

fn key_strengths(ratios: &[RatioResult]) -> Vec<String> {
    let mut strengths: Vec<String> = with_status(ratios, RatioStatus::Excellent)
        .filter_map(strength_statement)
        .collect();
    strengths.truncate(MAX_STRENGTHS);
    strengths
}

fn recommendations(risks: &[String]) -> Vec<String> {
    let flagged = |needle: &str| risks.iter().any(|r| r.to_lowercase().contains(needle));
    let mut out = Vec::new();
    if flagged("liquidity risk") {
        out.push("URGENT: Implement immediate liquidity management measures including cash flow forecasting and working capital optimization".to_string());
    }
    if flagged("solvency risk") {
        out.push("CRITICAL: Restructure debt obligations and consider equity infusion to improve capital structure".to_string());
    }
    if flagged("cash flow risk") {
        out.push("HIGH PRIORITY: Implement aggressive cash flow improvement measures including cost reduction and revenue enhancement".to_string());
    }
    out.push("Establish monthly financial monitoring and early warning systems".to_string());
    out.push("Develop contingency plans for various stress scenarios".to_string());
    out.push("Consider external financing options to strengthen financial position".to_string());
    out.truncate(MAX_RECOMMENDATIONS);
    out
}

fn score_band(score: f64) -> &'static str {
    if score >= 75.0 {
        "strong"
    } else if score >= 50.0 {
        "adequate"
    } else if score >= 25.0 {
        "concerning"
    } else {
        "critical"
    }
}

fn detailed_analysis(status: GoingConcernStatus, liquidity: f64, solvency: f64, cash_flow: f64) -> String {
    let conclusion = match status {
        GoingConcernStatus::Strong => "demonstrates strong financial health and is expected to continue operating as a going concern",
        GoingConcernStatus::Adequate => "shows adequate financial health with some areas requiring attention, but is expected to continue as a going concern",
        GoingConcernStatus::Concerning => "exhibits concerning financial indicators that require immediate management attention to ensure going concern status",
        GoingConcernStatus::Critical => "faces critical financial challenges that may threaten its going concern status and requires urgent intervention",
    };
    let label = status.as_str().to_uppercase();

    let mut text = String::new();
    text.push_str("GOING CONCERN ASSESSMENT\n\n");
    text.push_str(&format!("OVERALL ASSESSMENT: {}\n\n", label));
    text.push_str(&format!(
        "Liquidity Score: {:.1}/100\nSolvency Score: {:.1}/100\nCash Flow Score: {:.1}/100\n\n",
        liquidity, solvency, cash_flow
    ));
    text.push_str(&format!(
        "LIQUIDITY: scores {:.1}/100, indicating {} short-term financial health.\n",
        liquidity,
        score_band(liquidity)
    ));
    text.push_str(&format!(
        "SOLVENCY: scores {:.1}/100, indicating {} long-term financial stability.\n",
        solvency,
        score_band(solvency)
    ));
    text.push_str(&format!(
        "CASH FLOW: scores {:.1}/100, indicating {} cash generation capability.\n\n",
        cash_flow,
        score_band(cash_flow)
    ));
    text.push_str(&format!("CONCLUSION: The entity {}.", conclusion));
    text
}

pub fn assess_going_concern(ratios: &[RatioResult]) -> GoingConcernAssessment {
    let liquidity_score = category_score(ratios, RatioCategory::Liquidity);
    let solvency_score = category_score(ratios, RatioCategory::Solvency);
    let cash_flow_score = category_score(ratios, RatioCategory::CashFlow);
    let overall_score = (liquidity_score + solvency_score + cash_flow_score) / 3.0;
    let overall_status = GoingConcernStatus::from_score(overall_score);

    let key_risks = key_risks(ratios);
    let recommendations = recommendations(&key_risks);

    GoingConcernAssessment {
        overall_status,
        overall_score,
        liquidity_score,
        solvency_score,
        cash_flow_score,
        key_strengths: key_strengths(ratios),
        recommendations,
        key_risks,
        detailed_analysis: detailed_analysis(
            overall_status,
            liquidity_score,
            solvency_score,
            cash_flow_score,
        ),
    }
}

pub fn analyze_ratios(transactions: &[Transaction], config: &AnalysisConfig) -> RatioAnalysis {
    info!("[{}] Starting ratio analysis", config.run_label);

    let statements = synthesize_statements(transactions);
    let ratios = RatioAnalyzer::new(&statements, &config.ratios).calculate_all();
    let going_concern = assess_going_concern(&ratios);

    debug!(
        "[{}] {} of {} ratios applicable",
        config.run_label,
        ratios.iter().filter(|r| r.applicable).count(),
        ratios.len()
    );
    info!(
        "[{}] Going concern: {} ({:.1})",
        config.run_label,
        going_concern.overall_status.as_str(),
        going_concern.overall_score
    );

    RatioAnalysis {
        statements,
        ratios,
        going_concern,
    }
}
