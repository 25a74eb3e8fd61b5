//! Pseudo financial statements synthesised from statement tags.
//!
//! A ledger extract carries no closing balances, so these views are estimates
//! built from tagged transaction totals. They are not GAAP statements. Every
//! line is taken in absolute value; the approximations used where the ledger
//! has no data are the named constants below.

use crate::schema::{AccountType, Transaction};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Capital expenditure is approximated as this multiple of depreciation.
pub const CAPEX_TO_DEPRECIATION: f64 = 1.5;

/// Inventory is approximated as this share of current assets (quick ratio).
pub const INVENTORY_SHARE_OF_CURRENT_ASSETS: f64 = 0.2;

pub const TAG_CASH: &str = "Cash and cash equivalents";
pub const TAG_REVENUE: &str = "Revenue";
pub const TAG_COST_OF_SALES: &str = "Cost of sales";
pub const TAG_OPERATING_EXPENSES: &str = "Operating expenses";
pub const TAG_PAYROLL: &str = "Payroll";
pub const TAG_OTHER_EXPENSES: &str = "Other expenses";
pub const TAG_INTEREST: &str = "Interest on lease obligations";
pub const TAG_INCOME_TAX: &str = "Income tax expense or benefit";
pub const TAG_EQUITY: &str = "Equity";
pub const TAG_TRADE_RECEIVABLES: &str = "Receivables - trade accounts";
pub const TAG_TRADE_PAYABLES: &str = "Payables - trade accounts";

const CURRENT_ASSET_TAGS: [&str; 5] = [
    TAG_CASH,
    "Inventory",
    TAG_TRADE_RECEIVABLES,
    "Other receivables",
    "Prepaid expenses and accrued income",
];

const NON_CURRENT_ASSET_TAGS: [&str; 4] = [
    "Property, plant, and equipment",
    "Intangibles - other",
    "Leases - right of use assets",
    "Deferred tax asset or liability",
];

const CURRENT_LIABILITY_TAGS: [&str; 3] = [TAG_TRADE_PAYABLES, "Other payables", "Deferred revenue"];

// Deferred tax sits on both sides; the ledger cannot tell which.
const NON_CURRENT_LIABILITY_TAGS: [&str; 2] = ["Lease liabilities", "Deferred tax asset or liability"];

const DEPRECIATION_TAGS: [&str; 3] = [
    "Depreciation of property, plant, and equipment",
    "Depreciation/amortization of rights of use assets",
    "Amortization of intangibles - other",
];

/// Tag used for an entry that carries none of its own.
pub fn fallback_tag(account_type: AccountType) -> Option<&'static str> {
    match account_type {
        AccountType::Revenue => Some(TAG_REVENUE),
        AccountType::Opex => Some(TAG_OPERATING_EXPENSES),
        AccountType::Payroll => Some(TAG_PAYROLL),
        AccountType::Interest => Some(TAG_INTEREST),
        AccountType::Receivable => Some(TAG_TRADE_RECEIVABLES),
        AccountType::Payable => Some(TAG_TRADE_PAYABLES),
        AccountType::Other => None,
    }
}

/// Explicit tag of a mapped row, else the fallback for its type. Unmapped rows
/// have no tag.
pub fn effective_tag(transaction: &Transaction) -> Option<&str> {
    if !transaction.is_mapped {
        return None;
    }
    match transaction.statement_tag.as_deref() {
        Some(tag) if !tag.trim().is_empty() => Some(tag.trim()),
        _ => fallback_tag(transaction.account_type),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub current_assets: f64,
    pub non_current_assets: f64,
    pub total_assets: f64,
    pub current_liabilities: f64,
    pub non_current_liabilities: f64,
    pub total_liabilities: f64,
    pub total_equity: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncomeStatement {
    pub revenue: f64,
    pub cost_of_sales: f64,
    pub gross_profit: f64,
    pub operating_expenses: f64,
    pub payroll: f64,
    pub depreciation: f64,
    pub other_expenses: f64,
    pub total_operating_expenses: f64,
    pub ebit: f64,
    pub interest_expense: f64,
    pub income_tax: f64,
    pub net_income: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CashFlowStatement {
    pub operating_cash_flow: f64,
    pub capital_expenditures: f64,
    pub free_cash_flow: f64,
    pub cash_and_equivalents: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialStatements {
    pub balance_sheet: BalanceSheet,
    pub income_statement: IncomeStatement,
    pub cash_flow: CashFlowStatement,
    /// Signed total per effective tag.
    pub tag_totals: BTreeMap<String, f64>,
}

impl FinancialStatements {
    /// Looks up a statement line by its display name. Lines the ledger can
    /// never provide (lease payments, long-term debt) return `None`.
    pub fn line(&self, name: &str) -> Option<f64> {
        let bs = &self.balance_sheet;
        let is = &self.income_statement;
        let cf = &self.cash_flow;
        let value = match name {
            "Current Assets" => bs.current_assets,
            "Non-Current Assets" => bs.non_current_assets,
            "Total Assets" => bs.total_assets,
            "Current Liabilities" => bs.current_liabilities,
            "Non-Current Liabilities" => bs.non_current_liabilities,
            "Total Liabilities" => bs.total_liabilities,
            "Total Equity" => bs.total_equity,
            "Revenue" => is.revenue,
            "Cost of Sales" => is.cost_of_sales,
            "Gross Profit" => is.gross_profit,
            "Depreciation" => is.depreciation,
            "EBIT" => is.ebit,
            "Interest Expense" => is.interest_expense,
            "Income Tax" => is.income_tax,
            "Net Income" => is.net_income,
            "Operating Cash Flow" => cf.operating_cash_flow,
            "Capital Expenditures" => cf.capital_expenditures,
            "Free Cash Flow" => cf.free_cash_flow,
            "Cash and Cash Equivalents" => cf.cash_and_equivalents,
            _ => return None,
        };
        Some(value)
    }
}

pub struct StatementBuilder<'a> {
    tag_totals: BTreeMap<&'a str, f64>,
}

impl<'a> StatementBuilder<'a> {
    pub fn new(transactions: &'a [Transaction]) -> Self {
        let mut tag_totals: BTreeMap<&'a str, f64> = BTreeMap::new();
        for t in transactions {
            if let Some(tag) = effective_tag(t) {
                *tag_totals.entry(tag).or_default() += t.amount;
            }
        }
        Self { tag_totals }
    }

    fn sum(&self, tags: &[&str]) -> f64 {
        tags.iter()
            .filter_map(|tag| self.tag_totals.get(*tag))
            .sum::<f64>()
            .abs()
    }

    pub fn balance_sheet(&self) -> BalanceSheet {
        let current_assets = self.sum(&CURRENT_ASSET_TAGS);
        let non_current_assets = self.sum(&NON_CURRENT_ASSET_TAGS);
        let current_liabilities = self.sum(&CURRENT_LIABILITY_TAGS);
        let non_current_liabilities = self.sum(&NON_CURRENT_LIABILITY_TAGS);

        BalanceSheet {
            current_assets,
            non_current_assets,
            total_assets: current_assets + non_current_assets,
            current_liabilities,
            non_current_liabilities,
            total_liabilities: current_liabilities + non_current_liabilities,
            total_equity: self.sum(&[TAG_EQUITY]),
        }
    }

    pub fn income_statement(&self) -> IncomeStatement {
        let revenue = self.sum(&[TAG_REVENUE]);
        let cost_of_sales = self.sum(&[TAG_COST_OF_SALES]);
        let gross_profit = revenue - cost_of_sales;
        let operating_expenses = self.sum(&[TAG_OPERATING_EXPENSES]);
        let payroll = self.sum(&[TAG_PAYROLL]);
        let depreciation = self.sum(&DEPRECIATION_TAGS);
        let other_expenses = self.sum(&[TAG_OTHER_EXPENSES]);
        let total_operating_expenses = operating_expenses + payroll + depreciation + other_expenses;
        let ebit = gross_profit - total_operating_expenses;
        let interest_expense = self.sum(&[TAG_INTEREST]);
        let income_tax = self.sum(&[TAG_INCOME_TAX]);

        IncomeStatement {
            revenue,
            cost_of_sales,
            gross_profit,
            operating_expenses,
            payroll,
            depreciation,
            other_expenses,
            total_operating_expenses,
            ebit,
            interest_expense,
            income_tax,
            net_income: ebit - interest_expense - income_tax,
        }
    }

    pub fn cash_flow(&self) -> CashFlowStatement {
        let revenue = self.sum(&[TAG_REVENUE]);
        let operating_costs = self.sum(&[
            TAG_COST_OF_SALES,
            TAG_OPERATING_EXPENSES,
            TAG_PAYROLL,
            TAG_OTHER_EXPENSES,
        ]);
        let operating_cash_flow = revenue - operating_costs;
        let capital_expenditures = self.sum(&DEPRECIATION_TAGS) * CAPEX_TO_DEPRECIATION;

        CashFlowStatement {
            operating_cash_flow,
            capital_expenditures,
            free_cash_flow: operating_cash_flow - capital_expenditures,
            cash_and_equivalents: self.sum(&[TAG_CASH]),
        }
    }

    pub fn build(&self) -> FinancialStatements {
        let statements = FinancialStatements {
            balance_sheet: self.balance_sheet(),
            income_statement: self.income_statement(),
            cash_flow: self.cash_flow(),
            tag_totals: self
                .tag_totals
                .iter()
                .map(|(tag, total)| (tag.to_string(), *total))
                .collect(),
        };
        debug!(
            "Synthesised statements from {} tags (total assets {:.2}, revenue {:.2})",
            statements.tag_totals.len(),
            statements.balance_sheet.total_assets,
            statements.income_statement.revenue
        );
        statements
    }
}

pub fn synthesize_statements(transactions: &[Transaction]) -> FinancialStatements {
    StatementBuilder::new(transactions).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart_of_accounts::MappingTable;
    use crate::config::AnalysisConfig;
    use crate::normalizer::normalize;
    use crate::schema::{MappingEntry, RawTransaction};
    use chrono::NaiveDate;

    fn ledger() -> Vec<Transaction> {
        let mapping = MappingTable::from_entries(vec![
            MappingEntry::new("400000", "Sales", AccountType::Revenue),
            MappingEntry::new("600000", "Rent", AccountType::Opex),
            MappingEntry::new("640000", "Salaries", AccountType::Payroll),
            MappingEntry::new("680000", "Depreciation", AccountType::Other)
                .with_statement_tag("Depreciation of property, plant, and equipment"),
            MappingEntry::new("512000", "Bank", AccountType::Other)
                .with_statement_tag(TAG_CASH),
            MappingEntry::new("101000", "Share capital", AccountType::Other)
                .with_statement_tag(TAG_EQUITY),
        ]);
        let date = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let rows = vec![
            RawTransaction::new(date, "1", "400000", -10_000.0),
            RawTransaction::new(date, "2", "600000", 3_000.0),
            RawTransaction::new(date, "3", "640000", 2_000.0),
            RawTransaction::new(date, "4", "680000", 1_000.0),
            RawTransaction::new(date, "5", "512000", 4_000.0),
            RawTransaction::new(date, "6", "101000", -5_000.0),
            RawTransaction::new(date, "7", "999999", 77_777.0),
        ];
        normalize(&rows, &mapping, &AnalysisConfig::default())
            .unwrap()
            .transactions
    }

    #[test]
    fn test_fallback_tags() {
        assert_eq!(fallback_tag(AccountType::Opex), Some(TAG_OPERATING_EXPENSES));
        assert_eq!(fallback_tag(AccountType::Payable), Some(TAG_TRADE_PAYABLES));
        assert_eq!(fallback_tag(AccountType::Other), None);
    }

    #[test]
    fn test_income_statement() {
        let statements = synthesize_statements(&ledger());
        let is = &statements.income_statement;
        assert!((is.revenue - 10_000.0).abs() < 0.01);
        assert!((is.total_operating_expenses - 6_000.0).abs() < 0.01);
        assert!((is.ebit - 4_000.0).abs() < 0.01);
        assert!((is.net_income - 4_000.0).abs() < 0.01);
    }

    #[test]
    fn test_cash_flow_uses_capex_approximation() {
        let cf = synthesize_statements(&ledger()).cash_flow;
        assert!((cf.operating_cash_flow - 5_000.0).abs() < 0.01);
        assert!((cf.capital_expenditures - 1_500.0).abs() < 0.01);
        assert!((cf.free_cash_flow - 3_500.0).abs() < 0.01);
        assert!((cf.cash_and_equivalents - 4_000.0).abs() < 0.01);
    }

    #[test]
    fn test_balance_sheet_and_unmapped_rows_ignored() {
        let statements = synthesize_statements(&ledger());
        let bs = &statements.balance_sheet;
        assert!((bs.current_assets - 4_000.0).abs() < 0.01);
        assert!((bs.total_equity - 5_000.0).abs() < 0.01);
        assert_eq!(bs.total_liabilities, 0.0);
        assert!(!statements.tag_totals.values().any(|v| (*v - 77_777.0).abs() < 0.01));
    }

    #[test]
    fn test_line_lookup() {
        let statements = synthesize_statements(&ledger());
        assert_eq!(statements.line("Revenue"), Some(statements.income_statement.revenue));
        assert_eq!(statements.line("Lease Payments"), None);
    }
}
