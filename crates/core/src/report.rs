use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::money::Money;
use super::transaction::{Direction, Transaction};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryTotal {
    pub category: String,
    pub total: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyIncomeExpense {
    /// `YYYY-MM`
    pub month: String,
    pub income: Money,
    pub expenses: Money,
    pub net: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopSource {
    pub name: String,
    pub amount: Money,
    pub count: usize,
    pub category: String,
}

/// Income vs. expense figures over a set of persisted transactions.
/// Amounts are taken in the base currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomeExpenseSummary {
    pub total_income: Money,
    pub total_expenses: Money,
    pub net_cashflow: Money,
    /// Percentage of income kept; 0 when there is no income.
    pub savings_rate: f64,
    pub income_by_category: Vec<CategoryTotal>,
    pub expenses_by_category: Vec<CategoryTotal>,
    pub monthly_trends: Vec<MonthlyIncomeExpense>,
    pub top_income_sources: Vec<TopSource>,
}

const TOP_SOURCES: usize = 5;

impl IncomeExpenseSummary {
    pub fn from_transactions(transactions: &[Transaction]) -> Self {
        let (income, expenses): (Vec<&Transaction>, Vec<&Transaction>) = transactions
            .iter()
            .partition(|t| t.data.direction == Direction::Income);

        let total_income: Money = income.iter().map(|t| t.data.amount_base).sum();
        let total_expenses: Money = expenses.iter().map(|t| t.data.amount_base).sum();
        let net_cashflow = total_income - total_expenses;

        let savings_rate = if total_income.is_zero() {
            0.0
        } else {
            (net_cashflow.as_decimal() / total_income.as_decimal() * Decimal::from(100))
                .to_f64()
                .unwrap_or(0.0)
        };

        IncomeExpenseSummary {
            total_income,
            total_expenses,
            net_cashflow,
            savings_rate,
            income_by_category: by_category(&income),
            expenses_by_category: by_category(&expenses),
            monthly_trends: monthly_trends(transactions),
            top_income_sources: top_sources(&income),
        }
    }
}

fn by_category(transactions: &[&Transaction]) -> Vec<CategoryTotal> {
    let mut totals: HashMap<&str, Money> = HashMap::new();
    for t in transactions {
        let entry = totals.entry(t.data.category.as_str()).or_default();
        *entry = *entry + t.data.amount_base;
    }
    let mut out: Vec<CategoryTotal> = totals
        .into_iter()
        .map(|(category, total)| CategoryTotal {
            category: category.to_string(),
            total,
        })
        .collect();
    out.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.category.cmp(&b.category)));
    out
}

fn monthly_trends(transactions: &[Transaction]) -> Vec<MonthlyIncomeExpense> {
    let mut months: BTreeMap<String, (Money, Money)> = BTreeMap::new();
    for t in transactions {
        let key = t.data.transaction_date.format("%Y-%m").to_string();
        let (income, expenses) = months.entry(key).or_default();
        match t.data.direction {
            Direction::Income => *income = *income + t.data.amount_base,
            Direction::Expense => *expenses = *expenses + t.data.amount_base,
        }
    }
    months
        .into_iter()
        .map(|(month, (income, expenses))| MonthlyIncomeExpense {
            month,
            income,
            expenses,
            net: income - expenses,
        })
        .collect()
}

fn top_sources(income: &[&Transaction]) -> Vec<TopSource> {
    let mut sources: HashMap<&str, TopSource> = HashMap::new();
    for t in income {
        let src = sources
            .entry(t.data.merchant_name.as_str())
            .or_insert_with(|| TopSource {
                name: t.data.merchant_name.clone(),
                amount: Money::zero(),
                count: 0,
                category: t.data.category.clone(),
            });
        src.amount = src.amount + t.data.amount_base;
        src.count += 1;
    }
    let mut out: Vec<TopSource> = sources.into_values().collect();
    out.sort_by(|a, b| b.amount.cmp(&a.amount).then_with(|| a.name.cmp(&b.name)));
    out.truncate(TOP_SOURCES);
    out
}
