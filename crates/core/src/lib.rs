pub mod category;
pub mod money;
pub mod period;
pub mod report;
pub mod statement;
pub mod transaction;

pub use category::{Category, DEFAULT_CATEGORIES};
pub use money::Money;
pub use period::DateRange;
pub use report::{CategoryTotal, IncomeExpenseSummary, MonthlyIncomeExpense, TopSource};
pub use statement::{
    NewStatement, Statement, StatementFormat, StatementId, StatementStatus,
    StatementTotals,
};
pub use transaction::{Direction, NewTransaction, Transaction, TransactionKind};
