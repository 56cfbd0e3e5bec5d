//! Expense-splitting ledger: groups of members record what they paid on each
//! other's behalf, and the ledger works out who owes whom.

pub mod auth;
pub mod balance;
pub mod config;
pub mod error;
pub mod ledger;
pub mod rounding;
pub mod routes;
pub mod schemas;
pub mod split;
pub mod store;
pub mod telemetry;

pub use balance::{compute_balance_from_group, Balance, BalanceRecord};
pub use error::{LedgerError, LedgerResult, StoreError};
pub use ledger::{Ledger, NewExpense};
pub use rounding::RoundingMode;
pub use schemas::{Expense, ExpenseId, ExpenseShare, Group, GroupId, Member, MemberId, SplitMode};
pub use split::{compute_shares, Split};
