use std::collections::HashMap;

use serde::Serialize;

use crate::rounding::RoundingMode;
use crate::schemas::{Group, MemberId};

/// Where a member stands within a group.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BalanceRecord {
    /// Total of the expenses this member paid for.
    pub paid: f64,
    /// Total this member owes to the payers of other expenses.
    pub owed: f64,
    /// This member's own part of the expenses they paid for.
    pub own_share: f64,
    /// Who owes this member, and how much.
    pub owed_by: HashMap<MemberId, f64>,
    /// Whom this member owes, and how much.
    pub owes_to: HashMap<MemberId, f64>,
    /// `paid - own_share - owed`; positive means the group owes this member.
    pub net: f64,
}

pub type Balance = HashMap<MemberId, BalanceRecord>;

/// Fold the whole expense history of `group` into per-member balances.
///
/// Only current members get an entry. Shares recorded against members who
/// have since left still count on the other side of the debt.
pub fn compute_balance_from_group(group: &Group, rounding: RoundingMode) -> Balance {
    let mut balance: Balance = group
        .members()
        .iter()
        .map(|member| (*member, BalanceRecord::default()))
        .collect();

    for expense in group.expenses() {
        let payer = expense.payer;
        if let Some(record) = balance.get_mut(&payer) {
            record.paid += expense.amount;
        }

        for share in &expense.shares {
            if share.debtor == payer {
                if let Some(record) = balance.get_mut(&payer) {
                    record.own_share += share.amount;
                }
                continue;
            }
            if let Some(record) = balance.get_mut(&share.debtor) {
                record.owed += share.amount;
                *record.owes_to.entry(payer).or_insert(0.0) += share.amount;
            }
            if let Some(record) = balance.get_mut(&payer) {
                *record.owed_by.entry(share.debtor).or_insert(0.0) += share.amount;
            }
        }
    }

    for record in balance.values_mut() {
        record.net = rounding.round_to_2_decimals(record.paid - record.own_share - record.owed);
        record.paid = rounding.round_to_2_decimals(record.paid);
        record.owed = rounding.round_to_2_decimals(record.owed);
        record.own_share = rounding.round_to_2_decimals(record.own_share);
        for amount in record.owed_by.values_mut().chain(record.owes_to.values_mut()) {
            *amount = rounding.round_to_2_decimals(*amount);
        }
    }

    balance
}
