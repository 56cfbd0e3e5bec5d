//! Turns an expense amount into per-member shares.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::rounding::within_tolerance;
use crate::schemas::{ExpenseId, ExpenseShare, MemberId, ShareId, SplitMode};

/// How an expense should be divided, as requested by the caller.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(tag = "mode", content = "shares", rename_all = "lowercase")]
pub enum Split {
    /// Everyone on the roster, payer included, carries the same part.
    #[default]
    Equal,
    /// Explicit amount per member; members left out carry nothing.
    Custom(HashMap<MemberId, f64>),
}

impl Split {
    pub fn mode(&self) -> SplitMode {
        match self {
            Split::Equal => SplitMode::Equal,
            Split::Custom(_) => SplitMode::Custom,
        }
    }
}

/// Compute the shares of a new expense.
///
/// `roster` is the group's membership at the time the expense is recorded.
/// The payer's own share, if any, is created already paid.
///
/// Custom amounts may miss the total by up to a cent. The payer's share
/// takes up the difference so the stored shares always add up to `amount`.
pub fn compute_shares(
    expense_id: ExpenseId,
    amount: f64,
    split: &Split,
    roster: &BTreeSet<MemberId>,
    payer: MemberId,
) -> LedgerResult<Vec<ExpenseShare>> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(LedgerError::invalid_split(format!(
            "amount must be positive, got {amount}"
        )));
    }
    if roster.is_empty() {
        return Err(LedgerError::invalid_split("cannot split over an empty roster"));
    }
    if !roster.contains(&payer) {
        return Err(LedgerError::NotAMember);
    }

    let share = |debtor: MemberId, amount: f64| ExpenseShare {
        id: ShareId::new(),
        expense_id,
        debtor,
        amount,
        paid: debtor == payer,
    };

    let mut shares: Vec<ExpenseShare> = match split {
        Split::Equal => {
            let amount_per_member = amount / roster.len() as f64;
            roster
                .iter()
                .map(|member| share(*member, amount_per_member))
                .collect()
        }
        Split::Custom(requested) => {
            if let Some(outsider) = requested.keys().find(|member| !roster.contains(*member)) {
                return Err(LedgerError::invalid_split(format!(
                    "{outsider} is not a member of the group"
                )));
            }
            if let Some((member, value)) = requested.iter().find(|(_, value)| !value.is_finite()) {
                return Err(LedgerError::invalid_split(format!(
                    "share of {member} is not a number: {value}"
                )));
            }
            roster
                .iter()
                .filter_map(|member| {
                    let value = requested.get(member).copied().unwrap_or(0.0);
                    (value > 0.0).then(|| share(*member, value))
                })
                .collect()
        }
    };

    let total: f64 = shares.iter().map(|share| share.amount).sum();
    if !within_tolerance(total, amount) {
        return Err(LedgerError::invalid_split(format!(
            "shares add up to {total}, expected {amount}"
        )));
    }

    let residual = amount - total;
    if matches!(split, Split::Custom(_)) && residual != 0.0 {
        let own = shares
            .iter()
            .position(|share| share.debtor == payer)
            .filter(|&idx| shares[idx].amount + residual > 0.0);
        match own {
            Some(idx) => shares[idx].amount += residual,
            None if residual > 0.0 => shares.push(share(payer, residual)),
            None => {
                let scale = amount / total;
                for share in &mut shares {
                    share.amount *= scale;
                }
            }
        }
    }

    Ok(shares)
}
