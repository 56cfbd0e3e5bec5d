//! In-memory entity model: members, groups, expenses and their shares.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult, StoreError};

/// Identifier of a registered member.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(Uuid);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(Uuid);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpenseId(Uuid);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShareId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $t {
            type Err = LedgerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| LedgerError::invalid_input(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(MemberId, "MemberId");
impl_uuid_newtype!(GroupId, "GroupId");
impl_uuid_newtype!(ExpenseId, "ExpenseId");
impl_uuid_newtype!(ShareId, "ShareId");

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Member {
    pub id: MemberId,
    /// Display name, unique across members.
    pub name: String,
    /// Contact address (usually an email), unique across members.
    pub contact: String,
}

impl Member {
    pub fn new(name: &str, contact: &str) -> LedgerResult<Self> {
        let name = name.trim();
        let contact = contact.trim();
        if name.is_empty() {
            return Err(LedgerError::invalid_input("member name must not be blank"));
        }
        if contact.is_empty() {
            return Err(LedgerError::invalid_input("contact address must not be blank"));
        }
        if !is_valid_contact(contact) {
            return Err(LedgerError::invalid_input(format!(
                "`{contact}` is neither an email address nor a telegram id"
            )));
        }
        Ok(Self {
            id: MemberId::new(),
            name: name.to_string(),
            contact: contact.to_string(),
        })
    }
}

/// `telegram:<numeric id>` or a plain `local@domain.tld` address.
fn is_valid_contact(contact: &str) -> bool {
    if let Some(id) = contact.strip_prefix("telegram:") {
        return !id.is_empty() && id.chars().all(|c| c.is_ascii_digit());
    }
    if contact.chars().any(char::is_whitespace) {
        return false;
    }
    match contact.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && domain.split('.').all(|label| !label.is_empty())
        }
        None => false,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    Equal,
    Custom,
}

/// One member's part of an expense.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ExpenseShare {
    pub id: ShareId,
    pub expense_id: ExpenseId,
    pub debtor: MemberId,
    pub amount: f64,
    /// Always true for the payer's own share.
    pub paid: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub group_id: GroupId,
    pub description: String,
    pub amount: f64,
    pub recorded_at: DateTime<Utc>,
    pub payer: MemberId,
    pub split_mode: SplitMode,
    pub shares: Vec<ExpenseShare>,
}

impl Expense {
    pub fn share_total(&self) -> f64 {
        self.shares.iter().map(|share| share.amount).sum()
    }

    pub fn share_of(&self, debtor: &MemberId) -> Option<&ExpenseShare> {
        self.shares.iter().find(|share| share.debtor == *debtor)
    }
}

/// A group of members sharing expenses.
///
/// The creator is always part of `members`; membership changes go through
/// [`Group::add_member`] and [`Group::remove_member`], which enforce that.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Group {
    id: GroupId,
    name: String,
    creator: MemberId,
    members: BTreeSet<MemberId>,
    expenses: Vec<Expense>,
}

impl Group {
    pub fn new(name: &str, creator: &Member) -> LedgerResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::invalid_input("group name must not be blank"));
        }
        Ok(Self {
            id: GroupId::new(),
            name: name.to_string(),
            creator: creator.id,
            members: BTreeSet::from([creator.id]),
            expenses: Vec::new(),
        })
    }

    /// Rebuild a group from persisted parts.
    pub fn restore(
        id: GroupId,
        name: String,
        creator: MemberId,
        members: BTreeSet<MemberId>,
        expenses: Vec<Expense>,
    ) -> Result<Self, StoreError> {
        if !members.contains(&creator) {
            return Err(StoreError::Corrupt(format!(
                "group {id}: creator {creator} is not a member"
            )));
        }
        Ok(Self {
            id,
            name,
            creator,
            members,
            expenses,
        })
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn creator(&self) -> MemberId {
        self.creator
    }

    pub fn members(&self) -> &BTreeSet<MemberId> {
        &self.members
    }

    pub fn expenses(&self) -> &[Expense] {
        &self.expenses
    }

    pub fn is_member(&self, member: &MemberId) -> bool {
        self.members.contains(member)
    }

    pub fn expense(&self, id: &ExpenseId) -> Option<&Expense> {
        self.expenses.iter().find(|expense| expense.id == *id)
    }

    pub fn add_member(&mut self, actor: MemberId, member: MemberId) -> LedgerResult<()> {
        if actor != self.creator {
            return Err(LedgerError::NotAuthorized);
        }
        if !self.members.insert(member) {
            return Err(LedgerError::AlreadyMember);
        }
        Ok(())
    }

    /// Existing shares of the removed member are left untouched.
    pub fn remove_member(&mut self, actor: MemberId, member: MemberId) -> LedgerResult<()> {
        if actor != self.creator {
            return Err(LedgerError::NotAuthorized);
        }
        if member == self.creator {
            return Err(LedgerError::CannotRemoveCreator);
        }
        if !self.members.remove(&member) {
            return Err(LedgerError::NotAMember);
        }
        Ok(())
    }

    pub fn record_expense(&mut self, expense: Expense) {
        self.expenses.push(expense);
    }

    /// Drops the expense together with all of its shares.
    pub fn remove_expense(&mut self, id: &ExpenseId) -> Option<Expense> {
        let index = self.expenses.iter().position(|expense| expense.id == *id)?;
        Some(self.expenses.remove(index))
    }

    pub fn expense_mut(&mut self, id: &ExpenseId) -> Option<&mut Expense> {
        self.expenses.iter_mut().find(|expense| expense.id == *id)
    }
}
