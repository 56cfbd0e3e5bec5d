//! Persistence of members, groups and expenses.
//!
//! An expense is always written and removed together with all of its
//! shares; readers never see one without the other.

use crate::error::StoreError;
use crate::schemas::{Expense, ExpenseId, Group, GroupId, Member, MemberId};

mod memory;
mod mongo;

pub use memory::InMemoryStore;
pub use mongo::MongoStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Fails with [`StoreError::Duplicate`] if the name or contact is taken.
    async fn insert_member(&self, member: &Member) -> StoreResult<()>;

    async fn member(&self, id: MemberId) -> StoreResult<Option<Member>>;

    async fn member_by_contact(&self, contact: &str) -> StoreResult<Option<Member>>;

    /// Members with the given ids; unknown ids are skipped.
    async fn members(&self, ids: &[MemberId]) -> StoreResult<Vec<Member>>;

    async fn insert_group(&self, group: &Group) -> StoreResult<()>;

    /// The group together with its complete expense history.
    async fn group(&self, id: GroupId) -> StoreResult<Option<Group>>;

    /// Returns false if `member` already belongs to the group.
    async fn add_group_member(&self, group: GroupId, member: MemberId) -> StoreResult<bool>;

    /// Returns false if `member` does not belong to the group. Fails with
    /// [`StoreError::Conflict`] for the group's creator.
    async fn remove_group_member(&self, group: GroupId, member: MemberId) -> StoreResult<bool>;

    /// Append an expense and its shares in one write.
    ///
    /// Fails with [`StoreError::Conflict`] if the payer or any debtor is no
    /// longer a member of the group when the write happens.
    async fn push_expense(&self, expense: &Expense) -> StoreResult<()>;

    /// Returns false if the group has no such expense.
    async fn remove_expense(&self, group: GroupId, expense: ExpenseId) -> StoreResult<bool>;

    /// Returns false if no matching share exists.
    async fn set_share_paid(
        &self,
        group: GroupId,
        expense: ExpenseId,
        debtor: MemberId,
    ) -> StoreResult<bool>;
}
