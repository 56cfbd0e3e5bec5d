use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{LedgerStore, StoreResult};
use crate::error::{LedgerError, StoreError};
use crate::schemas::{Expense, ExpenseId, Group, GroupId, Member, MemberId};

/// Store keeping everything in process memory.
///
/// Intended for tests/dev. Each operation holds a single lock, which makes
/// every write atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    members: RwLock<HashMap<MemberId, Member>>,
    groups: RwLock<HashMap<GroupId, Group>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_members(&self) -> StoreResult<RwLockReadGuard<'_, HashMap<MemberId, Member>>> {
        self.members
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write_members(&self) -> StoreResult<RwLockWriteGuard<'_, HashMap<MemberId, Member>>> {
        self.members
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn read_groups(&self) -> StoreResult<RwLockReadGuard<'_, HashMap<GroupId, Group>>> {
        self.groups
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write_groups(&self) -> StoreResult<RwLockWriteGuard<'_, HashMap<GroupId, Group>>> {
        self.groups
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

fn missing_group(id: GroupId) -> StoreError {
    StoreError::Conflict(format!("group {id} no longer exists"))
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryStore {
    async fn insert_member(&self, member: &Member) -> StoreResult<()> {
        let mut members = self.write_members()?;
        for existing in members.values() {
            if existing.id == member.id {
                return Err(StoreError::Duplicate(format!("member id {}", member.id)));
            }
            if existing.name == member.name {
                return Err(StoreError::Duplicate(format!("name {}", member.name)));
            }
            if existing.contact == member.contact {
                return Err(StoreError::Duplicate(format!("contact {}", member.contact)));
            }
        }
        members.insert(member.id, member.clone());
        Ok(())
    }

    async fn member(&self, id: MemberId) -> StoreResult<Option<Member>> {
        Ok(self.read_members()?.get(&id).cloned())
    }

    async fn member_by_contact(&self, contact: &str) -> StoreResult<Option<Member>> {
        Ok(self
            .read_members()?
            .values()
            .find(|member| member.contact == contact)
            .cloned())
    }

    async fn members(&self, ids: &[MemberId]) -> StoreResult<Vec<Member>> {
        let members = self.read_members()?;
        Ok(ids.iter().filter_map(|id| members.get(id).cloned()).collect())
    }

    async fn insert_group(&self, group: &Group) -> StoreResult<()> {
        let mut groups = self.write_groups()?;
        if groups.contains_key(&group.id()) {
            return Err(StoreError::Duplicate(format!("group id {}", group.id())));
        }
        groups.insert(group.id(), group.clone());
        Ok(())
    }

    async fn group(&self, id: GroupId) -> StoreResult<Option<Group>> {
        Ok(self.read_groups()?.get(&id).cloned())
    }

    async fn add_group_member(&self, group: GroupId, member: MemberId) -> StoreResult<bool> {
        let mut groups = self.write_groups()?;
        let group = groups.get_mut(&group).ok_or_else(|| missing_group(group))?;
        match group.add_member(group.creator(), member) {
            Ok(()) => Ok(true),
            Err(LedgerError::AlreadyMember) => Ok(false),
            Err(err) => Err(StoreError::Conflict(err.to_string())),
        }
    }

    async fn remove_group_member(&self, group: GroupId, member: MemberId) -> StoreResult<bool> {
        let mut groups = self.write_groups()?;
        let group = groups.get_mut(&group).ok_or_else(|| missing_group(group))?;
        match group.remove_member(group.creator(), member) {
            Ok(()) => Ok(true),
            Err(LedgerError::NotAMember) => Ok(false),
            Err(err) => Err(StoreError::Conflict(err.to_string())),
        }
    }

    async fn push_expense(&self, expense: &Expense) -> StoreResult<()> {
        let mut groups = self.write_groups()?;
        let group = groups
            .get_mut(&expense.group_id)
            .ok_or_else(|| missing_group(expense.group_id))?;
        if !group.is_member(&expense.payer) {
            return Err(StoreError::Conflict(format!(
                "payer {} left group {}",
                expense.payer, expense.group_id
            )));
        }
        if let Some(share) = expense.shares.iter().find(|s| !group.is_member(&s.debtor)) {
            return Err(StoreError::Conflict(format!(
                "debtor {} left group {}",
                share.debtor, expense.group_id
            )));
        }
        group.record_expense(expense.clone());
        Ok(())
    }

    async fn remove_expense(&self, group: GroupId, expense: ExpenseId) -> StoreResult<bool> {
        let mut groups = self.write_groups()?;
        Ok(groups
            .get_mut(&group)
            .and_then(|group| group.remove_expense(&expense))
            .is_some())
    }

    async fn set_share_paid(
        &self,
        group: GroupId,
        expense: ExpenseId,
        debtor: MemberId,
    ) -> StoreResult<bool> {
        let mut groups = self.write_groups()?;
        let share = groups
            .get_mut(&group)
            .and_then(|group| group.expense_mut(&expense))
            .and_then(|expense| expense.shares.iter_mut().find(|s| s.debtor == debtor));
        match share {
            Some(share) => {
                share.paid = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::schemas::{ExpenseShare, ShareId, SplitMode};

    fn member(name: &str) -> Member {
        Member::new(name, &format!("{name}@example.com")).unwrap()
    }

    fn expense(group: &Group, payer: MemberId, amount: f64) -> Expense {
        let id = ExpenseId::new();
        Expense {
            id,
            group_id: group.id(),
            description: "groceries".to_string(),
            amount,
            recorded_at: Utc::now(),
            payer,
            split_mode: SplitMode::Equal,
            shares: vec![ExpenseShare {
                id: ShareId::new(),
                expense_id: id,
                debtor: payer,
                amount,
                paid: true,
            }],
        }
    }

    #[tokio::test]
    async fn member_names_and_contacts_are_unique() {
        let store = InMemoryStore::new();
        store.insert_member(&member("alice")).await.unwrap();

        let same_name = Member::new("alice", "other@example.com").unwrap();
        assert!(matches!(
            store.insert_member(&same_name).await,
            Err(StoreError::Duplicate(_))
        ));
        let same_contact = Member::new("alicia", "alice@example.com").unwrap();
        assert!(matches!(
            store.insert_member(&same_contact).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn member_lookups() {
        let store = InMemoryStore::new();
        let alice = member("alice");
        store.insert_member(&alice).await.unwrap();

        assert_eq!(store.member(alice.id).await.unwrap(), Some(alice.clone()));
        assert_eq!(
            store.member_by_contact("alice@example.com").await.unwrap(),
            Some(alice.clone())
        );
        assert_eq!(
            store.members(&[alice.id, MemberId::new()]).await.unwrap(),
            vec![alice]
        );
    }

    #[tokio::test]
    async fn expenses_are_removed_with_their_shares() {
        let store = InMemoryStore::new();
        let alice = member("alice");
        let group = Group::new("Flat", &alice).unwrap();
        store.insert_group(&group).await.unwrap();

        let expense = expense(&group, alice.id, 12.0);
        store.push_expense(&expense).await.unwrap();
        assert_eq!(store.group(group.id()).await.unwrap().unwrap().expenses().len(), 1);

        assert!(store.remove_expense(group.id(), expense.id).await.unwrap());
        assert!(!store.remove_expense(group.id(), expense.id).await.unwrap());
        assert!(store.group(group.id()).await.unwrap().unwrap().expenses().is_empty());
    }

    #[tokio::test]
    async fn push_expense_rejects_departed_payers() {
        let store = InMemoryStore::new();
        let alice = member("alice");
        let bob = member("bob");
        let group = Group::new("Flat", &alice).unwrap();
        store.insert_group(&group).await.unwrap();
        assert!(store.add_group_member(group.id(), bob.id).await.unwrap());
        assert!(store.remove_group_member(group.id(), bob.id).await.unwrap());

        let result = store.push_expense(&expense(&group, bob.id, 5.0)).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn push_expense_rejects_departed_debtors() {
        let store = InMemoryStore::new();
        let alice = member("alice");
        let bob = member("bob");
        let group = Group::new("Flat", &alice).unwrap();
        store.insert_group(&group).await.unwrap();
        store.add_group_member(group.id(), bob.id).await.unwrap();

        // Shares computed from a roster read before bob was removed.
        let mut stale = expense(&group, alice.id, 10.0);
        stale.shares[0].amount = 5.0;
        stale.shares.push(ExpenseShare {
            id: ShareId::new(),
            expense_id: stale.id,
            debtor: bob.id,
            amount: 5.0,
            paid: false,
        });
        store.remove_group_member(group.id(), bob.id).await.unwrap();

        let result = store.push_expense(&stale).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert!(store.group(group.id()).await.unwrap().unwrap().expenses().is_empty());
    }

    #[tokio::test]
    async fn repeated_membership_changes_report_no_change() {
        let store = InMemoryStore::new();
        let alice = member("alice");
        let bob = member("bob");
        let group = Group::new("Flat", &alice).unwrap();
        store.insert_group(&group).await.unwrap();

        assert!(store.add_group_member(group.id(), bob.id).await.unwrap());
        assert!(!store.add_group_member(group.id(), bob.id).await.unwrap());
        assert!(store.remove_group_member(group.id(), bob.id).await.unwrap());
        assert!(!store.remove_group_member(group.id(), bob.id).await.unwrap());
    }

    #[tokio::test]
    async fn creator_cannot_be_dropped_at_store_level() {
        let store = InMemoryStore::new();
        let alice = member("alice");
        let group = Group::new("Flat", &alice).unwrap();
        store.insert_group(&group).await.unwrap();

        let result = store.remove_group_member(group.id(), alice.id).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }
}
