//! Operations offered to the request layer.
//!
//! Each operation loads what it needs through the injected store, applies
//! the domain rules and writes the result back in a single store call.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use crate::balance::{compute_balance_from_group, Balance};
use crate::error::{LedgerError, LedgerResult, StoreError};
use crate::rounding::RoundingMode;
use crate::schemas::{Expense, ExpenseId, Group, GroupId, Member, MemberId};
use crate::split::{compute_shares, Split};
use crate::store::LedgerStore;

#[derive(Clone, Debug, Deserialize)]
pub struct NewExpense {
    pub description: String,
    pub amount: f64,
    #[serde(default)]
    pub split: Split,
}

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    rounding: RoundingMode,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>, rounding: RoundingMode) -> Self {
        Self { store, rounding }
    }

    pub async fn register_member(&self, name: &str, contact: &str) -> LedgerResult<Member> {
        let member = Member::new(name, contact)?;
        match self.store.insert_member(&member).await {
            Ok(()) => {
                tracing::info!(member_id = %member.id, name = %member.name, "member registered");
                Ok(member)
            }
            Err(StoreError::Duplicate(what)) => Err(LedgerError::AlreadyRegistered(what)),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn member(&self, id: MemberId) -> LedgerResult<Member> {
        self.store
            .member(id)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("member {id}")))
    }

    pub async fn member_by_contact(&self, contact: &str) -> LedgerResult<Option<Member>> {
        Ok(self.store.member_by_contact(contact.trim()).await?)
    }

    pub async fn members(&self, ids: &[MemberId]) -> LedgerResult<Vec<Member>> {
        Ok(self.store.members(ids).await?)
    }

    pub async fn create_group(&self, creator: &Member, name: &str) -> LedgerResult<Group> {
        let group = Group::new(name, creator)?;
        self.store.insert_group(&group).await?;
        tracing::info!(group_id = %group.id(), creator = %creator.id, "group created");
        Ok(group)
    }

    pub async fn group(&self, id: GroupId) -> LedgerResult<Group> {
        self.store
            .group(id)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("group {id}")))
    }

    pub async fn add_member(
        &self,
        actor: MemberId,
        group_id: GroupId,
        member: MemberId,
    ) -> LedgerResult<Group> {
        let mut group = self.group(group_id).await?;
        if let Err(err) = group.add_member(actor, member) {
            tracing::warn!(%group_id, %actor, %member, error = %err, "add member rejected");
            return Err(err);
        }
        self.member(member).await?;
        if !self.store.add_group_member(group_id, member).await? {
            tracing::warn!(%group_id, %member, "member joined concurrently");
            return Err(LedgerError::AlreadyMember);
        }
        tracing::info!(%group_id, %member, "member added to group");
        Ok(group)
    }

    /// Like [`Ledger::add_member`], naming the new member by contact address.
    /// The creator check runs before the contact is resolved.
    pub async fn add_member_by_contact(
        &self,
        actor: MemberId,
        group_id: GroupId,
        contact: &str,
    ) -> LedgerResult<Group> {
        let group = self.group(group_id).await?;
        if actor != group.creator() {
            tracing::warn!(%group_id, %actor, "add member rejected");
            return Err(LedgerError::NotAuthorized);
        }
        let member = self
            .member_by_contact(contact)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("member with contact {}", contact.trim())))?;
        self.add_member(actor, group_id, member.id).await
    }

    pub async fn remove_member(
        &self,
        actor: MemberId,
        group_id: GroupId,
        member: MemberId,
    ) -> LedgerResult<Group> {
        let mut group = self.group(group_id).await?;
        if let Err(err) = group.remove_member(actor, member) {
            tracing::warn!(%group_id, %actor, %member, error = %err, "remove member rejected");
            return Err(err);
        }
        if !self.store.remove_group_member(group_id, member).await? {
            tracing::warn!(%group_id, %member, "member left concurrently");
            return Err(LedgerError::NotAMember);
        }
        tracing::info!(%group_id, %member, "member removed from group");
        Ok(group)
    }

    /// Record an expense paid by `payer`, split over the current roster.
    pub async fn add_expense(
        &self,
        group_id: GroupId,
        payer: MemberId,
        new_expense: NewExpense,
    ) -> LedgerResult<Expense> {
        let group = self.group(group_id).await?;
        if !group.is_member(&payer) {
            return Err(LedgerError::NotAMember);
        }
        let description = new_expense.description.trim();
        if description.is_empty() {
            return Err(LedgerError::invalid_input("expense description must not be blank"));
        }

        let id = ExpenseId::new();
        let shares = compute_shares(
            id,
            new_expense.amount,
            &new_expense.split,
            group.members(),
            payer,
        )
        .inspect_err(|err| tracing::debug!(%group_id, error = %err, "split rejected"))?;

        let expense = Expense {
            id,
            group_id,
            description: description.to_string(),
            amount: new_expense.amount,
            recorded_at: Utc::now(),
            payer,
            split_mode: new_expense.split.mode(),
            shares,
        };
        self.store.push_expense(&expense).await?;
        tracing::info!(
            %group_id,
            expense_id = %expense.id,
            %payer,
            amount = expense.amount,
            shares = expense.shares.len(),
            "expense recorded"
        );
        Ok(expense)
    }

    pub async fn expenses(&self, group_id: GroupId) -> LedgerResult<Vec<Expense>> {
        Ok(self.group(group_id).await?.expenses().to_vec())
    }

    /// Delete an expense and its shares. Allowed for its payer and the
    /// group creator.
    pub async fn delete_expense(
        &self,
        actor: MemberId,
        group_id: GroupId,
        expense_id: ExpenseId,
    ) -> LedgerResult<()> {
        let group = self.group(group_id).await?;
        let expense = group
            .expense(&expense_id)
            .ok_or_else(|| LedgerError::not_found(format!("expense {expense_id}")))?;
        if actor != expense.payer && actor != group.creator() {
            return Err(LedgerError::NotAuthorized);
        }
        if !self.store.remove_expense(group_id, expense_id).await? {
            return Err(LedgerError::not_found(format!("expense {expense_id}")));
        }
        tracing::info!(%group_id, %expense_id, %actor, "expense deleted");
        Ok(())
    }

    /// The payer confirms that `debtor` settled their share.
    ///
    /// Only the flag changes; balances are computed from the shares alone.
    pub async fn mark_share_paid(
        &self,
        actor: MemberId,
        group_id: GroupId,
        expense_id: ExpenseId,
        debtor: MemberId,
    ) -> LedgerResult<()> {
        let group = self.group(group_id).await?;
        let expense = group
            .expense(&expense_id)
            .ok_or_else(|| LedgerError::not_found(format!("expense {expense_id}")))?;
        if actor != expense.payer {
            return Err(LedgerError::NotAuthorized);
        }
        if expense.share_of(&debtor).is_none()
            || !self
                .store
                .set_share_paid(group_id, expense_id, debtor)
                .await?
        {
            return Err(LedgerError::not_found(format!(
                "share of {debtor} in expense {expense_id}"
            )));
        }
        tracing::info!(%group_id, %expense_id, %debtor, "share marked paid");
        Ok(())
    }

    pub async fn get_balances(&self, group_id: GroupId) -> LedgerResult<Balance> {
        let group = self.group(group_id).await?;
        Ok(compute_balance_from_group(&group, self.rounding))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::store::{InMemoryStore, StoreResult};

    struct Fixture {
        ledger: Ledger,
        alice: Member,
        bob: Member,
        carol: Member,
        group: GroupId,
    }

    async fn fixture() -> Fixture {
        let ledger = Ledger::new(Arc::new(InMemoryStore::new()), RoundingMode::HalfEven);
        let alice = ledger.register_member("Alice", "alice@example.com").await.unwrap();
        let bob = ledger.register_member("Bob", "bob@example.com").await.unwrap();
        let carol = ledger.register_member("Carol", "carol@example.com").await.unwrap();
        let group = ledger.create_group(&alice, "Holiday").await.unwrap().id();
        ledger.add_member(alice.id, group, bob.id).await.unwrap();
        ledger.add_member(alice.id, group, carol.id).await.unwrap();
        Fixture {
            ledger,
            alice,
            bob,
            carol,
            group,
        }
    }

    fn equal(description: &str, amount: f64) -> NewExpense {
        NewExpense {
            description: description.to_string(),
            amount,
            split: Split::Equal,
        }
    }

    #[tokio::test]
    async fn balances_follow_recorded_expenses() {
        let f = fixture().await;
        f.ledger
            .add_expense(f.group, f.alice.id, equal("dinner", 90.0))
            .await
            .unwrap();
        f.ledger
            .add_expense(f.group, f.bob.id, equal("taxi", 30.0))
            .await
            .unwrap();

        let balances = f.ledger.get_balances(f.group).await.unwrap();
        assert_eq!(balances[&f.alice.id].net, 50.0);
        assert_eq!(balances[&f.bob.id].net, -10.0);
        assert_eq!(balances[&f.carol.id].net, -40.0);
        assert_eq!(balances, f.ledger.get_balances(f.group).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_registrations_are_rejected() {
        let f = fixture().await;
        let err = f
            .ledger
            .register_member("Alice", "someone@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn membership_rules_are_enforced() {
        let f = fixture().await;
        let dave = f.ledger.register_member("Dave", "dave@example.com").await.unwrap();

        assert_eq!(
            f.ledger.add_member(f.bob.id, f.group, dave.id).await.unwrap_err(),
            LedgerError::NotAuthorized
        );
        assert_eq!(
            f.ledger.add_member(f.alice.id, f.group, f.bob.id).await.unwrap_err(),
            LedgerError::AlreadyMember
        );
        assert_eq!(
            f.ledger
                .remove_member(f.alice.id, f.group, f.alice.id)
                .await
                .unwrap_err(),
            LedgerError::CannotRemoveCreator
        );
        assert_eq!(
            f.ledger.remove_member(f.alice.id, f.group, dave.id).await.unwrap_err(),
            LedgerError::NotAMember
        );
        assert!(matches!(
            f.ledger.add_member(f.alice.id, f.group, MemberId::new()).await,
            Err(LedgerError::NotFound(_))
        ));

        let group = f.ledger.remove_member(f.alice.id, f.group, f.carol.id).await.unwrap();
        assert!(!group.is_member(&f.carol.id));
        assert!(!f.ledger.group(f.group).await.unwrap().is_member(&f.carol.id));
    }

    /// Serves group reads from a snapshot, as if another writer committed
    /// between the ledger's read and its write.
    #[derive(Default)]
    struct LaggingStore {
        inner: InMemoryStore,
        snapshot: Mutex<Option<Group>>,
    }

    impl LaggingStore {
        async fn freeze(&self, group: GroupId) {
            let current = self.inner.group(group).await.unwrap();
            *self.snapshot.lock().unwrap() = current;
        }
    }

    #[async_trait::async_trait]
    impl LedgerStore for LaggingStore {
        async fn insert_member(&self, member: &Member) -> StoreResult<()> {
            self.inner.insert_member(member).await
        }

        async fn member(&self, id: MemberId) -> StoreResult<Option<Member>> {
            self.inner.member(id).await
        }

        async fn member_by_contact(&self, contact: &str) -> StoreResult<Option<Member>> {
            self.inner.member_by_contact(contact).await
        }

        async fn members(&self, ids: &[MemberId]) -> StoreResult<Vec<Member>> {
            self.inner.members(ids).await
        }

        async fn insert_group(&self, group: &Group) -> StoreResult<()> {
            self.inner.insert_group(group).await
        }

        async fn group(&self, id: GroupId) -> StoreResult<Option<Group>> {
            let snapshot = self.snapshot.lock().unwrap().clone();
            match snapshot {
                Some(group) => Ok(Some(group)),
                None => self.inner.group(id).await,
            }
        }

        async fn add_group_member(&self, group: GroupId, member: MemberId) -> StoreResult<bool> {
            self.inner.add_group_member(group, member).await
        }

        async fn remove_group_member(&self, group: GroupId, member: MemberId) -> StoreResult<bool> {
            self.inner.remove_group_member(group, member).await
        }

        async fn push_expense(&self, expense: &Expense) -> StoreResult<()> {
            self.inner.push_expense(expense).await
        }

        async fn remove_expense(&self, group: GroupId, expense: ExpenseId) -> StoreResult<bool> {
            self.inner.remove_expense(group, expense).await
        }

        async fn set_share_paid(
            &self,
            group: GroupId,
            expense: ExpenseId,
            debtor: MemberId,
        ) -> StoreResult<bool> {
            self.inner.set_share_paid(group, expense, debtor).await
        }
    }

    async fn lagging_fixture() -> (Arc<LaggingStore>, Ledger, Member, Member, GroupId) {
        let store = Arc::new(LaggingStore::default());
        let ledger = Ledger::new(store.clone(), RoundingMode::HalfEven);
        let alice = ledger.register_member("Alice", "alice@example.com").await.unwrap();
        let dave = ledger.register_member("Dave", "dave@example.com").await.unwrap();
        let group = ledger.create_group(&alice, "Race").await.unwrap().id();
        (store, ledger, alice, dave, group)
    }

    #[tokio::test]
    async fn losing_a_membership_race_is_reported() {
        let (store, ledger, alice, dave, group) = lagging_fixture().await;

        store.freeze(group).await;
        store.inner.add_group_member(group, dave.id).await.unwrap();
        assert_eq!(
            ledger.add_member(alice.id, group, dave.id).await.unwrap_err(),
            LedgerError::AlreadyMember
        );

        store.freeze(group).await;
        store.inner.remove_group_member(group, dave.id).await.unwrap();
        assert_eq!(
            ledger.remove_member(alice.id, group, dave.id).await.unwrap_err(),
            LedgerError::NotAMember
        );
    }

    #[tokio::test]
    async fn expenses_never_charge_members_removed_meanwhile() {
        let (store, ledger, alice, dave, group) = lagging_fixture().await;
        ledger.add_member(alice.id, group, dave.id).await.unwrap();

        store.freeze(group).await;
        store.inner.remove_group_member(group, dave.id).await.unwrap();
        let err = ledger
            .add_expense(group, alice.id, equal("pizza", 20.0))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Store(StoreError::Conflict(_))));
        assert!(store.inner.group(group).await.unwrap().unwrap().expenses().is_empty());
    }

    #[tokio::test]
    async fn adding_by_contact_checks_the_creator_first() {
        let f = fixture().await;
        let dave = f.ledger.register_member("Dave", "dave@example.com").await.unwrap();

        for contact in ["dave@example.com", "nobody@example.com"] {
            assert_eq!(
                f.ledger
                    .add_member_by_contact(f.bob.id, f.group, contact)
                    .await
                    .unwrap_err(),
                LedgerError::NotAuthorized
            );
        }
        assert!(matches!(
            f.ledger
                .add_member_by_contact(f.alice.id, f.group, "nobody@example.com")
                .await,
            Err(LedgerError::NotFound(_))
        ));
        let group = f
            .ledger
            .add_member_by_contact(f.alice.id, f.group, " dave@example.com ")
            .await
            .unwrap();
        assert!(group.is_member(&dave.id));
    }

    #[tokio::test]
    async fn removed_members_cannot_pay_and_keep_historical_shares() {
        let f = fixture().await;
        f.ledger
            .add_expense(f.group, f.carol.id, equal("museum", 60.0))
            .await
            .unwrap();
        f.ledger.remove_member(f.alice.id, f.group, f.carol.id).await.unwrap();

        let err = f
            .ledger
            .add_expense(f.group, f.carol.id, equal("snacks", 10.0))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::NotAMember);

        let expense = f
            .ledger
            .add_expense(f.group, f.alice.id, equal("lunch", 20.0))
            .await
            .unwrap();
        assert_eq!(expense.shares.len(), 2);

        let balances = f.ledger.get_balances(f.group).await.unwrap();
        assert!(!balances.contains_key(&f.carol.id));
        assert_eq!(balances[&f.bob.id].owes_to[&f.carol.id], 20.0);
    }

    #[tokio::test]
    async fn unbalanced_custom_split_is_rejected() {
        let f = fixture().await;
        let new_expense = NewExpense {
            description: "hotel".to_string(),
            amount: 100.0,
            split: Split::Custom(HashMap::from([(f.bob.id, 40.0), (f.carol.id, 50.0)])),
        };
        let err = f
            .ledger
            .add_expense(f.group, f.alice.id, new_expense)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidSplit(_)));
        assert!(f.ledger.expenses(f.group).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_descriptions_are_rejected() {
        let f = fixture().await;
        let err = f
            .ledger
            .add_expense(f.group, f.alice.id, equal("   ", 10.0))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn expenses_can_be_deleted_by_payer_or_creator() {
        let f = fixture().await;
        let expense = f
            .ledger
            .add_expense(f.group, f.bob.id, equal("fuel", 45.0))
            .await
            .unwrap();

        assert_eq!(
            f.ledger
                .delete_expense(f.carol.id, f.group, expense.id)
                .await
                .unwrap_err(),
            LedgerError::NotAuthorized
        );
        f.ledger
            .delete_expense(f.alice.id, f.group, expense.id)
            .await
            .unwrap();
        assert!(matches!(
            f.ledger.delete_expense(f.bob.id, f.group, expense.id).await,
            Err(LedgerError::NotFound(_))
        ));

        let balances = f.ledger.get_balances(f.group).await.unwrap();
        assert!(balances.values().all(|record| record.net == 0.0));
    }

    #[tokio::test]
    async fn payer_marks_shares_paid() {
        let f = fixture().await;
        let expense = f
            .ledger
            .add_expense(f.group, f.alice.id, equal("tickets", 60.0))
            .await
            .unwrap();

        assert_eq!(
            f.ledger
                .mark_share_paid(f.bob.id, f.group, expense.id, f.bob.id)
                .await
                .unwrap_err(),
            LedgerError::NotAuthorized
        );
        f.ledger
            .mark_share_paid(f.alice.id, f.group, expense.id, f.bob.id)
            .await
            .unwrap();

        let stored = f.ledger.expenses(f.group).await.unwrap();
        assert!(stored[0].share_of(&f.bob.id).unwrap().paid);
        assert!(!stored[0].share_of(&f.carol.id).unwrap().paid);

        let balances = f.ledger.get_balances(f.group).await.unwrap();
        assert_eq!(balances[&f.bob.id].net, -20.0);
    }

    #[tokio::test]
    async fn unknown_groups_are_not_found() {
        let f = fixture().await;
        assert!(matches!(
            f.ledger.get_balances(GroupId::new()).await,
            Err(LedgerError::NotFound(_))
        ));
    }
}
