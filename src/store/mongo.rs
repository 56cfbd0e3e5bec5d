use std::collections::BTreeSet;
use std::str::FromStr;

use bson::{doc, Document};
use futures::TryStreamExt;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{IndexOptions, UpdateOptions};
use mongodb::{Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};

use super::{LedgerStore, StoreResult};
use crate::error::StoreError;
use crate::schemas::{
    Expense, ExpenseId, ExpenseShare, Group, GroupId, Member, MemberId, ShareId, SplitMode,
};

const DUPLICATE_KEY: i32 = 11000;

/// MongoDB-backed store.
///
/// Expenses, with their shares, are embedded in the group document, so
/// recording or deleting one is a single-document (atomic) update.
#[derive(Clone, Debug)]
pub struct MongoStore {
    members: Collection<MemberDocument>,
    groups: Collection<GroupDocument>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct MemberDocument {
    id: String,
    name: String,
    contact: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct GroupDocument {
    id: String,
    name: String,
    creator_id: String,
    member_ids: Vec<String>,
    expenses: Vec<ExpenseDocument>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ExpenseDocument {
    id: String,
    description: String,
    amount: f64,
    recorded_at: bson::DateTime,
    payer_id: String,
    split_mode: SplitMode,
    shares: Vec<ShareDocument>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ShareDocument {
    id: String,
    debtor_id: String,
    amount: f64,
    paid: bool,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> StoreResult<Self> {
        let client = Client::with_uri_str(uri).await?;
        let database = client.database(database);
        let store = Self {
            members: database.collection("Members"),
            groups: database.collection("Groups"),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> StoreResult<()> {
        for key in ["id", "name", "contact"] {
            self.members.create_index(unique_index(key), None).await?;
        }
        self.groups.create_index(unique_index("id"), None).await?;
        Ok(())
    }
}

fn unique_index(key: &str) -> IndexModel {
    let mut keys = Document::new();
    keys.insert(key, 1);
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}

fn parse_id<T: FromStr>(raw: &str) -> StoreResult<T> {
    raw.parse()
        .map_err(|_| StoreError::Corrupt(format!("invalid id `{raw}`")))
}

impl From<&Member> for MemberDocument {
    fn from(member: &Member) -> Self {
        Self {
            id: member.id.to_string(),
            name: member.name.clone(),
            contact: member.contact.clone(),
        }
    }
}

impl TryFrom<MemberDocument> for Member {
    type Error = StoreError;

    fn try_from(document: MemberDocument) -> StoreResult<Self> {
        Ok(Member {
            id: parse_id(&document.id)?,
            name: document.name,
            contact: document.contact,
        })
    }
}

impl From<&Expense> for ExpenseDocument {
    fn from(expense: &Expense) -> Self {
        Self {
            id: expense.id.to_string(),
            description: expense.description.clone(),
            amount: expense.amount,
            recorded_at: bson::DateTime::from_chrono(expense.recorded_at),
            payer_id: expense.payer.to_string(),
            split_mode: expense.split_mode,
            shares: expense
                .shares
                .iter()
                .map(|share| ShareDocument {
                    id: share.id.to_string(),
                    debtor_id: share.debtor.to_string(),
                    amount: share.amount,
                    paid: share.paid,
                })
                .collect(),
        }
    }
}

impl ExpenseDocument {
    fn into_expense(self, group_id: GroupId) -> StoreResult<Expense> {
        let id: ExpenseId = parse_id(&self.id)?;
        let shares = self
            .shares
            .into_iter()
            .map(|share| -> StoreResult<ExpenseShare> {
                Ok(ExpenseShare {
                    id: parse_id::<ShareId>(&share.id)?,
                    expense_id: id,
                    debtor: parse_id(&share.debtor_id)?,
                    amount: share.amount,
                    paid: share.paid,
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Expense {
            id,
            group_id,
            description: self.description,
            amount: self.amount,
            recorded_at: self.recorded_at.to_chrono(),
            payer: parse_id(&self.payer_id)?,
            split_mode: self.split_mode,
            shares,
        })
    }
}

impl From<&Group> for GroupDocument {
    fn from(group: &Group) -> Self {
        Self {
            id: group.id().to_string(),
            name: group.name().to_string(),
            creator_id: group.creator().to_string(),
            member_ids: group.members().iter().map(ToString::to_string).collect(),
            expenses: group.expenses().iter().map(ExpenseDocument::from).collect(),
        }
    }
}

impl TryFrom<GroupDocument> for Group {
    type Error = StoreError;

    fn try_from(document: GroupDocument) -> StoreResult<Self> {
        let id: GroupId = parse_id(&document.id)?;
        let members = document
            .member_ids
            .iter()
            .map(|raw| parse_id::<MemberId>(raw))
            .collect::<StoreResult<BTreeSet<_>>>()?;
        let expenses = document
            .expenses
            .into_iter()
            .map(|expense| expense.into_expense(id))
            .collect::<StoreResult<Vec<_>>>()?;
        Group::restore(
            id,
            document.name,
            parse_id(&document.creator_id)?,
            members,
            expenses,
        )
    }
}

#[async_trait::async_trait]
impl LedgerStore for MongoStore {
    async fn insert_member(&self, member: &Member) -> StoreResult<()> {
        match self.members.insert_one(MemberDocument::from(member), None).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => Err(StoreError::Duplicate(format!(
                "member {} / {}",
                member.name, member.contact
            ))),
            Err(err) => Err(err.into()),
        }
    }

    async fn member(&self, id: MemberId) -> StoreResult<Option<Member>> {
        self.members
            .find_one(doc! { "id": id.to_string() }, None)
            .await?
            .map(Member::try_from)
            .transpose()
    }

    async fn member_by_contact(&self, contact: &str) -> StoreResult<Option<Member>> {
        self.members
            .find_one(doc! { "contact": contact }, None)
            .await?
            .map(Member::try_from)
            .transpose()
    }

    async fn members(&self, ids: &[MemberId]) -> StoreResult<Vec<Member>> {
        let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
        let documents: Vec<MemberDocument> = self
            .members
            .find(doc! { "id": { "$in": ids } }, None)
            .await?
            .try_collect()
            .await?;
        documents.into_iter().map(Member::try_from).collect()
    }

    async fn insert_group(&self, group: &Group) -> StoreResult<()> {
        match self.groups.insert_one(GroupDocument::from(group), None).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => {
                Err(StoreError::Duplicate(format!("group id {}", group.id())))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn group(&self, id: GroupId) -> StoreResult<Option<Group>> {
        self.groups
            .find_one(doc! { "id": id.to_string() }, None)
            .await?
            .map(Group::try_from)
            .transpose()
    }

    async fn add_group_member(&self, group: GroupId, member: MemberId) -> StoreResult<bool> {
        let result = self
            .groups
            .update_one(
                doc! { "id": group.to_string() },
                doc! { "$addToSet": { "member_ids": member.to_string() } },
                None,
            )
            .await?;
        if result.matched_count == 0 {
            return Err(StoreError::Conflict(format!("group {group} no longer exists")));
        }
        Ok(result.modified_count > 0)
    }

    async fn remove_group_member(&self, group: GroupId, member: MemberId) -> StoreResult<bool> {
        let result = self
            .groups
            .update_one(
                doc! { "id": group.to_string(), "creator_id": { "$ne": member.to_string() } },
                doc! { "$pull": { "member_ids": member.to_string() } },
                None,
            )
            .await?;
        if result.matched_count == 0 {
            return Err(StoreError::Conflict(format!(
                "group {group} is gone or {member} is its creator"
            )));
        }
        Ok(result.modified_count > 0)
    }

    async fn push_expense(&self, expense: &Expense) -> StoreResult<()> {
        let document = bson::to_bson(&ExpenseDocument::from(expense))?;
        let involved: BTreeSet<String> = std::iter::once(expense.payer)
            .chain(expense.shares.iter().map(|share| share.debtor))
            .map(|member| member.to_string())
            .collect();
        let involved: Vec<String> = involved.into_iter().collect();
        let result = self
            .groups
            .update_one(
                doc! {
                    "id": expense.group_id.to_string(),
                    "member_ids": { "$all": involved },
                },
                doc! { "$push": { "expenses": document } },
                None,
            )
            .await?;
        if result.matched_count == 0 {
            return Err(StoreError::Conflict(format!(
                "group {} is gone or a member of expense {} left it",
                expense.group_id, expense.id
            )));
        }
        Ok(())
    }

    async fn remove_expense(&self, group: GroupId, expense: ExpenseId) -> StoreResult<bool> {
        let result = self
            .groups
            .update_one(
                doc! { "id": group.to_string() },
                doc! { "$pull": { "expenses": { "id": expense.to_string() } } },
                None,
            )
            .await?;
        Ok(result.modified_count > 0)
    }

    async fn set_share_paid(
        &self,
        group: GroupId,
        expense: ExpenseId,
        debtor: MemberId,
    ) -> StoreResult<bool> {
        let options = UpdateOptions::builder()
            .array_filters(vec![
                doc! { "e.id": expense.to_string() },
                doc! { "s.debtor_id": debtor.to_string() },
            ])
            .build();
        let result = self
            .groups
            .update_one(
                doc! {
                    "id": group.to_string(),
                    "expenses": {
                        "$elemMatch": {
                            "id": expense.to_string(),
                            "shares.debtor_id": debtor.to_string(),
                        }
                    },
                },
                doc! { "$set": { "expenses.$[e].shares.$[s].paid": true } },
                options,
            )
            .await?;
        Ok(result.matched_count > 0)
    }
}
