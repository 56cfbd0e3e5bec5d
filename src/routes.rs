use actix_web::http::StatusCode;
use actix_web::{delete, get, post, web, HttpRequest, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::auth::{check_authorization_level, Actor, AuthorizationLevel, BotToken};
use crate::balance::BalanceRecord;
use crate::error::{LedgerError, StoreError};
use crate::ledger::{Ledger, NewExpense};
use crate::schemas::{ExpenseId, Group, GroupId, Member, MemberId};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or invalid credentials")]
    Unauthenticated,

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated => "unauthenticated",
            ApiError::Ledger(err) => match err {
                LedgerError::InvalidSplit(_) => "invalid_split",
                LedgerError::InvalidInput(_) => "invalid_input",
                LedgerError::NotAuthorized => "not_authorized",
                LedgerError::AlreadyMember => "already_member",
                LedgerError::NotAMember => "not_a_member",
                LedgerError::CannotRemoveCreator => "cannot_remove_creator",
                LedgerError::NotFound(_) => "not_found",
                LedgerError::AlreadyRegistered(_) => "already_registered",
                LedgerError::Store(StoreError::Conflict(_)) => "conflict",
                LedgerError::Store(_) => "store_error",
            },
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Ledger(err) => match err {
                LedgerError::InvalidSplit(_) | LedgerError::InvalidInput(_) => {
                    StatusCode::BAD_REQUEST
                }
                LedgerError::NotAuthorized => StatusCode::FORBIDDEN,
                LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
                LedgerError::AlreadyMember
                | LedgerError::AlreadyRegistered(_)
                | LedgerError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
                LedgerError::NotAMember | LedgerError::CannotRemoveCreator => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                LedgerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        HttpResponse::build(status).json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }))
    }
}

type ApiResult = Result<HttpResponse, ApiError>;

/// Loads the group and checks that the actor belongs to it.
async fn group_of(ledger: &Ledger, group_id: GroupId, actor: &Actor) -> Result<Group, ApiError> {
    let group = ledger.group(group_id).await?;
    if !group.is_member(&actor.id()) {
        return Err(LedgerError::NotAuthorized.into());
    }
    Ok(group)
}

#[derive(Deserialize, Serialize)]
struct NewMemberJson {
    name: String,
    contact: String,
}

#[derive(Deserialize, Serialize)]
struct GroupNameJson {
    name: String,
}

/// Identifies the member to add, by id or by contact address.
#[derive(Deserialize, Serialize)]
struct MemberRefJson {
    member_id: Option<MemberId>,
    contact: Option<String>,
}

#[derive(Serialize)]
struct GroupView {
    #[serde(flatten)]
    group: Group,
    roster: Vec<Member>,
}

#[derive(Serialize)]
struct MemberBalance {
    member: Member,
    #[serde(flatten)]
    balance: BalanceRecord,
}

async fn group_view(ledger: &Ledger, group: Group) -> ApiResult {
    let ids: Vec<MemberId> = group.members().iter().copied().collect();
    let mut roster = ledger.members(&ids).await?;
    roster.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(HttpResponse::Ok().json(GroupView { group, roster }))
}

#[get("/health")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

/// Registers a member on behalf of the bot. Frontend users are registered
/// on their first login instead.
#[post("/members")]
async fn register_member(
    request: HttpRequest,
    ledger: web::Data<Ledger>,
    bot_token: web::Data<BotToken>,
    json: web::Json<NewMemberJson>,
) -> ApiResult {
    if !matches!(
        check_authorization_level(&request, &bot_token.0),
        Some(AuthorizationLevel::Bot)
    ) {
        return Err(ApiError::Unauthenticated);
    }
    let member = ledger.register_member(&json.name, &json.contact).await?;
    Ok(HttpResponse::Created().json(member))
}

#[get("/members/me")]
async fn current_member(actor: Actor) -> HttpResponse {
    HttpResponse::Ok().json(actor.0)
}

#[post("/groups")]
async fn add_group(
    ledger: web::Data<Ledger>,
    actor: Actor,
    json: web::Json<GroupNameJson>,
) -> ApiResult {
    let group = ledger.create_group(&actor.0, &json.name).await?;
    Ok(HttpResponse::Created().json(group))
}

#[get("/groups/{id}")]
async fn get_group(ledger: web::Data<Ledger>, actor: Actor, id: web::Path<GroupId>) -> ApiResult {
    let group = group_of(&ledger, id.into_inner(), &actor).await?;
    group_view(&ledger, group).await
}

#[post("/groups/{id}/members")]
async fn add_member(
    ledger: web::Data<Ledger>,
    actor: Actor,
    id: web::Path<GroupId>,
    json: web::Json<MemberRefJson>,
) -> ApiResult {
    let group_id = id.into_inner();
    let group = match json.into_inner() {
        MemberRefJson {
            member_id: Some(member_id),
            ..
        } => ledger.add_member(actor.id(), group_id, member_id).await?,
        MemberRefJson {
            contact: Some(contact),
            ..
        } => {
            ledger
                .add_member_by_contact(actor.id(), group_id, &contact)
                .await?
        }
        _ => {
            return Err(LedgerError::invalid_input("either member_id or contact is required").into())
        }
    };
    group_view(&ledger, group).await
}

#[delete("/groups/{id}/members/{member_id}")]
async fn remove_member(
    ledger: web::Data<Ledger>,
    actor: Actor,
    path: web::Path<(GroupId, MemberId)>,
) -> ApiResult {
    let (group_id, member) = path.into_inner();
    let group = ledger.remove_member(actor.id(), group_id, member).await?;
    group_view(&ledger, group).await
}

#[get("/groups/{id}/expenses")]
async fn list_expenses(
    ledger: web::Data<Ledger>,
    actor: Actor,
    id: web::Path<GroupId>,
) -> ApiResult {
    let group = group_of(&ledger, id.into_inner(), &actor).await?;
    Ok(HttpResponse::Ok().json(group.expenses()))
}

#[post("/groups/{id}/expenses")]
async fn add_expense(
    ledger: web::Data<Ledger>,
    actor: Actor,
    id: web::Path<GroupId>,
    expense: web::Json<NewExpense>,
) -> ApiResult {
    let expense = ledger
        .add_expense(id.into_inner(), actor.id(), expense.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(expense))
}

#[delete("/groups/{id}/expenses/{expense_id}")]
async fn delete_expense(
    ledger: web::Data<Ledger>,
    actor: Actor,
    path: web::Path<(GroupId, ExpenseId)>,
) -> ApiResult {
    let (group_id, expense_id) = path.into_inner();
    ledger.delete_expense(actor.id(), group_id, expense_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/groups/{id}/expenses/{expense_id}/shares/{member_id}/paid")]
async fn mark_share_paid(
    ledger: web::Data<Ledger>,
    actor: Actor,
    path: web::Path<(GroupId, ExpenseId, MemberId)>,
) -> ApiResult {
    let (group_id, expense_id, debtor) = path.into_inner();
    ledger
        .mark_share_paid(actor.id(), group_id, expense_id, debtor)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/groups/{id}/balance")]
async fn get_balance(ledger: web::Data<Ledger>, actor: Actor, id: web::Path<GroupId>) -> ApiResult {
    let group_id = id.into_inner();
    let group = group_of(&ledger, group_id, &actor).await?;
    let mut balances = ledger.get_balances(group_id).await?;
    let ids: Vec<MemberId> = group.members().iter().copied().collect();

    let mut view: Vec<MemberBalance> = ledger
        .members(&ids)
        .await?
        .into_iter()
        .filter_map(|member| {
            let balance = balances.remove(&member.id)?;
            Some(MemberBalance { member, balance })
        })
        .collect();
    view.sort_by(|a, b| a.member.name.cmp(&b.member.name));
    Ok(HttpResponse::Ok().json(view))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(register_member)
        .service(current_member)
        .service(add_group)
        .service(get_group)
        .service(add_member)
        .service(remove_member)
        .service(list_expenses)
        .service(add_expense)
        .service(delete_expense)
        .service(mark_share_paid)
        .service(get_balance);
}
