//! Resolves the member on whose behalf a request is made.

use std::future::Future;
use std::num::ParseIntError;
use std::pin::Pin;

use actix_web::{dev::Payload, http::header::HeaderValue, web, FromRequest, HttpRequest};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::routes::ApiError;
use crate::schemas::{Member, MemberId};

type HmacSha256 = Hmac<Sha256>;

/// Header naming the member a bot request acts for.
pub const ACTING_MEMBER_HEADER: &str = "X-Acting-Member";

/// Login-widget data older than this is refused.
const MAX_AUTH_AGE_SECS: i64 = 24 * 60 * 60;

/// Secret shared with the Telegram bot.
#[derive(Clone)]
pub struct BotToken(pub String);

#[derive(Debug, PartialEq)]
pub enum AuthorizationLevel {
    /// The bot itself, acting for the member in [`ACTING_MEMBER_HEADER`].
    Bot,
    /// A user logged in through the Telegram login widget.
    Frontend(TelegramUser),
}

#[derive(Debug, PartialEq)]
pub struct TelegramUser {
    pub id: String,
    pub username: String,
}

#[derive(Deserialize, Debug, Clone)]
struct TelegramAuthData {
    auth_date: String,
    first_name: Option<String>,
    last_name: Option<String>,
    id: String,
    photo_url: Option<String>,
    username: String,
    hash: String,
}

pub fn check_authorization_level(request: &HttpRequest, bot_token: &str) -> Option<AuthorizationLevel> {
    let authorization = request
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .map(HeaderValue::to_str)?
        .ok()?;
    if authorization == bot_token {
        return Some(AuthorizationLevel::Bot);
    }
    let auth_data: TelegramAuthData = serde_json::from_str(authorization).ok()?;
    if !is_fresh(&auth_data.auth_date) {
        return None;
    }
    let hash = decode_hex(&auth_data.hash)?;
    let mut mac = keyed_mac(bot_token)?;
    mac.update(data_check_string(&auth_data).as_bytes());
    mac.verify_slice(&hash).ok()?;
    Some(AuthorizationLevel::Frontend(TelegramUser {
        id: auth_data.id,
        username: auth_data.username,
    }))
}

fn is_fresh(auth_date: &str) -> bool {
    let Ok(seconds) = auth_date.parse::<i64>() else {
        return false;
    };
    let age = Utc::now().timestamp() - seconds;
    (0..=MAX_AUTH_AGE_SECS).contains(&age)
}

fn decode_hex(raw: &str) -> Option<Vec<u8>> {
    if raw.len() % 2 != 0 {
        return None;
    }
    raw.chars()
        .collect::<Vec<_>>()
        .chunks(2)
        .map(|n| u8::from_str_radix(&String::from_iter(n), 16))
        .collect::<Result<Vec<u8>, ParseIntError>>()
        .ok()
}

fn keyed_mac(bot_token: &str) -> Option<HmacSha256> {
    let mut sha256_hasher = Sha256::new();
    sha256_hasher.update(bot_token.as_bytes());
    let bot_hash = sha256_hasher.finalize();
    HmacSha256::new_from_slice(&bot_hash).ok()
}

fn data_check_string(auth_data: &TelegramAuthData) -> String {
    [
        ("auth_date", Some(&auth_data.auth_date)),
        ("first_name", auth_data.first_name.as_ref()),
        ("id", Some(&auth_data.id)),
        ("last_name", auth_data.last_name.as_ref()),
        ("photo_url", auth_data.photo_url.as_ref()),
        ("username", Some(&auth_data.username)),
    ]
    .into_iter()
    .filter_map(|(key, value)| value.map(|value| format!("{key}={value}")))
    .collect::<Vec<_>>()
    .join("\n")
}

/// The authenticated member making the request.
#[derive(Debug, Clone)]
pub struct Actor(pub Member);

impl Actor {
    pub fn id(&self) -> MemberId {
        self.0.id
    }
}

async fn resolve_actor(
    level: AuthorizationLevel,
    acting_member: Option<String>,
    ledger: &Ledger,
) -> Result<Member, ApiError> {
    match level {
        AuthorizationLevel::Bot => {
            let raw = acting_member.ok_or(ApiError::Unauthenticated)?;
            let id: MemberId = raw.parse()?;
            Ok(ledger.member(id).await?)
        }
        AuthorizationLevel::Frontend(user) => {
            let contact = format!("telegram:{}", user.id);
            if let Some(member) = ledger.member_by_contact(&contact).await? {
                return Ok(member);
            }
            // Telegram usernames are not unique among members, and may be
            // missing entirely.
            let fallback = format!("{}#{}", user.username.trim(), user.id);
            let candidates = [user.username.trim(), fallback.as_str()];
            for name in candidates.into_iter().filter(|name| !name.is_empty()) {
                match ledger.register_member(name, &contact).await {
                    Ok(member) => return Ok(member),
                    Err(LedgerError::AlreadyRegistered(_)) => {
                        if let Some(member) = ledger.member_by_contact(&contact).await? {
                            return Ok(member);
                        }
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            tracing::warn!(telegram_id = %user.id, "no free member name for telegram user");
            Err(LedgerError::AlreadyRegistered(fallback).into())
        }
    }
}

impl FromRequest for Actor {
    type Error = ApiError;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(request: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let ledger = request.app_data::<web::Data<Ledger>>().cloned();
        let level = request
            .app_data::<web::Data<BotToken>>()
            .and_then(|token| check_authorization_level(request, &token.0));
        let acting_member = request
            .headers()
            .get(ACTING_MEMBER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Box::pin(async move {
            let ledger = ledger.ok_or(ApiError::Unauthenticated)?;
            let level = level.ok_or_else(|| {
                tracing::debug!("request rejected: missing or invalid credentials");
                ApiError::Unauthenticated
            })?;
            resolve_actor(level, acting_member, &ledger).await.map(Actor)
        })
    }
}
