//! Error kinds surfaced by the ledger and its collaborators.

use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Failure of a ledger operation.
///
/// Every variant is returned to the caller synchronously; nothing is
/// retried at this level.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    /// The split could not be computed (empty roster, non-positive amount,
    /// custom shares not adding up to the expense amount, ...).
    #[error("invalid split: {0}")]
    InvalidSplit(String),

    /// Membership management attempted by someone other than the creator.
    #[error("not authorized")]
    NotAuthorized,

    #[error("member already belongs to the group")]
    AlreadyMember,

    #[error("member does not belong to the group")]
    NotAMember,

    #[error("the group creator cannot be removed")]
    CannotRemoveCreator,

    /// A referenced group, member or expense does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Malformed user input outside of the split itself (blank names, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Member name or contact address already taken.
    #[error("already registered: {0}")]
    AlreadyRegistered(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    pub fn invalid_split(msg: impl Into<String>) -> Self {
        Self::InvalidSplit(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

/// Failure reported by a persistence backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint was violated.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// The write lost a race with a concurrent change.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A stored record could not be turned back into a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<bson::ser::Error> for StoreError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}
