//! Error types for commonpot

use thiserror::Error;

use crate::etag::EntityTag;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Sender and receiver must differ (user {0})")]
    SameParty(i64),

    #[error("Invalid quantity {quantity} for user {user_id}")]
    InvalidQuantity { user_id: i64, quantity: i64 },

    #[error("No recipients left to share the total between")]
    NoRecipients,

    #[error("Invalid reason indicator: {0}")]
    InvalidIndicator(String),

    #[error("Invalid vote {0}: must be -1, 0 or 1")]
    InvalidVote(i64),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown user: {0}")]
    UnknownUser(i64),

    #[error("Unknown {kind}: {id}")]
    UnknownEntity { kind: &'static str, id: i64 },

    #[error("{kind} {id} is already closed")]
    AlreadyClosed { kind: &'static str, id: i64 },

    #[error("Ballot {ballot_id} has no consensus yet (sum of votes {sum})")]
    InsufficientConsensus { ballot_id: i64, sum: i64 },

    #[error("Not permitted: {0}")]
    NotPermitted(String),

    #[error("No community user has been created")]
    MissingCommunityUser,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Precondition required: send If-Match with the current entity tag")]
    PreconditionRequired,

    #[error("Precondition failed: entity tag does not match current state")]
    PreconditionFailed,

    #[error("Not modified")]
    NotModified(EntityTag),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Whether re-attempting the same operation later can succeed without
    /// the caller changing its request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::InsufficientConsensus { .. }
                | LedgerError::PreconditionFailed
                | LedgerError::Database(_)
        )
    }
}

impl From<diesel::r2d2::PoolError> for LedgerError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        LedgerError::Pool(e.to_string())
    }
}
