//! Diesel model definitions for ledger tables
//!
//! - Queryable structs: for SELECT queries (reading data)
//! - Insertable structs: for INSERT queries (writing data)
//! - `*Detail` structs: an entity plus the child rows its entity tag covers

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::diesel_schema::*;

// ============================================================================
// Timestamp Helpers (SQLite stores timestamps as TEXT)
// ============================================================================

/// Get current UTC timestamp as ISO 8601 string for SQLite TEXT columns
pub fn current_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct User {
    pub id: i64,
    pub name: Option<String>,
    pub balance: i64,
    pub permission: bool,
    pub active: bool,
    pub external: bool,
    pub special: Option<bool>,
    pub voucher_id: Option<i64>,
    pub created: String,
    pub modified: String,
    /// Bumped by every write, so a repeated no-op write still changes the tag
    pub revision: i64,
}

impl User {
    /// Whether this is the community pool user
    pub fn is_community(&self) -> bool {
        self.special == Some(true)
    }

    /// Whether this user may vote on ballots
    pub fn can_vote(&self) -> bool {
        self.permission && self.active
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub name: Option<&'a str>,
    pub permission: bool,
    pub active: bool,
    pub external: bool,
    pub special: Option<bool>,
    pub voucher_id: Option<i64>,
    pub created: &'a str,
    pub modified: &'a str,
}

/// Partial update; `None` leaves a column untouched
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = users)]
pub struct UserChanges<'a> {
    pub name: Option<&'a str>,
    pub permission: Option<bool>,
    pub active: Option<bool>,
    pub external: Option<bool>,
    pub voucher_id: Option<Option<i64>>,
    pub modified: &'a str,
}

// ============================================================================
// Transactions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = transactions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Transaction {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub amount: i64,
    pub reason: Option<String>,
    pub registered: String,
    pub multi_transaction_id: Option<i64>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = transactions)]
pub struct NewTransaction<'a> {
    pub sender_id: i64,
    pub receiver_id: i64,
    pub amount: i64,
    pub reason: Option<&'a str>,
    pub registered: &'a str,
    pub multi_transaction_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = multi_transactions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MultiTransaction {
    pub id: i64,
    pub base_amount: i64,
    pub registered: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = multi_transactions)]
pub struct NewMultiTransaction<'a> {
    pub base_amount: i64,
    pub registered: &'a str,
}

/// A multi transaction with its member transfers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiTransactionDetail {
    #[serde(flatten)]
    pub multi_transaction: MultiTransaction,
    pub total_amount: i64,
    pub transactions: Vec<Transaction>,
}

impl MultiTransactionDetail {
    pub fn new(multi_transaction: MultiTransaction, transactions: Vec<Transaction>) -> Self {
        let total_amount = transactions.iter().map(|t| t.amount).sum();
        Self {
            multi_transaction,
            total_amount,
            transactions,
        }
    }

    pub fn id(&self) -> i64 {
        self.multi_transaction.id
    }
}

// ============================================================================
// Communisms
// ============================================================================

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = communisms)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Communism {
    pub id: i64,
    pub amount: i64,
    pub description: String,
    pub creator_id: i64,
    pub active: bool,
    pub created: String,
    pub modified: String,
    pub multi_transaction_id: Option<i64>,
    pub revision: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = communisms)]
pub struct NewCommunism<'a> {
    pub amount: i64,
    pub description: &'a str,
    pub creator_id: i64,
    pub created: &'a str,
    pub modified: &'a str,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = communism_participants)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Participant {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub communism_id: i64,
    pub user_id: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = communism_participants)]
pub struct NewParticipant {
    pub communism_id: i64,
    pub user_id: i64,
    pub quantity: i64,
}

/// A communism with its participant list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunismDetail {
    #[serde(flatten)]
    pub communism: Communism,
    pub participants: Vec<Participant>,
}

impl CommunismDetail {
    pub fn id(&self) -> i64 {
        self.communism.id
    }
}

// ============================================================================
// Ballots, votes and refunds
// ============================================================================

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = ballots)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Ballot {
    pub id: i64,
    pub question: String,
    pub modified: String,
    pub active: bool,
    pub result: Option<i64>,
    pub closed: Option<String>,
    pub revision: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = ballots)]
pub struct NewBallot<'a> {
    pub question: &'a str,
    pub modified: &'a str,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = votes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Vote {
    pub id: i64,
    pub ballot_id: i64,
    pub user_id: i64,
    pub vote: i64,
    pub modified: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = votes)]
pub struct NewVote<'a> {
    pub ballot_id: i64,
    pub user_id: i64,
    pub vote: i64,
    pub modified: &'a str,
}

/// A ballot with every vote cast on it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BallotDetail {
    #[serde(flatten)]
    pub ballot: Ballot,
    pub votes: Vec<Vote>,
}

impl BallotDetail {
    pub fn id(&self) -> i64 {
        self.ballot.id
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = refunds)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Refund {
    pub id: i64,
    pub amount: i64,
    pub description: String,
    pub creator_id: i64,
    pub active: bool,
    pub created: String,
    pub modified: String,
    pub ballot_id: i64,
    pub transaction_id: Option<i64>,
    pub revision: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = refunds)]
pub struct NewRefund<'a> {
    pub amount: i64,
    pub description: &'a str,
    pub creator_id: i64,
    pub created: &'a str,
    pub modified: &'a str,
    pub ballot_id: i64,
}

/// A refund with its ballot; the refund's tag changes with every vote
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefundDetail {
    #[serde(flatten)]
    pub refund: Refund,
    pub ballot: BallotDetail,
}

impl RefundDetail {
    pub fn id(&self) -> i64 {
        self.refund.id
    }
}

// ============================================================================
// Callback registry
// ============================================================================

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = applications)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Application {
    pub id: i64,
    pub name: String,
    pub created: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = applications)]
pub struct NewApplication<'a> {
    pub name: &'a str,
    pub created: &'a str,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = callbacks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Callback {
    pub id: i64,
    pub base: String,
    pub app_id: Option<i64>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = callbacks)]
pub struct NewCallback<'a> {
    pub base: &'a str,
    pub app_id: Option<i64>,
}
