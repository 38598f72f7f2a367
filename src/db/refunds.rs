//! Refunds and the ballots that gate them
//!
//! Every refund owns exactly one ballot, created in the same unit of work.
//! Users with permission vote on the ballot; resolving it either pays the
//! creator from the community pool, rejects the request, or leaves it open.
//! A ballot closes exactly once, together with its refund.

use diesel::prelude::*;
use serde::Deserialize;
use tracing::info;

use super::diesel_schema::{ballots, refunds, votes};
use super::models::{
    current_timestamp, Ballot, BallotDetail, NewBallot, NewRefund, NewVote, Refund,
    RefundDetail, Vote,
};
use super::{transactions, users};
use crate::consensus::{self, Outcome, Thresholds, VoteChoice};
use crate::error::LedgerError;
use crate::money::Cents;

const REFUND: &str = "refund";
const BALLOT: &str = "ballot";

/// Input for requesting a refund
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRefundInput {
    pub amount: Cents,
    pub description: String,
    pub creator_id: i64,
}

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_ballot(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<BallotDetail>, LedgerError> {
    let ballot: Option<Ballot> = ballots::table
        .find(id)
        .select(Ballot::as_select())
        .first(conn)
        .optional()?;

    match ballot {
        Some(b) => {
            let votes = votes::table
                .filter(votes::ballot_id.eq(b.id))
                .order(votes::id.asc())
                .select(Vote::as_select())
                .load(conn)?;
            Ok(Some(BallotDetail { ballot: b, votes }))
        }
        None => Ok(None),
    }
}

pub fn require_ballot(conn: &mut SqliteConnection, id: i64) -> Result<BallotDetail, LedgerError> {
    get_ballot(conn, id)?.ok_or(LedgerError::UnknownEntity { kind: BALLOT, id })
}

pub fn get_refund(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<RefundDetail>, LedgerError> {
    let refund: Option<Refund> = refunds::table
        .find(id)
        .select(Refund::as_select())
        .first(conn)
        .optional()?;

    match refund {
        Some(r) => {
            let ballot = require_ballot(conn, r.ballot_id)?;
            Ok(Some(RefundDetail { refund: r, ballot }))
        }
        None => Ok(None),
    }
}

pub fn require_refund(conn: &mut SqliteConnection, id: i64) -> Result<RefundDetail, LedgerError> {
    get_refund(conn, id)?.ok_or(LedgerError::UnknownEntity { kind: REFUND, id })
}

/// The refund a ballot decides
pub fn refund_for_ballot(
    conn: &mut SqliteConnection,
    ballot_id: i64,
) -> Result<Option<RefundDetail>, LedgerError> {
    let refund_id: Option<i64> = refunds::table
        .filter(refunds::ballot_id.eq(ballot_id))
        .select(refunds::id)
        .first(conn)
        .optional()?;

    match refund_id {
        Some(id) => get_refund(conn, id),
        None => Ok(None),
    }
}

pub fn list_refunds(
    conn: &mut SqliteConnection,
    active_only: bool,
) -> Result<Vec<Refund>, LedgerError> {
    let mut query = refunds::table
        .order(refunds::id.asc())
        .select(Refund::as_select())
        .into_boxed();
    if active_only {
        query = query.filter(refunds::active.eq(true));
    }
    Ok(query.load(conn)?)
}

// ============================================================================
// Write Operations
// ============================================================================

/// Request a refund; its ballot asks the refund's description
pub fn create_refund(
    conn: &mut SqliteConnection,
    input: &CreateRefundInput,
) -> Result<RefundDetail, LedgerError> {
    let creator = users::require_user(conn, input.creator_id)?;
    if creator.is_community() {
        return Err(LedgerError::NotPermitted(
            "the community user cannot request a refund".into(),
        ));
    }

    let now = current_timestamp();
    let ballot = diesel::insert_into(ballots::table)
        .values(&NewBallot {
            question: &input.description,
            modified: &now,
        })
        .returning(Ballot::as_returning())
        .get_result(conn)?;

    let refund = diesel::insert_into(refunds::table)
        .values(&NewRefund {
            amount: input.amount.get(),
            description: &input.description,
            creator_id: creator.id,
            created: &now,
            modified: &now,
            ballot_id: ballot.id,
        })
        .returning(Refund::as_returning())
        .get_result(conn)?;

    info!(refund_id = refund.id, ballot_id = ballot.id, "Opened refund");
    require_refund(conn, refund.id)
}

/// Record or replace a user's vote on an open ballot
pub fn cast_vote(
    conn: &mut SqliteConnection,
    ballot_id: i64,
    user_id: i64,
    choice: VoteChoice,
) -> Result<Vote, LedgerError> {
    let ballot = require_ballot(conn, ballot_id)?;
    if !ballot.ballot.active {
        return Err(LedgerError::AlreadyClosed {
            kind: BALLOT,
            id: ballot_id,
        });
    }
    let voter = users::require_user(conn, user_id)?;
    if !voter.can_vote() {
        return Err(LedgerError::NotPermitted(format!(
            "user {} may not vote",
            user_id
        )));
    }

    let now = current_timestamp();
    let vote = diesel::insert_into(votes::table)
        .values(&NewVote {
            ballot_id,
            user_id,
            vote: choice.value(),
            modified: &now,
        })
        .on_conflict((votes::user_id, votes::ballot_id))
        .do_update()
        .set((votes::vote.eq(choice.value()), votes::modified.eq(&now)))
        .returning(Vote::as_returning())
        .get_result(conn)?;

    diesel::update(ballots::table.find(ballot_id))
        .set((
            ballots::modified.eq(&now),
            ballots::revision.eq(ballots::revision + 1),
        ))
        .execute(conn)?;
    touch_refund_of_ballot(conn, ballot_id, &now)?;

    info!(ballot_id, user_id, vote = vote.vote, "Vote recorded");
    Ok(vote)
}

/// Close a refund without paying, forcing the ballot result to 0
pub fn abort_refund(conn: &mut SqliteConnection, id: i64) -> Result<RefundDetail, LedgerError> {
    let detail = require_open_refund(conn, id)?;
    let now = current_timestamp();

    close_ballot(conn, detail.ballot.id(), 0, &now)?;
    diesel::update(refunds::table.find(id))
        .set((
            refunds::active.eq(false),
            refunds::modified.eq(&now),
            refunds::revision.eq(refunds::revision + 1),
        ))
        .execute(conn)?;

    info!(refund_id = id, "Aborted refund");
    require_refund(conn, id)
}

/// Tally the ballot and finalize the refund if a threshold is reached
///
/// `Undecided` fails with `InsufficientConsensus` and changes nothing.
pub fn resolve_refund(
    conn: &mut SqliteConnection,
    id: i64,
    thresholds: Thresholds,
) -> Result<(RefundDetail, Outcome), LedgerError> {
    let detail = require_open_refund(conn, id)?;
    let ballot_id = detail.ballot.id();
    let outcome = consensus::decide(detail.ballot.votes.iter().map(|v| v.vote), thresholds);
    let now = current_timestamp();

    let transaction_id = match outcome {
        Outcome::Undecided { sum } => {
            return Err(LedgerError::InsufficientConsensus { ballot_id, sum });
        }
        Outcome::Accepted { .. } => {
            let pool = users::community_user(conn)?.ok_or(LedgerError::MissingCommunityUser)?;
            let tx = transactions::create_transaction(
                conn,
                pool.id,
                detail.refund.creator_id,
                Cents::new(detail.refund.amount)?,
                &detail.refund.description,
                None,
            )?;
            Some(tx.id)
        }
        Outcome::Rejected { .. } => None,
    };

    close_ballot(conn, ballot_id, outcome.sum(), &now)?;
    diesel::update(refunds::table.find(id))
        .set((
            refunds::active.eq(false),
            refunds::transaction_id.eq(transaction_id),
            refunds::modified.eq(&now),
            refunds::revision.eq(refunds::revision + 1),
        ))
        .execute(conn)?;

    info!(refund_id = id, ballot_id, ?outcome, "Resolved refund");
    Ok((require_refund(conn, id)?, outcome))
}

fn require_open_refund(conn: &mut SqliteConnection, id: i64) -> Result<RefundDetail, LedgerError> {
    let detail = require_refund(conn, id)?;
    if !detail.refund.active || !detail.ballot.ballot.active {
        return Err(LedgerError::AlreadyClosed { kind: REFUND, id });
    }
    Ok(detail)
}

fn close_ballot(
    conn: &mut SqliteConnection,
    ballot_id: i64,
    result: i64,
    now: &str,
) -> Result<(), LedgerError> {
    let closed = diesel::update(ballots::table.find(ballot_id))
        .filter(ballots::active.eq(true))
        .set((
            ballots::active.eq(false),
            ballots::result.eq(Some(result)),
            ballots::closed.eq(Some(now)),
            ballots::modified.eq(now),
            ballots::revision.eq(ballots::revision + 1),
        ))
        .execute(conn)?;

    if closed == 0 {
        return Err(LedgerError::AlreadyClosed {
            kind: BALLOT,
            id: ballot_id,
        });
    }
    Ok(())
}

fn touch_refund_of_ballot(
    conn: &mut SqliteConnection,
    ballot_id: i64,
    now: &str,
) -> Result<(), LedgerError> {
    diesel::update(refunds::table.filter(refunds::ballot_id.eq(ballot_id)))
        .set((
            refunds::modified.eq(now),
            refunds::revision.eq(refunds::revision + 1),
        ))
        .execute(conn)?;
    Ok(())
}
