//! Refund service - pool reimbursements decided by ballot
//!
//! Refund routes are guarded on the refund (whose tag covers its ballot and
//! votes); ballot routes and votes are guarded on the ballot.

use diesel::SqliteConnection;
use tracing::info;

use crate::consensus::{Outcome, Thresholds, VoteChoice};
use crate::db::models::{BallotDetail, Refund, RefundDetail, Vote};
use crate::db::refunds::{self, CreateRefundInput};
use crate::db::users;
use crate::error::LedgerError;
use crate::etag::{Precondition, Tagged};

use super::events::{EntityKind, LedgerEvent};
use super::ServiceContext;

const REFUND: EntityKind = EntityKind::Refund;
const BALLOT: EntityKind = EntityKind::Ballot;

fn unknown_refund(id: i64) -> LedgerError {
    LedgerError::UnknownEntity { kind: "refund", id }
}

fn unknown_ballot(id: i64) -> LedgerError {
    LedgerError::UnknownEntity { kind: "ballot", id }
}

pub struct RefundService {
    ctx: ServiceContext,
    thresholds: Thresholds,
}

impl RefundService {
    pub fn new(ctx: ServiceContext, thresholds: Thresholds) -> Self {
        Self { ctx, thresholds }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get(
        &self,
        precondition: &Precondition,
        id: i64,
    ) -> Result<Tagged<RefundDetail>, LedgerError> {
        let detail = self.ctx.db.with_conn(|conn| refunds::get_refund(conn, id))?;
        self.ctx
            .gate
            .read(precondition, REFUND.as_str(), detail, || unknown_refund(id))
    }

    pub fn list(&self, active_only: bool) -> Result<Vec<Refund>, LedgerError> {
        self.ctx
            .db
            .with_conn(|conn| refunds::list_refunds(conn, active_only))
    }

    pub fn get_ballot(
        &self,
        precondition: &Precondition,
        id: i64,
    ) -> Result<Tagged<BallotDetail>, LedgerError> {
        let ballot = self.ctx.db.with_conn(|conn| refunds::get_ballot(conn, id))?;
        self.ctx
            .gate
            .read(precondition, BALLOT.as_str(), ballot, || unknown_ballot(id))
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Request a refund, guarded on the creator
    pub fn create(
        &self,
        precondition: &Precondition,
        input: &CreateRefundInput,
    ) -> Result<Tagged<RefundDetail>, LedgerError> {
        let detail = self.ctx.db.write(|conn| {
            let creator = users::get_user(conn, input.creator_id)?;
            self.ctx.gate.guard_write(
                precondition,
                EntityKind::User.as_str(),
                creator.as_ref(),
                || LedgerError::UnknownUser(input.creator_id),
            )?;
            refunds::create_refund(conn, input)
        })?;

        self.ctx.publish(&[
            LedgerEvent::created(REFUND, detail.id()),
            LedgerEvent::created(BALLOT, detail.ballot.id()),
        ]);
        self.ctx.gate.tagged(REFUND.as_str(), detail)
    }

    /// Cast or change a vote, guarded on the ballot
    pub fn cast_vote(
        &self,
        precondition: &Precondition,
        ballot_id: i64,
        user_id: i64,
        choice: VoteChoice,
    ) -> Result<Tagged<Vote>, LedgerError> {
        let (vote, replaced, refund_id) = self.ctx.db.write(|conn| {
            let ballot = self.guard_ballot(conn, precondition, ballot_id)?;
            let replaced = ballot.votes.iter().any(|v| v.user_id == user_id);
            let vote = refunds::cast_vote(conn, ballot_id, user_id, choice)?;
            let refund_id = refunds::refund_for_ballot(conn, ballot_id)?.map(|r| r.id());
            Ok((vote, replaced, refund_id))
        })?;

        let mut events = vec![
            if replaced {
                LedgerEvent::updated(EntityKind::Vote, vote.id)
            } else {
                LedgerEvent::created(EntityKind::Vote, vote.id)
            },
            LedgerEvent::updated(BALLOT, ballot_id),
        ];
        if let Some(id) = refund_id {
            events.push(LedgerEvent::updated(REFUND, id));
        }
        self.ctx.publish(&events);
        self.ctx.gate.tagged(EntityKind::Vote.as_str(), vote)
    }

    /// Tally and finalize a refund, guarded on the refund
    pub fn resolve(
        &self,
        precondition: &Precondition,
        id: i64,
    ) -> Result<Tagged<RefundDetail>, LedgerError> {
        let (detail, outcome) = self.ctx.db.write(|conn| {
            self.guard_refund(conn, precondition, id)?;
            refunds::resolve_refund(conn, id, self.thresholds)
        })?;

        self.announce_closed(&detail, outcome);
        self.ctx.gate.tagged(REFUND.as_str(), detail)
    }

    /// Close a refund without paying, guarded on the refund
    pub fn abort(
        &self,
        precondition: &Precondition,
        id: i64,
    ) -> Result<Tagged<RefundDetail>, LedgerError> {
        let detail = self.ctx.db.write(|conn| {
            self.guard_refund(conn, precondition, id)?;
            refunds::abort_refund(conn, id)
        })?;

        info!(refund_id = id, "Refund aborted");
        self.ctx.publish(&[
            LedgerEvent::updated(REFUND, id),
            LedgerEvent::updated(BALLOT, detail.ballot.id()),
        ]);
        self.ctx.gate.tagged(REFUND.as_str(), detail)
    }

    /// Resolve the refund a ballot decides, guarded on the ballot
    pub fn resolve_ballot(
        &self,
        precondition: &Precondition,
        ballot_id: i64,
    ) -> Result<Tagged<BallotDetail>, LedgerError> {
        let (detail, outcome) = self.ctx.db.write(|conn| {
            self.guard_ballot(conn, precondition, ballot_id)?;
            let refund_id = self.refund_id_of(conn, ballot_id)?;
            refunds::resolve_refund(conn, refund_id, self.thresholds)
        })?;

        self.announce_closed(&detail, outcome);
        self.ctx.gate.tagged(BALLOT.as_str(), detail.ballot)
    }

    /// Abort the refund a ballot decides, guarded on the ballot
    pub fn abort_ballot(
        &self,
        precondition: &Precondition,
        ballot_id: i64,
    ) -> Result<Tagged<BallotDetail>, LedgerError> {
        let detail = self.ctx.db.write(|conn| {
            self.guard_ballot(conn, precondition, ballot_id)?;
            let refund_id = self.refund_id_of(conn, ballot_id)?;
            refunds::abort_refund(conn, refund_id)
        })?;

        self.ctx.publish(&[
            LedgerEvent::updated(REFUND, detail.id()),
            LedgerEvent::updated(BALLOT, ballot_id),
        ]);
        self.ctx.gate.tagged(BALLOT.as_str(), detail.ballot)
    }

    fn announce_closed(&self, detail: &RefundDetail, outcome: Outcome) {
        info!(refund_id = detail.id(), ?outcome, "Refund resolved");
        let mut events = vec![
            LedgerEvent::updated(REFUND, detail.id()),
            LedgerEvent::updated(BALLOT, detail.ballot.id()),
        ];
        if let Some(tx) = detail.refund.transaction_id {
            events.push(LedgerEvent::created(EntityKind::Transaction, tx));
        }
        self.ctx.publish(&events);
    }

    fn refund_id_of(&self, conn: &mut SqliteConnection, ballot_id: i64) -> Result<i64, LedgerError> {
        refunds::refund_for_ballot(conn, ballot_id)?
            .map(|r| r.id())
            .ok_or_else(|| {
                LedgerError::Internal(format!("ballot {} has no refund", ballot_id))
            })
    }

    fn guard_refund(
        &self,
        conn: &mut SqliteConnection,
        precondition: &Precondition,
        id: i64,
    ) -> Result<RefundDetail, LedgerError> {
        let current = refunds::get_refund(conn, id)?;
        self.ctx.gate.guard_write(
            precondition,
            REFUND.as_str(),
            current.as_ref(),
            || unknown_refund(id),
        )?;
        current.ok_or_else(|| unknown_refund(id))
    }

    fn guard_ballot(
        &self,
        conn: &mut SqliteConnection,
        precondition: &Precondition,
        id: i64,
    ) -> Result<BallotDetail, LedgerError> {
        let current = refunds::get_ballot(conn, id)?;
        self.ctx.gate.guard_write(
            precondition,
            BALLOT.as_str(),
            current.as_ref(),
            || unknown_ballot(id),
        )?;
        current.ok_or_else(|| unknown_ballot(id))
    }
}
