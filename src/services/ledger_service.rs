//! Ledger service - transactions and multi-party splits
//!
//! Every transfer is guarded on the paying side's user entity: a client
//! holding a stale view of the sender's balance cannot move money.

use serde::Deserialize;
use tracing::info;

use crate::db::models::{MultiTransactionDetail, Transaction};
use crate::db::{transactions, users};
use crate::error::LedgerError;
use crate::etag::{Precondition, Tagged};
use crate::money::Cents;
use crate::split::{self, Direction, Indicator, Share, Sizing};

use super::events::{EntityKind, LedgerEvent};
use super::ServiceContext;

/// A split between one party and many counterparties
#[derive(Debug, Clone)]
pub struct SplitRequest {
    pub one: i64,
    pub counterparties: Vec<Share>,
    pub sizing: Sizing,
    pub direction: Direction,
    pub reason: String,
    pub indicator: Option<String>,
}

/// Wire form of a transaction request
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionInput {
    pub sender_id: i64,
    pub receiver_id: i64,
    pub amount: Cents,
    #[serde(default)]
    pub reason: String,
}

pub struct LedgerService {
    ctx: ServiceContext,
}

impl LedgerService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get_transaction(
        &self,
        precondition: &Precondition,
        id: i64,
    ) -> Result<Tagged<Transaction>, LedgerError> {
        let tx = self
            .ctx
            .db
            .with_conn(|conn| transactions::get_transaction(conn, id))?;
        self.ctx.gate.read(
            precondition,
            EntityKind::Transaction.as_str(),
            tx,
            || LedgerError::UnknownEntity {
                kind: "transaction",
                id,
            },
        )
    }

    pub fn get_multi_transaction(
        &self,
        precondition: &Precondition,
        id: i64,
    ) -> Result<Tagged<MultiTransactionDetail>, LedgerError> {
        let multi = self
            .ctx
            .db
            .with_conn(|conn| transactions::get_multi_transaction(conn, id))?;
        self.ctx.gate.read(
            precondition,
            EntityKind::MultiTransaction.as_str(),
            multi,
            || LedgerError::UnknownEntity {
                kind: "multitransaction",
                id,
            },
        )
    }

    pub fn list_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<Transaction>, LedgerError> {
        self.ctx.db.with_conn(|conn| {
            users::require_user(conn, user_id)?;
            transactions::list_for_user(conn, user_id, limit)
        })
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Move `amount` from sender to receiver
    pub fn create_transaction(
        &self,
        precondition: &Precondition,
        input: &TransactionInput,
    ) -> Result<Tagged<Transaction>, LedgerError> {
        if input.sender_id == input.receiver_id {
            return Err(LedgerError::SameParty(input.sender_id));
        }

        let tx = self.ctx.db.write(|conn| {
            let sender = users::get_user(conn, input.sender_id)?;
            self.ctx.gate.guard_write(
                precondition,
                EntityKind::User.as_str(),
                sender.as_ref(),
                || LedgerError::UnknownUser(input.sender_id),
            )?;
            transactions::create_transaction(
                conn,
                input.sender_id,
                input.receiver_id,
                input.amount,
                &input.reason,
                None,
            )
        })?;

        info!(
            transaction_id = tx.id,
            sender_id = tx.sender_id,
            receiver_id = tx.receiver_id,
            amount = tx.amount,
            "Transaction created"
        );
        self.ctx
            .publish(&[LedgerEvent::created(EntityKind::Transaction, tx.id)]);
        self.ctx
            .gate
            .tagged(EntityKind::Transaction.as_str(), tx)
    }

    /// Plan and commit a split, guarded on the single party
    pub fn split(
        &self,
        precondition: &Precondition,
        request: &SplitRequest,
    ) -> Result<Tagged<MultiTransactionDetail>, LedgerError> {
        let indicator = request
            .indicator
            .as_deref()
            .map(Indicator::parse)
            .transpose()?;
        let plan = split::plan(
            request.one,
            &request.counterparties,
            request.sizing,
            request.direction,
            &request.reason,
            indicator.as_ref(),
        )?;

        let multi = self.ctx.db.write(|conn| {
            let one = users::get_user(conn, request.one)?;
            self.ctx.gate.guard_write(
                precondition,
                EntityKind::User.as_str(),
                one.as_ref(),
                || LedgerError::UnknownUser(request.one),
            )?;
            transactions::apply_split(conn, &plan)
        })?;

        let mut events = vec![LedgerEvent::created(EntityKind::MultiTransaction, multi.id())];
        events.extend(
            multi
                .transactions
                .iter()
                .map(|t| LedgerEvent::created(EntityKind::Transaction, t.id)),
        );
        self.ctx.publish(&events);
        self.ctx
            .gate
            .tagged(EntityKind::MultiTransaction.as_str(), multi)
    }

    /// `one` pays `base × quantity` to every counterparty
    pub fn create_one_to_many_by_base(
        &self,
        precondition: &Precondition,
        one: i64,
        counterparties: Vec<Share>,
        base: Cents,
        reason: &str,
        indicator: Option<String>,
    ) -> Result<Tagged<MultiTransactionDetail>, LedgerError> {
        self.split(
            precondition,
            &SplitRequest {
                one,
                counterparties,
                sizing: Sizing::Base(base),
                direction: Direction::OneToMany,
                reason: reason.to_string(),
                indicator,
            },
        )
    }

    /// `one` pays at least `total`, shared by quantity among counterparties
    pub fn create_one_to_many_by_total(
        &self,
        precondition: &Precondition,
        one: i64,
        counterparties: Vec<Share>,
        total: Cents,
        reason: &str,
        indicator: Option<String>,
    ) -> Result<Tagged<MultiTransactionDetail>, LedgerError> {
        self.split(
            precondition,
            &SplitRequest {
                one,
                counterparties,
                sizing: Sizing::Total(total),
                direction: Direction::OneToMany,
                reason: reason.to_string(),
                indicator,
            },
        )
    }

    /// Every counterparty pays `base × quantity` to `one`
    pub fn create_many_to_one_by_base(
        &self,
        precondition: &Precondition,
        one: i64,
        counterparties: Vec<Share>,
        base: Cents,
        reason: &str,
        indicator: Option<String>,
    ) -> Result<Tagged<MultiTransactionDetail>, LedgerError> {
        self.split(
            precondition,
            &SplitRequest {
                one,
                counterparties,
                sizing: Sizing::Base(base),
                direction: Direction::ManyToOne,
                reason: reason.to_string(),
                indicator,
            },
        )
    }

    /// Counterparties together pay at least `total` to `one`
    pub fn create_many_to_one_by_total(
        &self,
        precondition: &Precondition,
        one: i64,
        counterparties: Vec<Share>,
        total: Cents,
        reason: &str,
        indicator: Option<String>,
    ) -> Result<Tagged<MultiTransactionDetail>, LedgerError> {
        self.split(
            precondition,
            &SplitRequest {
                one,
                counterparties,
                sizing: Sizing::Total(total),
                direction: Direction::ManyToOne,
                reason: reason.to_string(),
                indicator,
            },
        )
    }
}
