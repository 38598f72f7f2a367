//! Transfers between users and atomically applied splits
//!
//! A transaction moves `amount` from sender to receiver and adjusts both
//! balances in the same unit of work, so the sum of all balances stays zero.
//! Rows are immutable once written (enforced by triggers in the schema).

use diesel::prelude::*;
use tracing::{debug, info};

use super::diesel_schema::{multi_transactions, transactions};
use super::models::{
    current_timestamp, MultiTransaction, MultiTransactionDetail, NewMultiTransaction,
    NewTransaction, Transaction,
};
use super::users;
use crate::error::LedgerError;
use crate::money::Cents;
use crate::split::SplitPlan;

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_transaction(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<Transaction>, LedgerError> {
    Ok(transactions::table
        .find(id)
        .select(Transaction::as_select())
        .first(conn)
        .optional()?)
}

/// Transactions a user sent or received, oldest first
pub fn list_for_user(
    conn: &mut SqliteConnection,
    user_id: i64,
    limit: i64,
) -> Result<Vec<Transaction>, LedgerError> {
    Ok(transactions::table
        .filter(
            transactions::sender_id
                .eq(user_id)
                .or(transactions::receiver_id.eq(user_id)),
        )
        .order(transactions::id.asc())
        .limit(limit)
        .select(Transaction::as_select())
        .load(conn)?)
}

pub fn get_multi_transaction(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<MultiTransactionDetail>, LedgerError> {
    let multi: Option<MultiTransaction> = multi_transactions::table
        .find(id)
        .select(MultiTransaction::as_select())
        .first(conn)
        .optional()?;

    match multi {
        Some(m) => {
            let members = transactions::table
                .filter(transactions::multi_transaction_id.eq(m.id))
                .order(transactions::id.asc())
                .select(Transaction::as_select())
                .load(conn)?;
            Ok(Some(MultiTransactionDetail::new(m, members)))
        }
        None => Ok(None),
    }
}

// ============================================================================
// Write Operations
// ============================================================================

/// Record one transfer and move the balances
///
/// Callers run this inside [`crate::db::LedgerDb::write`]; on error nothing
/// is left behind once that transaction rolls back.
pub fn create_transaction(
    conn: &mut SqliteConnection,
    sender_id: i64,
    receiver_id: i64,
    amount: Cents,
    reason: &str,
    multi_transaction_id: Option<i64>,
) -> Result<Transaction, LedgerError> {
    if sender_id == receiver_id {
        return Err(LedgerError::SameParty(sender_id));
    }
    users::require_user(conn, sender_id)?;
    users::require_user(conn, receiver_id)?;

    let amount = amount.get();
    users::adjust_balance(conn, sender_id, -amount)?;
    users::adjust_balance(conn, receiver_id, amount)?;

    let now = current_timestamp();
    let new_tx = NewTransaction {
        sender_id,
        receiver_id,
        amount,
        reason: Some(reason),
        registered: &now,
        multi_transaction_id,
    };
    let tx = diesel::insert_into(transactions::table)
        .values(&new_tx)
        .returning(Transaction::as_returning())
        .get_result(conn)?;

    debug!(
        transaction_id = tx.id,
        sender_id, receiver_id, amount, "Recorded transaction"
    );
    Ok(tx)
}

/// Commit a planned split as one multi transaction
///
/// All participants must exist before anything is written. The member
/// transfers run inside a savepoint so a failure on any of them undoes the
/// whole split even when the caller keeps its outer transaction.
pub fn apply_split(
    conn: &mut SqliteConnection,
    plan: &SplitPlan,
) -> Result<MultiTransactionDetail, LedgerError> {
    for user_id in plan.participants() {
        users::require_user(conn, user_id)?;
    }
    let base_amount = Cents::new(plan.base_amount)?;

    conn.transaction(|conn| {
        let now = current_timestamp();
        let multi = diesel::insert_into(multi_transactions::table)
            .values(&NewMultiTransaction {
                base_amount: base_amount.get(),
                registered: &now,
            })
            .returning(MultiTransaction::as_returning())
            .get_result(conn)?;

        let mut members = Vec::with_capacity(plan.transfers.len());
        for transfer in &plan.transfers {
            let tx = create_transaction(
                conn,
                transfer.sender_id,
                transfer.receiver_id,
                Cents::new(transfer.amount)?,
                &transfer.reason,
                Some(multi.id),
            )?;
            members.push(tx);
        }

        let detail = MultiTransactionDetail::new(multi, members);
        info!(
            multi_transaction_id = detail.id(),
            transfers = detail.transactions.len(),
            total = detail.total_amount,
            "Applied split"
        );
        Ok(detail)
    })
}
