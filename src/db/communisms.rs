//! Communisms: shared expenses collected from participants
//!
//! A communism stays open while participants are added or changed, then is
//! either closed (everyone pays the creator their share of the total, rounded
//! up per unit) or aborted (nothing moves).

use diesel::prelude::*;
use serde::Deserialize;
use tracing::info;

use super::diesel_schema::{communism_participants, communisms};
use super::models::{
    current_timestamp, Communism, CommunismDetail, MultiTransactionDetail, NewCommunism,
    NewParticipant, Participant,
};
use super::{transactions, users};
use crate::error::LedgerError;
use crate::money::Cents;
use crate::split::{self, Direction, Share, Sizing};

const KIND: &str = "communism";

/// Input for opening a communism
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCommunismInput {
    pub amount: Cents,
    pub description: String,
    pub creator_id: i64,
    #[serde(default)]
    pub participants: Vec<Share>,
}

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_communism(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<CommunismDetail>, LedgerError> {
    let communism: Option<Communism> = communisms::table
        .find(id)
        .select(Communism::as_select())
        .first(conn)
        .optional()?;

    match communism {
        Some(c) => {
            let participants = load_participants(conn, c.id)?;
            Ok(Some(CommunismDetail {
                communism: c,
                participants,
            }))
        }
        None => Ok(None),
    }
}

pub fn require_communism(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<CommunismDetail, LedgerError> {
    get_communism(conn, id)?.ok_or(LedgerError::UnknownEntity { kind: KIND, id })
}

pub fn list_communisms(
    conn: &mut SqliteConnection,
    active_only: bool,
) -> Result<Vec<Communism>, LedgerError> {
    let mut query = communisms::table
        .order(communisms::id.asc())
        .select(Communism::as_select())
        .into_boxed();
    if active_only {
        query = query.filter(communisms::active.eq(true));
    }
    Ok(query.load(conn)?)
}

fn load_participants(
    conn: &mut SqliteConnection,
    communism_id: i64,
) -> Result<Vec<Participant>, LedgerError> {
    Ok(communism_participants::table
        .filter(communism_participants::communism_id.eq(communism_id))
        .order(communism_participants::id.asc())
        .select(Participant::as_select())
        .load(conn)?)
}

// ============================================================================
// Write Operations
// ============================================================================

/// Open a communism; the creator participates once unless listed explicitly
pub fn create_communism(
    conn: &mut SqliteConnection,
    input: &CreateCommunismInput,
) -> Result<CommunismDetail, LedgerError> {
    let creator = users::require_user(conn, input.creator_id)?;
    if creator.is_community() {
        return Err(LedgerError::NotPermitted(
            "the community user cannot open a communism".into(),
        ));
    }

    let mut shares: Vec<Share> = Vec::with_capacity(input.participants.len() + 1);
    for share in &input.participants {
        if share.quantity < 0 {
            return Err(LedgerError::InvalidQuantity {
                user_id: share.user_id,
                quantity: share.quantity,
            });
        }
        users::require_user(conn, share.user_id)?;
        match shares.iter_mut().find(|s| s.user_id == share.user_id) {
            Some(existing) => {
                existing.quantity = existing.quantity.checked_add(share.quantity).ok_or(
                    LedgerError::InvalidQuantity {
                        user_id: share.user_id,
                        quantity: share.quantity,
                    },
                )?;
            }
            None => shares.push(*share),
        }
    }
    if !shares.iter().any(|s| s.user_id == creator.id) {
        shares.insert(0, Share::new(creator.id, 1));
    }

    let now = current_timestamp();
    let communism = diesel::insert_into(communisms::table)
        .values(&NewCommunism {
            amount: input.amount.get(),
            description: &input.description,
            creator_id: creator.id,
            created: &now,
            modified: &now,
        })
        .returning(Communism::as_returning())
        .get_result(conn)?;

    let rows: Vec<NewParticipant> = shares
        .iter()
        .map(|s| NewParticipant {
            communism_id: communism.id,
            user_id: s.user_id,
            quantity: s.quantity,
        })
        .collect();
    diesel::insert_into(communism_participants::table)
        .values(&rows)
        .execute(conn)?;

    info!(communism_id = communism.id, participants = rows.len(), "Opened communism");
    require_communism(conn, communism.id)
}

/// Insert or replace one participant's quantity
pub fn set_participant(
    conn: &mut SqliteConnection,
    id: i64,
    user_id: i64,
    quantity: i64,
) -> Result<CommunismDetail, LedgerError> {
    if quantity < 0 {
        return Err(LedgerError::InvalidQuantity { user_id, quantity });
    }
    let detail = require_communism(conn, id)?;
    if !detail.communism.active {
        return Err(LedgerError::AlreadyClosed { kind: KIND, id });
    }
    users::require_user(conn, user_id)?;

    diesel::insert_into(communism_participants::table)
        .values(&NewParticipant {
            communism_id: id,
            user_id,
            quantity,
        })
        .on_conflict((
            communism_participants::communism_id,
            communism_participants::user_id,
        ))
        .do_update()
        .set(communism_participants::quantity.eq(quantity))
        .execute(conn)?;

    touch(conn, id)?;
    require_communism(conn, id)
}

/// Close a communism: every participant pays the creator their share
///
/// The amount is spread over all units, the creator's included, and the
/// creator's own share stays with them. Closing succeeds even when nobody
/// else owes anything; the settlement is then empty.
pub fn close_communism(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<(CommunismDetail, MultiTransactionDetail), LedgerError> {
    let detail = require_communism(conn, id)?;
    if !detail.communism.active {
        return Err(LedgerError::AlreadyClosed { kind: KIND, id });
    }

    let shares: Vec<Share> = detail
        .participants
        .iter()
        .map(|p| Share::new(p.user_id, p.quantity))
        .collect();
    let units = shares
        .iter()
        .try_fold(0i64, |acc, s| acc.checked_add(s.quantity))
        .ok_or_else(|| LedgerError::InvalidAmount("sum of quantities overflows".into()))?;
    let amount = Cents::new(detail.communism.amount)?;
    // With no units at all nobody owes anything
    let base = split::base_for_total(amount, units).unwrap_or(amount.get());
    let plan = split::plan(
        detail.communism.creator_id,
        &shares,
        Sizing::Base(Cents::new(base)?),
        Direction::ManyToOne,
        &detail.communism.description,
        None,
    )?;
    let multi = transactions::apply_split(conn, &plan)?;

    let now = current_timestamp();
    diesel::update(communisms::table.find(id))
        .set((
            communisms::active.eq(false),
            communisms::multi_transaction_id.eq(Some(multi.id())),
            communisms::modified.eq(&now),
            communisms::revision.eq(communisms::revision + 1),
        ))
        .execute(conn)?;

    info!(
        communism_id = id,
        multi_transaction_id = multi.id(),
        total = multi.total_amount,
        "Closed communism"
    );
    Ok((require_communism(conn, id)?, multi))
}

/// Abort a communism without moving money
pub fn abort_communism(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<CommunismDetail, LedgerError> {
    let detail = require_communism(conn, id)?;
    if !detail.communism.active {
        return Err(LedgerError::AlreadyClosed { kind: KIND, id });
    }

    let now = current_timestamp();
    diesel::update(communisms::table.find(id))
        .set((
            communisms::active.eq(false),
            communisms::modified.eq(&now),
            communisms::revision.eq(communisms::revision + 1),
        ))
        .execute(conn)?;

    info!(communism_id = id, "Aborted communism");
    require_communism(conn, id)
}

fn touch(conn: &mut SqliteConnection, id: i64) -> Result<(), LedgerError> {
    let now = current_timestamp();
    diesel::update(communisms::table.find(id))
        .set((
            communisms::modified.eq(&now),
            communisms::revision.eq(communisms::revision + 1),
        ))
        .execute(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::users::{create_user, CreateUserInput};
    use crate::db::LedgerDb;

    fn user(conn: &mut SqliteConnection) -> i64 {
        create_user(conn, &CreateUserInput::default()).unwrap().id
    }

    fn input(creator_id: i64, amount: i64, participants: Vec<Share>) -> CreateCommunismInput {
        CreateCommunismInput {
            amount: Cents::new(amount).unwrap(),
            description: "groceries".into(),
            creator_id,
            participants,
        }
    }

    #[test]
    fn test_creator_joins_by_default() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.write(|conn| {
            let creator = user(conn);
            let other = user(conn);
            let c = create_communism(conn, &input(creator, 100, vec![Share::new(other, 2)]))?;
            let ids: Vec<(i64, i64)> =
                c.participants.iter().map(|p| (p.user_id, p.quantity)).collect();
            assert_eq!(ids, vec![(creator, 1), (other, 2)]);
            assert!(c.communism.active);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_close_charges_participants() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.write(|conn| {
            let creator = user(conn);
            let b = user(conn);
            let c = user(conn);
            let opened = create_communism(
                conn,
                &input(creator, 100, vec![Share::new(b, 1), Share::new(c, 1)]),
            )?;
            let opened = set_participant(conn, opened.id(), c, 2)?;
            assert_eq!(opened.participants.len(), 3);

            let (closed, multi) = close_communism(conn, opened.id())?;
            assert!(!closed.communism.active);
            assert_eq!(closed.communism.multi_transaction_id, Some(multi.id()));
            // 100 over 4 units, the creator's own unit included
            assert_eq!(multi.multi_transaction.base_amount, 25);
            assert_eq!(multi.total_amount, 75);
            assert_eq!(users::require_user(conn, creator)?.balance, 75);
            assert_eq!(users::require_user(conn, b)?.balance, -25);
            assert_eq!(users::require_user(conn, c)?.balance, -50);

            assert!(matches!(
                close_communism(conn, opened.id()),
                Err(LedgerError::AlreadyClosed { .. })
            ));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_close_between_two_halves_the_amount() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.write(|conn| {
            let creator = user(conn);
            let other = user(conn);
            let opened = create_communism(conn, &input(creator, 100, vec![Share::new(other, 1)]))?;

            let (_, multi) = close_communism(conn, opened.id())?;
            assert_eq!(multi.multi_transaction.base_amount, 50);
            assert_eq!(multi.transactions.len(), 1);
            assert_eq!(users::require_user(conn, other)?.balance, -50);
            assert_eq!(users::require_user(conn, creator)?.balance, 50);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_close_rounds_shares_up() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.write(|conn| {
            let creator = user(conn);
            let b = user(conn);
            let c = user(conn);
            let opened = create_communism(
                conn,
                &input(creator, 100, vec![Share::new(b, 1), Share::new(c, 1)]),
            )?;

            let (_, multi) = close_communism(conn, opened.id())?;
            assert_eq!(multi.multi_transaction.base_amount, 34);
            assert_eq!(multi.total_amount, 68);
            assert_eq!(users::require_user(conn, creator)?.balance, 68);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_abort_moves_nothing() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.write(|conn| {
            let creator = user(conn);
            let b = user(conn);
            let c = create_communism(conn, &input(creator, 100, vec![Share::new(b, 1)]))?;
            let aborted = abort_communism(conn, c.id())?;
            assert!(!aborted.communism.active);
            assert_eq!(aborted.communism.multi_transaction_id, None);
            assert!(matches!(
                set_participant(conn, c.id(), b, 3),
                Err(LedgerError::AlreadyClosed { .. })
            ));
            Ok(())
        })
        .unwrap();
        assert_eq!(db.stats().unwrap().transactions, 0);
    }

    #[test]
    fn test_closing_alone_settles_nothing() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.write(|conn| {
            let creator = user(conn);
            let idle = user(conn);
            let c = create_communism(conn, &input(creator, 100, vec![Share::new(idle, 0)]))?;

            let (closed, multi) = close_communism(conn, c.id())?;
            assert!(!closed.communism.active);
            assert_eq!(closed.communism.multi_transaction_id, Some(multi.id()));
            assert!(multi.transactions.is_empty());
            assert_eq!(multi.total_amount, 0);
            assert_eq!(users::require_user(conn, creator)?.balance, 0);
            Ok(())
        })
        .unwrap();
        assert_eq!(db.stats().unwrap().transactions, 0);
    }

    #[test]
    fn test_close_with_no_units_settles_nothing() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.write(|conn| {
            let creator = user(conn);
            let c = create_communism(conn, &input(creator, 100, vec![]))?;
            set_participant(conn, c.id(), creator, 0)?;

            let (closed, multi) = close_communism(conn, c.id())?;
            assert!(!closed.communism.active);
            assert!(multi.transactions.is_empty());
            Ok(())
        })
        .unwrap();
    }
}
