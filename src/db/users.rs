//! User accounts and balances

use diesel::prelude::*;
use serde::Deserialize;
use tracing::info;

use super::diesel_schema::users;
use super::models::{current_timestamp, NewUser, User, UserChanges};
use super::unique_conflict;
use crate::error::LedgerError;

/// Input for creating a regular user
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateUserInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub permission: bool,
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub voucher_id: Option<i64>,
}

/// Input for updating a user; absent fields stay unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub permission: Option<bool>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub external: Option<bool>,
    #[serde(default)]
    pub voucher_id: Option<i64>,
    /// Remove the current voucher
    #[serde(default)]
    pub clear_voucher: bool,
}

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_user(conn: &mut SqliteConnection, id: i64) -> Result<Option<User>, LedgerError> {
    Ok(users::table
        .find(id)
        .select(User::as_select())
        .first(conn)
        .optional()?)
}

/// Get a user or fail with `UnknownUser`
pub fn require_user(conn: &mut SqliteConnection, id: i64) -> Result<User, LedgerError> {
    get_user(conn, id)?.ok_or(LedgerError::UnknownUser(id))
}

pub fn list_users(conn: &mut SqliteConnection) -> Result<Vec<User>, LedgerError> {
    Ok(users::table
        .order(users::id.asc())
        .select(User::as_select())
        .load(conn)?)
}

/// The community pool user, if it has been created
pub fn community_user(conn: &mut SqliteConnection) -> Result<Option<User>, LedgerError> {
    Ok(users::table
        .filter(users::special.eq(true))
        .select(User::as_select())
        .first(conn)
        .optional()?)
}

/// Sum of all balances; zero whenever the ledger is consistent
pub fn total_balance(conn: &mut SqliteConnection) -> Result<i64, LedgerError> {
    let balances: Vec<i64> = users::table.select(users::balance).load(conn)?;
    balances
        .into_iter()
        .try_fold(0i64, |acc, b| acc.checked_add(b))
        .ok_or_else(|| LedgerError::Internal("balance sum overflows".into()))
}

// ============================================================================
// Write Operations
// ============================================================================

pub fn create_user(
    conn: &mut SqliteConnection,
    input: &CreateUserInput,
) -> Result<User, LedgerError> {
    if let Some(voucher_id) = input.voucher_id {
        check_voucher(conn, voucher_id)?;
    }

    let now = current_timestamp();
    let new_user = NewUser {
        name: input.name.as_deref(),
        permission: input.permission,
        active: true,
        external: input.external,
        special: None,
        voucher_id: input.voucher_id,
        created: &now,
        modified: &now,
    };

    let user = diesel::insert_into(users::table)
        .values(&new_user)
        .returning(User::as_returning())
        .get_result(conn)
        .map_err(|e| unique_conflict(e, "user name"))?;

    info!(user_id = user.id, "Created user");
    Ok(user)
}

/// Return the community user, creating it on first use
pub fn ensure_community_user(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<User, LedgerError> {
    conn.transaction(|conn| {
        if let Some(existing) = community_user(conn)? {
            return Ok(existing);
        }

        let now = current_timestamp();
        let new_user = NewUser {
            name: Some(name),
            permission: false,
            active: true,
            external: false,
            special: Some(true),
            voucher_id: None,
            created: &now,
            modified: &now,
        };
        let user = diesel::insert_into(users::table)
            .values(&new_user)
            .returning(User::as_returning())
            .get_result(conn)
            .map_err(|e| unique_conflict(e, "community user"))?;

        info!(user_id = user.id, "Created community user");
        Ok(user)
    })
}

pub fn update_user(
    conn: &mut SqliteConnection,
    id: i64,
    input: &UpdateUserInput,
) -> Result<User, LedgerError> {
    let current = require_user(conn, id)?;

    if current.is_community() {
        if input.external == Some(true) || input.voucher_id.is_some() {
            return Err(LedgerError::NotPermitted(
                "the community user cannot be external or vouched for".into(),
            ));
        }
        if input.active == Some(false) {
            return Err(LedgerError::NotPermitted(
                "the community user cannot be deactivated".into(),
            ));
        }
    }
    if let Some(voucher_id) = input.voucher_id {
        if voucher_id == id {
            return Err(LedgerError::NotPermitted("a user cannot vouch for itself".into()));
        }
        check_voucher(conn, voucher_id)?;
    }

    let voucher_id = if input.clear_voucher {
        Some(None)
    } else {
        input.voucher_id.map(Some)
    };

    let now = current_timestamp();
    let changes = UserChanges {
        name: input.name.as_deref(),
        permission: input.permission,
        active: input.active,
        external: input.external,
        voucher_id,
        modified: &now,
    };

    diesel::update(users::table.find(id))
        .set((&changes, users::revision.eq(users::revision + 1)))
        .returning(User::as_returning())
        .get_result(conn)
        .map_err(|e| unique_conflict(e, "user name"))
}

/// Add `delta` to a user's balance
pub fn adjust_balance(conn: &mut SqliteConnection, id: i64, delta: i64) -> Result<(), LedgerError> {
    let now = current_timestamp();
    let updated = diesel::update(users::table.find(id))
        .set((
            users::balance.eq(users::balance + delta),
            users::modified.eq(&now),
            users::revision.eq(users::revision + 1),
        ))
        .execute(conn)?;

    if updated == 0 {
        return Err(LedgerError::UnknownUser(id));
    }
    Ok(())
}

fn check_voucher(conn: &mut SqliteConnection, voucher_id: i64) -> Result<(), LedgerError> {
    let voucher = require_user(conn, voucher_id)?;
    if voucher.external || !voucher.active || voucher.is_community() {
        return Err(LedgerError::NotPermitted(format!(
            "user {} cannot vouch for others",
            voucher_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LedgerDb;

    #[test]
    fn test_create_and_update_user() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.write(|conn| {
            let alice = create_user(
                conn,
                &CreateUserInput {
                    name: Some("alice".into()),
                    permission: true,
                    ..Default::default()
                },
            )?;
            assert_eq!(alice.balance, 0);
            assert!(alice.can_vote());

            let guest = create_user(
                conn,
                &CreateUserInput {
                    external: true,
                    voucher_id: Some(alice.id),
                    ..Default::default()
                },
            )?;
            assert_eq!(guest.voucher_id, Some(alice.id));

            let updated = update_user(
                conn,
                guest.id,
                &UpdateUserInput {
                    clear_voucher: true,
                    name: Some("guest".into()),
                    ..Default::default()
                },
            )?;
            assert_eq!(updated.voucher_id, None);
            assert_eq!(updated.name.as_deref(), Some("guest"));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_duplicate_name_conflicts() {
        let db = LedgerDb::open_in_memory().unwrap();
        let input = CreateUserInput {
            name: Some("bob".into()),
            ..Default::default()
        };
        db.write(|conn| create_user(conn, &input)).unwrap();
        let second = db.write(|conn| create_user(conn, &input));
        assert!(matches!(second, Err(LedgerError::Conflict(_))));
    }

    #[test]
    fn test_community_user_is_unique() {
        let db = LedgerDb::open_in_memory().unwrap();
        let first = db.write(|conn| ensure_community_user(conn, "Community")).unwrap();
        let again = db.write(|conn| ensure_community_user(conn, "Community")).unwrap();
        assert_eq!(first.id, again.id);
        assert!(first.is_community());

        let deactivate = db.write(|conn| {
            update_user(
                conn,
                first.id,
                &UpdateUserInput {
                    active: Some(false),
                    ..Default::default()
                },
            )
        });
        assert!(matches!(deactivate, Err(LedgerError::NotPermitted(_))));
    }

    #[test]
    fn test_external_user_cannot_vouch() {
        let db = LedgerDb::open_in_memory().unwrap();
        let result = db.write(|conn| {
            let ext = create_user(
                conn,
                &CreateUserInput {
                    external: true,
                    ..Default::default()
                },
            )?;
            create_user(
                conn,
                &CreateUserInput {
                    voucher_id: Some(ext.id),
                    ..Default::default()
                },
            )
        });
        assert!(matches!(result, Err(LedgerError::NotPermitted(_))));
    }
}
