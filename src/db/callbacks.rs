//! Client applications and their notification callbacks

use diesel::prelude::*;
use serde::Deserialize;
use tracing::info;

use super::diesel_schema::{applications, callbacks};
use super::models::{current_timestamp, Application, Callback, NewApplication, NewCallback};
use super::unique_conflict;
use crate::error::LedgerError;

const CALLBACK: &str = "callback";
const APPLICATION: &str = "application";

/// Input for registering a callback
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCallbackInput {
    pub base: String,
    #[serde(default)]
    pub app_id: Option<i64>,
}

/// A callback target as seen by the notifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub base: String,
    pub owner: Option<String>,
}

// ============================================================================
// Read Operations
// ============================================================================

pub fn list_applications(conn: &mut SqliteConnection) -> Result<Vec<Application>, LedgerError> {
    Ok(applications::table
        .order(applications::id.asc())
        .select(Application::as_select())
        .load(conn)?)
}

pub fn get_application(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<Application>, LedgerError> {
    Ok(applications::table
        .find(id)
        .select(Application::as_select())
        .first(conn)
        .optional()?)
}

pub fn list_callbacks(conn: &mut SqliteConnection) -> Result<Vec<Callback>, LedgerError> {
    Ok(callbacks::table
        .order(callbacks::id.asc())
        .select(Callback::as_select())
        .load(conn)?)
}

pub fn get_callback(conn: &mut SqliteConnection, id: i64) -> Result<Option<Callback>, LedgerError> {
    Ok(callbacks::table
        .find(id)
        .select(Callback::as_select())
        .first(conn)
        .optional()?)
}

/// Every registered callback with the name of its application
pub fn subscribers(conn: &mut SqliteConnection) -> Result<Vec<Subscriber>, LedgerError> {
    let rows: Vec<(String, Option<String>)> = callbacks::table
        .left_join(applications::table)
        .order(callbacks::id.asc())
        .select((callbacks::base, applications::name.nullable()))
        .load(conn)?;

    Ok(rows
        .into_iter()
        .map(|(base, owner)| Subscriber { base, owner })
        .collect())
}

// ============================================================================
// Write Operations
// ============================================================================

pub fn create_application(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<Application, LedgerError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LedgerError::InvalidInput("application name must not be empty".into()));
    }

    let now = current_timestamp();
    let app = diesel::insert_into(applications::table)
        .values(&NewApplication {
            name,
            created: &now,
        })
        .returning(Application::as_returning())
        .get_result(conn)
        .map_err(|e| unique_conflict(e, "application"))?;

    info!(app_id = app.id, name = %app.name, "Registered application");
    Ok(app)
}

pub fn create_callback(
    conn: &mut SqliteConnection,
    input: &CreateCallbackInput,
) -> Result<Callback, LedgerError> {
    validate_base(&input.base)?;
    if let Some(app_id) = input.app_id {
        if get_application(conn, app_id)?.is_none() {
            return Err(LedgerError::UnknownEntity {
                kind: APPLICATION,
                id: app_id,
            });
        }
    }

    let callback = diesel::insert_into(callbacks::table)
        .values(&NewCallback {
            base: input.base.trim(),
            app_id: input.app_id,
        })
        .returning(Callback::as_returning())
        .get_result(conn)?;

    info!(callback_id = callback.id, base = %callback.base, "Registered callback");
    Ok(callback)
}

pub fn delete_callback(conn: &mut SqliteConnection, id: i64) -> Result<Callback, LedgerError> {
    let callback = get_callback(conn, id)?.ok_or(LedgerError::UnknownEntity { kind: CALLBACK, id })?;
    diesel::delete(callbacks::table.find(id)).execute(conn)?;

    info!(callback_id = id, "Removed callback");
    Ok(callback)
}

/// Callback bases must be absolute http(s) URLs
fn validate_base(base: &str) -> Result<(), LedgerError> {
    let base = base.trim();
    let rest = base
        .strip_prefix("http://")
        .or_else(|| base.strip_prefix("https://"))
        .ok_or_else(|| LedgerError::InvalidInput(format!("callback base {:?} is not http(s)", base)))?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(LedgerError::InvalidInput(format!(
            "callback base {:?} has no host",
            base
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LedgerDb;

    #[test]
    fn test_register_and_list_subscribers() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.write(|conn| {
            let app = create_application(conn, "bot")?;
            create_callback(
                conn,
                &CreateCallbackInput {
                    base: "http://localhost:9000/hook/".into(),
                    app_id: Some(app.id),
                },
            )?;
            create_callback(
                conn,
                &CreateCallbackInput {
                    base: "https://example.org".into(),
                    app_id: None,
                },
            )?;

            let subs = subscribers(conn)?;
            assert_eq!(subs.len(), 2);
            assert_eq!(subs[0].owner.as_deref(), Some("bot"));
            assert_eq!(subs[1].owner, None);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_rejects_bad_bases() {
        assert!(validate_base("ftp://host").is_err());
        assert!(validate_base("http://").is_err());
        assert!(validate_base("localhost:80").is_err());
        assert!(validate_base(" https://host/x ").is_ok());
    }

    #[test]
    fn test_delete_unknown_callback() {
        let db = LedgerDb::open_in_memory().unwrap();
        let result = db.write(|conn| delete_callback(conn, 3));
        assert!(matches!(result, Err(LedgerError::UnknownEntity { kind: "callback", id: 3 })));
    }

    #[test]
    fn test_duplicate_application_conflicts() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.write(|conn| create_application(conn, "web")).unwrap();
        let again = db.write(|conn| create_application(conn, "web"));
        assert!(matches!(again, Err(LedgerError::Conflict(_))));
    }
}
