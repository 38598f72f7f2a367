//! User service - accounts, the community user and balance checks

use crate::db::models::User;
use crate::db::users::{self, CreateUserInput, UpdateUserInput};
use crate::error::LedgerError;
use crate::etag::{Precondition, Tagged};

use super::events::{EntityKind, LedgerEvent};
use super::ServiceContext;

const KIND: EntityKind = EntityKind::User;

pub struct UserService {
    ctx: ServiceContext,
}

impl UserService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get(&self, precondition: &Precondition, id: i64) -> Result<Tagged<User>, LedgerError> {
        let user = self.ctx.db.with_conn(|conn| users::get_user(conn, id))?;
        self.ctx
            .gate
            .read(precondition, KIND.as_str(), user, || LedgerError::UnknownUser(id))
    }

    pub fn list(&self) -> Result<Vec<User>, LedgerError> {
        self.ctx.db.with_conn(users::list_users)
    }

    pub fn community(&self, precondition: &Precondition) -> Result<Tagged<User>, LedgerError> {
        let user = self.ctx.db.with_conn(users::community_user)?;
        self.ctx
            .gate
            .read(precondition, KIND.as_str(), user, || LedgerError::MissingCommunityUser)
    }

    /// Sum of all balances; anything but zero means the ledger is corrupt
    pub fn total_balance(&self) -> Result<i64, LedgerError> {
        self.ctx.db.with_conn(users::total_balance)
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Create a regular user; new users have no prior state to guard
    pub fn create(&self, input: &CreateUserInput) -> Result<Tagged<User>, LedgerError> {
        let user = self.ctx.db.write(|conn| users::create_user(conn, input))?;
        self.ctx.publish(&[LedgerEvent::created(KIND, user.id)]);
        self.ctx.gate.tagged(KIND.as_str(), user)
    }

    /// Create the community user if it does not exist yet
    pub fn ensure_community(&self, name: &str) -> Result<User, LedgerError> {
        self.ctx
            .db
            .write(|conn| users::ensure_community_user(conn, name))
    }

    pub fn update(
        &self,
        precondition: &Precondition,
        id: i64,
        input: &UpdateUserInput,
    ) -> Result<Tagged<User>, LedgerError> {
        let user = self.ctx.db.write(|conn| {
            let current = users::get_user(conn, id)?;
            self.ctx
                .gate
                .guard_write(precondition, KIND.as_str(), current.as_ref(), || {
                    LedgerError::UnknownUser(id)
                })?;
            users::update_user(conn, id, input)
        })?;

        self.ctx.publish(&[LedgerEvent::updated(KIND, user.id)]);
        self.ctx.gate.tagged(KIND.as_str(), user)
    }
}
