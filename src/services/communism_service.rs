//! Communism service - open, adjust and settle shared expenses

use crate::db::communisms::{self, CreateCommunismInput};
use crate::db::models::{Communism, CommunismDetail};
use crate::db::users;
use crate::error::LedgerError;
use crate::etag::{Precondition, Tagged};

use super::events::{EntityKind, LedgerEvent};
use super::ServiceContext;

const KIND: EntityKind = EntityKind::Communism;

fn unknown(id: i64) -> LedgerError {
    LedgerError::UnknownEntity {
        kind: "communism",
        id,
    }
}

pub struct CommunismService {
    ctx: ServiceContext,
}

impl CommunismService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub fn get(
        &self,
        precondition: &Precondition,
        id: i64,
    ) -> Result<Tagged<CommunismDetail>, LedgerError> {
        let detail = self
            .ctx
            .db
            .with_conn(|conn| communisms::get_communism(conn, id))?;
        self.ctx
            .gate
            .read(precondition, KIND.as_str(), detail, || unknown(id))
    }

    pub fn list(&self, active_only: bool) -> Result<Vec<Communism>, LedgerError> {
        self.ctx
            .db
            .with_conn(|conn| communisms::list_communisms(conn, active_only))
    }

    /// Open a communism, guarded on the creator
    pub fn create(
        &self,
        precondition: &Precondition,
        input: &CreateCommunismInput,
    ) -> Result<Tagged<CommunismDetail>, LedgerError> {
        let detail = self.ctx.db.write(|conn| {
            let creator = users::get_user(conn, input.creator_id)?;
            self.ctx.gate.guard_write(
                precondition,
                EntityKind::User.as_str(),
                creator.as_ref(),
                || LedgerError::UnknownUser(input.creator_id),
            )?;
            communisms::create_communism(conn, input)
        })?;

        self.ctx.publish(&[LedgerEvent::created(KIND, detail.id())]);
        self.ctx.gate.tagged(KIND.as_str(), detail)
    }

    pub fn set_participant(
        &self,
        precondition: &Precondition,
        id: i64,
        user_id: i64,
        quantity: i64,
    ) -> Result<Tagged<CommunismDetail>, LedgerError> {
        let detail = self.ctx.db.write(|conn| {
            self.guard(conn, precondition, id)?;
            communisms::set_participant(conn, id, user_id, quantity)
        })?;

        self.ctx.publish(&[LedgerEvent::updated(KIND, id)]);
        self.ctx.gate.tagged(KIND.as_str(), detail)
    }

    /// Settle: every participant pays the creator
    pub fn close(
        &self,
        precondition: &Precondition,
        id: i64,
    ) -> Result<Tagged<CommunismDetail>, LedgerError> {
        let (detail, multi) = self.ctx.db.write(|conn| {
            self.guard(conn, precondition, id)?;
            communisms::close_communism(conn, id)
        })?;

        let mut events = vec![
            LedgerEvent::updated(KIND, id),
            LedgerEvent::created(EntityKind::MultiTransaction, multi.id()),
        ];
        events.extend(
            multi
                .transactions
                .iter()
                .map(|t| LedgerEvent::created(EntityKind::Transaction, t.id)),
        );
        self.ctx.publish(&events);
        self.ctx.gate.tagged(KIND.as_str(), detail)
    }

    pub fn abort(
        &self,
        precondition: &Precondition,
        id: i64,
    ) -> Result<Tagged<CommunismDetail>, LedgerError> {
        let detail = self.ctx.db.write(|conn| {
            self.guard(conn, precondition, id)?;
            communisms::abort_communism(conn, id)
        })?;

        self.ctx.publish(&[LedgerEvent::updated(KIND, id)]);
        self.ctx.gate.tagged(KIND.as_str(), detail)
    }

    fn guard(
        &self,
        conn: &mut diesel::SqliteConnection,
        precondition: &Precondition,
        id: i64,
    ) -> Result<(), LedgerError> {
        let current = communisms::get_communism(conn, id)?;
        self.ctx
            .gate
            .guard_write(precondition, KIND.as_str(), current.as_ref(), || unknown(id))?;
        Ok(())
    }
}
