//! Callback service - client applications and their notification targets

use crate::db::callbacks::{self, CreateCallbackInput};
use crate::db::models::{Application, Callback};
use crate::error::LedgerError;
use crate::etag::{Precondition, Tagged};

use super::events::{EntityKind, LedgerEvent};
use super::ServiceContext;

const KIND: EntityKind = EntityKind::Callback;

pub struct CallbackService {
    ctx: ServiceContext,
}

impl CallbackService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub fn list_applications(&self) -> Result<Vec<Application>, LedgerError> {
        self.ctx.db.with_conn(callbacks::list_applications)
    }

    pub fn list(&self) -> Result<Vec<Callback>, LedgerError> {
        self.ctx.db.with_conn(callbacks::list_callbacks)
    }

    pub fn get(&self, precondition: &Precondition, id: i64) -> Result<Tagged<Callback>, LedgerError> {
        let callback = self.ctx.db.with_conn(|conn| callbacks::get_callback(conn, id))?;
        self.ctx.gate.read(precondition, KIND.as_str(), callback, || {
            LedgerError::UnknownEntity {
                kind: "callback",
                id,
            }
        })
    }

    pub fn create_application(&self, name: &str) -> Result<Tagged<Application>, LedgerError> {
        let app = self
            .ctx
            .db
            .write(|conn| callbacks::create_application(conn, name))?;
        self.ctx
            .publish(&[LedgerEvent::created(EntityKind::Application, app.id)]);
        self.ctx.gate.tagged(EntityKind::Application.as_str(), app)
    }

    /// Register a callback; it is notified about its own creation
    pub fn create(&self, input: &CreateCallbackInput) -> Result<Tagged<Callback>, LedgerError> {
        let callback = self
            .ctx
            .db
            .write(|conn| callbacks::create_callback(conn, input))?;
        self.ctx.publish(&[LedgerEvent::created(KIND, callback.id)]);
        self.ctx.gate.tagged(KIND.as_str(), callback)
    }

    pub fn delete(&self, precondition: &Precondition, id: i64) -> Result<Tagged<Callback>, LedgerError> {
        let callback = self.ctx.db.write(|conn| {
            let current = callbacks::get_callback(conn, id)?;
            self.ctx
                .gate
                .guard_write(precondition, KIND.as_str(), current.as_ref(), || {
                    LedgerError::UnknownEntity {
                        kind: "callback",
                        id,
                    }
                })?;
            callbacks::delete_callback(conn, id)
        })?;

        self.ctx.publish(&[LedgerEvent::deleted(KIND, id)]);
        self.ctx.gate.tagged(KIND.as_str(), callback)
    }
}
