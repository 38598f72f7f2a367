//! Service layer for commonpot
//!
//! Services sit between HTTP handlers and repositories. Each mutation:
//! - evaluates the caller's precondition inside the write transaction
//! - performs the repository work atomically
//! - announces the committed change to callback subscribers
//! - returns the new state with its entity tag
//!
//! ## Architecture
//!
//! ```text
//! HTTP Handlers (thin)
//!     ↓
//! Service Layer (gate, orchestration, notifications)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod callback_service;
pub mod communism_service;
pub mod events;
pub mod ledger_service;
pub mod notifier;
pub mod refund_service;
pub mod response;
pub mod user_service;

// Re-exports
pub use callback_service::CallbackService;
pub use communism_service::CommunismService;
pub use events::{Action, EntityKind, LedgerEvent};
pub use ledger_service::{LedgerService, SplitRequest, TransactionInput};
pub use notifier::{Notifier, NotifierStats, NotifierWorker};
pub use refund_service::RefundService;
pub use response::*;
pub use user_service::UserService;

use std::sync::Arc;

use crate::consensus::Thresholds;
use crate::db::LedgerDb;
use crate::etag::Gate;

/// Dependencies shared by every service
#[derive(Clone)]
pub struct ServiceContext {
    pub db: Arc<LedgerDb>,
    pub gate: Arc<Gate>,
    pub notifier: Arc<Notifier>,
}

impl ServiceContext {
    /// Announce committed events; never fails the caller
    pub fn publish(&self, events: &[LedgerEvent]) {
        self.notifier.publish(&self.db, events);
    }
}

/// Service container for dependency injection
///
/// Pass this to HttpServer for handler access.
pub struct Services {
    pub users: Arc<UserService>,
    pub ledger: Arc<LedgerService>,
    pub communisms: Arc<CommunismService>,
    pub refunds: Arc<RefundService>,
    pub callbacks: Arc<CallbackService>,
    pub context: ServiceContext,
}

impl Services {
    /// Create all services over one database, gate and notifier
    pub fn new(
        db: Arc<LedgerDb>,
        gate: Arc<Gate>,
        notifier: Arc<Notifier>,
        thresholds: Thresholds,
    ) -> Self {
        let context = ServiceContext {
            db,
            gate,
            notifier,
        };

        Self {
            users: Arc::new(UserService::new(context.clone())),
            ledger: Arc::new(LedgerService::new(context.clone())),
            communisms: Arc::new(CommunismService::new(context.clone())),
            refunds: Arc::new(RefundService::new(context.clone(), thresholds)),
            callbacks: Arc::new(CallbackService::new(context.clone())),
            context,
        }
    }

    /// Delivery counters of the callback notifier
    pub fn notifier_stats(&self) -> NotifierStats {
        self.context.notifier.stats()
    }
}
