//! Commonpot - a shared-expense ledger
//!
//! Users owe or are owed money; transactions move integer cent amounts
//! between accounts. Groups split a cost ("communism") or ask the community
//! pool for reimbursement ("refund"), which peers approve by ballot.
//!
//! ## Architecture
//!
//! - **Ledger store** (`db`): SQLite via Diesel; invariants as constraints
//! - **Fair-split engine** (`split`): pure planning of multi-party transfers
//! - **Consensus engine** (`consensus`): refund ballot decisions
//! - **Concurrency gate** (`etag`): entity tags and conditional writes
//! - **Notification dispatcher** (`services::notifier`): callback delivery
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/commonpot/
//! ├── ledger.db              # SQLite database (WAL mode)
//! └── config.toml            # Configuration
//! ```

pub mod config;
pub mod consensus;
pub mod db;
pub mod error;
pub mod etag;
pub mod http;
pub mod money;
pub mod services;
pub mod split;

pub use config::{Config, NotifierConfig};
pub use consensus::{Outcome, Thresholds, VoteChoice};
pub use db::LedgerDb;
pub use error::LedgerError;
pub use etag::{Access, EntityTag, Gate, Precondition, Tagged};
pub use http::HttpServer;
pub use money::Cents;
pub use services::{Notifier, NotifierWorker, Services};
pub use split::{Direction, Indicator, Share, Sizing, SplitPlan};
