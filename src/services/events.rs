//! Ledger change events
//!
//! Each committed mutation produces one or more events. Subscribers are told
//! about them as callback paths: `refresh` first, then `<action>/<kind>/<id>`
//! for every event.

use std::fmt;

/// What happened to an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

/// Entity kinds; also the namespace of entity tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Transaction,
    MultiTransaction,
    Communism,
    Refund,
    Ballot,
    Vote,
    Application,
    Callback,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Transaction => "transaction",
            EntityKind::MultiTransaction => "multitransaction",
            EntityKind::Communism => "communism",
            EntityKind::Refund => "refund",
            EntityKind::Ballot => "ballot",
            EntityKind::Vote => "vote",
            EntityKind::Application => "application",
            EntityKind::Callback => "callback",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single committed change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEvent {
    pub action: Action,
    pub kind: EntityKind,
    pub id: i64,
}

impl LedgerEvent {
    pub fn created(kind: EntityKind, id: i64) -> Self {
        Self {
            action: Action::Create,
            kind,
            id,
        }
    }

    pub fn updated(kind: EntityKind, id: i64) -> Self {
        Self {
            action: Action::Update,
            kind,
            id,
        }
    }

    pub fn deleted(kind: EntityKind, id: i64) -> Self {
        Self {
            action: Action::Delete,
            kind,
            id,
        }
    }

    /// Callback path for this event, relative to a subscriber's base
    pub fn path(&self) -> String {
        format!("{}/{}/{}", self.action.as_str(), self.kind, self.id)
    }
}

/// Paths announced for a batch of events, `refresh` first
pub fn paths(events: &[LedgerEvent]) -> Vec<String> {
    std::iter::once("refresh".to_string())
        .chain(events.iter().map(LedgerEvent::path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let events = [
            LedgerEvent::created(EntityKind::MultiTransaction, 4),
            LedgerEvent::updated(EntityKind::Refund, 2),
        ];
        assert_eq!(
            paths(&events),
            vec!["refresh", "create/multitransaction/4", "update/refund/2"]
        );
        assert_eq!(paths(&[]), vec!["refresh"]);
    }
}
