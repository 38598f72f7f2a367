//! Entity tags and the conditional-request gate
//!
//! Every entity exposed for mutation has an entity tag: a SHA-256 over the
//! entity kind, its full serialized representation and a random salt drawn
//! once per process. Tags are therefore stable for the lifetime of one
//! server run and unpredictable to clients.
//!
//! ## Rules
//!
//! | Access | `If-Match`          | Entity  | Outcome                |
//! |--------|---------------------|---------|------------------------|
//! | write  | missing             | any     | `PreconditionRequired` |
//! | any    | `*`                 | absent  | `PreconditionFailed`   |
//! | any    | `*`                 | present | proceed                |
//! | read   | matching tag        | present | `NotModified`          |
//! | read   | other tag / missing | any     | proceed                |
//! | write  | matching tag        | present | proceed                |
//! | write  | other tag           | any     | `PreconditionFailed`   |
//!
//! Writers call [`Gate::check`] inside the same immediate SQLite
//! transaction that performs the mutation, so of two writers holding the
//! same tag exactly one commits and the other observes a mismatch.

use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::LedgerError;

/// Opaque fingerprint of an entity's current state (stored unquoted)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct EntityTag(String);

impl EntityTag {
    /// Parse a single tag as sent by a client, tolerating quotes and a weak prefix
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix("W/").unwrap_or(trimmed);
        Self(trimmed.trim_matches('"').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Quoted form for the `ETag` response header
    pub fn header_value(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl std::fmt::Display for EntityTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.header_value())
    }
}

/// Conditional precondition supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Precondition {
    /// No `If-Match` header at all
    #[default]
    None,
    /// `If-Match: *`
    Any,
    /// `If-Match: "a", "b"`
    Matches(Vec<EntityTag>),
}

impl Precondition {
    /// Build from the raw `If-Match` header value
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Precondition::None,
            Some("*") => Precondition::Any,
            Some(list) => Precondition::Matches(
                list.split(',')
                    .map(EntityTag::parse)
                    .filter(|t| !t.as_str().is_empty())
                    .collect(),
            ),
        }
    }

    pub fn tag(tag: &EntityTag) -> Self {
        Precondition::Matches(vec![tag.clone()])
    }
}

/// Whether a request only reads or also mutates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// An entity together with its current tag
#[derive(Debug, Clone, Serialize)]
pub struct Tagged<T> {
    #[serde(flatten)]
    pub value: T,
    #[serde(skip)]
    pub etag: EntityTag,
}

impl<T> Tagged<T> {
    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Computes and validates entity tags
#[derive(Clone)]
pub struct Gate {
    salt: [u8; 32],
}

impl Gate {
    /// Create a gate with a fresh process-lifetime salt
    pub fn new() -> Self {
        let mut salt = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        Self { salt }
    }

    /// Create a gate with a fixed salt (tags are reproducible across instances)
    pub fn with_salt(salt: [u8; 32]) -> Self {
        Self { salt }
    }

    /// Compute the tag of an entity representation
    pub fn tag<T: Serialize>(&self, kind: &str, entity: &T) -> Result<EntityTag, LedgerError> {
        let body = serde_json::to_vec(entity)?;
        let mut hasher = Sha256::new();
        hasher.update(self.salt);
        hasher.update(kind.as_bytes());
        hasher.update([0u8]);
        hasher.update(&body);
        Ok(EntityTag(hex::encode(hasher.finalize())))
    }

    /// Attach the current tag to an entity
    pub fn tagged<T: Serialize>(&self, kind: &str, value: T) -> Result<Tagged<T>, LedgerError> {
        let etag = self.tag(kind, &value)?;
        Ok(Tagged { value, etag })
    }

    /// Evaluate a precondition against the current (pre-mutation) state
    ///
    /// Returns the current tag (`None` when the entity is absent) if the
    /// request may proceed.
    pub fn check<T: Serialize>(
        &self,
        access: Access,
        precondition: &Precondition,
        kind: &str,
        current: Option<&T>,
    ) -> Result<Option<EntityTag>, LedgerError> {
        let current_tag = current.map(|c| self.tag(kind, c)).transpose()?;

        let outcome = match precondition {
            Precondition::None => match access {
                Access::Read => Ok(current_tag),
                Access::Write => Err(LedgerError::PreconditionRequired),
            },
            Precondition::Any => match current_tag {
                Some(tag) => Ok(Some(tag)),
                None => Err(LedgerError::PreconditionFailed),
            },
            Precondition::Matches(tags) => {
                let matched = current_tag
                    .as_ref()
                    .filter(|current| tags.contains(current))
                    .cloned();
                match (access, matched) {
                    (Access::Read, Some(tag)) => Err(LedgerError::NotModified(tag)),
                    (Access::Read, None) => Ok(current_tag),
                    (Access::Write, Some(tag)) => Ok(Some(tag)),
                    (Access::Write, None) => Err(LedgerError::PreconditionFailed),
                }
            }
        };

        debug!(kind, ?access, ok = outcome.is_ok(), "Conditional request evaluated");
        outcome
    }

    /// Guard a write on the entity it depends on
    ///
    /// An absent entity is reported through `missing`, except under `*`
    /// where it is a failed precondition.
    pub fn guard_write<T, F>(
        &self,
        precondition: &Precondition,
        kind: &str,
        current: Option<&T>,
        missing: F,
    ) -> Result<EntityTag, LedgerError>
    where
        T: Serialize,
        F: FnOnce() -> LedgerError,
    {
        match (precondition, current) {
            (Precondition::None, _) => Err(LedgerError::PreconditionRequired),
            (Precondition::Matches(_), None) => Err(missing()),
            _ => self
                .check(Access::Write, precondition, kind, current)?
                .ok_or(LedgerError::PreconditionFailed),
        }
    }

    /// Serve a read; a matching `If-Match` yields `NotModified`
    pub fn read<T, F>(
        &self,
        precondition: &Precondition,
        kind: &str,
        current: Option<T>,
        missing: F,
    ) -> Result<Tagged<T>, LedgerError>
    where
        T: Serialize,
        F: FnOnce() -> LedgerError,
    {
        let value = match (precondition, current) {
            (_, Some(value)) => value,
            (Precondition::Any, None) => return Err(LedgerError::PreconditionFailed),
            (_, None) => return Err(missing()),
        };
        match self.check(Access::Read, precondition, kind, Some(&value))? {
            Some(etag) => Ok(Tagged { value, etag }),
            None => self.tagged(kind, value),
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Thing {
        id: i64,
        balance: i64,
    }

    fn thing(balance: i64) -> Thing {
        Thing { id: 1, balance }
    }

    #[test]
    fn test_tags_change_with_state_and_salt() {
        let gate = Gate::with_salt([7u8; 32]);
        let a = gate.tag("user", &thing(0)).unwrap();
        let b = gate.tag("user", &thing(5)).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, gate.tag("user", &thing(0)).unwrap());
        assert_ne!(a, gate.tag("refund", &thing(0)).unwrap());

        let other = Gate::with_salt([8u8; 32]);
        assert_ne!(a, other.tag("user", &thing(0)).unwrap());
    }

    #[test]
    fn test_write_without_precondition_is_rejected() {
        let gate = Gate::new();
        let result = gate.check(Access::Write, &Precondition::None, "user", Some(&thing(0)));
        assert!(matches!(result, Err(LedgerError::PreconditionRequired)));
    }

    #[test]
    fn test_wildcard_requires_existing_entity() {
        let gate = Gate::new();
        let absent: Option<&Thing> = None;
        assert!(matches!(
            gate.check(Access::Write, &Precondition::Any, "user", absent),
            Err(LedgerError::PreconditionFailed)
        ));
        assert!(gate
            .check(Access::Write, &Precondition::Any, "user", Some(&thing(0)))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_matching_tag_on_read_is_not_modified() {
        let gate = Gate::new();
        let tag = gate.tag("user", &thing(3)).unwrap();
        let result = gate.check(Access::Read, &Precondition::tag(&tag), "user", Some(&thing(3)));
        assert!(matches!(result, Err(LedgerError::NotModified(t)) if t == tag));
    }

    #[test]
    fn test_stale_tag_on_write_fails() {
        let gate = Gate::new();
        let stale = gate.tag("user", &thing(3)).unwrap();
        let result = gate.check(Access::Write, &Precondition::tag(&stale), "user", Some(&thing(4)));
        assert!(matches!(result, Err(LedgerError::PreconditionFailed)));

        let fresh = gate.tag("user", &thing(4)).unwrap();
        let ok = gate.check(Access::Write, &Precondition::tag(&fresh), "user", Some(&thing(4)));
        assert_eq!(ok.unwrap(), Some(fresh));
    }

    #[test]
    fn test_stale_tag_on_read_returns_body() {
        let gate = Gate::new();
        let stale = gate.tag("user", &thing(3)).unwrap();
        let current = gate
            .check(Access::Read, &Precondition::tag(&stale), "user", Some(&thing(9)))
            .unwrap();
        assert_ne!(current, Some(stale));
    }

    #[test]
    fn test_guard_write_reports_missing_entity() {
        let gate = Gate::new();
        let absent: Option<&Thing> = None;
        let tag = EntityTag::parse("abc");
        assert!(matches!(
            gate.guard_write(&Precondition::tag(&tag), "user", absent, || LedgerError::UnknownUser(1)),
            Err(LedgerError::UnknownUser(1))
        ));
        assert!(matches!(
            gate.guard_write(&Precondition::Any, "user", absent, || LedgerError::UnknownUser(1)),
            Err(LedgerError::PreconditionFailed)
        ));
        assert!(matches!(
            gate.guard_write(&Precondition::None, "user", absent, || LedgerError::UnknownUser(1)),
            Err(LedgerError::PreconditionRequired)
        ));
    }

    #[test]
    fn test_read_tags_entity() {
        let gate = Gate::new();
        let read = gate
            .read(&Precondition::None, "user", Some(thing(1)), || LedgerError::UnknownUser(1))
            .unwrap();
        assert_eq!(read.etag, gate.tag("user", &thing(1)).unwrap());

        let again = gate.read(&Precondition::tag(&read.etag), "user", Some(thing(1)), || {
            LedgerError::UnknownUser(1)
        });
        assert!(matches!(again, Err(LedgerError::NotModified(_))));
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(Precondition::from_header(None), Precondition::None);
        assert_eq!(Precondition::from_header(Some(" * ")), Precondition::Any);
        assert_eq!(
            Precondition::from_header(Some("\"abc\", W/\"def\"")),
            Precondition::Matches(vec![EntityTag::parse("abc"), EntityTag::parse("def")])
        );
        assert_eq!(EntityTag::parse("\"abc\"").header_value(), "\"abc\"");
    }
}
