//! Fair-split planning
//!
//! Turns "one party, many counterparties, a per-unit or total amount" into
//! the list of individual transfers that make up one multi transaction.
//! Planning is pure; [`crate::db::transactions::apply_split`] commits a plan
//! atomically.
//!
//! Normalization, shared by all four variants:
//!
//! 1. reject negative quantities
//! 2. merge duplicate counterparties (first occurrence keeps its position)
//! 3. drop the "one" party itself
//! 4. by base: nothing left is an empty settlement; by total: `NoRecipients`
//! 5. by total: `base = ceil(total / sum(quantity))`
//! 6. every counterparty with `base * quantity > 0` gets one transfer

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LedgerError;
use crate::money::Cents;

/// Which side the single party is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// The single party pays every counterparty
    OneToMany,
    /// Every counterparty pays the single party
    ManyToOne,
}

/// How the per-unit amount is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sizing {
    /// Explicit per-unit amount
    Base(Cents),
    /// Target total; the per-unit amount is rounded up from it
    Total(Cents),
}

/// One counterparty entry as supplied by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub user_id: i64,
    pub quantity: i64,
}

impl Share {
    pub fn new(user_id: i64, quantity: i64) -> Self {
        Self { user_id, quantity }
    }
}

/// A single transfer of a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTransfer {
    pub sender_id: i64,
    pub receiver_id: i64,
    pub amount: i64,
    pub reason: String,
}

/// The result of planning a split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlan {
    pub one: i64,
    pub direction: Direction,
    pub base_amount: i64,
    pub transfers: Vec<PlannedTransfer>,
}

impl SplitPlan {
    /// Sum of all planned transfers
    pub fn total(&self) -> i64 {
        self.transfers.iter().map(|t| t.amount).sum()
    }

    /// Ids of every user touched by this plan, the single party first
    pub fn participants(&self) -> Vec<i64> {
        let mut ids = vec![self.one];
        for t in &self.transfers {
            let other = match self.direction {
                Direction::OneToMany => t.receiver_id,
                Direction::ManyToOne => t.sender_id,
            };
            if !ids.contains(&other) {
                ids.push(other);
            }
        }
        ids
    }
}

/// A reason template with `{reason}` and `{n}` placeholders
///
/// `{{` and `}}` produce literal braces; any other placeholder is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indicator(String);

impl Indicator {
    pub fn parse(template: &str) -> Result<Self, LedgerError> {
        // Render once so broken templates fail before anything is planned
        render(template, "", 0)?;
        Ok(Self(template.to_string()))
    }

    pub fn render(&self, reason: &str, n: usize) -> String {
        render(&self.0, reason, n).unwrap_or_else(|_| reason.to_string())
    }
}

fn render(template: &str, reason: &str, n: usize) -> Result<String, LedgerError> {
    let mut out = String::with_capacity(template.len() + reason.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(k) => key.push(k),
                        None => {
                            return Err(LedgerError::InvalidIndicator(format!(
                                "unterminated placeholder in {:?}",
                                template
                            )))
                        }
                    }
                }
                match key.as_str() {
                    "reason" => out.push_str(reason),
                    "n" => out.push_str(&n.to_string()),
                    other => {
                        return Err(LedgerError::InvalidIndicator(format!(
                            "unknown placeholder {{{}}}",
                            other
                        )))
                    }
                }
            }
            '}' => {
                return Err(LedgerError::InvalidIndicator(format!(
                    "unmatched '}}' in {:?}",
                    template
                )))
            }
            other => out.push(other),
        }
    }

    Ok(out)
}

/// Smallest per-unit amount whose multiple by `units` covers `total`
///
/// `None` when there are no units to spread the total over.
pub fn base_for_total(total: Cents, units: i64) -> Option<i64> {
    if units <= 0 {
        return None;
    }
    let total = total.get();
    Some(total / units + i64::from(total % units != 0))
}

/// Plan a split between `one` and `counterparties`
pub fn plan(
    one: i64,
    counterparties: &[Share],
    sizing: Sizing,
    direction: Direction,
    reason: &str,
    indicator: Option<&Indicator>,
) -> Result<SplitPlan, LedgerError> {
    if let Some(bad) = counterparties.iter().find(|s| s.quantity < 0) {
        return Err(LedgerError::InvalidQuantity {
            user_id: bad.user_id,
            quantity: bad.quantity,
        });
    }

    let mut merged: Vec<Share> = Vec::with_capacity(counterparties.len());
    for share in counterparties {
        match merged.iter_mut().find(|m| m.user_id == share.user_id) {
            Some(existing) => {
                existing.quantity = existing.quantity.checked_add(share.quantity).ok_or(
                    LedgerError::InvalidQuantity {
                        user_id: share.user_id,
                        quantity: share.quantity,
                    },
                )?;
            }
            None => merged.push(*share),
        }
    }
    merged.retain(|s| s.user_id != one);

    let base_amount = match sizing {
        Sizing::Base(base) => base.get(),
        Sizing::Total(total) => {
            let units = merged
                .iter()
                .try_fold(0i64, |acc, s| acc.checked_add(s.quantity))
                .ok_or_else(|| LedgerError::InvalidAmount("sum of quantities overflows".into()))?;
            if merged.is_empty() {
                return Err(LedgerError::NoRecipients);
            }
            base_for_total(total, units).ok_or(LedgerError::NoRecipients)?
        }
    };

    let mut transfers = Vec::with_capacity(merged.len());
    for (index, share) in merged.iter().enumerate() {
        let amount = base_amount.checked_mul(share.quantity).ok_or_else(|| {
            LedgerError::InvalidAmount(format!(
                "{} x {} overflows",
                base_amount, share.quantity
            ))
        })?;
        if amount == 0 {
            continue;
        }

        let reason = match indicator {
            Some(ind) => ind.render(reason, index + 1),
            None => reason.to_string(),
        };
        let (sender_id, receiver_id) = match direction {
            Direction::OneToMany => (one, share.user_id),
            Direction::ManyToOne => (share.user_id, one),
        };
        transfers.push(PlannedTransfer {
            sender_id,
            receiver_id,
            amount,
            reason,
        });
    }

    debug!(
        one,
        ?direction,
        base_amount,
        transfers = transfers.len(),
        "Planned split"
    );

    Ok(SplitPlan {
        one,
        direction,
        base_amount,
        transfers,
    })
}
