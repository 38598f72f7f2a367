//! Ballot decision rules
//!
//! A ballot is `Open` until it is closed exactly once, either by abort
//! (result forced to 0, no settlement) or by resolution against the
//! configured thresholds. The database layer applies these decisions; this
//! module only decides.

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// A single vote value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum VoteChoice {
    Disapprove,
    Abstain,
    Approve,
}

impl VoteChoice {
    pub fn value(self) -> i64 {
        match self {
            VoteChoice::Disapprove => -1,
            VoteChoice::Abstain => 0,
            VoteChoice::Approve => 1,
        }
    }
}

impl TryFrom<i64> for VoteChoice {
    type Error = LedgerError;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            -1 => Ok(VoteChoice::Disapprove),
            0 => Ok(VoteChoice::Abstain),
            1 => Ok(VoteChoice::Approve),
            other => Err(LedgerError::InvalidVote(other)),
        }
    }
}

impl From<VoteChoice> for i64 {
    fn from(v: VoteChoice) -> i64 {
        v.value()
    }
}

/// Vote sums needed to accept or reject a refund
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_threshold")]
    pub min_approves: i64,
    #[serde(default = "default_threshold")]
    pub min_disapproves: i64,
}

fn default_threshold() -> i64 {
    2
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_approves: default_threshold(),
            min_disapproves: default_threshold(),
        }
    }
}

impl Thresholds {
    pub fn new(min_approves: i64, min_disapproves: i64) -> Result<Self, LedgerError> {
        let t = Self {
            min_approves,
            min_disapproves,
        };
        t.validate()?;
        Ok(t)
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.min_approves < 1 || self.min_disapproves < 1 {
            return Err(LedgerError::Config(format!(
                "thresholds must be positive (approves {}, disapproves {})",
                self.min_approves, self.min_disapproves
            )));
        }
        Ok(())
    }
}

/// Result of tallying an open ballot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Enough approvals: settle and close with `result = sum`
    Accepted { sum: i64 },
    /// Enough disapprovals: close with `result = sum`, no settlement
    Rejected { sum: i64 },
    /// Neither threshold reached: stays open
    Undecided { sum: i64 },
}

impl Outcome {
    pub fn sum(&self) -> i64 {
        match *self {
            Outcome::Accepted { sum } | Outcome::Rejected { sum } | Outcome::Undecided { sum } => {
                sum
            }
        }
    }
}

/// Tally votes against the thresholds
pub fn decide<I>(votes: I, thresholds: Thresholds) -> Outcome
where
    I: IntoIterator<Item = i64>,
{
    let sum: i64 = votes.into_iter().sum();
    if sum >= thresholds.min_approves {
        Outcome::Accepted { sum }
    } else if -sum >= thresholds.min_disapproves {
        Outcome::Rejected { sum }
    } else {
        Outcome::Undecided { sum }
    }
}
