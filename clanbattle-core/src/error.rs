use thiserror::Error;

use crate::model::{GroupId, UserId};

/// Errors raised when a coordination request cannot be applied.
///
/// Every variant is recoverable: the clan state is left exactly as it was
/// before the request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClanError {
    #[error("player {user_id} holds no carry-over credit")]
    InvalidCredit { user_id: UserId },
    #[error("player {user_id} has no pending attack on lap {lap} boss {slot}")]
    NotDeclared { user_id: UserId, lap: u32, slot: usize },
    #[error("player {user_id} already declared on lap {lap} boss {slot}")]
    AlreadyDeclared { user_id: UserId, lap: u32, slot: usize },
    #[error("player {user_id} has no attacks left today")]
    AttacksExhausted { user_id: UserId },
    #[error("lap {lap} boss {slot} is already defeated")]
    AlreadyDefeated { lap: u32, slot: usize },
    #[error("the selected carry-over credit is no longer available")]
    NoCreditAvailable { user_id: UserId },
    #[error("{prompt} ({} candidates)", candidates.len())]
    AmbiguousSelection {
        prompt: String,
        candidates: Vec<String>,
    },
    #[error("selection was cancelled or timed out")]
    SelectionCancelled,
    #[error("selection index {index} is out of range (0..{len})")]
    InvalidSelection { index: usize, len: usize },
    #[error("player {user_id} holds no reservation on boss {slot}")]
    NoReservation { user_id: UserId, slot: usize },
    #[error("player {user_id} is not managed by group {group_id}")]
    UnknownPlayer { group_id: GroupId, user_id: UserId },
    #[error("group {group_id} is not provisioned")]
    UnknownGroup { group_id: GroupId },
    #[error("group {group_id} is already provisioned")]
    AlreadyProvisioned { group_id: GroupId },
    #[error("lap {lap} has not been initialised")]
    UnknownLap { lap: u32 },
    #[error("boss slot {slot} is out of range")]
    InvalidSlot { slot: usize },
    #[error("hp override rejected: tier {tier}, slot {slot}, value {value}")]
    InvalidHp { tier: usize, slot: usize, value: u64 },
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl ClanError {
    /// Whether the caller can resolve the error by prompting for a choice.
    #[must_use]
    pub const fn needs_selection(&self) -> bool {
        matches!(self, Self::AmbiguousSelection { .. })
    }
}
