//! Entities owned by a clan: players, boss progress, attack records,
//! reservations, carry-over credits and the single-slot undo entry.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

use crate::calc::carry_over_seconds;
use crate::constants::{DAILY_ATTACKS, MAX_CARRY_OVERS};

/// Identifier of a managed group (the chat category the clan lives in).
pub type GroupId = u64;

/// Identifier of a member on the chat platform.
pub type UserId = u64;

/// Synthetic identity for attack records, reservations and credits.
///
/// Drawn from a per-clan monotonic sequence so two records created within
/// the same clock tick never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackKind {
    Physical,
    Magic,
    CarryOver,
}

impl AttackKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Physical => "physical",
            Self::Magic => "magic",
            Self::CarryOver => "carry_over",
        }
    }

    #[must_use]
    pub const fn is_carry_over(self) -> bool {
        matches!(self, Self::CarryOver)
    }
}

impl fmt::Display for AttackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttackKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "physical" | "physics" | "p" => Ok(Self::Physical),
            "magic" | "m" => Ok(Self::Magic),
            "carry_over" | "carry-over" | "carryover" | "co" => Ok(Self::CarryOver),
            _ => Err(()),
        }
    }
}

/// A banked extra turn earned by a final blow or by over-damage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarryOverCredit {
    pub id: RecordId,
    pub kind: AttackKind,
    pub source_slot: usize,
    /// Explicitly registered duration; zero means unset.
    #[serde(default)]
    pub seconds: u32,
    pub created_at: DateTime<Utc>,
    /// Boss hp left when the credit was issued.
    #[serde(default)]
    pub issued_remaining_hp: u64,
    /// Damage of the attack that issued the credit.
    #[serde(default)]
    pub issued_damage: u64,
}

impl CarryOverCredit {
    /// Duration the credit is worth: the registered value, or the standard
    /// carry-over rule applied to the issuing attack.
    #[must_use]
    pub fn resolved_seconds(&self) -> u32 {
        if self.seconds > 0 {
            return self.seconds;
        }
        carry_over_seconds(self.issued_remaining_hp, self.issued_damage)
            .or_else(|| carry_over_seconds(self.issued_damage, self.issued_damage))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn label(&self) -> String {
        let seconds = if self.seconds > 0 {
            format!("{}s", self.seconds)
        } else {
            String::from("unset")
        };
        format!(
            "{} from boss {} ({seconds})",
            self.kind,
            self.source_slot + 1
        )
    }
}

pub type CreditList = SmallVec<[CarryOverCredit; MAX_CARRY_OVERS]>;

/// Player fields captured before an attack so it can be reversed exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub physics_attacks: u8,
    pub magic_attacks: u8,
    pub task_kill: bool,
    pub carry_overs: CreditList,
}

/// One-step history entry; overwritten by every new declare or attack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
    Declare {
        lap: u32,
        slot: usize,
        record: RecordId,
    },
    Attack {
        lap: u32,
        slot: usize,
        record: RecordId,
        snapshot: PlayerSnapshot,
        /// Damage the record carried before the attack overwrote it.
        #[serde(default)]
        prior_damage: Option<u64>,
    },
    LastAttack {
        lap: u32,
        slot: usize,
        record: RecordId,
        snapshot: PlayerSnapshot,
        was_defeated: bool,
        #[serde(default)]
        prior_damage: Option<u64>,
    },
}

impl LogEntry {
    #[must_use]
    pub const fn lap(&self) -> u32 {
        match self {
            Self::Declare { lap, .. } | Self::Attack { lap, .. } | Self::LastAttack { lap, .. } => {
                *lap
            }
        }
    }

    #[must_use]
    pub const fn slot(&self) -> usize {
        match self {
            Self::Declare { slot, .. }
            | Self::Attack { slot, .. }
            | Self::LastAttack { slot, .. } => *slot,
        }
    }

    #[must_use]
    pub const fn record(&self) -> RecordId {
        match self {
            Self::Declare { record, .. }
            | Self::Attack { record, .. }
            | Self::LastAttack { record, .. } => *record,
        }
    }

    #[must_use]
    pub const fn describe(&self) -> &'static str {
        match self {
            Self::Declare { .. } => "declare",
            Self::Attack { .. } => "attack",
            Self::LastAttack { .. } => "last attack",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub user_id: UserId,
    #[serde(default)]
    pub physics_attacks: u8,
    #[serde(default)]
    pub magic_attacks: u8,
    #[serde(default)]
    pub task_kill: bool,
    #[serde(default)]
    pub carry_overs: CreditList,
    #[serde(default)]
    pub undo_entry: Option<LogEntry>,
    /// Free-form availability text imported from the clan's schedule sheet.
    #[serde(default)]
    pub limit_time_text: Option<String>,
}

impl Player {
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            physics_attacks: 0,
            magic_attacks: 0,
            task_kill: false,
            carry_overs: CreditList::new(),
            undo_entry: None,
            limit_time_text: None,
        }
    }

    #[must_use]
    pub const fn attacks_used(&self) -> u8 {
        self.physics_attacks.saturating_add(self.magic_attacks)
    }

    #[must_use]
    pub const fn remaining_attacks(&self) -> u8 {
        DAILY_ATTACKS.saturating_sub(self.attacks_used())
    }

    #[must_use]
    pub const fn attacks_exhausted(&self) -> bool {
        self.attacks_used() >= DAILY_ATTACKS
    }

    #[must_use]
    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            physics_attacks: self.physics_attacks,
            magic_attacks: self.magic_attacks,
            task_kill: self.task_kill,
            carry_overs: self.carry_overs.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: &PlayerSnapshot) {
        self.physics_attacks = snapshot.physics_attacks;
        self.magic_attacks = snapshot.magic_attacks;
        self.task_kill = snapshot.task_kill;
        self.carry_overs = snapshot.carry_overs.clone();
    }

    /// Bank a credit unless the player already holds the maximum.
    ///
    /// Returns whether the credit was kept.
    pub fn push_credit(&mut self, credit: CarryOverCredit) -> bool {
        if self.carry_overs.len() >= MAX_CARRY_OVERS {
            return false;
        }
        self.carry_overs.push(credit);
        true
    }

    /// Count a completed physical or magic attack.
    pub fn record_attack(&mut self, kind: AttackKind) {
        match kind {
            AttackKind::Physical => self.physics_attacks += 1,
            AttackKind::Magic => self.magic_attacks += 1,
            AttackKind::CarryOver => {}
        }
    }

    /// Clear everything that belongs to a single battle day.
    pub fn reset_day(&mut self) {
        self.physics_attacks = 0;
        self.magic_attacks = 0;
        self.task_kill = false;
        self.carry_overs.clear();
        self.undo_entry = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackRecord {
    pub id: RecordId,
    pub user_id: UserId,
    pub kind: AttackKind,
    pub damage: u64,
    #[serde(default)]
    pub note: String,
    pub declared_at: DateTime<Utc>,
    #[serde(default)]
    pub completed: bool,
}

impl AttackRecord {
    #[must_use]
    pub const fn is_pending_for(&self, user_id: UserId) -> bool {
        self.user_id == user_id && !self.completed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BossProgress {
    pub lap: u32,
    pub slot: usize,
    pub max_hp: u64,
    #[serde(default)]
    pub defeated: bool,
    #[serde(default)]
    pub attacks: Vec<AttackRecord>,
}

impl BossProgress {
    #[must_use]
    pub const fn new(lap: u32, slot: usize, max_hp: u64) -> Self {
        Self {
            lap,
            slot,
            max_hp,
            defeated: false,
            attacks: Vec::new(),
        }
    }

    /// Hit points left after every completed attack; zero once defeated.
    #[must_use]
    pub fn remaining_hp(&self) -> u64 {
        if self.defeated {
            return 0;
        }
        let dealt: u64 = self
            .attacks
            .iter()
            .filter(|record| record.completed)
            .map(|record| record.damage)
            .sum();
        self.max_hp.saturating_sub(dealt)
    }

    #[must_use]
    pub fn pending_index(&self, user_id: UserId) -> Option<usize> {
        self.attacks
            .iter()
            .position(|record| record.is_pending_for(user_id))
    }

    #[must_use]
    pub fn pending_for(&self, user_id: UserId) -> Option<&AttackRecord> {
        self.attacks
            .iter()
            .find(|record| record.is_pending_for(user_id))
    }

    #[must_use]
    pub fn record(&self, id: RecordId) -> Option<&AttackRecord> {
        self.attacks.iter().find(|record| record.id == id)
    }

    pub fn record_mut(&mut self, id: RecordId) -> Option<&mut AttackRecord> {
        self.attacks.iter_mut().find(|record| record.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub id: RecordId,
    pub user_id: UserId,
    pub slot: usize,
    pub kind: AttackKind,
    #[serde(default)]
    pub damage: u64,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub carry_over: bool,
    pub created_at: DateTime<Utc>,
}

impl ReservationRecord {
    #[must_use]
    pub fn label(&self) -> String {
        let carry = if self.carry_over { " (carry-over)" } else { "" };
        if self.note.is_empty() {
            format!("{}{carry} {} dmg", self.kind, self.damage)
        } else {
            format!("{}{carry} {} dmg {}", self.kind, self.damage, self.note)
        }
    }

    /// Whether this reservation is the one an attack of `kind` fulfils.
    ///
    /// Normal reservations need the same player and kind. A reservation
    /// flagged carry-over (for example a physical booking switched with
    /// `configure`) ignores its booked kind and matches any carry-over attack.
    #[must_use]
    pub fn matches_attack(&self, user_id: UserId, kind: AttackKind) -> bool {
        self.user_id == user_id
            && self.carry_over == kind.is_carry_over()
            && (self.carry_over || self.kind == kind)
    }
}
