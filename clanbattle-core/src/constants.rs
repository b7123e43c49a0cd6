//! Centralized rule constants for clan battle coordination.
//!
//! These values define the fixed shape of a clan battle day. Tunable
//! behaviour (retention, timezone, prompt timeout) lives in
//! [`crate::config::EngineConfig`] instead.

/// Number of boss positions in a lap.
pub const BOSS_SLOTS: usize = 5;

/// Physical plus magic attacks a member may complete per day.
pub const DAILY_ATTACKS: u8 = 3;

/// Maximum number of banked carry-over credits per member.
pub const MAX_CARRY_OVERS: usize = 3;

/// Laps start counting at one.
pub const FIRST_LAP: u32 = 1;

/// Seconds an interactive disambiguation prompt waits before giving up.
pub const SELECTION_TIMEOUT_SECS: u64 = 60;

// Carry-over duration -----------------------------------------------------
pub const CARRY_OVER_MAX_SECS: u32 = 90;
pub(crate) const CARRY_OVER_BATTLE_SECS: u32 = 90;
pub(crate) const CARRY_OVER_BONUS_SECS: u32 = 20;

// Day boundary --------------------------------------------------------------
pub(crate) const DEFAULT_TIMEZONE_OFFSET_HOURS: i32 = 9;
pub(crate) const DEFAULT_DAY_RESET_HOUR: u32 = 5;
pub(crate) const DEFAULT_RETENTION_LAPS: u32 = 2;
