//! Engine-wide and per-clan configuration.
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::constants::{
    DEFAULT_DAY_RESET_HOUR, DEFAULT_RETENTION_LAPS, DEFAULT_TIMEZONE_OFFSET_HOURS,
    SELECTION_TIMEOUT_SECS,
};

const DEFAULT_ENGINE_DATA: &str = include_str!("../data/engine.json");

/// Errors raised when engine configuration invariants are violated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineConfigError {
    #[error("timezone offset {hours}h is outside -12..=14")]
    TimezoneOffset { hours: i32 },
    #[error("day reset hour {hour} must be below 24")]
    ResetHour { hour: u32 },
    #[error("selection timeout must be at least one second")]
    SelectionTimeout,
}

/// Tunables shared by every clan in the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Laps of history kept behind the active lap when rolling over.
    #[serde(default = "EngineConfig::default_retention_laps")]
    pub retention_laps: u32,
    /// Offset of the battle's home timezone from UTC.
    #[serde(default = "EngineConfig::default_timezone_offset_hours")]
    pub timezone_offset_hours: i32,
    /// Local hour at which a new battle day starts.
    #[serde(default = "EngineConfig::default_day_reset_hour")]
    pub day_reset_hour: u32,
    #[serde(default = "EngineConfig::default_selection_timeout_secs")]
    pub selection_timeout_secs: u64,
}

impl EngineConfig {
    const fn default_retention_laps() -> u32 {
        DEFAULT_RETENTION_LAPS
    }

    const fn default_timezone_offset_hours() -> i32 {
        DEFAULT_TIMEZONE_OFFSET_HOURS
    }

    const fn default_day_reset_hour() -> u32 {
        DEFAULT_DAY_RESET_HOUR
    }

    const fn default_selection_timeout_secs() -> u64 {
        SELECTION_TIMEOUT_SECS
    }

    const fn fallback() -> Self {
        Self {
            retention_laps: Self::default_retention_laps(),
            timezone_offset_hours: Self::default_timezone_offset_hours(),
            day_reset_hour: Self::default_day_reset_hour(),
            selection_timeout_secs: Self::default_selection_timeout_secs(),
        }
    }

    /// Parse a configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed; validation failures are
    /// reported through [`EngineConfig::validate`].
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub const fn validate(&self) -> Result<(), EngineConfigError> {
        if self.timezone_offset_hours < -12 || self.timezone_offset_hours > 14 {
            return Err(EngineConfigError::TimezoneOffset {
                hours: self.timezone_offset_hours,
            });
        }
        if self.day_reset_hour >= 24 {
            return Err(EngineConfigError::ResetHour {
                hour: self.day_reset_hour,
            });
        }
        if self.selection_timeout_secs == 0 {
            return Err(EngineConfigError::SelectionTimeout);
        }
        Ok(())
    }

    #[must_use]
    pub const fn selection_timeout(&self) -> Duration {
        Duration::from_secs(self.selection_timeout_secs)
    }

    /// The battle day `now` falls in: local date of the home timezone, with
    /// the hours before the reset hour still counting as the previous day.
    #[must_use]
    pub fn battle_day(&self, now: DateTime<Utc>) -> NaiveDate {
        let offset = FixedOffset::east_opt(self.timezone_offset_hours.saturating_mul(3_600))
            .unwrap_or_else(|| Utc.fix());
        let local = now.with_timezone(&offset) - TimeDelta::hours(i64::from(self.day_reset_hour));
        local.date_naive()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        serde_json::from_str(DEFAULT_ENGINE_DATA).unwrap_or_else(|_| Self::fallback())
    }
}

/// Per-clan settings supplied at provisioning time.
///
/// The schedule map is opaque to the coordinator; hosts store survey URLs,
/// sheet ids and similar metadata there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ClanConfig {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub schedule: BTreeMap<String, String>,
}

impl ClanConfig {
    #[must_use]
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            schedule: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn embedded_defaults_parse() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg, EngineConfig::fallback());
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.selection_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn partial_documents_take_field_defaults() {
        let cfg = EngineConfig::from_json(r#"{ "retention_laps": 5 }"#).unwrap();
        assert_eq!(cfg.retention_laps, 5);
        assert_eq!(cfg.day_reset_hour, 5);
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        let mut cfg = EngineConfig::default();
        cfg.day_reset_hour = 24;
        assert_eq!(
            cfg.validate(),
            Err(EngineConfigError::ResetHour { hour: 24 })
        );
        cfg.day_reset_hour = 5;
        cfg.timezone_offset_hours = 20;
        assert!(matches!(
            cfg.validate(),
            Err(EngineConfigError::TimezoneOffset { hours: 20 })
        ));
    }

    #[test]
    fn battle_day_rolls_at_reset_hour_in_home_timezone() {
        let cfg = EngineConfig::default();
        // 19:59 UTC = 04:59 JST next day, still the previous battle day.
        let before = Utc.with_ymd_and_hms(2024, 3, 1, 19, 59, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap();
        assert_eq!(
            cfg.battle_day(before),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        assert_eq!(
            cfg.battle_day(after),
            NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()
        );
    }
}
