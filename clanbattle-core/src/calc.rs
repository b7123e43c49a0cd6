//! Pure helpers for carry-over timing and free-text damage reports.
use regex::Regex;
use std::sync::OnceLock;

use crate::constants::{CARRY_OVER_BATTLE_SECS, CARRY_OVER_BONUS_SECS, CARRY_OVER_MAX_SECS};

fn damage_report_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\s*(\d[\d,]*)\s*(?:万)?(?:\s+(.*?))?\s*$").ok())
        .as_ref()
}

fn hp_expression_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\d+(?:-\d+)*$").ok())
        .as_ref()
}

/// Carry-over seconds granted when `damage` finishes a boss with `remaining_hp` left.
///
/// Returns `None` when the damage would not have finished the boss.
#[must_use]
pub fn carry_over_seconds(remaining_hp: u64, damage: u64) -> Option<u32> {
    if damage == 0 || damage < remaining_hp {
        return None;
    }
    if remaining_hp == 0 {
        return Some(CARRY_OVER_MAX_SECS);
    }
    // ceil(110 - 90 * hp / damage) == 110 - floor(90 * hp / damage)
    let spent = u128::from(CARRY_OVER_BATTLE_SECS) * u128::from(remaining_hp) / u128::from(damage);
    let seconds = u128::from(CARRY_OVER_BATTLE_SECS + CARRY_OVER_BONUS_SECS).saturating_sub(spent);
    Some(u32::try_from(seconds).map_or(CARRY_OVER_MAX_SECS, |s| s.min(CARRY_OVER_MAX_SECS)))
}

/// Parse a damage report such as `"600 60s討伐"` into `(600, "60s討伐")`.
///
/// Thousands separators and a trailing `万` unit are accepted.
#[must_use]
pub fn parse_damage_report(text: &str) -> Option<(u64, String)> {
    let caps = damage_report_pattern()?.captures(text)?;
    let digits: String = caps.get(1)?.as_str().chars().filter(char::is_ascii_digit).collect();
    let damage = digits.parse().ok()?;
    let note = caps
        .get(2)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    Some((damage, note))
}

/// Evaluate a remaining-hp expression such as `"1000-500"`.
///
/// Whitespace (including full-width spaces) and long-vowel marks are ignored.
/// Results below zero are reported as negative values so callers can tell an
/// already-defeated boss apart from a malformed expression.
#[must_use]
pub fn parse_hp_expression(text: &str) -> Option<i64> {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != 'ー')
        .collect();
    if !hp_expression_pattern()?.is_match(&cleaned) {
        return None;
    }
    let mut terms = cleaned.split('-').map(str::parse::<i64>);
    let first = terms.next()?.ok()?;
    terms.try_fold(first, |acc, term| term.ok().map(|value| acc - value))
}
