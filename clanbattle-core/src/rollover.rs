//! Lap and day boundaries.
use chrono::NaiveDate;
use serde::Serialize;

use crate::catalog::BossCatalog;
use crate::constants::BOSS_SLOTS;
use crate::notify::ChangeNotice;
use crate::reservations::reservation_count;
use crate::state::ClanState;

/// What a rollover reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RolloverReport {
    /// Active lap after the rollover.
    pub lap: u32,
    pub lap_created: bool,
    pub pruned_laps: Vec<u32>,
    pub reservations_cleared: usize,
    pub players_reset: usize,
}

impl RolloverReport {
    #[must_use]
    pub fn notices(&self) -> Vec<ChangeNotice> {
        let mut notices = vec![ChangeNotice::PlayerRemaining];
        notices.extend((0..BOSS_SLOTS).map(|slot| ChangeNotice::Reservations { slot }));
        if self.lap_created {
            notices.extend((0..BOSS_SLOTS).map(|slot| ChangeNotice::BossProgress {
                lap: self.lap,
                slot,
            }));
        }
        notices
    }
}

fn reset(clan: &mut ClanState, lap: u32, lap_created: bool, retention_laps: u32) -> RolloverReport {
    let reservations_cleared = reservation_count(clan);
    clan.reset_day();
    let pruned_laps = clan.prune_laps_below(lap.saturating_sub(retention_laps));
    RolloverReport {
        lap,
        lap_created,
        pruned_laps,
        reservations_cleared,
        players_reset: clan.players.len(),
    }
}

/// Start `new_lap`: reset every player, drop every reservation and prune
/// laps more than `retention_laps` behind.
pub fn rollover_lap(
    clan: &mut ClanState,
    new_lap: u32,
    retention_laps: u32,
    catalog: &(impl BossCatalog + ?Sized),
) -> RolloverReport {
    let lap_created = clan.ensure_lap(new_lap, catalog);
    let report = reset(clan, new_lap, lap_created, retention_laps);
    log::info!(
        "group {}: rolled over to lap {new_lap} (pruned {:?})",
        clan.group_id,
        report.pruned_laps
    );
    report
}

/// Start a new battle day without advancing the lap.
pub fn rollover_day(clan: &mut ClanState, retention_laps: u32) -> RolloverReport {
    let lap = clan.latest_lap();
    let report = reset(clan, lap, false, retention_laps);
    log::info!(
        "group {}: new battle day {:?}, {} players reset",
        clan.group_id,
        clan.day,
        report.players_reset
    );
    report
}

/// Roll the day over if `today` differs from the stored day marker.
///
/// The first observation only records the marker.
pub fn check_day(
    clan: &mut ClanState,
    today: NaiveDate,
    retention_laps: u32,
) -> Option<RolloverReport> {
    match clan.day.replace(today) {
        Some(previous) if previous != today => Some(rollover_day(clan, retention_laps)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::HpTable;
    use crate::config::ClanConfig;
    use crate::model::{AttackKind, Player, RecordId, ReservationRecord};
    use chrono::{DateTime, Utc};

    fn clan() -> ClanState {
        let table = HpTable::default();
        let mut clan = ClanState::new(8, ClanConfig::default());
        for lap in 1..=4 {
            clan.ensure_lap(lap, &table);
        }
        let mut player = Player::new(1);
        player.physics_attacks = 2;
        player.task_kill = true;
        clan.players.insert(1, player);
        clan.reservations[2].push(ReservationRecord {
            id: RecordId(1),
            user_id: 1,
            slot: 2,
            kind: AttackKind::Magic,
            damage: 0,
            note: String::new(),
            carry_over: false,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
        });
        clan
    }

    #[test]
    fn lap_rollover_resets_and_prunes() {
        let mut clan = clan();
        let report = rollover_lap(&mut clan, 5, 2, &HpTable::default());
        assert!(report.lap_created);
        assert_eq!(report.pruned_laps, vec![1, 2]);
        assert_eq!(report.reservations_cleared, 1);
        let player = clan.player(1).unwrap();
        assert_eq!(player.attacks_used(), 0);
        assert!(!player.task_kill);
        assert_eq!(clan.laps.keys().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert!(report.notices().len() > BOSS_SLOTS);
    }

    #[test]
    fn day_rollover_keeps_the_lap() {
        let mut clan = clan();
        let report = rollover_day(&mut clan, 2);
        assert_eq!(report.lap, 4);
        assert!(!report.lap_created);
        assert_eq!(report.pruned_laps, vec![1]);
        assert_eq!(clan.latest_lap(), 4);
    }

    #[test]
    fn check_day_only_rolls_on_change() {
        let mut clan = clan();
        let monday = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        let tuesday = monday.succ_opt().unwrap();
        assert!(check_day(&mut clan, monday, 2).is_none());
        assert_eq!(clan.player(1).unwrap().physics_attacks, 2);
        assert!(check_day(&mut clan, monday, 2).is_none());
        assert!(check_day(&mut clan, tuesday, 2).is_some());
        assert_eq!(clan.day, Some(tuesday));
        assert_eq!(clan.player(1).unwrap().physics_attacks, 0);
    }
}
