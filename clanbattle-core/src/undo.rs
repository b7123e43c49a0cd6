//! Single-step undo of a player's most recent declare or attack.
use serde::Serialize;

use crate::error::ClanError;
use crate::model::{LogEntry, UserId};
use crate::notify::ChangeNotice;
use crate::state::ClanState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UndoOutcome {
    NothingToUndo,
    /// The entry's record no longer exists; nothing was changed.
    Stale { entry: LogEntry },
    Reverted { entry: LogEntry },
}

impl UndoOutcome {
    #[must_use]
    pub const fn changed(&self) -> bool {
        matches!(self, Self::Reverted { .. })
    }
}

pub struct UndoLedger<'a> {
    clan: &'a mut ClanState,
    notices: Vec<ChangeNotice>,
}

impl<'a> UndoLedger<'a> {
    pub const fn new(clan: &'a mut ClanState) -> Self {
        Self {
            clan,
            notices: Vec::new(),
        }
    }

    #[must_use]
    pub fn into_notices(self) -> Vec<ChangeNotice> {
        self.notices
    }

    /// Reverse the player's last recorded step and clear the entry.
    ///
    /// Reservations dropped by the reversed attack are not restored, and a
    /// lap created by a reversed final blow is kept.
    ///
    /// # Errors
    ///
    /// Returns [`ClanError::UnknownPlayer`] if the member is not managed.
    pub fn undo_last(&mut self, user_id: UserId) -> Result<UndoOutcome, ClanError> {
        let Some(entry) = self.clan.player_mut(user_id)?.undo_entry.take() else {
            return Ok(UndoOutcome::NothingToUndo);
        };
        let (lap, slot, id) = (entry.lap(), entry.slot(), entry.record());
        let Ok(boss) = self.clan.boss_mut(lap, slot) else {
            log::debug!("undo of {} {id} skipped: lap {lap} is gone", entry.describe());
            return Ok(UndoOutcome::Stale { entry });
        };

        match &entry {
            LogEntry::Declare { .. } => {
                let Some(index) = boss
                    .attacks
                    .iter()
                    .position(|record| record.id == id && record.is_pending_for(user_id))
                else {
                    return Ok(UndoOutcome::Stale { entry });
                };
                boss.attacks.remove(index);
            }
            LogEntry::Attack {
                snapshot,
                prior_damage,
                ..
            }
            | LogEntry::LastAttack {
                snapshot,
                prior_damage,
                ..
            } => {
                let Some(record) = boss
                    .record_mut(id)
                    .filter(|record| record.completed && record.user_id == user_id)
                else {
                    return Ok(UndoOutcome::Stale { entry });
                };
                record.completed = false;
                if let Some(damage) = prior_damage {
                    record.damage = *damage;
                }
                if let LogEntry::LastAttack { was_defeated, .. } = &entry {
                    boss.defeated = *was_defeated;
                }
                self.clan.player_mut(user_id)?.restore(snapshot);
                self.notices.push(ChangeNotice::PlayerRemaining);
            }
        }
        log::debug!(
            "group {}: player {user_id} undid {} on lap {lap} boss {slot}",
            self.clan.group_id,
            entry.describe()
        );
        self.notices.push(ChangeNotice::BossProgress { lap, slot });
        Ok(UndoOutcome::Reverted { entry })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::HpTable;
    use crate::config::ClanConfig;
    use crate::coordinator::AttackCoordinator;
    use crate::model::{AttackKind, Player};
    use chrono::{DateTime, Utc};

    fn clan() -> ClanState {
        let mut clan = ClanState::new(2, ClanConfig::default());
        clan.ensure_lap(1, &HpTable::default());
        clan.players.insert(5, Player::new(5));
        clan
    }

    #[test]
    fn nothing_to_undo_is_not_an_error() {
        let mut clan = clan();
        let mut ledger = UndoLedger::new(&mut clan);
        assert_eq!(ledger.undo_last(5), Ok(UndoOutcome::NothingToUndo));
        assert!(ledger.undo_last(6).is_err());
    }

    #[test]
    fn undoing_a_declare_removes_the_record() {
        let mut clan = clan();
        let before = clan.clone();
        let table = HpTable::default();
        let mut coord = AttackCoordinator::new(&mut clan, &table, DateTime::<Utc>::UNIX_EPOCH);
        coord.declare(5, 1, 3, AttackKind::Magic).unwrap();

        let outcome = UndoLedger::new(&mut clan).undo_last(5).unwrap();
        assert!(outcome.changed());
        assert_eq!(clan.laps, before.laps);
        assert_eq!(clan.players, before.players);
    }

    #[test]
    fn undoing_a_final_blow_restores_defeat_and_credits() {
        let mut clan = clan();
        let table = HpTable::default();
        let mut coord = AttackCoordinator::new(&mut clan, &table, DateTime::<Utc>::UNIX_EPOCH);
        coord.declare(5, 1, 0, AttackKind::Physical).unwrap();
        let before_finish = clan.player(5).unwrap().snapshot();
        let mut coord = AttackCoordinator::new(&mut clan, &table, DateTime::<Utc>::UNIX_EPOCH);
        coord.finish_boss(5, 1, 0, None).unwrap();

        UndoLedger::new(&mut clan).undo_last(5).unwrap();
        assert_eq!(clan.player(5).unwrap().snapshot(), before_finish);
        let boss = clan.boss(1, 0).unwrap();
        assert!(!boss.defeated);
        assert!(boss.pending_for(5).is_some());
        assert!(clan.laps.contains_key(&2));
        assert_eq!(
            UndoLedger::new(&mut clan).undo_last(5),
            Ok(UndoOutcome::NothingToUndo)
        );
    }

    #[test]
    fn undoing_an_attack_restores_the_declared_damage() {
        let mut clan = clan();
        let table = HpTable::default();
        let mut coord = AttackCoordinator::new(&mut clan, &table, DateTime::<Utc>::UNIX_EPOCH);
        coord.declare(5, 1, 2, AttackKind::Magic).unwrap();
        coord.record_damage(5, Some(1), 2, 800, Some("80s")).unwrap();
        coord.complete_attack(5, 1, 2, Some(1_500), None).unwrap();

        UndoLedger::new(&mut clan).undo_last(5).unwrap();
        let boss = clan.boss(1, 2).unwrap();
        let record = boss.pending_for(5).unwrap();
        assert_eq!(record.damage, 800);
        assert_eq!(boss.remaining_hp(), boss.max_hp);
    }

    #[test]
    fn stale_entries_change_nothing() {
        let mut clan = clan();
        let table = HpTable::default();
        let mut coord = AttackCoordinator::new(&mut clan, &table, DateTime::<Utc>::UNIX_EPOCH);
        coord.declare(5, 1, 1, AttackKind::Physical).unwrap();
        clan.boss_mut(1, 1).unwrap().attacks.clear();
        let laps = clan.laps.clone();

        let outcome = UndoLedger::new(&mut clan).undo_last(5).unwrap();
        assert!(matches!(outcome, UndoOutcome::Stale { .. }));
        assert_eq!(clan.laps, laps);
    }
}
