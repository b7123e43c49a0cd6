//! Read-only projections of a clan for display collaborators.
use serde::Serialize;
use std::cmp::Reverse;

use crate::catalog::BossCatalog;
use crate::constants::{BOSS_SLOTS, DAILY_ATTACKS};
use crate::error::ClanError;
use crate::model::{AttackRecord, ReservationRecord, UserId};
use crate::state::ClanState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerRemaining {
    pub user_id: UserId,
    pub remaining_attacks: u8,
    pub carry_overs: usize,
    pub task_kill: bool,
    pub limit_time_text: Option<String>,
}

/// Attacks and credits the clan still has available today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemainingSummary {
    pub players: Vec<PlayerRemaining>,
    pub remaining_attacks: u32,
    pub total_attacks: u32,
    pub carry_overs: u32,
}

impl RemainingSummary {
    #[must_use]
    pub fn of(clan: &ClanState) -> Self {
        let players: Vec<PlayerRemaining> = clan
            .players
            .values()
            .map(|player| PlayerRemaining {
                user_id: player.user_id,
                remaining_attacks: player.remaining_attacks(),
                carry_overs: player.carry_overs.len(),
                task_kill: player.task_kill,
                limit_time_text: player.limit_time_text.clone(),
            })
            .collect();
        let remaining_attacks = players
            .iter()
            .map(|player| u32::from(player.remaining_attacks))
            .sum();
        let carry_overs = players
            .iter()
            .map(|player| u32::try_from(player.carry_overs).unwrap_or(u32::MAX))
            .sum();
        let total_attacks = u32::try_from(players.len())
            .unwrap_or(u32::MAX)
            .saturating_mul(u32::from(DAILY_ATTACKS));
        Self {
            players,
            remaining_attacks,
            total_attacks,
            carry_overs,
        }
    }
}

/// One boss as a progress board shows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BossView {
    pub lap: u32,
    pub slot: usize,
    pub name: String,
    pub max_hp: u64,
    pub remaining_hp: u64,
    pub defeated: bool,
    /// Completed attacks, highest damage first.
    pub completed: Vec<AttackRecord>,
    /// Declared attacks, highest expected damage first.
    pub pending: Vec<AttackRecord>,
    pub reservations: Vec<ReservationRecord>,
}

impl BossView {
    /// # Errors
    ///
    /// Returns [`ClanError::UnknownLap`] or [`ClanError::InvalidSlot`].
    pub fn of(
        clan: &ClanState,
        catalog: &(impl BossCatalog + ?Sized),
        lap: u32,
        slot: usize,
    ) -> Result<Self, ClanError> {
        let boss = clan.boss(lap, slot)?;
        let (mut completed, mut pending): (Vec<_>, Vec<_>) =
            boss.attacks.iter().cloned().partition(|record| record.completed);
        completed.sort_by_key(|record| Reverse(record.damage));
        pending.sort_by_key(|record| Reverse(record.damage));
        Ok(Self {
            lap,
            slot,
            name: catalog.name(slot).to_string(),
            max_hp: boss.max_hp,
            remaining_hp: boss.remaining_hp(),
            defeated: boss.defeated,
            completed,
            pending,
            reservations: clan.reservations[slot].clone(),
        })
    }

    /// The boss each slot is currently being fought on.
    #[must_use]
    pub fn board(clan: &ClanState, catalog: &(impl BossCatalog + ?Sized)) -> Vec<Self> {
        (0..BOSS_SLOTS)
            .filter_map(|slot| Self::of(clan, catalog, clan.current_lap(slot), slot).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::HpTable;
    use crate::config::ClanConfig;
    use crate::model::{AttackKind, Player, RecordId};
    use chrono::{DateTime, Utc};

    #[test]
    fn summary_totals_remaining_attacks() {
        let mut clan = ClanState::new(1, ClanConfig::default());
        let mut busy = Player::new(1);
        busy.physics_attacks = 2;
        clan.players.insert(1, busy);
        clan.players.insert(2, Player::new(2));
        let summary = RemainingSummary::of(&clan);
        assert_eq!(summary.remaining_attacks, 4);
        assert_eq!(summary.total_attacks, 6);
        assert_eq!(summary.players[0].remaining_attacks, 1);
    }

    #[test]
    fn board_orders_attacks_by_damage() {
        let table = HpTable::default();
        let mut clan = ClanState::new(1, ClanConfig::default());
        clan.ensure_lap(1, &table);
        for (id, damage, completed) in [(1, 100, true), (2, 700, true), (3, 50, false)] {
            clan.boss_mut(1, 0).unwrap().attacks.push(AttackRecord {
                id: RecordId(id),
                user_id: id,
                kind: AttackKind::Physical,
                damage,
                note: String::new(),
                declared_at: DateTime::<Utc>::UNIX_EPOCH,
                completed,
            });
        }
        let board = BossView::board(&clan, &table);
        assert_eq!(board.len(), BOSS_SLOTS);
        let first = &board[0];
        assert_eq!(first.name, "Boss 1");
        assert_eq!(first.remaining_hp, 400);
        assert_eq!(first.completed[0].damage, 700);
        assert_eq!(first.pending.len(), 1);
    }
}
