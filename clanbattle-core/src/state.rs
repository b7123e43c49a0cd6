use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::catalog::BossCatalog;
use crate::config::ClanConfig;
use crate::constants::{BOSS_SLOTS, FIRST_LAP};
use crate::error::ClanError;
use crate::model::{BossProgress, GroupId, Player, RecordId, ReservationRecord, UserId};

/// Boss progress for every slot of one lap.
pub type LapRow = [BossProgress; BOSS_SLOTS];

/// Complete mutable state of one managed group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClanState {
    pub group_id: GroupId,
    #[serde(default)]
    pub config: ClanConfig,
    #[serde(default)]
    pub players: BTreeMap<UserId, Player>,
    #[serde(default)]
    pub laps: BTreeMap<u32, LapRow>,
    #[serde(default)]
    pub reservations: [Vec<ReservationRecord>; BOSS_SLOTS],
    /// Battle day the per-day counters belong to.
    #[serde(default)]
    pub day: Option<NaiveDate>,
    /// Last identifier handed out by [`ClanState::next_record_id`].
    #[serde(default)]
    pub last_record_id: u64,
}

impl ClanState {
    #[must_use]
    pub fn new(group_id: GroupId, config: ClanConfig) -> Self {
        Self {
            group_id,
            config,
            players: BTreeMap::new(),
            laps: BTreeMap::new(),
            reservations: Default::default(),
            day: None,
            last_record_id: 0,
        }
    }

    pub const fn next_record_id(&mut self) -> RecordId {
        self.last_record_id += 1;
        RecordId(self.last_record_id)
    }

    /// # Errors
    ///
    /// Returns [`ClanError::UnknownPlayer`] if the member is not managed.
    pub fn player(&self, user_id: UserId) -> Result<&Player, ClanError> {
        self.players.get(&user_id).ok_or(ClanError::UnknownPlayer {
            group_id: self.group_id,
            user_id,
        })
    }

    /// # Errors
    ///
    /// Returns [`ClanError::UnknownPlayer`] if the member is not managed.
    pub fn player_mut(&mut self, user_id: UserId) -> Result<&mut Player, ClanError> {
        let group_id = self.group_id;
        self.players
            .get_mut(&user_id)
            .ok_or(ClanError::UnknownPlayer { group_id, user_id })
    }

    /// # Errors
    ///
    /// Returns [`ClanError::InvalidSlot`] or [`ClanError::UnknownLap`].
    pub fn boss(&self, lap: u32, slot: usize) -> Result<&BossProgress, ClanError> {
        check_slot(slot)?;
        self.laps
            .get(&lap)
            .map(|row| &row[slot])
            .ok_or(ClanError::UnknownLap { lap })
    }

    /// # Errors
    ///
    /// Returns [`ClanError::InvalidSlot`] or [`ClanError::UnknownLap`].
    pub fn boss_mut(&mut self, lap: u32, slot: usize) -> Result<&mut BossProgress, ClanError> {
        check_slot(slot)?;
        self.laps
            .get_mut(&lap)
            .map(|row| &mut row[slot])
            .ok_or(ClanError::UnknownLap { lap })
    }

    /// Create the lap's boss progress from the catalog if it does not exist.
    ///
    /// Returns whether a new lap was created.
    pub fn ensure_lap(&mut self, lap: u32, catalog: &(impl BossCatalog + ?Sized)) -> bool {
        if self.laps.contains_key(&lap) {
            return false;
        }
        let row = std::array::from_fn(|slot| BossProgress::new(lap, slot, catalog.hp(lap, slot)));
        self.laps.insert(lap, row);
        true
    }

    /// Highest initialised lap.
    #[must_use]
    pub fn latest_lap(&self) -> u32 {
        self.laps.keys().next_back().copied().unwrap_or(FIRST_LAP)
    }

    /// Lap a slot is currently being fought on: the oldest lap on which that
    /// boss is still alive, or the newest lap if every one is down.
    #[must_use]
    pub fn current_lap(&self, slot: usize) -> u32 {
        self.laps
            .iter()
            .find(|(_, row)| row.get(slot).is_some_and(|boss| !boss.defeated))
            .map_or_else(|| self.latest_lap(), |(lap, _)| *lap)
    }

    /// Newest lap on which the player has a pending attack against `slot`.
    #[must_use]
    pub fn pending_lap(&self, user_id: UserId, slot: usize) -> Option<u32> {
        self.laps
            .iter()
            .rev()
            .find(|(_, row)| {
                row.get(slot)
                    .is_some_and(|boss| boss.pending_for(user_id).is_some())
            })
            .map(|(lap, _)| *lap)
    }

    /// Remove laps strictly below `lap` together with their attack records.
    ///
    /// Returns the removed laps.
    pub fn prune_laps_below(&mut self, lap: u32) -> Vec<u32> {
        let kept = self.laps.split_off(&lap);
        let removed = std::mem::replace(&mut self.laps, kept);
        removed.into_keys().collect()
    }

    /// Remove the player and every record that references them.
    pub fn remove_player(&mut self, user_id: UserId) -> Option<Player> {
        let removed = self.players.remove(&user_id)?;
        for row in self.laps.values_mut() {
            for boss in row.iter_mut() {
                boss.attacks.retain(|record| record.user_id != user_id);
            }
        }
        for list in &mut self.reservations {
            list.retain(|reservation| reservation.user_id != user_id);
        }
        Some(removed)
    }

    /// Reset every player's daily counters and credits and drop every reservation.
    pub fn reset_day(&mut self) {
        for player in self.players.values_mut() {
            player.reset_day();
        }
        for list in &mut self.reservations {
            list.clear();
        }
    }
}

/// # Errors
///
/// Returns [`ClanError::InvalidSlot`] for slots outside the lap.
pub const fn check_slot(slot: usize) -> Result<(), ClanError> {
    if slot < BOSS_SLOTS {
        Ok(())
    } else {
        Err(ClanError::InvalidSlot { slot })
    }
}
