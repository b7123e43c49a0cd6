//! Persistence gateway: row types, write plans and the in-memory store.
//!
//! The durable layout is one row per entity keyed by group id plus a natural
//! key. A clan transition is persisted as a write plan computed by diffing
//! the row sets before and after the transition.
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::config::ClanConfig;
use crate::model::{
    AttackRecord, BossProgress, CarryOverCredit, CreditList, GroupId, LogEntry, Player, RecordId,
    ReservationRecord, UserId,
};
use crate::state::ClanState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("group {group_id} has no clan row")]
    MissingGroup { group_id: GroupId },
    #[error("injected commit failure")]
    Injected,
    #[error("store file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClanRow {
    pub group_id: GroupId,
    #[serde(default)]
    pub config: ClanConfig,
    #[serde(default)]
    pub day: Option<NaiveDate>,
    #[serde(default)]
    pub last_record_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRow {
    pub user_id: UserId,
    #[serde(default)]
    pub physics_attacks: u8,
    #[serde(default)]
    pub magic_attacks: u8,
    #[serde(default)]
    pub task_kill: bool,
    #[serde(default)]
    pub undo_entry: Option<LogEntry>,
    #[serde(default)]
    pub limit_time_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BossRow {
    pub lap: u32,
    pub slot: usize,
    pub max_hp: u64,
    #[serde(default)]
    pub defeated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackRow {
    pub lap: u32,
    pub slot: usize,
    pub record: AttackRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditRow {
    pub user_id: UserId,
    pub credit: CarryOverCredit,
}

/// One durable mutation, scoped to the group it is committed for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreWrite {
    UpsertClan(ClanRow),
    /// Removes the group and every row it owns.
    DeleteClan,
    UpsertPlayer(PlayerRow),
    /// Also removes the player's attack records, reservations and credits.
    DeletePlayer { user_id: UserId },
    UpsertBossProgress(BossRow),
    /// Removes laps below `below_lap` (every lap when `None`) and their
    /// attack records.
    DeleteBossProgress { below_lap: Option<u32> },
    UpsertAttackRecord(AttackRow),
    DeleteAttackRecord { id: RecordId },
    UpsertReservation(ReservationRecord),
    DeleteReservation { id: RecordId },
    UpsertCredit(CreditRow),
    DeleteCredit { user_id: UserId, id: RecordId },
}

/// Durable CRUD for clan entities.
///
/// Every method is keyed by group id plus the entity's natural key. Stores
/// that can apply a batch atomically should override [`ClanStore::commit`].
pub trait ClanStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    fn upsert_clan(&self, row: &ClanRow) -> Result<(), Self::Error>;

    /// # Errors
    ///
    /// Returns an error if the rows cannot be removed.
    fn delete_clan(&self, group_id: GroupId) -> Result<(), Self::Error>;

    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    fn upsert_player(&self, group_id: GroupId, row: &PlayerRow) -> Result<(), Self::Error>;

    /// # Errors
    ///
    /// Returns an error if the rows cannot be removed.
    fn delete_player(&self, group_id: GroupId, user_id: UserId) -> Result<(), Self::Error>;

    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    fn upsert_boss_progress(&self, group_id: GroupId, row: &BossRow) -> Result<(), Self::Error>;

    /// # Errors
    ///
    /// Returns an error if the rows cannot be removed.
    fn delete_boss_progress(
        &self,
        group_id: GroupId,
        below_lap: Option<u32>,
    ) -> Result<(), Self::Error>;

    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    fn upsert_attack_record(&self, group_id: GroupId, row: &AttackRow) -> Result<(), Self::Error>;

    /// # Errors
    ///
    /// Returns an error if the row cannot be removed.
    fn delete_attack_record(&self, group_id: GroupId, id: RecordId) -> Result<(), Self::Error>;

    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    fn upsert_reservation(
        &self,
        group_id: GroupId,
        row: &ReservationRecord,
    ) -> Result<(), Self::Error>;

    /// # Errors
    ///
    /// Returns an error if the row cannot be removed.
    fn delete_reservation(&self, group_id: GroupId, id: RecordId) -> Result<(), Self::Error>;

    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    fn upsert_credit(&self, group_id: GroupId, row: &CreditRow) -> Result<(), Self::Error>;

    /// # Errors
    ///
    /// Returns an error if the row cannot be removed.
    fn delete_credit(
        &self,
        group_id: GroupId,
        user_id: UserId,
        id: RecordId,
    ) -> Result<(), Self::Error>;

    /// Rehydrate every stored group.
    ///
    /// # Errors
    ///
    /// Returns an error if the rows cannot be read.
    fn load_all(&self) -> Result<HashMap<GroupId, ClanState>, Self::Error>;

    /// Apply a write plan in order.
    ///
    /// # Errors
    ///
    /// Returns the first failing write's error; earlier writes stay applied
    /// unless the store overrides this with an atomic batch.
    fn commit(&self, group_id: GroupId, writes: &[StoreWrite]) -> Result<(), Self::Error> {
        for write in writes {
            apply_write(self, group_id, write)?;
        }
        Ok(())
    }
}

/// Route one write to the matching per-entity method.
///
/// # Errors
///
/// Propagates the store's error.
pub fn apply_write<S: ClanStore + ?Sized>(
    store: &S,
    group_id: GroupId,
    write: &StoreWrite,
) -> Result<(), S::Error> {
    match write {
        StoreWrite::UpsertClan(row) => store.upsert_clan(row),
        StoreWrite::DeleteClan => store.delete_clan(group_id),
        StoreWrite::UpsertPlayer(row) => store.upsert_player(group_id, row),
        StoreWrite::DeletePlayer { user_id } => store.delete_player(group_id, *user_id),
        StoreWrite::UpsertBossProgress(row) => store.upsert_boss_progress(group_id, row),
        StoreWrite::DeleteBossProgress { below_lap } => {
            store.delete_boss_progress(group_id, *below_lap)
        }
        StoreWrite::UpsertAttackRecord(row) => store.upsert_attack_record(group_id, row),
        StoreWrite::DeleteAttackRecord { id } => store.delete_attack_record(group_id, *id),
        StoreWrite::UpsertReservation(row) => store.upsert_reservation(group_id, row),
        StoreWrite::DeleteReservation { id } => store.delete_reservation(group_id, *id),
        StoreWrite::UpsertCredit(row) => store.upsert_credit(group_id, row),
        StoreWrite::DeleteCredit { user_id, id } => store.delete_credit(group_id, *user_id, *id),
    }
}

/// Every row owned by one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupTables {
    pub clan: ClanRow,
    #[serde(default)]
    pub players: BTreeMap<UserId, PlayerRow>,
    /// Boss rows keyed by lap, one entry per slot.
    #[serde(default)]
    pub bosses: BTreeMap<u32, Vec<BossRow>>,
    #[serde(default)]
    pub attacks: BTreeMap<RecordId, AttackRow>,
    #[serde(default)]
    pub reservations: BTreeMap<RecordId, ReservationRecord>,
    #[serde(default)]
    pub credits: BTreeMap<RecordId, CreditRow>,
}

impl GroupTables {
    #[must_use]
    pub fn empty(clan: ClanRow) -> Self {
        Self {
            clan,
            players: BTreeMap::new(),
            bosses: BTreeMap::new(),
            attacks: BTreeMap::new(),
            reservations: BTreeMap::new(),
            credits: BTreeMap::new(),
        }
    }

    /// Flatten a clan into rows.
    #[must_use]
    pub fn from_state(state: &ClanState) -> Self {
        let mut tables = Self::empty(ClanRow {
            group_id: state.group_id,
            config: state.config.clone(),
            day: state.day,
            last_record_id: state.last_record_id,
        });
        for player in state.players.values() {
            tables.players.insert(
                player.user_id,
                PlayerRow {
                    user_id: player.user_id,
                    physics_attacks: player.physics_attacks,
                    magic_attacks: player.magic_attacks,
                    task_kill: player.task_kill,
                    undo_entry: player.undo_entry.clone(),
                    limit_time_text: player.limit_time_text.clone(),
                },
            );
            for credit in &player.carry_overs {
                tables.credits.insert(
                    credit.id,
                    CreditRow {
                        user_id: player.user_id,
                        credit: credit.clone(),
                    },
                );
            }
        }
        for (&lap, row) in &state.laps {
            let bosses = row
                .iter()
                .map(|boss| BossRow {
                    lap,
                    slot: boss.slot,
                    max_hp: boss.max_hp,
                    defeated: boss.defeated,
                })
                .collect();
            tables.bosses.insert(lap, bosses);
            for boss in row {
                for record in &boss.attacks {
                    tables.attacks.insert(
                        record.id,
                        AttackRow {
                            lap,
                            slot: boss.slot,
                            record: record.clone(),
                        },
                    );
                }
            }
        }
        for reservation in state.reservations.iter().flatten() {
            tables.reservations.insert(reservation.id, reservation.clone());
        }
        tables
    }

    /// Reassemble the clan. Record ids are monotonic, so id order is
    /// creation order.
    #[must_use]
    pub fn to_state(&self) -> ClanState {
        let mut state = ClanState::new(self.clan.group_id, self.clan.config.clone());
        state.day = self.clan.day;
        state.last_record_id = self.clan.last_record_id;
        for row in self.players.values() {
            let carry_overs: CreditList = self
                .credits
                .values()
                .filter(|credit| credit.user_id == row.user_id)
                .map(|credit| credit.credit.clone())
                .collect();
            state.players.insert(
                row.user_id,
                Player {
                    user_id: row.user_id,
                    physics_attacks: row.physics_attacks,
                    magic_attacks: row.magic_attacks,
                    task_kill: row.task_kill,
                    carry_overs,
                    undo_entry: row.undo_entry.clone(),
                    limit_time_text: row.limit_time_text.clone(),
                },
            );
        }
        for (&lap, rows) in &self.bosses {
            let lap_row = std::array::from_fn(|slot| {
                let stored = rows.iter().find(|row| row.slot == slot);
                let mut boss = BossProgress::new(lap, slot, stored.map_or(0, |row| row.max_hp));
                boss.defeated = stored.is_some_and(|row| row.defeated);
                boss.attacks = self
                    .attacks
                    .values()
                    .filter(|attack| attack.lap == lap && attack.slot == slot)
                    .map(|attack| attack.record.clone())
                    .collect();
                boss
            });
            state.laps.insert(lap, lap_row);
        }
        for reservation in self.reservations.values() {
            if let Some(list) = state.reservations.get_mut(reservation.slot) {
                list.push(reservation.clone());
            }
        }
        state
    }

    /// Apply one write to this group's rows.
    pub fn apply(&mut self, write: &StoreWrite) {
        match write {
            StoreWrite::UpsertClan(row) => self.clan = row.clone(),
            StoreWrite::DeleteClan => *self = Self::empty(self.clan.clone()),
            StoreWrite::UpsertPlayer(row) => {
                self.players.insert(row.user_id, row.clone());
            }
            StoreWrite::DeletePlayer { user_id } => {
                self.players.remove(user_id);
                self.attacks.retain(|_, row| row.record.user_id != *user_id);
                self.reservations.retain(|_, row| row.user_id != *user_id);
                self.credits.retain(|_, row| row.user_id != *user_id);
            }
            StoreWrite::UpsertBossProgress(row) => {
                let rows = self.bosses.entry(row.lap).or_default();
                match rows.iter_mut().find(|existing| existing.slot == row.slot) {
                    Some(existing) => *existing = row.clone(),
                    None => {
                        rows.push(row.clone());
                        rows.sort_by_key(|row| row.slot);
                    }
                }
            }
            StoreWrite::DeleteBossProgress { below_lap } => {
                let keep = |lap: u32| below_lap.is_some_and(|below| lap >= below);
                self.bosses.retain(|&lap, _| keep(lap));
                self.attacks.retain(|_, row| keep(row.lap));
            }
            StoreWrite::UpsertAttackRecord(row) => {
                self.attacks.insert(row.record.id, row.clone());
            }
            StoreWrite::DeleteAttackRecord { id } => {
                self.attacks.remove(id);
            }
            StoreWrite::UpsertReservation(row) => {
                self.reservations.insert(row.id, row.clone());
            }
            StoreWrite::DeleteReservation { id } => {
                self.reservations.remove(id);
            }
            StoreWrite::UpsertCredit(row) => {
                self.credits.insert(row.credit.id, row.clone());
            }
            StoreWrite::DeleteCredit { user_id, id } => {
                if self.credits.get(id).is_some_and(|row| row.user_id == *user_id) {
                    self.credits.remove(id);
                }
            }
        }
    }
}

/// Every group's rows. This is the whole database for the bundled stores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tables {
    #[serde(default)]
    pub groups: BTreeMap<GroupId, GroupTables>,
}

impl Tables {
    /// Apply one write for `group_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingGroup`] for child rows of a group that
    /// has no clan row.
    pub fn apply(&mut self, group_id: GroupId, write: &StoreWrite) -> Result<(), StoreError> {
        match write {
            StoreWrite::UpsertClan(row) => {
                self.groups
                    .entry(group_id)
                    .and_modify(|tables| tables.clan = row.clone())
                    .or_insert_with(|| GroupTables::empty(row.clone()));
            }
            StoreWrite::DeleteClan => {
                self.groups.remove(&group_id);
            }
            other => self
                .groups
                .get_mut(&group_id)
                .ok_or(StoreError::MissingGroup { group_id })?
                .apply(other),
        }
        Ok(())
    }

    #[must_use]
    pub fn load_all(&self) -> HashMap<GroupId, ClanState> {
        self.groups
            .iter()
            .map(|(&group_id, tables)| (group_id, tables.to_state()))
            .collect()
    }
}

fn diff_map<K: Ord + Copy, V: PartialEq>(
    before: &BTreeMap<K, V>,
    after: &BTreeMap<K, V>,
    skip_delete: impl Fn(&V) -> bool,
    upsert: impl Fn(&V) -> StoreWrite,
    delete: impl Fn(K, &V) -> StoreWrite,
    writes: &mut Vec<StoreWrite>,
) {
    for (key, old) in before {
        if !after.contains_key(key) && !skip_delete(old) {
            writes.push(delete(*key, old));
        }
    }
    for (key, new) in after {
        if before.get(key) != Some(new) {
            writes.push(upsert(new));
        }
    }
}

/// Writes that turn the stored rows of `before` into those of `after`.
///
/// `None` means the group has no rows yet, so every row is inserted. Laps
/// only ever disappear from the bottom, so lap removal is planned as a single
/// prefix delete; rows that a player or lap delete cascades to are not
/// planned separately.
#[must_use]
pub fn plan_writes(before: Option<&ClanState>, after: &ClanState) -> Vec<StoreWrite> {
    let after_rows = GroupTables::from_state(after);
    let before_rows = before.map_or_else(
        || GroupTables::empty(after_rows.clan.clone()),
        GroupTables::from_state,
    );
    let mut writes = Vec::new();

    if before.is_none() || before_rows.clan != after_rows.clan {
        writes.push(StoreWrite::UpsertClan(after_rows.clan.clone()));
    }

    let removed_players: BTreeSet<UserId> = before_rows
        .players
        .keys()
        .filter(|user_id| !after_rows.players.contains_key(user_id))
        .copied()
        .collect();
    let removed_laps: Vec<u32> = before_rows
        .bosses
        .keys()
        .filter(|lap| !after_rows.bosses.contains_key(lap))
        .copied()
        .collect();
    let below_lap = removed_laps.last().map(|lap| lap.saturating_add(1));
    if let Some(below) = below_lap {
        let below_lap = if after_rows.bosses.is_empty() {
            None
        } else {
            Some(below)
        };
        writes.push(StoreWrite::DeleteBossProgress { below_lap });
    }
    let lap_dropped = |lap: u32| below_lap.is_some_and(|below| lap < below);

    diff_map(
        &before_rows.players,
        &after_rows.players,
        |_| false,
        |row| StoreWrite::UpsertPlayer(row.clone()),
        |user_id, _| StoreWrite::DeletePlayer { user_id },
        &mut writes,
    );
    for (lap, rows) in &after_rows.bosses {
        let old = before_rows.bosses.get(lap);
        for row in rows {
            if old.is_none_or(|old| !old.contains(row)) {
                writes.push(StoreWrite::UpsertBossProgress(row.clone()));
            }
        }
    }
    diff_map(
        &before_rows.attacks,
        &after_rows.attacks,
        |row| removed_players.contains(&row.record.user_id) || lap_dropped(row.lap),
        |row| StoreWrite::UpsertAttackRecord(row.clone()),
        |id, _| StoreWrite::DeleteAttackRecord { id },
        &mut writes,
    );
    diff_map(
        &before_rows.reservations,
        &after_rows.reservations,
        |row| removed_players.contains(&row.user_id),
        |row| StoreWrite::UpsertReservation(row.clone()),
        |id, _| StoreWrite::DeleteReservation { id },
        &mut writes,
    );
    diff_map(
        &before_rows.credits,
        &after_rows.credits,
        |row| removed_players.contains(&row.user_id),
        |row| StoreWrite::UpsertCredit(row.clone()),
        |id, row| StoreWrite::DeleteCredit {
            user_id: row.user_id,
            id,
        },
        &mut writes,
    );
    writes
}

/// A store that keeps the whole database as [`Tables`] and applies each
/// batch atomically. Implementors get [`ClanStore`] for free.
pub trait TableStore: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the batch cannot be applied; nothing is applied
    /// in that case.
    fn commit_tables(&self, group_id: GroupId, writes: &[StoreWrite]) -> Result<(), StoreError>;

    fn read_tables(&self) -> Tables;

    /// # Errors
    ///
    /// As [`TableStore::commit_tables`].
    fn write_one(&self, group_id: GroupId, write: StoreWrite) -> Result<(), StoreError> {
        self.commit_tables(group_id, std::slice::from_ref(&write))
    }
}

impl<T: TableStore> ClanStore for T {
    type Error = StoreError;

    fn upsert_clan(&self, row: &ClanRow) -> Result<(), Self::Error> {
        self.write_one(row.group_id, StoreWrite::UpsertClan(row.clone()))
    }

    fn delete_clan(&self, group_id: GroupId) -> Result<(), Self::Error> {
        self.write_one(group_id, StoreWrite::DeleteClan)
    }

    fn upsert_player(&self, group_id: GroupId, row: &PlayerRow) -> Result<(), Self::Error> {
        self.write_one(group_id, StoreWrite::UpsertPlayer(row.clone()))
    }

    fn delete_player(&self, group_id: GroupId, user_id: UserId) -> Result<(), Self::Error> {
        self.write_one(group_id, StoreWrite::DeletePlayer { user_id })
    }

    fn upsert_boss_progress(&self, group_id: GroupId, row: &BossRow) -> Result<(), Self::Error> {
        self.write_one(group_id, StoreWrite::UpsertBossProgress(row.clone()))
    }

    fn delete_boss_progress(
        &self,
        group_id: GroupId,
        below_lap: Option<u32>,
    ) -> Result<(), Self::Error> {
        self.write_one(group_id, StoreWrite::DeleteBossProgress { below_lap })
    }

    fn upsert_attack_record(&self, group_id: GroupId, row: &AttackRow) -> Result<(), Self::Error> {
        self.write_one(group_id, StoreWrite::UpsertAttackRecord(row.clone()))
    }

    fn delete_attack_record(&self, group_id: GroupId, id: RecordId) -> Result<(), Self::Error> {
        self.write_one(group_id, StoreWrite::DeleteAttackRecord { id })
    }

    fn upsert_reservation(
        &self,
        group_id: GroupId,
        row: &ReservationRecord,
    ) -> Result<(), Self::Error> {
        self.write_one(group_id, StoreWrite::UpsertReservation(row.clone()))
    }

    fn delete_reservation(&self, group_id: GroupId, id: RecordId) -> Result<(), Self::Error> {
        self.write_one(group_id, StoreWrite::DeleteReservation { id })
    }

    fn upsert_credit(&self, group_id: GroupId, row: &CreditRow) -> Result<(), Self::Error> {
        self.write_one(group_id, StoreWrite::UpsertCredit(row.clone()))
    }

    fn delete_credit(
        &self,
        group_id: GroupId,
        user_id: UserId,
        id: RecordId,
    ) -> Result<(), Self::Error> {
        self.write_one(group_id, StoreWrite::DeleteCredit { user_id, id })
    }

    fn load_all(&self) -> Result<HashMap<GroupId, ClanState>, Self::Error> {
        Ok(self.read_tables().load_all())
    }

    fn commit(&self, group_id: GroupId, writes: &[StoreWrite]) -> Result<(), Self::Error> {
        self.commit_tables(group_id, writes)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    tables: Tables,
    failing_commits: usize,
    commits: usize,
}

/// In-process store. Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail without applying anything.
    pub fn fail_next_commits(&self, count: usize) {
        self.lock().failing_commits = count;
    }

    /// Number of successful commits.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.lock().commits
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TableStore for MemoryStore {
    fn commit_tables(&self, group_id: GroupId, writes: &[StoreWrite]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.failing_commits > 0 {
            inner.failing_commits -= 1;
            return Err(StoreError::Injected);
        }
        let mut staged = inner.tables.clone();
        for write in writes {
            staged.apply(group_id, write)?;
        }
        inner.tables = staged;
        inner.commits += 1;
        Ok(())
    }

    fn read_tables(&self) -> Tables {
        self.lock().tables.clone()
    }
}
