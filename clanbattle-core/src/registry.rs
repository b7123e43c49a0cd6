//! Process-wide registry of managed clans.
//!
//! Every operation locks only its own clan, applies the transition, commits
//! the resulting write plan and only then tells observers. If the commit
//! fails the clan is restored to the state it had before the operation.
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::catalog::{CatalogHandle, CatalogSnapshot};
use crate::config::{ClanConfig, EngineConfig};
use crate::constants::{BOSS_SLOTS, FIRST_LAP};
use crate::coordinator::{AttackCoordinator, AttackOutcome, select_credit_index};
use crate::error::ClanError;
use crate::model::{
    AttackKind, AttackRecord, CarryOverCredit, GroupId, Player, ReservationRecord, UserId,
};
use crate::notify::{ChangeNotice, ClanObserver, dispatch};
use crate::reservations::{ReservationBook, ReservationUpdate};
use crate::rollover::{self, RolloverReport};
use crate::state::ClanState;
use crate::store::{ClanStore, StoreWrite, plan_writes};
use crate::undo::{UndoLedger, UndoOutcome};
use crate::views::{BossView, RemainingSummary};

/// A clan slot; emptied by [`ClanRegistry::deprovision`] so that operations
/// already waiting on the lock find the group gone.
type Shared<T> = Arc<Mutex<Option<T>>>;

pub struct ClanRegistry<S: ClanStore> {
    clans: RwLock<HashMap<GroupId, Shared<ClanState>>>,
    store: S,
    catalog: CatalogHandle,
    config: EngineConfig,
    observers: RwLock<Vec<Arc<dyn ClanObserver>>>,
}

fn persistence(err: &impl std::error::Error) -> ClanError {
    ClanError::PersistenceFailure(err.to_string())
}

impl<S: ClanStore> ClanRegistry<S> {
    /// Rehydrate every stored clan.
    ///
    /// # Errors
    ///
    /// Returns [`ClanError::PersistenceFailure`] if the store cannot be read.
    pub fn load(store: S, catalog: CatalogHandle, config: EngineConfig) -> Result<Self, ClanError> {
        let loaded = store.load_all().map_err(|err| persistence(&err))?;
        log::info!("loaded {} clans from the store", loaded.len());
        let clans = loaded
            .into_iter()
            .map(|(group_id, state)| (group_id, Arc::new(Mutex::new(Some(state)))))
            .collect();
        Ok(Self {
            clans: RwLock::new(clans),
            store,
            catalog,
            config,
            observers: RwLock::new(Vec::new()),
        })
    }

    pub fn subscribe(&self, observer: Arc<dyn ClanObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub const fn catalog(&self) -> &CatalogHandle {
        &self.catalog
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Managed group ids in ascending order.
    #[must_use]
    pub fn groups(&self) -> Vec<GroupId> {
        let mut groups: Vec<GroupId> = self
            .clans
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        groups.sort_unstable();
        groups
    }

    fn clan(&self, group_id: GroupId) -> Result<Shared<ClanState>, ClanError> {
        self.clans
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&group_id)
            .cloned()
            .ok_or(ClanError::UnknownGroup { group_id })
    }

    fn notify(&self, group_id: GroupId, notices: &[ChangeNotice]) {
        if notices.is_empty() {
            return;
        }
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            dispatch(observer.as_ref(), group_id, notices);
        }
    }

    fn transact<T>(
        &self,
        group_id: GroupId,
        op: impl FnOnce(&mut ClanState, &CatalogSnapshot) -> Result<(T, Vec<ChangeNotice>), ClanError>,
    ) -> Result<T, ClanError> {
        let clan = self.clan(group_id)?;
        self.transact_on(&clan, group_id, op)
    }

    fn transact_on<T>(
        &self,
        clan: &Shared<ClanState>,
        group_id: GroupId,
        op: impl FnOnce(&mut ClanState, &CatalogSnapshot) -> Result<(T, Vec<ChangeNotice>), ClanError>,
    ) -> Result<T, ClanError> {
        let mut guard = clan.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(state) = guard.as_mut() else {
            return Err(ClanError::UnknownGroup { group_id });
        };
        let before = state.clone();
        let catalog = self.catalog.current();
        let (value, notices) = match op(&mut *state, &catalog) {
            Ok(applied) => applied,
            Err(err) => {
                *state = before;
                return Err(err);
            }
        };
        let writes = plan_writes(Some(&before), state);
        if !writes.is_empty()
            && let Err(err) = self.store.commit(group_id, &writes)
        {
            log::warn!(
                "group {group_id}: commit of {} writes failed, rolling back: {err}",
                writes.len()
            );
            *state = before;
            return Err(persistence(&err));
        }
        drop(guard);
        self.notify(group_id, &notices);
        Ok(value)
    }

    /// Start managing a group, seeding lap 1 from the catalog.
    ///
    /// # Errors
    ///
    /// [`ClanError::AlreadyProvisioned`] or [`ClanError::PersistenceFailure`].
    pub fn provision(&self, group_id: GroupId, config: ClanConfig) -> Result<ClanState, ClanError> {
        let mut clans = self.clans.write().unwrap_or_else(PoisonError::into_inner);
        if clans.contains_key(&group_id) {
            return Err(ClanError::AlreadyProvisioned { group_id });
        }
        let mut state = ClanState::new(group_id, config);
        state.ensure_lap(FIRST_LAP, &self.catalog.current());
        self.store
            .commit(group_id, &plan_writes(None, &state))
            .map_err(|err| persistence(&err))?;
        clans.insert(group_id, Arc::new(Mutex::new(Some(state.clone()))));
        drop(clans);
        log::info!("provisioned group {group_id}");
        let notices: Vec<ChangeNotice> = (0..BOSS_SLOTS)
            .map(|slot| ChangeNotice::BossProgress {
                lap: FIRST_LAP,
                slot,
            })
            .collect();
        self.notify(group_id, &notices);
        Ok(state)
    }

    /// Stop managing a group and delete everything it owns.
    ///
    /// # Errors
    ///
    /// [`ClanError::UnknownGroup`] or [`ClanError::PersistenceFailure`].
    pub fn deprovision(&self, group_id: GroupId) -> Result<ClanState, ClanError> {
        let mut clans = self.clans.write().unwrap_or_else(PoisonError::into_inner);
        let clan = clans
            .get(&group_id)
            .cloned()
            .ok_or(ClanError::UnknownGroup { group_id })?;
        let mut guard = clan.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            return Err(ClanError::UnknownGroup { group_id });
        }
        self.store
            .commit(group_id, &[StoreWrite::DeleteClan])
            .map_err(|err| persistence(&err))?;
        clans.remove(&group_id);
        let state = guard.take().ok_or(ClanError::UnknownGroup { group_id })?;
        log::info!("deprovisioned group {group_id}");
        Ok(state)
    }

    /// Copy of a clan's current state.
    ///
    /// # Errors
    ///
    /// Returns [`ClanError::UnknownGroup`].
    pub fn snapshot(&self, group_id: GroupId) -> Result<ClanState, ClanError> {
        let clan = self.clan(group_id)?;
        let state = clan.lock().unwrap_or_else(PoisonError::into_inner).clone();
        state.ok_or(ClanError::UnknownGroup { group_id })
    }

    /// # Errors
    ///
    /// Returns [`ClanError::UnknownGroup`].
    pub fn remaining(&self, group_id: GroupId) -> Result<RemainingSummary, ClanError> {
        Ok(RemainingSummary::of(&self.snapshot(group_id)?))
    }

    /// # Errors
    ///
    /// Returns [`ClanError::UnknownGroup`].
    pub fn board(&self, group_id: GroupId) -> Result<Vec<BossView>, ClanError> {
        Ok(BossView::board(
            &self.snapshot(group_id)?,
            &self.catalog.current(),
        ))
    }

    /// # Errors
    ///
    /// See [`AttackCoordinator::declare`].
    pub fn declare(
        &self,
        group_id: GroupId,
        user_id: UserId,
        lap: u32,
        slot: usize,
        kind: AttackKind,
        now: DateTime<Utc>,
    ) -> Result<AttackRecord, ClanError> {
        self.transact(group_id, |clan, catalog| {
            let mut coord = AttackCoordinator::new(clan, catalog, now);
            let record = coord.declare(user_id, lap, slot, kind)?;
            Ok((record, coord.into_notices()))
        })
    }

    /// # Errors
    ///
    /// See [`AttackCoordinator::record_damage`].
    pub fn record_damage(
        &self,
        group_id: GroupId,
        user_id: UserId,
        lap: Option<u32>,
        slot: usize,
        damage: u64,
        note: Option<&str>,
    ) -> Result<AttackRecord, ClanError> {
        self.transact(group_id, |clan, catalog| {
            let mut coord = AttackCoordinator::new(clan, catalog, Utc::now());
            let record = coord.record_damage(user_id, lap, slot, damage, note)?;
            Ok((record, coord.into_notices()))
        })
    }

    /// # Errors
    ///
    /// See [`AttackCoordinator::complete_attack`].
    #[allow(clippy::too_many_arguments)]
    pub fn complete_attack(
        &self,
        group_id: GroupId,
        user_id: UserId,
        lap: u32,
        slot: usize,
        damage_override: Option<u64>,
        credit_selection: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<AttackOutcome, ClanError> {
        self.transact(group_id, |clan, catalog| {
            let mut coord = AttackCoordinator::new(clan, catalog, now);
            let outcome =
                coord.complete_attack(user_id, lap, slot, damage_override, credit_selection)?;
            Ok((outcome, coord.into_notices()))
        })
    }

    /// # Errors
    ///
    /// See [`AttackCoordinator::finish_boss`].
    pub fn finish_boss(
        &self,
        group_id: GroupId,
        user_id: UserId,
        lap: u32,
        slot: usize,
        credit_selection: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<AttackOutcome, ClanError> {
        self.transact(group_id, |clan, catalog| {
            let mut coord = AttackCoordinator::new(clan, catalog, now);
            let outcome = coord.finish_boss(user_id, lap, slot, credit_selection)?;
            Ok((outcome, coord.into_notices()))
        })
    }

    /// # Errors
    ///
    /// See [`UndoLedger::undo_last`].
    pub fn undo_last(&self, group_id: GroupId, user_id: UserId) -> Result<UndoOutcome, ClanError> {
        self.transact(group_id, |clan, _| {
            let mut ledger = UndoLedger::new(clan);
            let outcome = ledger.undo_last(user_id)?;
            Ok((outcome, ledger.into_notices()))
        })
    }

    /// # Errors
    ///
    /// See [`ReservationBook::reserve`].
    pub fn reserve(
        &self,
        group_id: GroupId,
        user_id: UserId,
        slot: usize,
        kind: AttackKind,
        now: DateTime<Utc>,
    ) -> Result<ReservationRecord, ClanError> {
        self.transact(group_id, |clan, _| {
            let mut book = ReservationBook::new(clan, now);
            let reservation = book.reserve(user_id, slot, kind)?;
            Ok((reservation, book.into_notices()))
        })
    }

    /// # Errors
    ///
    /// See [`ReservationBook::cancel`].
    pub fn cancel_reservation(
        &self,
        group_id: GroupId,
        user_id: UserId,
        slot: usize,
        selection: Option<usize>,
    ) -> Result<ReservationRecord, ClanError> {
        self.transact(group_id, |clan, _| {
            let mut book = ReservationBook::new(clan, Utc::now());
            let reservation = book.cancel(user_id, slot, selection)?;
            Ok((reservation, book.into_notices()))
        })
    }

    /// # Errors
    ///
    /// See [`ReservationBook::configure`].
    pub fn configure_reservation(
        &self,
        group_id: GroupId,
        user_id: UserId,
        slot: usize,
        selection: Option<usize>,
        update: ReservationUpdate,
    ) -> Result<ReservationRecord, ClanError> {
        self.transact(group_id, |clan, _| {
            let mut book = ReservationBook::new(clan, Utc::now());
            let reservation = book.configure(user_id, slot, selection, update)?;
            Ok((reservation, book.into_notices()))
        })
    }

    /// # Errors
    ///
    /// [`ClanError::UnknownGroup`] or [`ClanError::PersistenceFailure`].
    pub fn rollover_lap(&self, group_id: GroupId, new_lap: u32) -> Result<RolloverReport, ClanError> {
        let retention = self.config.retention_laps;
        self.transact(group_id, |clan, catalog| {
            let report = rollover::rollover_lap(clan, new_lap, retention, catalog);
            let notices = report.notices();
            Ok((report, notices))
        })
    }

    /// # Errors
    ///
    /// [`ClanError::UnknownGroup`] or [`ClanError::PersistenceFailure`].
    pub fn rollover_day(&self, group_id: GroupId) -> Result<RolloverReport, ClanError> {
        let retention = self.config.retention_laps;
        self.transact(group_id, |clan, _| {
            let report = rollover::rollover_day(clan, retention);
            let notices = report.notices();
            Ok((report, notices))
        })
    }

    /// Roll the clan into a new battle day if `now` has crossed the reset hour.
    ///
    /// # Errors
    ///
    /// [`ClanError::UnknownGroup`] or [`ClanError::PersistenceFailure`].
    pub fn check_day(
        &self,
        group_id: GroupId,
        now: DateTime<Utc>,
    ) -> Result<Option<RolloverReport>, ClanError> {
        let today = self.config.battle_day(now);
        let retention = self.config.retention_laps;
        self.transact(group_id, |clan, _| {
            let report = rollover::check_day(clan, today, retention);
            let notices = report.as_ref().map(RolloverReport::notices).unwrap_or_default();
            Ok((report, notices))
        })
    }

    /// Add members; existing members are left untouched.
    ///
    /// Returns the ids that were new.
    ///
    /// # Errors
    ///
    /// [`ClanError::UnknownGroup`] or [`ClanError::PersistenceFailure`].
    pub fn add_players(
        &self,
        group_id: GroupId,
        user_ids: &[UserId],
    ) -> Result<Vec<UserId>, ClanError> {
        self.transact(group_id, |clan, _| {
            let mut added = Vec::new();
            for &user_id in user_ids {
                if !clan.players.contains_key(&user_id) {
                    clan.players.insert(user_id, Player::new(user_id));
                    added.push(user_id);
                }
            }
            let notices = if added.is_empty() {
                Vec::new()
            } else {
                vec![ChangeNotice::PlayerRemaining]
            };
            Ok((added, notices))
        })
    }

    /// Remove a member together with their records, reservations and credits.
    ///
    /// # Errors
    ///
    /// [`ClanError::UnknownPlayer`], [`ClanError::UnknownGroup`] or
    /// [`ClanError::PersistenceFailure`].
    pub fn remove_player(&self, group_id: GroupId, user_id: UserId) -> Result<Player, ClanError> {
        self.transact(group_id, |clan, _| {
            let removed = clan
                .remove_player(user_id)
                .ok_or(ClanError::UnknownPlayer { group_id, user_id })?;
            let mut notices = vec![ChangeNotice::PlayerRemaining];
            notices.extend((0..BOSS_SLOTS).map(|slot| ChangeNotice::Reservations { slot }));
            for &lap in clan.laps.keys() {
                notices.extend((0..BOSS_SLOTS).map(|slot| ChangeNotice::BossProgress { lap, slot }));
            }
            Ok((removed, notices))
        })
    }

    /// # Errors
    ///
    /// [`ClanError::UnknownPlayer`], [`ClanError::UnknownGroup`] or
    /// [`ClanError::PersistenceFailure`].
    pub fn set_task_kill(
        &self,
        group_id: GroupId,
        user_id: UserId,
        task_kill: bool,
    ) -> Result<(), ClanError> {
        self.transact(group_id, |clan, _| {
            clan.player_mut(user_id)?.task_kill = task_kill;
            Ok(((), vec![ChangeNotice::PlayerRemaining]))
        })
    }

    /// Register how much battle time one of the player's credits is worth.
    ///
    /// # Errors
    ///
    /// As [`select_credit_index`], plus [`ClanError::UnknownPlayer`],
    /// [`ClanError::UnknownGroup`] or [`ClanError::PersistenceFailure`].
    pub fn set_carry_over_seconds(
        &self,
        group_id: GroupId,
        user_id: UserId,
        seconds: u32,
        selection: Option<usize>,
    ) -> Result<CarryOverCredit, ClanError> {
        self.transact(group_id, |clan, _| {
            let player = clan.player_mut(user_id)?;
            let index = select_credit_index(player, selection)?;
            let credit = &mut player.carry_overs[index];
            credit.seconds = seconds;
            Ok((credit.clone(), vec![ChangeNotice::PlayerRemaining]))
        })
    }

    /// # Errors
    ///
    /// [`ClanError::UnknownPlayer`], [`ClanError::UnknownGroup`] or
    /// [`ClanError::PersistenceFailure`].
    pub fn set_limit_time(
        &self,
        group_id: GroupId,
        user_id: UserId,
        text: Option<String>,
    ) -> Result<(), ClanError> {
        self.transact(group_id, |clan, _| {
            clan.player_mut(user_id)?.limit_time_text = text;
            Ok(((), vec![ChangeNotice::PlayerRemaining]))
        })
    }
}
