//! Attack declaration, completion and boss defeat.
//!
//! The coordinator validates a request completely before it touches the
//! clan, so an `Err` always leaves the state exactly as it was.
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::BossCatalog;
use crate::constants::{BOSS_SLOTS, MAX_CARRY_OVERS};
use crate::error::ClanError;
use crate::model::{
    AttackKind, AttackRecord, CarryOverCredit, LogEntry, Player, ReservationRecord, UserId,
};
use crate::notify::ChangeNotice;
use crate::reservations::ReservationBook;
use crate::state::ClanState;

const CREDIT_PROMPT: &str = "choose the carry-over credit to use";

/// A credit spent by a carry-over attack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumedCredit {
    pub credit: CarryOverCredit,
    /// Battle time the credit grants.
    pub seconds: u32,
}

/// Result of completing an attack or finishing a boss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttackOutcome {
    pub lap: u32,
    pub slot: usize,
    pub record: AttackRecord,
    pub consumed: Option<ConsumedCredit>,
    pub issued: Option<CarryOverCredit>,
    /// A credit was earned but the player already held the maximum.
    pub credit_dropped: bool,
    pub defeated: bool,
    pub next_lap_created: bool,
    pub reservations_removed: Vec<ReservationRecord>,
}

/// Index of the credit a carry-over attack consumes.
///
/// # Errors
///
/// [`ClanError::InvalidCredit`] when no credit is held,
/// [`ClanError::AmbiguousSelection`] when several are held and no selection
/// was given, [`ClanError::NoCreditAvailable`] when the selection is stale.
pub fn select_credit_index(player: &Player, selection: Option<usize>) -> Result<usize, ClanError> {
    let held = player.carry_overs.len();
    match (held, selection) {
        (0, _) => Err(ClanError::InvalidCredit {
            user_id: player.user_id,
        }),
        (_, Some(index)) if index < held => Ok(index),
        (_, Some(_)) => Err(ClanError::NoCreditAvailable {
            user_id: player.user_id,
        }),
        (1, None) => Ok(0),
        (_, None) => Err(ClanError::AmbiguousSelection {
            prompt: CREDIT_PROMPT.to_string(),
            candidates: player.carry_overs.iter().map(CarryOverCredit::label).collect(),
        }),
    }
}

pub struct AttackCoordinator<'a, C: BossCatalog + ?Sized> {
    clan: &'a mut ClanState,
    catalog: &'a C,
    now: DateTime<Utc>,
    notices: Vec<ChangeNotice>,
}

impl<'a, C: BossCatalog + ?Sized> AttackCoordinator<'a, C> {
    pub const fn new(clan: &'a mut ClanState, catalog: &'a C, now: DateTime<Utc>) -> Self {
        Self {
            clan,
            catalog,
            now,
            notices: Vec::new(),
        }
    }

    /// Notices accumulated by the transitions applied so far.
    #[must_use]
    pub fn into_notices(self) -> Vec<ChangeNotice> {
        self.notices
    }

    /// Register a pending attack against a boss.
    ///
    /// # Errors
    ///
    /// Fails without side effects if the player or lap is unknown, the player
    /// already has a pending attack on that boss, has no attacks left, or
    /// declares a carry-over without holding a credit.
    pub fn declare(
        &mut self,
        user_id: UserId,
        lap: u32,
        slot: usize,
        kind: AttackKind,
    ) -> Result<AttackRecord, ClanError> {
        let player = self.clan.player(user_id)?;
        let boss = self.clan.boss(lap, slot)?;
        if boss.pending_for(user_id).is_some() {
            return Err(ClanError::AlreadyDeclared { user_id, lap, slot });
        }
        if kind.is_carry_over() {
            if player.carry_overs.is_empty() {
                return Err(ClanError::InvalidCredit { user_id });
            }
        } else if player.attacks_exhausted() {
            return Err(ClanError::AttacksExhausted { user_id });
        }
        let damage = boss.max_hp;

        let record = AttackRecord {
            id: self.clan.next_record_id(),
            user_id,
            kind,
            damage,
            note: String::new(),
            declared_at: self.now,
            completed: false,
        };
        self.clan.boss_mut(lap, slot)?.attacks.push(record.clone());
        self.clan.player_mut(user_id)?.undo_entry = Some(LogEntry::Declare {
            lap,
            slot,
            record: record.id,
        });
        log::debug!(
            "group {}: player {user_id} declared {kind} on lap {lap} boss {slot}",
            self.clan.group_id
        );
        self.notices.push(ChangeNotice::BossProgress { lap, slot });
        Ok(record)
    }

    /// Store a reported damage figure on the player's pending attack.
    ///
    /// Without a lap, the newest lap holding a pending attack for that boss is
    /// used.
    ///
    /// # Errors
    ///
    /// Returns [`ClanError::NotDeclared`] if no pending attack exists.
    pub fn record_damage(
        &mut self,
        user_id: UserId,
        lap: Option<u32>,
        slot: usize,
        damage: u64,
        note: Option<&str>,
    ) -> Result<AttackRecord, ClanError> {
        self.clan.player(user_id)?;
        crate::state::check_slot(slot)?;
        let lap = match lap {
            Some(lap) => lap,
            None => self.clan.pending_lap(user_id, slot).ok_or(ClanError::NotDeclared {
                user_id,
                lap: self.clan.latest_lap(),
                slot,
            })?,
        };
        let boss = self.clan.boss_mut(lap, slot)?;
        let index = boss
            .pending_index(user_id)
            .ok_or(ClanError::NotDeclared { user_id, lap, slot })?;
        let record = &mut boss.attacks[index];
        record.damage = damage;
        if let Some(note) = note {
            record.note = note.to_string();
        }
        let record = record.clone();
        self.notices.push(ChangeNotice::BossProgress { lap, slot });
        Ok(record)
    }

    /// Complete a pending attack without defeating the boss.
    ///
    /// # Errors
    ///
    /// See [`AttackCoordinator::declare`] and [`select_credit_index`];
    /// [`ClanError::NotDeclared`] if nothing is pending.
    pub fn complete_attack(
        &mut self,
        user_id: UserId,
        lap: u32,
        slot: usize,
        damage_override: Option<u64>,
        credit_selection: Option<usize>,
    ) -> Result<AttackOutcome, ClanError> {
        self.conclude(user_id, lap, slot, damage_override, credit_selection, false)
    }

    /// Complete a pending attack as the final blow.
    ///
    /// # Errors
    ///
    /// [`ClanError::AlreadyDefeated`] if the boss is already down, otherwise
    /// as [`AttackCoordinator::complete_attack`].
    pub fn finish_boss(
        &mut self,
        user_id: UserId,
        lap: u32,
        slot: usize,
        credit_selection: Option<usize>,
    ) -> Result<AttackOutcome, ClanError> {
        self.conclude(user_id, lap, slot, None, credit_selection, true)
    }

    fn conclude(
        &mut self,
        user_id: UserId,
        lap: u32,
        slot: usize,
        damage_override: Option<u64>,
        credit_selection: Option<usize>,
        finishing: bool,
    ) -> Result<AttackOutcome, ClanError> {
        let player = self.clan.player(user_id)?;
        let boss = self.clan.boss(lap, slot)?;
        if finishing && boss.defeated {
            return Err(ClanError::AlreadyDefeated { lap, slot });
        }
        let index = boss
            .pending_index(user_id)
            .ok_or(ClanError::NotDeclared { user_id, lap, slot })?;
        let kind = boss.attacks[index].kind;
        let prior_damage = boss.attacks[index].damage;
        let damage = damage_override.unwrap_or(prior_damage);
        let remaining_before = boss.remaining_hp();
        let was_defeated = boss.defeated;

        let credit_index = if kind.is_carry_over() {
            Some(select_credit_index(player, credit_selection)?)
        } else if player.attacks_exhausted() {
            return Err(ClanError::AttacksExhausted { user_id });
        } else {
            None
        };
        let snapshot = player.snapshot();
        let earns_credit = !kind.is_carry_over() && (finishing || damage > remaining_before);
        let credit_dropped = earns_credit && player.carry_overs.len() >= MAX_CARRY_OVERS;
        let credit_id = (earns_credit && !credit_dropped).then(|| self.clan.next_record_id());

        let boss = self.clan.boss_mut(lap, slot)?;
        if finishing {
            boss.defeated = true;
        }
        let defeated = boss.defeated;
        let record = &mut boss.attacks[index];
        record.damage = damage;
        record.completed = true;
        let record = record.clone();

        let player = self.clan.player_mut(user_id)?;
        let consumed = credit_index.map(|index| {
            let credit = player.carry_overs.remove(index);
            ConsumedCredit {
                seconds: credit.resolved_seconds(),
                credit,
            }
        });
        player.record_attack(kind);
        let issued = credit_id.map(|id| CarryOverCredit {
            id,
            kind,
            source_slot: slot,
            seconds: 0,
            created_at: self.now,
            issued_remaining_hp: remaining_before,
            issued_damage: damage,
        });
        if let Some(credit) = &issued {
            player.push_credit(credit.clone());
        }
        player.undo_entry = Some(if finishing {
            LogEntry::LastAttack {
                lap,
                slot,
                record: record.id,
                snapshot,
                was_defeated,
                prior_damage: Some(prior_damage),
            }
        } else {
            LogEntry::Attack {
                lap,
                slot,
                record: record.id,
                snapshot,
                prior_damage: Some(prior_damage),
            }
        });
        if credit_dropped {
            log::debug!("player {user_id} already holds {MAX_CARRY_OVERS} credits; new credit dropped");
        }

        let next_lap = lap.saturating_add(1);
        let next_lap_created = finishing && self.clan.ensure_lap(next_lap, self.catalog);
        if next_lap_created {
            self.notices
                .extend((0..BOSS_SLOTS).map(|slot| ChangeNotice::BossProgress { lap: next_lap, slot }));
        }

        let mut book = ReservationBook::new(&mut *self.clan, self.now);
        let reservations_removed = book.reconcile_after_attack(user_id, slot, kind);
        self.notices.extend(book.into_notices());
        self.notices.push(ChangeNotice::BossProgress { lap, slot });
        self.notices.push(ChangeNotice::PlayerRemaining);

        log::debug!(
            "group {}: player {user_id} {} lap {lap} boss {slot} for {damage}",
            self.clan.group_id,
            if finishing { "defeated" } else { "attacked" }
        );
        Ok(AttackOutcome {
            lap,
            slot,
            record,
            consumed,
            issued,
            credit_dropped,
            defeated,
            next_lap_created,
            reservations_removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::HpTable;
    use crate::config::ClanConfig;

    fn clan() -> ClanState {
        let mut clan = ClanState::new(1, ClanConfig::default());
        clan.ensure_lap(1, &HpTable::default());
        clan.players.insert(7, Player::new(7));
        clan
    }

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    #[test]
    fn declare_then_complete_counts_the_attack() {
        let mut clan = clan();
        let table = HpTable::default();
        let mut coord = AttackCoordinator::new(&mut clan, &table, now());
        let record = coord.declare(7, 1, 0, AttackKind::Physical).unwrap();
        assert_eq!(record.damage, 1_200);
        let outcome = coord.complete_attack(7, 1, 0, Some(500), None).unwrap();
        assert!(outcome.issued.is_none());
        assert!(!outcome.defeated);
        let notices = coord.into_notices();
        assert!(notices.contains(&ChangeNotice::PlayerRemaining));

        assert_eq!(clan.player(7).unwrap().physics_attacks, 1);
        assert_eq!(clan.boss(1, 0).unwrap().remaining_hp(), 700);
    }

    #[test]
    fn duplicate_declaration_is_rejected() {
        let mut clan = clan();
        let table = HpTable::default();
        let mut coord = AttackCoordinator::new(&mut clan, &table, now());
        coord.declare(7, 1, 2, AttackKind::Magic).unwrap();
        assert_eq!(
            coord.declare(7, 1, 2, AttackKind::Magic).unwrap_err(),
            ClanError::AlreadyDeclared {
                user_id: 7,
                lap: 1,
                slot: 2
            }
        );
    }

    #[test]
    fn over_damage_issues_a_credit_without_defeating() {
        let mut clan = clan();
        let table = HpTable::default();
        let mut coord = AttackCoordinator::new(&mut clan, &table, now());
        coord.declare(7, 1, 0, AttackKind::Magic).unwrap();
        let outcome = coord.complete_attack(7, 1, 0, Some(1_300), None).unwrap();
        let credit = outcome.issued.unwrap();
        assert_eq!(credit.resolved_seconds(), 27);
        assert!(!clan.boss(1, 0).unwrap().defeated);
        assert_eq!(clan.player(7).unwrap().carry_overs.len(), 1);
    }

    #[test]
    fn finishing_creates_the_next_lap() {
        let mut clan = clan();
        let table = HpTable::default();
        let mut coord = AttackCoordinator::new(&mut clan, &table, now());
        coord.declare(7, 1, 4, AttackKind::Physical).unwrap();
        let outcome = coord.finish_boss(7, 1, 4, None).unwrap();
        assert!(outcome.defeated);
        assert!(outcome.next_lap_created);
        assert!(outcome.issued.is_some());
        assert_eq!(clan.boss(2, 4).unwrap().max_hp, 3_000);
        assert!(matches!(
            clan.player(7).unwrap().undo_entry,
            Some(LogEntry::LastAttack {
                was_defeated: false,
                ..
            })
        ));
    }

    #[test]
    fn finishing_a_defeated_boss_fails() {
        let mut clan = clan();
        clan.boss_mut(1, 1).unwrap().defeated = true;
        let table = HpTable::default();
        let mut coord = AttackCoordinator::new(&mut clan, &table, now());
        coord.declare(7, 1, 1, AttackKind::Physical).unwrap();
        assert_eq!(
            coord.finish_boss(7, 1, 1, None).unwrap_err(),
            ClanError::AlreadyDefeated { lap: 1, slot: 1 }
        );
    }

    #[test]
    fn short_final_blow_leaves_no_hp_for_later_attackers() {
        let mut clan = clan();
        clan.players.insert(8, Player::new(8));
        let table = HpTable::default();
        let mut coord = AttackCoordinator::new(&mut clan, &table, now());
        coord.declare(7, 1, 0, AttackKind::Physical).unwrap();
        coord.declare(8, 1, 0, AttackKind::Magic).unwrap();
        coord.record_damage(7, Some(1), 0, 500, None).unwrap();
        coord.finish_boss(7, 1, 0, None).unwrap();

        let late = coord.complete_attack(8, 1, 0, Some(600), None).unwrap();
        assert!(late.defeated);
        let credit = late.issued.unwrap();
        assert_eq!(credit.issued_remaining_hp, 0);
        assert_eq!(clan.boss(1, 0).unwrap().remaining_hp(), 0);
    }

    #[test]
    fn exhausted_players_cannot_declare() {
        let mut clan = clan();
        clan.player_mut(7).unwrap().magic_attacks = 3;
        let table = HpTable::default();
        let mut coord = AttackCoordinator::new(&mut clan, &table, now());
        assert_eq!(
            coord.declare(7, 1, 0, AttackKind::Physical).unwrap_err(),
            ClanError::AttacksExhausted { user_id: 7 }
        );
    }

    #[test]
    fn credit_selection_rules() {
        let mut player = Player::new(3);
        assert_eq!(
            select_credit_index(&player, None),
            Err(ClanError::InvalidCredit { user_id: 3 })
        );
        for id in 0..2 {
            player.push_credit(CarryOverCredit {
                id: crate::model::RecordId(id),
                kind: AttackKind::Physical,
                source_slot: 0,
                seconds: 30,
                created_at: now(),
                issued_remaining_hp: 0,
                issued_damage: 0,
            });
        }
        let err = select_credit_index(&player, None).unwrap_err();
        assert!(err.needs_selection());
        assert_eq!(select_credit_index(&player, Some(1)), Ok(1));
        assert_eq!(
            select_credit_index(&player, Some(2)),
            Err(ClanError::NoCreditAvailable { user_id: 3 })
        );
    }

    #[test]
    fn record_damage_targets_the_newest_pending_lap() {
        let mut clan = clan();
        let table = HpTable::default();
        clan.ensure_lap(2, &table);
        let mut coord = AttackCoordinator::new(&mut clan, &table, now());
        coord.declare(7, 2, 3, AttackKind::Physical).unwrap();
        let record = coord.record_damage(7, None, 3, 640, Some("60s")).unwrap();
        assert_eq!(record.damage, 640);
        assert_eq!(record.note, "60s");
        assert!(matches!(
            coord.record_damage(7, None, 0, 1, None),
            Err(ClanError::NotDeclared { slot: 0, .. })
        ));
    }
}
