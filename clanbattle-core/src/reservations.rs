//! Per-slot reservation lists.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClanError;
use crate::model::{AttackKind, ReservationRecord, UserId};
use crate::notify::ChangeNotice;
use crate::state::{ClanState, check_slot};

const CANCEL_PROMPT: &str = "choose the reservation to cancel";
const CONFIGURE_PROMPT: &str = "choose the reservation to update";

/// New expectations for an existing reservation. `None` keeps the value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationUpdate {
    pub damage: Option<u64>,
    pub note: Option<String>,
    pub carry_over: Option<bool>,
}

pub struct ReservationBook<'a> {
    clan: &'a mut ClanState,
    now: DateTime<Utc>,
    notices: Vec<ChangeNotice>,
}

impl<'a> ReservationBook<'a> {
    pub const fn new(clan: &'a mut ClanState, now: DateTime<Utc>) -> Self {
        Self {
            clan,
            now,
            notices: Vec::new(),
        }
    }

    #[must_use]
    pub fn into_notices(self) -> Vec<ChangeNotice> {
        self.notices
    }

    /// Book an intended attack. Players may hold any number of reservations.
    ///
    /// # Errors
    ///
    /// Returns [`ClanError::UnknownPlayer`] or [`ClanError::InvalidSlot`].
    pub fn reserve(
        &mut self,
        user_id: UserId,
        slot: usize,
        kind: AttackKind,
    ) -> Result<ReservationRecord, ClanError> {
        self.clan.player(user_id)?;
        check_slot(slot)?;
        let reservation = ReservationRecord {
            id: self.clan.next_record_id(),
            user_id,
            slot,
            kind,
            damage: 0,
            note: String::new(),
            carry_over: kind.is_carry_over(),
            created_at: self.now,
        };
        self.clan.reservations[slot].push(reservation.clone());
        self.notices.push(ChangeNotice::Reservations { slot });
        Ok(reservation)
    }

    /// Remove one of the player's reservations on `slot`.
    ///
    /// # Errors
    ///
    /// [`ClanError::NoReservation`] if none is held,
    /// [`ClanError::AmbiguousSelection`] if several are held and no selection
    /// was given, [`ClanError::InvalidSelection`] for an out-of-range index.
    pub fn cancel(
        &mut self,
        user_id: UserId,
        slot: usize,
        selection: Option<usize>,
    ) -> Result<ReservationRecord, ClanError> {
        let index = self.pick(user_id, slot, selection, CANCEL_PROMPT)?;
        let removed = self.clan.reservations[slot].remove(index);
        self.notices.push(ChangeNotice::Reservations { slot });
        Ok(removed)
    }

    /// Change the expected damage, note or carry-over flag of a reservation.
    ///
    /// # Errors
    ///
    /// Same selection rules as [`ReservationBook::cancel`].
    pub fn configure(
        &mut self,
        user_id: UserId,
        slot: usize,
        selection: Option<usize>,
        update: ReservationUpdate,
    ) -> Result<ReservationRecord, ClanError> {
        let index = self.pick(user_id, slot, selection, CONFIGURE_PROMPT)?;
        let reservation = &mut self.clan.reservations[slot][index];
        if let Some(damage) = update.damage {
            reservation.damage = damage;
        }
        if let Some(note) = update.note {
            reservation.note = note;
        }
        if let Some(carry_over) = update.carry_over {
            reservation.carry_over = carry_over;
        }
        let reservation = reservation.clone();
        self.notices.push(ChangeNotice::Reservations { slot });
        Ok(reservation)
    }

    /// Drop reservations an attack has made obsolete.
    ///
    /// Removes one reservation matching the attack, then every non-carry-over
    /// reservation if the player has no attacks left, and every carry-over
    /// reservation if the player holds no credits.
    pub fn reconcile_after_attack(
        &mut self,
        user_id: UserId,
        slot: usize,
        kind: AttackKind,
    ) -> Vec<ReservationRecord> {
        let mut removed = Vec::new();
        if let Some(list) = self.clan.reservations.get_mut(slot)
            && let Some(index) = list
                .iter()
                .position(|reservation| reservation.matches_attack(user_id, kind))
        {
            removed.push(list.remove(index));
        }

        let (exhausted, no_credits) = self
            .clan
            .players
            .get(&user_id)
            .map_or((true, true), |player| {
                (player.attacks_exhausted(), player.carry_overs.is_empty())
            });
        if exhausted || no_credits {
            for list in &mut self.clan.reservations {
                let (purged, kept): (Vec<_>, Vec<_>) =
                    std::mem::take(list).into_iter().partition(|reservation| {
                        reservation.user_id == user_id
                            && ((exhausted && !reservation.carry_over)
                                || (no_credits && reservation.carry_over))
                    });
                *list = kept;
                removed.extend(purged);
            }
        }

        let mut slots: Vec<usize> = removed.iter().map(|reservation| reservation.slot).collect();
        slots.sort_unstable();
        slots.dedup();
        self.notices
            .extend(slots.into_iter().map(|slot| ChangeNotice::Reservations { slot }));
        removed
    }

    /// The player's reservations on `slot`, in booking order.
    #[must_use]
    pub fn held(&self, user_id: UserId, slot: usize) -> Vec<&ReservationRecord> {
        self.clan
            .reservations
            .get(slot)
            .map(|list| {
                list.iter()
                    .filter(|reservation| reservation.user_id == user_id)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn pick(
        &self,
        user_id: UserId,
        slot: usize,
        selection: Option<usize>,
        prompt: &str,
    ) -> Result<usize, ClanError> {
        self.clan.player(user_id)?;
        check_slot(slot)?;
        let positions: Vec<usize> = self.clan.reservations[slot]
            .iter()
            .enumerate()
            .filter(|(_, reservation)| reservation.user_id == user_id)
            .map(|(index, _)| index)
            .collect();
        match (positions.as_slice(), selection) {
            ([], _) => Err(ClanError::NoReservation { user_id, slot }),
            ([only], None) => Ok(*only),
            (_, None) => Err(ClanError::AmbiguousSelection {
                prompt: prompt.to_string(),
                candidates: positions
                    .iter()
                    .map(|&index| self.clan.reservations[slot][index].label())
                    .collect(),
            }),
            (_, Some(index)) => positions.get(index).copied().ok_or(
                ClanError::InvalidSelection {
                    index,
                    len: positions.len(),
                },
            ),
        }
    }
}

/// Total reservations across every slot.
#[must_use]
pub fn reservation_count(clan: &ClanState) -> usize {
    clan.reservations.iter().map(Vec::len).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClanConfig;
    use crate::model::Player;

    fn clan() -> ClanState {
        let mut clan = ClanState::new(4, ClanConfig::default());
        clan.players.insert(1, Player::new(1));
        clan.players.insert(2, Player::new(2));
        clan
    }

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    #[test]
    fn reserve_sets_carry_over_flag_from_kind() {
        let mut clan = clan();
        let mut book = ReservationBook::new(&mut clan, now());
        assert!(!book.reserve(1, 0, AttackKind::Magic).unwrap().carry_over);
        assert!(book.reserve(1, 0, AttackKind::CarryOver).unwrap().carry_over);
        assert_eq!(book.held(1, 0).len(), 2);
        assert_eq!(
            book.reserve(1, 5, AttackKind::Magic).unwrap_err(),
            ClanError::InvalidSlot { slot: 5 }
        );
    }

    #[test]
    fn cancel_requires_a_choice_between_several() {
        let mut clan = clan();
        let mut book = ReservationBook::new(&mut clan, now());
        assert_eq!(
            book.cancel(1, 2, None).unwrap_err(),
            ClanError::NoReservation { user_id: 1, slot: 2 }
        );
        book.reserve(1, 2, AttackKind::Physical).unwrap();
        book.reserve(2, 2, AttackKind::Physical).unwrap();
        let second = book.reserve(1, 2, AttackKind::Magic).unwrap();

        match book.cancel(1, 2, None).unwrap_err() {
            ClanError::AmbiguousSelection { candidates, .. } => assert_eq!(candidates.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            book.cancel(1, 2, Some(2)).unwrap_err(),
            ClanError::InvalidSelection { index: 2, len: 2 }
        );
        assert_eq!(book.cancel(1, 2, Some(1)).unwrap(), second);
        assert_eq!(book.held(2, 2).len(), 1);
    }

    #[test]
    fn configure_updates_only_given_fields() {
        let mut clan = clan();
        let mut book = ReservationBook::new(&mut clan, now());
        book.reserve(1, 3, AttackKind::Physical).unwrap();
        let updated = book
            .configure(
                1,
                3,
                None,
                ReservationUpdate {
                    damage: Some(800),
                    note: Some("after 2nd".into()),
                    carry_over: None,
                },
            )
            .unwrap();
        assert_eq!(updated.damage, 800);
        assert_eq!(updated.note, "after 2nd");
        assert!(!updated.carry_over);
    }

    #[test]
    fn reconcile_removes_matching_then_purges() {
        let mut clan = clan();
        let mut book = ReservationBook::new(&mut clan, now());
        book.reserve(1, 0, AttackKind::Physical).unwrap();
        book.reserve(1, 0, AttackKind::Physical).unwrap();
        book.reserve(1, 4, AttackKind::Magic).unwrap();
        book.reserve(1, 1, AttackKind::CarryOver).unwrap();
        book.reserve(2, 1, AttackKind::CarryOver).unwrap();
        let removed = book.reconcile_after_attack(1, 0, AttackKind::Physical);
        // player 1 holds no credits, so their carry-over booking goes too
        assert_eq!(removed.len(), 2);
        assert_eq!(book.held(1, 0).len(), 1);
        assert_eq!(book.held(2, 1).len(), 1);

        clan.player_mut(1).unwrap().physics_attacks = 3;
        let mut book = ReservationBook::new(&mut clan, now());
        let removed = book.reconcile_after_attack(1, 2, AttackKind::Physical);
        assert_eq!(removed.len(), 2);
        assert_eq!(reservation_count(&clan), 1);
    }
}
