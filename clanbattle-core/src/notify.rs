//! Change notifications for display collaborators.
use serde::{Deserialize, Serialize};

use crate::model::GroupId;

/// What part of a clan's state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeNotice {
    BossProgress { lap: u32, slot: usize },
    Reservations { slot: usize },
    PlayerRemaining,
}

/// Subscriber interface for hosts that render clan state.
///
/// Notices are only delivered after the change has been committed.
pub trait ClanObserver: Send + Sync {
    fn on_boss_progress_changed(&self, _group_id: GroupId, _lap: u32, _slot: usize) {}

    fn on_reservations_changed(&self, _group_id: GroupId, _slot: usize) {}

    fn on_player_remaining_changed(&self, _group_id: GroupId) {}
}

/// Sort, dedupe and deliver notices to one observer.
pub fn dispatch(observer: &dyn ClanObserver, group_id: GroupId, notices: &[ChangeNotice]) {
    let mut unique = notices.to_vec();
    unique.sort_unstable();
    unique.dedup();
    for notice in unique {
        match notice {
            ChangeNotice::BossProgress { lap, slot } => {
                observer.on_boss_progress_changed(group_id, lap, slot);
            }
            ChangeNotice::Reservations { slot } => {
                observer.on_reservations_changed(group_id, slot);
            }
            ChangeNotice::PlayerRemaining => observer.on_player_remaining_changed(group_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl ClanObserver for Recorder {
        fn on_boss_progress_changed(&self, group_id: GroupId, lap: u32, slot: usize) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("boss {group_id} {lap} {slot}"));
        }

        fn on_player_remaining_changed(&self, group_id: GroupId) {
            self.seen.lock().unwrap().push(format!("remain {group_id}"));
        }
    }

    #[test]
    fn dispatch_dedupes_and_skips_default_hooks() {
        let recorder = Recorder::default();
        dispatch(
            &recorder,
            3,
            &[
                ChangeNotice::PlayerRemaining,
                ChangeNotice::BossProgress { lap: 1, slot: 2 },
                ChangeNotice::Reservations { slot: 0 },
                ChangeNotice::BossProgress { lap: 1, slot: 2 },
            ],
        );
        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["boss 3 1 2", "remain 3"]);
    }
}
