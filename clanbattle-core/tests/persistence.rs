use chrono::Utc;
use clanbattle_core::{
    AttackKind, CatalogHandle, ClanConfig, ClanError, ClanObserver, ClanRegistry, ClanStore,
    EngineConfig, GroupId, JsonFileStore, MemoryStore, ReservationUpdate, StoreWrite,
};
use std::path::PathBuf;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl ClanObserver for Recorder {
    fn on_boss_progress_changed(&self, group_id: GroupId, lap: u32, slot: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("boss:{group_id}:{lap}:{slot}"));
    }

    fn on_reservations_changed(&self, group_id: GroupId, slot: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("reservations:{group_id}:{slot}"));
    }

    fn on_player_remaining_changed(&self, group_id: GroupId) {
        self.events
            .lock()
            .unwrap()
            .push(format!("remaining:{group_id}"));
    }
}

fn memory_registry() -> ClanRegistry<MemoryStore> {
    let registry = ClanRegistry::load(
        MemoryStore::new(),
        CatalogHandle::default(),
        EngineConfig::default(),
    )
    .unwrap();
    registry.provision(1, ClanConfig::labelled("one")).unwrap();
    registry.add_players(1, &[10, 11]).unwrap();
    registry
}

fn temp_db(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "clanbattle-it-{name}-{}-{}.json",
        std::process::id(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ))
}

#[test]
fn every_operation_rolls_back_on_commit_failure() {
    let registry = memory_registry();
    registry
        .declare(1, 10, 1, 0, AttackKind::Physical, Utc::now())
        .unwrap();
    registry
        .reserve(1, 11, 2, AttackKind::Magic, Utc::now())
        .unwrap();
    let before = registry.snapshot(1).unwrap();

    type Op = Box<dyn Fn(&ClanRegistry<MemoryStore>) -> Result<(), ClanError>>;
    let ops: Vec<Op> = vec![
        Box::new(|r| r.finish_boss(1, 10, 1, 0, None, Utc::now()).map(drop)),
        Box::new(|r| {
            r.complete_attack(1, 10, 1, 0, Some(5_000), None, Utc::now())
                .map(drop)
        }),
        Box::new(|r| r.undo_last(1, 10).map(drop)),
        Box::new(|r| r.cancel_reservation(1, 11, 2, None).map(drop)),
        Box::new(|r| {
            let update = ReservationUpdate {
                damage: Some(777),
                ..ReservationUpdate::default()
            };
            r.configure_reservation(1, 11, 2, None, update).map(drop)
        }),
        Box::new(|r| r.rollover_lap(1, 4).map(drop)),
        Box::new(|r| r.rollover_day(1).map(drop)),
        Box::new(|r| r.remove_player(1, 11).map(drop)),
        Box::new(|r| r.set_task_kill(1, 11, true)),
        Box::new(|r| r.set_limit_time(1, 11, Some("after 21:00".into()))),
        Box::new(|r| r.add_players(1, &[12]).map(drop)),
    ];
    for op in ops {
        registry.store().fail_next_commits(1);
        let err = op(&registry).unwrap_err();
        assert!(matches!(err, ClanError::PersistenceFailure(_)), "{err:?}");
        assert_eq!(registry.snapshot(1).unwrap(), before);
    }
    assert_eq!(registry.store().load_all().unwrap()[&1], before);
}

#[test]
fn observers_hear_only_committed_changes() {
    let registry = memory_registry();
    let recorder = Arc::new(Recorder::default());
    registry.subscribe(recorder.clone());

    registry.store().fail_next_commits(1);
    assert!(
        registry
            .declare(1, 10, 1, 3, AttackKind::Magic, Utc::now())
            .is_err()
    );
    assert!(recorder.take().is_empty());

    registry
        .declare(1, 10, 1, 3, AttackKind::Magic, Utc::now())
        .unwrap();
    assert_eq!(recorder.take(), vec!["boss:1:1:3"]);

    registry
        .complete_attack(1, 10, 1, 3, Some(10), None, Utc::now())
        .unwrap();
    let events = recorder.take();
    assert!(events.contains(&"boss:1:1:3".to_string()));
    assert!(events.contains(&"remaining:1".to_string()));

    // validation failures never notify
    assert!(registry.undo_last(1, 99).is_err());
    assert!(recorder.take().is_empty());
}

#[test]
fn json_store_rehydrates_the_registry() {
    let path = temp_db("rehydrate");
    {
        let registry = ClanRegistry::load(
            JsonFileStore::open(&path).unwrap(),
            CatalogHandle::default(),
            EngineConfig::default(),
        )
        .unwrap();
        registry.provision(5, ClanConfig::labelled("five")).unwrap();
        registry.provision(6, ClanConfig::labelled("six")).unwrap();
        registry.add_players(5, &[1, 2]).unwrap();
        registry
            .declare(5, 1, 1, 0, AttackKind::Physical, Utc::now())
            .unwrap();
        registry.finish_boss(5, 1, 1, 0, None, Utc::now()).unwrap();
        registry
            .reserve(5, 2, 1, AttackKind::Magic, Utc::now())
            .unwrap();
        registry.set_carry_over_seconds(5, 1, 45, None).unwrap();
        registry.deprovision(6).unwrap();
    }

    let store = JsonFileStore::open(&path).unwrap();
    let expected = store.load_all().unwrap();
    let registry =
        ClanRegistry::load(store, CatalogHandle::default(), EngineConfig::default()).unwrap();
    assert_eq!(registry.groups(), vec![5]);
    let clan = registry.snapshot(5).unwrap();
    assert_eq!(clan, expected[&5]);
    assert_eq!(clan.player(1).unwrap().carry_overs[0].resolved_seconds(), 45);
    assert_eq!(clan.reservations[1].len(), 1);
    assert!(clan.boss(1, 0).unwrap().defeated);
    assert!(clan.boss(2, 0).is_ok());
    let _ = std::fs::remove_file(&path);
}

#[test]
fn catalog_changes_only_affect_new_laps() {
    let registry = memory_registry();
    registry.catalog().set_hp(0, 0, 9_999).unwrap();
    let clan = registry.snapshot(1).unwrap();
    assert_eq!(clan.boss(1, 0).unwrap().max_hp, 1_200);

    registry.rollover_lap(1, 2).unwrap();
    assert_eq!(registry.snapshot(1).unwrap().boss(2, 0).unwrap().max_hp, 9_999);
}

#[test]
fn groups_progress_independently() {
    let registry = Arc::new(memory_registry());
    registry.provision(2, ClanConfig::labelled("two")).unwrap();
    registry.add_players(2, &[10, 11]).unwrap();

    let handles: Vec<_> = [1, 2]
        .into_iter()
        .map(|group_id| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for slot in 0..3 {
                    registry
                        .declare(group_id, 10, 1, slot, AttackKind::Physical, Utc::now())
                        .unwrap();
                    registry
                        .complete_attack(group_id, 10, 1, slot, Some(1), None, Utc::now())
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    for group_id in [1, 2] {
        let clan = registry.snapshot(group_id).unwrap();
        assert_eq!(clan.player(10).unwrap().physics_attacks, 3);
    }
}

#[test]
fn deprovision_racing_a_declaration_leaves_no_rows() {
    for _ in 0..200 {
        let registry = Arc::new(memory_registry());
        let start = Arc::new(Barrier::new(2));
        let declaring = {
            let registry = Arc::clone(&registry);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                registry.declare(1, 10, 1, 0, AttackKind::Physical, Utc::now())
            })
        };
        start.wait();
        registry.deprovision(1).unwrap();
        let declared = declaring.join().unwrap();

        assert!(registry.groups().is_empty());
        assert!(
            registry.store().load_all().unwrap().is_empty(),
            "declare returned {declared:?} but group 1 is still stored"
        );
        if let Err(err) = declared {
            assert_eq!(err, ClanError::UnknownGroup { group_id: 1 });
        }
    }
}

#[test]
fn default_commit_routes_each_write() {
    let store = MemoryStore::new();
    let registry = ClanRegistry::load(
        store.clone(),
        CatalogHandle::default(),
        EngineConfig::default(),
    )
    .unwrap();
    registry.provision(3, ClanConfig::default()).unwrap();
    store.delete_player(3, 1).unwrap();
    assert!(matches!(
        store.commit(4, &[StoreWrite::DeleteClan]),
        Ok(())
    ));
    assert!(store.upsert_boss_progress(4, &clanbattle_core::store::BossRow {
        lap: 1,
        slot: 0,
        max_hp: 1,
        defeated: false,
    })
    .is_err());
}
