//! Clan Battle Coordination Engine
//!
//! Platform-agnostic state machine for coordinating a clan through a
//! recurring multi-lap boss battle: declarations, completed attacks, boss
//! defeats, carry-over credits, reservations and single-step undo.
//! This crate has no chat-platform or UI dependencies; hosts plug in a
//! [`ClanStore`], a [`BossCatalog`] and optionally [`ClanObserver`]s and a
//! [`SelectOne`] prompt.

pub mod calc;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod json_store;
pub mod model;
pub mod notify;
pub mod registry;
pub mod reservations;
pub mod rollover;
pub mod selection;
pub mod state;
pub mod store;
pub mod undo;
pub mod views;

// Re-export commonly used types
pub use calc::{carry_over_seconds, parse_damage_report, parse_hp_expression};
pub use catalog::{BossCatalog, CatalogHandle, CatalogSnapshot, HpTable, HpTier};
pub use config::{ClanConfig, EngineConfig, EngineConfigError};
pub use coordinator::{AttackCoordinator, AttackOutcome, ConsumedCredit, select_credit_index};
pub use error::ClanError;
pub use json_store::JsonFileStore;
pub use model::{
    AttackKind, AttackRecord, BossProgress, CarryOverCredit, CreditList, GroupId, LogEntry, Player,
    PlayerSnapshot, RecordId, ReservationRecord, UserId,
};
pub use notify::{ChangeNotice, ClanObserver};
pub use registry::ClanRegistry;
pub use reservations::{ReservationBook, ReservationUpdate};
pub use rollover::RolloverReport;
pub use selection::{SelectOne, Selection, with_selection, with_selection_async};
pub use state::{ClanState, LapRow};
pub use store::{
    ClanStore, GroupTables, MemoryStore, StoreError, StoreWrite, TableStore, Tables, plan_writes,
};
pub use undo::{UndoLedger, UndoOutcome};
pub use views::{BossView, PlayerRemaining, RemainingSummary};
