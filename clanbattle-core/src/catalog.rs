//! Boss hit-point catalog.
//!
//! The catalog is refreshed out-of-band (the host polls a remote table on a
//! timer). The coordinator only ever reads an immutable snapshot, and only
//! when it creates a lap's boss progress; after that the lap's hp is frozen.
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::constants::BOSS_SLOTS;
use crate::error::ClanError;

const DEFAULT_CATALOG_DATA: &str = include_str!("../data/boss_catalog.json");

/// Read-only view of boss hit points and names.
pub trait BossCatalog {
    /// Maximum hp of the boss at `slot` on `lap`.
    fn hp(&self, lap: u32, slot: usize) -> u64;

    /// Display name of the boss at `slot`.
    fn name(&self, slot: usize) -> &str;
}

/// Hit points for a contiguous range of laps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HpTier {
    pub lap_from: u32,
    /// Last lap of the tier; `None` means open-ended.
    #[serde(default)]
    pub lap_to: Option<u32>,
    pub hp: [u64; BOSS_SLOTS],
}

impl HpTier {
    #[must_use]
    pub fn contains(&self, lap: u32) -> bool {
        lap >= self.lap_from && self.lap_to.is_none_or(|to| lap <= to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HpTable {
    pub boss_names: [String; BOSS_SLOTS],
    pub tiers: Vec<HpTier>,
}

impl HpTable {
    /// Parse a catalog document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON does not describe a catalog.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    fn fallback() -> Self {
        Self {
            boss_names: std::array::from_fn(|slot| format!("Boss {}", slot + 1)),
            tiers: vec![
                HpTier {
                    lap_from: 1,
                    lap_to: Some(6),
                    hp: [1_200, 1_500, 2_000, 2_300, 3_000],
                },
                HpTier {
                    lap_from: 7,
                    lap_to: Some(22),
                    hp: [5_000, 5_600, 6_400, 7_000, 8_500],
                },
                HpTier {
                    lap_from: 23,
                    lap_to: None,
                    hp: [116_000, 120_000, 124_000, 128_000, 132_000],
                },
            ],
        }
    }

    /// Tier covering `lap`, falling back to the last tier.
    #[must_use]
    pub fn tier_for(&self, lap: u32) -> Option<&HpTier> {
        self.tiers
            .iter()
            .find(|tier| tier.contains(lap))
            .or_else(|| self.tiers.last())
    }

    /// Override one boss's hp within a tier.
    ///
    /// # Errors
    ///
    /// Returns [`ClanError::InvalidHp`] for an unknown tier or slot or a zero value.
    pub fn set_hp(&mut self, tier: usize, slot: usize, value: u64) -> Result<(), ClanError> {
        let invalid = ClanError::InvalidHp { tier, slot, value };
        if value == 0 || slot >= BOSS_SLOTS {
            return Err(invalid);
        }
        let entry = self.tiers.get_mut(tier).ok_or(invalid)?;
        entry.hp[slot] = value;
        Ok(())
    }
}

impl Default for HpTable {
    fn default() -> Self {
        Self::from_json(DEFAULT_CATALOG_DATA).unwrap_or_else(|_| Self::fallback())
    }
}

impl BossCatalog for HpTable {
    fn hp(&self, lap: u32, slot: usize) -> u64 {
        self.tier_for(lap)
            .and_then(|tier| tier.hp.get(slot).copied())
            .unwrap_or_default()
    }

    fn name(&self, slot: usize) -> &str {
        self.boss_names.get(slot).map_or("", String::as_str)
    }
}

/// Immutable catalog view pinned to one refresh.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    pub version: u64,
    table: Arc<HpTable>,
}

impl CatalogSnapshot {
    #[must_use]
    pub fn table(&self) -> &HpTable {
        &self.table
    }
}

impl BossCatalog for CatalogSnapshot {
    fn hp(&self, lap: u32, slot: usize) -> u64 {
        self.table.hp(lap, slot)
    }

    fn name(&self, slot: usize) -> &str {
        self.table.name(slot)
    }
}

/// Shared, versioned handle to the latest catalog table.
///
/// Refreshes swap the whole table at once; readers holding an older
/// snapshot keep seeing it unchanged.
#[derive(Debug, Clone)]
pub struct CatalogHandle {
    table: Arc<RwLock<Arc<HpTable>>>,
    version: Arc<AtomicU64>,
}

impl CatalogHandle {
    #[must_use]
    pub fn new(table: HpTable) -> Self {
        Self {
            table: Arc::new(RwLock::new(Arc::new(table))),
            version: Arc::new(AtomicU64::new(1)),
        }
    }

    #[must_use]
    pub fn current(&self) -> CatalogSnapshot {
        let guard = self.table.read().unwrap_or_else(PoisonError::into_inner);
        CatalogSnapshot {
            version: self.version.load(Ordering::Acquire),
            table: Arc::clone(&guard),
        }
    }

    /// Replace the table, returning the new version.
    pub fn refresh(&self, table: HpTable) -> u64 {
        let mut guard = self.table.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(table);
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        log::info!("boss catalog refreshed to version {version}");
        version
    }

    /// Copy-on-write hp override for a single boss.
    ///
    /// # Errors
    ///
    /// Returns [`ClanError::InvalidHp`] if the override is out of range.
    pub fn set_hp(&self, tier: usize, slot: usize, value: u64) -> Result<u64, ClanError> {
        let mut table = self.current().table().clone();
        table.set_hp(tier, slot, value)?;
        Ok(self.refresh(table))
    }
}

impl Default for CatalogHandle {
    fn default() -> Self {
        Self::new(HpTable::default())
    }
}
