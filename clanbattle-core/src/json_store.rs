//! Whole-database JSON file store.
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::model::GroupId;
use crate::store::{StoreError, StoreWrite, TableStore, Tables};

/// Keeps every table in one pretty-printed JSON document.
///
/// Each commit writes a sibling temp file and renames it over the document,
/// so a crash leaves either the old or the new database on disk.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    tables: Mutex<Tables>,
}

impl JsonFileStore {
    /// Open the document at `path`, starting empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let tables = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                Tables::default()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            Tables::default()
        };
        log::debug!(
            "opened clan store {} with {} groups",
            path.display(),
            tables.groups.len()
        );
        Ok(Self {
            path,
            tables: Mutex::new(tables),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, tables: &Tables) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);
        fs::write(&temp, serde_json::to_string_pretty(tables)?)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

impl TableStore for JsonFileStore {
    fn commit_tables(&self, group_id: GroupId, writes: &[StoreWrite]) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let mut staged = tables.clone();
        for write in writes {
            staged.apply(group_id, write)?;
        }
        self.persist(&staged)?;
        *tables = staged;
        Ok(())
    }

    fn read_tables(&self) -> Tables {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
