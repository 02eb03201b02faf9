use crate::error_log::ErrorLog;
use crate::store::RecordStore;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::info;
use tracker_core::CoreError;

pub fn store_file_name(date: NaiveDate) -> String {
    format!("outJsonFile{}.json", date.format("%Y%m%d"))
}

pub fn log_file_name(date: NaiveDate) -> String {
    format!("log{}.txt", date.format("%Y%m%d"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationAction {
    NoOp,
    Rotate {
        date: NaiveDate,
        store_path: PathBuf,
        log_path: PathBuf,
    },
}

/// Tracks the active day and owns that day's error log.
#[derive(Debug)]
pub struct DailyRotation {
    data_dir: PathBuf,
    current_date: NaiveDate,
    error_log: ErrorLog,
}

impl DailyRotation {
    pub fn new(data_dir: impl Into<PathBuf>, today: NaiveDate) -> Self {
        let data_dir = data_dir.into();
        let error_log = ErrorLog::new(data_dir.join(log_file_name(today)));
        Self {
            data_dir,
            current_date: today,
            error_log,
        }
    }

    /// Opens (or seeds) the store for the active day.
    pub fn open_store(&self) -> Result<RecordStore, CoreError> {
        RecordStore::open_or_create(self.store_path_for(self.current_date))
    }

    pub fn check(&self, today: NaiveDate) -> RotationAction {
        if today == self.current_date {
            return RotationAction::NoOp;
        }
        RotationAction::Rotate {
            date: today,
            store_path: self.store_path_for(today),
            log_path: self.log_path_for(today),
        }
    }

    /// Applies `action` to `store`. Returns true when a rotation happened.
    ///
    /// The outgoing store is flushed before anything is swapped; if that
    /// flush fails nothing changes and the next check rotates again.
    pub fn apply(
        &mut self,
        action: RotationAction,
        store: &mut RecordStore,
    ) -> Result<bool, CoreError> {
        let RotationAction::Rotate {
            date,
            store_path,
            log_path,
        } = action
        else {
            return Ok(false);
        };

        store.flush()?;
        self.error_log.redirect(log_path);
        *store = RecordStore::open_or_create(store_path)?;

        info!(
            "Rotated from {} to {}, now writing {}",
            self.current_date,
            date,
            store.path().display()
        );
        self.current_date = date;
        Ok(true)
    }

    pub fn rotate_if_needed(
        &mut self,
        today: NaiveDate,
        store: &mut RecordStore,
    ) -> Result<bool, CoreError> {
        let action = self.check(today);
        self.apply(action, store)
    }

    pub fn store_path_for(&self, date: NaiveDate) -> PathBuf {
        self.data_dir.join(store_file_name(date))
    }

    pub fn log_path_for(&self, date: NaiveDate) -> PathBuf {
        self.data_dir.join(log_file_name(date))
    }

    pub fn current_date(&self) -> NaiveDate {
        self.current_date
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn error_log(&mut self) -> &mut ErrorLog {
        &mut self.error_log
    }
}
