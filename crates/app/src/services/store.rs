use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use overuse_core::{HistoricalIoOveruseStats, IoUsageStatsEntry, UserPackageSettingsEntry};
use overuse_db::Db;

use crate::error::Result;
use crate::services::ledger::LoadedUsage;

/// Passive persistence collaborator; every call opens its own connection.
#[derive(Clone, Debug)]
pub struct OveruseStore {
    db_path: PathBuf,
}

impl OveruseStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn db(&self) -> Result<Db> {
        Ok(Db::open(&self.db_path)?)
    }

    pub fn setup(&self) -> Result<()> {
        let mut db = self.db()?;
        db.migrate()?;
        Ok(())
    }

    pub fn load(&self, today: NaiveDate) -> Result<LoadedUsage> {
        let db = self.db()?;
        Ok(LoadedUsage {
            settings: db.user_package_settings()?,
            today_usage: db.io_usage_stats_for_date(today)?,
            times_killed: db.latest_times_killed()?,
        })
    }

    pub fn save_settings(&self, entries: &[UserPackageSettingsEntry]) -> Result<usize> {
        let mut db = self.db()?;
        Ok(db.save_user_package_settings(entries)?)
    }

    pub fn save_io_usage(&self, date: NaiveDate, entries: &[IoUsageStatsEntry]) -> Result<usize> {
        let mut db = self.db()?;
        Ok(db.save_io_usage_stats(date, entries)?)
    }

    pub fn historical(
        &self,
        user_id: u32,
        package_name: &str,
        today: NaiveDate,
        num_days: u32,
    ) -> Result<Option<HistoricalIoOveruseStats>> {
        let db = self.db()?;
        Ok(db.historical_io_overuse_stats(user_id, package_name, today, num_days)?)
    }

    pub fn delete_user_packages(&self, keys: &[(u32, String)]) -> Result<()> {
        let mut db = self.db()?;
        for (user_id, package_name) in keys {
            db.delete_user_package(*user_id, package_name)?;
        }
        Ok(())
    }

    pub fn prune(&self, before: NaiveDate) -> Result<usize> {
        let db = self.db()?;
        Ok(db.prune_io_usage_stats(before)?)
    }
}
