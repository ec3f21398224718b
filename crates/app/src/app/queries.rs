use chrono::NaiveDate;
use overuse_core::{
    HistoricalIoOveruseStats, IoOveruseStats, KillableState, PackageKillableState,
    ResourceOveruseStats, StatsPeriod, UserPackageIoUsageStats, UserSelector,
    minimum_bytes_for_flag, user_id_of,
};
use tracing::{debug, error, info, warn};

use super::{Inner, OveruseService, run_blocking};
use crate::caller::{Caller, Permission};
use crate::error::{AppError, Result};
use crate::services::{
    ListenerScope, OveruseListener, PackageResourceUsage, validate_resource_flags,
};
use crate::util::time::{day_start_secs, retention_cutoff};

fn parse_period(code: u32) -> Result<StatsPeriod> {
    StatsPeriod::from_code(code)
        .ok_or_else(|| AppError::InvalidArgument(format!("invalid stats period {}", code)))
}

fn parse_minimum_stats_flag(flag: u32) -> Result<u64> {
    minimum_bytes_for_flag(flag)
        .ok_or_else(|| AppError::InvalidArgument(format!("invalid minimum stats flag {:#x}", flag)))
}

fn package_not_found(package_name: &str, user: impl std::fmt::Display) -> AppError {
    AppError::InvalidArgument(format!("package {} not found for user {}", package_name, user))
}

/// Combines today's record with earlier persisted days. `None` when nothing was written.
pub(super) fn build_io_overuse_stats(
    record: Option<&PackageResourceUsage>,
    history: Option<HistoricalIoOveruseStats>,
    today: NaiveDate,
    now_secs: i64,
) -> Option<IoOveruseStats> {
    let today_written = record.map_or(0, |record| record.io_usage().written_bytes.total());
    let history_written = history.map_or(0, |history| history.total_bytes_written);
    let total_bytes_written = today_written.saturating_add(history_written);
    if total_bytes_written == 0 {
        return None;
    }
    let start_time_secs = history
        .map(|history| history.start_time_secs)
        .unwrap_or_else(|| day_start_secs(today));
    let today_overuses = record.map_or(0, |record| record.io_usage().total_overuses);
    let today_killed = record.map_or(0, |record| record.io_usage().total_times_killed);
    Some(IoOveruseStats {
        start_time_secs,
        duration_secs: (now_secs - start_time_secs).max(0),
        total_overuses: today_overuses
            .saturating_add(history.map_or(0, |history| history.total_overuses)),
        total_times_killed: today_killed.max(history.map_or(0, |history| history.total_times_killed)),
        total_bytes_written,
        killable_on_overuse: record
            .is_none_or(|record| record.killable_state() != KillableState::Never),
        remaining_write_bytes: record
            .map(|record| record.io_usage().remaining_write_bytes)
            .unwrap_or_default(),
    })
}

impl Inner {
    async fn history(
        &self,
        user_id: u32,
        generic_package_name: &str,
        period: StatsPeriod,
    ) -> Result<Option<HistoricalIoOveruseStats>> {
        let num_days = period.num_days();
        if num_days <= 1 {
            return Ok(None);
        }
        let store = self.store.clone();
        let today = self.time.today();
        let generic_package_name = generic_package_name.to_string();
        run_blocking(move || store.historical(user_id, &generic_package_name, today, num_days - 1))
            .await
    }

    async fn user_package_stats(
        &self,
        user_id: u32,
        generic_package_name: String,
        period: StatsPeriod,
    ) -> Result<ResourceOveruseStats> {
        self.roll_over_if_needed().await;
        let record = self
            .state()
            .ledger
            .get(user_id, &generic_package_name)
            .cloned();
        let history = self.history(user_id, &generic_package_name, period).await?;
        let now = self.time.now();
        Ok(ResourceOveruseStats {
            io_overuse_stats: build_io_overuse_stats(
                record.as_ref(),
                history,
                now.date_naive(),
                now.timestamp(),
            ),
            package_name: generic_package_name,
            user_id,
        })
    }
}

impl OveruseService {
    /// Stats of the caller's own package.
    pub async fn get_resource_overuse_stats(
        &self,
        caller: &Caller,
        flags: u32,
        period: u32,
    ) -> Result<ResourceOveruseStats> {
        caller.require(Permission::UseWatchdog)?;
        validate_resource_flags(flags)?;
        let period = parse_period(period)?;
        let user_id = user_id_of(caller.uid);
        let names = self.inner.packages.names_for_uids(&[caller.uid]);
        let Some(generic_package_name) = names.get(&caller.uid).cloned() else {
            warn!(uid = caller.uid, "no package found for calling uid");
            return Ok(ResourceOveruseStats {
                package_name: String::new(),
                user_id,
                io_overuse_stats: None,
            });
        };
        self.inner
            .user_package_stats(user_id, generic_package_name, period)
            .await
    }

    /// Stats of every tracked package with at least the minimum written bytes.
    pub async fn get_all_resource_overuse_stats(
        &self,
        caller: &Caller,
        flags: u32,
        minimum_stats_flag: u32,
        period: u32,
    ) -> Result<Vec<ResourceOveruseStats>> {
        caller.require(Permission::CollectMetrics)?;
        validate_resource_flags(flags)?;
        let minimum_bytes = parse_minimum_stats_flag(minimum_stats_flag)?;
        let period = parse_period(period)?;
        self.inner.roll_over_if_needed().await;

        let mut records: Vec<PackageResourceUsage> =
            self.inner.state().ledger.records().cloned().collect();
        records.sort_by(|a, b| {
            (a.user_id, &a.generic_package_name).cmp(&(b.user_id, &b.generic_package_name))
        });
        let now = self.inner.time.now();
        let mut all = Vec::new();
        for record in records {
            let history = self
                .inner
                .history(record.user_id, &record.generic_package_name, period)
                .await?;
            let Some(io_overuse_stats) =
                build_io_overuse_stats(Some(&record), history, now.date_naive(), now.timestamp())
            else {
                continue;
            };
            if io_overuse_stats.total_bytes_written < minimum_bytes {
                continue;
            }
            all.push(ResourceOveruseStats {
                package_name: record.generic_package_name,
                user_id: record.user_id,
                io_overuse_stats: Some(io_overuse_stats),
            });
        }
        Ok(all)
    }

    pub async fn get_resource_overuse_stats_for_user_package(
        &self,
        caller: &Caller,
        package_name: &str,
        user_id: u32,
        flags: u32,
        period: u32,
    ) -> Result<ResourceOveruseStats> {
        caller.require(Permission::CollectMetrics)?;
        validate_resource_flags(flags)?;
        let period = parse_period(period)?;
        if package_name.is_empty() {
            return Err(AppError::InvalidArgument("package name is required".to_string()));
        }
        let generic_package_name = self
            .inner
            .packages
            .name_for_user_package(package_name, user_id)?
            .ok_or_else(|| package_not_found(package_name, user_id))?;
        self.inner
            .user_package_stats(user_id, generic_package_name, period)
            .await
    }

    /// Fails with an invalid-state error when the package is pinned as never killable.
    pub fn set_killable_package_as_user(
        &self,
        caller: &Caller,
        package_name: &str,
        user: UserSelector,
        is_killable: bool,
    ) -> Result<()> {
        caller.require(Permission::ControlConfig)?;
        if package_name.is_empty() {
            return Err(AppError::InvalidArgument("package name is required".to_string()));
        }
        let user_ids = match user {
            UserSelector::User(user_id) => vec![user_id],
            UserSelector::All => self.inner.packages.package_manager().alive_user_ids(),
        };
        let mut classified = Vec::new();
        for user_id in user_ids {
            if let Some(classification) = self.inner.classify_user_package(package_name, user_id)? {
                classified.push((user_id, classification));
            }
        }
        let Some((_, first)) = classified.first() else {
            return Err(match user {
                UserSelector::User(user_id) => package_not_found(package_name, user_id),
                UserSelector::All => package_not_found(package_name, "all"),
            });
        };
        let generic_package_name = first.generic_package_name.clone();

        let mut state = self.inner.state();
        for (user_id, classification) in &classified {
            state.sync_classification(*user_id, classification);
            state
                .ledger
                .set_killable_state(*user_id, &classification.generic_package_name, is_killable)?;
        }
        if user == UserSelector::All {
            state
                .ledger
                .set_default_killable(&generic_package_name, is_killable);
        }
        info!(package = %generic_package_name, ?user, is_killable, "updated killable state");
        Ok(())
    }

    /// Killable state of every installed package for one user or all users.
    pub fn get_package_killable_states_as_user(
        &self,
        caller: &Caller,
        user: UserSelector,
    ) -> Result<Vec<PackageKillableState>> {
        caller.require(Permission::ControlConfig)?;
        let package_manager = self.inner.packages.package_manager();
        let user_ids = match user {
            UserSelector::User(user_id) => vec![user_id],
            UserSelector::All => package_manager.alive_user_ids(),
        };
        let mut classified = Vec::new();
        for user_id in user_ids {
            for info in package_manager.installed_packages(user_id)? {
                let package_name = info.package_name.clone();
                classified.push((user_id, package_name, self.inner.classify_application(info)));
            }
        }
        let mut state = self.inner.state();
        Ok(classified
            .iter()
            .map(|(user_id, package_name, classification)| PackageKillableState {
                package_name: package_name.clone(),
                user_id: *user_id,
                killable_state: state.sync_classification(*user_id, classification),
            })
            .collect())
    }

    /// Must be called within a tokio runtime; the registration is dropped
    /// once the receiving half goes away.
    pub fn add_resource_overuse_listener(
        &self,
        caller: &Caller,
        flags: u32,
        listener: OveruseListener,
    ) -> Result<()> {
        caller.require(Permission::UseWatchdog)?;
        validate_resource_flags(flags)?;
        self.inner
            .add_listener(ListenerScope::Caller(caller.uid), flags, listener)
    }

    /// Returns whether a registration was removed.
    pub fn remove_resource_overuse_listener(
        &self,
        caller: &Caller,
        listener: &OveruseListener,
    ) -> Result<bool> {
        caller.require(Permission::UseWatchdog)?;
        Ok(self
            .inner
            .state()
            .listeners
            .remove(ListenerScope::Caller(caller.uid), listener))
    }

    pub fn add_resource_overuse_listener_for_system(
        &self,
        caller: &Caller,
        flags: u32,
        listener: OveruseListener,
    ) -> Result<()> {
        caller.require(Permission::CollectMetrics)?;
        validate_resource_flags(flags)?;
        self.inner.add_listener(ListenerScope::System, flags, listener)
    }

    pub fn remove_resource_overuse_listener_for_system(
        &self,
        caller: &Caller,
        listener: &OveruseListener,
    ) -> Result<bool> {
        caller.require(Permission::CollectMetrics)?;
        Ok(self
            .inner
            .state()
            .listeners
            .remove(ListenerScope::System, listener))
    }

    pub fn listener_count(&self) -> usize {
        self.inner.state().listeners.len()
    }

    /// Forgets every user's usage of the given generic packages, here and in the daemon.
    pub async fn reset_resource_overuse_stats(
        &self,
        caller: &Caller,
        package_names: Vec<String>,
    ) -> Result<()> {
        caller.require(Permission::ControlConfig)?;
        if package_names.is_empty() {
            return Err(AppError::InvalidArgument(
                "at least one package name is required".to_string(),
            ));
        }
        let mut keys = self.inner.state().ledger.remove_packages(&package_names);
        for user_id in self.inner.packages.package_manager().alive_user_ids() {
            for package_name in &package_names {
                keys.push((user_id, package_name.clone()));
            }
        }
        keys.sort();
        keys.dedup();

        let store = self.inner.store.clone();
        let removed = keys.len();
        match run_blocking(move || store.delete_user_packages(&keys)).await {
            Ok(()) => debug!(removed, "deleted persisted overuse stats"),
            Err(err) => error!(error = %err, "deleting persisted overuse stats failed"),
        }
        if let Err(err) = self
            .inner
            .daemon
            .reset_resource_overuse_stats(package_names)
            .await
        {
            warn!(error = %err, "asking the daemon to reset overuse stats failed");
        }
        Ok(())
    }

    /// Current-day usage handed to a restarted daemon.
    pub async fn today_io_usage_stats(&self) -> Vec<UserPackageIoUsageStats> {
        self.inner.roll_over_if_needed().await;
        self.inner.state().ledger.today_io_usage_stats()
    }

    /// Writes settings and today's usage, then prunes expired history. Every
    /// step runs even when an earlier one fails; the first failure is returned.
    pub async fn flush(&self) -> Result<()> {
        let snapshot = self.inner.state().ledger.snapshot();
        let mut failure = self.inner.persist_pending(snapshot).await.err();

        let cutoff = retention_cutoff(self.inner.time.today(), self.inner.config.retention_days);
        let store = self.inner.store.clone();
        match run_blocking(move || store.prune(cutoff)).await {
            Ok(pruned) => debug!(pruned, %cutoff, "pruned expired io usage stats"),
            Err(err) => {
                error!(error = %err, "pruning io usage stats failed");
                failure.get_or_insert(err);
            }
        }
        match failure {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}
