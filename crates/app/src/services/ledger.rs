use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use overuse_core::{
    ComponentType, DaemonIoOveruseStats, IoUsage, IoUsageStatsEntry, KillableState,
    UserPackageIoUsageStats, UserPackageSettingsEntry, UserSelector,
};

use crate::error::{AppError, Result};

type UserPackageKey = (u32, String);

/// Usage and killable state of one (user, generic package) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageResourceUsage {
    pub user_id: u32,
    pub generic_package_name: String,
    /// Last uid seen for this package; unknown for records only read from the store.
    pub uid: Option<u32>,
    io_usage: IoUsage,
    has_usage: bool,
    killable_state: KillableState,
}

impl PackageResourceUsage {
    fn new(user_id: u32, generic_package_name: String, killable_state: KillableState) -> Self {
        Self {
            user_id,
            generic_package_name,
            uid: None,
            io_usage: IoUsage::default(),
            has_usage: false,
            killable_state,
        }
    }

    pub fn killable_state(&self) -> KillableState {
        self.killable_state
    }

    pub fn io_usage(&self) -> &IoUsage {
        &self.io_usage
    }

    pub fn has_usage(&self) -> bool {
        self.has_usage
    }

    /// Overused once any mode has no remaining write budget left.
    pub fn exceeds_threshold(&self) -> bool {
        self.has_usage && self.io_usage.remaining_write_bytes.any_exhausted()
    }

    fn update(&mut self, stats: &DaemonIoOveruseStats, default_state: KillableState) {
        if !stats.killable_on_overuse {
            self.killable_state = KillableState::Never;
        } else if self.killable_state == KillableState::Never {
            self.killable_state = default_state;
        }
        self.has_usage = true;
        self.io_usage.written_bytes = stats.written_bytes;
        self.io_usage.remaining_write_bytes = stats.remaining_write_bytes;
        self.io_usage.total_overuses = stats.total_overuses;
        if self.exceeds_threshold() {
            self.io_usage.forgiven_write_bytes =
                self.io_usage.forgiven_write_bytes.max(&stats.written_bytes);
        }
    }

    fn sync_killable_state(
        &mut self,
        component_type: ComponentType,
        is_safe_to_kill: bool,
        default_state: KillableState,
    ) -> KillableState {
        if component_type != ComponentType::ThirdParty && !is_safe_to_kill {
            self.killable_state = KillableState::Never;
        } else if self.killable_state == KillableState::Never {
            self.killable_state = default_state;
        }
        self.killable_state
    }

    fn verify_and_set_killable_state(&mut self, is_killable: bool) -> bool {
        if self.killable_state == KillableState::Never {
            return false;
        }
        self.killable_state = if is_killable {
            KillableState::Yes
        } else {
            KillableState::No
        };
        true
    }

    fn reset_daily(&mut self) {
        let total_times_killed = self.io_usage.total_times_killed;
        self.io_usage = IoUsage {
            total_times_killed,
            ..IoUsage::default()
        };
        self.has_usage = false;
    }
}

/// Records captured for persistence; `date` is the day they describe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub date: Option<NaiveDate>,
    pub settings: Vec<UserPackageSettingsEntry>,
    pub io_usage: Vec<IoUsageStatsEntry>,
}

/// Persisted state read back at startup.
#[derive(Debug, Clone, Default)]
pub struct LoadedUsage {
    pub settings: Vec<UserPackageSettingsEntry>,
    pub today_usage: Vec<IoUsageStatsEntry>,
    pub times_killed: Vec<(u32, String, u64)>,
}

/// Decides whether an overuse belongs to a package that keeps overusing.
pub trait RecurrencePolicy: Send + Sync {
    fn is_recurring_overuse(&self, usage: &PackageResourceUsage) -> bool;
}

/// No recurrence window is defined yet, so every overuse is a first offence.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRecurrence;

impl RecurrencePolicy for NoRecurrence {
    fn is_recurring_overuse(&self, _usage: &PackageResourceUsage) -> bool {
        false
    }
}

#[derive(Debug, Default)]
pub struct UsageLedger {
    records: HashMap<UserPackageKey, PackageResourceUsage>,
    /// Killable state chosen for every user, keyed by generic package name.
    default_killable_states: BTreeMap<String, KillableState>,
    report_date: Option<NaiveDate>,
    dirty: bool,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report_date(&self) -> Option<NaiveDate> {
        self.report_date
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, user_id: u32, generic_package_name: &str) -> Option<&PackageResourceUsage> {
        self.records
            .get(&(user_id, generic_package_name.to_string()))
    }

    pub fn records(&self) -> impl Iterator<Item = &PackageResourceUsage> {
        self.records.values()
    }

    pub fn default_killable_state(&self, generic_package_name: &str) -> KillableState {
        match self.default_killable_states.get(generic_package_name) {
            Some(KillableState::No) => KillableState::No,
            _ => KillableState::Yes,
        }
    }

    fn entry(&mut self, user_id: u32, generic_package_name: &str) -> &mut PackageResourceUsage {
        let default_state = self.default_killable_state(generic_package_name);
        self.records
            .entry((user_id, generic_package_name.to_string()))
            .or_insert_with(|| {
                PackageResourceUsage::new(user_id, generic_package_name.to_string(), default_state)
            })
    }

    /// Replaces in-memory state with what the store holds for `today`.
    pub fn load(&mut self, loaded: LoadedUsage, today: NaiveDate) {
        self.records.clear();
        self.default_killable_states.clear();
        for entry in loaded.settings {
            match entry.user {
                UserSelector::All => {
                    self.default_killable_states
                        .insert(entry.package_name, entry.killable_state);
                }
                UserSelector::User(user_id) => {
                    self.entry(user_id, &entry.package_name).killable_state = entry.killable_state;
                }
            }
        }
        for (user_id, package_name, times_killed) in loaded.times_killed {
            let record = self.entry(user_id, &package_name);
            record.io_usage.total_times_killed = record.io_usage.total_times_killed.max(times_killed);
        }
        for entry in loaded.today_usage {
            let record = self.entry(entry.user_id, &entry.package_name);
            let times_killed = record
                .io_usage
                .total_times_killed
                .max(entry.io_usage.total_times_killed);
            record.io_usage = entry.io_usage;
            record.io_usage.total_times_killed = times_killed;
            record.has_usage = true;
        }
        self.report_date = Some(today);
        self.dirty = false;
    }

    /// Starts a new day when `today` differs from the last report date. The
    /// returned snapshot holds the previous day's records when they still
    /// need to be written.
    pub fn check_and_handle_day_rollover(&mut self, today: NaiveDate) -> Option<UsageSnapshot> {
        if self.report_date == Some(today) {
            return None;
        }
        let snapshot = match self.report_date {
            Some(_) if self.dirty => Some(self.snapshot()),
            _ => None,
        };
        for record in self.records.values_mut() {
            record.reset_daily();
        }
        self.report_date = Some(today);
        snapshot
    }

    /// Merges a daemon sample and returns the updated record.
    pub fn record_usage(
        &mut self,
        user_id: u32,
        generic_package_name: &str,
        uid: u32,
        stats: &DaemonIoOveruseStats,
    ) -> &PackageResourceUsage {
        self.dirty = true;
        let default_state = self.default_killable_state(generic_package_name);
        let record = self.entry(user_id, generic_package_name);
        record.uid = Some(uid);
        record.update(stats, default_state);
        record
    }

    /// Re-derives the killable state from the package's classification.
    pub fn sync_killable_state(
        &mut self,
        user_id: u32,
        generic_package_name: &str,
        uid: Option<u32>,
        component_type: ComponentType,
        is_safe_to_kill: bool,
    ) -> KillableState {
        let default_state = self.default_killable_state(generic_package_name);
        let record = self.entry(user_id, generic_package_name);
        if uid.is_some() {
            record.uid = uid;
        }
        let before = record.killable_state;
        let after = record.sync_killable_state(component_type, is_safe_to_kill, default_state);
        if before != after {
            self.dirty = true;
        }
        after
    }

    pub fn set_killable_state(
        &mut self,
        user_id: u32,
        generic_package_name: &str,
        is_killable: bool,
    ) -> Result<()> {
        let record = self.entry(user_id, generic_package_name);
        if !record.verify_and_set_killable_state(is_killable) {
            return Err(AppError::InvalidState(format!(
                "killable state of {} for user {} cannot be changed",
                generic_package_name, user_id
            )));
        }
        self.dirty = true;
        Ok(())
    }

    /// Default consulted when a record is created for a user without one.
    pub fn set_default_killable(&mut self, generic_package_name: &str, is_killable: bool) {
        let state = if is_killable {
            KillableState::Yes
        } else {
            KillableState::No
        };
        self.default_killable_states
            .insert(generic_package_name.to_string(), state);
        self.dirty = true;
    }

    pub fn record_kill(&mut self, user_id: u32, generic_package_name: &str) -> u64 {
        self.dirty = true;
        let record = self.entry(user_id, generic_package_name);
        record.io_usage.total_times_killed = record.io_usage.total_times_killed.saturating_add(1);
        record.io_usage.total_times_killed
    }

    /// Drops every user's record of the given packages and returns the removed keys.
    pub fn remove_packages(&mut self, generic_package_names: &[String]) -> Vec<(u32, String)> {
        let mut removed: Vec<UserPackageKey> = self
            .records
            .keys()
            .filter(|(_, name)| generic_package_names.contains(name))
            .cloned()
            .collect();
        for key in &removed {
            self.records.remove(key);
        }
        removed.sort();
        removed
    }

    /// Captures everything that should be persisted and marks the ledger clean.
    pub fn snapshot(&mut self) -> UsageSnapshot {
        let mut keys: Vec<&UserPackageKey> = self.records.keys().collect();
        keys.sort();
        let mut settings = Vec::with_capacity(keys.len());
        let mut io_usage = Vec::new();
        for key in keys {
            let Some(record) = self.records.get(key) else {
                continue;
            };
            settings.push(UserPackageSettingsEntry {
                user: UserSelector::User(record.user_id),
                package_name: record.generic_package_name.clone(),
                killable_state: record.killable_state,
            });
            if record.has_usage || record.io_usage.total_times_killed > 0 {
                io_usage.push(IoUsageStatsEntry {
                    user_id: record.user_id,
                    package_name: record.generic_package_name.clone(),
                    io_usage: record.io_usage,
                });
            }
        }
        for (package_name, killable_state) in &self.default_killable_states {
            settings.push(UserPackageSettingsEntry {
                user: UserSelector::All,
                package_name: package_name.clone(),
                killable_state: *killable_state,
            });
        }
        self.dirty = false;
        UsageSnapshot {
            date: self.report_date,
            settings,
            io_usage,
        }
    }

    /// Current-day counters handed to a restarted daemon.
    pub fn today_io_usage_stats(&self) -> Vec<UserPackageIoUsageStats> {
        let mut stats: Vec<UserPackageIoUsageStats> = self
            .records
            .values()
            .filter(|record| record.has_usage)
            .map(|record| UserPackageIoUsageStats {
                user_id: record.user_id,
                package_name: record.generic_package_name.clone(),
                written_bytes: record.io_usage.written_bytes,
                forgiven_write_bytes: record.io_usage.forgiven_write_bytes,
                total_overuses: record.io_usage.total_overuses,
            })
            .collect();
        stats.sort_by(|a, b| (a.user_id, &a.package_name).cmp(&(b.user_id, &b.package_name)));
        stats
    }
}

#[cfg(test)]
mod tests {
    use overuse_core::PerStateBytes;

    use super::*;

    fn day(date: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, date).expect("date")
    }

    fn sample(written: u64, remaining: u64, killable_on_overuse: bool) -> DaemonIoOveruseStats {
        DaemonIoOveruseStats {
            killable_on_overuse,
            written_bytes: PerStateBytes::new(written, written, written),
            remaining_write_bytes: PerStateBytes::new(remaining, remaining, remaining),
            total_overuses: u64::from(remaining == 0),
        }
    }

    fn ledger_on(date: u32) -> UsageLedger {
        let mut ledger = UsageLedger::new();
        ledger.load(LoadedUsage::default(), day(date));
        ledger
    }

    #[test]
    fn overuse_raises_forgiven_watermark_monotonically() {
        let mut ledger = ledger_on(1);
        let record = ledger.record_usage(0, "com.example.game", 10_010, &sample(300, 0, true));
        assert!(record.exceeds_threshold());
        assert_eq!(
            record.io_usage().forgiven_write_bytes,
            PerStateBytes::new(300, 300, 300)
        );

        let lower = DaemonIoOveruseStats {
            written_bytes: PerStateBytes::new(100, 500, 100),
            ..sample(0, 0, true)
        };
        let record = ledger.record_usage(0, "com.example.game", 10_010, &lower);
        assert_eq!(
            record.io_usage().forgiven_write_bytes,
            PerStateBytes::new(300, 500, 300)
        );
    }

    #[test]
    fn usage_within_budget_is_not_forgiven() {
        let mut ledger = ledger_on(1);
        let record = ledger.record_usage(0, "com.example.game", 10_010, &sample(50, 10, true));
        assert!(!record.exceeds_threshold());
        assert!(record.io_usage().forgiven_write_bytes.is_zero());
        assert!(ledger.is_dirty());
    }

    #[test]
    fn sample_not_killable_pins_never_until_killable_again() {
        let mut ledger = ledger_on(1);
        ledger
            .set_killable_state(0, "com.example.game", false)
            .expect("set");
        let record = ledger.record_usage(0, "com.example.game", 10_010, &sample(1, 1, false));
        assert_eq!(record.killable_state(), KillableState::Never);
        assert!(matches!(
            ledger.set_killable_state(0, "com.example.game", true),
            Err(AppError::InvalidState(_))
        ));

        let record = ledger.record_usage(0, "com.example.game", 10_010, &sample(1, 1, true));
        assert_eq!(record.killable_state(), KillableState::Yes);
    }

    #[test]
    fn third_party_is_never_pinned_and_protected_system_is() {
        let mut ledger = ledger_on(1);
        let state =
            ledger.sync_killable_state(0, "com.example.game", Some(10_010), ComponentType::ThirdParty, false);
        assert_eq!(state, KillableState::Yes);
        let state =
            ledger.sync_killable_state(0, "android.radio", Some(1_001), ComponentType::System, false);
        assert_eq!(state, KillableState::Never);
        let state =
            ledger.sync_killable_state(0, "android.radio", Some(1_001), ComponentType::System, true);
        assert_eq!(state, KillableState::Yes);
    }

    #[test]
    fn released_never_pin_falls_back_to_default_for_all_users() {
        let mut ledger = ledger_on(1);
        ledger.set_default_killable("com.oem.nav", false);
        ledger.sync_killable_state(10, "com.oem.nav", None, ComponentType::Vendor, false);
        let state = ledger.sync_killable_state(10, "com.oem.nav", None, ComponentType::Vendor, true);
        assert_eq!(state, KillableState::No);
    }

    #[test]
    fn rollover_snapshots_previous_day_and_keeps_kill_count() {
        let mut ledger = ledger_on(1);
        ledger.record_usage(0, "com.example.game", 10_010, &sample(300, 0, true));
        ledger
            .set_killable_state(0, "com.example.game", false)
            .expect("set");
        ledger.record_kill(0, "com.example.game");

        let snapshot = ledger
            .check_and_handle_day_rollover(day(2))
            .expect("previous day snapshot");
        assert_eq!(snapshot.date, Some(day(1)));
        assert_eq!(snapshot.io_usage.len(), 1);
        assert_eq!(snapshot.io_usage[0].io_usage.total_times_killed, 1);
        assert_eq!(ledger.report_date(), Some(day(2)));

        let record = ledger.get(0, "com.example.game").expect("record");
        assert!(!record.has_usage());
        assert!(!record.exceeds_threshold());
        assert!(record.io_usage().written_bytes.is_zero());
        assert!(record.io_usage().forgiven_write_bytes.is_zero());
        assert_eq!(record.io_usage().total_overuses, 0);
        assert_eq!(record.io_usage().total_times_killed, 1);
        assert_eq!(record.killable_state(), KillableState::No);
    }

    #[test]
    fn rollover_right_after_load_skips_redundant_write() {
        let mut ledger = ledger_on(1);
        assert!(ledger.check_and_handle_day_rollover(day(1)).is_none());
        assert!(ledger.check_and_handle_day_rollover(day(2)).is_none());
    }

    #[test]
    fn load_restores_wildcard_defaults_and_kill_counts() {
        let mut ledger = UsageLedger::new();
        let loaded = LoadedUsage {
            settings: vec![
                UserPackageSettingsEntry {
                    user: UserSelector::All,
                    package_name: "com.example.maps".to_string(),
                    killable_state: KillableState::No,
                },
                UserPackageSettingsEntry {
                    user: UserSelector::User(10),
                    package_name: "com.example.game".to_string(),
                    killable_state: KillableState::No,
                },
            ],
            today_usage: Vec::new(),
            times_killed: vec![(10, "com.example.game".to_string(), 4)],
        };
        ledger.load(loaded, day(3));
        assert_eq!(ledger.default_killable_state("com.example.maps"), KillableState::No);
        let record = ledger.get(10, "com.example.game").expect("record");
        assert_eq!(record.killable_state(), KillableState::No);
        assert_eq!(record.io_usage().total_times_killed, 4);
        assert!(!ledger.is_dirty());

        let snapshot = ledger.snapshot();
        assert!(snapshot.settings.iter().any(|entry| entry.user == UserSelector::All));
    }

    #[test]
    fn remove_packages_covers_every_user() {
        let mut ledger = ledger_on(1);
        ledger.record_usage(0, "com.example.game", 10_010, &sample(1, 1, true));
        ledger.record_usage(10, "com.example.game", 1_010_010, &sample(1, 1, true));
        ledger.record_usage(10, "com.example.maps", 1_010_011, &sample(1, 1, true));
        let removed = ledger.remove_packages(&["com.example.game".to_string()]);
        assert_eq!(
            removed,
            vec![(0, "com.example.game".to_string()), (10, "com.example.game".to_string())]
        );
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn today_stats_skip_records_without_usage() {
        let mut ledger = ledger_on(1);
        ledger.record_usage(0, "com.example.game", 10_010, &sample(7, 1, true));
        ledger.sync_killable_state(0, "com.example.maps", None, ComponentType::ThirdParty, true);
        let stats = ledger.today_io_usage_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].written_bytes.total(), 21);
    }
}
