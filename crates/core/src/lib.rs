use serde::{Deserialize, Serialize};

mod config;
mod stats;

pub use config::{
    IoOveruseAlertThreshold, IoOveruseConfiguration, ResourceOveruseConfiguration,
};
pub use stats::{
    FLAG_MINIMUM_STATS_IO_1_GB, FLAG_MINIMUM_STATS_IO_1_MB, FLAG_MINIMUM_STATS_IO_100_MB,
    FLAG_RESOURCE_OVERUSE_IO, HistoricalIoOveruseStats, IoOveruseStats, ResourceOveruseStats,
    StatsPeriod, minimum_bytes_for_flag,
};

/// Number of uids reserved per user.
pub const PER_USER_RANGE: u32 = 100_000;

/// Prefix of the generic name given to a group of packages sharing one uid.
pub const SHARED_PACKAGE_PREFIX: &str = "shared:";

pub const SECONDS_PER_DAY: i64 = 86_400;

pub fn user_id_of(uid: u32) -> u32 {
    uid / PER_USER_RANGE
}

pub fn shared_package_name(shared_user_name: &str) -> String {
    format!("{SHARED_PACKAGE_PREFIX}{shared_user_name}")
}

pub fn is_shared_package(generic_package_name: &str) -> bool {
    generic_package_name.starts_with(SHARED_PACKAGE_PREFIX)
}

/// Either a single user or every user on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UserSelector {
    All,
    User(u32),
}

/// Write bytes split by the system state they were written in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerStateBytes {
    pub foreground_bytes: u64,
    pub background_bytes: u64,
    pub garage_mode_bytes: u64,
}

impl PerStateBytes {
    pub const fn new(foreground_bytes: u64, background_bytes: u64, garage_mode_bytes: u64) -> Self {
        Self {
            foreground_bytes,
            background_bytes,
            garage_mode_bytes,
        }
    }

    pub fn total(&self) -> u64 {
        self.foreground_bytes
            .saturating_add(self.background_bytes)
            .saturating_add(self.garage_mode_bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }

    /// True when any mode has no bytes left.
    pub fn any_exhausted(&self) -> bool {
        self.foreground_bytes == 0 || self.background_bytes == 0 || self.garage_mode_bytes == 0
    }

    pub fn all_positive(&self) -> bool {
        self.foreground_bytes > 0 && self.background_bytes > 0 && self.garage_mode_bytes > 0
    }

    pub fn max(&self, other: &PerStateBytes) -> PerStateBytes {
        PerStateBytes {
            foreground_bytes: self.foreground_bytes.max(other.foreground_bytes),
            background_bytes: self.background_bytes.max(other.background_bytes),
            garage_mode_bytes: self.garage_mode_bytes.max(other.garage_mode_bytes),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KillableState {
    Yes,
    No,
    Never,
}

impl KillableState {
    pub fn code(self) -> i64 {
        match self {
            KillableState::Yes => 1,
            KillableState::No => 2,
            KillableState::Never => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(KillableState::Yes),
            2 => Some(KillableState::No),
            3 => Some(KillableState::Never),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentType {
    System,
    Vendor,
    ThirdParty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceOveruseActionType {
    NotKilled,
    NotKilledUserOpted,
    Killed,
    KilledRecurringOveruse,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageIdentifier {
    pub name: String,
    pub uid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOveruseAction {
    pub package_identifier: PackageIdentifier,
    pub resource_types: Vec<ResourceType>,
    pub action_type: ResourceOveruseActionType,
    pub action_taken_time_ms: i64,
}

/// I/O counters the daemon reports for one uid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonIoOveruseStats {
    pub killable_on_overuse: bool,
    pub written_bytes: PerStateBytes,
    pub remaining_write_bytes: PerStateBytes,
    pub total_overuses: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIoOveruseStats {
    pub uid: u32,
    pub should_notify: bool,
    pub io_overuse_stats: DaemonIoOveruseStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageKillableState {
    pub package_name: String,
    pub user_id: u32,
    pub killable_state: KillableState,
}

/// Per-day usage of one (user, generic package) pair as persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoUsage {
    pub written_bytes: PerStateBytes,
    pub remaining_write_bytes: PerStateBytes,
    pub forgiven_write_bytes: PerStateBytes,
    pub total_overuses: u64,
    pub total_times_killed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPackageSettingsEntry {
    pub user: UserSelector,
    pub package_name: String,
    pub killable_state: KillableState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoUsageStatsEntry {
    pub user_id: u32,
    pub package_name: String,
    pub io_usage: IoUsage,
}

/// Today's written bytes handed back to a restarted daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPackageIoUsageStats {
    pub user_id: u32,
    pub package_name: String,
    pub written_bytes: PerStateBytes,
    pub forgiven_write_bytes: PerStateBytes,
    pub total_overuses: u64,
}
