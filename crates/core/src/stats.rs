use serde::{Deserialize, Serialize};

use crate::PerStateBytes;

pub const FLAG_RESOURCE_OVERUSE_IO: u32 = 1 << 0;

pub const FLAG_MINIMUM_STATS_IO_1_MB: u32 = 1 << 0;
pub const FLAG_MINIMUM_STATS_IO_100_MB: u32 = 1 << 1;
pub const FLAG_MINIMUM_STATS_IO_1_GB: u32 = 1 << 2;

const MIB: u64 = 1024 * 1024;

/// Minimum written bytes selected by a minimum-stats flag. `None` when the
/// flag has more than one bit set or an unknown bit.
pub fn minimum_bytes_for_flag(flag: u32) -> Option<u64> {
    match flag {
        0 => Some(0),
        FLAG_MINIMUM_STATS_IO_1_MB => Some(MIB),
        FLAG_MINIMUM_STATS_IO_100_MB => Some(100 * MIB),
        FLAG_MINIMUM_STATS_IO_1_GB => Some(1024 * MIB),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatsPeriod {
    CurrentDay,
    Past3Days,
    Past7Days,
    Past15Days,
    Past30Days,
}

impl StatsPeriod {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(StatsPeriod::CurrentDay),
            2 => Some(StatsPeriod::Past3Days),
            3 => Some(StatsPeriod::Past7Days),
            4 => Some(StatsPeriod::Past15Days),
            5 => Some(StatsPeriod::Past30Days),
            _ => None,
        }
    }

    /// Trailing days covered; zero means the current day only.
    pub fn num_days(self) -> u32 {
        match self {
            StatsPeriod::CurrentDay => 0,
            StatsPeriod::Past3Days => 3,
            StatsPeriod::Past7Days => 7,
            StatsPeriod::Past15Days => 15,
            StatsPeriod::Past30Days => 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoOveruseStats {
    pub start_time_secs: i64,
    pub duration_secs: i64,
    pub total_overuses: u64,
    pub total_times_killed: u64,
    pub total_bytes_written: u64,
    pub killable_on_overuse: bool,
    pub remaining_write_bytes: PerStateBytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOveruseStats {
    pub package_name: String,
    pub user_id: u32,
    pub io_overuse_stats: Option<IoOveruseStats>,
}

/// Usage aggregated over persisted days preceding the current one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalIoOveruseStats {
    pub start_time_secs: i64,
    pub total_bytes_written: u64,
    pub total_overuses: u64,
    pub total_times_killed: u64,
}
