use chrono::NaiveDate;
use overuse_core::{
    IoUsage, IoUsageStatsEntry, KillableState, PerStateBytes, UserPackageSettingsEntry,
    UserSelector,
};
use rusqlite::Row;

use crate::error::{DbError, Result};

/// `user_id` stored for settings that apply to every user.
pub const USER_ALL_ID: i64 = -1;

/// Seconds since the epoch at the start of `date` (UTC).
pub fn date_epoch(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|value| value.and_utc().timestamp())
        .unwrap_or_default()
}

pub(crate) fn bytes_to_sql(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn bytes_from_sql(value: i64) -> u64 {
    value.max(0) as u64
}

pub(crate) fn user_to_sql(user: UserSelector) -> i64 {
    match user {
        UserSelector::All => USER_ALL_ID,
        UserSelector::User(user_id) => i64::from(user_id),
    }
}

pub(crate) fn user_from_sql(value: i64) -> Result<UserSelector> {
    if value == USER_ALL_ID {
        return Ok(UserSelector::All);
    }
    u32::try_from(value)
        .map(UserSelector::User)
        .map_err(|_| DbError::Corrupt(format!("invalid user id {}", value)))
}

pub(crate) fn row_to_settings_entry(row: &Row<'_>) -> Result<UserPackageSettingsEntry> {
    let user = user_from_sql(row.get(0)?)?;
    let code: i64 = row.get(2)?;
    let killable_state = KillableState::from_code(code)
        .ok_or_else(|| DbError::Corrupt(format!("invalid killable state {}", code)))?;
    Ok(UserPackageSettingsEntry {
        user,
        package_name: row.get(1)?,
        killable_state,
    })
}

/// Maps the column order used by every `io_usage_stats` select in this crate.
pub(crate) fn row_to_io_usage_entry(row: &Row<'_>) -> Result<IoUsageStatsEntry> {
    let user_id: i64 = row.get(0)?;
    let user_id = u32::try_from(user_id)
        .map_err(|_| DbError::Corrupt(format!("invalid user id {}", user_id)))?;
    Ok(IoUsageStatsEntry {
        user_id,
        package_name: row.get(1)?,
        io_usage: IoUsage {
            total_overuses: bytes_from_sql(row.get(2)?),
            total_times_killed: bytes_from_sql(row.get(3)?),
            written_bytes: per_state_from_row(row, 4)?,
            remaining_write_bytes: per_state_from_row(row, 7)?,
            forgiven_write_bytes: per_state_from_row(row, 10)?,
        },
    })
}

fn per_state_from_row(row: &Row<'_>, start: usize) -> Result<PerStateBytes> {
    Ok(PerStateBytes {
        foreground_bytes: bytes_from_sql(row.get(start)?),
        background_bytes: bytes_from_sql(row.get(start + 1)?),
        garage_mode_bytes: bytes_from_sql(row.get(start + 2)?),
    })
}
