use chrono::{Duration, NaiveDate};
use overuse_core::{HistoricalIoOveruseStats, IoUsageStatsEntry};
use rusqlite::params;

use crate::Db;
use crate::error::Result;
use crate::helpers::{bytes_from_sql, bytes_to_sql, date_epoch, row_to_io_usage_entry};

const IO_USAGE_COLUMNS: &str = r#"
    user_id, package_name, num_overuses, num_times_killed,
    written_fg_bytes, written_bg_bytes, written_garage_bytes,
    remaining_fg_bytes, remaining_bg_bytes, remaining_garage_bytes,
    forgiven_fg_bytes, forgiven_bg_bytes, forgiven_garage_bytes
"#;

impl Db {
    pub fn save_io_usage_stats(
        &mut self,
        date: NaiveDate,
        entries: &[IoUsageStatsEntry],
    ) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let epoch = date_epoch(date);
        let tx = self.conn.transaction()?;
        let mut written = 0usize;
        {
            let mut stmt = tx.prepare(&format!(
                r#"
                INSERT OR REPLACE INTO io_usage_stats (date_epoch, {IO_USAGE_COLUMNS})
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                "#
            ))?;
            for entry in entries {
                let usage = &entry.io_usage;
                written += stmt.execute(params![
                    epoch,
                    i64::from(entry.user_id),
                    entry.package_name,
                    bytes_to_sql(usage.total_overuses),
                    bytes_to_sql(usage.total_times_killed),
                    bytes_to_sql(usage.written_bytes.foreground_bytes),
                    bytes_to_sql(usage.written_bytes.background_bytes),
                    bytes_to_sql(usage.written_bytes.garage_mode_bytes),
                    bytes_to_sql(usage.remaining_write_bytes.foreground_bytes),
                    bytes_to_sql(usage.remaining_write_bytes.background_bytes),
                    bytes_to_sql(usage.remaining_write_bytes.garage_mode_bytes),
                    bytes_to_sql(usage.forgiven_write_bytes.foreground_bytes),
                    bytes_to_sql(usage.forgiven_write_bytes.background_bytes),
                    bytes_to_sql(usage.forgiven_write_bytes.garage_mode_bytes),
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    pub fn io_usage_stats_for_date(&self, date: NaiveDate) -> Result<Vec<IoUsageStatsEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {IO_USAGE_COLUMNS}
            FROM io_usage_stats
            WHERE date_epoch = ?1
            ORDER BY user_id ASC, package_name ASC
            "#
        ))?;
        let mut rows = stmt.query(params![date_epoch(date)])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(row_to_io_usage_entry(row)?);
        }
        Ok(entries)
    }

    /// Kill counts are cumulative, so the largest stored value is the latest.
    pub fn latest_times_killed(&self) -> Result<Vec<(u32, String, u64)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT user_id, package_name, MAX(num_times_killed)
            FROM io_usage_stats
            GROUP BY user_id, package_name
            HAVING MAX(num_times_killed) > 0
            "#,
        )?;
        let mut rows = stmt.query([])?;
        let mut counts = Vec::new();
        while let Some(row) = rows.next()? {
            let user_id: i64 = row.get(0)?;
            let Ok(user_id) = u32::try_from(user_id) else {
                continue;
            };
            counts.push((user_id, row.get(1)?, bytes_from_sql(row.get(2)?)));
        }
        Ok(counts)
    }

    /// Aggregates the `num_days` persisted days before `today`.
    pub fn historical_io_overuse_stats(
        &self,
        user_id: u32,
        package_name: &str,
        today: NaiveDate,
        num_days: u32,
    ) -> Result<Option<HistoricalIoOveruseStats>> {
        if num_days == 0 {
            return Ok(None);
        }
        let start = today - Duration::days(i64::from(num_days));
        let mut stmt = self.conn.prepare(
            r#"
            SELECT
              COUNT(*),
              MIN(date_epoch),
              SUM(written_fg_bytes + written_bg_bytes + written_garage_bytes),
              SUM(num_overuses),
              MAX(num_times_killed)
            FROM io_usage_stats
            WHERE user_id = ?1
              AND package_name = ?2
              AND date_epoch >= ?3
              AND date_epoch < ?4
            "#,
        )?;
        let stats = stmt.query_row(
            params![
                i64::from(user_id),
                package_name,
                date_epoch(start),
                date_epoch(today)
            ],
            |row| {
                let count: i64 = row.get(0)?;
                if count == 0 {
                    return Ok(None);
                }
                Ok(Some(HistoricalIoOveruseStats {
                    start_time_secs: row.get::<_, Option<i64>>(1)?.unwrap_or_default(),
                    total_bytes_written: bytes_from_sql(row.get::<_, Option<i64>>(2)?.unwrap_or(0)),
                    total_overuses: bytes_from_sql(row.get::<_, Option<i64>>(3)?.unwrap_or(0)),
                    total_times_killed: bytes_from_sql(row.get::<_, Option<i64>>(4)?.unwrap_or(0)),
                }))
            },
        )?;
        Ok(stats)
    }

    pub fn prune_io_usage_stats(&self, before: NaiveDate) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM io_usage_stats WHERE date_epoch < ?1",
            params![date_epoch(before)],
        )?;
        Ok(deleted)
    }
}
