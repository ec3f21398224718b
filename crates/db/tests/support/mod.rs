#![allow(dead_code)]

use std::path::PathBuf;

use chrono::NaiveDate;
use overuse_core::{IoUsage, IoUsageStatsEntry, PerStateBytes};
use tempfile::TempDir;
use overuse_db::Db;

pub struct TestDb {
    pub _dir: TempDir,
    pub db: Db,
    pub path: PathBuf,
}

pub fn setup_db() -> TestDb {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("test.sqlite");
    let mut db = Db::open(&path).expect("open db");
    db.migrate().expect("migrate db");
    TestDb {
        _dir: dir,
        db,
        path,
    }
}

pub fn day(year: i32, month: u32, date: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, date).expect("valid date")
}

pub fn make_usage_entry(
    user_id: u32,
    package_name: &str,
    written: PerStateBytes,
    total_overuses: u64,
    total_times_killed: u64,
) -> IoUsageStatsEntry {
    IoUsageStatsEntry {
        user_id,
        package_name: package_name.to_string(),
        io_usage: IoUsage {
            written_bytes: written,
            remaining_write_bytes: PerStateBytes::new(100, 200, 300),
            forgiven_write_bytes: PerStateBytes::default(),
            total_overuses,
            total_times_killed,
        },
    }
}
