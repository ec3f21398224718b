mod support;

use std::path::Path;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use overuse_app::Caller;
use overuse_core::{
    FLAG_RESOURCE_OVERUSE_IO, IoUsage, IoUsageStatsEntry, KillableState, PerStateBytes,
    UserSelector,
};
use overuse_db::Db;
use support::{FakePackageManager, Harness, app_info, overuse_sample, sample, wait_until};

fn day(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, month, day).expect("date")
}

fn rename_table(db_path: &Path, from: &str, to: &str) {
    let conn = rusqlite::Connection::open(db_path).expect("open conn");
    conn.execute_batch(&format!("ALTER TABLE {from} RENAME TO {to}"))
        .expect("rename table");
}

fn game_harness_packages() -> FakePackageManager {
    let packages = FakePackageManager::new(&[0]);
    packages.install(app_info("com.example.game", 10_010));
    packages
}

#[tokio::test]
async fn day_rollover_persists_previous_day_and_resets_counters() {
    let harness = Harness::start(game_harness_packages()).await;
    harness
        .service
        .latest_io_overuse_stats(vec![sample(10_010, 100, 50, true)]);
    harness.service.sync_worker().await;

    harness.time.advance(Duration::days(1));
    assert!(harness.service.today_io_usage_stats().await.is_empty());

    let db = Db::open(&harness.db_path).expect("open db");
    let persisted = db.io_usage_stats_for_date(day(6, 10)).expect("previous day");
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].package_name, "com.example.game");
    assert_eq!(persisted[0].io_usage.written_bytes.total(), 300);

    let today_only = harness
        .service
        .get_resource_overuse_stats(&Caller::app(10_010), FLAG_RESOURCE_OVERUSE_IO, 1)
        .await
        .expect("stats");
    assert!(today_only.io_overuse_stats.is_none());

    let three_days = harness
        .service
        .get_resource_overuse_stats(&Caller::app(10_010), FLAG_RESOURCE_OVERUSE_IO, 2)
        .await
        .expect("stats")
        .io_overuse_stats
        .expect("history");
    let previous_day_start = Utc
        .with_ymd_and_hms(2025, 6, 10, 0, 0, 0)
        .single()
        .expect("time")
        .timestamp();
    assert_eq!(three_days.total_bytes_written, 300);
    assert_eq!(three_days.start_time_secs, previous_day_start);
    assert_eq!(three_days.duration_secs, 86_400 + 12 * 3_600);
}

#[tokio::test]
async fn kill_count_and_killable_state_survive_rollover() {
    let harness = Harness::start(game_harness_packages()).await;
    harness.service.latest_io_overuse_stats(vec![overuse_sample(10_010)]);
    assert!(wait_until(|| !harness.daemon.actions().is_empty()).await);

    harness.time.advance(Duration::days(1));
    harness
        .service
        .latest_io_overuse_stats(vec![sample(10_010, 10, 900, true)]);
    harness.service.sync_worker().await;

    let io = harness
        .service
        .get_resource_overuse_stats(&Caller::app(10_010), FLAG_RESOURCE_OVERUSE_IO, 1)
        .await
        .expect("stats")
        .io_overuse_stats
        .expect("today");
    assert_eq!(io.total_bytes_written, 30);
    assert_eq!(io.total_overuses, 0);
    assert_eq!(io.total_times_killed, 1);
    assert!(io.killable_on_overuse);
}

#[tokio::test]
async fn flushed_state_is_reloaded_by_a_restarted_handler() {
    let harness = Harness::start(game_harness_packages()).await;
    harness
        .service
        .set_killable_package_as_user(
            &Caller::system(1_000),
            "com.example.game",
            UserSelector::All,
            false,
        )
        .expect("set killable");
    harness
        .service
        .latest_io_overuse_stats(vec![sample(10_010, 40, 60, true)]);
    harness.service.sync_worker().await;
    harness.service.flush().await.expect("flush");

    let restarted = harness.restart().await;
    let today = restarted.today_io_usage_stats().await;
    assert_eq!(today.len(), 1);
    assert_eq!(today[0].user_id, 0);
    assert_eq!(today[0].written_bytes.total(), 120);

    let states = restarted
        .get_package_killable_states_as_user(&Caller::system(1_000), UserSelector::User(0))
        .expect("states");
    assert_eq!(states[0].killable_state, KillableState::No);
}

#[tokio::test]
async fn flush_prunes_history_past_retention() {
    let harness = Harness::start(game_harness_packages()).await;
    let entry = IoUsageStatsEntry {
        user_id: 0,
        package_name: "com.example.game".to_string(),
        io_usage: IoUsage {
            written_bytes: PerStateBytes::new(1, 2, 3),
            ..IoUsage::default()
        },
    };
    {
        let mut db = Db::open(&harness.db_path).expect("open db");
        db.save_io_usage_stats(day(5, 1), std::slice::from_ref(&entry))
            .expect("old day");
        db.save_io_usage_stats(day(5, 20), std::slice::from_ref(&entry))
            .expect("recent day");
    }

    harness.service.flush().await.expect("flush");

    let db = Db::open(&harness.db_path).expect("open db");
    assert!(db.io_usage_stats_for_date(day(5, 1)).expect("old").is_empty());
    assert_eq!(db.io_usage_stats_for_date(day(5, 20)).expect("recent").len(), 1);
}

#[tokio::test]
async fn failed_rollover_write_is_retried_at_the_next_rollover() {
    let harness = Harness::start(game_harness_packages()).await;
    harness
        .service
        .latest_io_overuse_stats(vec![sample(10_010, 100, 50, true)]);
    harness.service.sync_worker().await;

    rename_table(&harness.db_path, "io_usage_stats", "io_usage_stats_offline");
    harness.time.advance(Duration::days(1));
    assert!(harness.service.today_io_usage_stats().await.is_empty());
    rename_table(&harness.db_path, "io_usage_stats_offline", "io_usage_stats");

    harness
        .service
        .latest_io_overuse_stats(vec![sample(10_010, 20, 50, true)]);
    harness.service.sync_worker().await;
    harness.time.advance(Duration::days(1));
    assert!(harness.service.today_io_usage_stats().await.is_empty());

    let db = Db::open(&harness.db_path).expect("open db");
    let first_day = db.io_usage_stats_for_date(day(6, 10)).expect("first day");
    assert_eq!(first_day.len(), 1);
    assert_eq!(first_day[0].io_usage.written_bytes.total(), 300);
    let second_day = db.io_usage_stats_for_date(day(6, 11)).expect("second day");
    assert_eq!(second_day.len(), 1);
    assert_eq!(second_day[0].io_usage.written_bytes.total(), 60);
}

#[tokio::test]
async fn settings_failure_does_not_block_usage_write() {
    let harness = Harness::start(game_harness_packages()).await;
    harness
        .service
        .latest_io_overuse_stats(vec![sample(10_010, 40, 60, true)]);
    harness.service.sync_worker().await;

    rename_table(&harness.db_path, "user_package_settings", "user_package_settings_offline");
    assert!(harness.service.flush().await.is_err());

    let db = Db::open(&harness.db_path).expect("open db");
    let usage = db.io_usage_stats_for_date(day(6, 10)).expect("usage");
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].io_usage.written_bytes.total(), 120);

    rename_table(&harness.db_path, "user_package_settings_offline", "user_package_settings");
    harness.service.flush().await.expect("second flush");

    let settings = db.user_package_settings().expect("settings");
    assert!(settings.iter().any(|entry| {
        entry.user == UserSelector::User(0)
            && entry.package_name == "com.example.game"
            && entry.killable_state == KillableState::Yes
    }));
}
