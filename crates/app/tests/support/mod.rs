#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use overuse_app::{
    ApplicationInfo, DaemonClient, DaemonError, EnabledState, HandlerConfig, NoRecurrence,
    OveruseService, OveruseStore, PackageError, PackageManager, RecurrencePolicy, ServiceDeps,
    TimeSource,
};
use overuse_core::{
    ComponentType, DaemonIoOveruseStats, IoOveruseAlertThreshold, IoOveruseConfiguration,
    PackageIoOveruseStats, PerStateBytes, ResourceOveruseAction, ResourceOveruseConfiguration,
};
use tempfile::TempDir;

#[derive(Default)]
pub struct FakeDaemon {
    pub update_calls: Mutex<Vec<Vec<ResourceOveruseConfiguration>>>,
    pub get_calls: AtomicUsize,
    pub actions: Mutex<Vec<ResourceOveruseAction>>,
    pub reset_calls: Mutex<Vec<Vec<String>>>,
    pub configs: Mutex<Vec<ResourceOveruseConfiguration>>,
    /// Number of upcoming update calls that fail as if the connection broke.
    pub failing_updates: AtomicUsize,
}

impl FakeDaemon {
    pub fn update_count(&self) -> usize {
        self.update_calls.lock().expect("lock").len()
    }

    pub fn actions(&self) -> Vec<ResourceOveruseAction> {
        self.actions.lock().expect("lock").clone()
    }

    pub fn set_configs(&self, configs: Vec<ResourceOveruseConfiguration>) {
        *self.configs.lock().expect("lock") = configs;
    }

    pub fn fail_next_updates(&self, count: usize) {
        self.failing_updates.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl DaemonClient for FakeDaemon {
    async fn update_resource_overuse_configurations(
        &self,
        configs: Vec<ResourceOveruseConfiguration>,
    ) -> Result<(), DaemonError> {
        let failing = self.failing_updates.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_updates.store(failing - 1, Ordering::SeqCst);
            return Err(DaemonError::Disconnected);
        }
        self.update_calls.lock().expect("lock").push(configs.clone());
        *self.configs.lock().expect("lock") = configs;
        Ok(())
    }

    async fn get_resource_overuse_configurations(
        &self,
    ) -> Result<Vec<ResourceOveruseConfiguration>, DaemonError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.configs.lock().expect("lock").clone())
    }

    async fn action_taken_on_resource_overuse(
        &self,
        actions: Vec<ResourceOveruseAction>,
    ) -> Result<(), DaemonError> {
        self.actions.lock().expect("lock").extend(actions);
        Ok(())
    }

    async fn reset_resource_overuse_stats(
        &self,
        package_names: Vec<String>,
    ) -> Result<(), DaemonError> {
        self.reset_calls.lock().expect("lock").push(package_names);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePackageManager {
    pub users: Mutex<Vec<u32>>,
    pub packages: Mutex<Vec<ApplicationInfo>>,
    pub enabled_states: Mutex<HashMap<(String, u32), EnabledState>>,
    pub set_calls: Mutex<Vec<(String, u32, EnabledState)>>,
}

impl FakePackageManager {
    pub fn new(users: &[u32]) -> Self {
        let manager = Self::default();
        *manager.users.lock().expect("lock") = users.to_vec();
        manager
    }

    pub fn install(&self, info: ApplicationInfo) {
        self.packages.lock().expect("lock").push(info);
    }

    pub fn set_enabled(&self, package_name: &str, user_id: u32, state: EnabledState) {
        self.enabled_states
            .lock()
            .expect("lock")
            .insert((package_name.to_string(), user_id), state);
    }

    pub fn set_calls(&self) -> Vec<(String, u32, EnabledState)> {
        self.set_calls.lock().expect("lock").clone()
    }
}

impl PackageManager for FakePackageManager {
    fn alive_user_ids(&self) -> Vec<u32> {
        self.users.lock().expect("lock").clone()
    }

    fn installed_packages(&self, user_id: u32) -> Result<Vec<ApplicationInfo>, PackageError> {
        Ok(self
            .packages
            .lock()
            .expect("lock")
            .iter()
            .filter(|info| overuse_core::user_id_of(info.uid) == user_id)
            .cloned()
            .collect())
    }

    fn packages_for_uid(&self, uid: u32) -> Vec<ApplicationInfo> {
        self.packages
            .lock()
            .expect("lock")
            .iter()
            .filter(|info| info.uid == uid)
            .cloned()
            .collect()
    }

    fn application_info(
        &self,
        package_name: &str,
        user_id: u32,
    ) -> Result<Option<ApplicationInfo>, PackageError> {
        Ok(self
            .packages
            .lock()
            .expect("lock")
            .iter()
            .find(|info| {
                info.package_name == package_name && overuse_core::user_id_of(info.uid) == user_id
            })
            .cloned())
    }

    fn enabled_state(&self, package_name: &str, user_id: u32) -> Result<EnabledState, PackageError> {
        Ok(self
            .enabled_states
            .lock()
            .expect("lock")
            .get(&(package_name.to_string(), user_id))
            .copied()
            .unwrap_or(EnabledState::Default))
    }

    fn set_enabled_state(
        &self,
        package_name: &str,
        user_id: u32,
        state: EnabledState,
    ) -> Result<(), PackageError> {
        self.set_enabled(package_name, user_id, state);
        self.set_calls
            .lock()
            .expect("lock")
            .push((package_name.to_string(), user_id, state));
        Ok(())
    }
}

pub struct FixedTimeSource {
    now: Mutex<DateTime<Utc>>,
}

impl FixedTimeSource {
    pub fn at(year: i32, month: u32, day: u32, hour: u32) -> Self {
        let now = Utc
            .with_ymd_and_hms(year, month, day, hour, 0, 0)
            .single()
            .expect("valid time");
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().expect("lock");
        *now += by;
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("lock")
    }
}

pub fn test_config() -> HandlerConfig {
    HandlerConfig {
        kill_delay_ms: 50,
        daemon_wait_timeout_ms: 100,
        pending_retry_attempts: 3,
        pending_retry_backoff_ms: 10,
        retention_days: 30,
    }
}

pub struct Harness {
    pub _dir: TempDir,
    pub db_path: PathBuf,
    pub daemon: Arc<FakeDaemon>,
    pub packages: Arc<FakePackageManager>,
    pub time: Arc<FixedTimeSource>,
    pub recurrence: Arc<dyn RecurrencePolicy>,
    pub service: OveruseService,
}

impl Harness {
    pub async fn start(packages: FakePackageManager) -> Self {
        Self::start_with_recurrence(packages, Arc::new(NoRecurrence)).await
    }

    pub async fn start_with_recurrence(
        packages: FakePackageManager,
        recurrence: Arc<dyn RecurrencePolicy>,
    ) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("overuse.sqlite");
        let daemon = Arc::new(FakeDaemon::default());
        let packages = Arc::new(packages);
        let time = Arc::new(FixedTimeSource::at(2025, 6, 10, 12));
        let service = start_service(&db_path, &daemon, &packages, &time, &recurrence).await;
        Self {
            _dir: dir,
            db_path,
            daemon,
            packages,
            time,
            recurrence,
            service,
        }
    }

    /// Starts a second service over the same store and collaborators.
    pub async fn restart(&self) -> OveruseService {
        start_service(
            &self.db_path,
            &self.daemon,
            &self.packages,
            &self.time,
            &self.recurrence,
        )
        .await
    }
}

async fn start_service(
    db_path: &PathBuf,
    daemon: &Arc<FakeDaemon>,
    packages: &Arc<FakePackageManager>,
    time: &Arc<FixedTimeSource>,
    recurrence: &Arc<dyn RecurrencePolicy>,
) -> OveruseService {
    let deps = ServiceDeps::new(
        OveruseStore::new(db_path),
        daemon.clone(),
        packages.clone(),
        test_config(),
    )
    .with_time_source(time.clone())
    .with_recurrence_policy(recurrence.clone());
    OveruseService::start(deps).await.expect("start service")
}

pub fn app_info(package_name: &str, uid: u32) -> ApplicationInfo {
    ApplicationInfo {
        package_name: package_name.to_string(),
        uid,
        ..ApplicationInfo::default()
    }
}

pub fn shared_app_info(package_name: &str, shared_user_name: &str, uid: u32) -> ApplicationInfo {
    ApplicationInfo {
        shared_user_name: Some(shared_user_name.to_string()),
        ..app_info(package_name, uid)
    }
}

pub fn system_app_info(package_name: &str, uid: u32) -> ApplicationInfo {
    ApplicationInfo {
        is_system: true,
        ..app_info(package_name, uid)
    }
}

pub fn sample(uid: u32, written: u64, remaining: u64, killable_on_overuse: bool) -> PackageIoOveruseStats {
    PackageIoOveruseStats {
        uid,
        should_notify: false,
        io_overuse_stats: DaemonIoOveruseStats {
            killable_on_overuse,
            written_bytes: PerStateBytes::new(written, written, written),
            remaining_write_bytes: PerStateBytes::new(remaining, remaining, remaining),
            total_overuses: u64::from(remaining == 0),
        },
    }
}

pub fn overuse_sample(uid: u32) -> PackageIoOveruseStats {
    sample(uid, 1_000, 0, true)
}

pub fn config(component_type: ComponentType) -> ResourceOveruseConfiguration {
    ResourceOveruseConfiguration {
        io_overuse_configuration: Some(IoOveruseConfiguration {
            component_level_thresholds: PerStateBytes::new(1_000, 2_000, 3_000),
            system_wide_thresholds: vec![IoOveruseAlertThreshold {
                duration_secs: 30,
                written_bytes_per_second: 4_096,
            }],
            ..IoOveruseConfiguration::default()
        }),
        ..ResourceOveruseConfiguration::new(component_type)
    }
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
