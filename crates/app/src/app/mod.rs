mod configs;
mod queries;
mod samples;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use overuse_core::{
    ComponentType, KillableState, PackageIoOveruseStats, ResourceOveruseAction,
    ResourceOveruseStats,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::config::HandlerConfig;
use crate::daemon::DaemonClient;
use crate::error::{AppError, Result};
use crate::packages::{ApplicationInfo, PackageInfoHandler, PackageManager};
use crate::services::{
    ListenerRegistry, ListenerScope, NoRecurrence, OveruseConfigState, OveruseListener,
    OveruseStore, RecurrencePolicy, UsageLedger, UsageSnapshot,
};
use crate::util::time::{SystemTimeSource, TimeSource};

/// Collaborators the handler is built from.
pub struct ServiceDeps {
    pub store: OveruseStore,
    pub daemon: Arc<dyn DaemonClient>,
    pub package_manager: Arc<dyn PackageManager>,
    pub time: Arc<dyn TimeSource>,
    pub recurrence: Arc<dyn RecurrencePolicy>,
    pub config: HandlerConfig,
}

impl ServiceDeps {
    pub fn new(
        store: OveruseStore,
        daemon: Arc<dyn DaemonClient>,
        package_manager: Arc<dyn PackageManager>,
        config: HandlerConfig,
    ) -> Self {
        Self {
            store,
            daemon,
            package_manager,
            time: Arc::new(SystemTimeSource),
            recurrence: Arc::new(NoRecurrence),
            config,
        }
    }

    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    pub fn with_recurrence_policy(mut self, recurrence: Arc<dyn RecurrencePolicy>) -> Self {
        self.recurrence = recurrence;
        self
    }
}

struct HandlerState {
    ledger: UsageLedger,
    configs: OveruseConfigState,
    listeners: ListenerRegistry,
    /// Record sets whose write failed, retried on the next flush.
    unsaved: Vec<UsageSnapshot>,
}

enum WorkItem {
    LatestIoOveruseStats(Vec<PackageIoOveruseStats>),
    DaemonConnectionChanged(bool),
    Barrier(oneshot::Sender<()>),
}

struct PackageClassification {
    generic_package_name: String,
    uid: u32,
    component_type: ComponentType,
    members: Vec<ApplicationInfo>,
}

struct Inner {
    config: HandlerConfig,
    store: OveruseStore,
    daemon: Arc<dyn DaemonClient>,
    packages: PackageInfoHandler,
    time: Arc<dyn TimeSource>,
    recurrence: Arc<dyn RecurrencePolicy>,
    state: Mutex<HandlerState>,
    connected: watch::Sender<bool>,
    work: mpsc::UnboundedSender<WorkItem>,
}

/// The resource overuse handler. Cheap to clone; every clone shares one state.
#[derive(Clone)]
pub struct OveruseService {
    inner: Arc<Inner>,
}

impl OveruseService {
    /// Prepares the store, loads persisted state and starts the worker. Must
    /// be called from within a tokio runtime.
    pub async fn start(deps: ServiceDeps) -> Result<Self> {
        let store = deps.store.clone();
        let today = deps.time.today();
        let loaded = run_blocking(move || {
            store.setup()?;
            store.load(today)
        })
        .await?;
        let mut ledger = UsageLedger::new();
        ledger.load(loaded, today);
        let records = ledger.len();

        let (work, work_rx) = mpsc::unbounded_channel();
        let (connected, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            config: deps.config,
            store: deps.store,
            daemon: deps.daemon,
            packages: PackageInfoHandler::new(deps.package_manager),
            time: deps.time,
            recurrence: deps.recurrence,
            state: Mutex::new(HandlerState {
                ledger,
                configs: OveruseConfigState::new(),
                listeners: ListenerRegistry::new(),
                unsaved: Vec::new(),
            }),
            connected,
            work,
        });
        tokio::spawn(run_worker(Arc::downgrade(&inner), work_rx));
        info!(records, %today, "resource overuse handler started");
        Ok(Self { inner })
    }

    /// Queues a sample batch pushed by the daemon.
    pub fn latest_io_overuse_stats(&self, samples: Vec<PackageIoOveruseStats>) {
        self.inner.post(WorkItem::LatestIoOveruseStats(samples));
    }

    /// Publishes daemon connectivity and queues the reconnect handling.
    pub fn daemon_connection_changed(&self, connected: bool) {
        self.inner.connected.send_replace(connected);
        self.inner.post(WorkItem::DaemonConnectionChanged(connected));
    }

    pub fn is_daemon_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Resolves once every work item queued before the call has been handled.
    pub async fn sync_worker(&self) {
        let (done, wait) = oneshot::channel();
        self.inner.post(WorkItem::Barrier(done));
        let _ = wait.await;
    }
}

async fn run_worker(inner: Weak<Inner>, mut work: mpsc::UnboundedReceiver<WorkItem>) {
    while let Some(item) = work.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match item {
            WorkItem::LatestIoOveruseStats(samples) => {
                samples::process_latest_io_overuse_stats(&inner, samples).await;
            }
            WorkItem::DaemonConnectionChanged(connected) => {
                configs::handle_daemon_connection_change(&inner, connected).await;
            }
            WorkItem::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("resource overuse worker stopped");
}

async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| AppError::Message(format!("blocking task failed: {}", err)))?
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, HandlerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn post(&self, item: WorkItem) {
        if self.work.send(item).is_err() {
            warn!("resource overuse worker is not running");
        }
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    async fn wait_for_daemon(&self) -> Result<()> {
        let mut connected = self.connected.subscribe();
        let waited = tokio::time::timeout(
            self.config.daemon_wait_timeout(),
            connected.wait_for(|value| *value),
        )
        .await;
        match waited {
            Ok(Ok(_)) => Ok(()),
            _ => Err(AppError::Unavailable(
                "watchdog daemon is not connected".to_string(),
            )),
        }
    }

    /// Writes settings and usage independently; a failed half is kept for retry.
    async fn persist_snapshot(&self, snapshot: UsageSnapshot) -> Result<()> {
        let date = snapshot.date.unwrap_or_else(|| self.time.today());
        let store = self.store.clone();
        let (settings, usage, snapshot) = run_blocking(move || {
            let settings = store.save_settings(&snapshot.settings);
            let usage = store.save_io_usage(date, &snapshot.io_usage);
            Ok((settings, usage, snapshot))
        })
        .await?;

        let mut retry = UsageSnapshot {
            date: Some(date),
            ..UsageSnapshot::default()
        };
        let mut failure = None;
        match settings {
            Ok(count) => debug!(count, %date, "saved package settings"),
            Err(err) => {
                error!(error = %err, %date, "saving package settings failed");
                retry.settings = snapshot.settings;
                failure = Some(err);
            }
        }
        match usage {
            Ok(count) => debug!(count, %date, "saved io usage stats"),
            Err(err) => {
                error!(error = %err, %date, "saving io usage stats failed");
                retry.io_usage = snapshot.io_usage;
                failure.get_or_insert(err);
            }
        }
        match failure {
            None => Ok(()),
            Some(err) => {
                self.state().unsaved.push(retry);
                Err(err)
            }
        }
    }

    /// Retries every earlier failed write, then writes `snapshot`. All writes
    /// are attempted; the first failure is returned.
    async fn persist_pending(&self, snapshot: UsageSnapshot) -> Result<()> {
        let mut pending = std::mem::take(&mut self.state().unsaved);
        if !pending.is_empty() {
            debug!(count = pending.len(), "retrying unsaved usage snapshots");
        }
        pending.push(snapshot);
        let mut failure = None;
        for snapshot in pending {
            if let Err(err) = self.persist_snapshot(snapshot).await {
                failure.get_or_insert(err);
            }
        }
        match failure {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    async fn roll_over_if_needed(&self) {
        let today = self.time.today();
        let snapshot = self.state().ledger.check_and_handle_day_rollover(today);
        if let Some(snapshot) = snapshot {
            info!(%today, "started a new usage day");
            let _ = self.persist_pending(snapshot).await;
        }
    }

    async fn report_actions(&self, actions: Vec<ResourceOveruseAction>) {
        if actions.is_empty() {
            return;
        }
        let count = actions.len();
        if let Err(err) = self.daemon.action_taken_on_resource_overuse(actions).await {
            warn!(error = %err, count, "reporting overuse actions to the daemon failed");
        }
    }

    fn notify(&self, notifications: Vec<(u32, ResourceOveruseStats)>) {
        if notifications.is_empty() {
            return;
        }
        let deliveries: Vec<(Vec<OveruseListener>, ResourceOveruseStats)> = {
            let state = self.state();
            notifications
                .into_iter()
                .map(|(uid, stats)| (state.listeners.io_recipients(uid), stats))
                .collect()
        };
        for (listeners, stats) in deliveries {
            for listener in listeners {
                if listener.send(stats.clone()).is_err() {
                    debug!(package = %stats.package_name, "overuse listener is gone");
                }
            }
        }
    }

    fn add_listener(
        self: &Arc<Self>,
        scope: ListenerScope,
        flags: u32,
        listener: OveruseListener,
    ) -> Result<()> {
        self.state().listeners.add(scope, flags, listener.clone())?;
        let inner = Arc::downgrade(self);
        let watched = listener.clone();
        let watcher = tokio::spawn(async move {
            watched.closed().await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let removed = inner.state().listeners.detach(&watched);
            if removed > 0 {
                debug!(?scope, removed, "overuse listener detached");
            }
        });
        let attached =
            self.state()
                .listeners
                .attach_watcher(scope, &listener, watcher.abort_handle());
        if !attached {
            watcher.abort();
        }
        Ok(())
    }

    fn classify_application(&self, info: ApplicationInfo) -> PackageClassification {
        let generic_package_name = info.generic_package_name();
        let uid = info.uid;
        let members = if info.shared_user_name.is_some() {
            let members = self.packages.packages_for_uid(uid);
            if members.is_empty() { vec![info] } else { members }
        } else {
            vec![info]
        };
        let component_type = self.packages.classify(&members, &generic_package_name);
        PackageClassification {
            generic_package_name,
            uid,
            component_type,
            members,
        }
    }

    fn classify_user_package(
        &self,
        package_name: &str,
        user_id: u32,
    ) -> Result<Option<PackageClassification>> {
        let info = self
            .packages
            .package_manager()
            .application_info(package_name, user_id)?;
        Ok(info.map(|info| self.classify_application(info)))
    }
}

impl HandlerState {
    fn sync_classification(
        &mut self,
        user_id: u32,
        classification: &PackageClassification,
    ) -> KillableState {
        let is_safe_to_kill = self.configs.is_safe_to_kill(
            &classification.generic_package_name,
            classification.component_type,
            &classification.members,
        );
        self.ledger.sync_killable_state(
            user_id,
            &classification.generic_package_name,
            Some(classification.uid),
            classification.component_type,
            is_safe_to_kill,
        )
    }
}
