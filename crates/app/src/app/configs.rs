use std::sync::Arc;

use overuse_core::ResourceOveruseConfiguration;
use tracing::{debug, error, info, warn};

use super::{Inner, OveruseService};
use crate::caller::{Caller, Permission};
use crate::daemon::DaemonError;
use crate::error::Result;
use crate::services::{PendingClaim, validate_configurations, validate_resource_flags};

impl OveruseService {
    /// Pushes the configurations now, or keeps them as the single pending
    /// request until the daemon is reachable.
    pub async fn set_resource_overuse_configurations(
        &self,
        caller: &Caller,
        configs: Vec<ResourceOveruseConfiguration>,
        flags: u32,
    ) -> Result<()> {
        caller.require(Permission::ControlConfig)?;
        validate_configurations(&configs, flags)?;
        let inner = &self.inner;
        {
            let mut state = inner.state();
            if !inner.is_connected() || state.configs.has_pending() {
                if state.configs.stash_pending(configs)? {
                    info!("holding resource overuse configurations until the daemon connects");
                }
                return Ok(());
            }
        }
        match inner
            .daemon
            .update_resource_overuse_configurations(configs.clone())
            .await
        {
            Ok(()) => {
                sync_from_daemon(inner).await;
                Ok(())
            }
            Err(err @ DaemonError::Rejected(_)) => Err(err.into()),
            Err(err) => {
                warn!(error = %err, "pushing resource overuse configurations failed, keeping them pending");
                inner.state().configs.stash_pending(configs)?;
                Ok(())
            }
        }
    }

    /// Reads the daemon's live configurations, waiting a bounded time for a connection.
    pub async fn get_resource_overuse_configurations(
        &self,
        caller: &Caller,
        flags: u32,
    ) -> Result<Vec<ResourceOveruseConfiguration>> {
        caller.require_any(&[Permission::CollectMetrics, Permission::ControlConfig])?;
        validate_resource_flags(flags)?;
        self.inner.wait_for_daemon().await?;
        Ok(self
            .inner
            .daemon
            .get_resource_overuse_configurations()
            .await?)
    }
}

pub(super) async fn handle_daemon_connection_change(inner: &Arc<Inner>, connected: bool) {
    if !connected {
        info!("watchdog daemon disconnected");
        return;
    }
    info!("watchdog daemon connected");
    push_pending_configurations(inner).await;
    sync_from_daemon(inner).await;
}

/// Returns whether the slot is empty afterwards.
async fn push_pending_configurations(inner: &Arc<Inner>) -> bool {
    let attempts = inner.config.pending_retry_attempts();
    for attempt in 1..=attempts {
        if !inner.is_connected() {
            debug!(attempt, "daemon went away before the pending push");
            return false;
        }
        let claim = inner.state().configs.claim_pending();
        let configs = match claim {
            PendingClaim::None => return true,
            PendingClaim::InFlight => return false,
            PendingClaim::Claimed(configs) => configs,
        };
        let result = inner
            .daemon
            .update_resource_overuse_configurations(configs)
            .await;
        match result {
            Ok(()) => {
                inner.state().configs.release_pending(true);
                info!(attempt, "pushed pending resource overuse configurations");
                return true;
            }
            Err(DaemonError::Rejected(message)) => {
                inner.state().configs.release_pending(true);
                error!(%message, "daemon rejected pending resource overuse configurations, dropping them");
                return true;
            }
            Err(err) => {
                inner.state().configs.release_pending(false);
                warn!(attempt, error = %err, "pushing pending resource overuse configurations failed");
            }
        }
        if attempt < attempts {
            tokio::time::sleep(inner.config.pending_retry_backoff()).await;
        }
    }
    if inner.is_connected() {
        error!(
            attempts,
            "pending resource overuse configurations were not pushed while the daemon is connected"
        );
    }
    false
}

/// Fetches the daemon's canonical configurations and republishes the
/// safe-to-kill sets and vendor prefixes.
pub(super) async fn sync_from_daemon(inner: &Arc<Inner>) {
    let configs = match inner.daemon.get_resource_overuse_configurations().await {
        Ok(configs) => configs,
        Err(err) => {
            warn!(error = %err, "fetching resource overuse configurations failed");
            return;
        }
    };
    let synced = inner.state().configs.apply_synced(&configs);
    inner
        .packages
        .set_vendor_package_prefixes(synced.vendor_package_prefixes);
    let reevaluated = reevaluate_killable_states(inner);
    debug!(
        configs = configs.len(),
        safe_to_kill_changed = synced.safe_to_kill_changed,
        reevaluated,
        "synchronized resource overuse configurations"
    );
}

fn reevaluate_killable_states(inner: &Inner) -> usize {
    let targets: Vec<(u32, String, u32)> = inner
        .state()
        .ledger
        .records()
        .filter_map(|record| {
            record
                .uid
                .map(|uid| (record.user_id, record.generic_package_name.clone(), uid))
        })
        .collect();
    let mut classified = Vec::with_capacity(targets.len());
    for (user_id, generic_package_name, uid) in targets {
        let members = inner.packages.packages_for_uid(uid);
        if members.is_empty() {
            continue;
        }
        let component_type = inner.packages.classify(&members, &generic_package_name);
        classified.push((
            user_id,
            super::PackageClassification {
                generic_package_name,
                uid,
                component_type,
                members,
            },
        ));
    }
    let mut state = inner.state();
    for (user_id, classification) in &classified {
        state.sync_classification(*user_id, classification);
    }
    classified.len()
}
