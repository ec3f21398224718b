use std::sync::Arc;

use overuse_core::{
    KillableState, PackageIdentifier, PackageIoOveruseStats, ResourceOveruseAction,
    ResourceOveruseActionType, ResourceOveruseStats, ResourceType, user_id_of,
};
use tracing::{debug, info, warn};

use super::Inner;
use super::queries::build_io_overuse_stats;
use crate::packages::EnabledState;

/// An overused uid waiting for the delayed disable pass.
#[derive(Debug, Clone)]
struct PendingKill {
    uid: u32,
    user_id: u32,
    generic_package_name: String,
    recurring: bool,
}

fn overuse_action(
    generic_package_name: &str,
    uid: u32,
    action_type: ResourceOveruseActionType,
    action_taken_time_ms: i64,
) -> ResourceOveruseAction {
    ResourceOveruseAction {
        package_identifier: PackageIdentifier {
            name: generic_package_name.to_string(),
            uid,
        },
        resource_types: vec![ResourceType::Io],
        action_type,
        action_taken_time_ms,
    }
}

/// Action recorded without disabling anything, or `None` when the package may be disabled.
fn spared_action_type(killable_state: KillableState, recurring: bool) -> Option<ResourceOveruseActionType> {
    match killable_state {
        KillableState::Never => Some(ResourceOveruseActionType::NotKilled),
        KillableState::No if !recurring => Some(ResourceOveruseActionType::NotKilledUserOpted),
        _ => None,
    }
}

pub(super) async fn process_latest_io_overuse_stats(
    inner: &Arc<Inner>,
    samples: Vec<PackageIoOveruseStats>,
) {
    if samples.is_empty() {
        return;
    }
    let uids: Vec<u32> = samples.iter().map(|sample| sample.uid).collect();
    let names = inner.packages.names_for_uids(&uids);
    let today = inner.time.today();
    let now = inner.time.now();
    let now_ms = now.timestamp_millis();

    let mut actions = Vec::new();
    let mut notifications = Vec::new();
    let mut kills = Vec::new();
    let snapshot = {
        let mut state = inner.state();
        let snapshot = state.ledger.check_and_handle_day_rollover(today);
        for sample in &samples {
            let Some(generic_package_name) = names.get(&sample.uid) else {
                warn!(uid = sample.uid, "dropping usage sample for unresolvable uid");
                continue;
            };
            let user_id = user_id_of(sample.uid);
            let record = state.ledger.record_usage(
                user_id,
                generic_package_name,
                sample.uid,
                &sample.io_overuse_stats,
            );
            if sample.should_notify {
                let stats = ResourceOveruseStats {
                    package_name: generic_package_name.clone(),
                    user_id,
                    io_overuse_stats: build_io_overuse_stats(Some(record), None, today, now.timestamp()),
                };
                notifications.push((sample.uid, stats));
            }
            if !record.exceeds_threshold() {
                continue;
            }
            let recurring = inner.recurrence.is_recurring_overuse(record);
            match spared_action_type(record.killable_state(), recurring) {
                Some(action_type) => {
                    debug!(package = %generic_package_name, user_id, ?action_type, "overuse left unenforced");
                    actions.push(overuse_action(generic_package_name, sample.uid, action_type, now_ms));
                }
                None => kills.push(PendingKill {
                    uid: sample.uid,
                    user_id,
                    generic_package_name: generic_package_name.clone(),
                    recurring,
                }),
            }
        }
        snapshot
    };

    if let Some(snapshot) = snapshot {
        info!(%today, "started a new usage day");
        let _ = inner.persist_pending(snapshot).await;
    }
    inner.notify(notifications);
    inner.report_actions(actions).await;
    if !kills.is_empty() {
        schedule_disable_pass(inner.clone(), kills);
    }
}

fn schedule_disable_pass(inner: Arc<Inner>, kills: Vec<PendingKill>) {
    let delay = inner.config.kill_delay();
    debug!(count = kills.len(), delay_ms = delay.as_millis() as u64, "scheduled disable pass");
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        run_disable_pass(&inner, kills).await;
    });
}

async fn run_disable_pass(inner: &Arc<Inner>, kills: Vec<PendingKill>) {
    let mut actions = Vec::new();
    for kill in kills {
        let killable_state = inner
            .state()
            .ledger
            .get(kill.user_id, &kill.generic_package_name)
            .map(|record| record.killable_state());
        let now_ms = inner.time.now().timestamp_millis();
        let Some(killable_state) = killable_state else {
            debug!(package = %kill.generic_package_name, "record reset before disable pass");
            continue;
        };
        if let Some(action_type) = spared_action_type(killable_state, kill.recurring) {
            actions.push(overuse_action(&kill.generic_package_name, kill.uid, action_type, now_ms));
            continue;
        }

        let disabled = disable_packages_for_uid(inner, &kill);
        let action_type = if disabled == 0 {
            ResourceOveruseActionType::NotKilled
        } else {
            let times_killed = inner
                .state()
                .ledger
                .record_kill(kill.user_id, &kill.generic_package_name);
            info!(
                package = %kill.generic_package_name,
                user_id = kill.user_id,
                disabled,
                times_killed,
                "disabled overused package"
            );
            if kill.recurring {
                ResourceOveruseActionType::KilledRecurringOveruse
            } else {
                ResourceOveruseActionType::Killed
            }
        };
        actions.push(overuse_action(&kill.generic_package_name, kill.uid, action_type, now_ms));
    }
    inner.report_actions(actions).await;
}

/// Disables every package sharing the uid and returns how many changed state.
fn disable_packages_for_uid(inner: &Inner, kill: &PendingKill) -> usize {
    let package_manager = inner.packages.package_manager();
    let target = if kill.recurring {
        EnabledState::Disabled
    } else {
        EnabledState::DisabledUntilUsed
    };
    let mut disabled = 0;
    for info in inner.packages.packages_for_uid(kill.uid) {
        let current = match package_manager.enabled_state(&info.package_name, kill.user_id) {
            Ok(current) => current,
            Err(err) => {
                warn!(package = %info.package_name, user_id = kill.user_id, error = %err, "reading enabled state failed");
                continue;
            }
        };
        match current {
            EnabledState::Disabled | EnabledState::DisabledUser => continue,
            EnabledState::DisabledUntilUsed if !kill.recurring => continue,
            _ => {}
        }
        match package_manager.set_enabled_state(&info.package_name, kill.user_id, target) {
            Ok(()) => disabled += 1,
            Err(err) => {
                warn!(package = %info.package_name, user_id = kill.user_id, error = %err, "disabling package failed");
            }
        }
    }
    disabled
}
