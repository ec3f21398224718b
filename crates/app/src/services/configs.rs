use std::collections::HashSet;

use overuse_core::{
    ComponentType, FLAG_RESOURCE_OVERUSE_IO, ResourceOveruseConfiguration, is_shared_package,
};

use crate::error::{AppError, Result};
use crate::packages::ApplicationInfo;

pub fn validate_resource_flags(flags: u32) -> Result<()> {
    if flags == 0 || flags & !FLAG_RESOURCE_OVERUSE_IO != 0 {
        return Err(AppError::InvalidArgument(format!(
            "invalid resource overuse flags {:#x}",
            flags
        )));
    }
    Ok(())
}

/// Rejects the whole set when any configuration is malformed.
pub fn validate_configurations(
    configs: &[ResourceOveruseConfiguration],
    flags: u32,
) -> Result<()> {
    if configs.is_empty() {
        return Err(AppError::InvalidArgument(
            "at least one resource overuse configuration is required".to_string(),
        ));
    }
    validate_resource_flags(flags)?;
    let mut seen = HashSet::new();
    for config in configs {
        let name = format!("{:?}", config.component_type);
        if !seen.insert(config.component_type) {
            return Err(AppError::InvalidArgument(format!(
                "duplicate configuration for component type {}",
                name
            )));
        }
        if flags & FLAG_RESOURCE_OVERUSE_IO == 0 {
            continue;
        }
        let Some(io) = &config.io_overuse_configuration else {
            return Err(AppError::InvalidArgument(format!(
                "{} configuration is missing the I/O overuse configuration",
                name
            )));
        };
        if !io.component_level_thresholds.all_positive() {
            return Err(AppError::InvalidArgument(format!(
                "{} component level thresholds must be positive",
                name
            )));
        }
        if config.component_type == ComponentType::System {
            if io.system_wide_thresholds.is_empty() {
                return Err(AppError::InvalidArgument(
                    "system configuration requires system wide thresholds".to_string(),
                ));
            }
            if io.system_wide_thresholds.iter().any(|threshold| {
                threshold.duration_secs <= 0 || threshold.written_bytes_per_second <= 0
            }) {
                return Err(AppError::InvalidArgument(
                    "system wide thresholds must have positive duration and rate".to_string(),
                ));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingRequest {
    configs: Vec<ResourceOveruseConfiguration>,
    in_flight: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingClaim {
    None,
    /// Another task is pushing the pending request right now.
    InFlight,
    Claimed(Vec<ResourceOveruseConfiguration>),
}

/// Result of applying the daemon's canonical configurations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncedConfigs {
    pub vendor_package_prefixes: Vec<String>,
    pub safe_to_kill_changed: bool,
}

/// Pending request slot and the safe-to-kill data republished on sync.
#[derive(Debug, Default)]
pub struct OveruseConfigState {
    pending: Option<PendingRequest>,
    safe_to_kill_system: HashSet<String>,
    safe_to_kill_vendor: HashSet<String>,
}

impl OveruseConfigState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Returns `false` when the identical request is already pending.
    pub fn stash_pending(&mut self, configs: Vec<ResourceOveruseConfiguration>) -> Result<bool> {
        match &self.pending {
            Some(pending) if pending.configs == configs => Ok(false),
            Some(_) => Err(AppError::InvalidState(
                "a resource overuse configuration request is already pending".to_string(),
            )),
            None => {
                self.pending = Some(PendingRequest {
                    configs,
                    in_flight: false,
                });
                Ok(true)
            }
        }
    }

    pub fn claim_pending(&mut self) -> PendingClaim {
        match &mut self.pending {
            None => PendingClaim::None,
            Some(pending) if pending.in_flight => PendingClaim::InFlight,
            Some(pending) => {
                pending.in_flight = true;
                PendingClaim::Claimed(pending.configs.clone())
            }
        }
    }

    /// Clears the slot after a successful push, otherwise makes it claimable again.
    pub fn release_pending(&mut self, pushed: bool) {
        if pushed {
            self.pending = None;
        } else if let Some(pending) = &mut self.pending {
            pending.in_flight = false;
        }
    }

    pub fn apply_synced(&mut self, configs: &[ResourceOveruseConfiguration]) -> SyncedConfigs {
        let mut system = HashSet::new();
        let mut vendor = HashSet::new();
        let mut prefixes = Vec::new();
        for config in configs {
            match config.component_type {
                ComponentType::System => {
                    system.extend(config.safe_to_kill_packages.iter().cloned());
                }
                ComponentType::Vendor => {
                    vendor.extend(config.safe_to_kill_packages.iter().cloned());
                    prefixes.extend(config.vendor_package_prefixes.iter().cloned());
                }
                ComponentType::ThirdParty => {}
            }
        }
        let safe_to_kill_changed = system != self.safe_to_kill_system || vendor != self.safe_to_kill_vendor;
        self.safe_to_kill_system = system;
        self.safe_to_kill_vendor = vendor;
        SyncedConfigs {
            vendor_package_prefixes: prefixes,
            safe_to_kill_changed,
        }
    }

    /// Third-party packages are always safe to kill. A shared group is safe
    /// when any member is.
    pub fn is_safe_to_kill(
        &self,
        generic_package_name: &str,
        component_type: ComponentType,
        members: &[ApplicationInfo],
    ) -> bool {
        let safe = match component_type {
            ComponentType::System => &self.safe_to_kill_system,
            ComponentType::Vendor => &self.safe_to_kill_vendor,
            ComponentType::ThirdParty => return true,
        };
        if is_shared_package(generic_package_name) {
            return members.iter().any(|info| safe.contains(&info.package_name));
        }
        safe.contains(generic_package_name)
    }
}
