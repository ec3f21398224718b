use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use overuse_core::{ComponentType, shared_package_name};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Enabled setting of an installed package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnabledState {
    Default,
    Enabled,
    Disabled,
    DisabledUser,
    DisabledUntilUsed,
}

/// Install-time facts about one package for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInfo {
    pub package_name: String,
    pub uid: u32,
    #[serde(default)]
    pub shared_user_name: Option<String>,
    /// Preinstalled on the system image or an update of such a package.
    #[serde(default)]
    pub is_system: bool,
    /// Installed from a vendor, odm, oem or product partition.
    #[serde(default)]
    pub is_vendor: bool,
}

impl ApplicationInfo {
    pub fn generic_package_name(&self) -> String {
        match &self.shared_user_name {
            Some(shared_user_name) => shared_package_name(shared_user_name),
            None => self.package_name.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("package {0} not found")]
    NotFound(String),
    #[error("{0}")]
    Remote(String),
}

/// Platform package manager the handler enforces through.
pub trait PackageManager: Send + Sync {
    fn alive_user_ids(&self) -> Vec<u32>;

    fn installed_packages(&self, user_id: u32) -> Result<Vec<ApplicationInfo>, PackageError>;

    /// Every package installed under `uid`; more than one for shared uids.
    fn packages_for_uid(&self, uid: u32) -> Vec<ApplicationInfo>;

    fn application_info(
        &self,
        package_name: &str,
        user_id: u32,
    ) -> Result<Option<ApplicationInfo>, PackageError>;

    fn enabled_state(&self, package_name: &str, user_id: u32) -> Result<EnabledState, PackageError>;

    fn set_enabled_state(
        &self,
        package_name: &str,
        user_id: u32,
        state: EnabledState,
    ) -> Result<(), PackageError>;
}

#[derive(Default)]
struct ResolverCache {
    generic_names_by_uid: HashMap<u32, String>,
    vendor_package_prefixes: Vec<String>,
}

/// Resolves uids to generic package names and classifies their owners.
pub struct PackageInfoHandler {
    package_manager: std::sync::Arc<dyn PackageManager>,
    cache: Mutex<ResolverCache>,
}

impl PackageInfoHandler {
    pub fn new(package_manager: std::sync::Arc<dyn PackageManager>) -> Self {
        Self {
            package_manager,
            cache: Mutex::new(ResolverCache::default()),
        }
    }

    pub fn package_manager(&self) -> &dyn PackageManager {
        self.package_manager.as_ref()
    }

    fn cache(&self) -> MutexGuard<'_, ResolverCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unresolvable uids are absent from the result.
    pub fn names_for_uids(&self, uids: &[u32]) -> HashMap<u32, String> {
        let mut names = HashMap::new();
        let mut missing = Vec::new();
        {
            let cache = self.cache();
            for uid in uids {
                match cache.generic_names_by_uid.get(uid) {
                    Some(name) => {
                        names.insert(*uid, name.clone());
                    }
                    None => missing.push(*uid),
                }
            }
        }
        if missing.is_empty() {
            return names;
        }
        let mut resolved = Vec::new();
        for uid in missing {
            let packages = self.package_manager.packages_for_uid(uid);
            let Some(first) = packages.first() else {
                debug!(uid, "no packages installed for uid");
                continue;
            };
            resolved.push((uid, first.generic_package_name()));
        }
        let mut cache = self.cache();
        for (uid, name) in resolved {
            cache.generic_names_by_uid.insert(uid, name.clone());
            names.insert(uid, name);
        }
        names
    }

    pub fn name_for_user_package(
        &self,
        package_name: &str,
        user_id: u32,
    ) -> Result<Option<String>, PackageError> {
        let info = self.package_manager.application_info(package_name, user_id)?;
        Ok(info.map(|info| {
            let name = info.generic_package_name();
            self.cache()
                .generic_names_by_uid
                .insert(info.uid, name.clone());
            name
        }))
    }

    pub fn packages_for_uid(&self, uid: u32) -> Vec<ApplicationInfo> {
        self.package_manager.packages_for_uid(uid)
    }

    pub fn set_vendor_package_prefixes(&self, prefixes: Vec<String>) {
        self.cache().vendor_package_prefixes = prefixes;
    }

    pub fn component_type(&self, info: &ApplicationInfo) -> ComponentType {
        let cache = self.cache();
        component_type_with_prefixes(info, &cache.vendor_package_prefixes)
    }

    /// Classification of every package sharing one generic name.
    pub fn shared_component_type(
        &self,
        members: &[ApplicationInfo],
        generic_package_name: &str,
    ) -> ComponentType {
        let cache = self.cache();
        let prefixes = &cache.vendor_package_prefixes;
        let types: Vec<ComponentType> = members
            .iter()
            .map(|info| component_type_with_prefixes(info, prefixes))
            .collect();
        if types.contains(&ComponentType::Vendor) {
            return ComponentType::Vendor;
        }
        if types.contains(&ComponentType::System) {
            if has_vendor_prefix(generic_package_name, prefixes) {
                return ComponentType::Vendor;
            }
            return ComponentType::System;
        }
        ComponentType::ThirdParty
    }

    /// Classifies a single package or a shared group by its members.
    pub fn classify(&self, members: &[ApplicationInfo], generic_package_name: &str) -> ComponentType {
        match members {
            [single] if single.shared_user_name.is_none() => self.component_type(single),
            _ => self.shared_component_type(members, generic_package_name),
        }
    }
}

fn has_vendor_prefix(package_name: &str, prefixes: &[String]) -> bool {
    prefixes
        .iter()
        .any(|prefix| !prefix.is_empty() && package_name.starts_with(prefix.as_str()))
}

fn component_type_with_prefixes(info: &ApplicationInfo, prefixes: &[String]) -> ComponentType {
    if info.is_vendor {
        return ComponentType::Vendor;
    }
    if info.is_system {
        if has_vendor_prefix(&info.package_name, prefixes) {
            return ComponentType::Vendor;
        }
        return ComponentType::System;
    }
    ComponentType::ThirdParty
}
