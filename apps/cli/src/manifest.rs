use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use overuse_app::{ApplicationInfo, EnabledState, PackageError, PackageManager};
use overuse_core::user_id_of;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PackageManifest {
    pub users: Vec<u32>,
    pub packages: Vec<ApplicationInfo>,
}

impl Default for PackageManifest {
    fn default() -> Self {
        Self {
            users: vec![0],
            packages: Vec::new(),
        }
    }
}

/// Package manager backed by a static TOML manifest. Enabled states live in
/// memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct ManifestPackageManager {
    manifest: PackageManifest,
    enabled_states: Mutex<HashMap<(String, u32), EnabledState>>,
}

impl ManifestPackageManager {
    pub fn new(manifest: PackageManifest) -> Self {
        Self {
            manifest,
            enabled_states: Mutex::new(HashMap::new()),
        }
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            info!(path = %path.display(), "no package manifest, starting with none installed");
            return Ok(Self::new(PackageManifest::default()));
        }
        let contents = fs::read_to_string(path)
            .map_err(|err| format!("read manifest {}: {}", path.display(), err))?;
        let manifest: PackageManifest = toml::from_str(&contents)
            .map_err(|err| format!("parse manifest {}: {}", path.display(), err))?;
        info!(
            path = %path.display(),
            packages = manifest.packages.len(),
            users = manifest.users.len(),
            "loaded package manifest"
        );
        Ok(Self::new(manifest))
    }

    fn find(&self, package_name: &str, user_id: u32) -> Option<&ApplicationInfo> {
        self.manifest
            .packages
            .iter()
            .find(|info| info.package_name == package_name && user_id_of(info.uid) == user_id)
    }
}

impl PackageManager for ManifestPackageManager {
    fn alive_user_ids(&self) -> Vec<u32> {
        self.manifest.users.clone()
    }

    fn installed_packages(&self, user_id: u32) -> Result<Vec<ApplicationInfo>, PackageError> {
        Ok(self
            .manifest
            .packages
            .iter()
            .filter(|info| user_id_of(info.uid) == user_id)
            .cloned()
            .collect())
    }

    fn packages_for_uid(&self, uid: u32) -> Vec<ApplicationInfo> {
        self.manifest
            .packages
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
        Ok(self.find(package_name, user_id).cloned())
    }

    fn enabled_state(&self, package_name: &str, user_id: u32) -> Result<EnabledState, PackageError> {
        if self.find(package_name, user_id).is_none() {
            return Err(PackageError::NotFound(package_name.to_string()));
        }
        Ok(self
            .enabled_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
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
        if self.find(package_name, user_id).is_none() {
            return Err(PackageError::NotFound(package_name.to_string()));
        }
        info!(package = %package_name, user_id, ?state, "changed package enabled state");
        self.enabled_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((package_name.to_string(), user_id), state);
        Ok(())
    }
}
