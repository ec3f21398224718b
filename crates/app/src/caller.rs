use std::collections::BTreeSet;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    /// Query own stats and subscribe to own overuse.
    UseWatchdog,
    /// Query every package's stats and subscribe system-wide.
    CollectMetrics,
    /// Change thresholds and killable states.
    ControlConfig,
}

/// Identity of whoever invokes a caller-facing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub uid: u32,
    pub permissions: BTreeSet<Permission>,
}

impl Caller {
    pub fn new(uid: u32, permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            uid,
            permissions: permissions.into_iter().collect(),
        }
    }

    pub fn app(uid: u32) -> Self {
        Self::new(uid, [Permission::UseWatchdog])
    }

    pub fn system(uid: u32) -> Self {
        Self::new(
            uid,
            [
                Permission::UseWatchdog,
                Permission::CollectMetrics,
                Permission::ControlConfig,
            ],
        )
    }

    pub fn require(&self, permission: Permission) -> Result<()> {
        if self.permissions.contains(&permission) {
            return Ok(());
        }
        Err(AppError::PermissionDenied(format!(
            "uid {} lacks {:?}",
            self.uid, permission
        )))
    }

    pub fn require_any(&self, permissions: &[Permission]) -> Result<()> {
        if permissions.iter().any(|value| self.permissions.contains(value)) {
            return Ok(());
        }
        Err(AppError::PermissionDenied(format!(
            "uid {} lacks any of {:?}",
            self.uid, permissions
        )))
    }
}
