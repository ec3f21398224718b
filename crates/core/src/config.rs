use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ComponentType, PerStateBytes};

/// System-wide alert raised when the write rate stays above a threshold
/// for the given duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoOveruseAlertThreshold {
    pub duration_secs: i64,
    pub written_bytes_per_second: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoOveruseConfiguration {
    pub component_level_thresholds: PerStateBytes,
    #[serde(default)]
    pub package_specific_thresholds: BTreeMap<String, PerStateBytes>,
    #[serde(default)]
    pub app_category_specific_thresholds: BTreeMap<String, PerStateBytes>,
    #[serde(default)]
    pub system_wide_thresholds: Vec<IoOveruseAlertThreshold>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOveruseConfiguration {
    pub component_type: ComponentType,
    #[serde(default)]
    pub safe_to_kill_packages: Vec<String>,
    #[serde(default)]
    pub vendor_package_prefixes: Vec<String>,
    #[serde(default)]
    pub packages_to_app_category_types: BTreeMap<String, String>,
    #[serde(default)]
    pub io_overuse_configuration: Option<IoOveruseConfiguration>,
}

impl ResourceOveruseConfiguration {
    pub fn new(component_type: ComponentType) -> Self {
        Self {
            component_type,
            safe_to_kill_packages: Vec::new(),
            vendor_package_prefixes: Vec::new(),
            packages_to_app_category_types: BTreeMap::new(),
            io_overuse_configuration: None,
        }
    }
}
