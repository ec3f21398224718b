use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use overuse_app::HandlerConfig;
use serde::{Deserialize, Serialize};

const APP_DIR_NAME: &str = "overuse-guard";
const CONFIG_FILE_NAME: &str = "config.toml";
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub data_dir: PathBuf,
    /// Socket the watchdog daemon listens on.
    pub daemon_socket: PathBuf,
    /// Socket this process serves daemon callbacks on.
    pub service_socket: PathBuf,
    pub packages_manifest: PathBuf,
    pub daemon_poll_interval_ms: u64,
    pub handler: HandlerConfig,
}

impl CliConfig {
    fn under(data_dir: PathBuf) -> Self {
        Self {
            daemon_socket: data_dir.join("watchdogd.sock"),
            service_socket: data_dir.join("overuse-guard.sock"),
            packages_manifest: data_dir.join("packages.toml"),
            data_dir,
            daemon_poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            handler: HandlerConfig::default(),
        }
    }

    pub fn daemon_poll_interval(&self) -> Duration {
        Duration::from_millis(self.daemon_poll_interval_ms.max(1))
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self::under(default_data_dir())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: CliConfig,
    pub file: PathBuf,
    pub created: bool,
}

pub fn load_or_create(path: Option<PathBuf>) -> Result<ConfigLoad, String> {
    let file = match path {
        Some(path) => path,
        None => config_dir()?.join(CONFIG_FILE_NAME),
    };
    load_or_create_at(&file, CliConfig::default())
}

fn load_or_create_at(file: &Path, default: CliConfig) -> Result<ConfigLoad, String> {
    if file.exists() {
        let contents = fs::read_to_string(file)
            .map_err(|err| format!("read config {}: {}", file.display(), err))?;
        let config: CliConfig = toml::from_str(&contents)
            .map_err(|err| format!("parse config {}: {}", file.display(), err))?;
        return Ok(ConfigLoad {
            config,
            file: file.to_path_buf(),
            created: false,
        });
    }

    if let Some(dir) = file.parent() {
        fs::create_dir_all(dir)
            .map_err(|err| format!("create config dir {}: {}", dir.display(), err))?;
    }
    let contents =
        toml::to_string_pretty(&default).map_err(|err| format!("serialize config: {}", err))?;
    fs::write(file, contents).map_err(|err| format!("write config {}: {}", file.display(), err))?;

    Ok(ConfigLoad {
        config: default,
        file: file.to_path_buf(),
        created: true,
    })
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

fn config_dir() -> Result<PathBuf, String> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(dir).join(APP_DIR_NAME));
    }
    let home = home_dir().ok_or_else(|| "resolve HOME: not set".to_string())?;
    Ok(home.join(".config").join(APP_DIR_NAME))
}

fn default_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("XDG_DATA_HOME") {
        return PathBuf::from(dir).join(APP_DIR_NAME);
    }
    home_dir()
        .map(|home| home.join(".local").join("share").join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(APP_DIR_NAME))
}
