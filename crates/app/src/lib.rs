pub mod app;
pub mod caller;
pub mod config;
pub mod daemon;
pub mod error;
pub mod packages;
pub mod services;
pub mod startup;
pub mod util;

pub use app::{OveruseService, ServiceDeps};
pub use caller::{Caller, Permission};
pub use config::HandlerConfig;
pub use daemon::{DaemonClient, DaemonError, UnixSocketDaemonClient, serve_callbacks};
pub use error::{AppError, Result};
pub use packages::{ApplicationInfo, EnabledState, PackageError, PackageInfoHandler, PackageManager};
pub use services::{
    NoRecurrence, OveruseListener, OveruseStore, PackageResourceUsage, RecurrencePolicy,
};
pub use startup::{AppPaths, ensure_app_data_dir};
pub use util::time::{SystemTimeSource, TimeSource};
