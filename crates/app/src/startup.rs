use std::path::PathBuf;

use crate::Result;
use crate::services::OveruseStore;

#[derive(Clone, Debug)]
pub struct AppPaths {
    pub app_data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl AppPaths {
    pub fn new(app_data_dir: PathBuf) -> Self {
        let db_path = app_data_dir.join("overuse-guard.sqlite");
        Self {
            app_data_dir,
            db_path,
        }
    }

    pub fn store(&self) -> OveruseStore {
        OveruseStore::new(&self.db_path)
    }
}

pub fn ensure_app_data_dir(paths: &AppPaths) -> Result<()> {
    std::fs::create_dir_all(&paths.app_data_dir)?;
    Ok(())
}
