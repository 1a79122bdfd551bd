pub mod commands;
pub mod ingest;
pub mod purge;
pub mod replay;
pub mod serve;
pub mod status;

pub use commands::{Cli, Commands, LogFormat};

use std::path::Path;
use crate::config::{load_config, ScanlineConfig};
use crate::db::Database;
use crate::errors::ScanlineError;

/// Load the config named by `--config`, defaults otherwise.
pub async fn load(config_path: Option<&str>) -> Result<ScanlineConfig, ScanlineError> {
    load_config(config_path.map(Path::new)).await
}

/// Open the store at `--db` when given, else at `store.path`.
pub fn open_database(config: &ScanlineConfig, db_override: Option<&str>) -> Result<Database, ScanlineError> {
    Database::new(db_override.unwrap_or(&config.store.path))
}
