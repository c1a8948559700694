use chrono::{SecondsFormat, Utc};
use std::path::PathBuf;

pub mod builder;
pub mod commands;
pub mod config;
pub mod logging;
pub mod manifest;
pub mod reconcile;
pub mod store;

use config::{Over9kConfig, DB_FILE_NAME};
use manifest::ManifestLocation;

#[derive(Clone, Debug)]
pub struct AppState {
  pub db_path: PathBuf,
  pub manifest: ManifestLocation,
}

impl AppState {
  pub fn new(data_dir: PathBuf, manifest: ManifestLocation) -> Self {
    Self {
      db_path: data_dir.join(DB_FILE_NAME),
      manifest,
    }
  }

  pub fn from_config(config: &Over9kConfig) -> Result<Self, config::ConfigError> {
    Ok(Self::new(config.resolve_data_dir()?, config.manifest_location()))
  }
}

/// Fixed-width UTC timestamp, so stored values sort as text.
pub(crate) fn now_iso() -> String {
  Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
