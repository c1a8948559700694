use crate::manifest::ManifestLocation;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_DIR_NAME: &str = "over9k";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "over9k.db";
pub const DEFAULT_MANIFEST: &str = "public/default.json";
pub const CARD_DETAIL_URL_TEMPLATE: &str = "https://dokkanessentials.com/Carte-{id}";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Unable to read config {path}: {source}")]
  Read {
    path: PathBuf,
    source: std::io::Error,
  },

  #[error("Invalid config {path}: {source}")]
  Parse {
    path: PathBuf,
    source: toml::de::Error,
  },

  #[error("Invalid builder range: first id {first} is greater than last id {last}")]
  InvalidRange { first: i64, last: i64 },

  #[error("No data directory available; pass --data-dir")]
  NoDataDir,
}

/// Top-level settings. Every field is optional in the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Over9kConfig {
  pub data_dir: Option<PathBuf>,
  /// Manifest file path or http(s) URL.
  pub manifest: Option<String>,
  pub builder: BuilderConfig,
}

impl Over9kConfig {
  pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
  }

  pub fn from_toml_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
    let config: Over9kConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    config.builder.validate()?;
    Ok(config)
  }

  /// Load from an explicit path, or from the default location when present.
  /// A missing default file yields the built-in defaults.
  pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
    let path = match explicit {
      Some(path) => path.to_path_buf(),
      None => match Self::default_path() {
        Some(path) if path.exists() => path,
        _ => return Ok(Self::default()),
      },
    };

    let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
      path: path.clone(),
      source,
    })?;
    let config = Self::from_toml_str(&text, &path)?;
    log::debug!("loaded config from {}", path.display());
    Ok(config)
  }

  pub fn resolve_data_dir(&self) -> Result<PathBuf, ConfigError> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }
    dirs::data_dir()
      .map(|dir| dir.join(CONFIG_DIR_NAME))
      .ok_or(ConfigError::NoDataDir)
  }

  pub fn manifest_location(&self) -> ManifestLocation {
    ManifestLocation::parse(self.manifest.as_deref().unwrap_or(DEFAULT_MANIFEST))
  }
}

/// Settings for the offline catalog builder. Durations are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct BuilderConfig {
  pub first_id: i64,
  pub last_id: i64,
  pub images_dir: PathBuf,
  pub manifest_path: PathBuf,
  /// Remote thumbnail URL; `{id}` is replaced by the card id.
  pub image_url_template: String,
  pub file_name_template: String,
  pub manifest_image_template: String,
  pub request_interval_ms: u64,
  pub rate_limit_cooldown_ms: u64,
  pub backoff_factor: u32,
  pub max_rate_limit_retries: u32,
  pub request_timeout_ms: u64,
  pub progress_every: i64,
}

impl Default for BuilderConfig {
  fn default() -> Self {
    Self {
      first_id: 1,
      last_id: 2277,
      images_dir: PathBuf::from("public/images"),
      manifest_path: PathBuf::from(DEFAULT_MANIFEST),
      image_url_template: "https://dokkanessentials.com/img/thumb/card{id}.png".to_string(),
      file_name_template: "card{id}.png".to_string(),
      manifest_image_template: "/images/card{id}.png".to_string(),
      request_interval_ms: 1_000,
      rate_limit_cooldown_ms: 3_000,
      backoff_factor: 2,
      max_rate_limit_retries: 5,
      request_timeout_ms: 30_000,
      progress_every: 50,
    }
  }
}

impl BuilderConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.first_id > self.last_id {
      return Err(ConfigError::InvalidRange {
        first: self.first_id,
        last: self.last_id,
      });
    }
    Ok(())
  }

  pub fn request_interval(&self) -> Duration {
    Duration::from_millis(self.request_interval_ms)
  }

  pub fn rate_limit_cooldown(&self) -> Duration {
    Duration::from_millis(self.rate_limit_cooldown_ms)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_millis(self.request_timeout_ms)
  }

  /// Wait before the given retry (0-based): cooldown * factor^retry.
  pub fn rate_limit_wait(&self, retry: u32) -> Duration {
    self
      .rate_limit_cooldown()
      .saturating_mul(self.backoff_factor.max(1).saturating_pow(retry))
  }
}

pub fn render_id_template(template: &str, id: i64) -> String {
  template.replace("{id}", &id.to_string())
}
