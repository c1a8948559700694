use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MANIFEST_FETCH_TIMEOUT_SECONDS: u64 = 30;
const MANIFEST_USER_AGENT: &str = concat!("over9k/", env!("CARGO_PKG_VERSION"));

/// One `{id, image}` entry of the catalog manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
  pub id: i64,
  pub image: String,
}

impl ManifestEntry {
  pub fn new(id: i64, image: impl Into<String>) -> Self {
    Self {
      id,
      image: image.into(),
    }
  }

  /// A positive id and a non-blank image.
  pub fn is_usable(&self) -> bool {
    self.id > 0 && !self.image.trim().is_empty()
  }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
  #[error("Manifest unavailable at {location}: {reason}")]
  Unavailable { location: String, reason: String },

  #[error("Manifest request to {location} failed with status {status}")]
  Status { location: String, status: u16 },

  #[error("Malformed manifest: {0}")]
  Malformed(String),

  #[error("Manifest contains no entries")]
  Empty,

  #[error("Manifest lists card {0} more than once")]
  DuplicateId(i64),
}

/// Where the application reads its manifest from.
pub trait ManifestSource {
  fn location(&self) -> String;

  fn fetch(&self) -> Result<String, ManifestError>;
}

pub struct FileManifestSource {
  path: PathBuf,
}

impl FileManifestSource {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }
}

impl ManifestSource for FileManifestSource {
  fn location(&self) -> String {
    self.path.display().to_string()
  }

  fn fetch(&self) -> Result<String, ManifestError> {
    fs::read_to_string(&self.path).map_err(|e| ManifestError::Unavailable {
      location: self.location(),
      reason: e.to_string(),
    })
  }
}

pub struct HttpManifestSource {
  url: String,
}

impl HttpManifestSource {
  pub fn new(url: impl Into<String>) -> Self {
    Self { url: url.into() }
  }
}

impl ManifestSource for HttpManifestSource {
  fn location(&self) -> String {
    self.url.clone()
  }

  fn fetch(&self) -> Result<String, ManifestError> {
    let unavailable = |reason: String| ManifestError::Unavailable {
      location: self.url.clone(),
      reason,
    };

    let client = Client::builder()
      .timeout(Duration::from_secs(MANIFEST_FETCH_TIMEOUT_SECONDS))
      .build()
      .map_err(|e| unavailable(e.to_string()))?;

    let response = client
      .get(&self.url)
      .header(USER_AGENT, MANIFEST_USER_AGENT)
      .header(ACCEPT, "application/json,text/plain,*/*")
      .send()
      .map_err(|e| unavailable(e.to_string()))?;

    if !response.status().is_success() {
      return Err(ManifestError::Status {
        location: self.url.clone(),
        status: response.status().as_u16(),
      });
    }

    response.text().map_err(|e| unavailable(e.to_string()))
  }
}

/// A manifest location as written in config or on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLocation {
  File(PathBuf),
  Url(String),
}

impl ManifestLocation {
  pub fn parse(raw: &str) -> Self {
    let trimmed = raw.trim();
    let lowered = trimmed.to_lowercase();
    if lowered.starts_with("http://") || lowered.starts_with("https://") {
      ManifestLocation::Url(trimmed.to_string())
    } else {
      ManifestLocation::File(PathBuf::from(trimmed))
    }
  }

  pub fn source(&self) -> Box<dyn ManifestSource> {
    match self {
      ManifestLocation::File(path) => Box::new(FileManifestSource::new(path.clone())),
      ManifestLocation::Url(url) => Box::new(HttpManifestSource::new(url.clone())),
    }
  }
}

impl std::fmt::Display for ManifestLocation {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ManifestLocation::File(path) => write!(f, "{}", path.display()),
      ManifestLocation::Url(url) => f.write_str(url),
    }
  }
}

/// Parse a manifest body.
///
/// The body must be a non-empty JSON array. Elements without a positive
/// integer `id` or a non-empty string `image` are dropped; a repeated id
/// rejects the whole manifest.
pub fn parse_manifest(text: &str) -> Result<Vec<ManifestEntry>, ManifestError> {
  let value: Value =
    serde_json::from_str(text).map_err(|e| ManifestError::Malformed(e.to_string()))?;
  let Value::Array(items) = value else {
    return Err(ManifestError::Malformed(
      "expected a JSON array of entries".to_string(),
    ));
  };
  if items.is_empty() {
    return Err(ManifestError::Empty);
  }

  let mut seen = HashSet::new();
  let mut entries = Vec::with_capacity(items.len());
  for (position, item) in items.iter().enumerate() {
    let id = item.get("id").and_then(Value::as_i64).filter(|id| *id > 0);
    let image = item
      .get("image")
      .and_then(Value::as_str)
      .filter(|image| !image.trim().is_empty());

    let (Some(id), Some(image)) = (id, image) else {
      log::debug!("skipping manifest entry #{} without a usable id/image", position);
      continue;
    };

    if !seen.insert(id) {
      return Err(ManifestError::DuplicateId(id));
    }
    entries.push(ManifestEntry::new(id, image));
  }

  Ok(entries)
}

pub fn load_manifest(source: &dyn ManifestSource) -> Result<Vec<ManifestEntry>, ManifestError> {
  let body = source.fetch()?;
  parse_manifest(&body)
}

pub fn manifest_hash(entries: &[ManifestEntry]) -> String {
  let mut hasher = Sha256::new();
  for entry in entries {
    hasher.update(format!("{}|{}\n", entry.id, entry.image).as_bytes());
  }
  format!("{:x}", hasher.finalize())
}

/// Timestamp used in backup names: ISO-8601 in UTC with `:` and `.` replaced by `-`.
pub fn backup_timestamp(now: DateTime<Utc>) -> String {
  now
    .format("%Y-%m-%dT%H:%M:%S%.3fZ")
    .to_string()
    .replace([':', '.'], "-")
}

pub fn backup_path(manifest_path: &Path, now: DateTime<Utc>) -> PathBuf {
  let file_name = manifest_path
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_else(|| "manifest.json".to_string());
  manifest_path.with_file_name(format!("{}.backup-{}", file_name, backup_timestamp(now)))
}

/// Copy an existing manifest aside before it gets replaced.
/// Returns the backup path, or `None` when there was nothing to back up.
pub fn backup_manifest(manifest_path: &Path, now: DateTime<Utc>) -> std::io::Result<Option<PathBuf>> {
  if !manifest_path.exists() {
    return Ok(None);
  }
  let target = backup_path(manifest_path, now);
  fs::copy(manifest_path, &target)?;
  Ok(Some(target))
}

pub fn write_manifest(manifest_path: &Path, entries: &[ManifestEntry]) -> std::io::Result<()> {
  if let Some(parent) = manifest_path.parent() {
    if !parent.as_os_str().is_empty() {
      fs::create_dir_all(parent)?;
    }
  }
  let body = serde_json::to_string_pretty(entries).map_err(std::io::Error::other)?;
  fs::write(manifest_path, body)
}
