//! Offline catalog builder.
//!
//! Walks a descending id range against the thumbnail host one request at a
//! time, keeps the images that exist and writes the manifest the app syncs
//! from.

use crate::config::{render_id_template, BuilderConfig};
use crate::manifest::{backup_manifest, write_manifest, ManifestEntry};
use chrono::Utc;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::redirect::Policy;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUILDER_USER_AGENT: &str = concat!("over9k-catalog-builder/", env!("CARGO_PKG_VERSION"));
const PARTIAL_SUFFIX: &str = ".part";

pub struct HostResponse {
  pub status: u16,
  pub body: Vec<u8>,
}

/// The remote thumbnail host. Redirects must be reported, not followed.
pub trait ImageHost {
  fn get(&self, url: &str) -> Result<HostResponse, String>;
}

pub trait Pacer {
  fn pause(&self, duration: Duration);
}

pub struct ThreadPacer;

impl Pacer for ThreadPacer {
  fn pause(&self, duration: Duration) {
    std::thread::sleep(duration);
  }
}

pub struct HttpImageHost {
  client: Client,
}

impl HttpImageHost {
  pub fn new(timeout: Duration) -> Result<Self, String> {
    let client = Client::builder()
      .timeout(timeout)
      .redirect(Policy::none())
      .build()
      .map_err(|e| e.to_string())?;
    Ok(Self { client })
  }
}

impl ImageHost for HttpImageHost {
  fn get(&self, url: &str) -> Result<HostResponse, String> {
    let response = self
      .client
      .get(url)
      .header(USER_AGENT, BUILDER_USER_AGENT)
      .header(ACCEPT, "image/png,image/*;q=0.8,*/*;q=0.5")
      .send()
      .map_err(|e| e.to_string())?;

    let status = response.status().as_u16();
    let body = if status == 200 {
      response.bytes().map_err(|e| e.to_string())?.to_vec()
    } else {
      Vec::new()
    };
    Ok(HostResponse { status, body })
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeOutcome {
  Downloaded,
  Exists,
  NotFound { code: u16 },
  RateLimited,
  HttpError { code: u16 },
  NetworkError { message: String },
  FileError { message: String },
}

impl ProbeOutcome {
  pub fn is_success(&self) -> bool {
    matches!(self, ProbeOutcome::Downloaded | ProbeOutcome::Exists)
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, ProbeOutcome::NotFound { .. })
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeRecord {
  pub id: i64,
  pub outcome: ProbeOutcome,
  pub retries: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
  pub records: Vec<ProbeRecord>,
  pub success_count: u64,
  pub not_found_count: u64,
  pub error_count: u64,
  pub manifest: Vec<ManifestEntry>,
  pub backup_path: Option<PathBuf>,
}

impl SweepReport {
  fn push(&mut self, record: ProbeRecord) {
    if record.outcome.is_success() {
      self.success_count += 1;
    } else if record.outcome.is_not_found() {
      self.not_found_count += 1;
    } else {
      self.error_count += 1;
    }
    self.records.push(record);
  }

  pub fn outcome_for(&self, id: i64) -> Option<&ProbeOutcome> {
    self
      .records
      .iter()
      .find(|record| record.id == id)
      .map(|record| &record.outcome)
  }
}

pub struct CatalogBuilder<'a> {
  config: &'a BuilderConfig,
  host: &'a dyn ImageHost,
  pacer: &'a dyn Pacer,
}

impl<'a> CatalogBuilder<'a> {
  pub fn new(config: &'a BuilderConfig, host: &'a dyn ImageHost, pacer: &'a dyn Pacer) -> Self {
    Self {
      config,
      host,
      pacer,
    }
  }

  pub fn image_path(&self, id: i64) -> PathBuf {
    self
      .config
      .images_dir
      .join(render_id_template(&self.config.file_name_template, id))
  }

  /// Sweep the configured range and write the manifest of every image we hold.
  pub fn run(&self) -> std::io::Result<SweepReport> {
    fs::create_dir_all(&self.config.images_dir)?;
    log::info!(
      "probing ids {} down to {} at one request per {:?}",
      self.config.last_id,
      self.config.first_id,
      self.config.request_interval()
    );

    let mut report = self.sweep();
    report.manifest = self.manifest_entries(&report);

    report.backup_path = backup_manifest(&self.config.manifest_path, Utc::now())?;
    if let Some(backup) = &report.backup_path {
      log::info!("previous manifest saved as {}", backup.display());
    }
    write_manifest(&self.config.manifest_path, &report.manifest)?;

    log::info!(
      "manifest {} written with {} cards ({} saved, {} missing, {} errors)",
      self.config.manifest_path.display(),
      report.manifest.len(),
      report.success_count,
      report.not_found_count,
      report.error_count
    );
    Ok(report)
  }

  pub fn sweep(&self) -> SweepReport {
    let mut report = SweepReport::default();
    let total = (self.config.last_id - self.config.first_id + 1).max(0);

    for id in (self.config.first_id..=self.config.last_id).rev() {
      let record = self.probe(id);
      let requested = record.outcome != ProbeOutcome::Exists;
      report.push(record);

      let done = self.config.last_id - id + 1;
      if self.config.progress_every > 0 && done % self.config.progress_every == 0 {
        log::info!(
          "progress {}/{} ({}%) saved={} missing={} errors={}",
          done,
          total,
          done * 100 / total.max(1),
          report.success_count,
          report.not_found_count,
          report.error_count
        );
      }

      if requested && id > self.config.first_id {
        self.pacer.pause(self.config.request_interval());
      }
    }

    report
  }

  pub fn probe(&self, id: i64) -> ProbeRecord {
    let path = self.image_path(id);
    if path.exists() {
      log::debug!("{}: already on disk", id);
      return ProbeRecord {
        id,
        outcome: ProbeOutcome::Exists,
        retries: 0,
      };
    }

    let url = render_id_template(&self.config.image_url_template, id);
    let mut retries = 0;
    loop {
      let response = match self.host.get(&url) {
        Ok(response) => response,
        Err(message) => {
          discard_partial(&path);
          log::warn!("{}: network error: {}", id, message);
          return ProbeRecord {
            id,
            outcome: ProbeOutcome::NetworkError { message },
            retries,
          };
        }
      };

      let outcome = match response.status {
        200 => match save_image(&path, &response.body) {
          Ok(()) => {
            log::info!("{}: downloaded", id);
            ProbeOutcome::Downloaded
          }
          Err(e) => {
            log::warn!("{}: file error: {}", id, e);
            ProbeOutcome::FileError {
              message: e.to_string(),
            }
          }
        },
        code @ 300..=399 => {
          discard_partial(&path);
          log::info!("{}: not found ({})", id, code);
          ProbeOutcome::NotFound { code }
        }
        429 => {
          discard_partial(&path);
          if retries >= self.config.max_rate_limit_retries {
            log::warn!("{}: still rate limited after {} retries, giving up", id, retries);
            ProbeOutcome::RateLimited
          } else {
            let wait = self.config.rate_limit_wait(retries);
            log::info!("{}: rate limited, retrying in {:?}", id, wait);
            self.pacer.pause(wait);
            retries += 1;
            continue;
          }
        }
        code => {
          discard_partial(&path);
          log::warn!("{}: unexpected status {}", id, code);
          ProbeOutcome::HttpError { code }
        }
      };

      return ProbeRecord {
        id,
        outcome,
        retries,
      };
    }
  }

  fn manifest_entries(&self, report: &SweepReport) -> Vec<ManifestEntry> {
    let mut entries: Vec<ManifestEntry> = report
      .records
      .iter()
      .filter(|record| record.outcome.is_success())
      .map(|record| {
        ManifestEntry::new(
          record.id,
          render_id_template(&self.config.manifest_image_template, record.id),
        )
      })
      .collect();
    entries.sort_by_key(|entry| entry.id);
    entries
  }
}

pub fn partial_path(path: &Path) -> PathBuf {
  let mut name = path.as_os_str().to_os_string();
  name.push(PARTIAL_SUFFIX);
  PathBuf::from(name)
}

/// Write to a `.part` sibling first so an interrupted run never leaves a
/// truncated image under the final name.
fn save_image(path: &Path, body: &[u8]) -> std::io::Result<()> {
  let partial = partial_path(path);
  let written = fs::write(&partial, body).and_then(|_| fs::rename(&partial, path));
  if written.is_err() {
    discard_partial(path);
  }
  written
}

fn discard_partial(path: &Path) {
  if let Err(e) = fs::remove_file(partial_path(path)) {
    if e.kind() != ErrorKind::NotFound {
      log::warn!("unable to remove partial file for {}: {}", path.display(), e);
    }
  }
}
