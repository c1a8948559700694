use anyhow::{Context, Result};
use clap::Parser;
use over9k_lib::builder::{CatalogBuilder, HttpImageHost, ThreadPacer};
use over9k_lib::config::Over9kConfig;
use over9k_lib::logging;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
  name = "catalog-builder",
  about = "Download card thumbnails and write the catalog manifest"
)]
struct Cli {
  /// Config file (defaults to <config dir>/over9k/config.toml)
  #[arg(long, value_name = "PATH")]
  config: Option<PathBuf>,

  /// Lowest id to probe
  #[arg(long)]
  first_id: Option<i64>,

  /// Highest id to probe; the sweep starts here
  #[arg(long)]
  last_id: Option<i64>,

  #[arg(long, value_name = "DIR")]
  images_dir: Option<PathBuf>,

  #[arg(long, value_name = "PATH")]
  manifest_path: Option<PathBuf>,

  /// Give up on an id after this many rate-limited retries
  #[arg(long)]
  max_retries: Option<u32>,
}

fn main() -> Result<()> {
  logging::init();
  let cli = Cli::parse();

  let config = Over9kConfig::load(cli.config.as_deref()).context("loading config")?;
  let mut settings = config.builder;
  if let Some(first_id) = cli.first_id {
    settings.first_id = first_id;
  }
  if let Some(last_id) = cli.last_id {
    settings.last_id = last_id;
  }
  if let Some(dir) = cli.images_dir {
    settings.images_dir = dir;
  }
  if let Some(path) = cli.manifest_path {
    settings.manifest_path = path;
  }
  if let Some(max_retries) = cli.max_retries {
    settings.max_rate_limit_retries = max_retries;
  }
  settings.validate()?;

  let host = HttpImageHost::new(settings.request_timeout()).map_err(anyhow::Error::msg)?;
  let report = CatalogBuilder::new(&settings, &host, &ThreadPacer)
    .run()
    .with_context(|| format!("writing {}", settings.manifest_path.display()))?;

  println!(
    "{} cards in {} ({} saved, {} missing, {} errors)",
    report.manifest.len(),
    settings.manifest_path.display(),
    report.success_count,
    report.not_found_count,
    report.error_count
  );
  Ok(())
}
