use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use over9k_lib::commands::{self, CardDto, CollectionStatsDto};
use over9k_lib::config::Over9kConfig;
use over9k_lib::manifest::ManifestLocation;
use over9k_lib::{logging, AppState};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "over9k", about = "Track which cards of the catalog you own")]
struct Cli {
  /// Config file (defaults to <config dir>/over9k/config.toml)
  #[arg(long, value_name = "PATH", global = true)]
  config: Option<PathBuf>,

  /// Directory holding the collection database
  #[arg(long, value_name = "PATH", global = true)]
  data_dir: Option<PathBuf>,

  /// Manifest file or http(s) URL
  #[arg(long, value_name = "LOCATION", global = true)]
  manifest: Option<String>,

  /// Print JSON instead of text
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
  /// Sync with the manifest and list every card
  List,
  /// Sync with the manifest only
  Sync,
  /// Show owned/total counts
  Stats,
  /// Flip the owned flag of a card
  Toggle { id: i64 },
  /// Remove a card from the collection
  Delete { id: i64 },
  /// Clear the collection and reload it from the manifest
  Reset {
    /// Skip the confirmation prompt
    #[arg(long)]
    yes: bool,
  },
  /// Show recent catalog syncs
  History {
    #[arg(long, default_value_t = 10)]
    limit: usize,
  },
}

fn main() -> Result<()> {
  logging::init();
  let cli = Cli::parse();

  let mut config = Over9kConfig::load(cli.config.as_deref()).context("loading config")?;
  if let Some(dir) = cli.data_dir {
    config.data_dir = Some(dir);
  }
  if let Some(manifest) = cli.manifest {
    config.manifest = Some(manifest);
  }
  let state = AppState::from_config(&config)?;
  log::debug!(
    "collection at {}, manifest {}",
    state.db_path.display(),
    state.manifest
  );

  let outcome = match cli.cmd {
    Cmd::List => commands::load_collection(&state).map(|view| {
      if view.sync.added_count > 0 {
        println!("{} new cards were added to your collection!", view.sync.added_count);
      }
      print_cards(&view.cards, cli.json);
      print_stats(&view.stats, cli.json);
    }),
    Cmd::Sync => commands::load_collection(&state).map(|view| {
      println!(
        "{} added, {} updated ({})",
        view.sync.added_count,
        view.sync.updated_count,
        view.sync.strategy.as_str()
      );
    }),
    Cmd::Stats => commands::collection_stats(&state).map(|stats| print_stats(&stats, cli.json)),
    Cmd::Toggle { id } => commands::toggle_owned(&state, id).map(|cards| {
      if let Some(card) = cards.iter().find(|card| card.id == id) {
        println!("card {} is now {}", id, owned_label(card.owned));
      }
    }),
    Cmd::Delete { id } => commands::delete_card(&state, id).map(|cards| {
      println!("card {} removed, {} cards left", id, cards.len());
    }),
    Cmd::Reset { yes } => {
      if !yes && !confirm(&state.manifest)? {
        println!("reset cancelled");
        return Ok(());
      }
      commands::reset_collection(&state).map(|view| {
        println!("collection reset with {} cards", view.cards.len());
      })
    }
    Cmd::History { limit } => commands::sync_history(&state, limit).map(|runs| {
      if cli.json {
        print_json(&runs);
        return;
      }
      for run in runs {
        println!(
          "{}  {:<6} +{} ~{} total={} manifest={}",
          run.applied_at,
          run.strategy,
          run.added_count,
          run.updated_count,
          run.total_records,
          &run.manifest_hash[..run.manifest_hash.len().min(12)]
        );
      }
    }),
  };

  if let Err(message) = outcome {
    log::error!("{}", message);
    bail!(message);
  }
  Ok(())
}

fn confirm(manifest: &ManifestLocation) -> Result<bool> {
  print!(
    "Remove every card? The collection will be reloaded from {}. [y/N] ",
    manifest
  );
  io::stdout().flush()?;
  let mut answer = String::new();
  io::stdin().lock().read_line(&mut answer)?;
  Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn owned_label(owned: bool) -> &'static str {
  if owned {
    "owned"
  } else {
    "missing"
  }
}

fn print_json<T: serde::Serialize>(value: &T) {
  match serde_json::to_string_pretty(value) {
    Ok(text) => println!("{}", text),
    Err(e) => log::error!("unable to encode output: {}", e),
  }
}

fn print_cards(cards: &[CardDto], json: bool) {
  if json {
    print_json(&cards);
    return;
  }
  for card in cards {
    println!(
      "{:>5}  [{}]  {}  {}",
      card.id,
      if card.owned { "x" } else { " " },
      card.image,
      card.detail_url
    );
  }
}

fn print_stats(stats: &CollectionStatsDto, json: bool) {
  if json {
    print_json(stats);
    return;
  }
  println!("{} / {} cards - {}%", stats.owned, stats.total, stats.percent);
}
