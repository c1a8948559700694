//! Collection commands used by the front end.
//!
//! Each command opens its own store handle from `AppState` and reports
//! failures as display strings.

use crate::config::{render_id_template, CARD_DETAIL_URL_TEMPLATE};
use crate::reconcile::{sync_catalog, ReconcileResult};
use crate::store::{CardPatch, CardRecord, CardStore, SortOrder, SqliteCardStore, SyncRun};
use crate::AppState;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CardDto {
  pub id: i64,
  pub image: String,
  pub owned: bool,
  pub updated_at: String,
  pub detail_url: String,
}

impl From<CardRecord> for CardDto {
  fn from(card: CardRecord) -> Self {
    Self {
      detail_url: render_id_template(CARD_DETAIL_URL_TEMPLATE, card.id),
      id: card.id,
      image: card.image,
      owned: card.owned,
      updated_at: card.updated_at,
    }
  }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStatsDto {
  pub total: u64,
  pub owned: u64,
  pub percent: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CollectionViewDto {
  pub cards: Vec<CardDto>,
  pub sync: ReconcileResult,
  pub stats: CollectionStatsDto,
}

fn open_store(state: &AppState) -> Result<SqliteCardStore, String> {
  SqliteCardStore::open(&state.db_path).map_err(|e| e.to_string())
}

fn load_cards(store: &dyn CardStore) -> Result<Vec<CardDto>, String> {
  let cards = store
    .list_all(SortOrder::Descending)
    .map_err(|e| e.to_string())?;
  Ok(cards.into_iter().map(CardDto::from).collect())
}

fn load_stats(store: &dyn CardStore) -> Result<CollectionStatsDto, String> {
  let total = store.count().map_err(|e| e.to_string())?;
  let owned = store.count_owned().map_err(|e| e.to_string())?;
  let percent = if total == 0 {
    0
  } else {
    (owned * 100 + total / 2) / total
  };
  Ok(CollectionStatsDto {
    total,
    owned,
    percent,
  })
}

/// Sync against the manifest, then return the whole collection, newest id first.
pub fn load_collection(state: &AppState) -> Result<CollectionViewDto, String> {
  let mut store = open_store(state)?;
  let source = state.manifest.source();
  let sync = sync_catalog(source.as_ref(), &mut store).map_err(|e| e.to_string())?;
  if sync.added_count > 0 {
    log::info!("{} new cards added to the collection", sync.added_count);
  }

  Ok(CollectionViewDto {
    cards: load_cards(&store)?,
    sync,
    stats: load_stats(&store)?,
  })
}

pub fn toggle_owned(state: &AppState, id: i64) -> Result<Vec<CardDto>, String> {
  let mut store = open_store(state)?;
  let card = store
    .get(id)
    .map_err(|e| e.to_string())?
    .ok_or_else(|| format!("Card not found: {}", id))?;
  store
    .update(id, CardPatch::owned(!card.owned))
    .map_err(|e| e.to_string())?;
  load_cards(&store)
}

pub fn delete_card(state: &AppState, id: i64) -> Result<Vec<CardDto>, String> {
  let mut store = open_store(state)?;
  store.delete(id).map_err(|e| e.to_string())?;
  load_cards(&store)
}

/// Drop every card and rebuild the collection from the manifest.
pub fn reset_collection(state: &AppState) -> Result<CollectionViewDto, String> {
  {
    let mut store = open_store(state)?;
    store.clear().map_err(|e| e.to_string())?;
  }
  log::info!("collection cleared, reloading from {}", state.manifest);
  load_collection(state)
}

pub fn collection_stats(state: &AppState) -> Result<CollectionStatsDto, String> {
  let store = open_store(state)?;
  load_stats(&store)
}

pub fn sync_history(state: &AppState, limit: usize) -> Result<Vec<SyncRun>, String> {
  let store = open_store(state)?;
  store.recent_sync_runs(limit).map_err(|e| e.to_string())
}
