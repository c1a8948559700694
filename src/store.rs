use crate::now_iso;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const MIGRATION_SQL_0001: &str = include_str!("../migrations/0001_initial.sql");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRecord {
  pub id: i64,
  pub image: String,
  pub owned: bool,
  pub updated_at: String,
}

/// Fields supplied when inserting a card. `updated_at` is stamped by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCard {
  pub id: i64,
  pub image: String,
  pub owned: bool,
}

impl NewCard {
  pub fn unowned(id: i64, image: impl Into<String>) -> Self {
    Self {
      id,
      image: image.into(),
      owned: false,
    }
  }
}

/// Partial update. `None` leaves the column as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardPatch {
  pub image: Option<String>,
  pub owned: Option<bool>,
}

impl CardPatch {
  pub fn image(image: impl Into<String>) -> Self {
    Self {
      image: Some(image.into()),
      owned: None,
    }
  }

  pub fn owned(owned: bool) -> Self {
    Self {
      image: None,
      owned: Some(owned),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.image.is_none() && self.owned.is_none()
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
  Ascending,
  #[default]
  Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRun {
  pub id: String,
  pub manifest_hash: String,
  pub strategy: String,
  pub entry_count: i64,
  pub added_count: i64,
  pub updated_count: i64,
  pub total_records: i64,
  pub applied_at: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("Card not found: {0}")]
  NotFound(i64),

  #[error("Card {0} already exists")]
  DuplicateId(i64),

  #[error("Invalid card: {0}")]
  InvalidCard(String),

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Database error: {0}")]
  Database(#[from] rusqlite::Error),
}

/// Persistent mapping from card id to card record.
/// Every call is atomic on its own; callers get no multi-call transaction.
pub trait CardStore {
  fn get(&self, id: i64) -> Result<Option<CardRecord>, StoreError>;

  /// Insert a new card. Fails with `DuplicateId` if the id is taken.
  fn add(&mut self, card: NewCard) -> Result<i64, StoreError>;

  /// Apply a partial update. Fails with `NotFound` for an unknown id.
  fn update(&mut self, id: i64, patch: CardPatch) -> Result<(), StoreError>;

  /// Unknown ids are ignored.
  fn delete(&mut self, id: i64) -> Result<(), StoreError>;

  fn clear(&mut self) -> Result<(), StoreError>;

  fn list_all(&self, order: SortOrder) -> Result<Vec<CardRecord>, StoreError>;

  fn count(&self) -> Result<u64, StoreError>;

  fn count_owned(&self) -> Result<u64, StoreError>;

  fn record_sync_run(&mut self, run: &SyncRun) -> Result<(), StoreError>;

  fn recent_sync_runs(&self, limit: usize) -> Result<Vec<SyncRun>, StoreError>;
}

pub struct SqliteCardStore {
  connection: Connection,
}

impl SqliteCardStore {
  pub fn open(db_path: &Path) -> Result<Self, StoreError> {
    if let Some(parent) = db_path.parent() {
      if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)?;
      }
    }

    let connection = Connection::open(db_path)?;
    connection.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
    Self::init(connection)
  }

  pub fn open_in_memory() -> Result<Self, StoreError> {
    Self::init(Connection::open_in_memory()?)
  }

  fn init(connection: Connection) -> Result<Self, StoreError> {
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    connection.execute_batch(MIGRATION_SQL_0001)?;
    Ok(Self { connection })
  }
}

fn map_card_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CardRecord> {
  Ok(CardRecord {
    id: row.get(0)?,
    image: row.get(1)?,
    owned: row.get(2)?,
    updated_at: row.get(3)?,
  })
}

impl CardStore for SqliteCardStore {
  fn get(&self, id: i64) -> Result<Option<CardRecord>, StoreError> {
    let card = self
      .connection
      .query_row(
        "SELECT id, image, owned, updated_at FROM cards WHERE id = ?1 LIMIT 1",
        params![id],
        map_card_row,
      )
      .optional()?;
    Ok(card)
  }

  fn add(&mut self, card: NewCard) -> Result<i64, StoreError> {
    if card.id <= 0 {
      return Err(StoreError::InvalidCard(format!(
        "id must be positive, got {}",
        card.id
      )));
    }
    if card.image.trim().is_empty() {
      return Err(StoreError::InvalidCard(format!(
        "card {} has an empty image",
        card.id
      )));
    }

    let inserted = self.connection.execute(
      "INSERT INTO cards (id, image, owned, updated_at)
       VALUES (?1, ?2, ?3, ?4)
       ON CONFLICT(id) DO NOTHING",
      params![card.id, card.image, card.owned, now_iso()],
    )?;
    if inserted == 0 {
      return Err(StoreError::DuplicateId(card.id));
    }
    Ok(card.id)
  }

  fn update(&mut self, id: i64, patch: CardPatch) -> Result<(), StoreError> {
    let changed = self.connection.execute(
      "UPDATE cards
       SET image = COALESCE(?1, image),
           owned = COALESCE(?2, owned),
           updated_at = ?3
       WHERE id = ?4",
      params![patch.image, patch.owned, now_iso(), id],
    )?;
    if changed == 0 {
      return Err(StoreError::NotFound(id));
    }
    Ok(())
  }

  fn delete(&mut self, id: i64) -> Result<(), StoreError> {
    self
      .connection
      .execute("DELETE FROM cards WHERE id = ?1", params![id])?;
    Ok(())
  }

  fn clear(&mut self) -> Result<(), StoreError> {
    self.connection.execute("DELETE FROM cards", [])?;
    Ok(())
  }

  fn list_all(&self, order: SortOrder) -> Result<Vec<CardRecord>, StoreError> {
    let sql = match order {
      SortOrder::Ascending => "SELECT id, image, owned, updated_at FROM cards ORDER BY id ASC",
      SortOrder::Descending => "SELECT id, image, owned, updated_at FROM cards ORDER BY id DESC",
    };
    let mut statement = self.connection.prepare(sql)?;
    let rows = statement.query_map([], map_card_row)?;

    let mut cards = Vec::new();
    for row in rows {
      cards.push(row?);
    }
    Ok(cards)
  }

  fn count(&self) -> Result<u64, StoreError> {
    let total: i64 = self
      .connection
      .query_row("SELECT COUNT(*) FROM cards", [], |row| row.get(0))?;
    Ok(total.max(0) as u64)
  }

  fn count_owned(&self) -> Result<u64, StoreError> {
    let owned: i64 = self.connection.query_row(
      "SELECT COUNT(*) FROM cards WHERE owned = 1",
      [],
      |row| row.get(0),
    )?;
    Ok(owned.max(0) as u64)
  }

  fn record_sync_run(&mut self, run: &SyncRun) -> Result<(), StoreError> {
    self.connection.execute(
      "INSERT INTO sync_history (
         id, manifest_hash, strategy, entry_count, added_count,
         updated_count, total_records, applied_at
       )
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
      params![
        run.id,
        run.manifest_hash,
        run.strategy,
        run.entry_count,
        run.added_count,
        run.updated_count,
        run.total_records,
        run.applied_at
      ],
    )?;
    Ok(())
  }

  fn recent_sync_runs(&self, limit: usize) -> Result<Vec<SyncRun>, StoreError> {
    let mut statement = self.connection.prepare(
      "SELECT id, manifest_hash, strategy, entry_count, added_count,
              updated_count, total_records, applied_at
       FROM sync_history
       ORDER BY applied_at DESC, rowid DESC
       LIMIT ?1",
    )?;
    let rows = statement.query_map(params![limit as i64], |row| {
      Ok(SyncRun {
        id: row.get(0)?,
        manifest_hash: row.get(1)?,
        strategy: row.get(2)?,
        entry_count: row.get(3)?,
        added_count: row.get(4)?,
        updated_count: row.get(5)?,
        total_records: row.get(6)?,
        applied_at: row.get(7)?,
      })
    })?;

    let mut runs = Vec::new();
    for row in rows {
      runs.push(row?);
    }
    Ok(runs)
  }
}
