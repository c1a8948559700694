//! Catalog reconciliation.
//!
//! Merges manifest entries into the card store. New ids are inserted unowned,
//! known ids only ever get their `image` refreshed, and `owned` is left to the
//! user.

use crate::manifest::{load_manifest, manifest_hash, ManifestEntry, ManifestSource};
use crate::now_iso;
use crate::store::{CardPatch, CardStore, NewCard, StoreError, SyncRun};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
  #[default]
  Skipped,
  Import,
  Merge,
}

impl SyncStrategy {
  pub fn as_str(&self) -> &'static str {
    match self {
      SyncStrategy::Skipped => "skipped",
      SyncStrategy::Import => "import",
      SyncStrategy::Merge => "merge",
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
  pub added_count: u64,
  pub updated_count: u64,
  pub strategy: SyncStrategy,
}

impl ReconcileResult {
  pub fn wrote_anything(&self) -> bool {
    self.added_count > 0 || self.updated_count > 0
  }
}

pub fn reconcile(
  manifest: &[ManifestEntry],
  store: &mut dyn CardStore,
) -> Result<ReconcileResult, StoreError> {
  let strategy = if store.count()? == 0 {
    SyncStrategy::Import
  } else {
    SyncStrategy::Merge
  };
  let mut result = ReconcileResult {
    strategy,
    ..ReconcileResult::default()
  };

  for entry in manifest {
    if !entry.is_usable() {
      log::debug!("skipping manifest entry {} without a usable image", entry.id);
      continue;
    }

    if strategy == SyncStrategy::Import {
      store.add(NewCard::unowned(entry.id, entry.image.clone()))?;
      result.added_count += 1;
      continue;
    }

    match store.get(entry.id)? {
      None => {
        store.add(NewCard::unowned(entry.id, entry.image.clone()))?;
        result.added_count += 1;
      }
      Some(existing) if existing.image != entry.image => {
        store.update(entry.id, CardPatch::image(entry.image.clone()))?;
        result.updated_count += 1;
      }
      Some(_) => {}
    }
  }

  Ok(result)
}

/// Fetch the manifest and reconcile it into the store.
///
/// An unreachable or unusable manifest is logged and leaves the store
/// untouched. Store failures are returned to the caller.
pub fn sync_catalog(
  source: &dyn ManifestSource,
  store: &mut dyn CardStore,
) -> Result<ReconcileResult, StoreError> {
  let manifest = match load_manifest(source) {
    Ok(entries) => entries,
    Err(error) => {
      log::warn!("catalog sync skipped: {}", error);
      return Ok(ReconcileResult::default());
    }
  };

  let result = reconcile(&manifest, store)?;
  if !result.wrote_anything() {
    log::debug!(
      "catalog already up to date with {} ({} entries)",
      source.location(),
      manifest.len()
    );
    return Ok(result);
  }

  store.record_sync_run(&SyncRun {
    id: Uuid::new_v4().to_string(),
    manifest_hash: manifest_hash(&manifest),
    strategy: result.strategy.as_str().to_string(),
    entry_count: manifest.len() as i64,
    added_count: result.added_count as i64,
    updated_count: result.updated_count as i64,
    total_records: store.count()? as i64,
    applied_at: now_iso(),
  })?;

  log::info!(
    "catalog {} from {}: {} added, {} image updates",
    result.strategy.as_str(),
    source.location(),
    result.added_count,
    result.updated_count
  );
  Ok(result)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::ManifestError;
  use crate::store::{SortOrder, SqliteCardStore};

  struct StaticSource(Result<String, u16>);

  impl StaticSource {
    fn body(body: &str) -> Self {
      StaticSource(Ok(body.to_string()))
    }
  }

  impl ManifestSource for StaticSource {
    fn location(&self) -> String {
      "memory".to_string()
    }

    fn fetch(&self) -> Result<String, ManifestError> {
      match &self.0 {
        Ok(body) => Ok(body.clone()),
        Err(status) => Err(ManifestError::Status {
          location: self.location(),
          status: *status,
        }),
      }
    }
  }

  fn entries(pairs: &[(i64, &str)]) -> Vec<ManifestEntry> {
    pairs
      .iter()
      .map(|(id, image)| ManifestEntry::new(*id, *image))
      .collect()
  }

  #[test]
  fn empty_store_imports_everything_unowned() {
    let mut store = SqliteCardStore::open_in_memory().unwrap();
    let manifest = entries(&[(1, "/images/card1.png"), (2, "/images/card2.png")]);

    let result = reconcile(&manifest, &mut store).unwrap();
    assert_eq!(result.added_count, 2);
    assert_eq!(result.strategy, SyncStrategy::Import);

    let cards = store.list_all(SortOrder::Ascending).unwrap();
    assert_eq!(cards.len(), 2);
    assert!(cards.iter().all(|card| !card.owned));
  }

  #[test]
  fn merge_keeps_owned_and_refreshes_image() {
    let mut store = SqliteCardStore::open_in_memory().unwrap();
    store
      .add(NewCard {
        id: 1,
        image: "/images/card1.png".to_string(),
        owned: true,
      })
      .unwrap();
    let manifest = entries(&[(1, "/images/card1_v2.png"), (2, "/images/card2.png")]);

    let result = reconcile(&manifest, &mut store).unwrap();
    assert_eq!(result.added_count, 1);
    assert_eq!(result.updated_count, 1);
    assert_eq!(result.strategy, SyncStrategy::Merge);

    let first = store.get(1).unwrap().unwrap();
    assert_eq!(first.image, "/images/card1_v2.png");
    assert!(first.owned);
    let second = store.get(2).unwrap().unwrap();
    assert_eq!(second.image, "/images/card2.png");
    assert!(!second.owned);
  }

  #[test]
  fn unchanged_image_causes_no_write() {
    let mut store = SqliteCardStore::open_in_memory().unwrap();
    store.add(NewCard::unowned(1, "/images/card1.png")).unwrap();
    let before = store.get(1).unwrap().unwrap();

    let result = reconcile(&entries(&[(1, "/images/card1.png")]), &mut store).unwrap();
    assert!(!result.wrote_anything());
    assert_eq!(store.get(1).unwrap().unwrap(), before);
  }

  #[test]
  fn invalid_entries_are_skipped_on_import() {
    let mut store = SqliteCardStore::open_in_memory().unwrap();
    let manifest = entries(&[
      (1, "/images/card1.png"),
      (2, ""),
      (0, "/images/card0.png"),
      (3, "/images/card3.png"),
    ]);

    let result = reconcile(&manifest, &mut store).unwrap();
    assert_eq!(result.added_count, 2);
    assert_eq!(result.strategy, SyncStrategy::Import);
    let ids: Vec<i64> = store
      .list_all(SortOrder::Ascending)
      .unwrap()
      .iter()
      .map(|card| card.id)
      .collect();
    assert_eq!(ids, vec![1, 3]);
  }

  #[test]
  fn invalid_entries_are_skipped_on_merge() {
    let mut store = SqliteCardStore::open_in_memory().unwrap();
    store.add(NewCard::unowned(1, "/images/card1.png")).unwrap();
    let manifest = entries(&[(1, "   "), (2, ""), (3, "/images/card3.png")]);

    let result = reconcile(&manifest, &mut store).unwrap();
    assert_eq!(result.added_count, 1);
    assert_eq!(result.updated_count, 0);
    assert_eq!(store.get(1).unwrap().unwrap().image, "/images/card1.png");
    assert!(store.get(2).unwrap().is_none());
    assert!(store.get(3).unwrap().is_some());
  }

  #[test]
  fn records_not_in_manifest_are_left_alone() {
    let mut store = SqliteCardStore::open_in_memory().unwrap();
    store.add(NewCard::unowned(99, "/images/card99.png")).unwrap();

    reconcile(&entries(&[(1, "/images/card1.png")]), &mut store).unwrap();
    assert!(store.get(99).unwrap().is_some());
    assert_eq!(store.count().unwrap(), 2);
  }

  #[test]
  fn sync_with_failing_source_is_a_no_op() {
    let mut store = SqliteCardStore::open_in_memory().unwrap();
    store.add(NewCard::unowned(3, "/images/card3.png")).unwrap();
    let before = store.list_all(SortOrder::Ascending).unwrap();

    let result = sync_catalog(&StaticSource(Err(404)), &mut store).unwrap();
    assert_eq!(result, ReconcileResult::default());
    assert_eq!(store.list_all(SortOrder::Ascending).unwrap(), before);
    assert!(store.recent_sync_runs(10).unwrap().is_empty());
  }

  #[test]
  fn sync_with_malformed_body_is_a_no_op() {
    let mut store = SqliteCardStore::open_in_memory().unwrap();
    for body in [r#"{"cards":[]}"#, "[]", "<html>", r#"[{"id":1,"image":"a"},{"id":1,"image":"b"}]"#] {
      let result = sync_catalog(&StaticSource::body(body), &mut store).unwrap();
      assert_eq!(result.strategy, SyncStrategy::Skipped);
    }
    assert_eq!(store.count().unwrap(), 0);
  }

  #[test]
  fn sync_records_history_only_when_something_changed() {
    let mut store = SqliteCardStore::open_in_memory().unwrap();
    let source = StaticSource::body(r#"[{"id":1,"image":"/images/card1.png"}]"#);

    let first = sync_catalog(&source, &mut store).unwrap();
    assert_eq!(first.added_count, 1);
    let second = sync_catalog(&source, &mut store).unwrap();
    assert!(!second.wrote_anything());

    let runs = store.recent_sync_runs(10).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].strategy, "import");
    assert_eq!(runs[0].total_records, 1);
    assert_eq!(runs[0].manifest_hash.len(), 64);
  }
}
