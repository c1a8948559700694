use over9k_lib::builder::{CatalogBuilder, HostResponse, ImageHost, Pacer, ProbeOutcome};
use over9k_lib::config::BuilderConfig;
use over9k_lib::manifest::{parse_manifest, ManifestEntry};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Fake host: a fixed status per id, with a one-off status sequence for some ids.
struct FakeHost {
  statuses: HashMap<i64, Vec<u16>>,
  calls: RefCell<HashMap<i64, usize>>,
}

impl FakeHost {
  fn new(statuses: Vec<(i64, Vec<u16>)>) -> Self {
    Self {
      statuses: statuses.into_iter().collect(),
      calls: RefCell::new(HashMap::new()),
    }
  }

  fn id_from(url: &str) -> i64 {
    url
      .trim_start_matches("http://thumbs.test/card")
      .trim_end_matches(".png")
      .parse()
      .unwrap()
  }
}

impl ImageHost for FakeHost {
  fn get(&self, url: &str) -> Result<HostResponse, String> {
    let id = Self::id_from(url);
    let mut calls = self.calls.borrow_mut();
    let call = calls.entry(id).or_insert(0);
    let sequence = self.statuses.get(&id).cloned().unwrap_or_else(|| vec![302]);
    let status = sequence[(*call).min(sequence.len() - 1)];
    *call += 1;
    Ok(HostResponse {
      status,
      body: if status == 200 {
        format!("image-{}", id).into_bytes()
      } else {
        Vec::new()
      },
    })
  }
}

struct NoWait;

impl Pacer for NoWait {
  fn pause(&self, _duration: Duration) {}
}

fn config_in(root: &Path) -> BuilderConfig {
  BuilderConfig {
    first_id: 1,
    last_id: 8,
    images_dir: root.join("public").join("images"),
    manifest_path: root.join("public").join("default.json"),
    image_url_template: "http://thumbs.test/card{id}.png".to_string(),
    max_rate_limit_retries: 4,
    ..BuilderConfig::default()
  }
}

#[test]
fn run_writes_sorted_manifest_of_saved_images() {
  let dir = tempfile::tempdir().unwrap();
  let config = config_in(dir.path());
  let host = FakeHost::new(vec![
    (8, vec![200]),
    (7, vec![429, 429, 200]),
    (6, vec![500]),
    (5, vec![302]),
    (3, vec![200]),
    (1, vec![200]),
  ]);

  let report = CatalogBuilder::new(&config, &host, &NoWait).run().unwrap();

  assert_eq!(report.outcome_for(5), Some(&ProbeOutcome::NotFound { code: 302 }));
  assert_eq!(report.outcome_for(6), Some(&ProbeOutcome::HttpError { code: 500 }));
  assert_eq!(report.outcome_for(7), Some(&ProbeOutcome::Downloaded));
  assert_eq!(report.success_count, 4);
  assert_eq!(report.error_count, 1);
  assert_eq!(report.not_found_count, 3);
  assert!(report.backup_path.is_none());

  let written = parse_manifest(&fs::read_to_string(&config.manifest_path).unwrap()).unwrap();
  assert_eq!(
    written,
    vec![
      ManifestEntry::new(1, "/images/card1.png"),
      ManifestEntry::new(3, "/images/card3.png"),
      ManifestEntry::new(7, "/images/card7.png"),
      ManifestEntry::new(8, "/images/card8.png"),
    ]
  );
  assert!(!config.images_dir.join("card5.png").exists());
  assert_eq!(
    fs::read(config.images_dir.join("card7.png")).unwrap(),
    b"image-7"
  );
}

#[test]
fn rerun_keeps_existing_images_and_backs_up_manifest() {
  let dir = tempfile::tempdir().unwrap();
  let config = config_in(dir.path());
  let first = FakeHost::new(vec![(2, vec![200])]);
  CatalogBuilder::new(&config, &first, &NoWait).run().unwrap();

  // Second pass: id 2 is already on disk, id 4 shows up.
  let second = FakeHost::new(vec![(4, vec![200])]);
  let report = CatalogBuilder::new(&config, &second, &NoWait).run().unwrap();

  assert_eq!(report.outcome_for(2), Some(&ProbeOutcome::Exists));
  assert!(!second.calls.borrow().contains_key(&2));

  let backup = report.backup_path.expect("previous manifest should be backed up");
  let name = backup.file_name().unwrap().to_string_lossy().into_owned();
  assert!(name.starts_with("default.json.backup-"));
  assert!(!name.contains(':'));
  assert!(name.ends_with('Z'));

  let old = parse_manifest(&fs::read_to_string(&backup).unwrap()).unwrap();
  assert_eq!(old, vec![ManifestEntry::new(2, "/images/card2.png")]);
  let new = parse_manifest(&fs::read_to_string(&config.manifest_path).unwrap()).unwrap();
  let ids: Vec<i64> = new.iter().map(|entry| entry.id).collect();
  assert_eq!(ids, vec![2, 4]);
}

#[test]
fn no_partial_files_survive_a_sweep() {
  let dir = tempfile::tempdir().unwrap();
  let config = config_in(dir.path());
  let host = FakeHost::new(vec![(8, vec![429; 9]), (4, vec![503]), (2, vec![200])]);

  let report = CatalogBuilder::new(&config, &host, &NoWait).run().unwrap();
  assert_eq!(report.outcome_for(8), Some(&ProbeOutcome::RateLimited));

  let leftovers: Vec<String> = fs::read_dir(&config.images_dir)
    .unwrap()
    .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
    .filter(|name| name.ends_with(".part"))
    .collect();
  assert!(leftovers.is_empty(), "found partial files: {:?}", leftovers);
}
