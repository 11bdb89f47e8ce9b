//! Saving and loading training artifacts as JSON blobs.
//!
//! A failed call leaves the in-memory value untouched; loading either yields
//! a complete value or an error.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::PersistError;
use crate::scorer::{UpdateDiscipline, WeightVector};
use crate::trainer::{FilterMemo, GoldCache};

fn io_error(path: &Path, source: std::io::Error) -> PersistError {
  PersistError::Io {
    path: path.to_path_buf(),
    source,
  }
}

pub fn save<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
  let file = File::create(path).map_err(|e| io_error(path, e))?;
  let mut writer = BufWriter::new(file);
  serde_json::to_writer(&mut writer, value).map_err(|e| {
    if e.is_io() {
      io_error(path, e.into())
    } else {
      PersistError::Corrupt {
        path: path.to_path_buf(),
        source: e,
      }
    }
  })?;
  writer.flush().map_err(|e| io_error(path, e))
}

pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T, PersistError> {
  let file = File::open(path).map_err(|e| io_error(path, e))?;
  serde_json::from_reader(BufReader::new(file)).map_err(|e| {
    if e.is_io() {
      io_error(path, e.into())
    } else {
      PersistError::Corrupt {
        path: path.to_path_buf(),
        source: e,
      }
    }
  })
}

pub fn save_filters(path: &Path, filters: &FilterMemo) -> Result<(), PersistError> {
  save(path, filters)
}

pub fn load_filters(path: &Path) -> Result<FilterMemo, PersistError> {
  load(path)
}

pub fn save_gold_cache(path: &Path, gold: &GoldCache) -> Result<(), PersistError> {
  save(path, gold)
}

pub fn load_gold_cache(path: &Path) -> Result<GoldCache, PersistError> {
  load(path)
}

pub fn save_weights(path: &Path, weights: &WeightVector) -> Result<(), PersistError> {
  save(path, &weights.snapshot())
}

pub fn load_weights(path: &Path, discipline: UpdateDiscipline) -> Result<WeightVector, PersistError> {
  let snapshot: BTreeMap<String, f64> = load(path)?;
  Ok(WeightVector::from_snapshot(discipline, snapshot))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::scorer::FeatureVector;

  fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("ccgbender-{}-{}.json", name, std::process::id()))
  }

  #[test]
  fn test_weights_survive_reload() {
    let path = temp_path("weights");
    let weights = WeightVector::new(UpdateDiscipline::Serialized);
    let mut delta = FeatureVector::new();
    delta.add("RULE=forward-application", 1.5);
    weights.add_scaled(&delta, 2.0);

    save_weights(&path, &weights).unwrap();
    let loaded = load_weights(&path, UpdateDiscipline::LockFree).unwrap();
    assert_eq!(loaded.get("RULE=forward-application"), 3.0);
    assert_eq!(loaded.discipline(), UpdateDiscipline::LockFree);
    std::fs::remove_file(&path).unwrap();
  }

  #[test]
  fn test_load_errors() {
    let missing = temp_path("missing");
    assert!(matches!(
      load_gold_cache(&missing),
      Err(PersistError::Io { .. })
    ));

    let garbage = temp_path("garbage");
    std::fs::write(&garbage, "{ not json").unwrap();
    assert!(matches!(
      load_filters(&garbage),
      Err(PersistError::Corrupt { .. })
    ));
    std::fs::remove_file(&garbage).unwrap();
  }
}
