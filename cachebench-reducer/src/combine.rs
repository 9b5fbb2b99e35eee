use crate::error::ReduceError;
use crate::error::ReduceResult;
use cachebench_types::BenchRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

static REDUCED_FILE_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^bench_.+-run_(median|best|worst|average)\.json$").unwrap());

#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct CombinedEntry {
  pub file: String,
  pub data: BenchRecord,
}

pub fn is_reduced_file(name: &str) -> bool {
  REDUCED_FILE_RE.is_match(name)
}

/// Every reduced record in `runs_dir`, ordered by file name.
pub fn combine(runs_dir: &Path) -> ReduceResult<Vec<CombinedEntry>> {
  let mut names = Vec::new();
  for entry in fs::read_dir(runs_dir).map_err(ReduceError::io(runs_dir))? {
    let entry = entry.map_err(ReduceError::io(runs_dir))?;
    let name = entry.file_name().to_string_lossy().to_string();
    if is_reduced_file(&name) {
      names.push(name);
    };
  }
  names.sort();

  names
    .into_iter()
    .map(|file| -> ReduceResult<CombinedEntry> {
      let path = runs_dir.join(&file);
      let raw = fs::read_to_string(&path).map_err(ReduceError::io(&path))?;
      let data = serde_json::from_str(&raw).map_err(|e| ReduceError::MalformedInput {
        input: path.display().to_string(),
        reason: e.to_string(),
      })?;
      Ok(CombinedEntry { file, data })
    })
    .collect()
}

/// Writes `<results_dir>/output.json` from `<results_dir>/runs`.
pub fn write_combined(results_dir: &Path) -> ReduceResult<(PathBuf, Vec<CombinedEntry>)> {
  let entries = combine(&results_dir.join("runs"))?;
  let path = results_dir.join("output.json");
  let mut json = serde_json::to_string_pretty(&entries)
    .map_err(|e| ReduceError::io(&path)(io::Error::from(e)))?;
  json.push('\n');
  fs::write(&path, json).map_err(ReduceError::io(&path))?;
  Ok((path, entries))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_reduced_file_names() {
    assert!(is_reduced_file(
      "bench_redis-threads_4-pipeline_1-perf_no-run_median.json"
    ));
    assert!(is_reduced_file(
      "bench_garnet-threads_16-pipeline_50-perf_yes-run_average.json"
    ));
    assert!(!is_reduced_file(
      "bench_redis-threads_4-pipeline_1-perf_no-run_3.json"
    ));
    assert!(!is_reduced_file("output.json"));
    assert!(!is_reduced_file(
      "bench_redis-threads_4-pipeline_1-perf_no-run_median.json.bak"
    ));
  }

  #[test]
  fn test_missing_runs_dir() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      write_combined(dir.path()),
      Err(ReduceError::Io { .. })
    ));
  }

  #[test]
  fn test_empty_runs_dir() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("runs")).unwrap();
    let (path, entries) = write_combined(dir.path()).unwrap();
    assert!(entries.is_empty());
    assert_eq!(fs::read_to_string(path).unwrap(), "[]\n");
  }
}
