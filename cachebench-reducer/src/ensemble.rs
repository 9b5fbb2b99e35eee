use crate::error::ReduceError;
use crate::error::ReduceResult;
use crate::reduce::reduce;
use crate::reduce::MedianRule;
use cachebench_types::BenchRecord;
use cachebench_types::EnsembleKey;
use cachebench_types::ReductionKind;
use cachebench_types::RunLabel;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use tracing::info;

/// Reads runs `1..=runs` of an ensemble from `runs_dir`.
pub fn load_ensemble(
  runs_dir: &Path,
  key: &EnsembleKey,
  runs: usize,
) -> ReduceResult<Vec<BenchRecord>> {
  if runs == 0 {
    return Err(ReduceError::NoData);
  };
  (1..=runs)
    .map(|run| {
      let path = runs_dir.join(key.file_name(RunLabel::Index(run)));
      let raw = fs::read_to_string(&path).map_err(ReduceError::io(&path))?;
      serde_json::from_str(&raw).map_err(|e| ReduceError::MalformedInput {
        input: path.display().to_string(),
        reason: e.to_string(),
      })
    })
    .collect()
}

pub fn write_reduced(
  runs_dir: &Path,
  key: &EnsembleKey,
  kind: ReductionKind,
  record: &BenchRecord,
) -> ReduceResult<PathBuf> {
  let path = runs_dir.join(key.file_name(RunLabel::Reduced(kind)));
  let mut json = serde_json::to_string_pretty(record)
    .map_err(|e| ReduceError::io(&path)(io::Error::from(e)))?;
  json.push('\n');
  fs::write(&path, json).map_err(ReduceError::io(&path))?;
  Ok(path)
}

/// Loads the ensemble once and writes all four reductions next to it.
pub fn reduce_all(
  runs_dir: &Path,
  key: &EnsembleKey,
  runs: usize,
  rule: MedianRule,
) -> ReduceResult<Vec<(PathBuf, BenchRecord)>> {
  let records = load_ensemble(runs_dir, key, runs)?;
  ReductionKind::ALL
    .into_iter()
    .map(|kind| -> ReduceResult<(PathBuf, BenchRecord)> {
      let reduced = reduce(&records, kind, rule)?;
      let path = write_reduced(runs_dir, key, kind, &reduced)?;
      info!(
        %kind,
        path = %path.display(),
        gets_opsec = reduced.gets.opsec,
        sets_opsec = reduced.sets.opsec,
        "reduced"
      );
      Ok((path, reduced))
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use cachebench_types::OpStats;
  use cachebench_types::RunParameters;
  use tracing_test::traced_test;

  fn key() -> EnsembleKey {
    EnsembleKey {
      program: "valkey".to_string(),
      threads: 2,
      pipeline: 10,
      profile: false,
    }
  }

  #[test]
  fn test_missing_run_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_ensemble(dir.path(), &key(), 2).unwrap_err();
    match err {
      ReduceError::Io { path, .. } => assert_eq!(
        path,
        dir
          .path()
          .join("bench_valkey-threads_2-pipeline_10-perf_no-run_1.json")
      ),
      other => panic!("unexpected error: {other}"),
    };
  }

  #[test]
  #[traced_test]
  fn test_reduce_all_writes_every_kind() {
    let dir = tempfile::tempdir().unwrap();
    let params = RunParameters {
      program: "valkey".to_string(),
      threads: 2,
      bench_threads: 1,
      conns: 1,
      ops: 100,
      pipeline: 10,
      size_range: "1-1024".to_string(),
      protocol: None,
      profile: false,
    };
    for run in 1..=3 {
      let record = BenchRecord {
        info: params.info("valkey-server v=8.0.1"),
        sets: OpStats {
          opsec: run as f64,
          ..OpStats::default()
        },
        gets: OpStats::default(),
        perf: None,
      };
      fs::write(
        dir.path().join(params.run_file_name(run)),
        serde_json::to_string(&record).unwrap(),
      )
      .unwrap();
    }
    let written = reduce_all(dir.path(), &key(), 3, MedianRule::Legacy).unwrap();
    assert_eq!(written.len(), 4);
    for kind in ReductionKind::ALL {
      assert!(dir
        .path()
        .join(key().file_name(RunLabel::Reduced(kind)))
        .exists());
    }
    assert!(logs_contain("reduced"));
  }

  #[test]
  fn test_zero_runs_is_no_data() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      load_ensemble(dir.path(), &key(), 0),
      Err(ReduceError::NoData)
    ));
  }

  #[test]
  fn test_record_missing_field_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
      dir.path().join(key().file_name(RunLabel::Index(1))),
      r#"{"info": {"cache": "valkey"}, "sets": {}, "gets": {}}"#,
    )
    .unwrap();
    assert!(matches!(
      load_ensemble(dir.path(), &key(), 1),
      Err(ReduceError::MalformedInput { .. })
    ));
  }
}
