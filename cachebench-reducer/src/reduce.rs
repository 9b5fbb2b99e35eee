use crate::error::ReduceError;
use crate::error::ReduceResult;
use cachebench_types::round3;
use cachebench_types::BenchRecord;
use cachebench_types::LatencyStats;
use cachebench_types::OpStats;
use cachebench_types::PerfStats;
use cachebench_types::ReductionKind;
use clap::ValueEnum;
use std::cmp::Reverse;
use tracing::debug;

/// Ensembles larger than this have their extremes trimmed.
pub const TRIM_THRESHOLD: usize = 10;

/// Which element of an ascending view is reported as the median.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, ValueEnum)]
pub enum MedianRule {
  /// `count / 2 + 1`, as in every archived result set. Clamped to the last element.
  #[default]
  Legacy,
  /// `count / 2`.
  Middle,
}

impl MedianRule {
  pub fn index(&self, count: usize) -> usize {
    match self {
      MedianRule::Legacy => (count / 2 + 1).min(count.saturating_sub(1)),
      MedianRule::Middle => count / 2,
    }
  }
}

/// Drops the lowest and highest tenth of an already sorted view.
pub fn trim_outliers<T>(view: &mut Vec<T>) {
  let len = view.len();
  if len <= TRIM_THRESHOLD {
    return;
  };
  let n = len / 10;
  view.truncate(len - n);
  view.drain(..n);
}

fn selected_index(kind: ReductionKind, rule: MedianRule, count: usize) -> usize {
  match kind {
    ReductionKind::Best => count - 1,
    ReductionKind::Worst => 0,
    ReductionKind::Median => rule.index(count),
    // Unused: averages consider every element.
    ReductionKind::Average => 0,
  }
}

fn mean(values: impl Iterator<Item = f64>, n: usize) -> f64 {
  round3(values.sum::<f64>() / n as f64)
}

fn average_ops(view: &[&OpStats]) -> OpStats {
  let n = view.len();
  let avg = |f: fn(&OpStats) -> f64| mean(view.iter().map(|s| f(s)), n);
  OpStats {
    opsec: avg(|s| s.opsec),
    mbsec: avg(|s| s.mbsec),
    latency: LatencyStats {
      min: avg(|s| s.latency.min),
      max: avg(|s| s.latency.max),
      avg: avg(|s| s.latency.avg),
      p50_00: avg(|s| s.latency.p50_00),
      p90_00: avg(|s| s.latency.p90_00),
      p99_00: avg(|s| s.latency.p99_00),
      p99_90: avg(|s| s.latency.p99_90),
      p99_99: avg(|s| s.latency.p99_99),
    },
  }
}

/// Averages only if the first entry carries counters; otherwise the first entry is passed through. A counter a run lacks counts as zero.
fn average_perf(view: &[Option<&PerfStats>]) -> Option<PerfStats> {
  let first = *view.first()?;
  let first = first?;
  if !first.has_counters() {
    return Some(first.clone());
  };
  let n = view.len();
  let ratio = |f: fn(&PerfStats) -> Option<f64>| {
    view
      .iter()
      .any(|p| p.and_then(f).is_some())
      .then(|| mean(view.iter().map(|p| p.and_then(f).unwrap_or(0.0)), n))
  };
  let count = |f: fn(&PerfStats) -> Option<u64>| {
    view.iter().any(|p| p.and_then(f).is_some()).then(|| {
      let sum: f64 = view.iter().map(|p| p.and_then(f).unwrap_or(0) as f64).sum();
      (sum / n as f64).round() as u64
    })
  };
  Some(PerfStats {
    cpu_utilized: ratio(|p| p.cpu_utilized),
    cycles: count(|p| p.cycles),
    secsuser: ratio(|p| p.secsuser),
    secssys: ratio(|p| p.secssys),
    instructions: count(|p| p.instructions),
    branches: count(|p| p.branches),
    branch_misses: count(|p| p.branch_misses),
    page_faults: count(|p| p.page_faults),
  })
}

/// Collapses an ensemble of runs sharing the same parameters into one record of the given kind.
///
/// SET, GET and profiler results are ordered independently: SETs and GETs by ops/sec ascending, profiler reports by cycles descending. A selected record's `sets` and `gets` may therefore come from different runs.
pub fn reduce(
  records: &[BenchRecord],
  kind: ReductionKind,
  rule: MedianRule,
) -> ReduceResult<BenchRecord> {
  let first = records.first().ok_or(ReduceError::NoData)?;
  for (i, record) in records.iter().enumerate() {
    record
      .validate()
      .map_err(|e| ReduceError::MalformedInput {
        input: format!("run {}", i + 1),
        reason: e.to_string(),
      })?;
    if !record.info.same_parameters(&first.info) {
      return Err(ReduceError::MismatchedParameters {
        input: format!("run {}", i + 1),
      });
    };
  }

  let mut gets: Vec<&OpStats> = records.iter().map(|r| &r.gets).collect();
  gets.sort_by(|a, b| a.opsec.total_cmp(&b.opsec));
  let mut sets: Vec<&OpStats> = records.iter().map(|r| &r.sets).collect();
  sets.sort_by(|a, b| a.opsec.total_cmp(&b.opsec));
  let mut perf: Vec<Option<&PerfStats>> = records.iter().map(|r| r.perf.as_ref()).collect();
  perf.sort_by_key(|p| Reverse(p.and_then(|p| p.cycles).unwrap_or(0)));

  trim_outliers(&mut gets);
  trim_outliers(&mut sets);
  trim_outliers(&mut perf);
  let count = gets.len();
  debug!(%kind, runs = records.len(), kept = count, "reducing");

  let (sets, gets, perf) = match kind {
    ReductionKind::Average => (average_ops(&sets), average_ops(&gets), average_perf(&perf)),
    _ => {
      let i = selected_index(kind, rule, count);
      (sets[i].clone(), gets[i].clone(), perf[i].cloned())
    }
  };

  let mut info = first.info.clone();
  info.kind = Some(kind);
  Ok(BenchRecord {
    info,
    sets,
    gets,
    perf,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use cachebench_types::RunInfo;

  fn info() -> RunInfo {
    RunInfo {
      cache: "redis".to_string(),
      version: "Redis server v=7.2.4".to_string(),
      threads: 4,
      bench_threads: 2,
      connections: 100,
      operations: 1_000_000,
      sizerange: "1-1024".to_string(),
      pipeline: 1,
      protocol: None,
      perf: false,
      kind: None,
    }
  }

  fn ops(opsec: f64) -> OpStats {
    OpStats {
      opsec,
      mbsec: round3(opsec / 1000.0),
      latency: LatencyStats {
        min: 0.01,
        max: 2.5,
        avg: 0.333,
        p50_00: 0.3,
        p90_00: 0.5,
        p99_00: 0.9,
        p99_90: 1.25,
        p99_99: 2.0,
      },
    }
  }

  fn record(set_opsec: f64, get_opsec: f64) -> BenchRecord {
    BenchRecord {
      info: info(),
      sets: ops(set_opsec),
      gets: ops(get_opsec),
      perf: None,
    }
  }

  #[test]
  fn test_median_rule() {
    assert_eq!(MedianRule::Legacy.index(4), 3);
    assert_eq!(MedianRule::Legacy.index(9), 5);
    assert_eq!(MedianRule::Legacy.index(2), 1);
    assert_eq!(MedianRule::Legacy.index(1), 0);
    assert_eq!(MedianRule::Middle.index(4), 2);
    assert_eq!(MedianRule::Middle.index(1), 0);
  }

  #[test]
  fn test_trim_outliers() {
    let mut small: Vec<u32> = (0..10).collect();
    trim_outliers(&mut small);
    assert_eq!(small.len(), 10);
    let mut eleven: Vec<u32> = (0..11).collect();
    trim_outliers(&mut eleven);
    assert_eq!(eleven, (1..10).collect::<Vec<_>>());
    let mut twenty_five: Vec<u32> = (0..25).collect();
    trim_outliers(&mut twenty_five);
    assert_eq!(twenty_five.first(), Some(&2));
    assert_eq!(twenty_five.last(), Some(&22));
  }

  #[test]
  fn test_average_of_identical_records() {
    for n in [1, 3, 10] {
      let r = record(123_456.789, 234_567.891);
      let records = vec![r.clone(); n];
      let avg = reduce(&records, ReductionKind::Average, MedianRule::Legacy).unwrap();
      assert_eq!(avg.sets, r.sets);
      assert_eq!(avg.gets, r.gets);
      assert_eq!(avg.perf, None);
      assert_eq!(avg.info.kind, Some(ReductionKind::Average));
    }
  }

  #[test]
  fn test_worst_of_eleven_skips_trimmed_minimum() {
    let records: Vec<BenchRecord> = [50.0, 10.0, 90.0, 30.0, 70.0, 20.0, 110.0, 40.0, 60.0, 80.0, 100.0]
      .into_iter()
      .map(|g| record(1.0, g))
      .collect();
    let worst = reduce(&records, ReductionKind::Worst, MedianRule::Legacy).unwrap();
    assert_eq!(worst.gets.opsec, 20.0);
    let best = reduce(&records, ReductionKind::Best, MedianRule::Legacy).unwrap();
    assert_eq!(best.gets.opsec, 100.0);
  }

  #[test]
  fn test_median_of_four_is_third_index() {
    let records: Vec<BenchRecord> = [4.0, 1.0, 3.0, 2.0]
      .into_iter()
      .map(|g| record(g * 10.0, g))
      .collect();
    let median = reduce(&records, ReductionKind::Median, MedianRule::Legacy).unwrap();
    assert_eq!(median.gets.opsec, 4.0);
    assert_eq!(median.sets.opsec, 40.0);
    let middle = reduce(&records, ReductionKind::Median, MedianRule::Middle).unwrap();
    assert_eq!(middle.gets.opsec, 3.0);
  }

  #[test]
  fn test_small_ensembles_clamp_median() {
    let one = vec![record(1.0, 1.0)];
    assert!(reduce(&one, ReductionKind::Median, MedianRule::Legacy).is_ok());
    let two = vec![record(1.0, 1.0), record(2.0, 2.0)];
    let median = reduce(&two, ReductionKind::Median, MedianRule::Legacy).unwrap();
    assert_eq!(median.gets.opsec, 2.0);
  }

  #[test]
  fn test_views_are_sorted_independently() {
    // Run A has the slower SETs but the faster GETs.
    let mut a = record(10.0, 200.0);
    let mut b = record(20.0, 100.0);
    a.perf = Some(PerfStats {
      cycles: Some(5_000),
      ..PerfStats::default()
    });
    b.perf = Some(PerfStats {
      cycles: Some(9_000),
      ..PerfStats::default()
    });
    let best = reduce(&[a, b], ReductionKind::Best, MedianRule::Legacy).unwrap();
    assert_eq!(best.sets.opsec, 20.0);
    assert_eq!(best.gets.opsec, 200.0);
    // Profiler reports are ordered by cycles descending, so the last has the fewest.
    assert_eq!(best.perf.unwrap().cycles, Some(5_000));
  }

  #[test]
  fn test_average_perf() {
    let mut a = record(1.0, 1.0);
    let mut b = record(1.0, 1.0);
    a.perf = Some(PerfStats {
      cpu_utilized: Some(1.0),
      cycles: Some(1_001),
      instructions: Some(10),
      page_faults: None,
      ..PerfStats::default()
    });
    b.perf = Some(PerfStats {
      cpu_utilized: Some(2.5),
      cycles: Some(2_000),
      instructions: Some(20),
      page_faults: Some(7),
      ..PerfStats::default()
    });
    let avg = reduce(&[a, b], ReductionKind::Average, MedianRule::Legacy)
      .unwrap()
      .perf
      .unwrap();
    assert_eq!(avg.cpu_utilized, Some(1.75));
    assert_eq!(avg.cycles, Some(1_501));
    assert_eq!(avg.instructions, Some(15));
    assert_eq!(avg.page_faults, Some(4));
    assert_eq!(avg.branches, None);
  }

  #[test]
  fn test_average_perf_without_counters_passes_through() {
    let mut a = record(1.0, 1.0);
    let b = record(1.0, 1.0);
    a.perf = Some(PerfStats {
      secsuser: Some(0.5),
      ..PerfStats::default()
    });
    let avg = reduce(&[a.clone(), b], ReductionKind::Average, MedianRule::Legacy).unwrap();
    assert_eq!(avg.perf, a.perf);
  }

  #[test]
  fn test_rejects_bad_ensembles() {
    assert!(matches!(
      reduce(&[], ReductionKind::Median, MedianRule::Legacy),
      Err(ReduceError::NoData)
    ));

    let mut other = record(1.0, 1.0);
    other.info.threads = 8;
    assert!(matches!(
      reduce(&[record(1.0, 1.0), other], ReductionKind::Best, MedianRule::Legacy),
      Err(ReduceError::MismatchedParameters { input }) if input == "run 2"
    ));

    let mut negative = record(1.0, 1.0);
    negative.sets.latency.p99_00 = -0.5;
    assert!(matches!(
      reduce(&[negative], ReductionKind::Worst, MedianRule::Legacy),
      Err(ReduceError::MalformedInput { .. })
    ));
  }
}
