use num::de_lenient_f64;
use num::de_lenient_u64;
use num::ser_3dp;
use num::ser_opt_3dp;
use serde::Deserialize;
use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

mod num;

pub use num::round3;

pub fn yes_no(v: bool) -> &'static str {
  if v {
    "yes"
  } else {
    "no"
  }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReductionKind {
  Median,
  Best,
  Worst,
  Average,
}

impl ReductionKind {
  pub const ALL: [ReductionKind; 4] = [
    ReductionKind::Median,
    ReductionKind::Best,
    ReductionKind::Worst,
    ReductionKind::Average,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      ReductionKind::Median => "median",
      ReductionKind::Best => "best",
      ReductionKind::Worst => "worst",
      ReductionKind::Average => "average",
    }
  }
}

impl Display for ReductionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, PartialEq, Eq)]
pub struct UnknownReductionKind(pub String);

impl Display for UnknownReductionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "invalid kind: {}, expected 'median', 'best', 'worst', 'average'",
      self.0
    )
  }
}

impl Error for UnknownReductionKind {}

impl FromStr for ReductionKind {
  type Err = UnknownReductionKind;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    ReductionKind::ALL
      .into_iter()
      .find(|k| k.as_str() == s)
      .ok_or_else(|| UnknownReductionKind(s.to_string()))
  }
}

/// The trailing `run_<label>` component of a record file name.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RunLabel {
  /// 1-based run number.
  Index(usize),
  Reduced(ReductionKind),
}

impl Display for RunLabel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RunLabel::Index(i) => write!(f, "{i}"),
      RunLabel::Reduced(k) => f.write_str(k.as_str()),
    }
  }
}

/// The subset of run parameters that names an ensemble of runs on disk.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct EnsembleKey {
  pub program: String,
  pub threads: usize,
  pub pipeline: usize,
  pub profile: bool,
}

impl EnsembleKey {
  pub fn file_name(&self, label: RunLabel) -> String {
    format!(
      "bench_{}-threads_{}-pipeline_{}-perf_{}-run_{}.json",
      self.program,
      self.threads,
      self.pipeline,
      yes_no(self.profile),
      label,
    )
  }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RunParameters {
  pub program: String,
  /// Server threads.
  pub threads: usize,
  pub bench_threads: usize,
  /// Connections per benchmark thread.
  pub conns: usize,
  /// Operations per connection.
  pub ops: usize,
  pub pipeline: usize,
  pub size_range: String,
  pub protocol: Option<String>,
  pub profile: bool,
}

impl RunParameters {
  pub fn ensemble_key(&self) -> EnsembleKey {
    EnsembleKey {
      program: self.program.clone(),
      threads: self.threads,
      pipeline: self.pipeline,
      profile: self.profile,
    }
  }

  pub fn run_file_name(&self, run: usize) -> String {
    self.ensemble_key().file_name(RunLabel::Index(run))
  }

  pub fn info(&self, version: impl Into<String>) -> RunInfo {
    RunInfo {
      cache: self.program.clone(),
      version: version.into(),
      threads: self.threads,
      bench_threads: self.bench_threads,
      connections: self.bench_threads * self.conns,
      operations: self.bench_threads * self.conns * self.ops,
      sizerange: self.size_range.clone(),
      pipeline: self.pipeline,
      protocol: self.protocol.clone(),
      perf: self.profile,
      kind: None,
    }
  }
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct RunInfo {
  pub cache: String,
  pub version: String,
  pub threads: usize,
  pub bench_threads: usize,
  /// Total connections across all benchmark threads.
  pub connections: usize,
  /// Total operations across all connections.
  pub operations: usize,
  pub sizerange: String,
  pub pipeline: usize,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub protocol: Option<String>,
  #[serde(default)]
  pub perf: bool,
  /// Only set on reduced records.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub kind: Option<ReductionKind>,
}

impl RunInfo {
  /// Whether both describe the same benchmark configuration, ignoring any reduction tag.
  pub fn same_parameters(&self, other: &RunInfo) -> bool {
    RunInfo {
      kind: None,
      ..self.clone()
    } == RunInfo {
      kind: None,
      ..other.clone()
    }
  }
}

#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct LatencyStats {
  #[serde(serialize_with = "ser_3dp")]
  pub min: f64,
  #[serde(serialize_with = "ser_3dp")]
  pub max: f64,
  #[serde(serialize_with = "ser_3dp")]
  pub avg: f64,
  #[serde(serialize_with = "ser_3dp")]
  pub p50_00: f64,
  #[serde(serialize_with = "ser_3dp")]
  pub p90_00: f64,
  #[serde(serialize_with = "ser_3dp")]
  pub p99_00: f64,
  #[serde(serialize_with = "ser_3dp")]
  pub p99_90: f64,
  #[serde(serialize_with = "ser_3dp")]
  pub p99_99: f64,
}

impl LatencyStats {
  pub fn percentiles(&self) -> [f64; 5] {
    [
      self.p50_00,
      self.p90_00,
      self.p99_00,
      self.p99_90,
      self.p99_99,
    ]
  }
}

#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct OpStats {
  #[serde(serialize_with = "ser_3dp")]
  pub opsec: f64,
  #[serde(serialize_with = "ser_3dp")]
  pub mbsec: f64,
  pub latency: LatencyStats,
}

/// Counters from the profiler's report. Any counter the profiler could not provide is absent.
#[rustfmt::skip]
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct PerfStats {
  #[serde(default, deserialize_with = "de_lenient_f64", serialize_with = "ser_opt_3dp", skip_serializing_if = "Option::is_none")]
  pub cpu_utilized: Option<f64>,
  #[serde(default, deserialize_with = "de_lenient_u64", skip_serializing_if = "Option::is_none")]
  pub cycles: Option<u64>,
  #[serde(default, deserialize_with = "de_lenient_f64", serialize_with = "ser_opt_3dp", skip_serializing_if = "Option::is_none")]
  pub secsuser: Option<f64>,
  #[serde(default, deserialize_with = "de_lenient_f64", serialize_with = "ser_opt_3dp", skip_serializing_if = "Option::is_none")]
  pub secssys: Option<f64>,
  #[serde(default, deserialize_with = "de_lenient_u64", skip_serializing_if = "Option::is_none")]
  pub instructions: Option<u64>,
  #[serde(default, deserialize_with = "de_lenient_u64", skip_serializing_if = "Option::is_none")]
  pub branches: Option<u64>,
  #[serde(default, deserialize_with = "de_lenient_u64", skip_serializing_if = "Option::is_none")]
  pub branch_misses: Option<u64>,
  #[serde(default, deserialize_with = "de_lenient_u64", skip_serializing_if = "Option::is_none")]
  pub page_faults: Option<u64>,
}

impl PerfStats {
  /// A report with no cycle count carries nothing worth reducing.
  pub fn has_counters(&self) -> bool {
    self.cycles.is_some()
  }
}

#[derive(Debug, PartialEq)]
pub enum InvalidRecord {
  NegativePercentile { op: &'static str, value: f64 },
}

impl Display for InvalidRecord {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      InvalidRecord::NegativePercentile { op, value } => {
        write!(f, "{op} has a negative or non-finite percentile latency ({value})")
      }
    }
  }
}

impl Error for InvalidRecord {}

/// One benchmark run, or a reduction of several when `info.kind` is set.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct BenchRecord {
  pub info: RunInfo,
  pub sets: OpStats,
  pub gets: OpStats,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub perf: Option<PerfStats>,
}

impl BenchRecord {
  pub fn kind(&self) -> Option<ReductionKind> {
    self.info.kind
  }

  pub fn validate(&self) -> Result<(), InvalidRecord> {
    for (op, stats) in [("sets", &self.sets), ("gets", &self.gets)] {
      if let Some(value) = stats
        .latency
        .percentiles()
        .into_iter()
        .find(|v| !v.is_finite() || *v < 0.0)
      {
        return Err(InvalidRecord::NegativePercentile { op, value });
      };
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn params() -> RunParameters {
    RunParameters {
      program: "redis".to_string(),
      threads: 4,
      bench_threads: 2,
      conns: 50,
      ops: 10_000,
      pipeline: 1,
      size_range: "1-1024".to_string(),
      protocol: None,
      profile: false,
    }
  }

  fn latency(v: f64) -> LatencyStats {
    LatencyStats {
      min: v,
      max: v,
      avg: v,
      p50_00: v,
      p90_00: v,
      p99_00: v,
      p99_90: v,
      p99_99: v,
    }
  }

  #[test]
  fn test_file_names() {
    let key = params().ensemble_key();
    assert_eq!(
      key.file_name(RunLabel::Index(3)),
      "bench_redis-threads_4-pipeline_1-perf_no-run_3.json"
    );
    assert_eq!(
      EnsembleKey {
        profile: true,
        ..key
      }
      .file_name(RunLabel::Reduced(ReductionKind::Median)),
      "bench_redis-threads_4-pipeline_1-perf_yes-run_median.json"
    );
  }

  #[test]
  fn test_info_totals() {
    let info = params().info("Redis server v=7.2.4");
    assert_eq!(info.connections, 100);
    assert_eq!(info.operations, 1_000_000);
    assert_eq!(info.kind, None);
    let tagged = RunInfo {
      kind: Some(ReductionKind::Best),
      ..info.clone()
    };
    assert!(info.same_parameters(&tagged));
    assert!(!info.same_parameters(&RunInfo {
      threads: 8,
      ..info.clone()
    }));
  }

  #[test]
  fn test_reduction_kind_from_str() {
    assert_eq!("worst".parse(), Ok(ReductionKind::Worst));
    assert_eq!(
      "mean".parse::<ReductionKind>(),
      Err(UnknownReductionKind("mean".to_string()))
    );
  }

  #[test]
  fn test_serialize_rounds_and_omits_perf() {
    let record = BenchRecord {
      info: params().info("7.2.4"),
      sets: OpStats {
        opsec: 1234.56789,
        mbsec: 1.0,
        latency: latency(0.1234),
      },
      gets: OpStats::default(),
      perf: None,
    };
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["sets"]["opsec"], serde_json::json!(1234.568));
    assert_eq!(json["sets"]["latency"]["p99_99"], serde_json::json!(0.123));
    assert!(json.get("perf").is_none());
    assert!(json["info"].get("kind").is_none());
  }

  #[test]
  fn test_perf_counters_accept_strings() {
    let perf: PerfStats = serde_json::from_str(
      r#"{"cpu_utilized":"3.4567","cycles":"123456789","instructions":98765,"branches":"12.6","page_faults":"<not supported>"}"#,
    )
    .unwrap();
    assert_eq!(perf.cpu_utilized, Some(3.4567));
    assert_eq!(perf.cycles, Some(123_456_789));
    assert_eq!(perf.instructions, Some(98_765));
    assert_eq!(perf.branches, Some(13));
    assert_eq!(perf.branch_misses, None);
    assert_eq!(perf.page_faults, None);
    assert!(perf.has_counters());
    assert!(!PerfStats::default().has_counters());
  }

  #[test]
  fn test_missing_percentile_is_rejected() {
    let raw = r#"{"opsec":1.0,"mbsec":1.0,"latency":{"min":0.1,"max":0.1,"avg":0.1,"p50_00":0.1,"p90_00":0.1,"p99_00":0.1,"p99_90":0.1}}"#;
    assert!(serde_json::from_str::<OpStats>(raw).is_err());
  }

  #[test]
  fn test_validate_percentiles() {
    let mut record = BenchRecord {
      info: params().info("7.2.4"),
      sets: OpStats::default(),
      gets: OpStats::default(),
      perf: None,
    };
    assert_eq!(record.validate(), Ok(()));
    record.gets.latency.p99_90 = -1.0;
    assert_eq!(
      record.validate(),
      Err(InvalidRecord::NegativePercentile {
        op: "gets",
        value: -1.0
      })
    );
  }
}
