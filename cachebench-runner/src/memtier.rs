use crate::error::BenchError;
use crate::error::BenchResult;
use crate::probe::Endpoint;
use cachebench_types::round3;
use cachebench_types::LatencyStats;
use cachebench_types::OpStats;
use cachebench_types::RunParameters;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LoadPhase {
  Warmup,
  Set,
  Get,
}

impl LoadPhase {
  /// memtier's SET:GET ratio.
  pub fn ratio(&self) -> &'static str {
    match self {
      LoadPhase::Warmup | LoadPhase::Set => "1:0",
      LoadPhase::Get => "0:1",
    }
  }
}

pub struct LoadGenerator {
  pub binary: PathBuf,
  pub endpoint: Endpoint,
  pub taskset: Option<String>,
  pub params: RunParameters,
}

impl LoadGenerator {
  /// Every phase shares the same connection, thread, op, pipeline, size and protocol settings. Only the ratio and output file differ.
  pub fn argv(&self, phase: LoadPhase, json_out: &Path) -> Vec<String> {
    let p = &self.params;
    let mut argv = Vec::new();
    if let Some(cpus) = &self.taskset {
      argv.extend(["taskset".to_string(), "-c".to_string(), cpus.clone()]);
    };
    argv.push(self.binary.display().to_string());
    argv.extend(
      [
        "-c",
        &p.conns.to_string(),
        "-t",
        &p.bench_threads.to_string(),
        "-n",
        &p.ops.to_string(),
        "--distinct-client-seed",
        "--hide-histogram",
        "--key-prefix",
        "",
        "--ratio",
        phase.ratio(),
        "--data-size-range",
        &p.size_range,
        "--pipeline",
        &p.pipeline.to_string(),
        "--json-out-file",
        &json_out.display().to_string(),
        "--print-percentiles",
        "50,90,99,99.9,99.99",
        "--key-pattern=P:P",
      ]
      .map(String::from),
    );
    match &self.endpoint {
      Endpoint::Tcp(addr) => argv.extend(["-p".to_string(), addr.port().to_string()]),
      Endpoint::Unix(path) => argv.extend(["-S".to_string(), path.display().to_string()]),
    };
    if let Some(proto) = &p.protocol {
      argv.extend(["--protocol".to_string(), proto.clone()]);
    };
    argv
  }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MemtierOp {
  Sets,
  Gets,
}

#[derive(Deserialize)]
struct Output {
  #[serde(rename = "ALL STATS")]
  all_stats: AllStats,
}

#[derive(Deserialize)]
struct AllStats {
  #[serde(rename = "Sets")]
  sets: Option<RawOpStats>,
  #[serde(rename = "Gets")]
  gets: Option<RawOpStats>,
}

#[derive(Deserialize)]
struct RawOpStats {
  #[serde(rename = "Ops/sec")]
  ops_sec: f64,
  #[serde(rename = "KB/sec")]
  kb_sec: f64,
  #[serde(rename = "Average Latency")]
  avg_latency: f64,
  #[serde(rename = "Min Latency", default)]
  min_latency: f64,
  #[serde(rename = "Max Latency", default)]
  max_latency: f64,
  #[serde(rename = "Percentile Latencies")]
  percentiles: RawPercentiles,
}

#[derive(Deserialize)]
struct RawPercentiles {
  #[serde(rename = "p50.00")]
  p50_00: f64,
  #[serde(rename = "p90.00")]
  p90_00: f64,
  #[serde(rename = "p99.00")]
  p99_00: f64,
  #[serde(rename = "p99.90")]
  p99_90: f64,
  #[serde(rename = "p99.99")]
  p99_99: f64,
}

impl From<RawOpStats> for OpStats {
  fn from(raw: RawOpStats) -> Self {
    let pct = raw.percentiles;
    OpStats {
      opsec: round3(raw.ops_sec),
      mbsec: round3(raw.kb_sec / 1024.0),
      latency: LatencyStats {
        min: round3(raw.min_latency),
        max: round3(raw.max_latency),
        avg: round3(raw.avg_latency),
        p50_00: round3(pct.p50_00),
        p90_00: round3(pct.p90_00),
        p99_00: round3(pct.p99_00),
        p99_90: round3(pct.p99_90),
        p99_99: round3(pct.p99_99),
      },
    }
  }
}

pub fn parse_op_stats(raw: &str, op: MemtierOp) -> Result<OpStats, String> {
  let output: Output = serde_json::from_str(raw).map_err(|e| e.to_string())?;
  let stats = match op {
    MemtierOp::Sets => output.all_stats.sets,
    MemtierOp::Gets => output.all_stats.gets,
  };
  let stats = stats
    .map(OpStats::from)
    .ok_or_else(|| format!("no {op:?} section under ALL STATS"))?;
  if let Some(value) = stats
    .latency
    .percentiles()
    .into_iter()
    .find(|v| !v.is_finite() || *v < 0.0)
  {
    return Err(format!("{op:?} has a negative or non-finite percentile latency ({value})"));
  };
  Ok(stats)
}

pub fn read_op_stats(path: &Path, op: MemtierOp) -> BenchResult<OpStats> {
  let raw = fs::read_to_string(path).map_err(BenchError::io(path))?;
  parse_op_stats(&raw, op).map_err(|reason| BenchError::MalformedOutput {
    path: path.to_path_buf(),
    reason,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = r#"{
    "configuration": {"server": "", "port": 19283},
    "ALL STATS": {
      "Sets": {
        "Count": 1000000,
        "Ops/sec": 250123.45678,
        "Hits/sec": 0.0,
        "Misses/sec": 0.0,
        "Latency": 0.19,
        "Average Latency": 0.19876,
        "Min Latency": 0.015,
        "Max Latency": 5.1234,
        "KB/sec": 131072.0,
        "Percentile Latencies": {
          "p50.00": 0.183,
          "p90.00": 0.247,
          "p99.00": 0.399,
          "p99.90": 1.111,
          "p99.99": 3.0005
        }
      },
      "Gets": {
        "Ops/sec": 0.0,
        "KB/sec": 0.0,
        "Average Latency": 0.0,
        "Percentile Latencies": {
          "p50.00": 0.0,
          "p90.00": 0.0,
          "p99.00": 0.0,
          "p99.90": 0.0
        }
      }
    }
  }"#;

  #[test]
  fn test_parse_sets() {
    let sets = parse_op_stats(SAMPLE, MemtierOp::Sets).unwrap();
    assert_eq!(sets.opsec, 250123.457);
    assert_eq!(sets.mbsec, 128.0);
    assert_eq!(sets.latency.avg, 0.199);
    assert_eq!(sets.latency.max, 5.123);
    assert_eq!(sets.latency.p99_99, 3.001);
  }

  #[test]
  fn test_missing_percentile_is_malformed() {
    assert!(parse_op_stats(SAMPLE, MemtierOp::Gets).is_err());
    assert!(parse_op_stats(r#"{"ALL STATS": {}}"#, MemtierOp::Sets)
      .unwrap_err()
      .contains("Sets"));
  }

  #[test]
  fn test_negative_percentile_names_its_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bench-set.json");
    std::fs::write(
      &path,
      r#"{"ALL STATS": {"Sets": {
        "Ops/sec": 10.0, "KB/sec": 1.0, "Average Latency": 0.1, "Min Latency": 0.1, "Max Latency": 0.1,
        "Percentile Latencies": {"p50.00": 0.1, "p90.00": -1.0, "p99.00": 0.1, "p99.90": 0.1, "p99.99": 0.1}
      }}}"#,
    )
    .unwrap();
    match read_op_stats(&path, MemtierOp::Sets) {
      Err(BenchError::MalformedOutput { path: bad, reason }) => {
        assert_eq!(bad, path);
        assert!(reason.contains("-1"));
      }
      other => panic!("unexpected result: {other:?}"),
    };
  }

  #[test]
  fn test_phase_argv() {
    let gen = LoadGenerator {
      binary: PathBuf::from("memtier_benchmark"),
      endpoint: Endpoint::Unix(PathBuf::from("/tmp/cachebench.sock")),
      taskset: Some("4-7".to_string()),
      params: RunParameters {
        program: "memcache".to_string(),
        threads: 4,
        bench_threads: 2,
        conns: 50,
        ops: 10_000,
        pipeline: 10,
        size_range: "1-1024".to_string(),
        protocol: Some("memcache_text".to_string()),
        profile: false,
      },
    };
    let set = gen.argv(LoadPhase::Set, Path::new("bench-set.json"));
    let get = gen.argv(LoadPhase::Get, Path::new("bench-get.json"));
    assert_eq!(&set[..4], ["taskset", "-c", "4-7", "memtier_benchmark"]);
    let ratio = |argv: &[String]| argv[argv.iter().position(|a| a == "--ratio").unwrap() + 1].clone();
    assert_eq!(ratio(&set), "1:0");
    assert_eq!(ratio(&get), "0:1");
    assert_eq!(&set[set.len() - 4..], ["-S", "/tmp/cachebench.sock", "--protocol", "memcache_text"]);
    assert_eq!(set.len(), get.len());
    let differing = set.iter().zip(&get).filter(|(a, b)| a != b).count();
    assert_eq!(differing, 2);
  }
}
