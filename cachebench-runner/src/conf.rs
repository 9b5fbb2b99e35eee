use crate::error::BenchError;
use crate::error::BenchResult;
use crate::program::Program;
use serde::Deserialize;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

/// Binary locations. A path may contain `${arch}`, which is replaced with the host architecture (e.g. for Dragonfly's release binaries).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfPaths {
  pub redis: Option<String>,
  pub valkey: Option<String>,
  pub dragonfly: Option<String>,
  pub memcache: Option<String>,
  pub garnet: Option<String>,
  pub memtier: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConf {
  #[serde(default = "default_probe_interval_ms")]
  pub interval_ms: u64,
  #[serde(default = "default_probe_deadline_ms")]
  pub deadline_ms: u64,
  // Some servers accept connections slightly before they're fully initialised.
  #[serde(default = "default_probe_settle_ms")]
  pub settle_ms: u64,
  #[serde(default = "default_probe_attempt_timeout_ms")]
  pub attempt_timeout_ms: u64,
}

impl ProbeConf {
  pub fn interval(&self) -> Duration {
    Duration::from_millis(self.interval_ms)
  }

  pub fn deadline(&self) -> Duration {
    Duration::from_millis(self.deadline_ms)
  }

  pub fn settle(&self) -> Duration {
    Duration::from_millis(self.settle_ms)
  }

  pub fn attempt_timeout(&self) -> Duration {
    Duration::from_millis(self.attempt_timeout_ms)
  }
}

impl Default for ProbeConf {
  fn default() -> Self {
    Self {
      interval_ms: default_probe_interval_ms(),
      deadline_ms: default_probe_deadline_ms(),
      settle_ms: default_probe_settle_ms(),
      attempt_timeout_ms: default_probe_attempt_timeout_ms(),
    }
  }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilerConf {
  /// Prefix for privileged commands. Empty when already privileged.
  #[serde(default = "default_profiler_elevate")]
  pub elevate: Vec<String>,
  /// `{pid}` is replaced with the server's process ID.
  #[serde(default = "default_profiler_command")]
  pub command: Vec<String>,
  /// The line that starts the report section of the profiler's output.
  #[serde(default = "default_profiler_marker")]
  pub marker: String,
}

impl ProfilerConf {
  /// A harmless privileged command, run once up front so the profiler launch later doesn't block on a password prompt.
  pub fn credential_check_argv(&self) -> Option<Vec<String>> {
    if self.elevate.is_empty() {
      return None;
    };
    let mut argv = self.elevate.clone();
    argv.extend(["echo".to_string(), "OK".to_string()]);
    Some(argv)
  }

  pub fn attach_argv(&self, pid: u32) -> Vec<String> {
    let pid = pid.to_string();
    self
      .elevate
      .iter()
      .cloned()
      .chain(self.command.iter().map(|a| a.replace("{pid}", &pid)))
      .collect()
  }

  pub fn interrupt_argv(&self, pid: u32) -> Vec<String> {
    let mut argv = self.elevate.clone();
    argv.extend(["kill".to_string(), "-INT".to_string(), pid.to_string()]);
    argv
  }
}

impl Default for ProfilerConf {
  fn default() -> Self {
    Self {
      elevate: default_profiler_elevate(),
      command: default_profiler_command(),
      marker: default_profiler_marker(),
    }
  }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Conf {
  pub paths: ConfPaths,
  #[serde(default = "default_tcp_port")]
  pub tcp_port: u16,
  #[serde(default = "default_unix_socket")]
  pub unix_socket: PathBuf,
  /// Where scratch files and `bench.json` are written.
  #[serde(default = "default_work_dir")]
  pub work_dir: PathBuf,
  #[serde(default)]
  pub probe: ProbeConf,
  #[serde(default)]
  pub profiler: ProfilerConf,
  /// Every process matching one of these names is killed during cleanup.
  #[serde(default = "default_kill_names")]
  pub kill_names: Vec<String>,
}

/// Files written during a single run. Only one run may use them at a time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScratchFiles {
  pub set_json: PathBuf,
  pub get_json: PathBuf,
  pub perf_out: PathBuf,
  pub socket: PathBuf,
  pub output: PathBuf,
}

impl ScratchFiles {
  pub fn purgeable(&self) -> Vec<PathBuf> {
    vec![
      self.socket.clone(),
      self.set_json.clone(),
      self.get_json.clone(),
      self.perf_out.clone(),
    ]
  }
}

pub fn host_arch() -> &'static str {
  std::env::consts::ARCH
}

impl Conf {
  pub fn load(path: &Path) -> BenchResult<Conf> {
    let raw = fs::read_to_string(path).map_err(|e| BenchError::Config {
      path: path.to_path_buf(),
      source: Box::new(e),
    })?;
    serde_yaml::from_str(&raw).map_err(|e| BenchError::Config {
      path: path.to_path_buf(),
      source: Box::new(e),
    })
  }

  fn resolve(name: &str, template: Option<&String>) -> BenchResult<PathBuf> {
    match template {
      Some(t) if !t.is_empty() => Ok(PathBuf::from(t.replace("${arch}", host_arch()))),
      _ => Err(BenchError::MissingPath(name.to_string())),
    }
  }

  pub fn program_path(&self, program: Program) -> BenchResult<PathBuf> {
    let template = match program {
      Program::Redis => self.paths.redis.as_ref(),
      Program::Valkey => self.paths.valkey.as_ref(),
      Program::Dragonfly => self.paths.dragonfly.as_ref(),
      Program::Memcache => self.paths.memcache.as_ref(),
      Program::Garnet => self.paths.garnet.as_ref(),
    };
    Self::resolve(program.name(), template)
  }

  pub fn memtier_path(&self) -> BenchResult<PathBuf> {
    Self::resolve("memtier", self.paths.memtier.as_ref())
  }

  pub fn scratch(&self) -> ScratchFiles {
    ScratchFiles {
      set_json: self.work_dir.join("bench-set.json"),
      get_json: self.work_dir.join("bench-get.json"),
      perf_out: self.work_dir.join("perf.out"),
      socket: self.unix_socket.clone(),
      output: self.work_dir.join("bench.json"),
    }
  }
}

const fn default_tcp_port() -> u16 {
  19283
}
fn default_unix_socket() -> PathBuf {
  PathBuf::from("/tmp/cachebench.sock")
}
fn default_work_dir() -> PathBuf {
  PathBuf::from(".")
}
const fn default_probe_interval_ms() -> u64 {
  10
}
const fn default_probe_deadline_ms() -> u64 {
  10_000
}
const fn default_probe_settle_ms() -> u64 {
  100
}
const fn default_probe_attempt_timeout_ms() -> u64 {
  1000
}
fn default_profiler_elevate() -> Vec<String> {
  vec!["sudo".to_string()]
}
fn default_profiler_command() -> Vec<String> {
  ["perf", "stat", "--no-big-num", "--no-scale", "-p", "{pid}"]
    .map(String::from)
    .to_vec()
}
fn default_profiler_marker() -> String {
  "Performance counter stats".to_string()
}
fn default_kill_names() -> Vec<String> {
  [
    "valkey",
    "redis",
    "memcache",
    "dragonfly",
    "memtier",
    "dotnet",
    "garnet",
    "GarnetServer",
  ]
  .map(String::from)
  .to_vec()
}
