use crate::conf::Conf;
use crate::error::BenchError;
use crate::error::BenchResult;
use crate::memtier::read_op_stats;
use crate::memtier::LoadGenerator;
use crate::memtier::LoadPhase;
use crate::memtier::MemtierOp;
use crate::probe::wait_until_ready;
use crate::probe::Endpoint;
use crate::profile::parse_report;
use crate::profile::ProfileCapture;
use crate::program::server_argv;
use crate::program::Program;
use crate::supervisor::Supervisor;
use cachebench_types::BenchRecord;
use cachebench_types::PerfStats;
use cachebench_types::RunParameters;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;
use tracing::warn;

static ANSI_ESCAPE_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap());

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RunState {
  Idle,
  ServerStarting,
  ServerReady,
  Warmup,
  ProfilingAttached,
  MeasuringSet,
  MeasuringGet,
  Draining,
  Finalizing,
  Done,
  Aborted,
}

impl RunState {
  pub fn is_terminal(&self) -> bool {
    matches!(self, RunState::Done | RunState::Aborted)
  }
}

pub struct RunOptions {
  pub program: Program,
  /// `program`, `protocol` and thread counts must already be resolved.
  pub params: RunParameters,
  pub tcp: bool,
  pub taskset: Option<String>,
  pub btaskset: Option<String>,
  pub warmup: bool,
  pub server_flags: Vec<String>,
  pub is_root: bool,
}

pub fn strip_ansi(s: &str) -> String {
  ANSI_ESCAPE_RE.replace_all(s, "").into_owned()
}

/// First line of `<binary> --version`, without colour codes. Some servers print it on stderr.
pub async fn server_version(binary: &Path) -> BenchResult<String> {
  let program = binary.display().to_string();
  let output = Command::new(binary)
    .arg("--version")
    .stdin(Stdio::null())
    .output()
    .await
    .map_err(|source| BenchError::Spawn {
      program: program.clone(),
      source,
    })?;
  let text = if output.stdout.iter().all(|b| b.is_ascii_whitespace()) {
    output.stderr
  } else {
    output.stdout
  };
  let text = String::from_utf8_lossy(&text);
  let first = text.trim().lines().next().unwrap_or_default();
  Ok(strip_ansi(first.trim()))
}

pub fn write_record(path: &Path, record: &BenchRecord) -> BenchResult<()> {
  let json = serde_json::to_string_pretty(record)
    .map_err(|e| BenchError::io(path)(io::Error::from(e)))?;
  fs::write(path, json).map_err(BenchError::io(path))?;
  info!(path = %path.display(), "record written");
  Ok(())
}

pub struct RunExecutor<'a> {
  conf: &'a Conf,
  opts: RunOptions,
  supervisor: Supervisor,
  state: RunState,
}

impl<'a> RunExecutor<'a> {
  pub fn new(conf: &'a Conf, opts: RunOptions, supervisor: Supervisor) -> Self {
    Self {
      conf,
      opts,
      supervisor,
      state: RunState::Idle,
    }
  }

  pub fn state(&self) -> RunState {
    self.state
  }

  fn transition(&mut self, next: RunState) {
    info!(from = ?self.state, state = ?next, "run state");
    self.state = next;
  }

  fn endpoint(&self) -> Endpoint {
    if self.opts.tcp {
      Endpoint::local_tcp(self.conf.tcp_port)
    } else {
      Endpoint::Unix(self.conf.unix_socket.clone())
    }
  }

  /// Runs every phase and returns the persisted record. Whatever happens, all known processes are gone and scratch files purged when this returns.
  pub async fn run(&mut self) -> BenchResult<BenchRecord> {
    let res = self.run_phases().await;
    self.supervisor.cleanup_async().await;
    match res {
      Ok(record) => {
        self.transition(RunState::Done);
        Ok(record)
      }
      Err(err) => {
        warn!(state = ?self.state, error = %err, "run aborted");
        self.transition(RunState::Aborted);
        Err(err)
      }
    }
  }

  async fn run_phases(&mut self) -> BenchResult<BenchRecord> {
    let scratch = self.conf.scratch();
    // A server left over from an earlier run would hold the port and answer our probes. Never read a previous run's outputs either.
    self.supervisor.cleanup_async().await;

    let binary = self.conf.program_path(self.opts.program)?;
    let memtier = self.conf.memtier_path()?;
    let version = server_version(&binary).await?;
    info!(program = self.opts.program.name(), version = %version, "resolved server");
    let endpoint = self.endpoint();
    let loadgen = LoadGenerator {
      binary: memtier,
      endpoint: endpoint.clone(),
      taskset: self.opts.btaskset.clone(),
      params: self.opts.params.clone(),
    };

    self.transition(RunState::ServerStarting);
    let argv = server_argv(
      self.opts.program,
      &binary,
      self.opts.params.threads,
      &endpoint,
      self.opts.is_root,
      self.opts.taskset.as_deref(),
      &self.opts.server_flags,
    );
    let mut server = self.supervisor.launch(&argv)?;
    wait_until_ready(&endpoint, &self.conf.probe, || server.check_running()).await?;
    // The probe only proves something answers on the endpoint.
    server.check_running()?;
    self.transition(RunState::ServerReady);

    if self.opts.warmup {
      self.transition(RunState::Warmup);
      self
        .supervisor
        .run(&loadgen.argv(LoadPhase::Warmup, &scratch.set_json))
        .await?;
    };

    let mut capture = None;
    if self.opts.params.profile {
      self.transition(RunState::ProfilingAttached);
      if let Some(argv) = self.conf.profiler.credential_check_argv() {
        self.supervisor.run(&argv).await?;
      };
      capture = Some(ProfileCapture::start(
        &self.conf.profiler,
        server.pid(),
        scratch.perf_out.clone(),
      )?);
    };

    self.transition(RunState::MeasuringSet);
    self
      .supervisor
      .run(&loadgen.argv(LoadPhase::Set, &scratch.set_json))
      .await?;
    self.transition(RunState::MeasuringGet);
    self
      .supervisor
      .run(&loadgen.argv(LoadPhase::Get, &scratch.get_json))
      .await?;
    server.check_running()?;

    // The profiler must be drained while its target is still alive.
    self.transition(RunState::Draining);
    let report = match capture {
      Some(capture) => capture.stop().await?,
      None => None,
    };
    self.supervisor.terminate_all_async().await;
    server.kill().await;

    self.transition(RunState::Finalizing);
    let perf = match report {
      Some(path) => Some(read_perf(&path)?),
      None => None,
    };
    // `read_op_stats` rejects invalid percentiles per file.
    let record = BenchRecord {
      info: self.opts.params.info(version),
      sets: read_op_stats(&scratch.set_json, MemtierOp::Sets)?,
      gets: read_op_stats(&scratch.get_json, MemtierOp::Gets)?,
      perf,
    };
    write_record(&scratch.output, &record)?;
    Ok(record)
  }
}

fn read_perf(path: &Path) -> BenchResult<PerfStats> {
  let report = fs::read_to_string(path).map_err(BenchError::io(path))?;
  Ok(parse_report(&report))
}
