use crate::conf::Conf;
use crate::error::BenchError;
use crate::error::BenchResult;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::process::Child;
use tokio::process::Command;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::spawn;
use tokio::task::spawn_blocking;
use tracing::debug;
use tracing::info;
use tracing::warn;

struct Inner {
  kill_names: Vec<String>,
  artifacts: Vec<PathBuf>,
  cleanups: AtomicU64,
}

/// Owns the process registry and scratch files for one run. Cheap to clone; every clone shares the same cleanup.
#[derive(Clone)]
pub struct Supervisor(Arc<Inner>);

impl Supervisor {
  pub fn new(kill_names: Vec<String>, artifacts: Vec<PathBuf>) -> Self {
    Self(Arc::new(Inner {
      kill_names,
      artifacts,
      cleanups: AtomicU64::new(0),
    }))
  }

  pub fn from_conf(conf: &Conf) -> Self {
    Self::new(conf.kill_names.clone(), conf.scratch().purgeable())
  }

  pub fn launch(&self, argv: &[String]) -> BenchResult<ProcessHandle> {
    let (program, args) = argv
      .split_first()
      .ok_or_else(|| BenchError::Usage("empty command line".to_string()))?;
    info!(program = %program, args = ?args, "launching");
    let child = Command::new(program)
      .args(args)
      .stdin(Stdio::null())
      .stdout(Stdio::inherit())
      .stderr(Stdio::inherit())
      .kill_on_drop(true)
      .spawn()
      .map_err(|source| BenchError::Spawn {
        program: program.clone(),
        source,
      })?;
    let pid = child.id().unwrap_or_default();
    Ok(ProcessHandle {
      program: program.clone(),
      child,
      pid,
    })
  }

  /// Launches `argv` and waits for it to exit successfully.
  pub async fn run(&self, argv: &[String]) -> BenchResult<()> {
    self.launch(argv)?.wait_success().await
  }

  /// Graceful then forced termination of every registered process name. Nothing running is not an error.
  pub fn terminate_all(&self) {
    for signal in [None, Some("-9")] {
      for name in self.0.kill_names.iter() {
        let mut cmd = std::process::Command::new("pkill");
        if let Some(signal) = signal {
          cmd.arg(signal);
        };
        let res = cmd
          .arg(name)
          .stdin(Stdio::null())
          .stdout(Stdio::null())
          .stderr(Stdio::null())
          .status();
        if let Err(err) = res {
          debug!(name = %name, error = %err, "pkill failed");
        };
      }
    }
  }

  pub fn purge_artifacts(&self) {
    for path in self.0.artifacts.iter() {
      match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => debug!(path = %path.display(), error = %err, "failed to remove"),
      };
    }
  }

  /// Safe to call any number of times from any path; never fails. Blocks on `pkill`, so async callers use `cleanup_async`.
  pub fn cleanup(&self) {
    let n = self.0.cleanups.fetch_add(1, Ordering::Relaxed) + 1;
    debug!(invocation = n, "cleaning up");
    self.terminate_all();
    self.purge_artifacts();
  }

  async fn off_runtime(&self, what: &'static str, f: fn(&Supervisor)) {
    let supervisor = self.clone();
    if let Err(err) = spawn_blocking(move || f(&supervisor)).await {
      warn!(task = what, error = %err, "blocking task failed");
    };
  }

  pub async fn terminate_all_async(&self) {
    self.off_runtime("terminate", Supervisor::terminate_all).await;
  }

  pub async fn cleanup_async(&self) {
    self.off_runtime("cleanup", Supervisor::cleanup).await;
  }

  pub fn cleanup_count(&self) -> u64 {
    self.0.cleanups.load(Ordering::Relaxed)
  }

  /// Runs cleanup when dropped, including during a panic unwind.
  pub fn guard(&self) -> CleanupGuard {
    CleanupGuard(self.clone())
  }

  /// On SIGINT or SIGTERM: clean up and exit with status 1. Lives for the rest of the process.
  pub fn spawn_signal_listener(&self) -> BenchResult<()> {
    let mut interrupt = signal(SignalKind::interrupt()).map_err(BenchError::io("SIGINT"))?;
    let mut terminate = signal(SignalKind::terminate()).map_err(BenchError::io("SIGTERM"))?;
    let supervisor = self.clone();
    spawn(async move {
      let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
      };
      warn!(signal = name, "received termination signal, cleaning up");
      supervisor.cleanup_async().await;
      std::process::exit(1);
    });
    Ok(())
  }
}

pub struct CleanupGuard(Supervisor);

impl Drop for CleanupGuard {
  fn drop(&mut self) {
    self.0.cleanup();
  }
}

pub struct ProcessHandle {
  program: String,
  child: Child,
  pid: u32,
}

impl ProcessHandle {
  pub fn pid(&self) -> u32 {
    self.pid
  }

  pub fn program(&self) -> &str {
    &self.program
  }

  pub async fn wait_success(mut self) -> BenchResult<()> {
    let status = self
      .child
      .wait()
      .await
      .map_err(BenchError::io(&self.program))?;
    if !status.success() {
      return Err(BenchError::SubprocessFailed {
        program: self.program,
        status,
      });
    };
    Ok(())
  }

  /// Fails if the process has already exited, whatever its status.
  pub fn check_running(&mut self) -> BenchResult<()> {
    match self.child.try_wait() {
      Ok(None) => Ok(()),
      Ok(Some(status)) => Err(BenchError::SubprocessFailed {
        program: self.program.clone(),
        status,
      }),
      Err(err) => Err(BenchError::Io {
        path: PathBuf::from(&self.program),
        source: err,
      }),
    }
  }

  /// Best effort; the process may already be gone.
  pub async fn kill(&mut self) {
    if let Err(err) = self.child.kill().await {
      debug!(program = %self.program, error = %err, "kill failed");
    };
  }
}
