use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

pub type BenchResult<T> = Result<T, BenchError>;

#[derive(Debug)]
pub enum BenchError {
  Usage(String),
  Config {
    path: PathBuf,
    source: Box<dyn Error + Send + Sync>,
  },
  MissingPath(String),
  Spawn {
    program: String,
    source: io::Error,
  },
  SubprocessFailed {
    program: String,
    status: ExitStatus,
  },
  StartupTimeout {
    endpoint: String,
    waited: Duration,
  },
  MalformedOutput {
    path: PathBuf,
    reason: String,
  },
  Io {
    path: PathBuf,
    source: io::Error,
  },
}

impl BenchError {
  pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> BenchError {
    let path = path.into();
    move |source| BenchError::Io { path, source }
  }
}

impl Display for BenchError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BenchError::Usage(msg) => write!(f, "{msg}"),
      BenchError::Config { path, source } => {
        write!(f, "invalid config {}: {source}", path.display())
      }
      BenchError::MissingPath(name) => write!(f, "missing path for {name}"),
      BenchError::Spawn { program, source } => write!(f, "failed to start {program}: {source}"),
      BenchError::SubprocessFailed { program, status } => {
        write!(f, "{program} exited unsuccessfully ({status})")
      }
      BenchError::StartupTimeout { endpoint, waited } => write!(
        f,
        "server did not answer on {endpoint} within {}ms",
        waited.as_millis()
      ),
      BenchError::MalformedOutput { path, reason } => {
        write!(f, "malformed output in {}: {reason}", path.display())
      }
      BenchError::Io { path, source } => write!(f, "{}: {source}", path.display()),
    }
  }
}

impl Error for BenchError {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    match self {
      BenchError::Config { source, .. } => Some(source.as_ref()),
      BenchError::Spawn { source, .. } => Some(source),
      BenchError::Io { source, .. } => Some(source),
      _ => None,
    }
  }
}
