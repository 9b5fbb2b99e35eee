use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::path::PathBuf;

pub type ReduceResult<T> = Result<T, ReduceError>;

#[derive(Debug)]
pub enum ReduceError {
  NoData,
  /// `input` names the offending record, usually its file.
  MalformedInput {
    input: String,
    reason: String,
  },
  MismatchedParameters {
    input: String,
  },
  Io {
    path: PathBuf,
    source: io::Error,
  },
}

impl ReduceError {
  pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> ReduceError {
    let path = path.into();
    move |source| ReduceError::Io { path, source }
  }
}

impl Display for ReduceError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ReduceError::NoData => write!(f, "no runs to reduce"),
      ReduceError::MalformedInput { input, reason } => {
        write!(f, "malformed input {input}: {reason}")
      }
      ReduceError::MismatchedParameters { input } => write!(
        f,
        "{input} was run with different parameters from the rest of the ensemble"
      ),
      ReduceError::Io { path, source } => write!(f, "{}: {source}", path.display()),
    }
  }
}

impl Error for ReduceError {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    match self {
      ReduceError::Io { source, .. } => Some(source),
      _ => None,
    }
  }
}
