use crate::conf::ProfilerConf;
use crate::error::BenchError;
use crate::error::BenchResult;
use cachebench_types::PerfStats;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::fs;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::ChildStderr;
use tokio::process::ChildStdout;
use tokio::process::Command;
use tokio::spawn;
use tokio::sync::mpsc::unbounded_channel;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Appended after the report header so the end of the printed table is unambiguous in the saved report.
pub const REPORT_SENTINEL: &str = "]]]]";

/// Discards profiler output until the report header, then keeps everything.
pub struct ReportCollector {
  marker: String,
  capturing: bool,
  buf: String,
}

impl ReportCollector {
  pub fn new(marker: impl Into<String>) -> Self {
    Self {
      marker: marker.into(),
      capturing: false,
      buf: String::new(),
    }
  }

  pub fn push(&mut self, line: &str) {
    if !self.capturing {
      if !line.contains(&self.marker) {
        return;
      };
      self.capturing = true;
      self.buf.push_str(line);
      self.buf.push('\n');
      self.buf.push_str(REPORT_SENTINEL);
      return;
    };
    self.buf.push('\n');
    self.buf.push_str(line);
  }

  /// None if the header was never seen.
  pub fn finish(self) -> Option<String> {
    self.capturing.then_some(self.buf)
  }
}

/// Trimmed text between the start of the line and the first occurrence of `key`.
fn find_key<'a>(report: &'a str, key: &str) -> Option<&'a str> {
  let end = report.find(key)?;
  let start = report[..end].rfind('\n').map(|i| i + 1).unwrap_or(0);
  Some(report[start..end].trim())
}

/// Trimmed text between the last `#` before `key` and `key`.
fn find_desc<'a>(report: &'a str, key: &str) -> Option<&'a str> {
  let end = report.find(key)?;
  let start = report[..end].rfind('#')? + 1;
  Some(report[start..end].trim())
}

fn number(raw: &str) -> Option<f64> {
  raw.replace(',', "").parse::<f64>().ok().filter(|v| v.is_finite())
}

fn count(raw: &str) -> Option<u64> {
  let raw = raw.replace(',', "");
  raw
    .parse::<u64>()
    .ok()
    .or_else(|| number(&raw).filter(|v| *v >= 0.0).map(|v| v.round() as u64))
}

pub fn parse_report(report: &str) -> PerfStats {
  let count_of = |key| find_key(report, key).and_then(count);
  let secs_of = |key| find_key(report, key).and_then(number);
  PerfStats {
    cpu_utilized: find_desc(report, "CPUs utilized").and_then(number),
    cycles: count_of("cycles"),
    secsuser: secs_of("seconds user"),
    secssys: secs_of("seconds sys"),
    instructions: count_of("instructions"),
    branches: count_of("branches"),
    branch_misses: count_of("branch-misses"),
    page_faults: count_of("page-faults"),
  }
}

/// Forwards raw lines from one profiler stream. Output is not guaranteed to be UTF-8.
async fn forward_lines<R: AsyncRead + Unpin>(
  stream: R,
  tx: UnboundedSender<Vec<u8>>,
) -> io::Result<()> {
  let mut reader = BufReader::new(stream);
  loop {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line).await? == 0 {
      return Ok(());
    };
    if tx.send(line).is_err() {
      return Ok(());
    };
  }
}

/// Mirrors both profiler streams to our stderr until they close, then persists any captured report.
async fn consume(
  stdout: ChildStdout,
  stderr: ChildStderr,
  mut collector: ReportCollector,
  report_path: PathBuf,
) -> io::Result<Option<PathBuf>> {
  let (tx, mut rx) = unbounded_channel();
  let readers = [
    spawn(forward_lines(stdout, tx.clone())),
    spawn(forward_lines(stderr, tx)),
  ];
  let mut mirror = tokio::io::stderr();
  while let Some(mut line) = rx.recv().await {
    if !line.ends_with(b"\n") {
      line.push(b'\n');
    };
    // Losing our own stderr must not lose the report.
    if let Err(err) = mirror.write_all(&line).await {
      debug!(error = %err, "failed to mirror profiler output");
    };
    let text = String::from_utf8_lossy(&line);
    collector.push(text.trim_end_matches(['\n', '\r']));
  }
  for reader in readers {
    match reader.await {
      Ok(Ok(())) => {}
      Ok(Err(err)) => warn!(error = %err, "failed to read profiler output"),
      Err(err) => warn!(error = %err, "profiler output reader failed"),
    };
  }
  match collector.finish() {
    Some(report) => {
      fs::write(&report_path, report).await?;
      Ok(Some(report_path))
    }
    None => Ok(None),
  }
}

/// A running profiler attached to a server process.
pub struct ProfileCapture {
  child: Child,
  interrupt_argv: Vec<String>,
  consumer: JoinHandle<io::Result<Option<PathBuf>>>,
  out: PathBuf,
}

impl ProfileCapture {
  pub fn start(conf: &ProfilerConf, target_pid: u32, out: PathBuf) -> BenchResult<Self> {
    let argv = conf.attach_argv(target_pid);
    let (program, args) = argv
      .split_first()
      .ok_or_else(|| BenchError::Usage("empty profiler command".to_string()))?;
    info!(program = %program, target_pid, "attaching profiler");
    let mut child = Command::new(program)
      .args(args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()
      .map_err(|source| BenchError::Spawn {
        program: program.clone(),
        source,
      })?;
    let interrupt_argv = conf.interrupt_argv(child.id().unwrap_or_default());

    // Both pipes are present as they were requested above.
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
      return Err(BenchError::Usage("profiler output not captured".to_string()));
    };
    let consumer = spawn(consume(
      stdout,
      stderr,
      ReportCollector::new(conf.marker.clone()),
      out.clone(),
    ));

    Ok(Self {
      child,
      interrupt_argv,
      consumer,
      out,
    })
  }

  /// Interrupts the profiler and waits for its report to be persisted. Returns the report's path, or None if the profiler never printed one.
  pub async fn stop(mut self) -> BenchResult<Option<PathBuf>> {
    if let Some((program, args)) = self.interrupt_argv.split_first() {
      let res = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .status()
        .await;
      if let Err(err) = res {
        warn!(error = %err, "failed to interrupt profiler");
      };
    };
    let report = self
      .consumer
      .await
      .map_err(|err| BenchError::Io {
        path: self.out.clone(),
        source: io::Error::new(io::ErrorKind::Other, err),
      })?
      .map_err(BenchError::io(&self.out))?;
    let status = self
      .child
      .wait()
      .await
      .map_err(BenchError::io(&self.out))?;
    // Being interrupted is how the profiler is expected to end.
    if !status.success() && status.signal() != Some(libc::SIGINT) {
      return Err(BenchError::SubprocessFailed {
        program: "profiler".to_string(),
        status,
      });
    };
    match &report {
      Some(path) => info!(path = %path.display(), "profiler report saved"),
      None => warn!("profiler printed no report"),
    };
    debug!(%status, "profiler exited");
    Ok(report)
  }
}
