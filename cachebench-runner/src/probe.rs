use crate::conf::ProbeConf;
use crate::error::BenchError;
use crate::error::BenchResult;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::UnixStream;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;

/// RESP `PING`.
pub const PING_FRAME: &[u8] = b"*1\r\n$4\r\nPING\r\n";

/// A text-protocol server rejects each of the three RESP lines with `ERROR`, which still proves it's alive.
pub const ACCEPTED_REPLIES: [&[u8]; 2] = [b"+PONG\r\n", b"ERROR\r\nERROR\r\nERROR\r\n"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
  Tcp(SocketAddr),
  Unix(PathBuf),
}

impl Endpoint {
  pub fn local_tcp(port: u16) -> Endpoint {
    Endpoint::Tcp(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
  }
}

impl Display for Endpoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
      Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
    }
  }
}

async fn ping<S: AsyncRead + AsyncWrite + Unpin>(mut stream: S) -> io::Result<Vec<u8>> {
  stream.write_all(PING_FRAME).await?;
  let mut buf = [0u8; 64];
  let n = stream.read(&mut buf).await?;
  Ok(buf[..n].to_vec())
}

async fn exchange(endpoint: &Endpoint) -> io::Result<Vec<u8>> {
  match endpoint {
    Endpoint::Tcp(addr) => ping(TcpStream::connect(addr).await?).await,
    Endpoint::Unix(path) => ping(UnixStream::connect(path).await?).await,
  }
}

/// One liveness attempt over a fresh connection. Never fails; any error means "not ready".
pub async fn probe(endpoint: &Endpoint, attempt_timeout: Duration) -> bool {
  match timeout(attempt_timeout, exchange(endpoint)).await {
    Ok(Ok(reply)) => ACCEPTED_REPLIES.contains(&reply.as_slice()),
    Ok(Err(err)) => {
      debug!(%endpoint, error = %err, "probe failed");
      false
    }
    Err(_) => {
      debug!(%endpoint, "probe timed out");
      false
    }
  }
}

/// Polls `endpoint` until it answers or the deadline passes, then waits the settle delay. `check_alive` is called between attempts so a server that dies during startup fails fast.
pub async fn wait_until_ready<F>(
  endpoint: &Endpoint,
  conf: &ProbeConf,
  mut check_alive: F,
) -> BenchResult<Duration>
where
  F: FnMut() -> BenchResult<()>,
{
  let started = Instant::now();
  loop {
    if probe(endpoint, conf.attempt_timeout()).await {
      break;
    };
    check_alive()?;
    if started.elapsed() > conf.deadline() {
      return Err(BenchError::StartupTimeout {
        endpoint: endpoint.to_string(),
        waited: started.elapsed(),
      });
    };
    sleep(conf.interval()).await;
  }
  let ready_after = started.elapsed();
  info!(%endpoint, ready_ms = ready_after.as_millis() as u64, "server is ready");
  sleep(conf.settle()).await;
  Ok(ready_after)
}
