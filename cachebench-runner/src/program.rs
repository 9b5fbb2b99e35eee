use crate::probe::Endpoint;
use clap::ValueEnum;
use std::cmp::max;
use std::path::Path;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, ValueEnum)]
pub enum Program {
  Redis,
  Valkey,
  Dragonfly,
  Memcache,
  Garnet,
}

impl Program {
  pub fn name(&self) -> &'static str {
    match self {
      Program::Redis => "redis",
      Program::Valkey => "valkey",
      Program::Dragonfly => "dragonfly",
      Program::Memcache => "memcache",
      Program::Garnet => "garnet",
    }
  }

  /// memtier must speak memcache's text protocol regardless of `--proto`.
  pub fn forced_protocol(&self) -> Option<&'static str> {
    match self {
      Program::Memcache => Some("memcache_text"),
      _ => None,
    }
  }

  fn default_flags(&self, threads: usize, is_root: bool) -> Vec<String> {
    let t = threads.to_string();
    let t = t.as_str();
    let flags: Vec<&str> = match self {
      Program::Redis | Program::Valkey => vec![
        "--appendonly",
        "no",
        "--save",
        "",
        "--io-threads",
        t,
        "--maxmemory",
        "32gb",
      ],
      Program::Dragonfly => {
        // 256 MiB per thread, but never below ~32 GiB.
        let maxmemory = format!("{}gb", max(threads * 256, 32384) / 1024);
        return [
          "--dir",
          "",
          "--dbfilename",
          "",
          "--proactor_threads",
          t,
          "--maxmemory",
          maxmemory.as_str(),
        ]
        .map(String::from)
        .to_vec();
      }
      Program::Memcache => {
        let mut flags = vec!["-m", "32768", "-t", t];
        if is_root {
          // memcached refuses to run as root without this.
          flags.extend(["-u", "root"]);
        };
        flags
      }
      Program::Garnet => vec![
        "--no-obj",
        "--aof-null-device",
        "--readcache",
        "false",
        "--index",
        "2g",
        "--memory",
        "32g",
        "--miniothreads",
        t,
        "--maxiothreads",
        t,
        "--minthreads",
        t,
        "--maxthreads",
        t,
      ],
    };
    flags.into_iter().map(String::from).collect()
  }

  fn transport_flags(&self, endpoint: &Endpoint) -> Vec<String> {
    let (socket_flag, port_flag) = match self {
      Program::Memcache => ("-s", "-p"),
      _ => ("--unixsocket", "--port"),
    };
    match endpoint {
      Endpoint::Tcp(addr) => vec![port_flag.to_string(), addr.port().to_string()],
      Endpoint::Unix(path) => vec![
        socket_flag.to_string(),
        path.display().to_string(),
        port_flag.to_string(),
        "0".to_string(),
      ],
    }
  }
}

pub fn running_as_root() -> bool {
  unsafe { libc::geteuid() == 0 }
}

/// Full server command line, optionally pinned with `taskset`, followed by any passthrough flags.
pub fn server_argv(
  program: Program,
  binary: &Path,
  threads: usize,
  endpoint: &Endpoint,
  is_root: bool,
  taskset: Option<&str>,
  extra: &[String],
) -> Vec<String> {
  let mut argv = Vec::new();
  if let Some(cpus) = taskset {
    argv.extend(["taskset".to_string(), "-c".to_string(), cpus.to_string()]);
  };
  argv.push(binary.display().to_string());
  argv.extend(program.default_flags(threads, is_root));
  argv.extend(program.transport_flags(endpoint));
  argv.extend(extra.iter().cloned());
  argv
}
