use cachebench_runner::conf::Conf;
use cachebench_runner::error::BenchError;
use cachebench_runner::error::BenchResult;
use cachebench_runner::executor::write_record;
use cachebench_runner::executor::RunExecutor;
use cachebench_runner::executor::RunOptions;
use cachebench_runner::program::running_as_root;
use cachebench_runner::program::Program;
use cachebench_runner::supervisor::Supervisor;
use cachebench_types::RunParameters;
use clap::Parser;
use clap::ValueEnum;
use std::fs;
use std::path::PathBuf;
use tracing::error;
use tracing::info;

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
enum YesNo {
  Yes,
  No,
}

/// Benchmarks one cache server with memtier and writes the result record to `bench.json`.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
  program: Program,

  #[arg(long, default_value = "cfg.yaml")]
  config: PathBuf,

  /// Server threads; 0 means one per CPU.
  #[arg(long, default_value_t = 0)]
  threads: usize,

  /// CPU list to pin the server to.
  #[arg(long)]
  taskset: Option<String>,

  /// Attach a profiler to the server during the measured phases.
  #[arg(long, value_enum, default_value_t = YesNo::No)]
  perf: YesNo,

  /// Connect over TCP instead of a Unix socket.
  #[arg(long)]
  tcp: bool,

  /// CPU list to pin memtier to.
  #[arg(long)]
  btaskset: Option<String>,

  /// memtier threads; 0 means one per CPU.
  #[arg(long, default_value_t = 0)]
  bthreads: usize,

  /// Connections per memtier thread.
  #[arg(long, default_value_t = 1)]
  conns: usize,

  /// Operations per connection.
  #[arg(long, default_value_t = 100_000)]
  ops: usize,

  #[arg(long, default_value = "1-1024")]
  sizerange: String,

  #[arg(long, default_value_t = 1)]
  pipeline: usize,

  /// memtier protocol. Ignored for memcache, which always uses memcache_text.
  #[arg(long)]
  proto: Option<String>,

  #[arg(long)]
  nowarmup: bool,

  /// Also archive the record under `<results-dir>/runs/`, named for this run number.
  #[arg(long, requires = "run")]
  results_dir: Option<PathBuf>,

  #[arg(long, requires = "results_dir")]
  run: Option<usize>,

  /// Extra flags passed to the server, after `--`.
  #[arg(last = true)]
  server_flags: Vec<String>,
}

fn or_cpus(n: usize) -> usize {
  if n == 0 {
    num_cpus::get()
  } else {
    n
  }
}

async fn run(cli: Cli) -> BenchResult<()> {
  let conf = Conf::load(&cli.config)?;
  let protocol = cli
    .program
    .forced_protocol()
    .map(String::from)
    .or(cli.proto.filter(|p| !p.is_empty()));
  let params = RunParameters {
    program: cli.program.name().to_string(),
    threads: or_cpus(cli.threads),
    bench_threads: or_cpus(cli.bthreads),
    conns: cli.conns,
    ops: cli.ops,
    pipeline: cli.pipeline,
    size_range: cli.sizerange,
    protocol,
    profile: cli.perf == YesNo::Yes,
  };
  info!(params = ?params, "starting run");

  let supervisor = Supervisor::from_conf(&conf);
  supervisor.spawn_signal_listener()?;
  let _guard = supervisor.guard();
  let mut executor = RunExecutor::new(
    &conf,
    RunOptions {
      program: cli.program,
      params: params.clone(),
      tcp: cli.tcp,
      taskset: cli.taskset,
      btaskset: cli.btaskset,
      warmup: !cli.nowarmup,
      server_flags: cli.server_flags,
      is_root: running_as_root(),
    },
    supervisor.clone(),
  );
  let record = executor.run().await?;
  let json = serde_json::to_string_pretty(&record)
    .map_err(|e| BenchError::Usage(format!("failed to serialize record: {e}")))?;
  println!("{json}");

  if let (Some(dir), Some(run)) = (cli.results_dir, cli.run) {
    let runs = dir.join("runs");
    fs::create_dir_all(&runs).map_err(BenchError::io(&runs))?;
    write_record(&runs.join(params.run_file_name(run)), &record)?;
  };
  Ok(())
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt::init();

  let cli = match Cli::try_parse() {
    Ok(cli) => cli,
    Err(err) if err.use_stderr() => {
      let _ = err.print();
      std::process::exit(1);
    }
    Err(err) => err.exit(),
  };

  if let Err(err) = run(cli).await {
    error!(error = %err, "benchmark failed");
    std::process::exit(1);
  };
}
