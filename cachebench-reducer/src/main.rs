use cachebench_reducer::ensemble::reduce_all;
use cachebench_reducer::reduce::MedianRule;
use cachebench_types::EnsembleKey;
use clap::Parser;
use std::path::PathBuf;
use tracing::error;
use tracing::info;

/// Reduces runs 1..=N of one benchmark configuration to median, best, worst and average records.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
  /// Results directory; runs are read from and reductions written to its `runs/` subdirectory.
  #[arg(long)]
  path: PathBuf,

  #[arg(long)]
  prog: String,

  #[arg(long)]
  threads: usize,

  #[arg(long)]
  pipeline: usize,

  #[arg(long, value_parser = ["yes", "no"])]
  perf: String,

  /// Number of runs in the ensemble.
  #[arg(long)]
  runs: usize,

  #[arg(long, value_enum, default_value_t = MedianRule::Legacy)]
  median_rule: MedianRule,
}

fn main() {
  tracing_subscriber::fmt::init();

  let cli = match Cli::try_parse() {
    Ok(cli) => cli,
    Err(err) if err.use_stderr() => {
      let _ = err.print();
      std::process::exit(1);
    }
    Err(err) => err.exit(),
  };

  let key = EnsembleKey {
    program: cli.prog,
    threads: cli.threads,
    pipeline: cli.pipeline,
    profile: cli.perf == "yes",
  };
  let runs_dir = cli.path.join("runs");
  match reduce_all(&runs_dir, &key, cli.runs, cli.median_rule) {
    Ok(written) => info!(files = written.len(), runs = cli.runs, "reduction complete"),
    Err(err) => {
      error!(error = %err, "reduction failed");
      std::process::exit(1);
    }
  };
}
