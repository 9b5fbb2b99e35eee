use cachebench_reducer::combine::write_combined;
use clap::Parser;
use std::path::PathBuf;
use tracing::error;
use tracing::info;

/// Collects every reduced record under `<path>/runs` into `<path>/output.json`.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
  #[arg(long)]
  path: PathBuf,
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

  match write_combined(&cli.path) {
    Ok((path, entries)) => info!(
      path = %path.display(),
      entries = entries.len(),
      "combined output written"
    ),
    Err(err) => {
      error!(error = %err, "combine failed");
      std::process::exit(1);
    }
  };
}
