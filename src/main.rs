//! parksim binary: parse flags, init diagnostics, run one simulation.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // clap exits 0 for --help and 2 for unknown flags.
    let cfg = parksim::Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match parksim::sim::run(cfg) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("parksim: {err}");
            ExitCode::FAILURE
        }
    }
}
