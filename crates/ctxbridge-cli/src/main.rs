//! `ctxbridge`: run scripts through the context bridge from the command line.
#![cfg_attr(
    test,
    allow(
        dead_code,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        clippy::print_stdout,
        clippy::print_stderr,
        reason = "Allow for tests"
    )
)]

use anyhow::Result;
use clap::Parser as _;
use std::io;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _};

use ctxbridge::Bridge;

mod cli;
mod config;
mod runner;

use cli::Cli;
use config::Config;
use runner::{Runner, collect_inputs};

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_logging(&config);

    let inputs = collect_inputs(&cli.eval, &cli.files)?;
    tracing::debug!(inputs = inputs.len(), isolated = cli.isolated, "starting");

    let bridge = Bridge::with_config(config.engine);
    let mut runner = Runner::new(bridge, cli.isolated, cli.quiet, io::stdout(), io::stderr());
    let failures = runner.run_all(&inputs)?;

    if failures == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::debug!(failures, "inputs failed");
        Ok(ExitCode::FAILURE)
    }
}

/// `RUST_LOG` wins over the configured filter; output goes to stderr so
/// script results stay clean on stdout.
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}
