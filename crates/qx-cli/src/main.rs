//! `qx` — deterministic algorithmic-trading runtime CLI.
//!
//! Exit codes: `0` success, `2` invalid input, `3` strategy load
//! failure, `4` safety-gate failure, `5` runtime error.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use qx_engine::RunMode;

mod commands;
mod strategies;

use commands::run::{execute, RunArgs};

#[derive(Parser)]
#[command(name = "qx")]
#[command(about = "Deterministic algorithmic-trading runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay historical bars against a strategy, deterministically.
    Backtest(RunOpts),
    /// Trade the simulated venue with live pacing.
    Paper(RunOpts),
    /// Live execution.  Requires LIVE_API=1 and CONFIRM_LIVE=YES.
    Live(RunOpts),
}

#[derive(Args)]
struct RunOpts {
    /// Registered strategy name (e.g. ma_crossover).
    #[arg(long)]
    strategy: String,

    /// Comma-separated symbols (e.g. BTC-USD,ETH-USD).
    #[arg(long)]
    symbols: String,

    /// Window start (RFC-3339 or YYYY-MM-DD, UTC).
    #[arg(long)]
    start: String,

    /// Window end (RFC-3339 or YYYY-MM-DD, UTC).
    #[arg(long)]
    end: String,

    /// CSV bar file (timestamp,symbol,open,high,low,close,volume,...).
    #[arg(long)]
    data: PathBuf,

    /// Output directory; the run writes into <out>/<run_id>/.
    #[arg(long)]
    out: PathBuf,

    /// Directory holding the plugin source files for the sandbox scan.
    #[arg(long, default_value = "crates/qx-cli/src/strategies")]
    strategies: PathBuf,

    /// Optional state directory for restart safety (paper/live).
    #[arg(long)]
    state: Option<PathBuf>,

    /// Seed for retry jitter.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Starting cash in whole currency units.
    #[arg(long, default_value_t = 100_000)]
    initial_cash: i64,

    /// Flatten positions (not just cancel orders) on a kill-switch trip.
    #[arg(long)]
    flatten_on_trip: bool,

    /// Downgrade a refused live request to paper instead of failing.
    #[arg(long)]
    downgrade_to_paper: bool,
}

fn to_run_args(mode: RunMode, opts: RunOpts) -> RunArgs {
    let symbols = opts
        .symbols
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    RunArgs {
        mode,
        strategy: opts.strategy,
        symbols,
        start: opts.start,
        end: opts.end,
        data: opts.data,
        out: opts.out,
        strategies_dir: opts.strategies,
        state_dir: opts.state,
        seed: opts.seed,
        initial_cash_units: opts.initial_cash,
        flatten_on_trip: opts.flatten_on_trip,
        downgrade_to_paper: opts.downgrade_to_paper,
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let args = match cli.cmd {
        Commands::Backtest(opts) => to_run_args(RunMode::Backtest, opts),
        Commands::Paper(opts) => to_run_args(RunMode::Paper, opts),
        Commands::Live(opts) => to_run_args(RunMode::Live, opts),
    };

    if let Err(failure) = execute(args) {
        eprintln!("error: {}", failure.message);
        std::process::exit(failure.code);
    }
}
