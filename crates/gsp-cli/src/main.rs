//! gsp: checks, compiles and renders GSP templates.

mod cli;
mod config;
mod orchestrator;
mod output;

use clap::Parser;
use cli::Args;
use miette::Result;

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let summary = orchestrator::run(&args)?;
    log::debug!(
        "processed {} templates, {} failed",
        summary.file_count,
        summary.error_count
    );
    if summary.error_count > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Logs to stderr, filtered by `RUST_LOG`. `--verbose` raises the level to
/// debug.
fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.format_timestamp(None).init();
}
