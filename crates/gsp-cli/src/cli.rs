//! CLI argument parsing.

use camino::Utf8PathBuf;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};

/// Checks, compiles and renders GSP templates.
#[derive(Debug, Parser)]
#[command(name = "gsp")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Project root holding `gsp.json`
    #[arg(long, global = true, default_value = ".")]
    pub workspace: Utf8PathBuf,

    /// Codec for `${...}` expressions, overriding the configuration
    #[arg(long = "default-codec", global = true)]
    pub default_codec: Option<String>,

    /// Template file encoding, overriding the configuration
    #[arg(long, global = true)]
    pub encoding: Option<String>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Compile every template and report errors
    Check(CheckArgs),
    /// Print the compiled operations of a template
    Compile(CompileArgs),
    /// Render a template with a JSON model
    Render(RenderArgs),
}

/// Arguments of `gsp check`.
#[derive(Debug, ClapArgs)]
pub struct CheckArgs {
    /// Files or directories to check (defaults to the workspace)
    pub paths: Vec<Utf8PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "human")]
    pub output: OutputFormat,
}

/// Arguments of `gsp compile`.
#[derive(Debug, ClapArgs)]
pub struct CompileArgs {
    /// Template to compile
    pub file: Utf8PathBuf,

    /// Print the operations as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments of `gsp render`.
#[derive(Debug, ClapArgs)]
pub struct RenderArgs {
    /// Template to render
    pub file: Utf8PathBuf,

    /// JSON object whose entries become page variables
    #[arg(long)]
    pub model: Option<Utf8PathBuf>,

    /// Write the output to a file instead of stdout
    #[arg(short, long)]
    pub out: Option<Utf8PathBuf>,
}

/// Output format options.
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    #[default]
    Human,
    /// Human-readable with source snippets
    HumanVerbose,
    /// JSON output
    Json,
    /// Machine-readable (one line per diagnostic)
    Machine,
}
