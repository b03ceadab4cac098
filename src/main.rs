mod script;

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use inkboard_session::{Session, SessionConfig};
use tracing_subscriber::EnvFilter;

use script::Script;

/// Replay scripted edits against a versioned scene and print the result
#[derive(Parser, Debug)]
#[command(name = "inkboard")]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON script of steps to replay
    #[arg(value_name = "SCRIPT")]
    script: PathBuf,

    /// Session config file (defaults to $XDG_CONFIG_HOME/inkboard/session.json)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the maximum number of undo entries
    #[arg(long, value_name = "N")]
    history_depth: Option<usize>,

    /// Include soft-deleted elements in the output
    #[arg(long)]
    include_deleted: bool,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    // stdout carries the report, so logs go to stderr
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("inkboard=debug")
        } else {
            EnvFilter::new("inkboard=info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from(path),
        None => SessionConfig::load(),
    }
    .context("Failed to load session config")?;
    if let Some(depth) = args.history_depth {
        config.history_depth = depth;
    }
    tracing::debug!(?config, "session config");

    let script = Script::load(&args.script)?;
    let mut session = Session::new(config);
    let report = script::run(&script, &mut session, args.include_deleted)?;

    let output = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{output}").context("Failed to write report")?;
    Ok(())
}
