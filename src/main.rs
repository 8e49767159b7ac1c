//! Task Tree CLI
//!
//! Command line front end for the task tree engine.

use anyhow::Result;
use clap::Parser;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use task_tree::cli::{Cli, execute};
use task_tree::config::Config;
use task_tree::db::Database;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install the global subscriber for the `--log` target.
/// `RUST_LOG` takes precedence over `--verbose` when set.
fn init_logging(target: &str, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match target {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log, cli.verbose)?;

    let mut config = Config::load_or_default(cli.config.as_deref().map(Path::new))?;
    if let Some(ref database) = cli.database {
        config.server.db_path = PathBuf::from(database);
    }
    debug!(db = %config.server.db_path.display(), "opening database");

    let db = Database::open_from_config(&config)?;
    let out = execute(&db, &cli)?;
    if !out.is_empty() {
        println!("{}", out.trim_end());
    }
    Ok(())
}
