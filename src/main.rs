// datafiles command line.
// Loads, refreshes, inspects, and clears the configured datasets.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use datafiles::app::App;
use datafiles::config::Config;
use datafiles::logging::init_logging;
use datafiles::{LoadOutcome, Result};

#[derive(Debug, Parser)]
#[command(name = "datafiles", version, about = "Fetch and cache remote reference datasets")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, env = "DATAFILES_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load every configured dataset, fetching missing or stale ones
    LoadAll,
    /// Load one dataset
    Load { key: String },
    /// Fetch one dataset regardless of its age
    Refresh { key: String },
    /// Show dataset status
    Status { key: Option<String> },
    /// Delete the stored copy of a dataset
    Clear { key: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns false when any dataset failed to load.
async fn run(cli: Cli) -> Result<bool> {
    let config = Config::load(cli.config.as_deref())?;
    let app = App::from_config(&config)?;

    let ok = match cli.command {
        Command::LoadAll => {
            let outcomes = app.load_all().await;
            for (key, outcome) in &outcomes {
                println!("{:<20} {:?}", key, outcome);
            }
            outcomes.iter().all(|(_, outcome)| !outcome.is_failed())
        }
        Command::Load { key } => report(&key, app.load(&key).await?),
        Command::Refresh { key } => report(&key, app.refresh(&key).await?),
        Command::Status { key } => {
            for line in app.status_lines(key.as_deref())? {
                println!("{}", line);
            }
            true
        }
        Command::Clear { key } => {
            app.clear(&key)?;
            true
        }
    };
    Ok(ok)
}

fn report(key: &str, outcome: LoadOutcome) -> bool {
    println!("{:<20} {:?}", key, outcome);
    !outcome.is_failed()
}
