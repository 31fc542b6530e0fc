//! dunesync CLI - sync Dune query results into Postgres
//!
//! Pages through one query execution's results at the API's rate limit and
//! upserts every row into a snapshot table.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use dunesync_types::{MalformedRowPolicy, Settings};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// dunesync - Dune results to Postgres snapshot sync
#[derive(Parser)]
#[command(name = "dunesync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file
    #[arg(long, env = "DUNESYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync an execution's results into the snapshot table
    Sync(SyncArgs),

    /// Inspect or reset resume checkpoints
    Checkpoint {
        /// Postgres connection string
        #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
        database_url: String,

        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Show or create the settings file
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Args)]
struct SyncArgs {
    /// Query execution to sync
    #[arg(short, long)]
    execution_id: Option<u64>,

    /// Rows per page
    #[arg(long)]
    page_size: Option<u64>,

    /// First offset to fetch
    #[arg(long)]
    start_offset: Option<u64>,

    /// Highest offset to fetch
    #[arg(long)]
    upper_bound: Option<u64>,

    /// Requests per minute
    #[arg(long)]
    rpm: Option<u32>,

    /// Ignore any stored checkpoint
    #[arg(long)]
    no_resume: bool,

    /// Skip rows that fail validation instead of aborting
    #[arg(long)]
    skip_malformed: bool,

    /// Fetch pages but keep the snapshot in memory
    #[arg(long)]
    dry_run: bool,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,

    /// Dune API key
    #[arg(long, env = "DUNE_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,
}

impl SyncArgs {
    /// Apply command-line overrides on top of file settings
    fn apply(&self, settings: &mut Settings) {
        if let Some(id) = self.execution_id {
            settings.sync.execution_id = Some(id);
        }
        if let Some(page_size) = self.page_size {
            settings.sync.page_size = page_size;
        }
        if let Some(offset) = self.start_offset {
            settings.sync.start_offset = offset;
        }
        if let Some(bound) = self.upper_bound {
            settings.sync.upper_bound = Some(bound);
        }
        if let Some(rpm) = self.rpm {
            settings.client.requests_per_minute = rpm;
        }
        if self.no_resume {
            settings.sync.resume = false;
        }
        if self.skip_malformed {
            settings.sync.malformed_rows = MalformedRowPolicy::Skip;
        }
    }
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// List all stored checkpoints
    List,

    /// Show the checkpoint of one execution
    Show {
        /// Execution ID
        execution_id: u64,
    },

    /// Delete the checkpoint of one execution
    Reset {
        /// Execution ID
        execution_id: u64,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show effective settings
    Show,

    /// Write a settings file with defaults
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the settings file location
    Path,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "dunesync_core=debug,dunesync_cli=debug"
    } else {
        "dunesync_core=info,dunesync_cli=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Determine settings file
    let config_path = cli.config.unwrap_or_else(|| {
        dirs::config_dir()
            .map(|d| d.join("dunesync").join("settings.json"))
            .unwrap_or_else(|| PathBuf::from(".dunesync").join("settings.json"))
    });

    // Execute command
    match cli.command {
        Commands::Sync(args) => {
            let mut settings = dunesync_core::load_settings(&config_path).await?;
            args.apply(&mut settings);
            commands::sync(settings, &args, cli.output).await?
        }

        Commands::Checkpoint {
            database_url,
            action,
        } => {
            let settings = dunesync_core::load_settings(&config_path).await?;
            commands::checkpoint_action(&settings, &database_url, action, cli.output).await?
        }

        Commands::Config { action } => {
            commands::config_action(&config_path, action, cli.output).await?
        }

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "dunesync", &mut std::io::stdout());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sync_args_override_settings() {
        let cli = Cli::try_parse_from([
            "dunesync",
            "sync",
            "--execution-id",
            "3600529",
            "--upper-bound",
            "8000",
            "--rpm",
            "30",
            "--no-resume",
            "--skip-malformed",
            "--api-key",
            "secret",
        ])
        .unwrap();

        let Commands::Sync(args) = cli.command else {
            panic!("expected sync command");
        };

        let mut settings = Settings::default();
        args.apply(&mut settings);

        assert_eq!(settings.sync.execution_id, Some(3600529));
        assert_eq!(settings.sync.upper_bound, Some(8000));
        assert_eq!(settings.sync.page_size, 2000);
        assert_eq!(settings.client.requests_per_minute, 30);
        assert!(!settings.sync.resume);
        assert_eq!(settings.sync.malformed_rows, MalformedRowPolicy::Skip);
    }
}
