//! CLI command implementations

use crate::output::{format_elapsed, print_checkpoints};
use crate::progress::SyncProgress;
use crate::{CheckpointAction, ConfigAction, OutputFormat, SyncArgs};
use anyhow::{anyhow, Context, Result};
use console::style;
use dunesync_core::{DuneSync, MemoryStore, SnapshotStore};
use dunesync_types::{Settings, SyncReport};
use std::path::Path;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

// ============================================================================
// Sync
// ============================================================================

pub async fn sync(settings: Settings, args: &SyncArgs, format: OutputFormat) -> Result<()> {
    let (sync, memory) = if args.dry_run {
        let (sync, store) = DuneSync::dry_run(settings, &args.api_key)?;
        (sync, Some(store))
    } else {
        let database_url = args
            .database_url
            .as_deref()
            .ok_or_else(|| anyhow!("--database-url or DATABASE_URL is required unless --dry-run is set"))?;
        let sync = DuneSync::connect(settings, &args.api_key, database_url)
            .await
            .context("Failed to set up sync")?;
        (sync, None)
    };

    // Ctrl-C stops the run after the page in flight
    let token = sync.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping sync");
            token.cancel();
        }
    });

    let show_progress = !args.no_progress && matches!(format, OutputFormat::Human | OutputFormat::Table);
    let progress_task = show_progress.then(|| {
        let progress = SyncProgress::new(sync.settings());
        let mut events = sync.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => progress.handle_event(&event),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        })
    });

    let result = sync.run_sync().await;

    // Closing the event channel ends the progress task
    drop(sync);
    if let Some(task) = progress_task {
        let _ = task.await;
    }

    let report = result.context("Sync failed")?;
    print_report(&report, memory.as_ref(), format)
}

fn print_report(report: &SyncReport, memory: Option<&MemoryStore>, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Human | OutputFormat::Table => {
            println!(
                "{} Synced execution {}",
                style("✓").green().bold(),
                style(report.execution_id).cyan()
            );
            println!("  Run: {}", report.run_id);
            println!(
                "  Offsets: {} .. {} ({} pages)",
                report.first_offset, report.next_offset, report.pages
            );
            println!("  Rows written: {}", report.rows_written);
            if report.rows_skipped > 0 {
                println!("  Rows skipped: {}", style(report.rows_skipped).yellow());
            }
            println!("  Elapsed: {}", format_elapsed(report.elapsed_ms));

            if let Some(store) = memory {
                println!();
                println!(
                    "{} Dry run: {} distinct addresses kept in memory, nothing written",
                    style("·").dim(),
                    style(store.len()).bold()
                );
            }
        }
    }

    Ok(())
}

// ============================================================================
// Checkpoints
// ============================================================================

pub async fn checkpoint_action(
    settings: &Settings,
    database_url: &str,
    action: CheckpointAction,
    format: OutputFormat,
) -> Result<()> {
    let store = DuneSync::connect_store(settings, database_url)
        .await
        .context("Failed to connect to the snapshot database")?;

    match action {
        CheckpointAction::List => {
            let checkpoints = store.list_checkpoints().await?;
            print_checkpoints(&checkpoints, format)?;
        }

        CheckpointAction::Show { execution_id } => match store.load_checkpoint(execution_id).await? {
            Some(checkpoint) => print_checkpoints(std::slice::from_ref(&checkpoint), format)?,
            None => match format {
                OutputFormat::Json => println!("null"),
                _ => println!(
                    "{}",
                    style(format!("No checkpoint for execution {}", execution_id)).dim()
                ),
            },
        },

        CheckpointAction::Reset { execution_id, yes } => {
            let confirmed = yes
                || dialoguer::Confirm::new()
                    .with_prompt(format!(
                        "Reset checkpoint of execution {}? The next sync starts from the configured offset",
                        execution_id
                    ))
                    .default(false)
                    .interact()?;

            if confirmed {
                if store.clear_checkpoint(execution_id).await? {
                    println!("{} Checkpoint reset", style("✓").green().bold());
                } else {
                    println!("{}", style("No checkpoint to reset").dim());
                }
            }
        }
    }

    store.close().await;
    Ok(())
}

// ============================================================================
// Settings
// ============================================================================

pub async fn config_action(
    path: &Path,
    action: Option<ConfigAction>,
    format: OutputFormat,
) -> Result<()> {
    match action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Show => {
            let settings = dunesync_core::load_settings(path).await?;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&settings)?);
                }
                _ => {
                    println!("{}", style("Settings").bold().underlined());
                    println!("  File: {}", path.display());
                    println!("  API base URL: {}", settings.client.api_base_url);
                    println!("  Requests per minute: {}", settings.client.requests_per_minute);
                    println!(
                        "  Timeouts: read {}s, write {}s, request {}s",
                        settings.client.read_timeout_secs,
                        settings.client.write_timeout_secs,
                        settings.client.request_timeout_secs
                    );
                    println!(
                        "  Execution: {}",
                        settings
                            .sync
                            .execution_id
                            .map(|id| id.to_string())
                            .unwrap_or_else(|| "not set".to_string())
                    );
                    println!("  Page size: {}", settings.sync.page_size);
                    println!("  Start offset: {}", settings.sync.start_offset);
                    println!(
                        "  Upper bound: {}",
                        settings
                            .sync
                            .upper_bound
                            .map(|b| b.to_string())
                            .unwrap_or_else(|| "until last page".to_string())
                    );
                    println!("  Resume: {}", settings.sync.resume);
                    println!("  Malformed rows: {:?}", settings.sync.malformed_rows);
                    println!("  Max retries: {}", settings.sync.max_retries);
                    println!("  Table: {}", settings.store.table);
                    println!("  Checkpoint table: {}", settings.store.checkpoint_table);
                }
            }
        }

        ConfigAction::Init { force } => {
            if !force && tokio::fs::try_exists(path).await? {
                return Err(anyhow!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                ));
            }
            dunesync_core::save_settings(path, &Settings::default()).await?;
            println!(
                "{} Wrote default settings to {}",
                style("✓").green().bold(),
                path.display()
            );
        }

        ConfigAction::Path => {
            println!("{}", path.display());
        }
    }

    Ok(())
}
