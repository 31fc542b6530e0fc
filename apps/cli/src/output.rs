//! Output formatting utilities

use crate::OutputFormat;
use console::style;
use dunesync_types::Checkpoint;
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct CheckpointRow {
    execution: u64,
    last_offset: u64,
    next_offset: u64,
    updated: String,
}

/// Print checkpoints in the specified format
pub fn print_checkpoints(checkpoints: &[Checkpoint], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(checkpoints)?);
        }
        OutputFormat::Table => {
            let rows: Vec<CheckpointRow> = checkpoints
                .iter()
                .map(|c| CheckpointRow {
                    execution: c.execution_id,
                    last_offset: c.last_offset,
                    next_offset: c.next_offset,
                    updated: c.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                })
                .collect();
            println!("{}", Table::new(rows));
        }
        OutputFormat::Human => {
            if checkpoints.is_empty() {
                println!("{}", style("No checkpoints stored").dim());
                return Ok(());
            }

            for checkpoint in checkpoints {
                println!(
                    "{} execution {} resumes at offset {}",
                    style("·").cyan(),
                    style(checkpoint.execution_id).bold(),
                    style(checkpoint.next_offset).cyan()
                );
                println!("    Last committed offset: {}", checkpoint.last_offset);
                println!("    Updated: {}", checkpoint.updated_at.to_rfc3339());
            }
        }
    }
    Ok(())
}

/// Format a duration in milliseconds as human-readable
pub fn format_elapsed(ms: u64) -> String {
    let seconds = ms / 1000;
    if seconds == 0 {
        return format!("{}ms", ms);
    }

    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
