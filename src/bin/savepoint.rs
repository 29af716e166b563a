//! # savepoint - stash-like snapshots of uncommitted work
//!
//! Command-line front end for the savepoint library.
//!
//! ## Usage
//! ```bash
//! # Capture the current uncommitted changes
//! savepoint create -n "before refactor" -d "rename pass"
//!
//! # List savepoints, newest first
//! savepoint list
//!
//! # Inspect one savepoint, or print one captured file
//! savepoint show 0a1b
//! savepoint show 0a1b --file src/lib.rs
//!
//! # Put the captured files back
//! savepoint restore 0a1b --progress
//!
//! # Machine-readable output
//! savepoint --json list
//! ```
//!
//! Ids may be abbreviated to any unique prefix. The working tree defaults to
//! `$MCP_SAVEPOINTS_ROOT` or the current directory; the store defaults to
//! `$MCP_SAVEPOINTS_STORAGE` or `<root>/.mcp-savepoints`.

use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use savepoint::utils::format_bytes;
use savepoint::{
    ErrorReport, OperationStatus, ProgressInfo, Result, Savepoint, SavepointConfig,
    SavepointError, SavepointManager, STORAGE_ENV_VAR,
};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Named, restorable savepoints of uncommitted working-tree changes
#[derive(Parser)]
#[command(name = "savepoint")]
#[command(version)]
#[command(about = "Capture and restore uncommitted working-tree changes")]
#[command(long_about = None)]
struct Cli {
    /// Working-tree root (defaults to $MCP_SAVEPOINTS_ROOT or the current directory)
    #[arg(short, long, global = true)]
    path: Option<PathBuf>,

    /// Storage directory (defaults to <root>/.mcp-savepoints)
    #[arg(short, long, global = true)]
    storage: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture the current changes as a new savepoint
    #[command(alias = "save")]
    Create {
        /// Savepoint name
        #[arg(short, long)]
        name: String,

        /// Longer description
        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// List savepoints, newest first
    #[command(alias = "ls")]
    List {
        /// Limit results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show one savepoint
    Show {
        /// Savepoint id or unique prefix
        id: String,

        /// Print the captured content of this file instead
        #[arg(short, long)]
        file: Option<String>,
    },

    /// Restore a savepoint into the working tree
    #[command(alias = "rs")]
    Restore {
        /// Savepoint id or unique prefix
        id: String,

        /// Show progress
        #[arg(long)]
        progress: bool,
    },

    /// Delete a savepoint
    #[command(alias = "rm")]
    Delete {
        /// Savepoint id or unique prefix
        id: String,
    },

    /// Check a savepoint's stored content against its metadata
    Verify {
        /// Savepoint id or unique prefix
        id: String,
    },
}

fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so --json output stays parseable.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if std::env::var("NO_COLOR").is_ok() || cli.json {
        colored::control::set_override(false);
    }

    let json = cli.json;
    if let Err(e) = run(cli) {
        if json {
            print_json(&ErrorReport::from(&e));
        } else {
            eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        }
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    let config = build_config(cli.path, cli.storage)?;
    let manager = SavepointManager::open(config)?;
    let json = cli.json;

    match cli.command {
        Commands::Create { name, description } => cmd_create(&manager, &name, &description, json),
        Commands::List { limit } => cmd_list(&manager, limit, json),
        Commands::Show { id, file } => cmd_show(&manager, &id, file.as_deref(), json),
        Commands::Restore { id, progress } => cmd_restore(&manager, &id, progress, json),
        Commands::Delete { id } => cmd_delete(&manager, &id, json),
        Commands::Verify { id } => cmd_verify(&manager, &id, json),
    }
}

/// Environment first, then flags
fn build_config(path: Option<PathBuf>, storage: Option<PathBuf>) -> Result<SavepointConfig> {
    let mut config = SavepointConfig::from_env()?;
    if let Some(path) = path {
        let storage_from_env = std::env::var_os(STORAGE_ENV_VAR).filter(|s| !s.is_empty());
        config = SavepointConfig::new(path);
        if let Some(storage) = storage_from_env {
            config = config.with_storage_path(storage);
        }
    }
    if let Some(storage) = storage {
        config = config.with_storage_path(storage);
    }
    Ok(config)
}

fn cmd_create(manager: &SavepointManager, name: &str, description: &str, json: bool) -> Result<()> {
    let start = Instant::now();
    let savepoint = manager.create_savepoint(name, description)?;

    if json {
        print_json(&savepoint);
        return Ok(());
    }

    println!(
        "{} Created savepoint {}",
        "✓".green().bold(),
        savepoint.id.yellow().bold()
    );
    println!("  Name: {}", savepoint.name.cyan());
    if !savepoint.description.is_empty() {
        println!("  Description: {}", savepoint.description.cyan());
    }
    println!("  Files: {}", savepoint.file_count().to_string().cyan());
    println!("  Size: {}", format_bytes(savepoint.size).cyan());
    println!("  Time: {}", format_duration(start.elapsed()).to_string().cyan());
    Ok(())
}

fn cmd_list(manager: &SavepointManager, limit: Option<usize>, json: bool) -> Result<()> {
    let savepoints = manager.list_savepoints()?;
    let display_count = limit.unwrap_or(savepoints.len()).min(savepoints.len());

    if json {
        print_json(&savepoints[..display_count]);
        return Ok(());
    }

    if savepoints.is_empty() {
        println!("{}", "No savepoints found.".yellow());
        return Ok(());
    }

    println!("{}", "Savepoints:".blue().bold());
    println!();
    for savepoint in savepoints.iter().take(display_count) {
        print!("  {} ", savepoint.id.yellow().bold());
        print!("{} ", age(savepoint).dimmed());
        print!("{}", savepoint.name.cyan());
        println!(
            " {}",
            format!("({} files, {})", savepoint.file_count(), format_bytes(savepoint.size)).dimmed()
        );
    }

    if display_count < savepoints.len() {
        println!(
            "\n{}",
            format!("Showing {} of {} savepoints", display_count, savepoints.len()).dimmed()
        );
    }
    Ok(())
}

fn cmd_show(manager: &SavepointManager, id: &str, file: Option<&str>, json: bool) -> Result<()> {
    let id = manager.resolve_id(id)?;

    if let Some(path) = file {
        let entry = manager.read_savepoint_file(&id, path)?;
        std::io::stdout().write_all(&entry.bytes)?;
        return Ok(());
    }

    let savepoint = manager.get_savepoint(&id)?;
    if json {
        print_json(&savepoint);
        return Ok(());
    }

    println!("{} {}", "Savepoint".blue().bold(), savepoint.id.yellow().bold());
    println!("  Name: {}", savepoint.name.cyan());
    if !savepoint.description.is_empty() {
        println!("  Description: {}", savepoint.description);
    }
    println!(
        "  Created: {} ({})",
        savepoint.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        age(&savepoint)
    );
    println!("  Size: {}", format_bytes(savepoint.size));
    println!();

    for record in manager.savepoint_files(&id)? {
        let status = match record.status {
            savepoint::FileStatus::New => "new".green(),
            savepoint::FileStatus::Modified => "modified".yellow(),
            savepoint::FileStatus::Deleted => "deleted".red(),
        };
        println!("  {:>10} {} {}", status, record.file_path, format_bytes(record.file_size).dimmed());
    }
    Ok(())
}

fn cmd_restore(manager: &SavepointManager, id: &str, show_progress: bool, json: bool) -> Result<()> {
    let id = manager.resolve_id(id)?;

    let progress = (show_progress && !json).then(|| {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb
    });

    let result = manager.restore_savepoint_with_progress(
        &id,
        progress.as_ref().map(|pb| {
            move |info: ProgressInfo| {
                pb.set_length(info.total as u64);
                pb.set_position(info.processed as u64);
                pb.set_message(info.current_item.unwrap_or_default());
            }
        }),
    );

    if let Some(pb) = &progress {
        pb.finish_and_clear();
    }
    let result = result?;

    if json {
        print_json(&OperationStatus::success());
        return Ok(());
    }

    println!("{} Restored savepoint {}", "✓".green().bold(), id.yellow().bold());
    println!("  Files restored: {}", result.files_restored.to_string().cyan());
    println!("  Files deleted: {}", result.files_deleted.to_string().yellow());
    println!("  Bytes written: {}", format_bytes(result.bytes_written).cyan());
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(result.duration_ms)).to_string().cyan()
    );
    Ok(())
}

fn cmd_delete(manager: &SavepointManager, id: &str, json: bool) -> Result<()> {
    let id = manager.resolve_id(id)?;
    manager.delete_savepoint(&id)?;

    if json {
        print_json(&OperationStatus::success());
    } else {
        println!("{} Deleted savepoint {}", "✓".green().bold(), id.yellow().bold());
    }
    Ok(())
}

fn cmd_verify(manager: &SavepointManager, id: &str, json: bool) -> Result<()> {
    let id = manager.resolve_id(id)?;
    let report = manager.verify_savepoint(&id)?;

    if json {
        print_json(&report);
        return Ok(());
    }

    println!("{}", "Verification Report:".bold());
    for check in &report.file_checks {
        let mark = if check.is_valid() { "✓".green() } else { "✗".red() };
        match &check.error {
            Some(error) => println!("  {} {} ({})", mark, check.path, error.red()),
            None => println!("  {} {}", mark, check.path),
        }
    }
    for stray in &report.stray_files {
        println!("  {} {} (not referenced by metadata)", "?".yellow(), stray);
    }
    println!();
    if report.is_valid() {
        println!("{}", report.summary().green());
    } else {
        println!("{}", report.summary().red());
    }
    Ok(())
}

fn age(savepoint: &Savepoint) -> String {
    let elapsed = (Utc::now() - savepoint.timestamp)
        .to_std()
        .unwrap_or_default();
    format!("{} ago", format_duration(Duration::from_secs(elapsed.as_secs())))
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("{}: {}", "Error".red().bold(), SavepointError::from(e)),
    }
}
