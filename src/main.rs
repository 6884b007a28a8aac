use anyhow::{Context, Result};
use clap::Parser;
use class_repository::cli::{Cli, Commands};
use class_repository::config::resolve_cache_dir;
use class_repository::{FolderScanOptions, RepositoryManager};
use serde::Serialize;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cache_dir = resolve_cache_dir(&cli)?;
    let mut manager = RepositoryManager::create(&cache_dir)
        .with_context(|| format!("Failed to open class cache in {}", cache_dir.display()))?;

    match cli.command {
        Commands::Scan {
            folder,
            recursive,
            filter,
            id,
        } => {
            let start = Instant::now();
            let options = FolderScanOptions {
                recursive,
                filter_interface: filter,
                id,
            };
            let repository = manager
                .find_classes_in_folder(&folder, &options)
                .with_context(|| format!("Failed to resolve classes in {}", folder.display()))?;
            print_json(&ScanOutput {
                id: repository.id(),
                folder: folder.to_string_lossy().to_string(),
                count: repository.len(),
                classes: repository.classes(),
                duration_ms: start.elapsed().as_millis() as u64,
            })?;
        }
        Commands::Get { id } => {
            let repository = manager.require_by_id(&id)?;
            print_json(&*repository)?;
        }
        Commands::Exists { id } => {
            let exists = manager.id_exists(&id);
            print_json(&ExistsOutput { id: &id, exists })?;
        }
        Commands::Init { id, classes } => {
            let repository = manager.initialize_cache(&id, classes)?;
            print_json(&*repository)?;
        }
        Commands::ClearId { id } => {
            let existed = manager.id_exists(&id);
            manager.clear_id(&id);
            print_json(&ClearOutput {
                cleared: existed,
                id: Some(id.as_str()),
            })?;
        }
        Commands::Clear => {
            manager.clear_cache()?;
            print_json(&ClearOutput {
                cleared: true,
                id: None,
            })?;
        }
        Commands::Stats => {
            print_json(&manager.stats())?;
        }
    }

    manager.close().context("Failed to write class cache")?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Debug, Serialize)]
struct ScanOutput<'a> {
    id: &'a str,
    folder: String,
    count: usize,
    classes: &'a [String],
    duration_ms: u64,
}

#[derive(Debug, Serialize)]
struct ExistsOutput<'a> {
    id: &'a str,
    exists: bool,
}

#[derive(Debug, Serialize)]
struct ClearOutput<'a> {
    cleared: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
}
