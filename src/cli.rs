use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "class-repository")]
#[command(about = "Cache the classes declared in Java source folders")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Return the classes declared in a folder, scanning it on a cache miss.
    Scan {
        folder: PathBuf,

        #[arg(short = 'r', long)]
        recursive: bool,

        #[arg(short = 'f', long, value_name = "INTERFACE")]
        filter: Option<String>,

        #[arg(long, value_name = "ID")]
        id: Option<String>,
    },
    /// Print the repository stored under a cache ID.
    Get { id: String },
    /// Report whether a cache ID is known.
    Exists { id: String },
    /// Register a cache ID with an explicit class list.
    Init {
        id: String,

        #[arg(value_name = "CLASS")]
        classes: Vec<String>,
    },
    /// Forget one cache ID.
    ClearId { id: String },
    /// Delete the whole cache file.
    Clear,
    Stats,
}
