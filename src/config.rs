use anyhow::Result;
use std::env;
use std::path::PathBuf;

use crate::cli::Cli;

pub const CACHE_DIR_ENV: &str = "CLASS_REPOSITORY_CACHE_DIR";

pub fn resolve_cache_dir(cli: &Cli) -> Result<PathBuf> {
    if let Some(p) = cli.cache_dir.clone() {
        return Ok(p);
    }

    if let Ok(p) = env::var(CACHE_DIR_ENV)
        && !p.is_empty()
    {
        return Ok(PathBuf::from(p));
    }

    class_repository_home()
}

fn class_repository_home() -> Result<PathBuf> {
    let base = dirs::cache_dir()
        .or_else(dirs::data_local_dir)
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow::anyhow!("Failed to resolve cache directory"))?;
    Ok(base.join("class-repository"))
}
