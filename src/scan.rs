use ignore::WalkBuilder;
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::structure::{DeclaredType, parse_declared_types};

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("failed to walk directory")]
    Walk(#[from] ignore::Error),

    #[error("failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Produces the fully-qualified class names declared under a folder.
///
/// Implementations should be deterministic for unchanged folder contents; the
/// repository manager caches whatever they return.
pub trait ClassScanner: Send + Sync {
    fn scan(
        &self,
        folder: &Path,
        recursive: bool,
        filter_interface: Option<&str>,
    ) -> Result<Vec<String>, ScanError>;
}

/// Scans `.java` source files and reads their top-level type declarations.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceScanner;

impl ClassScanner for SourceScanner {
    fn scan(
        &self,
        folder: &Path,
        recursive: bool,
        filter_interface: Option<&str>,
    ) -> Result<Vec<String>, ScanError> {
        let files = scan_source_files(folder, recursive)?;

        let parsed: Vec<Vec<DeclaredType>> = files
            .par_iter()
            .map(|path| -> Result<Vec<DeclaredType>, ScanError> {
                let bytes = std::fs::read(path).map_err(|source| ScanError::Read {
                    path: path.clone(),
                    source,
                })?;
                // Legacy trees still carry Latin-1 sources; identifiers are ASCII either way.
                let source = String::from_utf8_lossy(&bytes);
                Ok(parse_declared_types(&source).unwrap_or_else(|| {
                    tracing::warn!(path = %path.display(), "skipping unparsable source file");
                    Vec::new()
                }))
            })
            .collect::<Result<_, ScanError>>()?;
        let declared: Vec<DeclaredType> = parsed.into_iter().flatten().collect();

        let classes: Vec<String> = match filter_interface {
            Some(filter) => select_subtypes(&declared, filter),
            None => declared.into_iter().map(|t| t.name).collect(),
        }
        .into_iter()
        .collect();

        tracing::info!(
            folder = %folder.display(),
            recursive,
            filter = filter_interface.unwrap_or(""),
            files = files.len(),
            classes = classes.len(),
            "scanned source folder"
        );
        Ok(classes)
    }
}

pub fn scan_source_files(base_path: &Path, recursive: bool) -> Result<Vec<PathBuf>, ScanError> {
    if !base_path.is_dir() {
        return Err(ScanError::NotADirectory(base_path.to_path_buf()));
    }

    let walker = WalkBuilder::new(base_path)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .ignore(false)
        .parents(false)
        .max_depth(if recursive { None } else { Some(1) })
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_some_and(|t| t.is_file())
            && path.extension().is_some_and(|e| e == "java")
        {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Keeps the types whose supertype chain, as far as it is visible in
/// `declared`, reaches `filter`. The filter type itself is excluded.
fn select_subtypes(declared: &[DeclaredType], filter: &str) -> BTreeSet<String> {
    let supertypes: HashMap<&str, &[String]> = declared
        .iter()
        .map(|t| (t.name.as_str(), t.supertypes.as_slice()))
        .collect();

    declared
        .iter()
        .filter(|t| t.name != filter && reaches(&supertypes, &t.name, filter))
        .map(|t| t.name.clone())
        .collect()
}

fn reaches(supertypes: &HashMap<&str, &[String]>, start: &str, target: &str) -> bool {
    let mut seen = HashSet::new();
    let mut stack = vec![start];
    while let Some(current) = stack.pop() {
        if !seen.insert(current) {
            continue;
        }
        let Some(parents) = supertypes.get(current) else {
            continue;
        };
        for parent in parents.iter() {
            if parent == target {
                return true;
            }
            stack.push(parent.as_str());
        }
    }
    false
}
