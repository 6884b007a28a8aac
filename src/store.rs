//! Versioned on-disk index of class repositories.
//!
//! One file per format version holds the whole `id -> classes` mapping. The
//! file starts with a short human-readable header, followed by a
//! length-prefixed bincode body:
//!
//! ```text
//! // Generated by class-repository. DO NOT EDIT.
//! // format: v1
//! // generated: 2026-10-19T08:30:00+00:00
//! // owner: class_repository::RepositoryManager
//!
//! b"CRIX" | version: u32 LE | body_len: u64 LE | bincode(BTreeMap<String, Vec<String>>)
//! ```
//!
//! Bumping [`SYSTEM_VERSION`] changes the file name, so stale caches are
//! ignored rather than migrated. Writes go through a temporary file that is
//! renamed over the target.

use memmap2::Mmap;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{RepositoryError, Result};

pub const SYSTEM_VERSION: u32 = 1;

const MAGIC: &[u8; 4] = b"CRIX";
const OWNER: &str = "class_repository::RepositoryManager";
const HEADER_END: &[u8] = b"\n\n";
const PREFIX_SIZE: usize = 4 + 4 + 8; // magic + version + body_len

/// Cache ID to sorted class-name list. A `BTreeMap` keeps the encoded body stable.
pub type ClassIndex = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone)]
pub struct IndexStore {
    path: PathBuf,
}

impl IndexStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn in_folder(cache_folder: &Path) -> Self {
        Self::new(cache_folder.join(store_file_name()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn load(&self) -> Result<ClassIndex> {
        let file = File::open(&self.path).map_err(|e| RepositoryError::io(&self.path, e))?;
        let len = file
            .metadata()
            .map_err(|e| RepositoryError::io(&self.path, e))?
            .len();
        if len == 0 {
            return Err(RepositoryError::corrupt(&self.path, "file is empty"));
        }

        // SAFETY: The file is opened read-only and the mapping is dropped before
        // this function returns. Concurrent truncation by another process is not
        // supported (last writer wins, and writers replace the file by rename).
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| RepositoryError::io(&self.path, e))?;
        let index = decode(&mmap).map_err(|reason| RepositoryError::corrupt(&self.path, reason))?;

        tracing::debug!(
            path = %self.path.display(),
            entries = index.len(),
            "loaded class repository index"
        );
        Ok(index)
    }

    pub fn write(&self, index: &ClassIndex, generated_at: &str) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| RepositoryError::io(parent, e))?;
        }

        let body = bincode::serialize(index).map_err(|e| {
            RepositoryError::corrupt(&self.path, format!("failed to encode index: {e}"))
        })?;

        let mut tmp_os = self.path.as_os_str().to_os_string();
        tmp_os.push(".tmp");
        let tmp = PathBuf::from(tmp_os);

        let write_tmp = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(header(generated_at).as_bytes())?;
            file.write_all(MAGIC)?;
            file.write_all(&SYSTEM_VERSION.to_le_bytes())?;
            file.write_all(&(body.len() as u64).to_le_bytes())?;
            file.write_all(&body)?;
            file.sync_all()
        };
        if let Err(e) = write_tmp() {
            let _ = std::fs::remove_file(&tmp);
            return Err(RepositoryError::io(&tmp, e));
        }

        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(RepositoryError::io(&self.path, e));
        }

        tracing::info!(
            path = %self.path.display(),
            entries = index.len(),
            bytes = body.len(),
            "wrote class repository index"
        );
        Ok(())
    }

    pub fn delete(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        std::fs::remove_file(&self.path).map_err(|source| RepositoryError::CacheClearFailed {
            path: self.path.clone(),
            source,
        })?;
        tracing::info!(path = %self.path.display(), "deleted class repository index");
        Ok(())
    }
}

pub fn store_file_name() -> String {
    format!("class-repository-v{SYSTEM_VERSION}.idx")
}

fn header(generated_at: &str) -> String {
    // A line break in the label would move the header terminator.
    let generated_at = generated_at.replace(['\r', '\n'], " ");
    format!(
        "// Generated by class-repository. DO NOT EDIT.\n\
         // format: v{SYSTEM_VERSION}\n\
         // generated: {generated_at}\n\
         // owner: {OWNER}\n\n"
    )
}

fn decode(data: &[u8]) -> std::result::Result<ClassIndex, String> {
    let header_len = data
        .windows(HEADER_END.len())
        .position(|w| w == HEADER_END)
        .map(|pos| pos + HEADER_END.len())
        .ok_or_else(|| "missing header terminator".to_string())?;

    let payload = &data[header_len..];
    if payload.len() < PREFIX_SIZE {
        return Err(format!("truncated payload ({} bytes)", payload.len()));
    }

    if &payload[0..4] != MAGIC {
        return Err("magic mismatch".to_string());
    }
    let version = u32::from_le_bytes(payload[4..8].try_into().map_err(|_| "bad version field")?);
    if version != SYSTEM_VERSION {
        return Err(format!(
            "format version {version} does not match {SYSTEM_VERSION}"
        ));
    }
    let body_len =
        u64::from_le_bytes(payload[8..16].try_into().map_err(|_| "bad length field")?);

    let body = &payload[PREFIX_SIZE..];
    if body.len() as u64 != body_len {
        return Err(format!(
            "body length mismatch: header says {body_len}, found {}",
            body.len()
        ));
    }

    bincode::deserialize::<ClassIndex>(body).map_err(|e| format!("failed to decode index: {e}"))
}
