//! Error family shared by the repository manager and the index store.

use std::path::PathBuf;

use crate::scan::ScanError;

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Stable classification of a [`RepositoryError`] for programmatic matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AlreadyExists,
    CacheClearFailed,
    LoaderInvalidResult,
    NotFound,
    StoreCorrupt,
    Io,
    Scan,
}

impl ErrorKind {
    pub fn code(self) -> u16 {
        match self {
            ErrorKind::AlreadyExists => 13801,
            ErrorKind::CacheClearFailed => 13802,
            ErrorKind::LoaderInvalidResult => 13803,
            ErrorKind::NotFound => 13804,
            ErrorKind::StoreCorrupt => 13805,
            ErrorKind::Io => 13806,
            ErrorKind::Scan => 13807,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::AlreadyExists => "Cache ID already exists",
            ErrorKind::CacheClearFailed => "Cannot clear the cache",
            ErrorKind::LoaderInvalidResult => "Invalid class loader result",
            ErrorKind::NotFound => "Class repository not found",
            ErrorKind::StoreCorrupt => "Cache file is corrupt",
            ErrorKind::Io => "Cache file I/O failed",
            ErrorKind::Scan => "Class scan failed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error(
        "cache ID `{id}` already exists; check `id_exists(\"{id}\")` before calling `initialize_cache`, or fetch it with `get_by_id`"
    )]
    AlreadyExists { id: String },

    #[error("failed to delete cache file {}", .path.display())]
    CacheClearFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "class loader for cache ID `{id}` must return the repository for that ID, but returned {found}"
    )]
    LoaderInvalidResult { id: String, found: String },

    #[error(
        "no class repository found for cache ID `{id}`; use `id_exists(\"{id}\")` to check before requiring it"
    )]
    NotFound { id: String },

    #[error("cache file {} cannot be loaded: {reason}", .path.display())]
    StoreCorrupt { path: PathBuf, reason: String },

    #[error("i/o error on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to scan classes in {}", .folder.display())]
    Scan {
        folder: PathBuf,
        #[source]
        source: ScanError,
    },
}

impl RepositoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RepositoryError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            RepositoryError::CacheClearFailed { .. } => ErrorKind::CacheClearFailed,
            RepositoryError::LoaderInvalidResult { .. } => ErrorKind::LoaderInvalidResult,
            RepositoryError::NotFound { .. } => ErrorKind::NotFound,
            RepositoryError::StoreCorrupt { .. } => ErrorKind::StoreCorrupt,
            RepositoryError::Io { .. } => ErrorKind::Io,
            RepositoryError::Scan { .. } => ErrorKind::Scan,
        }
    }

    pub fn code(&self) -> u16 {
        self.kind().code()
    }

    pub fn label(&self) -> &'static str {
        self.kind().label()
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RepositoryError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RepositoryError::StoreCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
