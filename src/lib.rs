//! # class-repository
//!
//! A persistent, versioned cache of the classes declared in Java source folders.
//!
//! ## Architecture
//!
//! - **repository**: Immutable `(id, classes)` value handed out by the manager
//! - **store**: Versioned index file (text header + bincode body), written by rename
//! - **manager**: Lookup orchestration, loader callbacks and deferred persistence
//! - **scan**: Class-scanner trait and the `.java` source folder scanner
//! - **structure**: Top-level type and supertype extraction using tree-sitter
//! - **error**: Error family with stable kinds and codes
//! - **cli** / **config**: Command-line front end and cache folder resolution

pub mod cli;
pub mod config;
pub mod error;
pub mod manager;
pub mod repository;
pub mod scan;
pub mod store;
pub mod structure;

pub use error::{ErrorKind, RepositoryError};
pub use manager::{ClassLoader, FolderScanOptions, RepositoryManager};
pub use repository::ClassRepository;
pub use scan::{ClassScanner, ScanError, SourceScanner};
