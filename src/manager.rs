//! Repository manager: the single entry point for obtaining, registering and
//! invalidating class repositories.
//!
//! Resolution order for an ID is: materialized repositories in memory, the
//! persisted index, a registered loader callback. Folder lookups fall back to
//! the [`ClassScanner`] when all three miss.
//!
//! The index is flushed explicitly with [`RepositoryManager::close`] or
//! [`RepositoryManager::write_cache`]. Dropping a manager with unflushed
//! changes writes them as well and logs any failure.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{RepositoryError, Result};
use crate::repository::ClassRepository;
use crate::scan::{ClassScanner, SourceScanner};
use crate::store::{ClassIndex, IndexStore};

/// Deferred producer of a repository. Receives the manager so it can call
/// [`RepositoryManager::initialize_cache`] or any other operation.
pub type ClassLoader =
    Arc<dyn Fn(&mut RepositoryManager) -> Result<Arc<ClassRepository>> + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderScanOptions {
    pub recursive: bool,
    pub filter_interface: Option<String>,
    /// Explicit cache ID. When absent, one is derived from the folder,
    /// recursion flag and filter.
    pub id: Option<String>,
}

impl FolderScanOptions {
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn filter_interface(mut self, filter: impl Into<String>) -> Self {
        self.filter_interface = Some(filter.into());
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Debug, Serialize)]
pub struct ManagerStats {
    pub store_path: String,
    pub store_exists: bool,
    pub indexed_ids: usize,
    pub indexed_classes: usize,
    pub materialized: usize,
    pub loaders: usize,
    pub modified: bool,
}

pub struct RepositoryManager {
    store: IndexStore,
    scanner: Box<dyn ClassScanner>,
    index: ClassIndex,
    repositories: HashMap<String, Arc<ClassRepository>>,
    loaders: HashMap<String, ClassLoader>,
    modified: bool,
}

impl std::fmt::Debug for RepositoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryManager")
            .field("store", &self.store)
            .field("indexed", &self.index.len())
            .field("materialized", &self.repositories.len())
            .field("loaders", &self.loaders.len())
            .field("modified", &self.modified)
            .finish()
    }
}

impl RepositoryManager {
    pub fn create(cache_folder: &Path) -> Result<Self> {
        Self::create_with_scanner(cache_folder, Box::new(SourceScanner))
    }

    pub fn create_with_scanner(cache_folder: &Path, scanner: Box<dyn ClassScanner>) -> Result<Self> {
        let store = IndexStore::in_folder(cache_folder);
        let index = if store.exists() {
            store.load()?
        } else {
            ClassIndex::new()
        };

        tracing::debug!(
            store = %store.path().display(),
            entries = index.len(),
            "opened class repository manager"
        );

        Ok(Self {
            store,
            scanner,
            index,
            repositories: HashMap::new(),
            loaders: HashMap::new(),
            modified: false,
        })
    }

    pub fn store_path(&self) -> &Path {
        self.store.path()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// IDs currently present in the index, in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    pub fn find_classes_in_folder(
        &mut self,
        folder: &Path,
        options: &FolderScanOptions,
    ) -> Result<Arc<ClassRepository>> {
        let (id, canonical) = match options.id.as_deref() {
            Some(id) => (id.to_string(), None),
            None => {
                let canonical = canonical_folder(folder)?;
                let id = derive_folder_id(
                    &canonical,
                    options.recursive,
                    options.filter_interface.as_deref(),
                );
                (id, Some(canonical))
            }
        };

        if let Some(repository) = self.get_by_id(&id)? {
            return Ok(repository);
        }

        let canonical = match canonical {
            Some(canonical) => canonical,
            None => canonical_folder(folder)?,
        };
        tracing::debug!(id = %id, folder = %canonical.display(), "class repository miss, scanning");
        let classes = self
            .scanner
            .scan(
                &canonical,
                options.recursive,
                options.filter_interface.as_deref(),
            )
            .map_err(|source| RepositoryError::Scan {
                folder: canonical.clone(),
                source,
            })?;

        self.initialize_cache(&id, classes)
    }

    pub fn get_by_id(&mut self, id: &str) -> Result<Option<Arc<ClassRepository>>> {
        if let Some(repository) = self.repositories.get(id) {
            return Ok(Some(Arc::clone(repository)));
        }

        if let Some(classes) = self.index.get(id) {
            let repository = Arc::new(ClassRepository::new(id, classes.clone()));
            self.repositories
                .insert(id.to_string(), Arc::clone(&repository));
            return Ok(Some(repository));
        }

        if self.loaders.contains_key(id) {
            return self.auto_load(id).map(Some);
        }

        Ok(None)
    }

    pub fn require_by_id(&mut self, id: &str) -> Result<Arc<ClassRepository>> {
        self.get_by_id(id)?.ok_or_else(|| RepositoryError::NotFound { id: id.to_string() })
    }

    pub fn register_class_loader<F>(&mut self, id: impl Into<String>, loader: F)
    where
        F: Fn(&mut RepositoryManager) -> Result<Arc<ClassRepository>> + Send + Sync + 'static,
    {
        self.loaders.insert(id.into(), Arc::new(loader));
    }

    pub fn unregister_class_loader(&mut self, id: &str) {
        self.loaders.remove(id);
    }

    pub fn has_class_loader(&self, id: &str) -> bool {
        self.loaders.contains_key(id)
    }

    pub fn clear_id(&mut self, id: &str) {
        if self.index.remove(id).is_some() {
            self.modified = true;
        }
        self.repositories.remove(id);
        self.loaders.remove(id);
    }

    /// Deletes the store file and empties the index. Registered loaders are kept.
    /// When the file cannot be removed, in-memory state is left untouched.
    pub fn clear_cache(&mut self) -> Result<()> {
        self.store.delete()?;
        self.index.clear();
        self.repositories.clear();
        self.modified = false;
        Ok(())
    }

    pub fn id_exists(&self, id: &str) -> bool {
        self.index.contains_key(id) || self.loaders.contains_key(id)
    }

    pub fn initialize_cache(
        &mut self,
        id: &str,
        mut classes: Vec<String>,
    ) -> Result<Arc<ClassRepository>> {
        if self.index.contains_key(id) {
            return Err(RepositoryError::AlreadyExists { id: id.to_string() });
        }

        classes.sort();
        let repository = Arc::new(ClassRepository::new(id, classes.clone()));
        self.index.insert(id.to_string(), classes);
        self.repositories
            .insert(id.to_string(), Arc::clone(&repository));
        self.modified = true;

        tracing::debug!(id = %id, classes = repository.len(), "initialized class repository");
        Ok(repository)
    }

    pub fn write_cache(&mut self) -> Result<()> {
        if !self.modified {
            return Ok(());
        }
        let generated_at = chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, false);
        self.store.write(&self.index, &generated_at)?;
        self.modified = false;
        Ok(())
    }

    /// Flushes pending changes and releases the manager.
    pub fn close(mut self) -> Result<()> {
        self.final_flush()
    }

    /// Last write attempt; pending changes are dropped on failure so `Drop`
    /// does not repeat it.
    fn final_flush(&mut self) -> Result<()> {
        let result = self.write_cache();
        self.modified = false;
        result
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            store_path: self.store.path().to_string_lossy().to_string(),
            store_exists: self.store.exists(),
            indexed_ids: self.index.len(),
            indexed_classes: self.index.values().map(Vec::len).sum(),
            materialized: self.repositories.len(),
            loaders: self.loaders.len(),
            modified: self.modified,
        }
    }

    fn auto_load(&mut self, id: &str) -> Result<Arc<ClassRepository>> {
        let Some(loader) = self.loaders.get(id).cloned() else {
            return Err(RepositoryError::NotFound { id: id.to_string() });
        };

        tracing::debug!(id = %id, "invoking class loader");
        let repository = loader(self)?;
        if repository.id() != id {
            return Err(RepositoryError::LoaderInvalidResult {
                id: id.to_string(),
                found: format!("the repository for cache ID `{}`", repository.id()),
            });
        }

        self.repositories
            .insert(id.to_string(), Arc::clone(&repository));
        Ok(repository)
    }
}

impl Drop for RepositoryManager {
    fn drop(&mut self) {
        if let Err(err) = self.write_cache() {
            tracing::warn!(
                store = %self.store.path().display(),
                error = %err,
                "failed to flush class repository index on drop"
            );
        }
    }
}

/// Stable cache ID for a folder scan: a hash of the canonical folder path,
/// the recursion flag and the filter interface.
pub fn derive_folder_id(canonical_folder: &Path, recursive: bool, filter: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_folder.as_os_str().as_encoded_bytes());
    hasher.update([0u8, u8::from(recursive), 0u8]);
    hasher.update(filter.unwrap_or("").as_bytes());
    let digest = hasher.finalize();
    format!("folder-{}", hex::encode(&digest[..16]))
}

fn canonical_folder(folder: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(folder).map_err(|e| RepositoryError::io(folder, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::scan::ScanError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct CountingScanner {
        calls: Arc<AtomicUsize>,
        classes: Vec<String>,
    }

    impl CountingScanner {
        fn new(classes: &[&str]) -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                classes: classes.iter().map(|c| c.to_string()).collect(),
            }
        }
    }

    impl ClassScanner for CountingScanner {
        fn scan(
            &self,
            _folder: &Path,
            _recursive: bool,
            _filter_interface: Option<&str>,
        ) -> std::result::Result<Vec<String>, ScanError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.classes.clone())
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn folder_lookup_is_idempotent() -> anyhow::Result<()> {
        let cache = tempfile::tempdir()?;
        let sources = tempfile::tempdir()?;
        let scanner = CountingScanner::new(&["b.B", "a.A"]);
        let calls = Arc::clone(&scanner.calls);
        let mut manager = RepositoryManager::create_with_scanner(cache.path(), Box::new(scanner))?;

        let options = FolderScanOptions::default()
            .recursive(true)
            .filter_interface("a.Plugin");
        let first = manager.find_classes_in_folder(sources.path(), &options)?;
        let second = manager.find_classes_in_folder(sources.path(), &options)?;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.classes(), ["a.A", "b.B"]);
        Ok(())
    }

    #[test]
    fn derived_id_is_stable_across_managers() -> anyhow::Result<()> {
        let cache_a = tempfile::tempdir()?;
        let cache_b = tempfile::tempdir()?;
        let sources = tempfile::tempdir()?;
        let options = FolderScanOptions::default().filter_interface("a.Plugin");

        let mut a = RepositoryManager::create_with_scanner(
            cache_a.path(),
            Box::new(CountingScanner::new(&["a.A"])),
        )?;
        let mut b = RepositoryManager::create_with_scanner(
            cache_b.path(),
            Box::new(CountingScanner::new(&["a.A"])),
        )?;

        let from_a = a.find_classes_in_folder(sources.path(), &options)?;
        let from_b = b.find_classes_in_folder(&sources.path().join("."), &options)?;
        assert_eq!(from_a.id(), from_b.id());

        let other = a.find_classes_in_folder(sources.path(), &options.clone().recursive(true))?;
        assert_ne!(other.id(), from_a.id());
        Ok(())
    }

    #[test]
    fn explicit_id_is_used_verbatim() -> anyhow::Result<()> {
        let cache = tempfile::tempdir()?;
        let sources = tempfile::tempdir()?;
        let mut manager = RepositoryManager::create_with_scanner(
            cache.path(),
            Box::new(CountingScanner::new(&["a.A"])),
        )?;

        let repo = manager
            .find_classes_in_folder(sources.path(), &FolderScanOptions::default().id("plugins"))?;
        assert_eq!(repo.id(), "plugins");
        assert!(manager.id_exists("plugins"));
        Ok(())
    }

    #[test]
    fn missing_folder_without_id_is_io_error() -> anyhow::Result<()> {
        let cache = tempfile::tempdir()?;
        let mut manager = RepositoryManager::create_with_scanner(
            cache.path(),
            Box::new(CountingScanner::new(&[])),
        )?;
        let err = manager
            .find_classes_in_folder(&cache.path().join("absent"), &FolderScanOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        Ok(())
    }

    #[test]
    fn initialize_cache_sorts_classes() -> anyhow::Result<()> {
        let cache = tempfile::tempdir()?;
        let mut manager = RepositoryManager::create(cache.path())?;

        manager.initialize_cache("letters", strings(&["B", "A", "C"]))?;
        let repo = manager.require_by_id("letters")?;
        assert_eq!(repo.classes(), ["A", "B", "C"]);
        Ok(())
    }

    #[test]
    fn duplicate_initialize_is_rejected() -> anyhow::Result<()> {
        let cache = tempfile::tempdir()?;
        let mut manager = RepositoryManager::create(cache.path())?;

        let first = manager.initialize_cache("dup", strings(&["a.A"]))?;
        let err = manager
            .initialize_cache("dup", strings(&["b.B"]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert!(err.to_string().contains("dup"));

        let current = manager.get_by_id("dup")?.expect("first repository survives");
        assert!(Arc::ptr_eq(&first, &current));
        assert_eq!(current.classes(), ["a.A"]);
        Ok(())
    }

    #[test]
    fn clear_id_removes_index_entry_and_loader() -> anyhow::Result<()> {
        let cache = tempfile::tempdir()?;
        let mut manager = RepositoryManager::create(cache.path())?;

        manager.initialize_cache("gone", strings(&["a.A"]))?;
        manager.register_class_loader("gone", |m: &mut RepositoryManager| {
            m.initialize_cache("gone", vec!["b.B".to_string()])
        });
        manager.clear_id("gone");

        assert!(!manager.id_exists("gone"));
        assert!(!manager.has_class_loader("gone"));
        assert!(manager.get_by_id("gone")?.is_none());

        manager.clear_id("never-existed");
        Ok(())
    }

    #[test]
    fn require_missing_id_is_not_found() -> anyhow::Result<()> {
        let cache = tempfile::tempdir()?;
        let mut manager = RepositoryManager::create(cache.path())?;
        let err = manager.require_by_id("nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("id_exists"));
        Ok(())
    }

    #[test]
    fn write_cache_only_when_modified() -> anyhow::Result<()> {
        let cache = tempfile::tempdir()?;
        let mut manager = RepositoryManager::create(cache.path())?;
        let store_path = manager.store_path().to_path_buf();

        manager.write_cache()?;
        assert!(!store_path.exists());

        manager.initialize_cache("one", strings(&["a.A"]))?;
        assert!(manager.is_modified());
        manager.write_cache()?;
        assert!(store_path.exists());
        assert!(!manager.is_modified());

        let written_at = std::fs::metadata(&store_path)?.modified()?;
        std::fs::remove_file(&store_path)?;
        manager.write_cache()?;
        assert!(!store_path.exists());

        manager.clear_id("one");
        manager.write_cache()?;
        assert!(store_path.exists());
        assert!(std::fs::metadata(&store_path)?.modified()? >= written_at);
        Ok(())
    }

    #[test]
    fn index_round_trips_through_store() -> anyhow::Result<()> {
        let cache = tempfile::tempdir()?;
        {
            let mut manager = RepositoryManager::create(cache.path())?;
            manager.initialize_cache("plugins", strings(&["z.Z", "a.A", "m.M"]))?;
            manager.close()?;
        }

        let mut reopened = RepositoryManager::create(cache.path())?;
        assert!(reopened.id_exists("plugins"));
        let repo = reopened.require_by_id("plugins")?;
        assert_eq!(repo.classes(), ["a.A", "m.M", "z.Z"]);
        assert!(!reopened.is_modified());
        Ok(())
    }

    #[test]
    fn drop_flushes_pending_changes() -> anyhow::Result<()> {
        let cache = tempfile::tempdir()?;
        {
            let mut manager = RepositoryManager::create(cache.path())?;
            manager.initialize_cache("dropped", strings(&["a.A"]))?;
        }
        let mut reopened = RepositoryManager::create(cache.path())?;
        assert!(reopened.get_by_id("dropped")?.is_some());
        Ok(())
    }

    #[test]
    fn loader_runs_once_and_is_memoized() -> anyhow::Result<()> {
        let cache = tempfile::tempdir()?;
        let mut manager = RepositoryManager::create(cache.path())?;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        manager.register_class_loader("lazy", move |m: &mut RepositoryManager| {
            counter.fetch_add(1, Ordering::SeqCst);
            m.initialize_cache("lazy", vec!["x.Y".to_string(), "x.X".to_string()])
        });
        assert!(manager.id_exists("lazy"));
        assert!(manager.has_class_loader("lazy"));

        let first = manager.get_by_id("lazy")?.expect("loader result");
        let second = manager.get_by_id("lazy")?.expect("memoized result");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.classes(), ["x.X", "x.Y"]);
        Ok(())
    }

    #[test]
    fn loader_may_return_unindexed_repository() -> anyhow::Result<()> {
        let cache = tempfile::tempdir()?;
        let mut manager = RepositoryManager::create(cache.path())?;
        manager.register_class_loader("adhoc", |_: &mut RepositoryManager| {
            Ok(Arc::new(ClassRepository::new("adhoc", vec!["a.A".to_string()])))
        });

        let repo = manager.require_by_id("adhoc")?;
        assert_eq!(repo.classes(), ["a.A"]);
        assert!(!manager.is_modified());
        Ok(())
    }

    #[test]
    fn loader_returning_other_repository_is_invalid() -> anyhow::Result<()> {
        let cache = tempfile::tempdir()?;
        let mut manager = RepositoryManager::create(cache.path())?;
        manager.register_class_loader("wanted", |_: &mut RepositoryManager| {
            Ok(Arc::new(ClassRepository::new("other", Vec::new())))
        });

        let err = manager.get_by_id("wanted").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LoaderInvalidResult);
        let msg = err.to_string();
        assert!(msg.contains("wanted"));
        assert!(msg.contains("other"));
        Ok(())
    }

    #[test]
    fn registering_loader_keeps_materialized_repository() -> anyhow::Result<()> {
        let cache = tempfile::tempdir()?;
        let mut manager = RepositoryManager::create(cache.path())?;
        let existing = manager.initialize_cache("kept", strings(&["a.A"]))?;

        manager.register_class_loader("kept", |_: &mut RepositoryManager| {
            Ok(Arc::new(ClassRepository::new("kept", vec!["b.B".to_string()])))
        });
        let current = manager.require_by_id("kept")?;
        assert!(Arc::ptr_eq(&existing, &current));

        manager.unregister_class_loader("kept");
        manager.unregister_class_loader("kept");
        assert!(!manager.has_class_loader("kept"));
        Ok(())
    }

    #[test]
    fn clear_cache_deletes_store_and_forgets_entries() -> anyhow::Result<()> {
        let cache = tempfile::tempdir()?;
        let mut manager = RepositoryManager::create(cache.path())?;
        manager.initialize_cache("one", strings(&["a.A"]))?;
        manager.write_cache()?;
        assert!(manager.store_path().exists());

        manager.clear_cache()?;
        assert!(!manager.store_path().exists());
        assert!(!manager.id_exists("one"));
        assert!(manager.get_by_id("one")?.is_none());
        assert_eq!(manager.stats().indexed_ids, 0);
        Ok(())
    }

    #[test]
    fn failed_clear_cache_keeps_entries() -> anyhow::Result<()> {
        let cache = tempfile::tempdir()?;
        let mut manager = RepositoryManager::create(cache.path())?;
        manager.initialize_cache("kept", strings(&["a.A"]))?;
        // remove_file refuses directories, even for root.
        std::fs::create_dir(manager.store_path())?;

        let err = manager.clear_cache().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CacheClearFailed);
        assert!(manager.id_exists("kept"));
        assert!(manager.is_modified());
        assert_eq!(manager.require_by_id("kept")?.classes(), ["a.A"]);

        std::fs::remove_dir(manager.store_path())?;
        Ok(())
    }

    #[test]
    fn failed_close_is_not_retried_on_drop() -> anyhow::Result<()> {
        let cache = tempfile::tempdir()?;
        let mut manager = RepositoryManager::create(cache.path())?;
        manager.initialize_cache("pending", strings(&["a.A"]))?;
        let store_path = manager.store_path().to_path_buf();
        std::fs::create_dir(&store_path)?;

        assert!(manager.final_flush().is_err());
        assert!(!manager.is_modified());

        std::fs::remove_dir(&store_path)?;
        drop(manager);
        assert!(!store_path.exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn derived_id_keeps_non_utf8_paths_apart() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let first = Path::new(OsStr::from_bytes(b"/src/caf\xe9"));
        let second = Path::new(OsStr::from_bytes(b"/src/caf\xe8"));
        assert_ne!(
            derive_folder_id(first, false, None),
            derive_folder_id(second, false, None)
        );
    }

    #[test]
    fn corrupt_store_fails_construction() -> anyhow::Result<()> {
        let cache = tempfile::tempdir()?;
        let store = IndexStore::in_folder(cache.path());
        std::fs::write(store.path(), b"not an index")?;

        let err = RepositoryManager::create(cache.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreCorrupt);
        Ok(())
    }
}
