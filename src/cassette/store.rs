//! Cassette file store with per-name exclusive access

use std::fs::{self, File};
use std::future::Future;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::format::{Cassette, CassetteOptions};
use crate::{ProxyError, Result};

/// Extension of cassette files
pub const CASSETTE_EXTENSION: &str = "yml";

/// Loads and persists cassettes under a root directory
///
/// One file per cassette, named `<name>.yml`. Transactions on the same name
/// are serialized through [`CassetteStore::with_exclusive_access`]; different
/// names never contend.
pub struct CassetteStore {
    root: PathBuf,
    defaults: CassetteOptions,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CassetteStore {
    /// Create a store rooted at `root`; new cassettes get `defaults`
    #[must_use]
    pub fn new(root: PathBuf, defaults: CassetteOptions) -> Self {
        Self {
            root,
            defaults,
            locks: DashMap::new(),
        }
    }

    /// Storage root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Options given to cassettes that do not exist yet
    #[must_use]
    pub fn defaults(&self) -> CassetteOptions {
        self.defaults
    }

    /// File backing the cassette `name`
    #[must_use]
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{CASSETTE_EXTENSION}"))
    }

    /// Load a cassette, or create an empty one if no file exists
    ///
    /// # Errors
    ///
    /// Returns `StorageCorruption` if the file exists but cannot be parsed,
    /// and an I/O error if it cannot be read
    pub fn open(&self, name: &str) -> Result<Cassette> {
        validate_cassette_name(name)?;
        let path = self.path_for(name);

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Cassette {} not on disk, starting empty", name);
                return Ok(Cassette::new(name, self.defaults));
            }
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return Err(corruption(&path, &e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut cassette: Cassette = serde_yaml::from_str(&content).map_err(|e| {
            warn!("Cassette {} failed to parse: {}", path.display(), e);
            corruption(&path, &e.to_string())
        })?;

        if cassette.name != name {
            return Err(corruption(
                &path,
                &format!("file holds cassette '{}'", cassette.name),
            ));
        }

        cassette.mark_on_disk();
        debug!("Loaded cassette {} ({} interactions)", name, cassette.len());
        Ok(cassette)
    }

    /// Run `transaction` while holding the lock for `name`
    ///
    /// The lock is released on every exit path, including errors and
    /// panics inside `transaction`. Its map entry is dropped once no other
    /// transaction holds or waits on it.
    ///
    /// # Errors
    ///
    /// Returns whatever `transaction` returns
    pub async fn with_exclusive_access<F, Fut, T>(&self, name: &str, transaction: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        // Clone out of the map before awaiting so the shard lock is not held.
        let lock = Arc::clone(
            self.locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );

        let result = {
            let _guard = lock.lock().await;
            transaction().await
        };

        self.locks.remove_if(name, |_, entry| is_uncontended(entry));
        result
    }

    /// Write the whole cassette back to disk
    ///
    /// The content goes to a temporary file in the same directory which is
    /// then renamed over the cassette, so readers see either the old or the
    /// new file, never a partial one.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or any file operation fails
    pub fn persist(&self, cassette: &mut Cassette) -> Result<()> {
        validate_cassette_name(&cassette.name)?;
        fs::create_dir_all(&self.root)?;

        let yaml = serde_yaml::to_string(&*cassette)
            .map_err(|e| ProxyError::Other(format!("Failed to serialize cassette: {e}")))?;

        let path = self.path_for(&cassette.name);
        let tmp_path = self
            .root
            .join(format!(".{}.{CASSETTE_EXTENSION}.tmp", cassette.name));

        if let Err(e) = write_then_rename(&tmp_path, &path, yaml.as_bytes()) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        cassette.mark_on_disk();
        debug!(
            "Persisted cassette {} ({} interactions)",
            cassette.name,
            cassette.len()
        );
        Ok(())
    }

    /// Names of all persisted cassettes, sorted
    ///
    /// # Errors
    ///
    /// Returns error if the root directory cannot be read
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();

            if path.extension().and_then(|s| s.to_str()) != Some(CASSETTE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_cassette_name(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }
}

fn write_then_rename(tmp_path: &Path, path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(tmp_path)?;
    file.write_all(content)?;
    file.sync_all()?;
    fs::rename(tmp_path, path)
}

/// Only the map and the current caller hold the lock
fn is_uncontended(lock: &Arc<Mutex<()>>) -> bool {
    Arc::strong_count(lock) == 2
}

fn corruption(path: &Path, reason: &str) -> ProxyError {
    ProxyError::StorageCorruption {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Reject names that would escape the root or hide the file
///
/// # Errors
///
/// Returns `Other` describing the problem
fn validate_cassette_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ProxyError::Other(
            "Cassette name cannot be empty".to_string(),
        ));
    }

    if name.len() > 255 {
        return Err(ProxyError::Other(format!(
            "Cassette name too long: {} > 255",
            name.len()
        )));
    }

    if name.starts_with('.') || name.contains(['/', '\\', '\0']) {
        return Err(ProxyError::Other(format!(
            "Invalid cassette name: {name:?}"
        )));
    }

    Ok(())
}
