//! Content-addressed cache and persistent state.
//!
//! Layout under the project root:
//! - `.glupe.lock`: JSON [`PersistentState`]
//! - `glupe_cache/<id>.txt`: last generated text per container
//! - `.glupe_build.cache`: hash of the last successful whole build

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

pub const LOCK_FILE: &str = ".glupe.lock";
pub const CACHE_DIR: &str = "glupe_cache";
pub const BUILD_STAMP_FILE: &str = ".glupe_build.cache";

/// Stable hex SHA-256 of `content`.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Remove the cache directory, the lock file and the build stamp under `root`.
///
/// Returns the paths that existed and were removed.
pub fn clean(root: &Path) -> Result<Vec<PathBuf>, CacheError> {
    let mut removed = Vec::new();

    let dir = root.join(CACHE_DIR);
    if dir.is_dir() {
        fs::remove_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        removed.push(dir);
    }
    for name in [LOCK_FILE, BUILD_STAMP_FILE] {
        let path = root.join(name);
        match fs::remove_file(&path) {
            Ok(()) => removed.push(path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::io(&path, e)),
        }
    }

    debug!(removed_count = removed.len(), "Cleaned cache");
    Ok(removed)
}

/// Cache and state errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

impl CacheError {
    fn io(path: &Path, source: io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub hash: String,
    pub last_run: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableRecord {
    pub content: String,
    pub hash: String,
}

/// State that outlives a process: container hashes and persistent variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentState {
    #[serde(default)]
    pub containers: BTreeMap<String, ContainerRecord>,
    #[serde(default)]
    pub variables: BTreeMap<String, VariableRecord>,
}

/// A reusable generation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub id: String,
    pub content_hash: String,
    pub generated_text: String,
    pub last_run: i64,
}

/// Cache rooted at a project directory.
#[derive(Debug)]
pub struct ContentCache {
    root: PathBuf,
    state: PersistentState,
    enabled: bool,
    /// Selective update: only these ids may miss; everything else with cached text hits
    update_targets: Option<BTreeSet<String>>,
    dirty: bool,
}

impl ContentCache {
    /// Open the cache under `root`, loading `.glupe.lock` if present.
    ///
    /// An unreadable or corrupt lock file is logged and treated as empty.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let lock_path = root.join(LOCK_FILE);

        let state = match fs::read_to_string(&lock_path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(state) => state,
                Err(e) => {
                    warn!(path = %lock_path.display(), "Ignoring corrupt lock file: {e}");
                    PersistentState::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => PersistentState::default(),
            Err(e) => {
                warn!(path = %lock_path.display(), "Ignoring unreadable lock file: {e}");
                PersistentState::default()
            }
        };

        debug!(
            containers_count = state.containers.len(),
            variables_count = state.variables.len(),
            "Opened content cache"
        );

        Self {
            root,
            state,
            enabled: true,
            update_targets: None,
            dirty: false,
        }
    }

    /// Disable reuse; every container misses.
    ///
    /// Fresh results are still stored, so a later cached build reuses them.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Restrict misses to `targets`.
    pub fn with_update_targets(mut self, targets: BTreeSet<String>) -> Self {
        self.update_targets = Some(targets);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> &PersistentState {
        &self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.root.join(CACHE_DIR).join(format!("{id}.txt"))
    }

    /// Cached text for `id`, regardless of hash.
    pub fn cached_text(&self, id: &str) -> Option<String> {
        fs::read_to_string(self.entry_path(id)).ok()
    }

    /// The reusable entry for `id` at `hash`, if any.
    pub fn lookup(&self, id: &str, hash: &str) -> Option<CacheEntry> {
        if !self.enabled {
            return None;
        }

        let outside_targets = self
            .update_targets
            .as_ref()
            .map(|targets| !targets.contains(id))
            .unwrap_or(false);
        let record = self.state.containers.get(id);
        let hash_matches = record.map(|r| r.hash == hash).unwrap_or(false);

        if !(hash_matches || outside_targets) {
            return None;
        }

        let generated_text = self.cached_text(id)?;
        Some(CacheEntry {
            id: id.to_string(),
            content_hash: record.map(|r| r.hash.clone()).unwrap_or_else(|| hash.to_string()),
            generated_text,
            last_run: record.map(|r| r.last_run).unwrap_or_default(),
        })
    }

    pub fn is_cache_hit(&self, id: &str, hash: &str) -> bool {
        self.lookup(id, hash).is_some()
    }

    /// Overwrite the entry for `id`.
    pub fn store(&mut self, id: &str, hash: &str, text: &str) -> Result<(), CacheError> {
        let dir = self.root.join(CACHE_DIR);
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;

        let path = self.entry_path(id);
        fs::write(&path, text).map_err(|e| CacheError::io(&path, e))?;

        self.state.containers.insert(
            id.to_string(),
            ContainerRecord {
                hash: hash.to_string(),
                last_run: chrono::Utc::now().timestamp(),
            },
        );
        self.dirty = true;
        debug!(id, "Stored cache entry");
        Ok(())
    }

    /// Record a persistent variable value.
    pub fn remember_variable(&mut self, id: &str, content: &str) {
        let hash = content_hash(content);
        let unchanged = self
            .state
            .variables
            .get(id)
            .map(|r| r.hash == hash)
            .unwrap_or(false);
        if !unchanged {
            self.state.variables.insert(
                id.to_string(),
                VariableRecord {
                    content: content.to_string(),
                    hash,
                },
            );
            self.dirty = true;
        }
    }

    /// Write `.glupe.lock`.
    pub fn save(&mut self) -> Result<(), CacheError> {
        let path = self.root.join(LOCK_FILE);
        let json = serde_json::to_string_pretty(&self.state)?;
        fs::write(&path, json).map_err(|e| CacheError::io(&path, e))?;
        self.dirty = false;
        Ok(())
    }

    pub fn read_build_stamp(&self) -> Option<String> {
        fs::read_to_string(self.root.join(BUILD_STAMP_FILE))
            .ok()
            .map(|s| s.trim().to_string())
    }

    pub fn write_build_stamp(&self, hash: &str) -> Result<(), CacheError> {
        let path = self.root.join(BUILD_STAMP_FILE);
        fs::write(&path, hash).map_err(|e| CacheError::io(&path, e))
    }
}
