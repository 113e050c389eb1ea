//! File-backed task store
//!
//! Persists a single [`TaskSnapshot`] as JSON:
//!
//! ```text
//! .tw/
//!   tasks.json        # tasks and dependency edges
//!   tasks.json.lock   # advisory lock held by every reader and writer
//! ```
//!
//! Every mutation runs as lock -> load -> check -> mutate -> write while
//! holding the lock, so a cycle check or the "one open instance" check is
//! never separated from the write it guards. A failed operation leaves the
//! file untouched.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lock::{self, FileLock};
use crate::task::{IdGenerator, TaskSnapshot};

/// Name of the store directory at the workspace root
pub const STORE_DIR: &str = ".tw";

const TASKS_FILE: &str = "tasks.json";

#[derive(Debug, Clone)]
pub struct TaskStore {
    root: PathBuf,
    config: Config,
}

impl TaskStore {
    pub fn new(root: PathBuf, config: Config) -> Self {
        Self { root, config }
    }

    /// Open the store rooted at `root`, reading `.tw.toml` if present.
    pub fn open(root: PathBuf) -> Self {
        let config = Config::load_from_dir(&root);
        Self::new(root, config)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store_dir(&self) -> PathBuf {
        self.root.join(STORE_DIR)
    }

    pub fn tasks_path(&self) -> PathBuf {
        self.store_dir().join(TASKS_FILE)
    }

    pub fn is_initialized(&self) -> bool {
        self.tasks_path().exists()
    }

    pub fn id_generator(&self) -> IdGenerator {
        IdGenerator::from_config(&self.config.tasks)
    }

    /// Create the store directory and an empty snapshot. Returns whether
    /// anything was created.
    pub fn init(&self) -> Result<bool> {
        let _lock = self.lock()?;
        if self.is_initialized() {
            return Ok(false);
        }
        fs::create_dir_all(self.store_dir())?;
        write_json(&self.tasks_path(), &TaskSnapshot::empty())?;
        Ok(true)
    }

    /// Read the current snapshot.
    pub fn load(&self) -> Result<TaskSnapshot> {
        self.ensure_initialized()?;
        let _lock = self.lock()?;
        self.read_snapshot()
    }

    /// Apply `op` to the snapshot and persist the result.
    ///
    /// Nothing is written when `op` fails.
    pub fn update<T>(&self, op: impl FnOnce(&mut TaskSnapshot) -> Result<T>) -> Result<T> {
        self.ensure_initialized()?;
        let lock = self.lock()?;
        let mut snapshot = self.read_snapshot()?;
        let value = op(&mut snapshot)?;
        snapshot.generated_at = Utc::now();
        write_json(&self.tasks_path(), &snapshot)?;
        debug!(lock = %lock.path().display(), tasks = snapshot.tasks.len(), "snapshot written");
        Ok(value)
    }

    fn read_snapshot(&self) -> Result<TaskSnapshot> {
        let snapshot: TaskSnapshot = read_json(&self.tasks_path())?;
        snapshot.graph().validate()?;
        Ok(snapshot)
    }

    fn lock(&self) -> Result<FileLock> {
        FileLock::acquire(
            lock::lock_path_for(&self.tasks_path()),
            self.config.storage.lock_timeout_ms,
        )
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::NotInitialized(self.root.clone()))
        }
    }
}

/// Write JSON data atomically (write to temp, then rename)
fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    lock::write_atomic(path, json.as_bytes())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    let data: T = serde_json::from_str(&content)?;
    Ok(data)
}
