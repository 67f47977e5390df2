//! JSON state file for the CLI.
//!
//! A data directory holds `state.json`: the tasks (oldest first) and the
//! agent ledgers (keyed by agent id) in one document. The file is replaced by
//! writing a sibling temp file and renaming it over the original, so readers
//! always see one complete snapshot.
//!
//! Commands that change state must hold a [`StateLock`] from load to save.
//! The lock is a `.lock` file created exclusively in the data directory and
//! removed when the guard drops.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use guild_coordinator::AssignmentEngine;
use guild_core::{AgentRecord, Error, Result, Task};

const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = ".lock";
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// On-disk document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default)]
    agents: BTreeMap<String, AgentRecord>,
}

/// Location of the persisted task and agent records.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    /// Use `root` as the data directory. Nothing is touched until load,
    /// lock or save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the state file.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    /// Path of the lock file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// Restore the persisted records into a fresh engine. A missing file
    /// counts as empty.
    ///
    /// This reads one consistent snapshot but does not stop another command
    /// from saving afterwards; use [`StateDir::lock`] before changing state.
    ///
    /// # Errors
    ///
    /// Returns `Error::FileAccess` for an unreadable file,
    /// `Error::Serialization` for malformed JSON and `Error::Validation` for
    /// records that break an invariant.
    pub async fn load_into(&self, engine: &AssignmentEngine) -> Result<()> {
        let path = self.state_path();
        let state: StateFile = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| Error::serialization(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::file_access(&path, e.to_string())),
        };

        if let Some((key, agent)) = state.agents.iter().find(|(key, agent)| **key != agent.id) {
            return Err(Error::validation(format!(
                "{STATE_FILE} agent key '{key}' holds record for '{}'",
                agent.id
            )));
        }

        engine.tasks().restore(state.tasks).await?;
        engine
            .agents()
            .restore(state.agents.into_values().collect())
            .await?;
        Ok(())
    }

    /// Take the data directory lock, waiting up to `timeout` for another
    /// command to release it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Conflict` if the lock is still held after `timeout`
    /// and `Error::FileAccess` if the directory or lock file cannot be
    /// created.
    pub async fn lock(&self, timeout: Duration) -> Result<StateLock> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::file_access(&self.root, e.to_string()))?;

        let path = self.lock_path();
        match tokio::time::timeout(timeout, self.acquire(&path)).await {
            Ok(lock) => lock,
            Err(_) => Err(Error::conflict(
                path.display().to_string(),
                "data directory is locked by another command; \
                 remove the lock file if no command is running",
            )),
        }
    }

    async fn acquire(&self, path: &Path) -> Result<StateLock> {
        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .await
            {
                Ok(mut file) => {
                    // Guard first so a cancelled wait still removes the file.
                    let lock = StateLock {
                        dir: self.clone(),
                        path: path.to_path_buf(),
                    };
                    let owner = format!("{}\n", std::process::id());
                    if let Err(e) = file.write_all(owner.as_bytes()).await {
                        debug!(path = %path.display(), error = %e, "Could not record lock owner");
                    }
                    debug!(path = %path.display(), "Data directory locked");
                    return Ok(lock);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tokio::time::sleep(LOCK_POLL_INTERVAL).await;
                }
                Err(e) => return Err(Error::file_access(path, e.to_string())),
            }
        }
    }
}

/// Exclusive hold on a data directory. Released on drop.
#[derive(Debug)]
pub struct StateLock {
    dir: StateDir,
    path: PathBuf,
}

impl StateLock {
    /// Restore the persisted records into a fresh engine.
    ///
    /// # Errors
    ///
    /// As [`StateDir::load_into`].
    pub async fn load_into(&self, engine: &AssignmentEngine) -> Result<()> {
        self.dir.load_into(engine).await
    }

    /// Persist every record held by `engine` with a single rename.
    ///
    /// # Errors
    ///
    /// Returns `Error::FileAccess` if the file cannot be written.
    pub async fn save(&self, engine: &AssignmentEngine) -> Result<()> {
        let state = StateFile {
            tasks: engine.tasks().snapshot().await?,
            agents: engine
                .agents()
                .snapshot()
                .await?
                .into_iter()
                .map(|agent| (agent.id.clone(), agent))
                .collect(),
        };
        write_json_atomic(&self.dir.state_path(), &state).await?;

        debug!(
            root = %self.dir.root.display(),
            tasks = state.tasks.len(),
            agents = state.agents.len(),
            "State saved"
        );
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release data directory lock");
        }
    }
}

async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");

    tokio::fs::write(&tmp, content)
        .await
        .map_err(|e| Error::file_access(&tmp, e.to_string()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::file_access(path, e.to_string()))
}
