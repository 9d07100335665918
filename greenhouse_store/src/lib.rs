//! Crash-durable persistence of per-actuator position estimates (C2
//! StateStore).
//!
//! Grounded on `evo_common::config::ConfigLoader`'s fail-fast load pattern
//! and `evo_shared_memory::writer::SegmentWriter`'s exclusive-writer
//! discipline, generalized from a memory-mapped segment to a plain JSON
//! file: the `rename` of a freshly-written temp file is the linearization
//! point, the same role the header version bump plays for a shared-memory
//! segment.
//!
//! The persisted file carries a `clean_shutdown` flag alongside the
//! per-actuator map (see `load`/`mark_clean_shutdown`) so the scheduler can
//! tell an orderly restart from a crash.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use greenhouse_common::state::ActuatorState;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

/// Errors from the state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state store snapshot is corrupt: {0}")]
    Corrupt(String),
}

/// On-disk shape of the persisted snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedSnapshot {
    /// `false` while the process that wrote this file is (or was, at last
    /// check, still) running; only ever `true` immediately after an
    /// orderly shutdown. See [`StateStore::mark_clean_shutdown`].
    #[serde(default)]
    clean_shutdown: bool,
    #[serde(default)]
    actuators: HashMap<String, ActuatorState>,
}

/// The outcome of [`StateStore::load`].
#[derive(Debug, Clone)]
pub struct LoadedSnapshot {
    /// Whether the previous process exited cleanly. `false` means the
    /// restored positions must be treated as stale (spec.md §4.2): the
    /// scheduler should force an immediate calibration before honouring
    /// any L3/L4 command. A missing file (first run) counts as clean —
    /// there is nothing to distrust.
    pub was_clean_shutdown: bool,
    /// Restored per-actuator state, keyed by actuator id.
    pub actuators: HashMap<String, ActuatorState>,
}

/// Crash-durable, write-through store of per-actuator state.
///
/// Keyed by actuator id. The whole snapshot lives in memory behind a lock
/// and is rewritten to disk on every `put`/`mark_clean_shutdown` call via
/// write-temp-then-rename, so a crash mid-write never leaves a truncated
/// file on the target path (the old file, or nothing, is all a reader can
/// ever observe).
pub struct StateStore {
    path: PathBuf,
    inner: Mutex<PersistedSnapshot>,
}

impl StateStore {
    /// Open a store at `path`. Does not touch disk until [`Self::load`] is
    /// called.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: Mutex::new(PersistedSnapshot::default()),
        }
    }

    /// Load the snapshot from disk, immediately marking it dirty
    /// (`clean_shutdown = false`) so that if this process now crashes, the
    /// *next* restart sees a dirty marker too.
    ///
    /// A missing file is not an error: it yields an empty, clean snapshot
    /// (spec.md §4.2, "missing file yields an empty snapshot").
    pub fn load(&self) -> Result<LoadedSnapshot, StoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut guard = self.inner.lock();
                *guard = PersistedSnapshot::default();
                return Ok(LoadedSnapshot {
                    was_clean_shutdown: true,
                    actuators: HashMap::new(),
                });
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        let persisted: PersistedSnapshot = serde_json::from_str(&contents)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let was_clean_shutdown = persisted.clean_shutdown;

        {
            let mut guard = self.inner.lock();
            *guard = persisted.clone();
            guard.clean_shutdown = false;
        }
        self.persist_locked(&self.inner.lock())?;

        Ok(LoadedSnapshot {
            was_clean_shutdown,
            actuators: persisted.actuators,
        })
    }

    /// Atomically update one actuator's state and write the whole snapshot
    /// through to disk. The in-memory map is always updated even if the
    /// write fails (`PERSIST_IO`, spec.md §7): the scheduler proceeds and
    /// the next transition retries the write.
    pub fn put(&self, id: &str, state: ActuatorState) {
        {
            let mut guard = self.inner.lock();
            guard.actuators.insert(id.to_string(), state);
        }
        if let Err(e) = self.persist_locked(&self.inner.lock()) {
            error!(actuator_id = id, error = %e, "state persistence failed, continuing in-memory");
        }
    }

    /// A consistent, point-in-time view of every actuator's state.
    pub fn snapshot(&self) -> HashMap<String, ActuatorState> {
        self.inner.lock().actuators.clone()
    }

    /// Mark the current snapshot as the result of an orderly shutdown.
    /// Called by the supervisor's Ctrl-C handler before exiting.
    pub fn mark_clean_shutdown(&self) -> Result<(), StoreError> {
        {
            let mut guard = self.inner.lock();
            guard.clean_shutdown = true;
        }
        self.persist_locked(&self.inner.lock())
    }

    /// Serialize the current in-memory snapshot and atomically replace the
    /// target file: write to a sibling `.tmp` path, then `rename` over the
    /// target. The rename is the linearization point — a reader never sees
    /// a partially-written file.
    fn persist_locked(&self, snapshot: &PersistedSnapshot) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = tmp_path_for(&self.path);
        std::fs::write(&tmp_path, &json)?;
        match std::fs::rename(&tmp_path, &self.path) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "atomic rename of state snapshot failed");
                let _ = std::fs::remove_file(&tmp_path);
                Err(StoreError::Io(e))
            }
        }
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
