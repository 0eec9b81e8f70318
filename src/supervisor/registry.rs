//! Session registry
//!
//! Maps a session identifier to the one live process running for it. Uses
//! DashMap's entry API so check-and-insert is atomic.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::events::now_timestamp;
use crate::types::{Result, SupervisorError};

/// A live process bound to a session
#[derive(Debug, Clone)]
pub struct RegisteredProcess {
    /// Unique per run, so a stale run never evicts a newer one
    pub run_id: Uuid,
    pub session_id: String,
    pub pid: u32,
    pub started_at: String,
    pub cwd: PathBuf,
    cancel: CancellationToken,
}

impl RegisteredProcess {
    pub fn new(
        session_id: impl Into<String>,
        pid: u32,
        cwd: impl AsRef<Path>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            session_id: session_id.into(),
            pid,
            started_at: now_timestamp(),
            cwd: cwd.as_ref().to_path_buf(),
            cancel,
        }
    }

    /// Ask the owning run to terminate its process
    ///
    /// Returns false if termination was already requested.
    pub fn request_termination(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    /// Serializable snapshot
    pub fn info(&self) -> ProcessInfo {
        ProcessInfo {
            session_id: self.session_id.clone(),
            pid: self.pid,
            started_at: self.started_at.clone(),
            cwd: self.cwd.clone(),
        }
    }
}

/// Snapshot of a registered process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub session_id: String,
    pub pid: u32,
    pub started_at: String,
    pub cwd: PathBuf,
}

/// Registry of live processes keyed by session identifier
#[derive(Debug, Default)]
pub struct SessionRegistry {
    processes: DashMap<String, RegisteredProcess>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            processes: DashMap::new(),
        }
    }

    /// Register a process; fails if the session already has one
    pub fn register(&self, process: RegisteredProcess) -> Result<()> {
        match self.processes.entry(process.session_id.clone()) {
            dashmap::Entry::Occupied(_) => {
                Err(SupervisorError::session_already_active(process.session_id))
            }
            dashmap::Entry::Vacant(vacant) => {
                tracing::debug!(
                    session_id = %process.session_id,
                    pid = process.pid,
                    "Registered process"
                );
                vacant.insert(process);
                Ok(())
            }
        }
    }

    /// Remove the entry for `session_id` only if it belongs to `run_id`
    ///
    /// Returns false when the entry is already gone (aborted, or replaced by a
    /// newer run). Calling it twice is harmless.
    pub fn remove_run(&self, session_id: &str, run_id: Uuid) -> bool {
        self.processes
            .remove_if(session_id, |_, p| p.run_id == run_id)
            .is_some()
    }

    /// Remove and return whatever is registered for `session_id`
    pub fn take(&self, session_id: &str) -> Option<RegisteredProcess> {
        self.processes.remove(session_id).map(|(_, p)| p)
    }

    /// Remove and return every registered process
    pub fn drain(&self) -> Vec<RegisteredProcess> {
        let ids: Vec<String> = self.processes.iter().map(|r| r.key().clone()).collect();
        ids.iter().filter_map(|id| self.take(id)).collect()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.processes.contains_key(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<ProcessInfo> {
        self.processes.get(session_id).map(|r| r.info())
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Snapshots of every registered process
    pub fn list(&self) -> Vec<ProcessInfo> {
        self.processes.iter().map(|r| r.info()).collect()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.processes.iter().map(|r| r.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(session_id: &str) -> (RegisteredProcess, CancellationToken) {
        let token = CancellationToken::new();
        (
            RegisteredProcess::new(session_id, 4242, "/tmp", token.clone()),
            token,
        )
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = SessionRegistry::new();
        assert!(registry.is_empty());

        let (process, _) = entry("s1");
        registry.register(process).unwrap();

        assert!(registry.contains("s1"));
        assert_eq!(registry.len(), 1);
        let info = registry.get("s1").unwrap();
        assert_eq!(info.pid, 4242);
        assert_eq!(info.cwd, PathBuf::from("/tmp"));
        assert_eq!(registry.session_ids(), vec!["s1".to_string()]);
    }

    #[test]
    fn test_duplicate_session_rejected() {
        let registry = SessionRegistry::new();
        let (first, _) = entry("s1");
        let (second, _) = entry("s1");

        registry.register(first).unwrap();
        let err = registry.register(second).unwrap_err();
        assert!(matches!(err, SupervisorError::SessionAlreadyActive(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_run_is_idempotent() {
        let registry = SessionRegistry::new();
        let (process, _) = entry("s1");
        let run_id = process.run_id;
        registry.register(process).unwrap();

        assert!(registry.remove_run("s1", run_id));
        assert!(!registry.remove_run("s1", run_id));
        assert!(!registry.contains("s1"));
    }

    #[test]
    fn test_stale_run_does_not_evict_newer_run() {
        let registry = SessionRegistry::new();
        let (old, _) = entry("s1");
        let old_run = old.run_id;
        registry.register(old).unwrap();
        registry.take("s1").unwrap();

        let (new, _) = entry("s1");
        registry.register(new).unwrap();

        assert!(!registry.remove_run("s1", old_run));
        assert!(registry.contains("s1"));
    }

    #[test]
    fn test_request_termination_once() {
        let (process, token) = entry("s1");
        assert!(process.request_termination());
        assert!(token.is_cancelled());
        assert!(!process.request_termination());
    }

    #[test]
    fn test_drain() {
        let registry = SessionRegistry::new();
        registry.register(entry("a").0).unwrap();
        registry.register(entry("b").0).unwrap();

        let mut drained: Vec<String> = registry.drain().into_iter().map(|p| p.session_id).collect();
        drained.sort();
        assert_eq!(drained, vec!["a", "b"]);
        assert!(registry.is_empty());
    }
}
