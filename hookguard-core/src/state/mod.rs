//! Persistent state store: atomic JSON files, append-only JSONL logs, and the
//! embedded knowledge database all live under a single root directory.

mod atomic_file;
mod jsonl;
mod lock_registry;

pub use atomic_file::{AtomicFileError, read_json, with_locked_file, write_json};
pub use jsonl::{JsonlError, append_line, read_lines};
pub use lock_registry::LockRegistry;

use std::path::{Path, PathBuf};

/// Root of all persisted hookguard state, default `~/.claude`.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
    locks: LockRegistry,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        set_dir_mode(&root, 0o700)?;
        Ok(Self {
            root,
            locks: LockRegistry::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn hook_state_path(&self) -> PathBuf {
        self.path("hook_state.json")
    }

    pub fn guardrails_config_path(&self) -> PathBuf {
        self.path("guardrails.yaml")
    }

    pub fn hooks_registry_path(&self) -> PathBuf {
        self.path("hooks.yaml")
    }

    pub fn observations_path(&self) -> PathBuf {
        self.path("observations.jsonl")
    }

    pub fn pending_learnings_path(&self) -> PathBuf {
        self.path("pending_learnings.json")
    }

    pub fn processed_learnings_path(&self) -> PathBuf {
        self.path("pending_learnings.processed.json")
    }

    pub fn knowledge_db_path(&self) -> PathBuf {
        let dir = self.path("data/knowledge-db");
        dir.join("knowledge.db")
    }

    pub fn session_progress_path(&self, session_id: &str) -> PathBuf {
        self.path(&format!("data/sessions/{session_id}.json"))
    }

    pub fn cold_task_summary_path(&self, session_id: &str, task_id: &str) -> PathBuf {
        let digest = format!("{:x}", md5::compute(format!("{session_id}{task_id}")));
        let short = &digest[..12];
        self.path(&format!("data/compressed_context/{short}.json"))
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }
}

#[cfg(unix)]
fn set_dir_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_dir_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_expected_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path()).expect("store");
        assert_eq!(store.hook_state_path(), dir.path().join("hook_state.json"));
        assert!(
            store
                .cold_task_summary_path("s1", "t1")
                .to_string_lossy()
                .contains("data/compressed_context/")
        );
    }
}
