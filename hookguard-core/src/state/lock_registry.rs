use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Per-process registry of path-keyed mutexes, layered under the OS-level advisory
/// lock taken on the file itself. This lets multiple async tasks within a single
/// runtime invocation serialize against the same file without the inter-process
/// `fcntl`/`flock` call deadlocking against a lock this same process already holds.
#[derive(Debug, Clone, Default)]
pub struct LockRegistry {
    inner: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl LockRegistry {
    pub fn handle_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let canonical = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());
        let mut map = self.inner.lock();
        map.entry(canonical).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_path_returns_same_handle() {
        let registry = LockRegistry::default();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("f.json");
        std::fs::write(&path, "{}").expect("write");
        let a = registry.handle_for(&path);
        let b = registry.handle_for(&path);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
