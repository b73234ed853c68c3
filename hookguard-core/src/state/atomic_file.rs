use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AtomicFileError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {path} is corrupted: {source}")]
    Corrupted {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Reads a whole-file JSON document under a shared lock. Returns `Ok(None)` if the
/// file does not exist yet (callers should substitute a default).
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, AtomicFileError> {
    let file = match OpenOptions::new().read(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(AtomicFileError::Io {
                path: path.display().to_string(),
                source,
            });
        }
    };
    file.lock_shared().map_err(|source| AtomicFileError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut contents = String::new();
    let mut guarded = file;
    guarded
        .read_to_string(&mut contents)
        .map_err(|source| AtomicFileError::Io {
            path: path.display().to_string(),
            source,
        })?;
    FileExt::unlock(&guarded).ok();

    if contents.trim().is_empty() {
        return Ok(None);
    }

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| AtomicFileError::Corrupted {
            path: path.display().to_string(),
            source,
        })
}

/// Reads, mutates, and writes a JSON document as one critical section: a single
/// exclusive lock is held across the read, the caller's `mutate` closure, and
/// the temp-file-rename write. This closes the TOCTOU window a separate
/// `read_json` + `write_json` pair leaves open between unlocking after the read
/// and re-locking for the write, where a second process can interleave its own
/// full read-mutate-write cycle and clobber the first one's update. Missing
/// files read as `T::default()`.
pub fn with_locked_file<T, R>(path: &Path, mutate: impl FnOnce(&mut T) -> R) -> Result<R, AtomicFileError>
where
    T: DeserializeOwned + Serialize + Default,
{
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|source| AtomicFileError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| AtomicFileError::Io {
            path: path.display().to_string(),
            source,
        })?;
    file.lock_exclusive().map_err(|source| AtomicFileError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let mut contents = String::new();
    (&file).read_to_string(&mut contents).map_err(|source| AtomicFileError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let mut value: T = if contents.trim().is_empty() {
        T::default()
    } else {
        serde_json::from_str(&contents).map_err(|source| AtomicFileError::Corrupted {
            path: path.display().to_string(),
            source,
        })?
    };

    let result = mutate(&mut value);

    let serialized = serde_json::to_vec_pretty(&value).map_err(|source| AtomicFileError::Corrupted {
        path: path.display().to_string(),
        source,
    })?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|source| AtomicFileError::Io {
        path: path.display().to_string(),
        source,
    })?;
    temp.write_all(&serialized)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|source| AtomicFileError::Io {
            path: path.display().to_string(),
            source,
        })?;
    temp.persist(path).map_err(|err| AtomicFileError::Io {
        path: path.display().to_string(),
        source: err.error,
    })?;

    set_file_mode(path, 0o600).map_err(|source| AtomicFileError::Io {
        path: path.display().to_string(),
        source,
    })?;

    FileExt::unlock(&file).ok();
    Ok(result)
}

/// Writes `value` to `path` atomically: serialize to a temp file in the same
/// directory, fsync, then rename over the destination. The rename step is
/// performed while holding an exclusive lock on the destination path (created if
/// absent) so concurrent writers serialize even though each writes its own temp
/// file.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AtomicFileError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|source| AtomicFileError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|source| AtomicFileError::Io {
            path: path.display().to_string(),
            source,
        })?;
    lock_file
        .lock_exclusive()
        .map_err(|source| AtomicFileError::Io {
            path: path.display().to_string(),
            source,
        })?;

    let serialized = serde_json::to_vec_pretty(value).map_err(|source| AtomicFileError::Corrupted {
        path: path.display().to_string(),
        source,
    })?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|source| AtomicFileError::Io {
        path: path.display().to_string(),
        source,
    })?;
    temp.write_all(&serialized)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|source| AtomicFileError::Io {
            path: path.display().to_string(),
            source,
        })?;
    temp.persist(path)
        .map_err(|err| AtomicFileError::Io {
            path: path.display().to_string(),
            source: err.error,
        })?;

    set_file_mode(path, 0o600).map_err(|source| AtomicFileError::Io {
        path: path.display().to_string(),
        source,
    })?;

    FileExt::unlock(&lock_file).ok();
    Ok(())
}

#[cfg(unix)]
fn set_file_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

// Re-exported for the `File` type bound above, kept unused otherwise.
#[allow(unused_imports)]
use File as _;
