use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JsonlError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Appends one JSON-serialized line to `path`, creating it with mode 0600 if
/// absent. Acquires an exclusive lock for the duration of the append.
pub fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<(), JsonlError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| JsonlError::Io {
            path: path.display().to_string(),
            source,
        })?;
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| JsonlError::Io {
            path: path.display().to_string(),
            source,
        })?;
    file.lock_exclusive().map_err(|source| JsonlError::Io {
        path: path.display().to_string(),
        source,
    })?;
    set_file_mode(path, 0o600).ok();

    let mut line = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    line.push('\n');
    let mut writer = &file;
    writer
        .write_all(line.as_bytes())
        .map_err(|source| JsonlError::Io {
            path: path.display().to_string(),
            source,
        })?;
    FileExt::unlock(&file).ok();
    Ok(())
}

/// Reads every line in `path` as a `T`, skipping malformed lines with a debug log
/// rather than failing the whole read. Acquires a shared lock while reading.
pub fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, JsonlError> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(JsonlError::Io {
                path: path.display().to_string(),
                source,
            });
        }
    };
    file.lock_shared().map_err(|source| JsonlError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let reader = BufReader::new(&file);
    let mut out = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| JsonlError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(value) => out.push(value),
            Err(error) => {
                tracing::debug!(path = %path.display(), line_no, %error, "skipping unparseable jsonl line");
            }
        }
    }
    FileExt::unlock(&file).ok();
    Ok(out)
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Obs {
        tag: String,
    }

    #[test]
    fn appends_and_reads_back_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log.jsonl");
        append_line(&path, &Obs { tag: "a".into() }).expect("append");
        append_line(&path, &Obs { tag: "b".into() }).expect("append");
        let lines: Vec<Obs> = read_lines(&path).expect("read");
        assert_eq!(lines, vec![Obs { tag: "a".into() }, Obs { tag: "b".into() }]);
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log.jsonl");
        std::fs::write(&path, "{\"tag\":\"a\"}\nnot json\n{\"tag\":\"b\"}\n").expect("write");
        let lines: Vec<Obs> = read_lines(&path).expect("read");
        assert_eq!(lines, vec![Obs { tag: "a".into() }, Obs { tag: "b".into() }]);
    }
}
