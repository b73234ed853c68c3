//! Embedded relational store for the knowledge pipeline: `rusqlite` (bundled
//! SQLite) with WAL journalling, a BM25-ranked FTS5 index over
//! (title, content, tags), and a `knowledge_relations` table for same-session
//! links. Grounded in the richer of the two schemas the original implementation
//! shipped (`knowledge_entries`, not the older `knowledge` table) per §9's
//! unification note; readers of the legacy schema are migrated once on open.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::spawn_blocking;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("sqlite error at {path}: {source}")]
    Sqlite {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("knowledge db task panicked")]
    JoinError,
    #[error("import path must be under ~/.claude/data, ~/.claude, or the cwd: {0}")]
    UnsafeImportPath(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KnowledgeCategory {
    Learned,
    Pattern,
    Investigation,
    Decision,
    Fact,
}

impl KnowledgeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeCategory::Learned => "LEARNED",
            KnowledgeCategory::Pattern => "PATTERN",
            KnowledgeCategory::Investigation => "INVESTIGATION",
            KnowledgeCategory::Decision => "DECISION",
            KnowledgeCategory::Fact => "FACT",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_uppercase().as_str() {
            "LEARNED" => Some(KnowledgeCategory::Learned),
            "PATTERN" => Some(KnowledgeCategory::Pattern),
            "INVESTIGATION" => Some(KnowledgeCategory::Investigation),
            "DECISION" => Some(KnowledgeCategory::Decision),
            "FACT" => Some(KnowledgeCategory::Fact),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewKnowledgeEntry {
    pub category: KnowledgeCategory,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub confidence: f64,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeEntry {
    pub id: i64,
    pub category: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub confidence: f64,
    pub created_at: String,
    pub source: String,
    pub bm25_rank: f64,
}

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS knowledge_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    tags TEXT DEFAULT '',
    project TEXT DEFAULT NULL,
    confidence REAL DEFAULT 0.5,
    source TEXT DEFAULT 'pipeline',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    expires_at TEXT DEFAULT NULL
);
CREATE INDEX IF NOT EXISTS idx_knowledge_category ON knowledge_entries(category);
CREATE INDEX IF NOT EXISTS idx_knowledge_project ON knowledge_entries(project);
CREATE INDEX IF NOT EXISTS idx_knowledge_created_at ON knowledge_entries(created_at);

CREATE VIRTUAL TABLE IF NOT EXISTS knowledge_fts USING fts5(
    title, content, tags,
    content='knowledge_entries', content_rowid='id',
    tokenize='porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS knowledge_ai AFTER INSERT ON knowledge_entries BEGIN
    INSERT INTO knowledge_fts(rowid, title, content, tags)
    VALUES (new.id, new.title, new.content, new.tags);
END;
CREATE TRIGGER IF NOT EXISTS knowledge_ad AFTER DELETE ON knowledge_entries BEGIN
    INSERT INTO knowledge_fts(knowledge_fts, rowid, title, content, tags)
    VALUES ('delete', old.id, old.title, old.content, old.tags);
END;
CREATE TRIGGER IF NOT EXISTS knowledge_au AFTER UPDATE ON knowledge_entries BEGIN
    INSERT INTO knowledge_fts(knowledge_fts, rowid, title, content, tags)
    VALUES ('delete', old.id, old.title, old.content, old.tags);
    INSERT INTO knowledge_fts(rowid, title, content, tags)
    VALUES (new.id, new.title, new.content, new.tags);
END;

CREATE TABLE IF NOT EXISTS knowledge_relations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_id INTEGER NOT NULL REFERENCES knowledge_entries(id) ON DELETE CASCADE,
    to_id INTEGER NOT NULL REFERENCES knowledge_entries(id) ON DELETE CASCADE,
    relation_type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(from_id, to_id, relation_type)
);
CREATE INDEX IF NOT EXISTS idx_relations_from ON knowledge_relations(from_id);
CREATE INDEX IF NOT EXISTS idx_relations_to ON knowledge_relations(to_id);
"#;

/// Async-safe wrapper over a `rusqlite::Connection`: the connection is not `Send`
/// across await points, so every call is dispatched to a blocking thread via
/// `spawn_blocking` and the connection itself lives behind an `Arc<Mutex<_>>`.
#[derive(Clone)]
pub struct KnowledgeDb {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl KnowledgeDb {
    pub fn open(path: &Path) -> Result<Self, KnowledgeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| KnowledgeError::Sqlite {
                path: path.display().to_string(),
                source: rusqlite::Error::InvalidPath(source.to_string().into()),
            })?;
        }
        let conn = Connection::open(path).map_err(|source| KnowledgeError::Sqlite {
            path: path.display().to_string(),
            source,
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|source| KnowledgeError::Sqlite { path: path.display().to_string(), source })?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|source| KnowledgeError::Sqlite { path: path.display().to_string(), source })?;
        conn.execute_batch(SCHEMA)
            .map_err(|source| KnowledgeError::Sqlite { path: path.display().to_string(), source })?;
        migrate_legacy_schema_if_present(&conn);
        set_file_mode(path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
        })
    }

    async fn run<F, T>(&self, f: F) -> Result<T, KnowledgeError>
    where
        F: FnOnce(&Connection) -> Result<T, KnowledgeError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&guard)
        })
        .await
        .map_err(|_| KnowledgeError::JoinError)?
    }

    pub async fn insert_entry(&self, entry: NewKnowledgeEntry) -> Result<i64, KnowledgeError> {
        let path = self.path.display().to_string();
        self.run(move |conn| {
            let now = chrono::Utc::now().to_rfc3339();
            let tags = entry.tags.join(",");
            conn.execute(
                "INSERT INTO knowledge_entries (category, title, content, tags, project, confidence, source, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                rusqlite::params![
                    entry.category.as_str(),
                    entry.title,
                    entry.content,
                    tags,
                    entry.project,
                    entry.confidence,
                    entry.source,
                    now,
                ],
            )
            .map_err(|source| KnowledgeError::Sqlite { path: path.clone(), source })?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn insert_same_session_relations(&self, ids: &[i64]) -> Result<(), KnowledgeError> {
        let path = self.path.display().to_string();
        let ids = ids.to_vec();
        self.run(move |conn| {
            let now = chrono::Utc::now().to_rfc3339();
            for i in 0..ids.len() {
                for j in (i + 1)..ids.len() {
                    conn.execute(
                        "INSERT OR IGNORE INTO knowledge_relations (from_id, to_id, relation_type, created_at) \
                         VALUES (?1, ?2, 'same_session', ?3)",
                        rusqlite::params![ids[i], ids[j], now],
                    )
                    .map_err(|source| KnowledgeError::Sqlite { path: path.clone(), source })?;
                }
            }
            Ok(())
        })
        .await
    }

    /// BM25 full-text search, OR-combined over `terms`, filtered by category and
    /// lookback window. Lower `bm25_rank` is a better match (§3).
    pub async fn search(
        &self,
        terms: &[String],
        categories: &[KnowledgeCategory],
        lookback_days: i64,
        limit: usize,
    ) -> Result<Vec<KnowledgeEntry>, KnowledgeError> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let path = self.path.display().to_string();
        let query = build_fts_query(terms);
        let categories: Vec<String> = categories.iter().map(|c| c.as_str().to_string()).collect();
        let cutoff = (chrono::Utc::now() - chrono::Duration::days(lookback_days)).to_rfc3339();
        let now = chrono::Utc::now().to_rfc3339();

        self.run(move |conn| {
            let category_placeholders = categories.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!(
                "SELECT e.id, e.category, e.title, e.content, e.tags, e.confidence, e.created_at, e.source, \
                        bm25(knowledge_fts) AS bm25_rank \
                 FROM knowledge_fts \
                 JOIN knowledge_entries e ON e.id = knowledge_fts.rowid \
                 WHERE knowledge_fts MATCH ?1 \
                   AND e.category IN ({category_placeholders}) \
                   AND e.created_at > ?2 \
                   AND (e.expires_at IS NULL OR e.expires_at > ?3) \
                 ORDER BY bm25(knowledge_fts) \
                 LIMIT ?4"
            );
            let mut stmt = conn.prepare(&sql).map_err(|source| KnowledgeError::Sqlite { path: path.clone(), source })?;
            let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(query.clone()), Box::new(cutoff.clone()), Box::new(now.clone())];
            for category in &categories {
                params.push(Box::new(category.clone()));
            }
            params.push(Box::new(limit as i64));
            let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

            let rows = stmt
                .query_map(param_refs.as_slice(), row_to_entry)
                .map_err(|source| KnowledgeError::Sqlite { path: path.clone(), source })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|source| KnowledgeError::Sqlite { path: path.clone(), source })?);
            }
            Ok(out)
        })
        .await
    }

    /// Word-overlap dedup check (§8 P5, §4.H.3): fetch the top FTS matches for
    /// `content`'s leading words and test overlap ratio against each candidate.
    pub async fn is_duplicate(&self, content: &str, overlap_threshold: f64) -> Result<bool, KnowledgeError> {
        let words: Vec<String> = content
            .chars()
            .take(100)
            .collect::<String>()
            .split_whitespace()
            .filter(|w| w.len() > 3)
            .map(|w| w.to_lowercase())
            .take(8)
            .collect();
        if words.is_empty() {
            return Ok(false);
        }
        let path = self.path.display().to_string();
        let query = words.join(" OR ");
        let new_words: std::collections::HashSet<String> =
            content.to_lowercase().split_whitespace().map(str::to_string).collect();

        self.run(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT e.content FROM knowledge_fts f \
                     JOIN knowledge_entries e ON f.rowid = e.id \
                     WHERE knowledge_fts MATCH ?1 ORDER BY bm25(knowledge_fts) LIMIT 3",
                )
                .map_err(|source| KnowledgeError::Sqlite { path: path.clone(), source })?;
            let rows = stmt
                .query_map([&query], |row| row.get::<_, String>(0))
                .map_err(|source| KnowledgeError::Sqlite { path: path.clone(), source })?;

            for row in rows {
                let existing = row.map_err(|source| KnowledgeError::Sqlite { path: path.clone(), source })?;
                let existing_words: std::collections::HashSet<String> =
                    existing.to_lowercase().split_whitespace().map(str::to_string).collect();
                if new_words.is_empty() {
                    continue;
                }
                let overlap = existing_words.intersection(&new_words).count() as f64 / new_words.len() as f64;
                if overlap > overlap_threshold {
                    return Ok(true);
                }
            }
            Ok(false)
        })
        .await
    }

    pub async fn count_entries(&self) -> Result<i64, KnowledgeError> {
        let path = self.path.display().to_string();
        self.run(move |conn| {
            conn.query_row("SELECT COUNT(*) FROM knowledge_entries", [], |row| row.get(0))
                .map_err(|source| KnowledgeError::Sqlite { path: path.clone(), source })
        })
        .await
    }

    /// Dumps every entry in insertion order, for the `export` admin subcommand.
    pub async fn export_all(&self) -> Result<Vec<NewKnowledgeEntry>, KnowledgeError> {
        let path = self.path.display().to_string();
        self.run(move |conn| {
            let mut stmt = conn
                .prepare("SELECT category, title, content, tags, project, confidence, source FROM knowledge_entries ORDER BY id")
                .map_err(|source| KnowledgeError::Sqlite { path: path.clone(), source })?;
            let rows = stmt
                .query_map([], |row| {
                    let category: String = row.get(0)?;
                    let tags_raw: String = row.get(3)?;
                    Ok(NewKnowledgeEntry {
                        category: KnowledgeCategory::parse(&category).unwrap_or(KnowledgeCategory::Fact),
                        title: row.get(1)?,
                        content: row.get(2)?,
                        tags: tags_raw.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect(),
                        project: row.get(4)?,
                        confidence: row.get(5)?,
                        source: row.get(6)?,
                    })
                })
                .map_err(|source| KnowledgeError::Sqlite { path: path.clone(), source })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|source| KnowledgeError::Sqlite { path: path.clone(), source })?);
            }
            Ok(out)
        })
        .await
    }

    /// Inserts every entry from a prior `export_all`, for the `import` admin
    /// subcommand. Each entry gets a fresh id and timestamp; no dedup against
    /// existing rows is attempted here, that's the knowledge pipeline's job.
    pub async fn import_entries(&self, entries: Vec<NewKnowledgeEntry>) -> Result<usize, KnowledgeError> {
        let mut imported = 0;
        for entry in entries {
            self.insert_entry(entry).await?;
            imported += 1;
        }
        Ok(imported)
    }
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<KnowledgeEntry> {
    let tags_raw: String = row.get(4)?;
    Ok(KnowledgeEntry {
        id: row.get(0)?,
        category: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        tags: tags_raw.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect(),
        confidence: row.get(5)?,
        created_at: row.get(6)?,
        source: row.get(7)?,
        bm25_rank: row.get(8)?,
    })
}

fn build_fts_query(terms: &[String]) -> String {
    terms.iter().take(10).cloned().collect::<Vec<_>>().join(" OR ")
}

/// One-shot migration from the older `knowledge` table (content/tag/context/
/// session_id columns) into `knowledge_entries`, if present and not yet migrated.
/// §9: two modules wrote slightly different schemas; this keeps legacy readers
/// working by adopting the richer schema as the single source of truth.
fn migrate_legacy_schema_if_present(conn: &Connection) {
    let legacy_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='knowledge'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|count| count > 0)
        .unwrap_or(false);
    if !legacy_exists {
        return;
    }

    let already_migrated: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM knowledge_entries WHERE source LIKE 'migrated:legacy%'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|count| count > 0)
        .unwrap_or(true);
    if already_migrated {
        return;
    }

    let _ = conn.execute_batch(
        "INSERT INTO knowledge_entries (category, title, content, tags, project, confidence, source, created_at, updated_at) \
         SELECT tag, substr(content, 1, 80), content, '', NULL, 0.5, 'migrated:legacy:' || COALESCE(session_id, 'unknown'), timestamp, timestamp \
         FROM knowledge;",
    );
}

/// Validates that `path` resolves under `~/.claude/data`, `~/.claude`, or the
/// current working directory, and contains no `..` traversal, before any CLI
/// import reads it (§9 supplement, grounded in `validate_import_path`).
pub fn validate_import_path(path: &Path, data_root: &Path, cwd: &Path) -> Result<PathBuf, KnowledgeError> {
    let raw = path.display().to_string();
    if raw.contains("..") {
        return Err(KnowledgeError::UnsafeImportPath(raw));
    }
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };

    let allowed = [data_root.join("data"), data_root.to_path_buf(), cwd.to_path_buf()];
    if allowed.iter().any(|dir| resolved.starts_with(dir)) {
        Ok(resolved)
    } else {
        Err(KnowledgeError::UnsafeImportPath(raw))
    }
}

#[cfg(unix)]
fn set_file_mode(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(content: &str) -> NewKnowledgeEntry {
        NewKnowledgeEntry {
            category: KnowledgeCategory::Learned,
            title: content.chars().take(80).collect(),
            content: content.to_string(),
            tags: vec!["testing".to_string()],
            project: None,
            confidence: 0.8,
            source: "pipeline".to_string(),
        }
    }

    #[tokio::test]
    async fn insert_then_search_finds_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = KnowledgeDb::open(&dir.path().join("knowledge.db")).expect("open");
        db.insert_entry(entry("Always check file existence before editing")).await.expect("insert");

        let results = db
            .search(
                &["existence".to_string()],
                &[KnowledgeCategory::Learned],
                30,
                5,
            )
            .await
            .expect("search");
        assert_eq!(results.len(), 1);
        assert!(results[0].content.contains("existence"));
    }

    #[tokio::test]
    async fn duplicate_detection_catches_high_word_overlap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = KnowledgeDb::open(&dir.path().join("knowledge.db")).expect("open");
        db.insert_entry(entry("Always check file existence before editing")).await.expect("insert");

        let duplicate = db
            .is_duplicate("Always check file existence before editing anything", 0.70)
            .await
            .expect("dedup check");
        assert!(duplicate);
    }

    #[tokio::test]
    async fn count_entries_reflects_inserts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = KnowledgeDb::open(&dir.path().join("knowledge.db")).expect("open");
        assert_eq!(db.count_entries().await.expect("count"), 0);
        db.insert_entry(entry("first learning")).await.expect("insert");
        assert_eq!(db.count_entries().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn same_session_relations_link_every_pair() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = KnowledgeDb::open(&dir.path().join("knowledge.db")).expect("open");
        let a = db.insert_entry(entry("entry a")).await.expect("insert a");
        let b = db.insert_entry(entry("entry b")).await.expect("insert b");
        let c = db.insert_entry(entry("entry c")).await.expect("insert c");
        db.insert_same_session_relations(&[a, b, c]).await.expect("relations");
        // Idempotent under retry: inserting again must not error (UNIQUE + OR IGNORE).
        db.insert_same_session_relations(&[a, b, c]).await.expect("relations again");
    }

    #[test]
    fn import_path_outside_allowlist_is_rejected() {
        let data_root = Path::new("/home/user/.claude");
        let cwd = Path::new("/home/user/project");
        let result = validate_import_path(Path::new("/etc/passwd"), data_root, cwd);
        assert!(matches!(result, Err(KnowledgeError::UnsafeImportPath(_))));
    }

    #[test]
    fn import_path_traversal_is_rejected() {
        let data_root = Path::new("/home/user/.claude");
        let cwd = Path::new("/home/user/project");
        let result = validate_import_path(Path::new("../../../etc/passwd"), data_root, cwd);
        assert!(matches!(result, Err(KnowledgeError::UnsafeImportPath(_))));
    }

    #[tokio::test]
    async fn export_then_import_round_trips_into_a_fresh_database() {
        let source_dir = tempfile::tempdir().expect("tempdir");
        let source = KnowledgeDb::open(&source_dir.path().join("knowledge.db")).expect("open source");
        source.insert_entry(entry("Always check file existence before editing")).await.expect("insert");

        let exported = source.export_all().await.expect("export");
        assert_eq!(exported.len(), 1);

        let target_dir = tempfile::tempdir().expect("tempdir");
        let target = KnowledgeDb::open(&target_dir.path().join("knowledge.db")).expect("open target");
        let imported = target.import_entries(exported).await.expect("import");
        assert_eq!(imported, 1);
        assert_eq!(target.count_entries().await.expect("count"), 1);
    }

    #[test]
    fn import_path_under_cwd_is_allowed() {
        let data_root = Path::new("/home/user/.claude");
        let cwd = Path::new("/home/user/project");
        let result = validate_import_path(Path::new("export.json"), data_root, cwd);
        assert!(result.is_ok());
    }
}
