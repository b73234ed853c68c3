//! Knowledge database export/import: the only CLI surface that reaches
//! `validate_import_path` (§9 supplement), driven through the compiled binary
//! rather than the library directly.

#[path = "support/mod.rs"]
mod support;

use hookguard_core::knowledge::{KnowledgeCategory, KnowledgeDb, NewKnowledgeEntry};
use predicates::prelude::*;
use tempfile::TempDir;

fn entry(title: &str) -> NewKnowledgeEntry {
    NewKnowledgeEntry {
        category: KnowledgeCategory::Learned,
        title: title.to_string(),
        content: format!("content for {title}"),
        tags: vec![],
        project: None,
        confidence: 0.8,
        source: "pipeline".to_string(),
    }
}

#[tokio::test]
async fn export_then_import_round_trips_an_entry_through_the_binary() {
    let source_root = TempDir::new().expect("tempdir");
    let db = KnowledgeDb::open(&source_root.path().join("data/knowledge-db/knowledge.db")).expect("open db");
    db.insert_entry(entry("Always check file existence before editing")).await.expect("seed entry");
    drop(db);

    let export_path = source_root.path().join("export.json");
    support::hookguard_cmd(source_root.path())
        .args(["export", &export_path.to_string_lossy()])
        .assert()
        .success()
        .stdout(predicate::str::contains("exported 1 entries"));

    let exported = std::fs::read_to_string(&export_path).expect("read export file");
    assert!(exported.contains("Always check file existence before editing"));

    let target_root = TempDir::new().expect("tempdir");
    let import_path = target_root.path().join("import.json");
    std::fs::copy(&export_path, &import_path).expect("copy export into target data root");

    support::hookguard_cmd(target_root.path())
        .args(["import", &import_path.to_string_lossy()])
        .assert()
        .success()
        .stdout(predicate::str::contains("imported 1 entries"));

    let reexported = target_root.path().join("reexport.json");
    support::hookguard_cmd(target_root.path())
        .args(["export", &reexported.to_string_lossy()])
        .assert()
        .success()
        .stdout(predicate::str::contains("exported 1 entries"));
    let roundtripped = std::fs::read_to_string(&reexported).expect("read reexport file");
    assert!(roundtripped.contains("Always check file existence before editing"));
}

#[test]
fn export_outside_the_allowlisted_directories_is_rejected() {
    let dir = TempDir::new().expect("tempdir");

    support::hookguard_cmd(dir.path())
        .args(["export", "/etc/hookguard-export-should-not-land-here.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("hookguard export:"));

    assert!(!std::path::Path::new("/etc/hookguard-export-should-not-land-here.json").exists());
}
