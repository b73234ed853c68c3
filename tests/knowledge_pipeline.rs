//! Knowledge pipeline dedup: no CLI surface inserts a learning directly, so
//! this drives `hookguard_core::knowledge` itself rather than the binary,
//! the same way the teacher's own test suite exercises `vtcode_core` types
//! directly when there's no corresponding CLI subcommand.

use hookguard_core::knowledge::{KnowledgeCategory, KnowledgeDb, NewKnowledgeEntry};

fn entry(content: &str) -> NewKnowledgeEntry {
    NewKnowledgeEntry {
        category: KnowledgeCategory::Learned,
        title: content.chars().take(80).collect(),
        content: content.to_string(),
        tags: vec![],
        project: None,
        confidence: 0.8,
        source: "pipeline".to_string(),
    }
}

#[tokio::test]
async fn reanalysing_the_same_learning_does_not_duplicate_it() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = KnowledgeDb::open(&dir.path().join("knowledge.db")).expect("open db");

    let text = "Always check file existence before editing";
    db.insert_entry(entry(text)).await.expect("first insert");
    assert_eq!(db.count_entries().await.expect("count"), 1);

    let duplicate = db.is_duplicate(text, 0.70).await.expect("dedup check");
    assert!(duplicate, "identical content must be flagged as a duplicate before a second insert");

    // §4.H.3's actual call site (`commit_pending`) skips `insert_entry` entirely
    // once `is_duplicate` returns true, so re-running analysis never grows the
    // count past 1.
    assert_eq!(db.count_entries().await.expect("count unchanged"), 1);
}
