//! File-backed marker store persistence

use std::fs;

use forkswap_core::error::MarkerError;
use forkswap_core::markers::{FileMarkerStore, MarkerOutcome, MarkerStore};
use forkswap_test_utils::target_id;
use pretty_assertions::assert_eq;

#[test]
fn markers_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let first = FileMarkerStore::open(dir.path()).unwrap();
    let written = first
        .mark_complete(&target_id("node1-el"), MarkerOutcome::Succeeded)
        .unwrap();

    let second = FileMarkerStore::open(dir.path()).unwrap();
    assert!(second.is_complete(&target_id("node1-el")).unwrap());
    assert!(!second.is_complete(&target_id("node2-el")).unwrap());
    assert_eq!(second.record(&target_id("node1-el")).unwrap(), Some(written));
}

#[test]
fn second_mark_keeps_first_record_and_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileMarkerStore::open(dir.path()).unwrap();
    let id = target_id("node1-cl");

    let first = store
        .mark_complete(&id, MarkerOutcome::Degraded { reason: "slow".into() })
        .unwrap();
    let bytes = fs::read(dir.path().join("node1-cl.json")).unwrap();

    let again = store.mark_complete(&id, MarkerOutcome::Succeeded).unwrap();
    assert_eq!(again, first);
    assert_eq!(fs::read(dir.path().join("node1-cl.json")).unwrap(), bytes);
}

#[test]
fn marker_document_is_plain_json() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileMarkerStore::open(dir.path()).unwrap();
    store
        .mark_complete(
            &target_id("node2-el"),
            MarkerOutcome::Failed {
                reason: "start refused".into(),
            },
        )
        .unwrap();

    let raw = fs::read_to_string(dir.path().join("node2-el.json")).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc["target_id"], "node2-el");
    assert_eq!(doc["outcome"]["status"], "failed");
    assert!(doc["completed_at"].as_str().unwrap().contains('T'));
}

#[test]
fn empty_marker_file_counts_as_complete() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("legacy.json"), b"").unwrap();
    let store = FileMarkerStore::open(dir.path()).unwrap();

    let id = target_id("legacy");
    assert!(store.is_complete(&id).unwrap());
    let record = store.record(&id).unwrap().unwrap();
    assert_eq!(record.outcome, MarkerOutcome::Succeeded);
}

#[test]
fn records_ignore_temp_and_foreign_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileMarkerStore::open(dir.path()).unwrap();
    store.mark_complete(&target_id("a"), MarkerOutcome::Succeeded).unwrap();
    fs::write(dir.path().join(".b.json.tmp"), b"{").unwrap();
    fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

    let ids: Vec<String> = store.records().unwrap().into_iter().map(|r| r.target_id.to_string()).collect();
    assert_eq!(ids, ["a"]);
}

#[test]
fn corrupt_marker_still_gates_but_reports_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("broken.json"), b"{not json").unwrap();
    let store = FileMarkerStore::open(dir.path()).unwrap();

    let id = target_id("broken");
    assert!(store.is_complete(&id).unwrap());
    assert!(matches!(store.record(&id), Err(MarkerError::Corrupt { .. })));
}

#[test]
fn reset_removes_markers() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileMarkerStore::open(dir.path()).unwrap();
    for id in ["a", "b", "c"] {
        store.mark_complete(&target_id(id), MarkerOutcome::Succeeded).unwrap();
    }

    assert!(store.reset(&target_id("a")).unwrap());
    assert!(!store.reset(&target_id("a")).unwrap());
    assert!(!store.is_complete(&target_id("a")).unwrap());

    assert_eq!(store.reset_all().unwrap(), 2);
    assert!(store.records().unwrap().is_empty());
}
