use jsonlt::{JsonltError, Key, KeySpec, Record, Table, TableOptions};
use serde_json::{Value, json};
use std::fs;
use tempfile::TempDir;

fn record(value: Value) -> Record {
    value.as_object().unwrap().clone()
}

fn open(path: &std::path::Path) -> Table {
    Table::open(path, Some(KeySpec::single("id")), TableOptions::default()).unwrap()
}

#[test]
fn test_first_committer_wins() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("t.jsonlt");
    let t1 = open(&path);
    let t2 = open(&path);

    let mut txn1 = t1.transaction().unwrap();
    let mut txn2 = t2.transaction().unwrap();

    txn1.put(record(json!({"id": "k", "v": 1}))).unwrap();
    txn2.put(record(json!({"id": "k", "v": 2}))).unwrap();

    txn1.commit().unwrap();
    let err = txn2.commit().unwrap_err();
    match err {
        JsonltError::Conflict { key } => assert_eq!(key, Key::from("k")),
        other => panic!("expected conflict, got {other}"),
    }

    assert_eq!(t2.get("k").unwrap().unwrap()["v"], json!(1));
    assert_eq!(t1.get("k").unwrap().unwrap()["v"], json!(1));
}

#[test]
fn test_disjoint_write_sets_both_commit() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("t.jsonlt");
    let t1 = open(&path);
    let t2 = open(&path);

    let mut txn1 = t1.transaction().unwrap();
    let mut txn2 = t2.transaction().unwrap();
    txn1.put(record(json!({"id": "x", "v": 1}))).unwrap();
    txn2.put(record(json!({"id": "y", "v": 2}))).unwrap();

    txn1.commit().unwrap();
    txn2.commit().unwrap();

    assert_eq!(t1.count().unwrap(), 2);
    assert_eq!(t1.get("y").unwrap().unwrap()["v"], json!(2));
}

#[test]
fn test_snapshot_isolation_against_committed_appends() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("t.jsonlt");
    let t1 = open(&path);
    let t2 = open(&path);
    t1.put(record(json!({"id": "a", "v": 1}))).unwrap();

    let mut txn = t2.transaction().unwrap();
    assert_eq!(txn.get("a").unwrap().unwrap()["v"], json!(1));

    // Committed after the snapshot: invisible inside the transaction.
    t1.put(record(json!({"id": "a", "v": 9}))).unwrap();
    t1.put(record(json!({"id": "b", "v": 2}))).unwrap();

    assert_eq!(txn.get("a").unwrap().unwrap()["v"], json!(1));
    assert_eq!(txn.get("b").unwrap(), None);
    assert_eq!(txn.count().unwrap(), 1);

    // Its own writes are visible on top of the snapshot.
    txn.put(record(json!({"id": "c", "v": 3}))).unwrap();
    assert_eq!(txn.count().unwrap(), 2);
    assert_eq!(
        txn.keys().unwrap(),
        vec![Key::from("a"), Key::from("c")]
    );
    txn.abort().unwrap();
}

#[test]
fn test_pure_reads_never_conflict() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("t.jsonlt");
    let t1 = open(&path);
    let t2 = open(&path);
    t1.put(record(json!({"id": "a", "v": 1}))).unwrap();

    let mut txn = t2.transaction().unwrap();
    // Observe "a", write only "b".
    assert!(txn.has("a").unwrap());
    txn.put(record(json!({"id": "b", "v": 2}))).unwrap();

    // "a" is mutated after the snapshot; the commit still goes through
    // because "a" was only read.
    t1.put(record(json!({"id": "a", "v": 9}))).unwrap();
    txn.commit().unwrap();

    assert_eq!(t1.get("a").unwrap().unwrap()["v"], json!(9));
    assert_eq!(t1.get("b").unwrap().unwrap()["v"], json!(2));
}

#[test]
fn test_conflict_with_direct_table_write() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("t.jsonlt");
    let t1 = open(&path);
    let t2 = open(&path);

    let mut txn = t1.transaction().unwrap();
    txn.put(record(json!({"id": "a", "v": 1}))).unwrap();

    t2.put(record(json!({"id": "a", "v": 2}))).unwrap();

    let err = txn.commit().unwrap_err();
    assert!(matches!(err, JsonltError::Conflict { .. }));
    assert_eq!(t1.get("a").unwrap().unwrap()["v"], json!(2));
}

#[test]
fn test_conflict_with_concurrent_delete() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("t.jsonlt");
    let t1 = open(&path);
    let t2 = open(&path);
    t1.put(record(json!({"id": "a", "v": 1}))).unwrap();

    let mut txn = t1.transaction().unwrap();
    txn.put(record(json!({"id": "a", "v": 5}))).unwrap();

    // A tombstone is a mutation like any other.
    t2.delete("a").unwrap();

    let err = txn.commit().unwrap_err();
    match err {
        JsonltError::Conflict { key } => assert_eq!(key, Key::from("a")),
        other => panic!("expected conflict, got {other}"),
    }
}

#[test]
fn test_abort_discards_everything() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("t.jsonlt");
    let table = open(&path);
    table.put(record(json!({"id": "a", "v": 1}))).unwrap();
    let lines_before = fs::read_to_string(&path).unwrap().lines().count();

    let mut txn = table.transaction().unwrap();
    txn.put(record(json!({"id": "a", "v": 2}))).unwrap();
    txn.delete("a").unwrap();
    txn.abort().unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), lines_before);
    assert_eq!(table.get("a").unwrap().unwrap()["v"], json!(1));
}

#[test]
fn test_commit_under_rewritten_file_conflicts() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("t.jsonlt");
    let t1 = open(&path);
    let t2 = open(&path);
    t1.put(record(json!({"id": "a", "v": 1}))).unwrap();
    t1.put(record(json!({"id": "a", "v": 2}))).unwrap();

    let mut txn = t2.transaction().unwrap();
    txn.put(record(json!({"id": "b", "v": 1}))).unwrap();

    // Compaction shrinks the file below the snapshot cursor; the appended
    // suffix can no longer be inspected, so the commit fails closed.
    t1.compact().unwrap();

    assert!(matches!(
        txn.commit().unwrap_err(),
        JsonltError::Conflict { .. }
    ));
}

#[test]
fn test_transactional_count_and_items_overlay() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("t.jsonlt");
    let table = open(&path);
    table.put(record(json!({"id": "a", "v": 1}))).unwrap();
    table.put(record(json!({"id": "b", "v": 2}))).unwrap();

    let mut txn = table.transaction().unwrap();
    txn.delete("a").unwrap();
    txn.put(record(json!({"id": "c", "v": 3}))).unwrap();

    assert_eq!(txn.count().unwrap(), 2);
    let items = txn.items().unwrap();
    assert_eq!(items[0].0, Key::from("b"));
    assert_eq!(items[1].0, Key::from("c"));
    assert_eq!(txn.all().unwrap().len(), 2);
    txn.abort().unwrap();
}
