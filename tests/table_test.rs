use jsonlt::{Key, KeySpec, Record, Table, TableOptions};
use serde_json::{Value, json};
use std::fs;
use tempfile::TempDir;

fn record(value: Value) -> Record {
    value.as_object().unwrap().clone()
}

fn line_count(table: &Table) -> usize {
    fs::read_to_string(table.path()).unwrap().lines().count()
}

#[test]
fn test_create_with_records() {
    let dir = TempDir::new().unwrap();
    let table = Table::from_records(
        dir.path().join("users.jsonlt"),
        vec![
            record(json!({"id": "a", "v": 1})),
            record(json!({"id": "b", "v": 2})),
        ],
        KeySpec::single("id"),
        TableOptions::default(),
    )
    .unwrap();

    let contents = fs::read_to_string(table.path()).unwrap();
    assert_eq!(
        contents,
        "{\"$jsonlt\":{\"key\":\"id\",\"version\":1}}\n\
         {\"id\":\"a\",\"v\":1}\n\
         {\"id\":\"b\",\"v\":2}\n"
    );
    assert_eq!(table.keys().unwrap(), vec![Key::from("a"), Key::from("b")]);
}

#[test]
fn test_put_and_delete_append_lines() {
    let dir = TempDir::new().unwrap();
    let table = Table::from_records(
        dir.path().join("users.jsonlt"),
        vec![
            record(json!({"id": "a", "v": 1})),
            record(json!({"id": "b", "v": 2})),
        ],
        KeySpec::single("id"),
        TableOptions::default(),
    )
    .unwrap();

    table.put(record(json!({"id": "a", "v": 3}))).unwrap();
    table.delete("b").unwrap();

    assert_eq!(line_count(&table), 5);
    assert_eq!(table.get("a").unwrap().unwrap(), record(json!({"id": "a", "v": 3})));
    assert_eq!(table.get("b").unwrap(), None);
    assert_eq!(table.count().unwrap(), 1);
}

#[test]
fn test_compaction_preserves_view() {
    let dir = TempDir::new().unwrap();
    let table = Table::from_records(
        dir.path().join("users.jsonlt"),
        vec![
            record(json!({"id": "a", "v": 1})),
            record(json!({"id": "b", "v": 2})),
        ],
        KeySpec::single("id"),
        TableOptions::default(),
    )
    .unwrap();
    table.put(record(json!({"id": "a", "v": 3}))).unwrap();
    table.delete("b").unwrap();

    let before = table.items().unwrap();
    table.compact().unwrap();

    // One line per live key plus the header; tombstones and superseded
    // lines are gone.
    let contents = fs::read_to_string(table.path()).unwrap();
    assert_eq!(
        contents,
        "{\"$jsonlt\":{\"key\":\"id\",\"version\":1}}\n{\"id\":\"a\",\"v\":3}\n"
    );
    assert_eq!(table.items().unwrap(), before);

    // The compacted file replays to the same view in a fresh instance.
    let reopened = Table::open(table.path(), None, TableOptions::default()).unwrap();
    assert_eq!(reopened.items().unwrap(), before);
}

#[test]
fn test_compound_keys() {
    let dir = TempDir::new().unwrap();
    let table = Table::open(
        dir.path().join("orders.jsonlt"),
        Some(KeySpec::compound(["c", "o"])),
        TableOptions::default(),
    )
    .unwrap();

    table
        .put(record(json!({"c": "alice", "o": 1, "x": true})))
        .unwrap();
    table.put(record(json!({"c": "alice", "o": 2}))).unwrap();

    assert_eq!(
        table.get(("alice", 1)).unwrap().unwrap(),
        record(json!({"c": "alice", "o": 1, "x": true}))
    );
    assert_eq!(
        table.get(("alice", 2)).unwrap().unwrap(),
        record(json!({"c": "alice", "o": 2}))
    );
    assert_eq!(
        table.keys().unwrap(),
        vec![Key::from(("alice", 1)), Key::from(("alice", 2))]
    );
}

#[test]
fn test_keys_are_canonically_ordered() {
    let dir = TempDir::new().unwrap();
    let table = Table::open(
        dir.path().join("mixed.jsonlt"),
        Some(KeySpec::single("id")),
        TableOptions::default(),
    )
    .unwrap();

    // Insertion order deliberately scrambled; integers sort before strings.
    for id in [json!("b"), json!(10), json!("a"), json!(2), json!("10")] {
        table.put(record(json!({"id": id}))).unwrap();
    }

    assert_eq!(
        table.keys().unwrap(),
        vec![
            Key::from(2),
            Key::from(10),
            Key::from("10"),
            Key::from("a"),
            Key::from("b"),
        ]
    );
}

#[test]
fn test_snapshots_are_not_live_views() {
    let dir = TempDir::new().unwrap();
    let table = Table::open(
        dir.path().join("t.jsonlt"),
        Some(KeySpec::single("id")),
        TableOptions::default(),
    )
    .unwrap();
    table.put(record(json!({"id": "a", "v": 1}))).unwrap();

    let all = table.all().unwrap();
    let keys = table.keys().unwrap();
    table.put(record(json!({"id": "b", "v": 2}))).unwrap();

    assert_eq!(all.len(), 1);
    assert_eq!(keys.len(), 1);
    assert_eq!(table.count().unwrap(), 2);
}

#[test]
fn test_sees_appends_from_other_instances() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shared.jsonlt");
    let writer = Table::open(&path, Some(KeySpec::single("id")), TableOptions::default()).unwrap();
    let reader = Table::open(&path, None, TableOptions::default()).unwrap();

    assert_eq!(reader.count().unwrap(), 0);
    writer.put(record(json!({"id": "a", "v": 1}))).unwrap();

    // The cursor check notices the external append and rebuilds.
    assert_eq!(reader.get("a").unwrap().unwrap()["v"], json!(1));
    assert_eq!(reader.count().unwrap(), 1);
}

#[test]
fn test_find_with_predicate_and_limit() {
    let dir = TempDir::new().unwrap();
    let table = Table::open(
        dir.path().join("t.jsonlt"),
        Some(KeySpec::single("id")),
        TableOptions::default(),
    )
    .unwrap();
    for i in 0..6 {
        table
            .put(record(json!({"id": i, "even": (i % 2 == 0)})))
            .unwrap();
    }

    let evens = table
        .find(|r| r["even"] == json!(true), None)
        .unwrap();
    assert_eq!(evens.len(), 3);

    let limited = table
        .find(|r| r["even"] == json!(true), Some(2))
        .unwrap();
    assert_eq!(limited.len(), 2);

    let one = table.find_one(|r| r["id"] == json!(4)).unwrap().unwrap();
    assert_eq!(one["id"], json!(4));
    assert_eq!(table.find_one(|r| r["id"] == json!(99)).unwrap(), None);
}

#[test]
fn test_clear_keeps_only_header() {
    let dir = TempDir::new().unwrap();
    let table = Table::open(
        dir.path().join("t.jsonlt"),
        Some(KeySpec::single("id")),
        TableOptions::default(),
    )
    .unwrap();
    table.put(record(json!({"id": "a"}))).unwrap();
    table.put(record(json!({"id": "b"}))).unwrap();

    table.clear().unwrap();
    assert_eq!(table.count().unwrap(), 0);
    assert_eq!(
        fs::read_to_string(table.path()).unwrap(),
        "{\"$jsonlt\":{\"key\":\"id\",\"version\":1}}\n"
    );
}

#[test]
fn test_reload_rebuilds_from_disk() {
    let dir = TempDir::new().unwrap();
    let table = Table::open(
        dir.path().join("t.jsonlt"),
        Some(KeySpec::single("id")),
        TableOptions::default(),
    )
    .unwrap();
    table.put(record(json!({"id": "a", "v": 1}))).unwrap();

    table.reload();
    assert_eq!(table.get("a").unwrap().unwrap()["v"], json!(1));
    assert_eq!(line_count(&table), 2);
}

#[test]
fn test_lenient_profile_ignores_unknown_reserved_fields() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("t.jsonlt");
    fs::write(
        &path,
        "{\"$jsonlt\":{\"key\":\"id\",\"version\":1}}\n{\"$note\":\"x\",\"id\":\"a\"}\n",
    )
    .unwrap();

    assert!(Table::open(&path, None, TableOptions::default()).is_err());

    let lenient = Table::open(
        &path,
        None,
        TableOptions {
            profile: jsonlt::ParseProfile::Lenient,
            ..TableOptions::default()
        },
    )
    .unwrap();
    let rec = lenient.get("a").unwrap().unwrap();
    assert!(!rec.contains_key("$note"));
}
