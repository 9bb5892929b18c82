// SPDX-License-Identifier: MIT

use super::*;

#[test]
fn put_get_delete() {
    let store = MemoryStore::new();
    assert_eq!(store.get("a").unwrap(), None);

    store.put("a", b"1".to_vec()).unwrap();
    assert_eq!(store.get("a").unwrap(), Some(b"1".to_vec()));

    store.delete("a").unwrap();
    assert_eq!(store.get("a").unwrap(), None);
    assert!(store.is_empty());
}

#[test]
fn scan_prefix_is_ordered_and_bounded() {
    let store = MemoryStore::new();
    store.put("queue/a/002", b"2".to_vec()).unwrap();
    store.put("queue/a/001", b"1".to_vec()).unwrap();
    store.put("queue/b/001", b"x".to_vec()).unwrap();
    store.put("queue/a/010", b"10".to_vec()).unwrap();

    let entries = store.scan_prefix("queue/a/").unwrap();
    let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["queue/a/001", "queue/a/002", "queue/a/010"]);
}

#[test]
fn scan_prefix_empty_when_no_match() {
    let store = MemoryStore::new();
    store.put("jobs/1", b"x".to_vec()).unwrap();
    assert!(store.scan_prefix("dead/").unwrap().is_empty());
}

#[test]
fn write_batch_applies_all_ops() {
    let store = MemoryStore::new();
    store.put("stale", b"old".to_vec()).unwrap();

    store
        .write_batch(vec![
            BatchOp::put("jobs/1", b"j".to_vec()),
            BatchOp::put("jobmeta/1", b"m".to_vec()),
            BatchOp::delete("stale"),
        ])
        .unwrap();

    assert_eq!(store.get("jobs/1").unwrap(), Some(b"j".to_vec()));
    assert_eq!(store.get("jobmeta/1").unwrap(), Some(b"m".to_vec()));
    assert_eq!(store.get("stale").unwrap(), None);
}

#[test]
fn compare_swap_succeeds_on_match() {
    let store = MemoryStore::new();
    store.put("k", b"v1".to_vec()).unwrap();

    assert!(store.compare_swap("k", Some(b"v1"), Some(b"v2".to_vec())).unwrap());
    assert_eq!(store.get("k").unwrap(), Some(b"v2".to_vec()));
}

#[test]
fn compare_swap_rejects_on_mismatch() {
    let store = MemoryStore::new();
    store.put("k", b"v1".to_vec()).unwrap();

    assert!(!store.compare_swap("k", Some(b"stale"), Some(b"v2".to_vec())).unwrap());
    assert_eq!(store.get("k").unwrap(), Some(b"v1".to_vec()));
}

#[test]
fn compare_swap_none_expected_creates() {
    let store = MemoryStore::new();

    assert!(store.compare_swap("fresh", None, Some(b"v".to_vec())).unwrap());
    assert_eq!(store.get("fresh").unwrap(), Some(b"v".to_vec()));

    // Second create against None must fail: the key now exists.
    assert!(!store.compare_swap("fresh", None, Some(b"other".to_vec())).unwrap());
}

#[test]
fn compare_swap_none_value_deletes() {
    let store = MemoryStore::new();
    store.put("k", b"v".to_vec()).unwrap();

    assert!(store.compare_swap("k", Some(b"v"), None).unwrap());
    assert_eq!(store.get("k").unwrap(), None);
}
