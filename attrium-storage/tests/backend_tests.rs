use attrium_storage::{KvBackend, MemoryBackend, SqliteBackend, StorageError, WriteBatch};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn backends() -> Vec<(&'static str, Arc<dyn KvBackend>)> {
    vec![
        ("memory", Arc::new(MemoryBackend::new())),
        ("sqlite", Arc::new(SqliteBackend::open_in_memory().unwrap())),
    ]
}

// ── Basic reads and writes ───────────────────────────────────────

#[test]
fn put_get_delete() {
    for (name, backend) in backends() {
        let mut batch = WriteBatch::new();
        batch.put("a/1", "one").put("a/2", "two");
        backend.apply(batch).unwrap();

        assert_eq!(backend.get("a/1").unwrap().as_deref(), Some("one"), "{name}");
        assert_eq!(backend.get("missing").unwrap(), None, "{name}");

        let mut batch = WriteBatch::new();
        batch.delete("a/1");
        backend.apply(batch).unwrap();
        assert_eq!(backend.get("a/1").unwrap(), None, "{name}");
    }
}

#[test]
fn put_overwrites() {
    for (name, backend) in backends() {
        let mut batch = WriteBatch::new();
        batch.put("k", "v1").put("k", "v2");
        backend.apply(batch).unwrap();
        assert_eq!(backend.get("k").unwrap().as_deref(), Some("v2"), "{name}");
    }
}

#[test]
fn scan_prefix_is_ordered_and_bounded() {
    for (name, backend) in backends() {
        let mut batch = WriteBatch::new();
        batch
            .put("val/b", "2")
            .put("val/a", "1")
            .put("vala", "x")
            .put("def/z", "z");
        backend.apply(batch).unwrap();

        let keys: Vec<String> = backend
            .scan_prefix("val/")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["val/a", "val/b"], "{name}");
        assert_eq!(backend.count_prefix("val/").unwrap(), 2, "{name}");
        assert_eq!(backend.count_prefix("nothing/").unwrap(), 0, "{name}");
    }
}

#[test]
fn empty_batch_is_a_no_op() {
    for (_, backend) in backends() {
        backend.apply(WriteBatch::new()).unwrap();
        assert!(backend.scan_prefix("").unwrap().is_empty());
    }
}

// ── Atomicity ────────────────────────────────────────────────────

#[test]
fn failed_precondition_writes_nothing() {
    for (name, backend) in backends() {
        let mut seed = WriteBatch::new();
        seed.put("ent/product/sku-1", "existing");
        backend.apply(seed).unwrap();

        let mut batch = WriteBatch::new();
        batch
            .put("val/product/x/a", "value")
            .expect_absent("ent/product/sku-1")
            .put("ent/product/sku-1", "new");
        let err = backend.apply(batch).unwrap_err();
        assert!(matches!(err, StorageError::PersistenceConflict(_)), "{name}: {err}");

        assert_eq!(backend.get("val/product/x/a").unwrap(), None, "{name}");
        assert_eq!(
            backend.get("ent/product/sku-1").unwrap().as_deref(),
            Some("existing"),
            "{name}"
        );
    }
}

#[test]
fn expect_absent_passes_for_new_keys() {
    for (name, backend) in backends() {
        let mut batch = WriteBatch::new();
        batch.expect_absent("k").put("k", "v");
        backend.apply(batch).unwrap();
        assert_eq!(backend.get("k").unwrap().as_deref(), Some("v"), "{name}");
    }
}

#[test]
fn expect_present_guards_removed_keys() {
    for (name, backend) in backends() {
        let mut seed = WriteBatch::new();
        seed.put("stage/1", "pending");
        backend.apply(seed).unwrap();

        let mut update = WriteBatch::new();
        update.expect_present("stage/1").put("stage/1", "fail");
        backend.apply(update).unwrap();
        assert_eq!(backend.get("stage/1").unwrap().as_deref(), Some("fail"), "{name}");

        let mut remove = WriteBatch::new();
        remove.expect_present("stage/1").delete("stage/1");
        backend.apply(remove).unwrap();

        // A second writer that read the row before it was removed.
        let mut stale = WriteBatch::new();
        stale.expect_present("stage/1").put("stage/1", "fail");
        let err = backend.apply(stale).unwrap_err();
        assert!(matches!(err, StorageError::PersistenceConflict(_)), "{name}: {err}");
        assert_eq!(backend.get("stage/1").unwrap(), None, "{name}");
    }
}

// ── SQLite persistence ───────────────────────────────────────────

#[test]
fn sqlite_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("attrium.db");

    {
        let backend = SqliteBackend::open(&path).unwrap();
        let mut batch = WriteBatch::new();
        batch.put_json("def/1", &serde_json::json!({"slug": "size"})).unwrap();
        backend.apply(batch).unwrap();
    }

    let backend = SqliteBackend::open(&path).unwrap();
    let value: serde_json::Value =
        attrium_storage::get_json(&backend, "def/1").unwrap().unwrap();
    assert_eq!(value["slug"], "size");
}

#[test]
fn sqlite_prefix_match_is_literal() {
    let backend = SqliteBackend::open_in_memory().unwrap();
    let mut batch = WriteBatch::new();
    batch.put("a%b/1", "x").put("axb/1", "y").put("a_b/1", "z");
    backend.apply(batch).unwrap();

    assert_eq!(backend.scan_prefix("a%b/").unwrap().len(), 1);
    assert_eq!(backend.scan_prefix("a_b/").unwrap().len(), 1);
    assert_eq!(backend.count_prefix("a%b/").unwrap(), 1);
}
