// Store Tests
// Tests for the key-value backends

use meshdoc::storage::{KvStore, MemoryStore, SledStore, StoreError};
use tempfile::TempDir;

// ============================================================================
// SLED STORE
// ============================================================================

#[test]
fn test_store_open_new() {
    let temp_dir = TempDir::new().unwrap();
    let store = SledStore::open(temp_dir.path()).unwrap();

    assert!(store.is_empty());
}

#[test]
fn test_store_open_existing() {
    let temp_dir = TempDir::new().unwrap();

    // Create and write something
    {
        let store = SledStore::open(temp_dir.path()).unwrap();
        store.set("test_key", "test_value").unwrap();
        store.flush().unwrap();
    }

    // Reopen and verify
    {
        let store = SledStore::open(temp_dir.path()).unwrap();
        let value = store.get("test_key").unwrap();
        assert_eq!(value, Some("test_value".to_string()));
    }
}

#[test]
fn test_store_get_nonexistent() {
    let temp_dir = TempDir::new().unwrap();
    let store = SledStore::open(temp_dir.path()).unwrap();

    assert_eq!(store.get("nonexistent").unwrap(), None);
}

#[test]
fn test_store_remove() {
    let temp_dir = TempDir::new().unwrap();
    let store = SledStore::open(temp_dir.path()).unwrap();

    store.set("key", "value").unwrap();
    assert!(store.get("key").unwrap().is_some());

    store.remove("key").unwrap();
    assert!(store.get("key").unwrap().is_none());
}

#[test]
fn test_store_overwrite() {
    let temp_dir = TempDir::new().unwrap();
    let store = SledStore::open(temp_dir.path()).unwrap();

    store.set("key", "value1").unwrap();
    store.set("key", "value2").unwrap();

    assert_eq!(store.get("key").unwrap(), Some("value2".to_string()));
}

#[test]
fn test_store_stats() {
    let temp_dir = TempDir::new().unwrap();
    let store = SledStore::open(temp_dir.path()).unwrap();

    store.set("a", "1").unwrap();
    store.set("b", "2").unwrap();

    assert_eq!(store.stats().key_count, 2);
}

// ============================================================================
// MEMORY STORE
// ============================================================================

#[test]
fn test_memory_store_behaves_like_a_kv_store() {
    let store = MemoryStore::new();
    assert!(store.is_empty());

    store.set("key", "value").unwrap();
    assert_eq!(store.get("key").unwrap(), Some("value".to_string()));
    assert_eq!(store.len(), 1);

    store.remove("key").unwrap();
    assert_eq!(store.get("key").unwrap(), None);
}

#[test]
fn test_memory_store_quota_exceeded() {
    let store = MemoryStore::new().with_quota(8);

    let result = store.set("key", "far too long");
    assert_eq!(
        result,
        Err(StoreError::QuotaExceeded {
            needed: 15,
            available: 8
        })
    );
    assert!(store.is_empty());
}

#[test]
fn test_backends_usable_as_trait_objects() {
    let temp_dir = TempDir::new().unwrap();
    let backends: Vec<Box<dyn KvStore>> = vec![
        Box::new(MemoryStore::new()),
        Box::new(SledStore::open(temp_dir.path()).unwrap()),
    ];

    for backend in &backends {
        backend.set("shared", "yes").unwrap();
        assert_eq!(backend.get("shared").unwrap(), Some("yes".to_string()));
    }
}
