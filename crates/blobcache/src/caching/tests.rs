use std::time::{Duration, SystemTime};

use bytes::Bytes;
use filetime::FileTime;

use super::*;

fn key(url: &str) -> CacheKey {
    CacheKey::from_url(url)
}

fn blob(contents: &str) -> Bytes {
    Bytes::copy_from_slice(contents.as_bytes())
}

/// Rewrites a file's mtime so it reads as `age` old.
fn age_file(path: &std::path::Path, age: Duration) {
    let mtime = FileTime::from_system_time(SystemTime::now() - age);
    filetime::set_file_mtime(path, mtime).unwrap();
}

#[test]
fn test_lru_roundtrip() {
    let mut lru = MemoryLru::new(4);
    assert!(lru.is_empty());

    lru.put(&key("http://example.com/a"), blob("a"));
    assert_eq!(lru.get(&key("http://example.com/a")), Some(blob("a")));
    assert_eq!(lru.get(&key("http://example.com/b")), None);
    assert_eq!(lru.len(), 1);
}

#[test]
fn test_lru_capacity_bound() {
    let mut lru = MemoryLru::new(3);
    for i in 0..5 {
        lru.put(&key(&format!("http://example.com/{i}")), blob("x"));
    }

    assert_eq!(lru.len(), 3);
    // the two oldest inserts fell out
    assert_eq!(lru.get(&key("http://example.com/0")), None);
    assert_eq!(lru.get(&key("http://example.com/1")), None);
    assert!(lru.get(&key("http://example.com/4")).is_some());
}

#[test]
fn test_lru_get_protects_from_eviction() {
    let (a, b, c) = (
        key("http://example.com/a"),
        key("http://example.com/b"),
        key("http://example.com/c"),
    );

    let mut lru = MemoryLru::new(2);
    lru.put(&a, blob("a"));
    lru.put(&b, blob("b"));
    // touching `a` makes `b` the least recently used
    lru.get(&a).unwrap();
    lru.put(&c, blob("c"));

    assert_eq!(lru.get(&b), None);
    assert_eq!(lru.get(&a), Some(blob("a")));
    assert_eq!(lru.get(&c), Some(blob("c")));
}

#[test]
fn test_lru_promotion_order() {
    let (a, b, c) = (
        key("http://example.com/a"),
        key("http://example.com/b"),
        key("http://example.com/c"),
    );

    let mut lru = MemoryLru::new(3);
    lru.put(&a, blob("a"));
    lru.put(&b, blob("b"));
    lru.put(&c, blob("c"));
    assert_eq!(lru.recency_order(), vec![c.clone(), b.clone(), a.clone()]);

    // promoting the head is a no-op
    lru.get(&c);
    assert_eq!(lru.recency_order(), vec![c.clone(), b.clone(), a.clone()]);

    // promoting the tail makes its predecessor the new tail
    lru.get(&a);
    assert_eq!(lru.recency_order(), vec![a.clone(), c.clone(), b.clone()]);

    // promoting a middle node patches both neighbors
    lru.get(&c);
    assert_eq!(lru.recency_order(), vec![c, a, b]);
}

#[test]
fn test_lru_replace_promotes() {
    let (a, b) = (key("http://example.com/a"), key("http://example.com/b"));

    let mut lru = MemoryLru::new(2);
    lru.put(&a, blob("old"));
    lru.put(&b, blob("b"));
    lru.put(&a, blob("new"));

    assert_eq!(lru.len(), 2);
    assert_eq!(lru.get(&a), Some(blob("new")));
    assert_eq!(lru.recency_order(), vec![a, b]);
}

#[test]
fn test_lru_single_entry() {
    let a = key("http://example.com/a");

    let mut lru = MemoryLru::new(1);
    lru.put(&a, blob("a"));
    assert_eq!(lru.get(&a), Some(blob("a")));
    assert_eq!(lru.get(&a), Some(blob("a")));

    lru.put(&key("http://example.com/b"), blob("b"));
    assert_eq!(lru.len(), 1);
    assert_eq!(lru.get(&a), None);
}

#[test]
fn test_lru_clear() {
    let mut lru = MemoryLru::new(4);
    lru.put(&key("http://example.com/a"), blob("a"));
    lru.put(&key("http://example.com/b"), blob("b"));

    lru.clear();
    assert!(lru.is_empty());
    assert_eq!(lru.get(&key("http://example.com/a")), None);

    // clearing twice is fine, and the cache remains usable
    lru.clear();
    lru.put(&key("http://example.com/c"), blob("c"));
    assert_eq!(lru.get(&key("http://example.com/c")), Some(blob("c")));
}

#[test]
fn test_lru_slot_reuse() {
    let mut lru = MemoryLru::new(2);
    for i in 0..10 {
        lru.put(&key(&format!("http://example.com/{i}")), blob("x"));
    }

    // evicted slots are recycled instead of growing the node vector
    assert_eq!(lru.len(), 2);
    assert!(lru.node_slots() <= 3);
}

#[tokio::test]
async fn test_disk_roundtrip() {
    let dir = blobcache_test::tempdir();
    let store = DiskStore::new(dir.path().to_path_buf(), Duration::from_secs(3600));

    let a = key("http://example.com/a");
    store.store(&a, blob("hello")).await.unwrap();
    assert_eq!(store.lookup(&a).await, Ok(blob("hello")));

    // overwriting replaces the previous contents
    store.store(&a, blob("goodbye")).await.unwrap();
    assert_eq!(store.lookup(&a).await, Ok(blob("goodbye")));
}

#[tokio::test]
async fn test_disk_miss() {
    let dir = blobcache_test::tempdir();
    let store = DiskStore::new(dir.path().to_path_buf(), Duration::from_secs(3600));

    let outcome = store.lookup(&key("http://example.com/absent")).await;
    assert_eq!(outcome, Err(CacheError::NotFound));
}

#[tokio::test]
async fn test_disk_expiry_on_lookup() {
    let dir = blobcache_test::tempdir();
    let store = DiskStore::new(dir.path().to_path_buf(), Duration::from_secs(3600));

    let a = key("http://example.com/a");
    store.store(&a, blob("hello")).await.unwrap();

    let path = store.root().join(a.file_name());
    age_file(&path, Duration::from_secs(2 * 3600));

    // the expired entry reads as a miss and is deleted on the way
    assert_eq!(store.lookup(&a).await, Err(CacheError::NotFound));
    assert!(!path.exists());
}

#[tokio::test]
async fn test_store_transfer_restarts_age_clock() {
    let dir = blobcache_test::tempdir();
    let store = DiskStore::new(dir.path().to_path_buf(), Duration::from_secs(3600));

    let a = key("http://example.com/a");
    let mut temp_file = store.tempfile().unwrap();
    std::io::Write::write_all(&mut temp_file, b"hello").unwrap();
    age_file(temp_file.path(), Duration::from_secs(2 * 3600));

    let contents = store.store_transfer(&a, temp_file).await.unwrap();
    assert_eq!(contents, blob("hello"));

    // despite the stale temp file mtime, the entry counts as freshly written
    assert_eq!(store.lookup(&a).await, Ok(blob("hello")));
}

#[tokio::test]
async fn test_sweep_removes_only_expired() {
    let dir = blobcache_test::tempdir();
    let store = DiskStore::new(dir.path().to_path_buf(), Duration::from_secs(3600));

    let fresh = key("http://example.com/fresh");
    let stale = key("http://example.com/stale");
    store.store(&fresh, blob("fresh")).await.unwrap();
    store.store(&stale, blob("stale")).await.unwrap();
    age_file(
        &store.root().join(stale.file_name()),
        Duration::from_secs(2 * 3600),
    );

    let stats = store.sweep().unwrap();
    assert_eq!(stats.removed_files, 1);
    assert_eq!(stats.removed_bytes, 5);
    assert_eq!(stats.retained_files, 1);
    assert_eq!(stats.retained_bytes, 5);

    assert_eq!(store.lookup(&fresh).await, Ok(blob("fresh")));
    assert_eq!(store.lookup(&stale).await, Err(CacheError::NotFound));
}

#[tokio::test]
async fn test_sweep_skips_hidden_and_descends_subdirectories() {
    let dir = blobcache_test::tempdir();
    let store = DiskStore::new(dir.path().to_path_buf(), Duration::from_secs(3600));

    // an in-progress download, old but hidden
    let hidden = store.root().join(".tmp-download");
    std::fs::write(&hidden, b"partial").unwrap();
    age_file(&hidden, Duration::from_secs(2 * 3600));

    // an expired file inside a subdirectory
    let subdir = store.root().join("nested");
    std::fs::create_dir_all(&subdir).unwrap();
    let nested = subdir.join("stale");
    std::fs::write(&nested, b"stale").unwrap();
    age_file(&nested, Duration::from_secs(2 * 3600));

    let stats = store.sweep().unwrap();
    assert_eq!(stats.removed_files, 1);

    assert!(hidden.exists());
    assert!(!nested.exists());
    // the subdirectory itself is left in place
    assert!(subdir.exists());
}

#[test]
fn test_sweep_missing_root() {
    let dir = blobcache_test::tempdir();
    let store = DiskStore::new(dir.path().join("never-created"), Duration::from_secs(3600));

    assert_eq!(store.sweep(), Ok(SweepStats::default()));
}

#[tokio::test]
async fn test_facade_disk_hit_populates_memory() {
    let dir = blobcache_test::tempdir();
    let disk = DiskStore::new(dir.path().to_path_buf(), Duration::from_secs(3600));
    let cache = BlobCache::new(MemoryLru::new(4), disk);

    let a = key("http://example.com/a");
    cache.disk().store(&a, blob("hello")).await.unwrap();

    assert_eq!(cache.from_memory(&a), None);
    assert_eq!(cache.from_disk(&a).await, Ok(blob("hello")));
    assert_eq!(cache.from_memory(&a), Some(blob("hello")));
}

#[tokio::test]
async fn test_facade_store_reaches_both_tiers() {
    let dir = blobcache_test::tempdir();
    let disk = DiskStore::new(dir.path().to_path_buf(), Duration::from_secs(3600));
    let cache = BlobCache::new(MemoryLru::new(4), disk);

    let a = key("http://example.com/a");
    cache.store(&a, blob("hello")).await.unwrap();

    assert_eq!(cache.from_memory(&a), Some(blob("hello")));
    assert!(cache.disk().root().join(a.file_name()).exists());

    cache.clear_memory();
    assert_eq!(cache.from_memory(&a), None);
    // still served from disk after a memory clear
    assert_eq!(cache.from_disk(&a).await, Ok(blob("hello")));
}

#[tokio::test]
async fn test_facade_store_transfer() {
    let dir = blobcache_test::tempdir();
    let disk = DiskStore::new(dir.path().to_path_buf(), Duration::from_secs(3600));
    let cache = BlobCache::new(MemoryLru::new(4), disk);

    let a = key("http://example.com/a");
    let mut temp_file = cache.tempfile().unwrap();
    std::io::Write::write_all(&mut temp_file, b"hello").unwrap();

    assert_eq!(cache.store_transfer(&a, temp_file).await, Ok(blob("hello")));
    assert_eq!(cache.from_memory(&a), Some(blob("hello")));
    assert_eq!(cache.sweep().await.unwrap().retained_files, 1);
}
