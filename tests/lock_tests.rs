//! Integration tests for the distributed lock
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use keylatch::lock::{Fingerprint, LockManager};
use keylatch::settings::LockSettings;
use keylatch::store::{MemoryStore, ScriptStore};
use keylatch::KeylatchError;

async fn new_lock(store: &MemoryStore, key: &str, lease: Duration) -> LockManager {
    let store: Arc<dyn ScriptStore> = Arc::new(store.clone());
    LockManager::new(store, LockSettings::new(key, lease), Fingerprint::generate())
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_loser_acquires_after_lease_expires() {
    let store = MemoryStore::new();
    let first = new_lock(&store, "scenario", Duration::from_secs(2)).await;
    let second = new_lock(&store, "scenario", Duration::from_secs(2)).await;

    let (a, b) = tokio::join!(first.acquire(), second.acquire());
    assert!(a ^ b, "exactly one acquire must win");
    let loser = if a { &second } else { &first };

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(loser.acquire().await);
}

#[tokio::test(start_paused = true)]
async fn test_stale_holder_cannot_release_new_holder() {
    let store = MemoryStore::new();
    let stale = new_lock(&store, "jobs", Duration::from_secs(1)).await;
    let fresh = new_lock(&store, "jobs", Duration::from_secs(10)).await;

    assert!(stale.acquire().await);
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(fresh.acquire().await);

    assert!(!stale.release().await);
    assert_eq!(store.get("jobs").as_deref(), Some(fresh.fingerprint().as_str()));
    assert!(fresh.release().await);
}

#[tokio::test]
async fn test_locks_on_different_keys_are_independent() {
    let store = MemoryStore::new();
    let a = new_lock(&store, "a", Duration::from_secs(10)).await;
    let b = new_lock(&store, "b", Duration::from_secs(10)).await;
    assert!(a.acquire().await);
    assert!(b.acquire().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_contenders_hold_one_at_a_time() {
    let store = MemoryStore::new();
    let holders = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let lock = new_lock(&store, "critical", Duration::from_secs(30)).await;
        let holders = holders.clone();
        let completed = completed.clone();
        handles.push(tokio::spawn(async move {
            loop {
                if lock.acquire().await {
                    let inside = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    assert_eq!(inside, 1, "two holders inside the critical section");
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    holders.fetch_sub(1, Ordering::SeqCst);
                    assert!(lock.release().await);
                    completed.fetch_add(1, Ordering::SeqCst);
                    return;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(completed.load(Ordering::SeqCst), 16);
    assert_eq!(store.get("critical"), None);
}

#[tokio::test]
async fn test_process_wide_fingerprint_is_shared() {
    let store = MemoryStore::new();
    let shared: Arc<dyn ScriptStore> = Arc::new(store.clone());
    let settings = LockSettings::new("shared", Duration::from_secs(10));
    let a = LockManager::new(shared.clone(), settings.clone(), Fingerprint::process_wide())
        .await
        .unwrap();
    let b = LockManager::new(shared, settings, Fingerprint::process_wide())
        .await
        .unwrap();
    assert_eq!(a.fingerprint(), b.fingerprint());

    assert!(a.acquire().await);
    assert!(!b.acquire().await);
    // same token, so the store cannot tell them apart
    assert!(b.release().await);
}

#[tokio::test]
async fn test_release_surfaces_missing_script_once() {
    let store = MemoryStore::new();
    let lock = new_lock(&store, "flushy", Duration::from_secs(10)).await;

    assert!(lock.acquire().await);
    assert!(lock.release().await);
    assert!(lock.acquire().await);

    store.flush_scripts();
    assert!(matches!(
        lock.try_release().await,
        Err(KeylatchError::ScriptMissing(_))
    ));
    // lock still held, next release uploads the script again
    assert!(lock.try_release().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_unlock_script_reuploaded_in_background() {
    let store = MemoryStore::new();
    let lock = new_lock(&store, "bg", Duration::from_secs(60)).await;

    assert!(lock.acquire().await);
    assert!(lock.release().await);
    let loads = store.load_count();

    // default reload interval is 10s
    tokio::time::sleep(Duration::from_secs(21)).await;
    assert_eq!(store.load_count(), loads + 2);

    drop(lock);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(store.load_count(), loads + 2);
}
