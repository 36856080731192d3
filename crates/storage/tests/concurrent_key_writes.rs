//! Concurrent key creation against a shared `MemoryBackend`.
//!
//! Many writers race to create the first key of an app the way key managers
//! in separate processes would. Whichever protocol is used, exactly one
//! writer must win and every loser must observe the winner's key.

#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use sessionkit_storage::{
    AppIdentifier, KeyValueInfo, MemoryBackend, OptimisticKeyStorage, StorageError,
    TransactionalKeyStorage,
    keys::{KvOptimisticKeyStorage, KvTransactionalKeyStorage},
};
use tokio::sync::Barrier;

const WRITERS: usize = 16;

fn app() -> AppIdentifier {
    AppIdentifier::new(None, Some("a1"))
}

// ---------------------------------------------------------------------------
// Optimistic
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn optimistic_first_key_has_one_winner() {
    let storage = Arc::new(KvOptimisticKeyStorage::new(MemoryBackend::new()));
    let barrier = Arc::new(Barrier::new(WRITERS));

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let storage = Arc::clone(&storage);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                storage
                    .add_access_token_signing_key_if_unchanged(
                        &app(),
                        KeyValueInfo::new(format!("key-{i}"), 1_000 + i as i64),
                        None,
                    )
                    .await
                    .expect("conditional add")
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.expect("join") {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(storage.get_access_token_signing_keys(&app()).await.expect("get").len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn optimistic_rotation_from_same_predecessor_has_one_winner() {
    let storage = Arc::new(KvOptimisticKeyStorage::new(MemoryBackend::new()));
    assert!(
        storage
            .add_access_token_signing_key_if_unchanged(&app(), KeyValueInfo::new("k0", 1_000), None)
            .await
            .expect("seed")
    );
    let barrier = Arc::new(Barrier::new(WRITERS));

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let storage = Arc::clone(&storage);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                storage
                    .add_access_token_signing_key_if_unchanged(
                        &app(),
                        KeyValueInfo::new(format!("k{}", i + 1), 2_000 + i as i64),
                        Some(1_000),
                    )
                    .await
                    .expect("conditional add")
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.expect("join") {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(storage.get_access_token_signing_keys(&app()).await.expect("get").len(), 2);
}

// ---------------------------------------------------------------------------
// Transactional
// ---------------------------------------------------------------------------

/// One create-if-empty attempt. `Ok(true)` if this attempt created the key.
async fn create_if_empty(
    storage: &KvTransactionalKeyStorage<MemoryBackend>,
    value: String,
) -> Result<bool, StorageError> {
    let mut txn = storage.begin_transaction().await?;
    if !storage.get_access_token_signing_keys(txn.as_ref(), &app()).await?.is_empty() {
        return Ok(false);
    }
    storage.add_access_token_signing_key(txn.as_mut(), &app(), KeyValueInfo::new(value, 1_000)).await?;
    txn.commit().await?;
    Ok(true)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transactional_first_key_has_one_winner() {
    let storage = Arc::new(KvTransactionalKeyStorage::new(MemoryBackend::new()));
    let barrier = Arc::new(Barrier::new(WRITERS));

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let storage = Arc::clone(&storage);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                // Retry on conflict until this writer either wins or sees a key.
                loop {
                    match create_if_empty(&storage, format!("key-{i}")).await {
                        Err(StorageError::Conflict) => continue,
                        other => break other.expect("create attempt"),
                    }
                }
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.expect("join") {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let txn = storage.begin_transaction().await.expect("begin");
    let keys = storage.get_access_token_signing_keys(txn.as_ref(), &app()).await.expect("get");
    assert_eq!(keys.len(), 1);
}
