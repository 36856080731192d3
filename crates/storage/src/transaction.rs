//! Transaction trait for atomic storage operations.
//!
//! Transactions buffer writes until [`Transaction::commit`] and give
//! serializable semantics: every key read through the transaction is
//! re-validated at commit, so two transactions that read the same key and both
//! write will not both commit.
//!
//! # Example
//!
//! ```
//! use sessionkit_storage::{MemoryBackend, StorageBackend};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//! backend.set(b"counter".to_vec(), b"1".to_vec()).await.unwrap();
//!
//! let mut txn = backend.transaction().await.unwrap();
//! let current = txn.get(b"counter").await.unwrap();
//! assert_eq!(current.as_deref(), Some(&b"1"[..]));
//! txn.set(b"counter".to_vec(), b"2".to_vec());
//! txn.commit().await.unwrap();
//!
//! let value = backend.get(b"counter").await.unwrap().unwrap();
//! assert_eq!(&value[..], b"2");
//! # });
//! ```

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// Transaction handle for atomic multi-operation commits.
///
/// A transaction buffers sets and deletes until [`commit`](Transaction::commit)
/// is called, at which point all operations are applied atomically.
///
/// Reads see the transaction's own pending writes. Reads that fall through to
/// the backend are remembered; if any of those keys changed by the time the
/// transaction commits, the commit fails with
/// [`StorageError::Conflict`](crate::StorageError::Conflict) and nothing is
/// applied.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Gets a value within the transaction.
    ///
    /// Pending writes take precedence over the backend. A key read from the
    /// backend joins the transaction's read set.
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Buffers a set operation.
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>);

    /// Buffers a delete operation.
    fn delete(&mut self, key: Vec<u8>);

    /// Buffers a compare-and-set operation.
    ///
    /// The condition is evaluated at commit time; `expected: None` requires
    /// the key to be absent. A failed condition fails the whole commit.
    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) -> StorageResult<()>;

    /// Commits all buffered operations atomically.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Conflict`](crate::StorageError::Conflict) if a key in the read set changed
    ///   or a compare-and-set condition failed
    /// - Other [`StorageError`](crate::StorageError) variants on backend failures
    async fn commit(self: Box<Self>) -> StorageResult<()>;
}
