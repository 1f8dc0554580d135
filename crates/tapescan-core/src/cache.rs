use std::num::NonZeroUsize;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::RwLock;

use crate::types::{TransactionDetail, TxRef};

// ==============================================================================
// Read-Through Store
// ==============================================================================

/// A faster path consulted before live upstream resolution.
///
/// Whatever a store returns must have the same shape as the upstream would
/// have produced; a miss simply falls through to the upstream.
#[async_trait]
pub trait TxStore: Send + Sync {
    async fn get_tx(&self, txid: &str) -> Option<TransactionDetail>;

    /// Offer a freshly resolved transaction to the store.
    async fn put_tx(&self, tx: &TransactionDetail);

    /// Transaction references for a script hash, oldest first, if the store
    /// maintains an address index.
    async fn get_refs(&self, _script_hash: &str) -> Option<Vec<TxRef>> {
        None
    }
}

// ==============================================================================
// In-Memory Store
// ==============================================================================

/// Bounded in-memory store for decoded transactions.
///
/// Only confirmed transactions are kept: their contents are immutable, so
/// entries never need invalidation, only eviction under memory pressure.
pub struct MemoryStore {
    transactions: RwLock<LruCache<String, TransactionDetail>>,
}

impl MemoryStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            transactions: RwLock::new(LruCache::new(capacity)),
        }
    }

    pub async fn len(&self) -> usize {
        self.transactions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.transactions.read().await.is_empty()
    }
}

#[async_trait]
impl TxStore for MemoryStore {
    async fn get_tx(&self, txid: &str) -> Option<TransactionDetail> {
        // The LRU cache requires a write lock for `get` (it updates recency),
        // but the lookup is fast so the write lock is acceptable.
        self.transactions.write().await.get(txid).cloned()
    }

    async fn put_tx(&self, tx: &TransactionDetail) {
        if !tx.is_confirmed() {
            return;
        }
        self.transactions
            .write()
            .await
            .put(tx.txid.clone(), tx.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    fn store(capacity: usize) -> MemoryStore {
        MemoryStore::new(NonZeroUsize::new(capacity).expect("non-zero"))
    }

    #[tokio::test]
    async fn keeps_confirmed_transactions() {
        let store = store(4);
        let tx = make_tx(&txid(1), vec![coinbase_input()], vec![], 1_700_000_000);
        store.put_tx(&tx).await;
        assert_eq!(store.get_tx(&txid(1)).await, Some(tx));
    }

    #[tokio::test]
    async fn skips_unconfirmed_transactions() {
        let store = store(4);
        store
            .put_tx(&make_tx(&txid(1), vec![coinbase_input()], vec![], 0))
            .await;
        assert!(store.is_empty().await);
        assert_eq!(store.get_tx(&txid(1)).await, None);
    }

    #[tokio::test]
    async fn evicts_least_recently_used() {
        let store = store(2);
        for b in 1..=2 {
            store
                .put_tx(&make_tx(&txid(b), vec![], vec![], 1))
                .await;
        }
        // Touch 1 so that 2 becomes the eviction candidate.
        assert!(store.get_tx(&txid(1)).await.is_some());
        store.put_tx(&make_tx(&txid(3), vec![], vec![], 1)).await;

        assert_eq!(store.len().await, 2);
        assert!(store.get_tx(&txid(1)).await.is_some());
        assert!(store.get_tx(&txid(2)).await.is_none());
    }

    #[tokio::test]
    async fn memory_store_has_no_address_index() {
        assert_eq!(store(1).get_refs("anything").await, None);
    }
}
