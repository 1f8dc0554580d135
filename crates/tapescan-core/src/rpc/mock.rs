use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::{CoreError, RpcError, TransportError};
use crate::types::TransactionDetail;

use super::types::{ChainInfo, HistoryItem, ScriptBalance, UnspentItem};
use super::{IndexRpc, NodeRpc};

// ==============================================================================
// Node Mock
// ==============================================================================

/// A mock node backend for testing. Returns canned transaction data from a
/// `HashMap` populated via the builder pattern, and counts lookups so tests
/// can assert on read-through behavior.
pub struct MockNode {
    transactions: HashMap<String, TransactionDetail>,
    failing: HashSet<String>,
    chain_info: ChainInfo,
    lookups: AtomicUsize,
}

impl MockNode {
    pub fn builder() -> MockNodeBuilder {
        MockNodeBuilder {
            transactions: HashMap::new(),
            failing: HashSet::new(),
            chain_info: ChainInfo {
                chain: "regtest".into(),
                blocks: 100,
                best_block_hash: "00".repeat(32),
            },
        }
    }

    /// Number of `get_transaction` calls served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

pub struct MockNodeBuilder {
    transactions: HashMap<String, TransactionDetail>,
    failing: HashSet<String>,
    chain_info: ChainInfo,
}

impl MockNodeBuilder {
    pub fn with_tx(mut self, tx: TransactionDetail) -> Self {
        self.transactions.insert(tx.txid.clone(), tx);
        self
    }

    /// Make lookups of `txid` fail with a transport error.
    pub fn with_failure(mut self, txid: impl Into<String>) -> Self {
        self.failing.insert(txid.into());
        self
    }

    pub fn with_chain_info(mut self, info: ChainInfo) -> Self {
        self.chain_info = info;
        self
    }

    pub fn build(self) -> MockNode {
        MockNode {
            transactions: self.transactions,
            failing: self.failing,
            chain_info: self.chain_info,
            lookups: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl NodeRpc for MockNode {
    async fn get_transaction(&self, txid: &str) -> Result<TransactionDetail, CoreError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if self.failing.contains(txid) {
            return Err(RpcError::Transport(TransportError::Protocol("injected failure".into())).into());
        }
        self.transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| CoreError::TxNotFound(txid.to_owned()))
    }

    async fn get_blockchain_info(&self) -> Result<ChainInfo, CoreError> {
        Ok(self.chain_info.clone())
    }
}

// ==============================================================================
// Index Mock
// ==============================================================================

/// A mock index server keyed by script hash. Unknown script hashes have an
/// empty history, no unspent outputs and a zero balance.
#[derive(Default)]
pub struct MockIndex {
    histories: HashMap<String, Vec<HistoryItem>>,
    unspent: HashMap<String, Vec<UnspentItem>>,
    balances: HashMap<String, ScriptBalance>,
}

impl MockIndex {
    pub fn builder() -> MockIndexBuilder {
        MockIndexBuilder {
            index: Self::default(),
        }
    }
}

pub struct MockIndexBuilder {
    index: MockIndex,
}

impl MockIndexBuilder {
    /// Append a history entry. Entries keep insertion order, so add them
    /// oldest first.
    pub fn with_history(mut self, script_hash: &str, tx_hash: &str, height: i64) -> Self {
        self.index
            .histories
            .entry(script_hash.to_owned())
            .or_default()
            .push(HistoryItem {
                tx_hash: tx_hash.to_owned(),
                height,
            });
        self
    }

    pub fn with_unspent(mut self, script_hash: &str, item: UnspentItem) -> Self {
        self.index
            .unspent
            .entry(script_hash.to_owned())
            .or_default()
            .push(item);
        self
    }

    pub fn with_balance(mut self, script_hash: &str, confirmed: i64, unconfirmed: i64) -> Self {
        self.index.balances.insert(
            script_hash.to_owned(),
            ScriptBalance {
                confirmed,
                unconfirmed,
            },
        );
        self
    }

    pub fn build(self) -> MockIndex {
        self.index
    }
}

#[async_trait]
impl IndexRpc for MockIndex {
    async fn get_history(&self, script_hash: &str) -> Result<Vec<HistoryItem>, CoreError> {
        Ok(self.histories.get(script_hash).cloned().unwrap_or_default())
    }

    async fn list_unspent(&self, script_hash: &str) -> Result<Vec<UnspentItem>, CoreError> {
        Ok(self.unspent.get(script_hash).cloned().unwrap_or_default())
    }

    async fn get_balance(&self, script_hash: &str) -> Result<ScriptBalance, CoreError> {
        Ok(self.balances.get(script_hash).copied().unwrap_or(ScriptBalance {
            confirmed: 0,
            unconfirmed: 0,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    #[tokio::test]
    async fn with_chain_info_overrides_defaults() {
        let node = MockNode::builder()
            .with_chain_info(ChainInfo {
                chain: "main".into(),
                blocks: 800_000,
                best_block_hash: "11".repeat(32),
            })
            .build();
        let info = node.get_blockchain_info().await.expect("info");
        assert_eq!(info.chain, "main");
        assert_eq!(info.blocks, 800_000);
    }

    #[tokio::test]
    async fn unknown_and_failing_transactions() {
        let known = txid(1);
        let node = MockNode::builder()
            .with_tx(make_tx(&known, vec![coinbase_input()], vec![], 0))
            .with_failure(txid(2))
            .build();

        assert!(node.get_transaction(&known).await.is_ok());
        assert!(matches!(
            node.get_transaction(&txid(3)).await,
            Err(CoreError::TxNotFound(_))
        ));
        assert!(matches!(
            node.get_transaction(&txid(2)).await,
            Err(CoreError::Rpc(RpcError::Transport(_)))
        ));
        assert_eq!(node.lookups(), 3);
    }

    #[tokio::test]
    async fn index_history_keeps_insertion_order() {
        let index = MockIndex::builder()
            .with_history("sh", &txid(1), 10)
            .with_history("sh", &txid(2), 0)
            .build();
        let history = index.get_history("sh").await.expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].tx_hash, txid(1));
        assert!(index.get_history("other").await.expect("history").is_empty());
    }
}
