//! RPC-specific response shapes that do not belong to the shared domain model.
//!
//! Decoded transactions are represented directly as
//! [`TransactionDetail`](crate::types::TransactionDetail); this module only
//! defines the small structures returned by the other methods.

use serde::{Deserialize, Serialize};

// ==============================================================================
// Node
// ==============================================================================

/// Basic chain information from `getblockchaininfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub chain: String,
    pub blocks: u64,
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: String,
}

// ==============================================================================
// Index Server
// ==============================================================================

/// One entry of `blockchain.scripthash.get_history`. Mempool entries carry a
/// height of `0` or `-1`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryItem {
    pub tx_hash: String,
    pub height: i64,
}

/// One entry of `blockchain.scripthash.listunspent`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnspentItem {
    pub tx_hash: String,
    pub tx_pos: u32,
    pub height: i64,
    /// Base units.
    pub value: u64,
}

/// Result of `blockchain.scripthash.get_balance`, in base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ScriptBalance {
    pub confirmed: i64,
    pub unconfirmed: i64,
}

/// Clamp an index-server height so mempool markers read as unconfirmed.
pub(crate) fn confirmed_height(height: i64) -> u64 {
    u64::try_from(height).unwrap_or(0)
}
