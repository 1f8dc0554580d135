//! Upstream RPC abstraction layer.
//!
//! Defines the [`NodeRpc`] and [`IndexRpc`] traits the engine resolves data
//! through, the generic pooled [`RpcClient`] that implements both over a
//! [`ConnectionFactory`](crate::transport::ConnectionFactory), and an in-crate
//! test mock (`mock::{MockNode, MockIndex}`).

mod client;
mod index;
#[cfg(test)]
pub mod mock;
mod node;
mod parsing;
pub mod protocol;
pub mod types;

pub use client::RpcClient;
pub use types::{ChainInfo, HistoryItem, ScriptBalance, UnspentItem};

pub(crate) use parsing::is_txid;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::transport::{HttpTransport, SocketTransport};
use crate::types::TransactionDetail;

/// JSON-RPC client for the blockchain node over pooled HTTP.
pub type NodeClient = RpcClient<HttpTransport>;
/// JSON-RPC client for the script-hash index server over pooled sockets.
pub type IndexClient = RpcClient<SocketTransport>;

/// Node RPC methods the engine needs.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Fetch a decoded transaction by txid. A transaction the node does not
    /// know is reported as [`CoreError::TxNotFound`].
    async fn get_transaction(&self, txid: &str) -> Result<TransactionDetail, CoreError>;

    /// Fetch basic chain info (network, block count, tip).
    async fn get_blockchain_info(&self) -> Result<ChainInfo, CoreError>;
}

/// Script-hash index server methods the engine needs.
#[async_trait]
pub trait IndexRpc: Send + Sync {
    /// Transaction references touching `script_hash`, oldest first.
    async fn get_history(&self, script_hash: &str) -> Result<Vec<HistoryItem>, CoreError>;

    async fn list_unspent(&self, script_hash: &str) -> Result<Vec<UnspentItem>, CoreError>;

    async fn get_balance(&self, script_hash: &str) -> Result<ScriptBalance, CoreError>;
}
