use async_trait::async_trait;

use crate::error::CoreError;
use crate::transport::{ConnectionFactory, RpcConnection};

use super::types::{HistoryItem, ScriptBalance, UnspentItem};
use super::{IndexRpc, RpcClient};

#[async_trait]
impl<F> IndexRpc for RpcClient<F>
where
    F: ConnectionFactory,
    F::Connection: RpcConnection,
{
    async fn get_history(&self, script_hash: &str) -> Result<Vec<HistoryItem>, CoreError> {
        Ok(self
            .call(
                "blockchain.scripthash.get_history",
                vec![serde_json::json!(script_hash)],
            )
            .await?)
    }

    async fn list_unspent(&self, script_hash: &str) -> Result<Vec<UnspentItem>, CoreError> {
        Ok(self
            .call(
                "blockchain.scripthash.listunspent",
                vec![serde_json::json!(script_hash)],
            )
            .await?)
    }

    async fn get_balance(&self, script_hash: &str) -> Result<ScriptBalance, CoreError> {
        Ok(self
            .call(
                "blockchain.scripthash.get_balance",
                vec![serde_json::json!(script_hash)],
            )
            .await?)
    }
}
