use async_trait::async_trait;

use crate::error::{CoreError, RpcError};
use crate::transport::{ConnectionFactory, RpcConnection};
use crate::types::TransactionDetail;

use super::parsing::parse_transaction;
use super::types::ChainInfo;
use super::{NodeRpc, RpcClient};

#[async_trait]
impl<F> NodeRpc for RpcClient<F>
where
    F: ConnectionFactory,
    F::Connection: RpcConnection,
{
    async fn get_transaction(&self, txid: &str) -> Result<TransactionDetail, CoreError> {
        let raw = self
            .call_raw(
                "getrawtransaction",
                &[serde_json::json!(txid), serde_json::json!(1)],
            )
            .await
            .map_err(|err| normalize_getrawtransaction_error(txid, err))?;
        parse_transaction(&raw)
    }

    async fn get_blockchain_info(&self) -> Result<ChainInfo, CoreError> {
        Ok(self.call("getblockchaininfo", vec![]).await?)
    }
}

fn normalize_getrawtransaction_error(txid: &str, err: RpcError) -> CoreError {
    match err {
        RpcError::ServerError { code, message } if is_tx_not_found_server_error(code, &message) => {
            CoreError::TxNotFound(txid.to_owned())
        }
        other => CoreError::Rpc(other),
    }
}

fn is_tx_not_found_server_error(code: i64, message: &str) -> bool {
    if code != -5 {
        return false;
    }

    let msg = message.to_ascii_lowercase();
    msg.contains("not found") || msg.contains("no such mempool or blockchain transaction")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_not_found_error() {
        let err = normalize_getrawtransaction_error(
            "ab",
            RpcError::ServerError {
                code: -5,
                message: "No such mempool or blockchain transaction. Use gettransaction for wallet transactions.".into(),
            },
        );
        assert!(matches!(err, CoreError::TxNotFound(ref txid) if txid == "ab"));
    }

    #[test]
    fn normalize_keeps_other_server_errors() {
        let err = normalize_getrawtransaction_error(
            "ab",
            RpcError::ServerError {
                code: -8,
                message: "parameter 1 must be hexadecimal".into(),
            },
        );
        assert!(matches!(err, CoreError::Rpc(RpcError::ServerError { code: -8, .. })));
    }

    #[test]
    fn code_minus_five_needs_matching_message() {
        assert!(!is_tx_not_found_server_error(-5, "Invalid address"));
        assert!(is_tx_not_found_server_error(-5, "Transaction not found"));
    }
}
