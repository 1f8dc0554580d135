//! Single-entity lookups built on the same primitives as history
//! reconciliation.

use serde::Serialize;
use tracing::debug;

use crate::error::CoreError;
use crate::rpc::types::confirmed_height;
use crate::rpc::{is_txid, IndexRpc, NodeRpc};
use crate::script::address_script_hash;
use crate::token::PoolTape;
use crate::types::{to_display, AddressBalance, ScriptKind, Utxo};

/// Decoded state of a liquidity pool, read from its pool NFT transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolState {
    pub pool_txid: String,
    /// Output carrying the tape.
    pub tape_vout: u32,
    #[serde(flatten)]
    pub tape: PoolTape,
}

pub async fn address_balance(index: &dyn IndexRpc, address: &str) -> Result<AddressBalance, CoreError> {
    let script_hash = address_script_hash(address)?;
    let balance = index.get_balance(&script_hash).await?;
    debug!(address, confirmed = balance.confirmed, unconfirmed = balance.unconfirmed, "address balance");
    Ok(AddressBalance {
        address: address.to_owned(),
        confirmed: balance.confirmed,
        unconfirmed: balance.unconfirmed,
        balance: to_display(balance.confirmed.saturating_add(balance.unconfirmed)),
    })
}

pub async fn address_utxos(index: &dyn IndexRpc, address: &str) -> Result<Vec<Utxo>, CoreError> {
    let script_hash = address_script_hash(address)?;
    let unspent = index.list_unspent(&script_hash).await?;
    Ok(unspent
        .into_iter()
        .map(|item| Utxo {
            txid: item.tx_hash,
            vout: item.tx_pos,
            value: item.value,
            height: confirmed_height(item.height),
        })
        .collect())
}

/// Decode the first tape output of the pool NFT transaction `pool_txid`.
pub async fn pool_state(node: &dyn NodeRpc, pool_txid: &str) -> Result<PoolState, CoreError> {
    if !is_txid(pool_txid) {
        return Err(CoreError::InvalidInput(format!(
            "`{pool_txid}` is not a transaction id"
        )));
    }
    let tx = node.get_transaction(pool_txid).await?;
    let tape_output = tx
        .outputs
        .iter()
        .find(|output| output.script.kind == ScriptKind::TokenPoolTape)
        .ok_or_else(|| {
            CoreError::InvalidInput(format!("{pool_txid} carries no pool tape output"))
        })?;

    Ok(PoolState {
        pool_txid: tx.txid.clone(),
        tape_vout: tape_output.index,
        tape: PoolTape::from_script(&tape_output.script)?,
    })
}
