use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::TxStore;
use crate::error::CoreError;
use crate::rpc::types::confirmed_height;
use crate::rpc::{IndexRpc, NodeRpc};
use crate::script::{address_script_hash, script_holder};
use crate::tasks::fan_out;
use crate::types::{
    to_display, HistoryPage, HistoryRecord, ScriptKind, TokenFlavor, TransactionDetail, TxRef,
    TxType,
};

/// Spend value credited for a coinbase input, which has no previous output.
pub const COINBASE_SPEND_PLACEHOLDER: u64 = 0;

/// `utc_time` of a transaction that is not yet in a block.
pub const UNCONFIRMED_UTC_TIME: &str = "unconfirmed";

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Concurrent lookups per resolution round.
    pub workers: usize,
    /// Pending lookups queued ahead of the workers.
    pub queue_capacity: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_capacity: 64,
        }
    }
}

// ==============================================================================
// History Reconciler
// ==============================================================================

/// Turns an address's transaction index into reconciled history records.
///
/// Upstreams are injected so the same engine runs against live pools or
/// test doubles. A failure resolving any part of one transaction drops that
/// transaction from the page (counted in [`HistoryPage::skipped`]) and never
/// fails the page as a whole.
pub struct HistoryReconciler {
    node: Arc<dyn NodeRpc>,
    index: Arc<dyn IndexRpc>,
    store: Option<Arc<dyn TxStore>>,
    config: ReconcilerConfig,
}

impl HistoryReconciler {
    pub fn new(node: Arc<dyn NodeRpc>, index: Arc<dyn IndexRpc>, config: ReconcilerConfig) -> Self {
        Self {
            node,
            index,
            store: None,
            config,
        }
    }

    /// Consult `store` before the node, and offer it every resolved
    /// transaction.
    pub fn with_store(mut self, store: Arc<dyn TxStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Reconcile page `page` (zero-based, newest first) of `size` entries.
    pub async fn history(
        &self,
        address: &str,
        page: usize,
        size: usize,
        cancel: &CancellationToken,
    ) -> Result<HistoryPage, CoreError> {
        let script_hash = address_script_hash(address)?;
        let refs = self.fetch_index(&script_hash).await?;
        let total = refs.len();
        let page_refs = paginate(&refs, page, size);
        debug!(
            address,
            script_hash = %script_hash,
            total,
            page,
            size,
            on_page = page_refs.len(),
            "reconciling history page"
        );
        ensure_live(cancel)?;

        // Round one: the transactions on the page.
        let primary = self
            .resolve_all(page_refs.iter().map(|r| r.txid.clone()), cancel)
            .await;
        ensure_live(cancel)?;

        // Round two: every distinct transaction spent by a page transaction.
        let prev_txids: HashSet<String> = primary
            .values()
            .flat_map(|tx| tx.inputs.iter())
            .filter_map(|input| input.prevout.as_ref())
            .map(|prevout| prevout.txid.clone())
            .collect();
        let prevs = self.resolve_all(prev_txids, cancel).await;
        ensure_live(cancel)?;

        let mut history = Vec::with_capacity(page_refs.len());
        for tx_ref in &page_refs {
            let Some(tx) = primary.get(&tx_ref.txid) else {
                continue;
            };
            match reconcile_transaction(tx, &prevs, address) {
                Ok(record) => history.push(record),
                Err(e) => warn!(txid = %tx_ref.txid, error = %e, "dropping history item"),
            }
        }
        sort_history(&mut history);

        let skipped = page_refs.len() - history.len();
        if skipped > 0 {
            warn!(address, page, skipped, "history page is incomplete");
        }
        Ok(HistoryPage {
            address: address.to_owned(),
            script_hash,
            total,
            page,
            size,
            skipped,
            history,
        })
    }

    async fn fetch_index(&self, script_hash: &str) -> Result<Vec<TxRef>, CoreError> {
        if let Some(store) = &self.store {
            if let Some(refs) = store.get_refs(script_hash).await {
                return Ok(refs);
            }
        }
        let items = self.index.get_history(script_hash).await?;
        Ok(items
            .into_iter()
            .map(|item| TxRef {
                txid: item.tx_hash,
                height: confirmed_height(item.height),
            })
            .collect())
    }

    /// Resolve `txids` concurrently. Failures are logged and left out of the
    /// returned map.
    async fn resolve_all(
        &self,
        txids: impl IntoIterator<Item = String>,
        cancel: &CancellationToken,
    ) -> HashMap<String, TransactionDetail> {
        let outcome = fan_out(
            txids,
            self.config.workers,
            self.config.queue_capacity,
            cancel,
            |txid| {
                let node = Arc::clone(&self.node);
                let store = self.store.clone();
                async move {
                    match resolve_transaction(node.as_ref(), store.as_deref(), &txid).await {
                        Ok(tx) => Ok(tx),
                        Err(e) => Err((txid, e)),
                    }
                }
            },
        )
        .await;

        for (txid, e) in &outcome.errors {
            warn!(txid = %txid, error = %e, "transaction lookup failed");
        }
        outcome
            .results
            .into_iter()
            .map(|tx| (tx.txid.clone(), tx))
            .collect()
    }
}

async fn resolve_transaction(
    node: &dyn NodeRpc,
    store: Option<&dyn TxStore>,
    txid: &str,
) -> Result<TransactionDetail, CoreError> {
    if let Some(store) = store {
        if let Some(tx) = store.get_tx(txid).await {
            return Ok(tx);
        }
    }
    let tx = node.get_transaction(txid).await?;
    if let Some(store) = store {
        store.put_tx(&tx).await;
    }
    Ok(tx)
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), CoreError> {
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }
    Ok(())
}

// ==============================================================================
// Pagination and Ordering
// ==============================================================================

/// Page `page` of `size` entries of an oldest-first index, read newest
/// first. Pages past the end are empty.
pub fn paginate<T: Clone>(oldest_first: &[T], page: usize, size: usize) -> Vec<T> {
    let start = page.saturating_mul(size);
    oldest_first
        .iter()
        .rev()
        .skip(start)
        .take(size)
        .cloned()
        .collect()
}

/// Unconfirmed entries first, then newest block time first. Equal keys keep
/// their index order.
pub fn sort_history(records: &mut [HistoryRecord]) {
    records.sort_by(|a, b| match (a.timestamp == 0, b.timestamp == 0) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => b.timestamp.cmp(&a.timestamp),
    });
}

// ==============================================================================
// Classification and Accumulation
// ==============================================================================

/// Build the record of `tx` as seen from `address`.
///
/// Every spent output must be resolvable from `prevs`; otherwise the value
/// flow is incomplete and the transaction is rejected.
pub fn reconcile_transaction(
    tx: &TransactionDetail,
    prevs: &HashMap<String, TransactionDetail>,
    address: &str,
) -> Result<HistoryRecord, CoreError> {
    let mut spent: u64 = 0;
    let mut received: u64 = 0;
    let mut delta: i128 = 0;
    let mut senders = BTreeSet::new();
    let mut recipients = BTreeSet::new();

    for input in &tx.inputs {
        let Some(prevout) = &input.prevout else {
            spent = spent.saturating_add(COINBASE_SPEND_PLACEHOLDER);
            continue;
        };
        let prev_tx = prevs
            .get(&prevout.txid)
            .ok_or_else(|| CoreError::TxNotFound(prevout.txid.clone()))?;
        let prev_out = prev_tx.output(prevout.vout).ok_or_else(|| {
            CoreError::InvalidTxData(format!(
                "{}:{} spends a missing output",
                prevout.txid, prevout.vout
            ))
        })?;

        spent = spent.saturating_add(prev_out.value);
        if let Some(holder) = script_holder(&prev_out.script) {
            if holder.address() == Some(address) {
                delta -= i128::from(prev_out.value);
            }
            senders.insert(holder.label());
        }
    }

    for output in &tx.outputs {
        received = received.saturating_add(output.value);
        if let Some(holder) = script_holder(&output.script) {
            if holder.address() == Some(address) {
                delta += i128::from(output.value);
            }
            recipients.insert(holder.label());
        }
    }

    if senders.is_empty() {
        senders.insert(address.to_owned());
    }
    if recipients.is_empty() {
        recipients.insert(address.to_owned());
    }

    let fee = if tx.is_coinbase() {
        0
    } else {
        i128::from(spent) - i128::from(received)
    };

    Ok(HistoryRecord {
        txid: tx.txid.clone(),
        balance_change: to_display(clamp_i64(delta)),
        fee: to_display(clamp_i64(fee)),
        senders,
        recipients,
        timestamp: tx.time,
        utc_time: utc_time(tx.time)?,
        tx_type: transaction_type(tx),
    })
}

fn clamp_i64(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

/// First output kind that names a transaction type, else native.
pub fn transaction_type(tx: &TransactionDetail) -> TxType {
    tx.outputs
        .iter()
        .find_map(|output| match output.script.kind {
            ScriptKind::PlainPay => Some(TxType::Native),
            ScriptKind::TokenCode(TokenFlavor::Fungible) => Some(TxType::FungibleToken),
            ScriptKind::TokenCode(TokenFlavor::NonFungible) => Some(TxType::NonFungibleToken),
            ScriptKind::MultisigPay => Some(TxType::Multisig),
            ScriptKind::TokenPoolTape | ScriptKind::Unknown => None,
        })
        .unwrap_or(TxType::Native)
}

fn utc_time(timestamp: u64) -> Result<String, CoreError> {
    if timestamp == 0 {
        return Ok(UNCONFIRMED_UTC_TIME.to_owned());
    }
    let seconds = i64::try_from(timestamp)
        .map_err(|_| CoreError::InvalidTxData(format!("block time out of range: {timestamp}")))?;
    OffsetDateTime::from_unix_timestamp(seconds)
        .map_err(|e| CoreError::InvalidTxData(format!("block time out of range: {e}")))?
        .format(&Rfc3339)
        .map_err(|e| CoreError::InvalidTxData(format!("format block time: {e}")))
}
