//! Domain types shared across the engine.
//!
//! Upstream-facing shapes (`TxRef`, `TransactionDetail`, `Script`), the
//! output contract (`HistoryRecord`, `HistoryPage`, balances, UTXOs) and
//! the shared enums `ScriptKind`, `TokenFlavor` and `TxType`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::script::classify_script;

/// Base units per display unit of the chain's native coin.
pub const COIN: u64 = 1_000_000;

/// Convert a signed base-unit amount to display units.
pub fn to_display(base_units: i64) -> f64 {
    base_units as f64 / COIN as f64
}

// ==============================================================================
// Script Classification
// ==============================================================================

/// Which token contract a code script belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenFlavor {
    Fungible,
    NonFungible,
}

/// Classification of a locking script, derived once from its disassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptKind {
    PlainPay,
    MultisigPay,
    TokenCode(TokenFlavor),
    /// Return-data carrier: token tapes and pool state.
    TokenPoolTape,
    Unknown,
}

impl std::fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PlainPay => write!(f, "plain_pay"),
            Self::MultisigPay => write!(f, "multisig_pay"),
            Self::TokenCode(TokenFlavor::Fungible) => write!(f, "ft_code"),
            Self::TokenCode(TokenFlavor::NonFungible) => write!(f, "nft_code"),
            Self::TokenPoolTape => write!(f, "tape"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A locking script in raw and disassembled form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub hex: String,
    pub asm: String,
    pub kind: ScriptKind,
}

impl Script {
    pub fn new(hex: impl Into<String>, asm: impl Into<String>) -> Self {
        let asm = asm.into();
        let kind = classify_script(&asm);
        Self {
            hex: hex.into(),
            asm,
            kind,
        }
    }
}

// ==============================================================================
// Upstream Transaction Data
// ==============================================================================

/// An entry of a script hash's transaction index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxRef {
    pub txid: String,
    /// Block height, `0` while unconfirmed.
    pub height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPointRef {
    pub txid: String,
    pub vout: u32,
}

/// A transaction input. `prevout` is `None` for the coinbase input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub prevout: Option<OutPointRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Value in base units.
    pub value: u64,
    pub index: u32,
    pub script: Script,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDetail {
    pub txid: String,
    pub block_hash: Option<String>,
    pub confirmations: u64,
    /// Block time in unix seconds, `0` while unconfirmed.
    pub time: u64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl TransactionDetail {
    pub fn is_confirmed(&self) -> bool {
        self.confirmations > 0
    }

    /// A coinbase transaction has exactly one input and it has no prevout.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_none()
    }

    pub fn output(&self, vout: u32) -> Option<&TxOutput> {
        self.outputs
            .iter()
            .find(|o| o.index == vout)
            .or_else(|| self.outputs.get(vout as usize))
    }
}

// ==============================================================================
// History
// ==============================================================================

/// Classified type of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxType {
    #[serde(rename = "P2PKH")]
    Native,
    #[serde(rename = "FT")]
    FungibleToken,
    #[serde(rename = "NFT")]
    NonFungibleToken,
    #[serde(rename = "P2MS")]
    Multisig,
}

impl std::fmt::Display for TxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => write!(f, "P2PKH"),
            Self::FungibleToken => write!(f, "FT"),
            Self::NonFungibleToken => write!(f, "NFT"),
            Self::Multisig => write!(f, "P2MS"),
        }
    }
}

/// One reconciled history entry for a queried address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub txid: String,
    /// Signed change of the queried address's native balance, display units.
    pub balance_change: f64,
    /// Display units; zero for coinbase transactions.
    pub fee: f64,
    /// Never empty; falls back to the queried address.
    pub senders: BTreeSet<String>,
    /// Never empty; falls back to the queried address.
    pub recipients: BTreeSet<String>,
    /// Block time in unix seconds, `0` while unconfirmed.
    pub timestamp: u64,
    pub utc_time: String,
    pub tx_type: TxType,
}

/// A page of reconciled history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub address: String,
    pub script_hash: String,
    /// Number of references in the full index, before paging.
    pub total: usize,
    pub page: usize,
    pub size: usize,
    /// References on this page that could not be resolved and were dropped.
    pub skipped: usize,
    pub history: Vec<HistoryRecord>,
}

// ==============================================================================
// Single-Entity Lookups
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressBalance {
    pub address: String,
    /// Base units.
    pub confirmed: i64,
    /// Base units; may be negative while spends are unconfirmed.
    pub unconfirmed: i64,
    /// Confirmed plus unconfirmed, display units.
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    /// Base units.
    pub value: u64,
    /// `0` while unconfirmed.
    pub height: u64,
}
