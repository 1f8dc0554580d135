//! Shared test helpers for `tapescan-core` unit tests.
//!
//! Consolidates builders for transactions, scripts and tapes so that tests
//! across modules share a single source of truth for dummy data.

use crate::script::{address_from_pkh, p2pkh_script_hex};
use crate::types::{OutPointRef, Script, TransactionDetail, TxInput, TxOutput};

// ==============================================================================
// Id Helpers
// ==============================================================================

/// A deterministic 64-hex txid from a single distinguishing byte.
pub fn txid(b: u8) -> String {
    let mut bytes = [0u8; 32];
    bytes[0] = b;
    bytes[31] = 0xee;
    hex::encode(bytes)
}

/// A deterministic 20-byte public-key hash from a single distinguishing byte.
pub fn pkh(b: u8) -> String {
    format!("{b:02x}").repeat(20)
}

pub fn address_of(pkh: &str) -> String {
    address_from_pkh(pkh).expect("test pkh is 40 hex characters")
}

// ==============================================================================
// Script Builders
// ==============================================================================

pub fn p2pkh_asm(pkh: &str) -> String {
    format!("OP_DUP OP_HASH160 {pkh} OP_EQUALVERIFY OP_CHECKSIG")
}

pub fn p2pkh_script(pkh: &str) -> Script {
    Script::new(p2pkh_script_hex(pkh), p2pkh_asm(pkh))
}

/// A fungible-token code script whose holder push is `combined`.
pub fn ft_code_asm(combined: &str) -> String {
    format!("OP_9 OP_PICK OP_TOALTSTACK OP_1 OP_PICK OP_SIZE OP_DROP OP_RETURN {combined} 32436f6465")
}

pub fn ft_code_script(combined: &str) -> Script {
    Script::new(format!("5979{combined}"), ft_code_asm(combined))
}

pub fn multisig_script() -> Script {
    Script::new(
        "5221aa21bb52ae",
        "OP_2 02aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa 02bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb OP_2 OP_CHECKMULTISIG",
    )
}

/// A pool tape with partial hashes `11..`/`22..` and contract id `cd..`.
pub fn pool_tape_asm(lp: u64, token: u64, base: u64, fee_rate: Option<u64>) -> String {
    let hashes = format!("{}{}", "11".repeat(32), "22".repeat(32));
    let balances = format!(
        "{}{}{}",
        hex::encode(lp.to_le_bytes()),
        hex::encode(token.to_le_bytes()),
        hex::encode(base.to_le_bytes())
    );
    let contract = "cd".repeat(32);
    match fee_rate {
        Some(fee) => format!("0 OP_RETURN {hashes} {balances} {contract} {fee} 4c50"),
        None => format!("0 OP_RETURN {hashes} {balances} {contract} 4c50"),
    }
}

// ==============================================================================
// Transaction Builders
// ==============================================================================

/// A coinbase input (no prevout).
pub fn coinbase_input() -> TxInput {
    TxInput { prevout: None }
}

/// A spending input referencing `funding_txid:vout`.
pub fn spending_input(funding_txid: &str, vout: u32) -> TxInput {
    TxInput {
        prevout: Some(OutPointRef {
            txid: funding_txid.to_owned(),
            vout,
        }),
    }
}

pub fn output(value: u64, index: u32, script: Script) -> TxOutput {
    TxOutput {
        value,
        index,
        script,
    }
}

/// Build a transaction; a non-zero `time` makes it confirmed.
pub fn make_tx(txid: &str, inputs: Vec<TxInput>, outputs: Vec<TxOutput>, time: u64) -> TransactionDetail {
    let confirmed = time > 0;
    TransactionDetail {
        txid: txid.to_owned(),
        block_hash: confirmed.then(|| "00".repeat(32)),
        confirmations: u64::from(confirmed),
        time,
        inputs,
        outputs,
    }
}
