//! Script codec: byte-order helpers, address/script conversions and script
//! classification.
//!
//! Everything here is pure. Classification works on the disassembled (ASM)
//! form by prefix/suffix matching; no script is ever executed.

use bitcoin::base58;
use bitcoin::hashes::{sha256, Hash};
use serde::Serialize;

use crate::error::DecodeError;
use crate::types::{Script, ScriptKind, TokenFlavor};

// ==============================================================================
// Layout Constants
// ==============================================================================

/// Hex width of a 20-byte public-key hash.
pub const PKH_HEX_LEN: usize = 40;
/// Hex width of a combined script: public-key hash plus one type byte.
pub const COMBINED_SCRIPT_HEX_LEN: usize = PKH_HEX_LEN + 2;
/// Combined-script suffix of an ordinary single-key holder.
pub const HOLDER_SUFFIX: &str = "00";
/// Combined-script suffix of a multisig- or pool-controlled holder.
pub const CONTROLLED_SUFFIX: &str = "01";
/// Base58Check version byte of a pay-to-pubkey-hash address.
const ADDRESS_VERSION: u8 = 0x00;

const FT_CODE_PREFIX: &[&str] = &["OP_9", "OP_PICK", "OP_TOALTSTACK"];
const NFT_CODE_PREFIX: &[&str] = &["OP_1", "OP_PICK", "OP_3", "OP_SPLIT", "OP_NIP"];
/// Position, counted from the end, of the combined-script push inside a
/// token code script (the last field is the contract tag).
const CODE_HOLDER_FIELD_FROM_END: usize = 2;

// ==============================================================================
// Hex and Byte Order
// ==============================================================================

/// Reverse the order of the 2-hex-character bytes in `hex[start..end]`.
///
/// Returns `None` for an empty or inverted range, a range past the end of
/// the string, an odd-width range, or non-ASCII input.
pub fn reverse_byte_pairs(hex: &str, start: usize, end: usize) -> Option<String> {
    if start >= end || end > hex.len() || (end - start) % 2 != 0 || !hex.is_ascii() {
        return None;
    }
    let bytes = &hex.as_bytes()[start..end];
    let mut out = String::with_capacity(bytes.len());
    for pair in bytes.chunks_exact(2).rev() {
        out.push(char::from(pair[0]));
        out.push(char::from(pair[1]));
    }
    Some(out)
}

/// Parse a big-endian hex string as an unsigned integer.
pub fn hex_to_int(hex: &str) -> Result<u64, DecodeError> {
    if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DecodeError::InvalidHex(hex.to_owned()));
    }
    let significant = hex.trim_start_matches('0');
    if significant.len() > 16 {
        return Err(DecodeError::Overflow(hex.to_owned()));
    }
    if significant.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(significant, 16).map_err(|_| DecodeError::InvalidHex(hex.to_owned()))
}

/// Parse a little-endian hex string as an unsigned integer.
pub fn reversed_hex_to_int(hex: &str) -> Result<u64, DecodeError> {
    let big_endian = reverse_byte_pairs(hex, 0, hex.len())
        .ok_or_else(|| DecodeError::InvalidHex(hex.to_owned()))?;
    hex_to_int(&big_endian)
}

fn is_hex_of_len(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| b.is_ascii_hexdigit())
}

// ==============================================================================
// Addresses and Combined Scripts
// ==============================================================================

/// Base58Check address of a 20-byte public-key hash.
pub fn address_from_pkh(pkh: &str) -> Result<String, DecodeError> {
    if !is_hex_of_len(pkh, PKH_HEX_LEN) {
        return Err(DecodeError::InvalidHex(pkh.to_owned()));
    }
    let hash = hex::decode(pkh).map_err(|_| DecodeError::InvalidHex(pkh.to_owned()))?;
    let mut payload = Vec::with_capacity(1 + hash.len());
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(&hash);
    Ok(base58::encode_check(&payload))
}

/// Public-key hash (lowercase hex) carried by a Base58Check address.
pub fn pkh_from_address(address: &str) -> Result<String, DecodeError> {
    let invalid = |reason: String| DecodeError::InvalidAddress {
        address: address.to_owned(),
        reason,
    };
    let payload = base58::decode_check(address).map_err(|e| invalid(e.to_string()))?;
    match payload.split_first() {
        Some((&ADDRESS_VERSION, hash)) if hash.len() == PKH_HEX_LEN / 2 => Ok(hex::encode(hash)),
        Some((&version, _)) if version != ADDRESS_VERSION => {
            Err(invalid(format!("unsupported version byte {version:#04x}")))
        }
        _ => Err(invalid(format!("unexpected payload length {}", payload.len()))),
    }
}

/// Address form of a combined script. Only `00`-suffixed scripts have one.
pub fn address_from_combined_script(combined: &str) -> Result<String, DecodeError> {
    if !is_hex_of_len(combined, COMBINED_SCRIPT_HEX_LEN) {
        return Err(DecodeError::InvalidCombinedScript(combined.to_owned()));
    }
    let (pkh, suffix) = combined.split_at(PKH_HEX_LEN);
    match suffix {
        HOLDER_SUFFIX => address_from_pkh(pkh),
        CONTROLLED_SUFFIX => Err(DecodeError::NoAddressForm(combined.to_owned())),
        _ => Err(DecodeError::InvalidCombinedScript(combined.to_owned())),
    }
}

/// Combined script of an ordinary holder address.
pub fn combined_script_from_address(address: &str) -> Result<String, DecodeError> {
    Ok(format!("{}{HOLDER_SUFFIX}", pkh_from_address(address)?))
}

/// Standard pay-to-pubkey-hash locking script for `pkh`, as hex.
pub fn p2pkh_script_hex(pkh: &str) -> String {
    format!("76a914{pkh}88ac")
}

/// Index-server key of a locking script: SHA-256 of the script bytes,
/// byte-reversed, as hex.
pub fn script_hash(script_hex: &str) -> Result<String, DecodeError> {
    let bytes = hex::decode(script_hex).map_err(|_| DecodeError::InvalidHex(script_hex.to_owned()))?;
    let mut digest = sha256::Hash::hash(&bytes).to_byte_array();
    digest.reverse();
    Ok(hex::encode(digest))
}

/// Index-server key of an address's pay-to-pubkey-hash script.
pub fn address_script_hash(address: &str) -> Result<String, DecodeError> {
    script_hash(&p2pkh_script_hex(&pkh_from_address(address)?))
}

// ==============================================================================
// Classification
// ==============================================================================

/// Classify a locking script from its ASM form.
pub fn classify_script(asm: &str) -> ScriptKind {
    let fields: Vec<&str> = asm.split_whitespace().collect();

    if is_plain_pay(&fields) {
        ScriptKind::PlainPay
    } else if is_return_data(&fields) {
        ScriptKind::TokenPoolTape
    } else if fields.starts_with(FT_CODE_PREFIX) {
        ScriptKind::TokenCode(TokenFlavor::Fungible)
    } else if fields.starts_with(NFT_CODE_PREFIX) {
        ScriptKind::TokenCode(TokenFlavor::NonFungible)
    } else if fields.last() == Some(&"OP_CHECKMULTISIG") {
        ScriptKind::MultisigPay
    } else {
        ScriptKind::Unknown
    }
}

fn is_plain_pay(fields: &[&str]) -> bool {
    matches!(
        fields,
        ["OP_DUP", "OP_HASH160", pkh, "OP_EQUALVERIFY", "OP_CHECKSIG"] if is_hex_of_len(pkh, PKH_HEX_LEN)
    )
}

fn is_return_data(fields: &[&str]) -> bool {
    matches!(
        fields,
        ["OP_RETURN", ..] | ["0" | "OP_0" | "OP_FALSE", "OP_RETURN", ..]
    )
}

/// Public-key hash of a plain pay-to-pubkey-hash script.
pub fn plain_pay_pkh(asm: &str) -> Option<&str> {
    let mut fields = asm.split_whitespace();
    match (fields.next(), fields.next(), fields.next()) {
        (Some("OP_DUP"), Some("OP_HASH160"), Some(pkh)) if is_hex_of_len(pkh, PKH_HEX_LEN) => {
            Some(pkh)
        }
        _ => None,
    }
}

/// Combined script pushed inside a token code script, if present.
pub fn token_code_holder(asm: &str) -> Option<&str> {
    let fields: Vec<&str> = asm.split_whitespace().collect();
    let idx = fields.len().checked_sub(CODE_HOLDER_FIELD_FROM_END)?;
    let candidate = fields[idx];
    is_hex_of_len(candidate, COMBINED_SCRIPT_HEX_LEN).then_some(candidate)
}

// ==============================================================================
// Holders
// ==============================================================================

/// The party a locking script pays to, as far as the script reveals it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Holder {
    /// An ordinary holder with an address form.
    Address(String),
    /// A `01`-suffixed holder or bare multisig: pool- or multisig-controlled.
    Controlled(String),
    /// A script with no recognizable holder, keyed by its script hash.
    Opaque(String),
}

impl Holder {
    /// Address, or a synthetic label for holders without an address form.
    pub fn label(&self) -> String {
        match self {
            Self::Address(address) => address.clone(),
            Self::Controlled(key) => format!("Pool_or_MS_{key}"),
            Self::Opaque(key) => format!("Pool_{key}"),
        }
    }

    pub fn address(&self) -> Option<&str> {
        match self {
            Self::Address(address) => Some(address),
            _ => None,
        }
    }
}

/// Derive the holder of a classified script. Return-data scripts have none.
pub fn script_holder(script: &Script) -> Option<Holder> {
    match script.kind {
        ScriptKind::TokenPoolTape => None,
        ScriptKind::PlainPay => plain_pay_pkh(&script.asm)
            .and_then(|pkh| address_from_pkh(pkh).ok())
            .map(Holder::Address)
            .or_else(|| opaque_holder(script)),
        ScriptKind::TokenCode(_) => match token_code_holder(&script.asm) {
            Some(combined) => match address_from_combined_script(combined) {
                Ok(address) => Some(Holder::Address(address)),
                Err(_) => Some(Holder::Controlled(combined[..PKH_HEX_LEN].to_owned())),
            },
            None => opaque_holder(script),
        },
        ScriptKind::MultisigPay => script_hash(&script.hex).ok().map(Holder::Controlled),
        ScriptKind::Unknown => opaque_holder(script),
    }
}

fn opaque_holder(script: &Script) -> Option<Holder> {
    script_hash(&script.hex).ok().map(Holder::Opaque)
}

// ==============================================================================
// Tests
// ==============================================================================
