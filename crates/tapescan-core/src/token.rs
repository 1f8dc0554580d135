//! Token pool tape decoding.
//!
//! A pool tape is the return-data script carried next to a pool NFT. Its
//! disassembly, split on whitespace, is laid out as:
//!
//! | field | content |
//! |---|---|
//! | 0, 1 | return-data marker (`0 OP_RETURN`) |
//! | 2 | LP-token and paired-token partial hashes, 32 bytes each |
//! | 3 | LP, paired-token and base-coin balances, 8 bytes each, little-endian |
//! | 4 | paired-token contract id |
//! | 5 | fee rate (newer layout only) |
//! | last | layout tag |

use serde::Serialize;

use crate::error::DecodeError;
use crate::script::reversed_hex_to_int;
use crate::types::{Script, ScriptKind};

const MARKER_FIELD: usize = 1;
const HASHES_FIELD: usize = 2;
const BALANCES_FIELD: usize = 3;
const CONTRACT_FIELD: usize = 4;
const FEE_RATE_FIELD: usize = 5;

/// Field count of the original layout.
pub const MIN_TAPE_FIELDS: usize = 6;
/// Field count from which the fee-rate field is present.
pub const FEE_RATE_TAPE_FIELDS: usize = 7;

const PARTIAL_HASH_HEX_LEN: usize = 64;
const BALANCE_HEX_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolTape {
    pub lp_partial_hash: String,
    pub token_partial_hash: String,
    /// Outstanding LP tokens.
    pub lp_balance: u64,
    /// Paired fungible-token reserve.
    pub token_balance: u64,
    /// Base-coin reserve, base units.
    pub base_balance: u64,
    pub contract_id: String,
    /// Present only on the newer layout.
    pub fee_rate: Option<u64>,
}

impl PoolTape {
    /// Decode a classified script, rejecting anything but a tape.
    pub fn from_script(script: &Script) -> Result<Self, DecodeError> {
        if script.kind != ScriptKind::TokenPoolTape {
            return Err(DecodeError::UnexpectedScript("token pool tape"));
        }
        decode_pool_tape(&script.asm)
    }
}

/// Decode a pool tape from its disassembly.
///
/// Too few fields, or a field narrower than its fixed layout, is a decode
/// failure; nothing is defaulted.
pub fn decode_pool_tape(asm: &str) -> Result<PoolTape, DecodeError> {
    let fields: Vec<&str> = asm.split_whitespace().collect();
    if fields.len() < MIN_TAPE_FIELDS {
        return Err(DecodeError::FieldCount {
            expected: MIN_TAPE_FIELDS,
            found: fields.len(),
        });
    }
    if fields[MARKER_FIELD] != "OP_RETURN" {
        return Err(DecodeError::UnexpectedScript("token pool tape"));
    }

    let hashes = fixed_hex_field(fields[HASHES_FIELD], "partial_hashes", 2 * PARTIAL_HASH_HEX_LEN)?;
    let balances = fixed_hex_field(fields[BALANCES_FIELD], "balances", 3 * BALANCE_HEX_LEN)?;
    let balance_at = |slot: usize| {
        let start = slot * BALANCE_HEX_LEN;
        reversed_hex_to_int(&balances[start..start + BALANCE_HEX_LEN])
    };

    let contract_id = fields[CONTRACT_FIELD];
    if !contract_id.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DecodeError::InvalidHex(contract_id.to_owned()));
    }

    let fee_rate = if fields.len() >= FEE_RATE_TAPE_FIELDS {
        let raw = fields[FEE_RATE_FIELD];
        Some(
            raw.parse::<u64>()
                .map_err(|_| DecodeError::InvalidNumber(raw.to_owned()))?,
        )
    } else {
        None
    };

    Ok(PoolTape {
        lp_partial_hash: hashes[..PARTIAL_HASH_HEX_LEN].to_owned(),
        token_partial_hash: hashes[PARTIAL_HASH_HEX_LEN..].to_owned(),
        lp_balance: balance_at(0)?,
        token_balance: balance_at(1)?,
        base_balance: balance_at(2)?,
        contract_id: contract_id.to_owned(),
        fee_rate,
    })
}

/// Validate that `field` holds at least `width` hex characters and return
/// exactly that prefix.
fn fixed_hex_field<'a>(field: &'a str, name: &'static str, width: usize) -> Result<&'a str, DecodeError> {
    if field.len() < width {
        return Err(DecodeError::FieldWidth {
            field: name,
            expected: width,
            found: field.len(),
        });
    }
    let prefix = &field.as_bytes()[..width];
    if !prefix.iter().all(u8::is_ascii_hexdigit) {
        return Err(DecodeError::InvalidHex(field.to_owned()));
    }
    // All-ASCII prefix, so `width` is a char boundary.
    Ok(&field[..width])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    #[test]
    fn six_fields_have_no_fee_rate() {
        let tape = decode_pool_tape(&pool_tape_asm(5, 700, 2_000_000, None)).expect("decode");
        assert_eq!(tape.fee_rate, None);
        assert_eq!(tape.lp_balance, 5);
        assert_eq!(tape.token_balance, 700);
        assert_eq!(tape.base_balance, 2_000_000);
        assert_eq!(tape.lp_partial_hash, "11".repeat(32));
        assert_eq!(tape.token_partial_hash, "22".repeat(32));
        assert_eq!(tape.contract_id, "cd".repeat(32));
    }

    #[test]
    fn seven_fields_carry_fee_rate() {
        let asm = pool_tape_asm(1, 2, 3, Some(25));
        assert_eq!(asm.split_whitespace().count(), 7);
        let tape = decode_pool_tape(&asm).expect("decode");
        assert_eq!(tape.fee_rate, Some(25));
    }

    #[test]
    fn too_few_fields_is_a_failure() {
        let err = decode_pool_tape("0 OP_RETURN aa bb cc").expect_err("short tape");
        assert_eq!(err, DecodeError::FieldCount { expected: 6, found: 5 });
    }

    #[test]
    fn narrow_balance_field_is_a_failure() {
        let asm = format!("0 OP_RETURN {} {} {} 4c50", "11".repeat(64), "00".repeat(8), "cd".repeat(32));
        let err = decode_pool_tape(&asm).expect_err("narrow balances");
        assert!(matches!(err, DecodeError::FieldWidth { field: "balances", .. }));
    }

    #[test]
    fn from_script_requires_tape_classification() {
        let script = p2pkh_script("62e907b15cbf27d5425399ebf6f0fb50ebb88f18");
        assert_eq!(
            PoolTape::from_script(&script),
            Err(DecodeError::UnexpectedScript("token pool tape"))
        );

        let tape = Script::new("006a", pool_tape_asm(1, 1, 1, None));
        assert!(PoolTape::from_script(&tape).is_ok());
    }
}
