use crate::error::CoreError;
use crate::types::{OutPointRef, Script, TransactionDetail, TxInput, TxOutput, COIN};

/// Number of decimal places in a display-unit amount.
const COIN_DECIMALS: usize = 6;

/// Decode a verbose `getrawtransaction` result.
pub(super) fn parse_transaction(raw: &serde_json::Value) -> Result<TransactionDetail, CoreError> {
    let txid = parse_txid(raw.get("txid"), "txid")?;
    let block_hash = raw
        .get("blockhash")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned);
    let confirmations = parse_integer_optional::<u64>(raw.get("confirmations")).unwrap_or(0);
    // Unconfirmed transactions report no time; keep the `0` sentinel for them
    // even if a mempool entry time is present.
    let time = if confirmations > 0 {
        parse_integer_optional::<u64>(raw.get("blocktime"))
            .or_else(|| parse_integer_optional::<u64>(raw.get("time")))
            .unwrap_or(0)
    } else {
        0
    };

    let vin = raw
        .get("vin")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| CoreError::InvalidTxData("missing vin array".into()))?;
    let vout = raw
        .get("vout")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| CoreError::InvalidTxData("missing vout array".into()))?;

    Ok(TransactionDetail {
        txid,
        block_hash,
        confirmations,
        time,
        inputs: parse_vin(vin)?,
        outputs: parse_vout(vout)?,
    })
}

pub(super) fn parse_txid(value: Option<&serde_json::Value>, field: &str) -> Result<String, CoreError> {
    let value = value
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| CoreError::InvalidTxData(format!("missing {field}")))?;
    if !is_txid(value) {
        return Err(CoreError::InvalidTxData(format!("invalid {field}: `{value}`")));
    }
    Ok(value.to_ascii_lowercase())
}

/// A transaction id is 32 bytes of hex.
pub(crate) fn is_txid(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

fn parse_integer_required<T: TryFrom<u64>>(
    value: Option<&serde_json::Value>,
    field: &str,
) -> Result<T, CoreError> {
    let n = value
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| CoreError::InvalidTxData(format!("missing {field}")))?;
    T::try_from(n).map_err(|_| CoreError::InvalidTxData(format!("{field} out of range: {n}")))
}

// Missing, null, negative or out-of-range values all read as absent.
fn parse_integer_optional<T: TryFrom<u64>>(value: Option<&serde_json::Value>) -> Option<T> {
    value
        .and_then(serde_json::Value::as_u64)
        .and_then(|n| T::try_from(n).ok())
}

fn parse_vin(vin: &[serde_json::Value]) -> Result<Vec<TxInput>, CoreError> {
    vin.iter()
        .map(|input| {
            if input.get("coinbase").is_some() {
                return Ok(TxInput { prevout: None });
            }
            let txid = parse_txid(input.get("txid"), "vin.txid")?;
            let vout = parse_integer_required::<u32>(input.get("vout"), "vin.vout")?;
            Ok(TxInput {
                prevout: Some(OutPointRef { txid, vout }),
            })
        })
        .collect()
}

fn parse_vout(vout: &[serde_json::Value]) -> Result<Vec<TxOutput>, CoreError> {
    vout.iter()
        .enumerate()
        .map(|(position, output)| {
            let value = parse_coin_amount(
                output
                    .get("value")
                    .ok_or_else(|| CoreError::InvalidTxData("missing value in vout".into()))?,
            )?;
            // Fall back to array position when the node omits `n`.
            let index = match output.get("n") {
                Some(n) => parse_integer_required::<u32>(Some(n), "vout.n")?,
                None => u32::try_from(position)
                    .map_err(|_| CoreError::InvalidTxData("too many outputs".into()))?,
            };
            let spk = output
                .get("scriptPubKey")
                .ok_or_else(|| CoreError::InvalidTxData("missing scriptPubKey in vout".into()))?;
            let hex = spk
                .get("hex")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| CoreError::InvalidTxData("missing hex in scriptPubKey".into()))?;
            let asm = spk
                .get("asm")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();

            Ok(TxOutput {
                value,
                index,
                script: Script::new(hex, asm),
            })
        })
        .collect()
}

/// Parse a display-unit amount into base units.
///
/// Numbers are rounded to the nearest base unit. Strings are parsed as exact
/// decimals with at most six fractional digits.
pub(crate) fn parse_coin_amount(value: &serde_json::Value) -> Result<u64, CoreError> {
    let invalid = |detail: &str| CoreError::InvalidTxData(format!("invalid amount `{value}`{detail}"));
    match value {
        serde_json::Value::Number(n) => {
            let parsed = n.as_f64().ok_or_else(|| invalid(""))?;
            let scaled = (parsed * COIN as f64).round();
            if !scaled.is_finite() || scaled < 0.0 || scaled > u64::MAX as f64 {
                return Err(invalid(": out of range"));
            }
            Ok(scaled as u64)
        }
        serde_json::Value::String(s) => parse_decimal_amount(s).ok_or_else(|| invalid("")),
        _ => Err(invalid(": expected a number")),
    }
}

fn parse_decimal_amount(s: &str) -> Option<u64> {
    let (whole, fraction) = s.split_once('.').unwrap_or((s, ""));
    if whole.is_empty()
        || fraction.len() > COIN_DECIMALS
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let whole: u64 = whole.parse().ok()?;
    let fraction: u64 = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<COIN_DECIMALS$}").parse().ok()?
    };
    whole.checked_mul(COIN)?.checked_add(fraction)
}
