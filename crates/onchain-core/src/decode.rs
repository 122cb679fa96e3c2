//! Block decoder: one [`RawBlock`] in, four record collections out.
//!
//! Pure and deterministic. The only failures are structurally missing
//! required fields and values that cannot be represented in the record
//! schema; a block that fails to decode must halt ingestion rather than be
//! skipped, otherwise the height sequence would have a hole.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::constants::SATS_PER_COIN;
use crate::error::DecodeError;
use crate::raw::{RawBlock, RawInput, RawOutput, RawScriptPubKey};
use crate::types::{
    BlockHash, BlockRecord, DecodedBlock, InputRecord, OutputRecord, TransactionRecord,
};

/// Script classification used when the source does not provide one.
pub const UNKNOWN_SCRIPT_TYPE: &str = "unknown";

/// Decode the block at `height` into its relational records.
pub fn decode_block(height: u64, raw: &RawBlock) -> Result<DecodedBlock, DecodeError> {
    let hash = raw
        .hash
        .as_deref()
        .filter(|h| !h.is_empty())
        .ok_or(DecodeError::MissingField { height, field: "hash" })?;
    let block_time = raw
        .time
        .ok_or(DecodeError::MissingField { height, field: "time" })
        .and_then(|secs| utc_from_secs(height, secs))?;

    let block = BlockRecord {
        height,
        hash: BlockHash::new(hash),
        time_utc: block_time,
        version: raw.version,
        merkle_root: raw.merkle_root.clone(),
        nonce: raw.nonce,
        bits: raw.bits.clone(),
        size: raw.size,
        weight: raw.weight.unwrap_or_else(|| raw.size.saturating_mul(4)),
        tx_count: count(height, "tx_count", raw.transactions.len())?,
    };

    let mut transactions = Vec::with_capacity(raw.transactions.len());
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();

    for tx in &raw.transactions {
        let txid = tx
            .txid
            .as_deref()
            .filter(|id| !id.is_empty())
            .or(tx.hash.as_deref().filter(|id| !id.is_empty()))
            .ok_or(DecodeError::MissingField { height, field: "txid" })?
            .to_owned();
        let time_utc = match tx.time {
            Some(secs) => utc_from_secs(height, secs)?,
            None => block_time,
        };

        transactions.push(TransactionRecord {
            txid: txid.clone(),
            height,
            time_utc,
            size: tx.size,
            weight: tx.weight.unwrap_or_else(|| tx.size.saturating_mul(4)),
            version: tx.version,
            locktime: tx.locktime,
            vin_count: count(height, "vin_count", tx.inputs.len())?,
            vout_count: count(height, "vout_count", tx.outputs.len())?,
        });

        for (idx, vin) in tx.inputs.iter().enumerate() {
            inputs.push(decode_input(height, &txid, idx, vin)?);
        }
        for (idx, vout) in tx.outputs.iter().enumerate() {
            outputs.push(decode_output(height, &txid, idx, vout)?);
        }
    }

    Ok(DecodedBlock { block, transactions, inputs, outputs })
}

fn decode_input(
    height: u64,
    txid: &str,
    idx: usize,
    vin: &RawInput,
) -> Result<InputRecord, DecodeError> {
    let prev_vout = vin
        .vout
        .map(|vout| {
            i32::try_from(vout).map_err(|_| DecodeError::InvalidValue {
                height,
                field: "prev_vout",
                value: vout.to_string(),
            })
        })
        .transpose()?;
    Ok(InputRecord {
        txid: txid.to_owned(),
        idx: count(height, "vin index", idx)?,
        coinbase: vin.coinbase.is_some(),
        prev_txid: vin.txid.clone(),
        prev_vout,
        sequence: vin.sequence,
    })
}

fn decode_output(
    height: u64,
    txid: &str,
    idx: usize,
    vout: &RawOutput,
) -> Result<OutputRecord, DecodeError> {
    let value_sats = match vout.value.as_deref() {
        Some(text) => coins_to_sats(text).ok_or_else(|| DecodeError::InvalidValue {
            height,
            field: "value",
            value: text.to_owned(),
        })?,
        None => 0,
    };
    let script = vout.script_pub_key.as_ref();
    Ok(OutputRecord {
        txid: txid.to_owned(),
        idx: count(height, "vout index", idx)?,
        value_sats,
        script_type: script
            .and_then(|s| s.script_type.clone())
            .unwrap_or_else(|| UNKNOWN_SCRIPT_TYPE.to_owned()),
        addresses: script.map(extract_addresses).unwrap_or_default(),
        is_spent: false,
    })
}

/// Every address a script names: the legacy `addresses` list first, then
/// the single `address` field newer nodes emit.
pub fn extract_addresses(script: &RawScriptPubKey) -> Vec<String> {
    let mut addresses = script.addresses.clone().unwrap_or_default();
    if let Some(single) = &script.address {
        addresses.push(single.clone());
    }
    addresses
}

/// Convert a decimal amount in whole coins to integer sats.
///
/// Uses decimal arithmetic end to end; sub-sat remainders round half to
/// even. Returns `None` for unparsable, negative, or out-of-range input.
///
/// ```
/// use onchain_core::decode::coins_to_sats;
/// assert_eq!(coins_to_sats("0.00000001"), Some(1));
/// assert_eq!(coins_to_sats("50"), Some(5_000_000_000));
/// assert_eq!(coins_to_sats("-1"), None);
/// ```
pub fn coins_to_sats(text: &str) -> Option<i64> {
    let text = text.trim();
    let coins = Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()?;
    if coins.is_sign_negative() && !coins.is_zero() {
        return None;
    }
    coins
        .checked_mul(Decimal::from(SATS_PER_COIN))?
        .round()
        .to_i64()
}

fn utc_from_secs(height: u64, secs: i64) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::from_timestamp(secs, 0).ok_or(DecodeError::InvalidValue {
        height,
        field: "time",
        value: secs.to_string(),
    })
}

fn count(height: u64, field: &'static str, n: usize) -> Result<i32, DecodeError> {
    i32::try_from(n).map_err(|_| DecodeError::InvalidValue {
        height,
        field,
        value: n.to_string(),
    })
}
