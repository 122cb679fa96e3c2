//! Block payloads as served by a Bitcoin-Core-compatible source at full
//! verbosity.
//!
//! Only `hash` and `time` are required to decode a block; every other field
//! falls back to a neutral default, matching what older node versions omit.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RawBlock {
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default, rename = "previousblockhash")]
    pub previous_block_hash: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub version: i32,
    #[serde(default, rename = "merkleroot")]
    pub merkle_root: String,
    #[serde(default)]
    pub nonce: u32,
    #[serde(default)]
    pub bits: String,
    #[serde(default)]
    pub size: i32,
    #[serde(default)]
    pub weight: Option<i32>,
    #[serde(default, rename = "tx")]
    pub transactions: Vec<RawTransaction>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RawTransaction {
    #[serde(default)]
    pub txid: Option<String>,
    /// Witness hash; stands in for `txid` when the source omits it.
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub size: i32,
    #[serde(default)]
    pub weight: Option<i32>,
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub locktime: u32,
    #[serde(default, rename = "vin")]
    pub inputs: Vec<RawInput>,
    #[serde(default, rename = "vout")]
    pub outputs: Vec<RawOutput>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RawInput {
    /// Present only on coinbase inputs.
    #[serde(default)]
    pub coinbase: Option<String>,
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
    #[serde(default)]
    pub sequence: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RawOutput {
    /// Decimal text of the value in whole coins, exactly as sent.
    #[serde(default, deserialize_with = "amount_text")]
    pub value: Option<String>,
    #[serde(default, rename = "scriptPubKey")]
    pub script_pub_key: Option<RawScriptPubKey>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RawScriptPubKey {
    #[serde(default, rename = "type")]
    pub script_type: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
}

/// Accept an amount as a JSON number or string and keep its literal text.
///
/// With serde_json's `arbitrary_precision` a number's `to_string` is the
/// literal token, so `0.00000001` never passes through an `f64`.
fn amount_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(D::Error::custom(format!("expected amount, got {other}"))),
    }
}
