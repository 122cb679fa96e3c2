//! Fixed Arrow schemas for the four datasets and record-to-batch conversion.
//!
//! Every schema carries `schema_version` metadata so downstream readers can
//! detect layout changes. Timestamps are stored as UTC microseconds.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanArray, Int32Array, Int64Array, ListBuilder, StringArray, StringBuilder,
    TimestampMicrosecondArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use onchain_core::constants::{SCHEMA_VERSION, SCHEMA_VERSION_KEY};
use onchain_core::types::{BlockRecord, Dataset, InputRecord, OutputRecord, TransactionRecord};

/// Timezone tag on every timestamp column.
pub const UTC: &str = "UTC";

/// A record kind with a fixed columnar layout.
pub trait Columnar: Sized {
    const DATASET: Dataset;

    fn schema() -> SchemaRef;

    fn to_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError>;
}

fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, Some(UTC.into()))
}

fn versioned(fields: Vec<Field>) -> SchemaRef {
    let metadata = HashMap::from([(SCHEMA_VERSION_KEY.to_owned(), SCHEMA_VERSION.to_owned())]);
    Arc::new(Schema::new_with_metadata(fields, metadata))
}

fn height_i64(height: u64) -> Result<i64, ArrowError> {
    i64::try_from(height)
        .map_err(|_| ArrowError::InvalidArgumentError(format!("height {height} exceeds int64")))
}

fn micros<'a>(times: impl Iterator<Item = &'a chrono::DateTime<chrono::Utc>>) -> ArrayRef {
    let values: Vec<i64> = times.map(|t| t.timestamp_micros()).collect();
    Arc::new(TimestampMicrosecondArray::from(values).with_timezone(UTC))
}

fn strings<'a>(values: impl Iterator<Item = &'a str>) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(values))
}

impl Columnar for BlockRecord {
    const DATASET: Dataset = Dataset::Blocks;

    fn schema() -> SchemaRef {
        versioned(vec![
            Field::new("height", DataType::Int64, false),
            Field::new("hash", DataType::Utf8, false),
            Field::new("time_utc", timestamp_type(), false),
            Field::new("version", DataType::Int32, false),
            Field::new("merkleroot", DataType::Utf8, false),
            Field::new("nonce", DataType::UInt32, false),
            Field::new("bits", DataType::Utf8, false),
            Field::new("size", DataType::Int32, false),
            Field::new("weight", DataType::Int32, false),
            Field::new("tx_count", DataType::Int32, false),
        ])
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError> {
        let heights = rows.iter().map(|r| height_i64(r.height)).collect::<Result<Vec<_>, _>>()?;
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(heights)),
            strings(rows.iter().map(|r| r.hash.as_str())),
            micros(rows.iter().map(|r| &r.time_utc)),
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.version))),
            strings(rows.iter().map(|r| r.merkle_root.as_str())),
            Arc::new(UInt32Array::from_iter_values(rows.iter().map(|r| r.nonce))),
            strings(rows.iter().map(|r| r.bits.as_str())),
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.size))),
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.weight))),
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.tx_count))),
        ];
        RecordBatch::try_new(Self::schema(), columns)
    }
}

impl Columnar for TransactionRecord {
    const DATASET: Dataset = Dataset::Transactions;

    fn schema() -> SchemaRef {
        versioned(vec![
            Field::new("txid", DataType::Utf8, false),
            Field::new("height", DataType::Int64, false),
            Field::new("time_utc", timestamp_type(), false),
            Field::new("size", DataType::Int32, false),
            Field::new("weight", DataType::Int32, false),
            Field::new("version", DataType::Int32, false),
            Field::new("locktime", DataType::UInt32, false),
            Field::new("vin_count", DataType::Int32, false),
            Field::new("vout_count", DataType::Int32, false),
        ])
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError> {
        let heights = rows.iter().map(|r| height_i64(r.height)).collect::<Result<Vec<_>, _>>()?;
        let columns: Vec<ArrayRef> = vec![
            strings(rows.iter().map(|r| r.txid.as_str())),
            Arc::new(Int64Array::from(heights)),
            micros(rows.iter().map(|r| &r.time_utc)),
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.size))),
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.weight))),
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.version))),
            Arc::new(UInt32Array::from_iter_values(rows.iter().map(|r| r.locktime))),
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.vin_count))),
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.vout_count))),
        ];
        RecordBatch::try_new(Self::schema(), columns)
    }
}

impl Columnar for InputRecord {
    const DATASET: Dataset = Dataset::Inputs;

    fn schema() -> SchemaRef {
        versioned(vec![
            Field::new("txid", DataType::Utf8, false),
            Field::new("idx", DataType::Int32, false),
            Field::new("coinbase", DataType::Boolean, false),
            Field::new("prev_txid", DataType::Utf8, true),
            Field::new("prev_vout", DataType::Int32, true),
            Field::new("sequence", DataType::Int64, false),
        ])
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError> {
        let columns: Vec<ArrayRef> = vec![
            strings(rows.iter().map(|r| r.txid.as_str())),
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.idx))),
            Arc::new(rows.iter().map(|r| Some(r.coinbase)).collect::<BooleanArray>()),
            Arc::new(rows.iter().map(|r| r.prev_txid.as_deref()).collect::<StringArray>()),
            Arc::new(rows.iter().map(|r| r.prev_vout).collect::<Int32Array>()),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| i64::from(r.sequence)))),
        ];
        RecordBatch::try_new(Self::schema(), columns)
    }
}

impl Columnar for OutputRecord {
    const DATASET: Dataset = Dataset::Outputs;

    fn schema() -> SchemaRef {
        versioned(vec![
            Field::new("txid", DataType::Utf8, false),
            Field::new("idx", DataType::Int32, false),
            Field::new("value_sats", DataType::Int64, false),
            Field::new("script_type", DataType::Utf8, false),
            Field::new_list("addresses", Field::new("item", DataType::Utf8, true), false),
            Field::new("is_spent", DataType::Boolean, false),
        ])
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError> {
        let mut addresses = ListBuilder::new(StringBuilder::new());
        for row in rows {
            for address in &row.addresses {
                addresses.values().append_value(address);
            }
            addresses.append(true);
        }
        let columns: Vec<ArrayRef> = vec![
            strings(rows.iter().map(|r| r.txid.as_str())),
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.idx))),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.value_sats))),
            strings(rows.iter().map(|r| r.script_type.as_str())),
            Arc::new(addresses.finish()),
            Arc::new(rows.iter().map(|r| Some(r.is_spent)).collect::<BooleanArray>()),
        ];
        RecordBatch::try_new(Self::schema(), columns)
    }
}

/// Schema of `dataset`, for readers that only know the dataset name.
pub fn schema_for(dataset: Dataset) -> SchemaRef {
    match dataset {
        Dataset::Blocks => BlockRecord::schema(),
        Dataset::Transactions => TransactionRecord::schema(),
        Dataset::Inputs => InputRecord::schema(),
        Dataset::Outputs => OutputRecord::schema(),
    }
}
