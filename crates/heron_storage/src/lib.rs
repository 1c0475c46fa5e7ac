//! HeronDB storage layer: columnar blocks, table engines and the catalog.
//!
//! The centrepiece is the [`buffer::BufferTable`] engine — a sharded
//! in-memory accumulator that sits in front of a destination table and
//! flushes asynchronously when size/time thresholds are crossed. Readers
//! see the union of buffered rows and rows already delivered.

pub mod block;
pub mod buffer;
mod buffer_read;
mod buffer_write;
pub mod catalog;
pub mod factory;
pub mod memory_table;
pub mod pipe;
pub mod stats;
pub mod table;

pub use buffer::{BufferTable, Thresholds};
pub use catalog::Catalog;
pub use memory_table::MemoryTable;

use heron_common::datum::Datum;
use heron_common::error::{HeronError, HeronResult};
use heron_common::types::DataType;

use crate::block::Column;

/// Lightweight scalar cast used when a destination table's column type has
/// drifted from the schema a block was built against.
pub(crate) fn cast_datum(value: &Datum, target: DataType) -> HeronResult<Datum> {
    if value.is_null() {
        return Ok(Datum::Null);
    }
    let cast_err = || HeronError::Cast {
        value: value.to_string(),
        target: target.to_string(),
    };
    match target {
        DataType::Int32 => match value {
            Datum::Int32(_) => Ok(value.clone()),
            Datum::Int64(v) => Ok(Datum::Int32(*v as i32)),
            Datum::Float64(v) => Ok(Datum::Int32(*v as i32)),
            Datum::Boolean(b) => Ok(Datum::Int32(if *b { 1 } else { 0 })),
            Datum::Text(s) => s.parse::<i32>().map(Datum::Int32).map_err(|_| cast_err()),
            Datum::Date(d) => Ok(Datum::Int32(*d)),
            _ => Err(cast_err()),
        },
        DataType::Int64 => match value {
            Datum::Int64(_) => Ok(value.clone()),
            Datum::Int32(v) => Ok(Datum::Int64(*v as i64)),
            Datum::Float64(v) => Ok(Datum::Int64(*v as i64)),
            Datum::Boolean(b) => Ok(Datum::Int64(if *b { 1 } else { 0 })),
            Datum::Text(s) => s.parse::<i64>().map(Datum::Int64).map_err(|_| cast_err()),
            Datum::Timestamp(us) => Ok(Datum::Int64(*us)),
            _ => Err(cast_err()),
        },
        DataType::Float64 => match value {
            Datum::Float64(_) => Ok(value.clone()),
            Datum::Int32(v) => Ok(Datum::Float64(*v as f64)),
            Datum::Int64(v) => Ok(Datum::Float64(*v as f64)),
            Datum::Text(s) => s.parse::<f64>().map(Datum::Float64).map_err(|_| cast_err()),
            _ => Err(cast_err()),
        },
        DataType::Text => Ok(Datum::Text(value.to_string())),
        DataType::Boolean => match value {
            Datum::Boolean(_) => Ok(value.clone()),
            Datum::Int32(v) => Ok(Datum::Boolean(*v != 0)),
            Datum::Int64(v) => Ok(Datum::Boolean(*v != 0)),
            Datum::Text(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" | "yes" => Ok(Datum::Boolean(true)),
                "false" | "f" | "0" | "no" => Ok(Datum::Boolean(false)),
                _ => Err(cast_err()),
            },
            _ => Err(cast_err()),
        },
        DataType::Timestamp => match value {
            Datum::Timestamp(_) => Ok(value.clone()),
            Datum::Date(days) => Ok(Datum::Timestamp(*days as i64 * 86_400 * 1_000_000)),
            Datum::Int64(us) => Ok(Datum::Timestamp(*us)),
            Datum::Int32(us) => Ok(Datum::Timestamp(*us as i64)),
            _ => Err(cast_err()),
        },
        DataType::Date => match value {
            Datum::Date(_) => Ok(value.clone()),
            Datum::Timestamp(us) => Ok(Datum::Date((*us / (86_400 * 1_000_000)) as i32)),
            Datum::Int32(d) => Ok(Datum::Date(*d)),
            Datum::Int64(d) => Ok(Datum::Date(*d as i32)),
            _ => Err(cast_err()),
        },
        DataType::Bytea => match value {
            Datum::Bytea(_) => Ok(value.clone()),
            Datum::Text(s) => Ok(Datum::Bytea(s.as_bytes().to_vec())),
            _ => Err(cast_err()),
        },
    }
}

/// Cast every value of a column to `target`, keeping name and length.
pub(crate) fn cast_column(column: &Column, target: DataType) -> HeronResult<Column> {
    if column.data_type() == target {
        return Ok(column.clone());
    }
    let mut values = Vec::with_capacity(column.len());
    for value in column.values() {
        values.push(cast_datum(value, target)?);
    }
    Column::from_values(column.name().to_string(), target, values)
}
