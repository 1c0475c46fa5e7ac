use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::DataType;

/// A single scalar value — the fundamental unit of data.
///
/// The buffer layer never interprets values beyond typing and sizing; this
/// enum deliberately carries only the types the columnar block layer stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Text(String),
    /// Microseconds since the Unix epoch.
    Timestamp(i64),
    /// Days since the Unix epoch.
    Date(i32),
    Bytea(Vec<u8>),
}

impl Datum {
    /// The data type of this value, or `None` for NULL (which fits any type).
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Datum::Null => None,
            Datum::Boolean(_) => Some(DataType::Boolean),
            Datum::Int32(_) => Some(DataType::Int32),
            Datum::Int64(_) => Some(DataType::Int64),
            Datum::Float64(_) => Some(DataType::Float64),
            Datum::Text(_) => Some(DataType::Text),
            Datum::Timestamp(_) => Some(DataType::Timestamp),
            Datum::Date(_) => Some(DataType::Date),
            Datum::Bytea(_) => Some(DataType::Bytea),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int32(v) => Some(*v as i64),
            Datum::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Non-negative integer view, for constant engine arguments.
    pub fn as_u64(&self) -> Option<u64> {
        match self.as_i64() {
            Some(v) if v >= 0 => Some(v as u64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Approximate in-memory footprint in bytes. Used for buffer byte
    /// accounting and flush thresholds, not for allocator-exact numbers.
    pub fn estimated_size(&self) -> usize {
        match self {
            Datum::Null => 1,
            Datum::Boolean(_) => 1,
            Datum::Int32(_) => 4,
            Datum::Int64(_) => 8,
            Datum::Float64(_) => 8,
            Datum::Text(s) => 24 + s.len(),
            Datum::Timestamp(_) => 8,
            Datum::Date(_) => 4,
            Datum::Bytea(b) => 24 + b.len(),
        }
    }

    /// The default value used when a column has no explicit DEFAULT.
    pub fn default_for(data_type: DataType) -> Datum {
        match data_type {
            DataType::Boolean => Datum::Boolean(false),
            DataType::Int32 => Datum::Int32(0),
            DataType::Int64 => Datum::Int64(0),
            DataType::Float64 => Datum::Float64(0.0),
            DataType::Text => Datum::Text(String::new()),
            DataType::Timestamp => Datum::Timestamp(0),
            DataType::Date => Datum::Date(0),
            DataType::Bytea => Datum::Bytea(Vec::new()),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "NULL"),
            Datum::Boolean(b) => write!(f, "{}", b),
            Datum::Int32(v) => write!(f, "{}", v),
            Datum::Int64(v) => write!(f, "{}", v),
            Datum::Float64(v) => write!(f, "{}", v),
            Datum::Text(s) => write!(f, "{}", s),
            Datum::Timestamp(us) => write!(f, "{}", us),
            Datum::Date(days) => write!(f, "{}", days),
            Datum::Bytea(bytes) => {
                write!(f, "\\x")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_of_values() {
        assert_eq!(Datum::Int64(1).data_type(), Some(DataType::Int64));
        assert_eq!(Datum::Text("x".into()).data_type(), Some(DataType::Text));
        assert_eq!(Datum::Null.data_type(), None);
    }

    #[test]
    fn test_as_u64_rejects_negative() {
        assert_eq!(Datum::Int64(5).as_u64(), Some(5));
        assert_eq!(Datum::Int32(7).as_u64(), Some(7));
        assert_eq!(Datum::Int64(-1).as_u64(), None);
        assert_eq!(Datum::Text("5".into()).as_u64(), None);
    }

    #[test]
    fn test_estimated_size_scales_with_payload() {
        assert!(Datum::Text("0123456789".into()).estimated_size() > Datum::Text("".into()).estimated_size());
        assert_eq!(Datum::Int64(0).estimated_size(), 8);
    }

    #[test]
    fn test_default_for_every_type() {
        for dt in [
            DataType::Boolean,
            DataType::Int32,
            DataType::Int64,
            DataType::Float64,
            DataType::Text,
            DataType::Timestamp,
            DataType::Date,
            DataType::Bytea,
        ] {
            let d = Datum::default_for(dt);
            assert_eq!(d.data_type(), Some(dt));
        }
    }

    #[test]
    fn test_display_bytea_hex() {
        assert_eq!(Datum::Bytea(vec![0xde, 0xad]).to_string(), "\\xdead");
    }
}
