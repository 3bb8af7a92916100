//! Cell values exchanged with the server.
//!
//! The server defines a closed family of column types, so values are a
//! closed enum rather than an open trait. Every variant maps to exactly
//! one wire representation; the column codecs in [`crate::column`] do the
//! conversion.

use std::net::{Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use uuid::Uuid;

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absence of a value inside a `Nullable(T)` column.
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Int128(i128),
    /// 256-bit signed integer, little-endian two's-complement bytes.
    Int256([u8; 32]),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    UInt128(u128),
    /// 256-bit unsigned integer, little-endian bytes.
    UInt256([u8; 32]),
    Float32(f32),
    Float64(f64),
    String(String),
    /// Raw bytes; what `FixedString(N)` decodes to (padding included).
    Bytes(Vec<u8>),
    /// Fixed-point number: `mantissa / 10^scale`. Backs Decimal(P,S)
    /// for precision up to 38.
    Decimal { mantissa: i128, scale: u8 },
    /// Decimal with 256-bit backing, mantissa as little-endian bytes.
    Decimal256 { raw: [u8; 32], scale: u8 },
    Date(NaiveDate),
    /// DateTime and DateTime64; the instant carries its zone.
    DateTime(DateTime<Tz>),
    Uuid(Uuid),
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Array(Vec<Value>),
    Tuple(Vec<Value>),
    /// Key/value pairs in server order.
    Map(Vec<(Value, Value)>),
    /// The `Nothing` type has no values; each row is this placeholder.
    Nothing,
}

impl Value {
    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int8(_) => "Int8",
            Value::Int16(_) => "Int16",
            Value::Int32(_) => "Int32",
            Value::Int64(_) => "Int64",
            Value::Int128(_) => "Int128",
            Value::Int256(_) => "Int256",
            Value::UInt8(_) => "UInt8",
            Value::UInt16(_) => "UInt16",
            Value::UInt32(_) => "UInt32",
            Value::UInt64(_) => "UInt64",
            Value::UInt128(_) => "UInt128",
            Value::UInt256(_) => "UInt256",
            Value::Float32(_) => "Float32",
            Value::Float64(_) => "Float64",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::Decimal { .. } => "Decimal",
            Value::Decimal256 { .. } => "Decimal256",
            Value::Date(_) => "Date",
            Value::DateTime(_) => "DateTime",
            Value::Uuid(_) => "Uuid",
            Value::Ipv4(_) => "Ipv4",
            Value::Ipv6(_) => "Ipv6",
            Value::Array(_) => "Array",
            Value::Tuple(_) => "Tuple",
            Value::Map(_) => "Map",
            Value::Nothing => "Nothing",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        })*
    };
}

impl_from! {
    bool => Bool,
    i8 => Int8, i16 => Int16, i32 => Int32, i64 => Int64, i128 => Int128,
    u8 => UInt8, u16 => UInt16, u32 => UInt32, u64 => UInt64, u128 => UInt128,
    f32 => Float32, f64 => Float64,
    Uuid => Uuid, Ipv4Addr => Ipv4, Ipv6Addr => Ipv6,
    NaiveDate => Date,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        assert_eq!(Value::from(42i64), Value::Int64(42));
        assert_eq!(Value::from("x"), Value::String("x".into()));
        assert!(Value::Null.is_null());
        assert_eq!(Value::Int256([0u8; 32]).kind(), "Int256");
    }
}
