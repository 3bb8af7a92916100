//! Column codecs: bidirectional binary serialization per column type.
//!
//! A column travels as an optional state prefix (nested types contribute
//! theirs first, LowCardinality's dictionary version being the prominent
//! one) followed by the column data. Dispatch is driven by the parsed
//! [`TypeDesc`]; nested types recurse through boxed futures since the
//! type tree is only known at runtime.

mod decimal;
mod misc;
mod nested;
mod numeric;
mod string;
mod temporal;

use std::future::Future;
use std::pin::Pin;

use chrono::TimeZone;
use chrono_tz::Tz;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};
use crate::protocol::block::ColumnCtx;
use crate::protocol::io::{BufferedWriter, InputStream};
use crate::types::TypeDesc;
use crate::value::Value;

pub(crate) type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Read a full column: state prefix, then `rows` values.
pub async fn read_column<'s, R: AsyncRead + Unpin + Send>(
    input: &mut InputStream<'s, R>,
    ty: &TypeDesc,
    rows: usize,
    ctx: &ColumnCtx,
) -> Result<Vec<Value>> {
    read_prefix(input, ty).await?;
    read_data(input, ty, rows, ctx).await
}

/// Write a full column: state prefix, then the values.
pub async fn write_column<'a, W: AsyncWrite + Unpin + Send>(
    w: &'a mut BufferedWriter<W>,
    ty: &'a TypeDesc,
    values: &'a [Value],
) -> Result<()> {
    write_prefix(w, ty).await?;
    write_data(w, ty, values).await
}

/// Consume the serialization prefixes of a column type tree.
fn read_prefix<'a, 's: 'a, R: AsyncRead + Unpin + Send + 'a>(
    input: &'a mut InputStream<'s, R>,
    ty: &'a TypeDesc,
) -> BoxFut<'a, Result<()>> {
    Box::pin(async move {
        match ty {
            TypeDesc::LowCardinality(_) => {
                let version = input.read_u64().await?;
                if version != 1 {
                    return Err(Error::Protocol(format!(
                        "unsupported low cardinality dictionary version {version}"
                    )));
                }
                Ok(())
            }
            TypeDesc::Array(inner)
            | TypeDesc::Nullable(inner)
            | TypeDesc::SimpleAggregateFunction(_, inner) => read_prefix(input, inner).await,
            TypeDesc::Tuple(elements) => {
                for element in elements {
                    read_prefix(input, element).await?;
                }
                Ok(())
            }
            TypeDesc::Map(key, value) => {
                read_prefix(input, key).await?;
                read_prefix(input, value).await
            }
            TypeDesc::Nested(fields) => {
                for (_, field) in fields {
                    read_prefix(input, field).await?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    })
}

fn write_prefix<'a, W: AsyncWrite + Unpin + Send + 'a>(
    w: &'a mut BufferedWriter<W>,
    ty: &'a TypeDesc,
) -> BoxFut<'a, Result<()>> {
    Box::pin(async move {
        match ty {
            TypeDesc::LowCardinality(_) => w.write_u64(1).await,
            TypeDesc::Json => w.write_u8(1).await,
            TypeDesc::Array(inner)
            | TypeDesc::Nullable(inner)
            | TypeDesc::SimpleAggregateFunction(_, inner) => write_prefix(w, inner).await,
            TypeDesc::Tuple(elements) => {
                for element in elements {
                    write_prefix(w, element).await?;
                }
                Ok(())
            }
            TypeDesc::Map(key, value) => {
                write_prefix(w, key).await?;
                write_prefix(w, value).await
            }
            TypeDesc::Nested(fields) => {
                for (_, field) in fields {
                    write_prefix(w, field).await?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    })
}

pub(crate) fn read_data<'a, 's: 'a, R: AsyncRead + Unpin + Send + 'a>(
    input: &'a mut InputStream<'s, R>,
    ty: &'a TypeDesc,
    rows: usize,
    ctx: &'a ColumnCtx,
) -> BoxFut<'a, Result<Vec<Value>>> {
    Box::pin(async move {
        match ty {
            TypeDesc::Bool
            | TypeDesc::Int8
            | TypeDesc::Int16
            | TypeDesc::Int32
            | TypeDesc::Int64
            | TypeDesc::Int128
            | TypeDesc::Int256
            | TypeDesc::UInt8
            | TypeDesc::UInt16
            | TypeDesc::UInt32
            | TypeDesc::UInt64
            | TypeDesc::UInt128
            | TypeDesc::UInt256
            | TypeDesc::Float32
            | TypeDesc::Float64 => numeric::read(input, ty, rows).await,
            TypeDesc::String => string::read_string(input, rows).await,
            TypeDesc::FixedString(n) => string::read_fixed_string(input, *n, rows).await,
            TypeDesc::Date
            | TypeDesc::Date32
            | TypeDesc::DateTime(_)
            | TypeDesc::DateTime64(_, _) => temporal::read(input, ty, rows, ctx).await,
            TypeDesc::Decimal { precision, scale } => {
                decimal::read(input, *precision, *scale, rows).await
            }
            TypeDesc::Uuid
            | TypeDesc::Ipv4
            | TypeDesc::Ipv6
            | TypeDesc::Enum8(_)
            | TypeDesc::Enum16(_)
            | TypeDesc::Nothing => misc::read(input, ty, rows).await,
            TypeDesc::Json => {
                // The server names the representation type inline.
                let _version = input.read_u8().await?;
                let spec = input.read_str().await?;
                let repr = TypeDesc::parse(&spec)?;
                read_prefix(input, &repr).await?;
                read_data(input, &repr, rows, ctx).await
            }
            TypeDesc::Array(inner) => nested::read_array(input, inner, rows, ctx).await,
            TypeDesc::Tuple(elements) => nested::read_tuple(input, elements, rows, ctx).await,
            TypeDesc::Nullable(inner) => nested::read_nullable(input, inner, rows, ctx).await,
            TypeDesc::Map(key, value) => nested::read_map(input, key, value, rows, ctx).await,
            TypeDesc::LowCardinality(inner) => {
                nested::read_low_cardinality(input, inner, rows, ctx).await
            }
            TypeDesc::Nested(fields) => nested::read_nested(input, fields, rows, ctx).await,
            TypeDesc::SimpleAggregateFunction(_, inner) => {
                read_data(input, inner, rows, ctx).await
            }
        }
    })
}

pub(crate) fn write_data<'a, W: AsyncWrite + Unpin + Send + 'a>(
    w: &'a mut BufferedWriter<W>,
    ty: &'a TypeDesc,
    values: &'a [Value],
) -> BoxFut<'a, Result<()>> {
    Box::pin(async move {
        match ty {
            TypeDesc::Bool
            | TypeDesc::Int8
            | TypeDesc::Int16
            | TypeDesc::Int32
            | TypeDesc::Int64
            | TypeDesc::Int128
            | TypeDesc::Int256
            | TypeDesc::UInt8
            | TypeDesc::UInt16
            | TypeDesc::UInt32
            | TypeDesc::UInt64
            | TypeDesc::UInt128
            | TypeDesc::UInt256
            | TypeDesc::Float32
            | TypeDesc::Float64 => numeric::write(w, ty, values).await,
            TypeDesc::String | TypeDesc::Json => string::write_string(w, values).await,
            TypeDesc::FixedString(n) => string::write_fixed_string(w, *n, values).await,
            TypeDesc::Date
            | TypeDesc::Date32
            | TypeDesc::DateTime(_)
            | TypeDesc::DateTime64(_, _) => temporal::write(w, ty, values).await,
            TypeDesc::Decimal { precision, scale } => {
                decimal::write(w, *precision, *scale, values).await
            }
            TypeDesc::Uuid
            | TypeDesc::Ipv4
            | TypeDesc::Ipv6
            | TypeDesc::Enum8(_)
            | TypeDesc::Enum16(_)
            | TypeDesc::Nothing => misc::write(w, ty, values).await,
            TypeDesc::Array(inner) => nested::write_array(w, inner, values).await,
            TypeDesc::Tuple(elements) => nested::write_tuple(w, elements, values).await,
            TypeDesc::Nullable(inner) => nested::write_nullable(w, inner, values).await,
            TypeDesc::Map(key, value) => nested::write_map(w, key, value, values).await,
            TypeDesc::LowCardinality(inner) => {
                nested::write_low_cardinality(w, inner, values).await
            }
            TypeDesc::Nested(fields) => nested::write_nested(w, fields, values).await,
            TypeDesc::SimpleAggregateFunction(_, inner) => write_data(w, inner, values).await,
        }
    })
}

/// Placeholder written for null slots: Nullable materializes its inner
/// column fully, nulls included.
pub(crate) fn default_value(ty: &TypeDesc) -> Value {
    match ty {
        TypeDesc::Bool => Value::Bool(false),
        TypeDesc::Int8 => Value::Int8(0),
        TypeDesc::Int16 => Value::Int16(0),
        TypeDesc::Int32 => Value::Int32(0),
        TypeDesc::Int64 => Value::Int64(0),
        TypeDesc::Int128 => Value::Int128(0),
        TypeDesc::Int256 => Value::Int256([0; 32]),
        TypeDesc::UInt8 => Value::UInt8(0),
        TypeDesc::UInt16 => Value::UInt16(0),
        TypeDesc::UInt32 => Value::UInt32(0),
        TypeDesc::UInt64 => Value::UInt64(0),
        TypeDesc::UInt128 => Value::UInt128(0),
        TypeDesc::UInt256 => Value::UInt256([0; 32]),
        TypeDesc::Float32 => Value::Float32(0.0),
        TypeDesc::Float64 => Value::Float64(0.0),
        TypeDesc::String | TypeDesc::Json => Value::String(String::new()),
        TypeDesc::FixedString(_) => Value::Bytes(Vec::new()),
        TypeDesc::Date | TypeDesc::Date32 => Value::Date(temporal::epoch_date()),
        TypeDesc::DateTime(_) | TypeDesc::DateTime64(_, _) => {
            Value::DateTime(Tz::UTC.timestamp_opt(0, 0).unwrap())
        }
        TypeDesc::Decimal { precision, scale } => {
            if TypeDesc::decimal_width(*precision) == 32 {
                Value::Decimal256 {
                    raw: [0; 32],
                    scale: *scale,
                }
            } else {
                Value::Decimal {
                    mantissa: 0,
                    scale: *scale,
                }
            }
        }
        TypeDesc::Uuid => Value::Uuid(uuid::Uuid::nil()),
        TypeDesc::Ipv4 => Value::Ipv4(std::net::Ipv4Addr::UNSPECIFIED),
        TypeDesc::Ipv6 => Value::Ipv6(std::net::Ipv6Addr::UNSPECIFIED),
        TypeDesc::Enum8(pairs) => pairs
            .first()
            .map(|(name, _)| Value::String(name.clone()))
            .unwrap_or(Value::Nothing),
        TypeDesc::Enum16(pairs) => pairs
            .first()
            .map(|(name, _)| Value::String(name.clone()))
            .unwrap_or(Value::Nothing),
        TypeDesc::Array(_) | TypeDesc::Nested(_) => Value::Array(Vec::new()),
        TypeDesc::Tuple(elements) => Value::Tuple(elements.iter().map(default_value).collect()),
        TypeDesc::Map(_, _) => Value::Map(Vec::new()),
        TypeDesc::Nullable(_) => Value::Null,
        TypeDesc::LowCardinality(inner) => default_value(inner),
        TypeDesc::SimpleAggregateFunction(_, inner) => default_value(inner),
        TypeDesc::Nothing => Value::Nothing,
    }
}

pub(crate) fn mismatch(expected: &'static str, got: &Value) -> Error {
    Error::TypeMismatch {
        expected,
        got: got.kind().to_string(),
    }
}
