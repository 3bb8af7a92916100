//! Fixed-width integer, float and bool codecs.
//!
//! Little-endian, width times rows, no header. Writers accept any
//! integer variant that fits the destination width.

use tokio::io::{AsyncRead, AsyncWrite};

use super::mismatch;
use crate::error::{Error, Result};
use crate::protocol::io::{BufferedWriter, InputStream};
use crate::types::TypeDesc;
use crate::value::Value;

pub(super) async fn read<'s, R: AsyncRead + Unpin + Send>(
    input: &mut InputStream<'s, R>,
    ty: &TypeDesc,
    rows: usize,
) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(rows);
    for _ in 0..rows {
        let value = match ty {
            TypeDesc::Bool => Value::Bool(input.read_u8().await? != 0),
            TypeDesc::Int8 => Value::Int8(input.read_i8().await?),
            TypeDesc::Int16 => Value::Int16(input.read_i16().await?),
            TypeDesc::Int32 => Value::Int32(input.read_i32().await?),
            TypeDesc::Int64 => Value::Int64(input.read_i64().await?),
            TypeDesc::Int128 => Value::Int128(input.read_i128().await?),
            TypeDesc::Int256 => Value::Int256(input.read_fixed::<32>().await?),
            TypeDesc::UInt8 => Value::UInt8(input.read_u8().await?),
            TypeDesc::UInt16 => Value::UInt16(input.read_u16().await?),
            TypeDesc::UInt32 => Value::UInt32(input.read_u32().await?),
            TypeDesc::UInt64 => Value::UInt64(input.read_u64().await?),
            TypeDesc::UInt128 => Value::UInt128(input.read_u128().await?),
            TypeDesc::UInt256 => Value::UInt256(input.read_fixed::<32>().await?),
            TypeDesc::Float32 => Value::Float32(input.read_f32().await?),
            TypeDesc::Float64 => Value::Float64(input.read_f64().await?),
            _ => return Err(Error::Protocol(format!("not a numeric type: {ty:?}"))),
        };
        out.push(value);
    }
    Ok(out)
}

pub(super) async fn write<W: AsyncWrite + Unpin>(
    w: &mut BufferedWriter<W>,
    ty: &TypeDesc,
    values: &[Value],
) -> Result<()> {
    for value in values {
        match ty {
            TypeDesc::Bool => {
                let b = match value {
                    Value::Bool(b) => *b,
                    other => as_i128(other).ok_or_else(|| mismatch("Bool", other))? != 0,
                };
                w.write_u8(b as u8).await?;
            }
            TypeDesc::Int8 => w.write_i8(signed(value, "Int8")?).await?,
            TypeDesc::Int16 => w.write_i16(signed(value, "Int16")?).await?,
            TypeDesc::Int32 => w.write_i32(signed(value, "Int32")?).await?,
            TypeDesc::Int64 => w.write_i64(signed(value, "Int64")?).await?,
            TypeDesc::Int128 => {
                let v = as_i128(value).ok_or_else(|| mismatch("Int128", value))?;
                w.write_i128(v).await?;
            }
            TypeDesc::Int256 => {
                let raw = match value {
                    Value::Int256(raw) => *raw,
                    other => {
                        let v = as_i128(other).ok_or_else(|| mismatch("Int256", other))?;
                        extend_signed(v)
                    }
                };
                w.write_bytes(&raw).await?;
            }
            TypeDesc::UInt8 => w.write_u8(unsigned(value, "UInt8")?).await?,
            TypeDesc::UInt16 => w.write_u16(unsigned(value, "UInt16")?).await?,
            TypeDesc::UInt32 => w.write_u32(unsigned(value, "UInt32")?).await?,
            TypeDesc::UInt64 => w.write_u64(unsigned(value, "UInt64")?).await?,
            TypeDesc::UInt128 => {
                let v = as_u128(value).ok_or_else(|| mismatch("UInt128", value))?;
                w.write_u128(v).await?;
            }
            TypeDesc::UInt256 => {
                let raw = match value {
                    Value::UInt256(raw) => *raw,
                    other => {
                        let v = as_u128(other).ok_or_else(|| mismatch("UInt256", other))?;
                        extend_unsigned(v)
                    }
                };
                w.write_bytes(&raw).await?;
            }
            TypeDesc::Float32 => {
                let v = as_f64(value).ok_or_else(|| mismatch("Float32", value))?;
                w.write_f32(v as f32).await?;
            }
            TypeDesc::Float64 => {
                let v = as_f64(value).ok_or_else(|| mismatch("Float64", value))?;
                w.write_f64(v).await?;
            }
            _ => return Err(Error::Protocol(format!("not a numeric type: {ty:?}"))),
        }
    }
    Ok(())
}

fn signed<T: TryFrom<i128>>(value: &Value, expected: &'static str) -> Result<T> {
    let wide = as_i128(value).ok_or_else(|| mismatch(expected, value))?;
    T::try_from(wide).map_err(|_| mismatch(expected, value))
}

fn unsigned<T: TryFrom<u128>>(value: &Value, expected: &'static str) -> Result<T> {
    let wide = as_u128(value).ok_or_else(|| mismatch(expected, value))?;
    T::try_from(wide).map_err(|_| mismatch(expected, value))
}

pub(super) fn as_i128(value: &Value) -> Option<i128> {
    Some(match value {
        Value::Int8(v) => *v as i128,
        Value::Int16(v) => *v as i128,
        Value::Int32(v) => *v as i128,
        Value::Int64(v) => *v as i128,
        Value::Int128(v) => *v,
        Value::UInt8(v) => *v as i128,
        Value::UInt16(v) => *v as i128,
        Value::UInt32(v) => *v as i128,
        Value::UInt64(v) => *v as i128,
        Value::UInt128(v) => i128::try_from(*v).ok()?,
        Value::Bool(b) => *b as i128,
        _ => return None,
    })
}

pub(super) fn as_u128(value: &Value) -> Option<u128> {
    Some(match value {
        Value::UInt8(v) => *v as u128,
        Value::UInt16(v) => *v as u128,
        Value::UInt32(v) => *v as u128,
        Value::UInt64(v) => *v as u128,
        Value::UInt128(v) => *v,
        Value::Bool(b) => *b as u128,
        Value::Int8(v) => u128::try_from(*v).ok()?,
        Value::Int16(v) => u128::try_from(*v).ok()?,
        Value::Int32(v) => u128::try_from(*v).ok()?,
        Value::Int64(v) => u128::try_from(*v).ok()?,
        Value::Int128(v) => u128::try_from(*v).ok()?,
        _ => return None,
    })
}

fn as_f64(value: &Value) -> Option<f64> {
    Some(match value {
        Value::Float32(v) => *v as f64,
        Value::Float64(v) => *v,
        other => as_i128(other)? as f64,
    })
}

/// Sign-extend an i128 into 32 little-endian bytes.
fn extend_signed(v: i128) -> [u8; 32] {
    let mut out = if v < 0 { [0xff; 32] } else { [0; 32] };
    out[..16].copy_from_slice(&v.to_le_bytes());
    out
}

fn extend_unsigned(v: u128) -> [u8; 32] {
    let mut out = [0; 32];
    out[..16].copy_from_slice(&v.to_le_bytes());
    out
}
