//! Decimal(P, S) codec.
//!
//! The backing integer width follows the precision: 32-bit up to P=9,
//! 64-bit up to 18, 128-bit up to 38, 256-bit beyond. Values travel as
//! the scaled mantissa, little-endian two's-complement.

use tokio::io::{AsyncRead, AsyncWrite};

use super::{mismatch, numeric};
use crate::error::{Error, Result};
use crate::protocol::io::{BufferedWriter, InputStream};
use crate::types::TypeDesc;
use crate::value::Value;

pub(super) async fn read<'s, R: AsyncRead + Unpin + Send>(
    input: &mut InputStream<'s, R>,
    precision: u8,
    scale: u8,
    rows: usize,
) -> Result<Vec<Value>> {
    let width = TypeDesc::decimal_width(precision);
    let mut out = Vec::with_capacity(rows);
    for _ in 0..rows {
        let value = match width {
            4 => Value::Decimal {
                mantissa: input.read_i32().await? as i128,
                scale,
            },
            8 => Value::Decimal {
                mantissa: input.read_i64().await? as i128,
                scale,
            },
            16 => Value::Decimal {
                mantissa: input.read_i128().await?,
                scale,
            },
            _ => Value::Decimal256 {
                raw: input.read_fixed::<32>().await?,
                scale,
            },
        };
        out.push(value);
    }
    Ok(out)
}

pub(super) async fn write<W: AsyncWrite + Unpin>(
    w: &mut BufferedWriter<W>,
    precision: u8,
    scale: u8,
    values: &[Value],
) -> Result<()> {
    let width = TypeDesc::decimal_width(precision);
    for value in values {
        if width == 32 {
            let raw = match value {
                Value::Decimal256 { raw, scale: s } if *s == scale => *raw,
                other => {
                    let mantissa = mantissa_of(other, scale)?;
                    let mut raw = if mantissa < 0 { [0xff; 32] } else { [0; 32] };
                    raw[..16].copy_from_slice(&mantissa.to_le_bytes());
                    raw
                }
            };
            w.write_bytes(&raw).await?;
            continue;
        }

        let mantissa = mantissa_of(value, scale)?;
        match width {
            4 => {
                let v = i32::try_from(mantissa)
                    .map_err(|_| overflow(precision, scale, mantissa))?;
                w.write_i32(v).await?;
            }
            8 => {
                let v = i64::try_from(mantissa)
                    .map_err(|_| overflow(precision, scale, mantissa))?;
                w.write_i64(v).await?;
            }
            _ => w.write_i128(mantissa).await?,
        }
    }
    Ok(())
}

fn overflow(precision: u8, scale: u8, mantissa: i128) -> Error {
    Error::InvalidArgument(format!(
        "mantissa {mantissa} does not fit Decimal({precision}, {scale})"
    ))
}

/// Scaled mantissa of a value targeted at a column with `scale`.
fn mantissa_of(value: &Value, scale: u8) -> Result<i128> {
    match value {
        Value::Decimal { mantissa, scale: s } => {
            if *s == scale {
                Ok(*mantissa)
            } else if *s < scale {
                let factor = 10i128.pow((scale - s) as u32);
                mantissa
                    .checked_mul(factor)
                    .ok_or_else(|| mismatch("Decimal", value))
            } else {
                Err(Error::InvalidArgument(format!(
                    "cannot narrow decimal scale {s} to {scale}"
                )))
            }
        }
        Value::Float32(_) | Value::Float64(_) => {
            let f = match value {
                Value::Float32(f) => *f as f64,
                Value::Float64(f) => *f,
                _ => unreachable!(),
            };
            Ok((f * 10f64.powi(scale as i32)).round() as i128)
        }
        other => {
            let int = numeric::as_i128(other).ok_or_else(|| mismatch("Decimal", other))?;
            int.checked_mul(10i128.pow(scale as u32))
                .ok_or_else(|| mismatch("Decimal", other))
        }
    }
}
