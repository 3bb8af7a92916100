//! UUID, IP address, Enum and Nothing codecs.

use std::net::{Ipv4Addr, Ipv6Addr};

use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use super::{mismatch, numeric};
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
            // UUIDs travel as two u64 halves, high half first.
            TypeDesc::Uuid => {
                let hi = input.read_u64().await?;
                let lo = input.read_u64().await?;
                Value::Uuid(Uuid::from_u128(((hi as u128) << 64) | lo as u128))
            }
            TypeDesc::Ipv4 => Value::Ipv4(Ipv4Addr::from(input.read_u32().await?)),
            TypeDesc::Ipv6 => Value::Ipv6(Ipv6Addr::from(input.read_fixed::<16>().await?)),
            TypeDesc::Enum8(pairs) => {
                let raw = input.read_i8().await?;
                enum_label(pairs.iter().map(|(n, v)| (n, *v as i16)), raw as i16)?
            }
            TypeDesc::Enum16(pairs) => {
                let raw = input.read_i16().await?;
                enum_label(pairs.iter().map(|(n, v)| (n, *v)), raw)?
            }
            TypeDesc::Nothing => {
                let _ = input.read_u8().await?;
                Value::Nothing
            }
            _ => return Err(Error::Protocol(format!("unexpected type here: {ty:?}"))),
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
            TypeDesc::Uuid => {
                let Value::Uuid(u) = value else {
                    return Err(mismatch("UUID", value));
                };
                let v = u.as_u128();
                w.write_u64((v >> 64) as u64).await?;
                w.write_u64(v as u64).await?;
            }
            TypeDesc::Ipv4 => {
                let Value::Ipv4(addr) = value else {
                    return Err(mismatch("IPv4", value));
                };
                w.write_u32(u32::from(*addr)).await?;
            }
            TypeDesc::Ipv6 => {
                let Value::Ipv6(addr) = value else {
                    return Err(mismatch("IPv6", value));
                };
                w.write_bytes(&addr.octets()).await?;
            }
            TypeDesc::Enum8(pairs) => {
                let raw = enum_value(pairs.iter().map(|(n, v)| (n, *v as i16)), value)?;
                w.write_i8(raw as i8).await?;
            }
            TypeDesc::Enum16(pairs) => {
                let raw = enum_value(pairs.iter().map(|(n, v)| (n, *v)), value)?;
                w.write_i16(raw).await?;
            }
            TypeDesc::Nothing => w.write_u8(0).await?,
            _ => return Err(Error::Protocol(format!("unexpected type here: {ty:?}"))),
        }
    }
    Ok(())
}

fn enum_label<'a>(
    pairs: impl Iterator<Item = (&'a String, i16)>,
    raw: i16,
) -> Result<Value> {
    for (name, value) in pairs {
        if value == raw {
            return Ok(Value::String(name.clone()));
        }
    }
    Err(Error::Protocol(format!("unknown enum value {raw}")))
}

/// Enums encode from either the label or the underlying integer.
fn enum_value<'a>(
    pairs: impl Iterator<Item = (&'a String, i16)> + Clone,
    value: &Value,
) -> Result<i16> {
    match value {
        Value::String(label) => {
            for (name, v) in pairs {
                if name == label {
                    return Ok(v);
                }
            }
            Err(Error::InvalidArgument(format!(
                "unknown enum label {label:?}"
            )))
        }
        other => {
            let int = numeric::as_i128(other).ok_or_else(|| mismatch("Enum", other))?;
            let int = i16::try_from(int).map_err(|_| mismatch("Enum", other))?;
            if pairs.clone().any(|(_, v)| v == int) {
                Ok(int)
            } else {
                Err(Error::InvalidArgument(format!("unknown enum value {int}")))
            }
        }
    }
}
