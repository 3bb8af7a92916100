//! Composite codecs: Array, Tuple, Nullable, Map, LowCardinality, Nested.
//!
//! Arrays carry cumulative u64 end offsets followed by the flattened
//! inner column; Map is wire-equivalent to `Array(Tuple(K, V))`; Nested
//! to an array of tuples over its fields. Nullable writes a null mask and
//! then the fully materialized inner column with placeholders in the
//! null slots.

use std::collections::HashMap;

use chrono::Datelike;
use tokio::io::{AsyncRead, AsyncWrite};

use super::{default_value, mismatch, read_data, write_data};
use crate::error::{Error, Result};
use crate::protocol::block::ColumnCtx;
use crate::protocol::io::{BufferedWriter, InputStream};
use crate::types::TypeDesc;
use crate::value::Value;

// KeysSerialization flags of the LowCardinality framing.
const NEED_GLOBAL_DICTIONARY: u64 = 1 << 8;
const HAS_ADDITIONAL_KEYS: u64 = 1 << 9;
const NEED_UPDATE_DICTIONARY: u64 = 1 << 10;

pub(super) async fn read_array<'s, R: AsyncRead + Unpin + Send>(
    input: &mut InputStream<'s, R>,
    inner: &TypeDesc,
    rows: usize,
    ctx: &ColumnCtx,
) -> Result<Vec<Value>> {
    let mut offsets = Vec::with_capacity(rows);
    for _ in 0..rows {
        offsets.push(input.read_u64().await? as usize);
    }
    let total = offsets.last().copied().unwrap_or(0);
    let flat = read_data(input, inner, total, ctx).await?;

    let mut out = Vec::with_capacity(rows);
    let mut start = 0;
    for end in offsets {
        if end < start || end > flat.len() {
            return Err(Error::Protocol("array offsets are not monotonic".into()));
        }
        out.push(Value::Array(flat[start..end].to_vec()));
        start = end;
    }
    Ok(out)
}

pub(super) async fn write_array<W: AsyncWrite + Unpin + Send>(
    w: &mut BufferedWriter<W>,
    inner: &TypeDesc,
    values: &[Value],
) -> Result<()> {
    let mut flat = Vec::new();
    let mut total = 0u64;
    for value in values {
        let Value::Array(items) = value else {
            return Err(mismatch("Array", value));
        };
        total += items.len() as u64;
        w.write_u64(total).await?;
        flat.extend(items.iter().cloned());
    }
    write_data(w, inner, &flat).await
}

pub(super) async fn read_tuple<'s, R: AsyncRead + Unpin + Send>(
    input: &mut InputStream<'s, R>,
    elements: &[TypeDesc],
    rows: usize,
    ctx: &ColumnCtx,
) -> Result<Vec<Value>> {
    let mut columns = Vec::with_capacity(elements.len());
    for element in elements {
        columns.push(read_data(input, element, rows, ctx).await?);
    }
    let mut out = Vec::with_capacity(rows);
    for i in 0..rows {
        out.push(Value::Tuple(columns.iter().map(|c| c[i].clone()).collect()));
    }
    Ok(out)
}

pub(super) async fn write_tuple<W: AsyncWrite + Unpin + Send>(
    w: &mut BufferedWriter<W>,
    elements: &[TypeDesc],
    values: &[Value],
) -> Result<()> {
    for (i, element) in elements.iter().enumerate() {
        let mut column = Vec::with_capacity(values.len());
        for value in values {
            let Value::Tuple(items) = value else {
                return Err(mismatch("Tuple", value));
            };
            if items.len() != elements.len() {
                return Err(Error::InvalidArgument(format!(
                    "tuple of {} elements does not fit a {}-element column",
                    items.len(),
                    elements.len()
                )));
            }
            column.push(items[i].clone());
        }
        write_data(w, element, &column).await?;
    }
    Ok(())
}

pub(super) async fn read_nullable<'s, R: AsyncRead + Unpin + Send>(
    input: &mut InputStream<'s, R>,
    inner: &TypeDesc,
    rows: usize,
    ctx: &ColumnCtx,
) -> Result<Vec<Value>> {
    let mask = input.read_bytes(rows).await?;
    let inner_values = read_data(input, inner, rows, ctx).await?;
    Ok(mask
        .into_iter()
        .zip(inner_values)
        .map(|(is_null, value)| if is_null != 0 { Value::Null } else { value })
        .collect())
}

pub(super) async fn write_nullable<W: AsyncWrite + Unpin + Send>(
    w: &mut BufferedWriter<W>,
    inner: &TypeDesc,
    values: &[Value],
) -> Result<()> {
    for value in values {
        w.write_u8(value.is_null() as u8).await?;
    }
    let materialized: Vec<Value> = values
        .iter()
        .map(|v| {
            if v.is_null() {
                default_value(inner)
            } else {
                v.clone()
            }
        })
        .collect();
    write_data(w, inner, &materialized).await
}

pub(super) async fn read_map<'s, R: AsyncRead + Unpin + Send>(
    input: &mut InputStream<'s, R>,
    key: &TypeDesc,
    value: &TypeDesc,
    rows: usize,
    ctx: &ColumnCtx,
) -> Result<Vec<Value>> {
    let mut offsets = Vec::with_capacity(rows);
    for _ in 0..rows {
        offsets.push(input.read_u64().await? as usize);
    }
    let total = offsets.last().copied().unwrap_or(0);
    let keys = read_data(input, key, total, ctx).await?;
    let values = read_data(input, value, total, ctx).await?;

    let mut out = Vec::with_capacity(rows);
    let mut start = 0;
    for end in offsets {
        if end < start || end > keys.len() {
            return Err(Error::Protocol("map offsets are not monotonic".into()));
        }
        let pairs = keys[start..end]
            .iter()
            .cloned()
            .zip(values[start..end].iter().cloned())
            .collect();
        out.push(Value::Map(pairs));
        start = end;
    }
    Ok(out)
}

pub(super) async fn write_map<W: AsyncWrite + Unpin + Send>(
    w: &mut BufferedWriter<W>,
    key: &TypeDesc,
    value: &TypeDesc,
    values: &[Value],
) -> Result<()> {
    let mut keys = Vec::new();
    let mut vals = Vec::new();
    let mut total = 0u64;
    for entry in values {
        let Value::Map(pairs) = entry else {
            return Err(mismatch("Map", entry));
        };
        total += pairs.len() as u64;
        w.write_u64(total).await?;
        for (k, v) in pairs {
            keys.push(k.clone());
            vals.push(v.clone());
        }
    }
    write_data(w, key, &keys).await?;
    write_data(w, value, &vals).await
}

pub(super) async fn read_nested<'s, R: AsyncRead + Unpin + Send>(
    input: &mut InputStream<'s, R>,
    fields: &[(String, TypeDesc)],
    rows: usize,
    ctx: &ColumnCtx,
) -> Result<Vec<Value>> {
    let tuple = TypeDesc::Tuple(fields.iter().map(|(_, t)| t.clone()).collect());
    read_array(input, &tuple, rows, ctx).await
}

pub(super) async fn write_nested<W: AsyncWrite + Unpin + Send>(
    w: &mut BufferedWriter<W>,
    fields: &[(String, TypeDesc)],
    values: &[Value],
) -> Result<()> {
    let tuple = TypeDesc::Tuple(fields.iter().map(|(_, t)| t.clone()).collect());
    write_array(w, &tuple, values).await
}

fn strip_nullable(ty: &TypeDesc) -> (&TypeDesc, bool) {
    match ty {
        TypeDesc::Nullable(inner) => (inner, true),
        other => (other, false),
    }
}

pub(super) async fn read_low_cardinality<'s, R: AsyncRead + Unpin + Send>(
    input: &mut InputStream<'s, R>,
    inner: &TypeDesc,
    rows: usize,
    ctx: &ColumnCtx,
) -> Result<Vec<Value>> {
    if rows == 0 {
        return Ok(Vec::new());
    }
    let flags = input.read_u64().await?;
    if flags & NEED_GLOBAL_DICTIONARY != 0 {
        return Err(Error::Protocol(
            "global low cardinality dictionaries are not supported".into(),
        ));
    }
    if flags & HAS_ADDITIONAL_KEYS == 0 {
        return Err(Error::Protocol(
            "low cardinality block without additional keys".into(),
        ));
    }
    let width = flags & 0xff;

    let (base, nullable) = strip_nullable(inner);
    let dict_size = input.read_u64().await? as usize;
    let dict = read_data(input, base, dict_size, ctx).await?;
    let n = input.read_u64().await? as usize;
    if n != rows {
        return Err(Error::Protocol(format!(
            "low cardinality row count {n} does not match block rows {rows}"
        )));
    }

    let mut out = Vec::with_capacity(rows);
    for _ in 0..rows {
        let idx = match width {
            0 => input.read_u8().await? as usize,
            1 => input.read_u16().await? as usize,
            2 => input.read_u32().await? as usize,
            3 => input.read_u64().await? as usize,
            other => {
                return Err(Error::Protocol(format!(
                    "bad low cardinality index width {other}"
                )))
            }
        };
        if idx >= dict_size {
            return Err(Error::Protocol(format!(
                "low cardinality index {idx} outside dictionary of {dict_size}"
            )));
        }
        out.push(if nullable && idx == 0 {
            Value::Null
        } else {
            dict[idx].clone()
        });
    }
    Ok(out)
}

pub(super) async fn write_low_cardinality<W: AsyncWrite + Unpin + Send>(
    w: &mut BufferedWriter<W>,
    inner: &TypeDesc,
    values: &[Value],
) -> Result<()> {
    // Nothing beyond the version prefix for an empty column.
    if values.is_empty() {
        return Ok(());
    }
    let (base, nullable) = strip_nullable(inner);

    // Index 0 is the null sentinel when the inner type is nullable.
    let mut dictionary: Vec<Value> = Vec::new();
    if nullable {
        dictionary.push(default_value(base));
    }
    let offset = nullable as u64;

    let mut keys = Vec::with_capacity(values.len());
    let mut seen: HashMap<Vec<u8>, u64> = HashMap::new();
    for value in values {
        if value.is_null() {
            if !nullable {
                return Err(mismatch("LowCardinality", value));
            }
            keys.push(0);
            continue;
        }
        let next = seen.len() as u64;
        let slot = *seen.entry(dict_key(value)).or_insert(next);
        if slot == next {
            dictionary.push(value.clone());
        }
        keys.push(slot + offset);
    }

    let width = index_width(dictionary.len());
    w.write_u64(HAS_ADDITIONAL_KEYS | NEED_UPDATE_DICTIONARY | width as u64)
        .await?;
    w.write_u64(dictionary.len() as u64).await?;
    write_data(w, base, &dictionary).await?;
    w.write_u64(values.len() as u64).await?;
    for key in keys {
        match width {
            0 => w.write_u8(key as u8).await?,
            1 => w.write_u16(key as u16).await?,
            2 => w.write_u32(key as u32).await?,
            _ => w.write_u64(key).await?,
        }
    }
    Ok(())
}

/// Index width in `{0: u8, 1: u16, 2: u32, 3: u64}` steps, chosen by
/// dictionary size.
fn index_width(len: usize) -> u8 {
    ((len.max(1).ilog2() / 8) as u8).min(3)
}

/// Canonical byte key for dictionary deduplication.
fn dict_key(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    push_key(value, &mut out);
    out
}

fn push_key(value: &Value, out: &mut Vec<u8>) {
    out.extend_from_slice(value.kind().as_bytes());
    out.push(0);
    match value {
        Value::Null | Value::Nothing => {}
        Value::Bool(b) => out.push(*b as u8),
        Value::Int8(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Int16(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Int128(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Int256(raw) | Value::UInt256(raw) => out.extend_from_slice(raw),
        Value::UInt8(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::UInt16(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::UInt32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::UInt64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::UInt128(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Float32(v) => out.extend_from_slice(&v.to_bits().to_le_bytes()),
        Value::Float64(v) => out.extend_from_slice(&v.to_bits().to_le_bytes()),
        Value::String(s) => out.extend_from_slice(s.as_bytes()),
        Value::Bytes(b) => out.extend_from_slice(b),
        Value::Decimal { mantissa, scale } => {
            out.extend_from_slice(&mantissa.to_le_bytes());
            out.push(*scale);
        }
        Value::Decimal256 { raw, scale } => {
            out.extend_from_slice(raw);
            out.push(*scale);
        }
        Value::Date(d) => out.extend_from_slice(&d.num_days_from_ce().to_le_bytes()),
        Value::DateTime(dt) => {
            out.extend_from_slice(&dt.timestamp().to_le_bytes());
            out.extend_from_slice(&dt.timestamp_subsec_nanos().to_le_bytes());
        }
        Value::Uuid(u) => out.extend_from_slice(u.as_bytes()),
        Value::Ipv4(a) => out.extend_from_slice(&a.octets()),
        Value::Ipv6(a) => out.extend_from_slice(&a.octets()),
        Value::Array(items) | Value::Tuple(items) => {
            out.extend_from_slice(&(items.len() as u64).to_le_bytes());
            for item in items {
                push_key(item, out);
            }
        }
        Value::Map(pairs) => {
            out.extend_from_slice(&(pairs.len() as u64).to_le_bytes());
            for (k, v) in pairs {
                push_key(k, out);
                push_key(v, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{assert_roundtrip, roundtrip};
    use super::index_width;
    use crate::value::Value;

    fn strings(items: &[&str]) -> Vec<Value> {
        items.iter().map(|s| Value::String((*s).into())).collect()
    }

    #[tokio::test]
    async fn array_roundtrips() {
        assert_roundtrip(
            "Array(Int32)",
            vec![
                Value::Array(vec![Value::Int32(1), Value::Int32(2)]),
                Value::Array(vec![]),
                Value::Array(vec![Value::Int32(-3)]),
            ],
        )
        .await;
    }

    #[tokio::test]
    async fn deeply_nested_array_roundtrip() {
        let inner = Value::Array(vec![
            Value::String("a".into()),
            Value::Null,
            Value::String("b".into()),
        ]);
        assert_roundtrip(
            "Array(Array(Nullable(String)))",
            vec![
                Value::Array(vec![inner, Value::Array(vec![])]),
                Value::Array(vec![]),
            ],
        )
        .await;
    }

    #[tokio::test]
    async fn tuple_roundtrip() {
        assert_roundtrip(
            "Tuple(UInt8, String)",
            vec![
                Value::Tuple(vec![Value::UInt8(1), Value::String("one".into())]),
                Value::Tuple(vec![Value::UInt8(2), Value::String("two".into())]),
            ],
        )
        .await;
    }

    #[tokio::test]
    async fn nullable_all_null_roundtrip() {
        assert_roundtrip(
            "Nullable(String)",
            vec![Value::Null, Value::Null, Value::Null],
        )
        .await;
        assert_roundtrip(
            "Nullable(Int64)",
            vec![Value::Int64(5), Value::Null, Value::Int64(-5)],
        )
        .await;
    }

    #[tokio::test]
    async fn map_roundtrip() {
        assert_roundtrip(
            "Map(String, UInt64)",
            vec![
                Value::Map(vec![
                    (Value::String("a".into()), Value::UInt64(1)),
                    (Value::String("b".into()), Value::UInt64(2)),
                ]),
                Value::Map(vec![]),
            ],
        )
        .await;
    }

    #[tokio::test]
    async fn nested_is_array_of_tuples() {
        assert_roundtrip(
            "Nested(a String, b Int64)",
            vec![Value::Array(vec![
                Value::Tuple(vec![Value::String("x".into()), Value::Int64(1)]),
                Value::Tuple(vec![Value::String("y".into()), Value::Int64(2)]),
            ])],
        )
        .await;
    }

    #[tokio::test]
    async fn geo_point_roundtrip() {
        assert_roundtrip(
            "Point",
            vec![Value::Tuple(vec![
                Value::Float64(1.0),
                Value::Float64(-2.5),
            ])],
        )
        .await;
    }

    #[tokio::test]
    async fn simple_aggregate_function_is_transparent() {
        assert_roundtrip(
            "SimpleAggregateFunction(sum, UInt64)",
            vec![Value::UInt64(10), Value::UInt64(20)],
        )
        .await;
    }

    #[tokio::test]
    async fn low_cardinality_roundtrip() {
        assert_roundtrip(
            "LowCardinality(String)",
            strings(&["a", "b", "a", "c", "a", "b"]),
        )
        .await;
    }

    #[tokio::test]
    async fn low_cardinality_nullable_roundtrip() {
        assert_roundtrip(
            "LowCardinality(Nullable(String))",
            vec![
                Value::String("x".into()),
                Value::Null,
                Value::String("x".into()),
                Value::Null,
                Value::String("y".into()),
            ],
        )
        .await;
    }

    #[tokio::test]
    async fn low_cardinality_dedupes_dictionary() {
        // Six rows, two distinct values: the inner column must shrink to
        // the dictionary, which the roundtrip proves structurally.
        let back = roundtrip(
            "LowCardinality(String)",
            strings(&["dup", "dup", "dup", "uniq", "dup", "dup"]),
        )
        .await;
        assert_eq!(back, strings(&["dup", "dup", "dup", "uniq", "dup", "dup"]));
    }

    #[tokio::test]
    async fn low_cardinality_u16_index_transition() {
        // 300 distinct values push the index width past u8.
        let values: Vec<Value> = (0..300)
            .map(|i| Value::String(format!("key-{i}")))
            .collect();
        assert_roundtrip("LowCardinality(String)", values).await;
    }

    #[tokio::test]
    async fn low_cardinality_u32_index_transition() {
        // 66_000 distinct values push the index width past u16.
        let values: Vec<Value> = (0..66_000)
            .map(|i| Value::UInt32(i as u32))
            .collect();
        assert_roundtrip("LowCardinality(UInt32)", values).await;
    }

    #[tokio::test]
    async fn empty_arrays_of_low_cardinality() {
        assert_roundtrip(
            "Array(LowCardinality(String))",
            vec![Value::Array(vec![]), Value::Array(vec![])],
        )
        .await;
    }

    #[test]
    fn index_width_steps() {
        assert_eq!(index_width(1), 0);
        assert_eq!(index_width(255), 0);
        assert_eq!(index_width(256), 1);
        assert_eq!(index_width(65_535), 1);
        assert_eq!(index_width(65_536), 2);
        assert_eq!(index_width(1 << 24), 3);
    }
}
