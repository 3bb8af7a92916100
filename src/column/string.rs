//! String and FixedString codecs.
//!
//! String is per-row `varint len || bytes`, UTF-8 for text. FixedString
//! is exactly `n` bytes per row, zero-padded on write and surfaced raw
//! (padding included) on read.

use tokio::io::{AsyncRead, AsyncWrite};

use super::mismatch;
use crate::error::{Error, Result};
use crate::protocol::io::{BufferedWriter, InputStream};
use crate::value::Value;

pub(super) async fn read_string<'s, R: AsyncRead + Unpin + Send>(
    input: &mut InputStream<'s, R>,
    rows: usize,
) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(rows);
    for _ in 0..rows {
        out.push(Value::String(input.read_str().await?));
    }
    Ok(out)
}

pub(super) async fn write_string<W: AsyncWrite + Unpin>(
    w: &mut BufferedWriter<W>,
    values: &[Value],
) -> Result<()> {
    for value in values {
        match value {
            Value::String(s) => w.write_str(s).await?,
            Value::Bytes(b) => w.write_str_bytes(b).await?,
            other => return Err(mismatch("String", other)),
        }
    }
    Ok(())
}

pub(super) async fn read_fixed_string<'s, R: AsyncRead + Unpin + Send>(
    input: &mut InputStream<'s, R>,
    n: usize,
    rows: usize,
) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(rows);
    for _ in 0..rows {
        out.push(Value::Bytes(input.read_bytes(n).await?));
    }
    Ok(out)
}

pub(super) async fn write_fixed_string<W: AsyncWrite + Unpin>(
    w: &mut BufferedWriter<W>,
    n: usize,
    values: &[Value],
) -> Result<()> {
    for value in values {
        let raw = match value {
            Value::String(s) => s.as_bytes(),
            Value::Bytes(b) => b.as_slice(),
            other => return Err(mismatch("FixedString", other)),
        };
        if raw.len() > n {
            return Err(Error::InvalidArgument(format!(
                "value of {} bytes does not fit FixedString({n})",
                raw.len()
            )));
        }
        w.write_bytes(raw).await?;
        if raw.len() < n {
            w.write_bytes(&vec![0u8; n - raw.len()]).await?;
        }
    }
    Ok(())
}
