//! Buffered reader/writer over an async byte stream.
//!
//! All integers on the wire are little-endian; lengths and packet ids are
//! unsigned LEB128 varints. Reads suspend on socket starvation with any
//! partially consumed buffer state preserved; writes accumulate and go
//! out on [`BufferedWriter::flush`] or when the buffer passes its
//! high-water mark.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Default I/O buffer size.
pub const BUFFER_SIZE: usize = 65536;

/// Maximum encoded length of a varint.
const MAX_VARINT_BYTES: usize = 10;

pub struct BufferedReader<R> {
    inner: R,
    buf: BytesMut,
    pos: usize,
    capacity: usize,
}

impl<R: AsyncRead + Unpin> BufferedReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, BUFFER_SIZE)
    }

    pub fn with_capacity(inner: R, capacity: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(capacity),
            pos: 0,
            capacity,
        }
    }

    async fn refill(&mut self) -> Result<()> {
        if self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        }
        if self.buf.capacity() - self.buf.len() < self.capacity {
            self.buf.reserve(self.capacity);
        }
        let n = self.inner.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Err(Error::UnexpectedEof);
        }
        Ok(())
    }

    /// Read exactly `n` bytes, refilling in chunks as needed.
    pub async fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            if self.pos == self.buf.len() {
                self.refill().await?;
            }
            let take = (n - out.len()).min(self.buf.len() - self.pos);
            out.extend_from_slice(&self.buf[self.pos..self.pos + take]);
            self.pos += take;
        }
        Ok(out)
    }

    /// Read a fixed-size array without a heap allocation.
    pub async fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        let mut filled = 0;
        while filled < N {
            if self.pos == self.buf.len() {
                self.refill().await?;
            }
            let take = (N - filled).min(self.buf.len() - self.pos);
            out[filled..filled + take].copy_from_slice(&self.buf[self.pos..self.pos + take]);
            self.pos += take;
            filled += take;
        }
        Ok(out)
    }
}

pub struct BufferedWriter<W> {
    inner: W,
    buf: BytesMut,
    capacity: usize,
}

impl<W: AsyncWrite + Unpin> BufferedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_capacity(inner, BUFFER_SIZE)
    }

    pub fn with_capacity(inner: W, capacity: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    pub async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= self.capacity {
            self.drain().await?;
        }
        Ok(())
    }

    async fn drain(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.inner.write_all(&self.buf).await?;
            self.buf.clear();
        }
        Ok(())
    }

    /// Push buffered bytes down and flush the underlying stream.
    pub async fn flush(&mut self) -> Result<()> {
        self.drain().await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn write_varint(&mut self, mut value: u64) -> Result<()> {
        let mut encoded = [0u8; MAX_VARINT_BYTES];
        let mut len = 0;
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                encoded[len] = byte | 0x80;
                len += 1;
            } else {
                encoded[len] = byte;
                len += 1;
                break;
            }
        }
        self.write_bytes(&encoded[..len]).await
    }

    pub async fn write_str(&mut self, s: &str) -> Result<()> {
        self.write_str_bytes(s.as_bytes()).await
    }

    pub async fn write_str_bytes(&mut self, s: &[u8]) -> Result<()> {
        self.write_varint(s.len() as u64).await?;
        self.write_bytes(s).await
    }

    pub async fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_bytes(&[v]).await
    }

    pub async fn write_u16(&mut self, v: u16) -> Result<()> {
        self.write_bytes(&v.to_le_bytes()).await
    }

    pub async fn write_u32(&mut self, v: u32) -> Result<()> {
        self.write_bytes(&v.to_le_bytes()).await
    }

    pub async fn write_u64(&mut self, v: u64) -> Result<()> {
        self.write_bytes(&v.to_le_bytes()).await
    }

    pub async fn write_u128(&mut self, v: u128) -> Result<()> {
        self.write_bytes(&v.to_le_bytes()).await
    }

    pub async fn write_i8(&mut self, v: i8) -> Result<()> {
        self.write_bytes(&v.to_le_bytes()).await
    }

    pub async fn write_i16(&mut self, v: i16) -> Result<()> {
        self.write_bytes(&v.to_le_bytes()).await
    }

    pub async fn write_i32(&mut self, v: i32) -> Result<()> {
        self.write_bytes(&v.to_le_bytes()).await
    }

    pub async fn write_i64(&mut self, v: i64) -> Result<()> {
        self.write_bytes(&v.to_le_bytes()).await
    }

    pub async fn write_i128(&mut self, v: i128) -> Result<()> {
        self.write_bytes(&v.to_le_bytes()).await
    }

    pub async fn write_f32(&mut self, v: f32) -> Result<()> {
        self.write_bytes(&v.to_le_bytes()).await
    }

    pub async fn write_f64(&mut self, v: f64) -> Result<()> {
        self.write_bytes(&v.to_le_bytes()).await
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Byte source for reading a packet payload: either the socket buffer
/// directly, or a per-frame decompressed window over it.
pub enum InputStream<'a, R> {
    Plain(&'a mut BufferedReader<R>),
    #[cfg(feature = "compression")]
    Compressed(super::compress::CompressedInput<'a, R>),
}

impl<'a, R: AsyncRead + Unpin> InputStream<'a, R> {
    pub fn plain(reader: &'a mut BufferedReader<R>) -> Self {
        InputStream::Plain(reader)
    }

    #[cfg(feature = "compression")]
    pub fn compressed(reader: &'a mut BufferedReader<R>) -> Self {
        InputStream::Compressed(super::compress::CompressedInput::new(reader))
    }

    pub async fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        match self {
            InputStream::Plain(r) => r.read_bytes(n).await,
            #[cfg(feature = "compression")]
            InputStream::Compressed(c) => c.read_bytes(n).await,
        }
    }

    pub async fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N]> {
        match self {
            InputStream::Plain(r) => r.read_fixed::<N>().await,
            #[cfg(feature = "compression")]
            InputStream::Compressed(c) => c.read_fixed::<N>().await,
        }
    }

    pub async fn read_varint(&mut self) -> Result<u64> {
        let mut result = 0u64;
        for i in 0..MAX_VARINT_BYTES {
            let byte = self.read_u8().await?;
            result |= ((byte & 0x7f) as u64) << (7 * i);
            if byte < 0x80 {
                return Ok(result);
            }
        }
        Err(Error::Protocol("varint is too long".into()))
    }

    /// Varint length followed by raw bytes.
    pub async fn read_str_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_varint().await? as usize;
        self.read_bytes(len).await
    }

    /// Text columns and protocol strings are UTF-8.
    pub async fn read_str(&mut self) -> Result<String> {
        let raw = self.read_str_bytes().await?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    pub async fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_fixed::<1>().await?[0])
    }

    pub async fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_fixed::<2>().await?))
    }

    pub async fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_fixed::<4>().await?))
    }

    pub async fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_fixed::<8>().await?))
    }

    pub async fn read_u128(&mut self) -> Result<u128> {
        Ok(u128::from_le_bytes(self.read_fixed::<16>().await?))
    }

    pub async fn read_i8(&mut self) -> Result<i8> {
        Ok(i8::from_le_bytes(self.read_fixed::<1>().await?))
    }

    pub async fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.read_fixed::<2>().await?))
    }

    pub async fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_fixed::<4>().await?))
    }

    pub async fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_fixed::<8>().await?))
    }

    pub async fn read_i128(&mut self) -> Result<i128> {
        Ok(i128::from_le_bytes(self.read_fixed::<16>().await?))
    }

    pub async fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_fixed::<4>().await?))
    }

    pub async fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.read_fixed::<8>().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn writer() -> BufferedWriter<Vec<u8>> {
        BufferedWriter::new(Vec::new())
    }

    async fn finish(mut w: BufferedWriter<Vec<u8>>) -> Vec<u8> {
        w.flush().await.unwrap();
        w.into_inner()
    }

    #[tokio::test]
    async fn varint_roundtrip() {
        for n in [
            0u64,
            1,
            127,
            128,
            300,
            16384,
            u32::MAX as u64,
            (1u64 << 63) - 1,
            u64::MAX,
        ] {
            let mut w = writer().await;
            w.write_varint(n).await.unwrap();
            let buf = finish(w).await;
            let mut reader = BufferedReader::new(buf.as_slice());
            let mut input = InputStream::plain(&mut reader);
            assert_eq!(input.read_varint().await.unwrap(), n, "varint {n}");
        }
    }

    #[tokio::test]
    async fn varint_encoding_boundaries() {
        let mut w = writer().await;
        w.write_varint(127).await.unwrap();
        assert_eq!(finish(w).await, vec![0x7f]);
        let mut w = writer().await;
        w.write_varint(128).await.unwrap();
        assert_eq!(finish(w).await, vec![0x80, 0x01]);
    }

    #[tokio::test]
    async fn string_roundtrip() {
        for s in ["", "x", "数据库", "a longer string with spaces"] {
            let mut w = writer().await;
            w.write_str(s).await.unwrap();
            let buf = finish(w).await;
            let mut reader = BufferedReader::new(buf.as_slice());
            let mut input = InputStream::plain(&mut reader);
            assert_eq!(input.read_str().await.unwrap(), s);
        }
    }

    #[tokio::test]
    async fn fixed_width_roundtrip() {
        let mut w = writer().await;
        w.write_u8(7).await.unwrap();
        w.write_i16(-2).await.unwrap();
        w.write_u32(0xdead_beef).await.unwrap();
        w.write_i64(i64::MIN).await.unwrap();
        w.write_u128(u128::MAX - 5).await.unwrap();
        w.write_f32(1.5).await.unwrap();
        w.write_f64(-0.25).await.unwrap();
        let buf = finish(w).await;
        let mut reader = BufferedReader::new(buf.as_slice());
        let mut input = InputStream::plain(&mut reader);
        assert_eq!(input.read_u8().await.unwrap(), 7);
        assert_eq!(input.read_i16().await.unwrap(), -2);
        assert_eq!(input.read_u32().await.unwrap(), 0xdead_beef);
        assert_eq!(input.read_i64().await.unwrap(), i64::MIN);
        assert_eq!(input.read_u128().await.unwrap(), u128::MAX - 5);
        assert_eq!(input.read_f32().await.unwrap(), 1.5);
        assert_eq!(input.read_f64().await.unwrap(), -0.25);
    }

    #[tokio::test]
    async fn chunked_reads_across_refills() {
        // A tiny buffer forces every multi-byte field to straddle refills.
        let mut payload = Vec::new();
        let mut w = BufferedWriter::new(&mut payload);
        w.write_str(&"y".repeat(1000)).await.unwrap();
        w.write_u64(42).await.unwrap();
        w.flush().await.unwrap();

        let mut reader = BufferedReader::with_capacity(payload.as_slice(), 3);
        let mut input = InputStream::plain(&mut reader);
        assert_eq!(input.read_str().await.unwrap(), "y".repeat(1000));
        assert_eq!(input.read_u64().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn eof_mid_field() {
        let buf = vec![0x05, b'a', b'b'];
        let mut reader = BufferedReader::new(buf.as_slice());
        let mut input = InputStream::plain(&mut reader);
        let err = input.read_str().await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof));
    }
}
