//! Checksummed compression frames for block payloads.
//!
//! Every frame is `[checksum u128][method u8][compressed_size u32 LE]
//! [uncompressed_size u32 LE][body]` where the checksum is CityHash128
//! over everything after it and `compressed_size` counts the 9 header
//! bytes. Checksum verification is mandatory: a mismatch poisons the
//! connection.

use tokio::io::{AsyncRead, AsyncWrite};

use super::io::{BufferedReader, BufferedWriter};
use crate::error::{Error, Result};

pub const METHOD_NONE: u8 = 0x02;
pub const METHOD_LZ4: u8 = 0x82;
pub const METHOD_ZSTD: u8 = 0x90;

/// Frame header past the checksum: method byte plus the two sizes.
const FRAME_HEADER_SIZE: usize = 9;

/// Upper bound accepted for a single frame; guards against running the
/// allocator off corrupt size fields.
const MAX_FRAME_SIZE: u32 = 1 << 30;

const ZSTD_LEVEL: i32 = 3;

/// Negotiable compression methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Lz4,
    Zstd,
}

impl CompressionMethod {
    pub fn method_byte(self) -> u8 {
        match self {
            CompressionMethod::Lz4 => METHOD_LZ4,
            CompressionMethod::Zstd => METHOD_ZSTD,
        }
    }
}

fn checksum(data: &[u8]) -> u128 {
    cityhash_rs::cityhash_102_128(data)
}

/// Reading side: a decompressed window over the raw stream, refilled one
/// frame at a time.
pub struct CompressedInput<'a, R> {
    raw: &'a mut BufferedReader<R>,
    window: Vec<u8>,
    pos: usize,
}

impl<'a, R: AsyncRead + Unpin> CompressedInput<'a, R> {
    pub fn new(raw: &'a mut BufferedReader<R>) -> Self {
        Self {
            raw,
            window: Vec::new(),
            pos: 0,
        }
    }

    async fn refill(&mut self) -> Result<()> {
        let expected = u128::from_le_bytes(self.raw.read_fixed::<16>().await?);
        let header = self.raw.read_fixed::<FRAME_HEADER_SIZE>().await?;
        let method = header[0];
        let compressed_size = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
        let uncompressed_size = u32::from_le_bytes([header[5], header[6], header[7], header[8]]);

        if compressed_size < FRAME_HEADER_SIZE as u32
            || compressed_size > MAX_FRAME_SIZE
            || uncompressed_size > MAX_FRAME_SIZE
        {
            return Err(Error::Protocol(format!(
                "implausible compressed frame sizes: {compressed_size}/{uncompressed_size}"
            )));
        }

        let body_len = compressed_size as usize - FRAME_HEADER_SIZE;
        let mut frame = Vec::with_capacity(compressed_size as usize);
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&self.raw.read_bytes(body_len).await?);

        let actual = checksum(&frame);
        if actual != expected {
            return Err(Error::Checksum { expected, actual });
        }

        let body = &frame[FRAME_HEADER_SIZE..];
        self.window = match method {
            METHOD_NONE => body.to_vec(),
            METHOD_LZ4 => lz4_flex::block::decompress(body, uncompressed_size as usize)
                .map_err(|e| Error::Protocol(format!("lz4 decompression failed: {e}")))?,
            METHOD_ZSTD => zstd::bulk::decompress(body, uncompressed_size as usize)
                .map_err(|e| Error::Protocol(format!("zstd decompression failed: {e}")))?,
            other => {
                return Err(Error::Protocol(format!(
                    "unknown compression method byte {other:#04x}"
                )))
            }
        };
        if self.window.len() != uncompressed_size as usize {
            return Err(Error::Protocol(format!(
                "frame decompressed to {} bytes, header said {}",
                self.window.len(),
                uncompressed_size
            )));
        }
        self.pos = 0;
        Ok(())
    }

    pub async fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            if self.pos == self.window.len() {
                self.refill().await?;
            }
            let take = (n - out.len()).min(self.window.len() - self.pos);
            out.extend_from_slice(&self.window[self.pos..self.pos + take]);
            self.pos += take;
        }
        Ok(out)
    }

    pub async fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        let mut filled = 0;
        while filled < N {
            if self.pos == self.window.len() {
                self.refill().await?;
            }
            let take = (N - filled).min(self.window.len() - self.pos);
            out[filled..filled + take].copy_from_slice(&self.window[self.pos..self.pos + take]);
            self.pos += take;
            filled += take;
        }
        Ok(out)
    }
}

/// Writing side: frame a fully serialized block payload, splitting the
/// raw bytes at `block_size` so no frame decompresses past it.
pub async fn write_frames<W: AsyncWrite + Unpin>(
    w: &mut BufferedWriter<W>,
    method: CompressionMethod,
    payload: &[u8],
    block_size: usize,
) -> Result<()> {
    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![payload]
    } else {
        payload.chunks(block_size.max(1)).collect()
    };
    for chunk in chunks {
        let body = match method {
            CompressionMethod::Lz4 => lz4_flex::block::compress(chunk),
            CompressionMethod::Zstd => zstd::bulk::compress(chunk, ZSTD_LEVEL)?,
        };
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
        frame.push(method.method_byte());
        frame.extend_from_slice(&((body.len() + FRAME_HEADER_SIZE) as u32).to_le_bytes());
        frame.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);

        w.write_u128(checksum(&frame)).await?;
        w.write_bytes(&frame).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn frame(method: CompressionMethod, payload: &[u8], block_size: usize) -> Vec<u8> {
        let mut w = BufferedWriter::new(Vec::new());
        write_frames(&mut w, method, payload, block_size)
            .await
            .unwrap();
        w.flush().await.unwrap();
        w.into_inner()
    }

    async fn unframe(wire: &[u8], n: usize) -> Result<Vec<u8>> {
        let mut reader = BufferedReader::new(wire);
        let mut input = CompressedInput::new(&mut reader);
        input.read_bytes(n).await
    }

    #[tokio::test]
    async fn lz4_roundtrip() {
        let payload = b"repeated payload repeated payload repeated payload".to_vec();
        let wire = frame(CompressionMethod::Lz4, &payload, 1 << 20).await;
        assert_eq!(wire[16], METHOD_LZ4);
        assert_eq!(unframe(&wire, payload.len()).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn zstd_roundtrip() {
        let payload = vec![42u8; 10_000];
        let wire = frame(CompressionMethod::Zstd, &payload, 1 << 20).await;
        assert_eq!(wire[16], METHOD_ZSTD);
        assert_eq!(unframe(&wire, payload.len()).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn multi_frame_payload() {
        // A small block size forces several frames; the reader must
        // stitch the windows back together.
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let wire = frame(CompressionMethod::Lz4, &payload, 4096).await;
        assert_eq!(unframe(&wire, payload.len()).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn corrupted_frame_fails_checksum() {
        let payload = b"some payload bytes".to_vec();
        let mut wire = frame(CompressionMethod::Lz4, &payload, 1 << 20).await;
        let last = wire.len() - 1;
        wire[last] ^= 0xff;
        let err = unframe(&wire, payload.len()).await.unwrap_err();
        assert!(matches!(err, Error::Checksum { .. }));
    }

    #[tokio::test]
    async fn uncompressed_method_byte_accepted() {
        // Servers may answer with method None even when compression is on.
        let payload = b"plain body".to_vec();
        let mut frame = Vec::new();
        frame.push(METHOD_NONE);
        frame.extend_from_slice(&((payload.len() + FRAME_HEADER_SIZE) as u32).to_le_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        let mut wire = checksum(&frame).to_le_bytes().to_vec();
        wire.extend_from_slice(&frame);
        assert_eq!(unframe(&wire, payload.len()).await.unwrap(), payload);
    }
}
