//! Side-channel payloads interleaved with Data blocks.

use tokio::io::AsyncRead;

use super::io::InputStream;
use super::{
    DBMS_MIN_REVISION_WITH_CLIENT_WRITE_INFO, DBMS_MIN_REVISION_WITH_TOTAL_ROWS_IN_PROGRESS,
};
use crate::error::Result;

/// Running totals reported by the server while a query executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub rows: u64,
    pub bytes: u64,
    pub total_rows: u64,
    pub written_rows: u64,
    pub written_bytes: u64,
}

impl Progress {
    pub async fn read<R: AsyncRead + Unpin>(
        input: &mut InputStream<'_, R>,
        revision: u64,
    ) -> Result<Self> {
        let mut progress = Progress {
            rows: input.read_varint().await?,
            bytes: input.read_varint().await?,
            ..Progress::default()
        };
        if revision >= DBMS_MIN_REVISION_WITH_TOTAL_ROWS_IN_PROGRESS {
            progress.total_rows = input.read_varint().await?;
        }
        if revision >= DBMS_MIN_REVISION_WITH_CLIENT_WRITE_INFO {
            progress.written_rows = input.read_varint().await?;
            progress.written_bytes = input.read_varint().await?;
        }
        Ok(progress)
    }

    /// Fold another progress packet into the running totals.
    pub fn increment(&mut self, other: &Progress) {
        self.rows += other.rows;
        self.bytes += other.bytes;
        self.total_rows += other.total_rows;
        self.written_rows += other.written_rows;
        self.written_bytes += other.written_bytes;
    }
}

/// Final stream statistics (ProfileInfo packet).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockStreamProfileInfo {
    pub rows: u64,
    pub blocks: u64,
    pub bytes: u64,
    pub applied_limit: bool,
    pub rows_before_limit: u64,
    pub calculated_rows_before_limit: bool,
}

impl BlockStreamProfileInfo {
    pub async fn read<R: AsyncRead + Unpin>(input: &mut InputStream<'_, R>) -> Result<Self> {
        Ok(Self {
            rows: input.read_varint().await?,
            blocks: input.read_varint().await?,
            bytes: input.read_varint().await?,
            applied_limit: input.read_u8().await? != 0,
            rows_before_limit: input.read_varint().await?,
            calculated_rows_before_limit: input.read_u8().await? != 0,
        })
    }
}
