//! Blocks: the unit of query I/O.
//!
//! A block is an ordered set of equally sized named columns. On the wire
//! it is `BlockInfo`, `varint n_columns`, `varint n_rows`, then per
//! column its name, its type descriptor and the column data. The empty
//! block terminates a query's data phase.

use chrono_tz::Tz;
use once_cell::sync::OnceCell;
use tokio::io::{AsyncRead, AsyncWrite};

use super::io::{BufferedWriter, InputStream};
use super::DBMS_MIN_REVISION_WITH_BLOCK_INFO;
use crate::column::{read_column, write_column};
use crate::error::{Error, Result};
use crate::types::TypeDesc;
use crate::value::Value;

/// Block preamble, serialized as field-id/value pairs ending with id 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub is_overflows: bool,
    pub bucket_num: i32,
}

impl Default for BlockInfo {
    fn default() -> Self {
        Self {
            is_overflows: false,
            bucket_num: -1,
        }
    }
}

impl BlockInfo {
    pub async fn read<R: AsyncRead + Unpin>(input: &mut InputStream<'_, R>) -> Result<Self> {
        let mut info = BlockInfo::default();
        loop {
            match input.read_varint().await? {
                0 => break,
                1 => info.is_overflows = input.read_u8().await? != 0,
                2 => info.bucket_num = input.read_i32().await?,
                other => {
                    return Err(Error::Protocol(format!("unknown block info field {other}")))
                }
            }
        }
        Ok(info)
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut BufferedWriter<W>) -> Result<()> {
        w.write_varint(1).await?;
        w.write_u8(self.is_overflows as u8).await?;
        w.write_varint(2).await?;
        w.write_i32(self.bucket_num).await?;
        w.write_varint(0).await
    }
}

/// One named column with its textual type descriptor and values.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockColumn {
    pub name: String,
    pub type_name: String,
    pub data: Vec<Value>,
}

/// Per-connection context the column codecs need: the server timezone,
/// resolved lazily on the first timezone-aware value actually read.
#[derive(Debug, Default)]
pub struct ColumnCtx {
    server_timezone: Option<String>,
    resolved: OnceCell<Tz>,
}

impl ColumnCtx {
    pub fn new(server_timezone: Option<String>) -> Self {
        Self {
            server_timezone,
            resolved: OnceCell::new(),
        }
    }

    /// The server's session timezone, parsed on first use.
    pub fn server_tz(&self) -> Result<Option<Tz>> {
        let Some(name) = &self.server_timezone else {
            return Ok(None);
        };
        let tz = self.resolved.get_or_try_init(|| {
            name.parse::<Tz>()
                .map_err(|_| Error::Protocol(format!("unknown server timezone {name:?}")))
        })?;
        Ok(Some(*tz))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub info: BlockInfo,
    pub columns: Vec<BlockColumn>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    /// The end-of-data sentinel.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map(|c| c.data.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() || self.n_rows() == 0
    }

    pub fn column(&self, name: &str) -> Option<&BlockColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Append a column; within a block all columns must end up the same
    /// length, which `write` enforces.
    pub fn push_column(
        &mut self,
        name: impl Into<String>,
        type_name: impl Into<String>,
        data: Vec<Value>,
    ) {
        self.columns.push(BlockColumn {
            name: name.into(),
            type_name: type_name.into(),
            data,
        });
    }

    /// Materialize row `idx` across all columns.
    pub fn row(&self, idx: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c.data[idx].clone()).collect()
    }

    /// Iterate rows as owned value vectors.
    pub fn rows(&self) -> impl Iterator<Item = Vec<Value>> + '_ {
        (0..self.n_rows()).map(|i| self.row(i))
    }

    /// Column `(name, type)` headers in order.
    pub fn columns_with_types(&self) -> Vec<(String, String)> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.type_name.clone()))
            .collect()
    }

    pub async fn read<R: AsyncRead + Unpin + Send>(
        input: &mut InputStream<'_, R>,
        revision: u64,
        ctx: &ColumnCtx,
    ) -> Result<Block> {
        let info = if revision >= DBMS_MIN_REVISION_WITH_BLOCK_INFO {
            BlockInfo::read(input).await?
        } else {
            BlockInfo::default()
        };

        let n_columns = input.read_varint().await? as usize;
        let n_rows = input.read_varint().await? as usize;

        let mut columns = Vec::with_capacity(n_columns);
        for _ in 0..n_columns {
            let name = input.read_str().await?;
            let type_name = input.read_str().await?;
            let data = if n_rows > 0 {
                let ty = TypeDesc::parse(&type_name)?;
                read_column(input, &ty, n_rows, ctx).await?
            } else {
                Vec::new()
            };
            columns.push(BlockColumn {
                name,
                type_name,
                data,
            });
        }

        Ok(Block { info, columns })
    }

    pub async fn write<W: AsyncWrite + Unpin + Send>(
        &self,
        w: &mut BufferedWriter<W>,
        revision: u64,
    ) -> Result<()> {
        let n_rows = self.n_rows();
        if self.columns.iter().any(|c| c.data.len() != n_rows) {
            return Err(Error::InvalidArgument(
                "all columns in a block must have the same length".into(),
            ));
        }

        if revision >= DBMS_MIN_REVISION_WITH_BLOCK_INFO {
            self.info.write(w).await?;
        }

        w.write_varint(self.n_columns() as u64).await?;
        w.write_varint(n_rows as u64).await?;

        for column in &self.columns {
            w.write_str(&column.name).await?;
            w.write_str(&column.type_name).await?;
            if n_rows > 0 {
                let ty = TypeDesc::parse(&column.type_name)?;
                write_column(w, &ty, &column.data).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::io::BufferedReader;
    use crate::protocol::CLIENT_REVISION;

    async fn roundtrip(block: &Block) -> Block {
        let mut w = BufferedWriter::new(Vec::new());
        block.write(&mut w, CLIENT_REVISION).await.unwrap();
        w.flush().await.unwrap();
        let buf = w.into_inner();

        let mut reader = BufferedReader::new(buf.as_slice());
        let mut input = InputStream::plain(&mut reader);
        let ctx = ColumnCtx::new(None);
        Block::read(&mut input, CLIENT_REVISION, &ctx)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn empty_block_roundtrip() {
        let block = Block::empty();
        let back = roundtrip(&block).await;
        assert_eq!(back, block);
        assert!(back.is_empty());
    }

    #[tokio::test]
    async fn block_roundtrip_keeps_info_and_data() {
        let mut block = Block::new();
        block.info.bucket_num = 7;
        block.info.is_overflows = true;
        block.push_column(
            "id",
            "UInt64",
            vec![Value::UInt64(1), Value::UInt64(2), Value::UInt64(3)],
        );
        block.push_column(
            "name",
            "String",
            vec![
                Value::String("a".into()),
                Value::String("b".into()),
                Value::String("c".into()),
            ],
        );
        let back = roundtrip(&block).await;
        assert_eq!(back, block);
        assert_eq!(back.n_rows(), 3);
        assert_eq!(back.n_columns(), 2);
        assert_eq!(
            back.rows().next().unwrap(),
            vec![Value::UInt64(1), Value::String("a".into())]
        );
    }

    #[tokio::test]
    async fn ragged_block_is_rejected() {
        let mut block = Block::new();
        block.push_column("a", "UInt8", vec![Value::UInt8(1)]);
        block.push_column("b", "UInt8", vec![]);
        let mut w = BufferedWriter::new(Vec::new());
        let err = block.write(&mut w, CLIENT_REVISION).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn server_tz_is_lazy() {
        let ctx = ColumnCtx::new(Some("definitely/not_a_zone".into()));
        // Constructing the context must not touch the timezone database;
        // only an actual lookup surfaces the error.
        assert!(ctx.server_tz().is_err());
        let ok = ColumnCtx::new(Some("Europe/Moscow".into()));
        assert_eq!(ok.server_tz().unwrap(), Some(chrono_tz::Europe::Moscow));
    }
}
