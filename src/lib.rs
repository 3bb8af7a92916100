//! Asynchronous driver for the ClickHouse native TCP protocol.
//!
//! The crate stacks up from buffered varint I/O, through the columnar
//! codec family and the compressed block framing, to a single-socket
//! [`Connection`] state machine, a bounded FIFO [`Pool`] and DB-API
//! style [`Cursor`]s.
//!
//! ```ignore
//! use chdriver::{Connection, ConnectOptions, Cursor};
//!
//! let mut conn = Connection::from_dsn("clickhouse://localhost/default")?;
//! conn.open().await?;
//! let mut cursor = Cursor::new(&mut conn);
//! cursor.execute("SELECT 1", None).await?;
//! let row = cursor.fetchone().await?;
//! ```

pub mod column;
pub mod driver;
pub mod dsn;
pub mod error;
pub mod protocol;
pub mod types;
pub mod value;

pub use driver::connection::{BlockStream, Connection};
pub use driver::cursor::{Cursor, DictCursor};
pub use driver::pool::{Pool, PoolOptions, PooledConnection};
pub use driver::{
    Compression, ConnectOptions, ConnectionStatus, ExternalTable, PoolStatus, QueryInfo,
    QueryOptions, QueryResult,
};
pub use error::{Error, ErrorCategory, Result, ServerException};
pub use protocol::block::{Block, BlockColumn, BlockInfo};
pub use protocol::client_info::ServerInfo;
pub use protocol::progress::{BlockStreamProfileInfo, Progress};
pub use types::TypeDesc;
pub use value::Value;
