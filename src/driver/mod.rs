//! Driver layer: connection, pool and cursor over the wire protocol.

pub mod connection;
pub mod cursor;
pub mod pool;
pub mod stream;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result, ServerException};
use crate::protocol::block::Block;
use crate::protocol::progress::{BlockStreamProfileInfo, Progress};
use crate::protocol::{CLIENT_NAME, DEFAULT_DATABASE, DEFAULT_PORT};
use crate::value::Value;

/// Requested compression mode for server-to-client and client-to-server
/// block payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Lz4,
    Zstd,
}

impl Compression {
    #[cfg(feature = "compression")]
    pub(crate) fn method(self) -> Option<crate::protocol::compress::CompressionMethod> {
        match self {
            Compression::None => None,
            Compression::Lz4 => Some(crate::protocol::compress::CompressionMethod::Lz4),
            Compression::Zstd => Some(crate::protocol::compress::CompressionMethod::Zstd),
        }
    }
}

/// Connection configuration; also what a DSN parses into.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub client_name: String,
    pub compression: Compression,
    pub secure: bool,
    pub verify: bool,
    pub connect_timeout: Duration,
    pub send_receive_timeout: Duration,
    pub sync_request_timeout: Duration,
    pub compress_block_size: usize,
    /// Failover hosts tried in order after the primary.
    pub alt_hosts: Vec<(String, u16)>,
    /// Session-level settings sent with every query.
    pub settings: HashMap<String, String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            database: DEFAULT_DATABASE.into(),
            user: "default".into(),
            password: String::new(),
            client_name: CLIENT_NAME.into(),
            compression: Compression::None,
            secure: false,
            verify: true,
            connect_timeout: Duration::from_secs(10),
            send_receive_timeout: Duration::from_secs(300),
            sync_request_timeout: Duration::from_secs(5),
            compress_block_size: crate::protocol::DEFAULT_COMPRESS_BLOCK_SIZE,
            alt_hosts: Vec::new(),
            settings: HashMap::new(),
        }
    }
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Parse a `clickhouse://` / `clickhouses://` DSN. When both a DSN
    /// and explicit options are in play, the DSN wins.
    pub fn from_dsn(dsn: &str) -> Result<Self> {
        crate::dsn::parse_dsn(dsn)
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn send_receive_timeout(mut self, timeout: Duration) -> Self {
        self.send_receive_timeout = timeout;
        self
    }

    pub fn sync_request_timeout(mut self, timeout: Duration) -> Self {
        self.sync_request_timeout = timeout;
        self
    }

    pub fn setting(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(name.into(), value.into());
        self
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Created,
    Opened,
    Closed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Created => "created",
            ConnectionStatus::Opened => "opened",
            ConnectionStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Pool lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    Created,
    Opening,
    Opened,
    Closing,
    Closed,
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PoolStatus::Created => "created",
            PoolStatus::Opening => "opening",
            PoolStatus::Opened => "opened",
            PoolStatus::Closing => "closing",
            PoolStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// An auxiliary named table shipped with a query as a Data block.
#[derive(Debug, Clone)]
pub struct ExternalTable {
    pub name: String,
    pub block: Block,
}

/// Per-query overrides.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub query_id: Option<String>,
    pub settings: HashMap<String, String>,
    pub external_tables: Vec<ExternalTable>,
}

/// A fully buffered query result.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// `(name, type)` of each projected column.
    pub columns: Vec<(String, String)>,
    pub rows: Vec<Vec<Value>>,
    /// Fetched rows for reads, written rows for inserts, -1 when unknown.
    pub rowcount: i64,
}

/// Side-channel state accumulated over the last query; cleared by
/// `Connection::reset_state` so pooled checkouts do not leak it.
#[derive(Debug, Clone, Default)]
pub struct QueryInfo {
    pub progress: Progress,
    pub profile_info: Option<BlockStreamProfileInfo>,
    pub totals: Option<Block>,
    pub extremes: Option<Block>,
    pub elapsed: Duration,
}

/// One decoded server packet.
#[derive(Debug)]
pub(crate) enum Packet {
    Data(Block),
    Totals(Block),
    Extremes(Block),
    Log(Block),
    ProfileEvents(Block),
    Progress(Progress),
    ProfileInfo(BlockStreamProfileInfo),
    TableColumns {
        external_name: String,
        description: String,
    },
    Exception(ServerException),
    Pong,
    PartUuids,
    EndOfStream,
}

pub(crate) fn unexpected_packet(got: &str, expected: &str) -> Error {
    Error::Protocol(format!(
        "unexpected packet from server: got {got}, expected {expected}"
    ))
}
