//! A single-socket connection state machine.
//!
//! One query runs start-to-finish before the next; `busy` guards against
//! interleaving. Wire-level failures (I/O, checksum, protocol, timeout)
//! poison the connection; server exceptions leave it usable.

use std::time::{Duration, Instant};

use tokio::io::{ReadHalf, WriteHalf};
use tracing::{debug, warn};
use uuid::Uuid;

use super::stream::ClickStream;
use super::{
    unexpected_packet, ConnectOptions, ConnectionStatus, Packet, QueryInfo, QueryOptions,
    QueryResult,
};
use crate::error::{Error, Result, ServerException};
use crate::protocol::block::{Block, ColumnCtx};
use crate::protocol::client_info::{ClientInfo, ServerInfo};
use crate::protocol::io::{BufferedReader, BufferedWriter, InputStream};
use crate::protocol::progress::{BlockStreamProfileInfo, Progress};
use crate::protocol::settings::write_settings;
use crate::protocol::*;
use crate::value::Value;

type Reader = BufferedReader<ReadHalf<ClickStream>>;
type Writer = BufferedWriter<WriteHalf<ClickStream>>;

pub struct Connection {
    opts: ConnectOptions,
    reader: Option<Reader>,
    writer: Option<Writer>,
    server_info: Option<ServerInfo>,
    ctx: ColumnCtx,
    last_query: QueryInfo,
    opened: bool,
    closed: bool,
    busy: bool,
}

impl Connection {
    pub fn new(opts: ConnectOptions) -> Self {
        Self {
            opts,
            reader: None,
            writer: None,
            server_info: None,
            ctx: ColumnCtx::new(None),
            last_query: QueryInfo::default(),
            opened: false,
            closed: false,
            busy: false,
        }
    }

    pub fn from_dsn(dsn: &str) -> Result<Self> {
        Ok(Self::new(ConnectOptions::from_dsn(dsn)?))
    }

    pub fn opened(&self) -> bool {
        self.opened
    }

    pub fn closed(&self) -> bool {
        self.closed
    }

    pub fn busy(&self) -> bool {
        self.busy
    }

    pub fn status(&self) -> ConnectionStatus {
        if self.closed {
            ConnectionStatus::Closed
        } else if self.opened {
            ConnectionStatus::Opened
        } else {
            ConnectionStatus::Created
        }
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.opts
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Progress, profile info, totals and extremes of the last query.
    pub fn last_query(&self) -> &QueryInfo {
        &self.last_query
    }

    fn revision(&self) -> u64 {
        self.server_info
            .as_ref()
            .map(|s| s.revision)
            .unwrap_or(CLIENT_REVISION)
    }

    #[cfg(feature = "compression")]
    fn negotiated_compression(&self) -> Option<compress::CompressionMethod> {
        self.opts.compression.method()
    }

    #[cfg(not(feature = "compression"))]
    fn negotiated_compression(&self) -> Option<std::convert::Infallible> {
        None
    }

    /// Open the socket and perform the handshake. A second call on an
    /// already-open connection is a no-op.
    pub async fn open(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        if self.opened {
            return Ok(());
        }
        #[cfg(not(feature = "compression"))]
        if self.opts.compression != super::Compression::None {
            return Err(Error::InvalidArgument(
                "compression support is not compiled in".into(),
            ));
        }

        let mut hosts = vec![(self.opts.host.clone(), self.opts.port)];
        hosts.extend(self.opts.alt_hosts.iter().cloned());

        let connect_timeout = self.opts.connect_timeout;
        let mut last_err = None;
        for (host, port) in hosts {
            debug!(%host, port, database = %self.opts.database, "connecting");
            match tokio::time::timeout(connect_timeout, self.connect_host(&host, port)).await {
                Ok(Ok(())) => {
                    self.opened = true;
                    return Ok(());
                }
                Ok(Err(e)) => {
                    self.reader = None;
                    self.writer = None;
                    last_err = Some(e);
                }
                Err(_) => {
                    self.reader = None;
                    self.writer = None;
                    last_err = Some(Error::Timeout(format!("connect to {host}:{port}")));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Connection("no hosts configured".into())))
    }

    async fn connect_host(&mut self, host: &str, port: u16) -> Result<()> {
        let stream = ClickStream::connect(host, port, self.opts.secure, self.opts.verify).await?;
        let (r, w) = tokio::io::split(stream);
        self.reader = Some(BufferedReader::new(r));
        self.writer = Some(BufferedWriter::new(w));
        self.send_hello().await?;
        self.receive_hello().await
    }

    async fn send_hello(&mut self) -> Result<()> {
        let client_name = format!("{} {}", DBMS_NAME, self.opts.client_name);
        let w = self.writer.as_mut().ok_or(Error::Closed)?;
        w.write_varint(ClientPacket::Hello.code()).await?;
        w.write_str(&client_name).await?;
        w.write_varint(CLIENT_VERSION_MAJOR).await?;
        w.write_varint(CLIENT_VERSION_MINOR).await?;
        w.write_varint(CLIENT_REVISION).await?;
        w.write_str(&self.opts.database).await?;
        w.write_str(&self.opts.user).await?;
        w.write_str(&self.opts.password).await?;
        w.flush().await
    }

    async fn receive_hello(&mut self) -> Result<()> {
        let reader = self.reader.as_mut().ok_or(Error::Closed)?;
        let mut input = InputStream::plain(reader);

        let code = input.read_varint().await?;
        match ServerPacket::from_code(code) {
            Some(ServerPacket::Hello) => {
                let name = input.read_str().await?;
                let version_major = input.read_varint().await?;
                let version_minor = input.read_varint().await?;
                let server_revision = input.read_varint().await?;
                let timezone = if server_revision >= DBMS_MIN_REVISION_WITH_SERVER_TIMEZONE {
                    Some(input.read_str().await?)
                } else {
                    None
                };
                let display_name = if server_revision >= DBMS_MIN_REVISION_WITH_SERVER_DISPLAY_NAME
                {
                    input.read_str().await?
                } else {
                    String::new()
                };
                let version_patch = if server_revision >= DBMS_MIN_REVISION_WITH_VERSION_PATCH {
                    input.read_varint().await?
                } else {
                    server_revision
                };

                debug!(
                    server = %name,
                    version = %format!("{version_major}.{version_minor}.{version_patch}"),
                    revision = server_revision,
                    "connected"
                );
                self.server_info = Some(ServerInfo {
                    name,
                    version_major,
                    version_minor,
                    version_patch,
                    revision: server_revision.min(CLIENT_REVISION),
                    timezone: timezone.clone(),
                    display_name,
                });
                self.ctx = ColumnCtx::new(timezone);
                Ok(())
            }
            Some(ServerPacket::Exception) => {
                let exc = read_exception(&mut input).await?;
                Err(Error::Server(exc))
            }
            _ => Err(Error::Connection(format!(
                "unexpected packet {code} instead of Hello"
            ))),
        }
    }

    /// Best-effort close; idempotent. No operation is legal afterwards.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush().await;
        }
        self.mark_unusable();
        Ok(())
    }

    fn mark_unusable(&mut self) {
        self.closed = true;
        self.busy = false;
        self.reader = None;
        self.writer = None;
    }

    /// Clear transient per-query context so a pooled checkout does not
    /// observe the previous user's progress or profile state.
    pub fn reset_state(&mut self) {
        self.last_query = QueryInfo::default();
    }

    /// Ping/Pong liveness probe under the sync-request deadline. Returns
    /// false instead of raising on timeout; wire errors poison the
    /// connection.
    pub async fn ping(&mut self) -> bool {
        let timeout = self.opts.sync_request_timeout;
        self.ping_timeout(timeout).await
    }

    pub async fn ping_timeout(&mut self, timeout: Duration) -> bool {
        if self.closed || !self.opened || self.busy {
            return false;
        }
        match tokio::time::timeout(timeout, self.ping_inner()).await {
            Ok(Ok(alive)) => alive,
            Ok(Err(e)) => {
                if e.is_fatal() {
                    self.mark_unusable();
                }
                false
            }
            Err(_) => {
                // Expired deadlines leave the stream in an unknown state.
                self.mark_unusable();
                false
            }
        }
    }

    async fn ping_inner(&mut self) -> Result<bool> {
        let w = self.writer.as_mut().ok_or(Error::Closed)?;
        w.write_varint(ClientPacket::Ping.code()).await?;
        w.flush().await?;

        let revision = self.revision();
        let reader = self.reader.as_mut().ok_or(Error::Closed)?;
        let mut input = InputStream::plain(reader);
        loop {
            let code = input.read_varint().await?;
            match ServerPacket::from_code(code) {
                Some(ServerPacket::Pong) => return Ok(true),
                Some(ServerPacket::Progress) => {
                    let _ = Progress::read(&mut input, revision).await?;
                }
                other => {
                    let name = other.map(|p| p.name()).unwrap_or("unknown");
                    return Err(unexpected_packet(name, "Pong"));
                }
            }
        }
    }

    /// Run a statement. With `args` the statement is a bulk INSERT and
    /// each element is one row matching the target schema; the returned
    /// rowcount is the number of rows written. Without `args`, all data
    /// blocks are buffered into the result.
    pub async fn execute(
        &mut self,
        sql: &str,
        args: Option<Vec<Vec<Value>>>,
    ) -> Result<QueryResult> {
        self.execute_with(sql, args, &QueryOptions::default()).await
    }

    pub async fn execute_with(
        &mut self,
        sql: &str,
        args: Option<Vec<Vec<Value>>>,
        options: &QueryOptions,
    ) -> Result<QueryResult> {
        self.ensure_ready().await?;
        self.busy = true;
        self.reset_state();
        let started = Instant::now();

        let result = match args {
            Some(rows) => self.run_insert(sql, rows, options).await,
            None => self.run_query(sql, options).await,
        };
        self.last_query.elapsed = started.elapsed();

        match result {
            Ok(result) => {
                self.busy = false;
                Ok(result)
            }
            Err(e) => {
                match e {
                    // The exception is the final packet of the query; the
                    // stream is clean and the connection stays usable.
                    Error::Server(_) => self.busy = false,
                    // Anything else leaves the wire mid-conversation.
                    _ => self.mark_unusable(),
                }
                Err(e)
            }
        }
    }

    /// Start a streaming SELECT; blocks are pulled lazily through the
    /// returned stream. Dropping the stream mid-query leaves the
    /// connection busy until `cancel` runs or the pool discards it.
    pub async fn execute_iter(&mut self, sql: &str) -> Result<BlockStream<'_>> {
        self.execute_iter_with(sql, &QueryOptions::default()).await
    }

    pub async fn execute_iter_with(
        &mut self,
        sql: &str,
        options: &QueryOptions,
    ) -> Result<BlockStream<'_>> {
        self.ensure_ready().await?;
        self.busy = true;
        self.reset_state();
        if let Err(e) = self.start_query(sql, options).await {
            match e {
                Error::Server(_) => self.busy = false,
                _ => self.mark_unusable(),
            }
            return Err(e);
        }
        Ok(BlockStream {
            conn: self,
            done: false,
            columns: Vec::new(),
        })
    }

    /// Abort the in-flight query and drain the stream. Idempotent: with
    /// no query in flight this is a no-op.
    pub async fn cancel(&mut self) -> Result<()> {
        if self.closed || !self.busy {
            return Ok(());
        }
        let send = async {
            let w = self.writer.as_mut().ok_or(Error::Closed)?;
            w.write_varint(ClientPacket::Cancel.code()).await?;
            w.flush().await
        };
        if let Err(e) = send.await {
            self.mark_unusable();
            return Err(e);
        }
        loop {
            match self.recv().await {
                Ok(Packet::EndOfStream) | Ok(Packet::Exception(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    self.mark_unusable();
                    return Err(e);
                }
            }
        }
        self.busy = false;
        Ok(())
    }

    async fn ensure_ready(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        if self.busy {
            return Err(Error::Busy);
        }
        if !self.opened {
            self.open().await?;
        }
        Ok(())
    }

    async fn start_query(&mut self, sql: &str, options: &QueryOptions) -> Result<()> {
        let timeout = self.opts.send_receive_timeout;
        match tokio::time::timeout(timeout, self.start_query_inner(sql, options)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout("send query".into())),
        }
    }

    async fn start_query_inner(&mut self, sql: &str, options: &QueryOptions) -> Result<()> {
        self.send_query(sql, options).await?;
        for table in &options.external_tables {
            self.send_data(&table.block, &table.name).await?;
        }
        // "No more external tables" / data-phase terminator.
        self.send_data(&Block::empty(), "").await?;
        self.flush().await
    }

    async fn send_query(&mut self, sql: &str, options: &QueryOptions) -> Result<()> {
        let revision = self.revision();
        let query_id = options
            .query_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let compression_flag = if self.negotiated_compression().is_some() {
            COMPRESSION_ENABLED
        } else {
            COMPRESSION_DISABLED
        };
        let client_name = format!("{} {}", DBMS_NAME, self.opts.client_name);

        let mut settings = self.opts.settings.clone();
        settings.extend(options.settings.clone());

        let w = self.writer.as_mut().ok_or(Error::Closed)?;
        w.write_varint(ClientPacket::Query.code()).await?;
        w.write_str(&query_id).await?;
        if revision >= DBMS_MIN_REVISION_WITH_CLIENT_INFO {
            ClientInfo::new(client_name).write(w, revision).await?;
        }
        write_settings(
            w,
            &settings,
            revision >= DBMS_MIN_REVISION_WITH_SETTINGS_SERIALIZED_AS_STRINGS,
            false,
        )
        .await?;
        if revision >= DBMS_MIN_REVISION_WITH_INTERSERVER_SECRET {
            w.write_str("").await?;
        }
        w.write_varint(QueryProcessingStage::Complete as u64).await?;
        w.write_varint(compression_flag).await?;
        w.write_str(sql).await?;
        debug!(%query_id, "query sent");
        Ok(())
    }

    async fn send_data(&mut self, block: &Block, table_name: &str) -> Result<()> {
        let revision = self.revision();
        let compression = self.negotiated_compression();

        let w = self.writer.as_mut().ok_or(Error::Closed)?;
        w.write_varint(ClientPacket::Data.code()).await?;
        if revision >= DBMS_MIN_REVISION_WITH_TEMPORARY_TABLES {
            w.write_str(table_name).await?;
        }

        match compression {
            None => block.write(w, revision).await,
            #[cfg(feature = "compression")]
            Some(method) => {
                let mut payload_writer = BufferedWriter::new(Vec::new());
                block.write(&mut payload_writer, revision).await?;
                payload_writer.flush().await?;
                let payload = payload_writer.into_inner();
                compress::write_frames(w, method, &payload, self.opts.compress_block_size).await
            }
            #[cfg(not(feature = "compression"))]
            Some(_) => unreachable!("compression rejected at open"),
        }
    }

    async fn flush(&mut self) -> Result<()> {
        self.writer.as_mut().ok_or(Error::Closed)?.flush().await
    }

    /// Receive one packet under the send/receive deadline; wire errors
    /// and deadline expiry poison the connection.
    pub(crate) async fn recv(&mut self) -> Result<Packet> {
        let timeout = self.opts.send_receive_timeout;
        match tokio::time::timeout(timeout, self.receive_packet()).await {
            Ok(Ok(packet)) => Ok(packet),
            Ok(Err(e)) => {
                if e.is_fatal() {
                    self.mark_unusable();
                }
                Err(e)
            }
            Err(_) => {
                self.mark_unusable();
                Err(Error::Timeout("receive packet".into()))
            }
        }
    }

    async fn receive_packet(&mut self) -> Result<Packet> {
        let revision = self.revision();

        let reader = self.reader.as_mut().ok_or(Error::Closed)?;
        let mut input = InputStream::plain(reader);
        let code = input.read_varint().await?;
        let packet = ServerPacket::from_code(code)
            .ok_or_else(|| Error::Protocol(format!("unknown packet {code} from server")))?;

        match packet {
            ServerPacket::Data => {
                let block = self.receive_data(true).await?;
                Ok(Packet::Data(block))
            }
            ServerPacket::Totals => {
                let block = self.receive_data(true).await?;
                Ok(Packet::Totals(block))
            }
            ServerPacket::Extremes => {
                let block = self.receive_data(true).await?;
                Ok(Packet::Extremes(block))
            }
            // Log and profile-event blocks are never compressed.
            ServerPacket::Log => {
                let block = self.receive_data(false).await?;
                Ok(Packet::Log(block))
            }
            ServerPacket::ProfileEvents => {
                let block = self.receive_data(false).await?;
                Ok(Packet::ProfileEvents(block))
            }
            ServerPacket::Exception => {
                let exc = read_exception(&mut input).await?;
                Ok(Packet::Exception(exc))
            }
            ServerPacket::Progress => {
                Ok(Packet::Progress(Progress::read(&mut input, revision).await?))
            }
            ServerPacket::ProfileInfo => Ok(Packet::ProfileInfo(
                BlockStreamProfileInfo::read(&mut input).await?,
            )),
            ServerPacket::Pong => Ok(Packet::Pong),
            ServerPacket::EndOfStream => Ok(Packet::EndOfStream),
            ServerPacket::TableColumns => {
                let external_name = input.read_str().await?;
                let description = input.read_str().await?;
                Ok(Packet::TableColumns {
                    external_name,
                    description,
                })
            }
            ServerPacket::PartUuids => {
                // Only meaningful for distributed deduplication; consumed
                // and dropped.
                let count = input.read_varint().await?;
                for _ in 0..count {
                    let _ = input.read_fixed::<16>().await?;
                }
                Ok(Packet::PartUuids)
            }
            ServerPacket::TablesStatusResponse | ServerPacket::ReadTaskRequest => {
                Err(unexpected_packet(packet.name(), "a query response packet"))
            }
            ServerPacket::Hello => Err(unexpected_packet("Hello", "a query response packet")),
        }
    }

    async fn receive_data(&mut self, compressible: bool) -> Result<Block> {
        let revision = self.revision();

        // The per-block table name travels outside the compressed frame.
        if revision >= DBMS_MIN_REVISION_WITH_TEMPORARY_TABLES {
            let reader = self.reader.as_mut().ok_or(Error::Closed)?;
            let mut input = InputStream::plain(reader);
            let _table_name = input.read_str().await?;
        }

        let compressed = compressible && self.negotiated_compression().is_some();
        let reader = self.reader.as_mut().ok_or(Error::Closed)?;
        let ctx = &self.ctx;
        #[cfg(feature = "compression")]
        let mut input = if compressed {
            InputStream::compressed(reader)
        } else {
            InputStream::plain(reader)
        };
        #[cfg(not(feature = "compression"))]
        let mut input = {
            let _ = compressed;
            InputStream::plain(reader)
        };
        Block::read(&mut input, revision, ctx).await
    }

    async fn run_query(&mut self, sql: &str, options: &QueryOptions) -> Result<QueryResult> {
        self.start_query(sql, options).await?;

        let mut result = QueryResult::default();
        loop {
            match self.recv().await? {
                Packet::Data(block) => {
                    if block.n_columns() > 0 && result.columns.is_empty() {
                        result.columns = block.columns_with_types();
                    }
                    if block.n_rows() > 0 {
                        result.rows.extend(block.rows());
                    }
                }
                Packet::Progress(p) => self.last_query.progress.increment(&p),
                Packet::ProfileInfo(info) => self.last_query.profile_info = Some(info),
                Packet::Totals(block) => self.last_query.totals = Some(block),
                Packet::Extremes(block) => self.last_query.extremes = Some(block),
                Packet::Log(block) => debug!(rows = block.n_rows(), "server log"),
                Packet::ProfileEvents(_)
                | Packet::TableColumns { .. }
                | Packet::Pong
                | Packet::PartUuids => {}
                Packet::Exception(exc) => return Err(Error::Server(exc)),
                Packet::EndOfStream => break,
            }
        }
        result.rowcount = if result.columns.is_empty() {
            -1
        } else {
            result.rows.len() as i64
        };
        Ok(result)
    }

    async fn run_insert(
        &mut self,
        sql: &str,
        rows: Vec<Vec<Value>>,
        options: &QueryOptions,
    ) -> Result<QueryResult> {
        self.start_query(sql, options).await?;

        // The server answers with a zero-row block describing the target
        // schema; rows are shipped shaped like it.
        let sample = loop {
            match self.recv().await? {
                Packet::Data(block) => break block,
                Packet::Progress(p) => self.last_query.progress.increment(&p),
                Packet::Log(block) => debug!(rows = block.n_rows(), "server log"),
                Packet::TableColumns { .. }
                | Packet::ProfileEvents(_)
                | Packet::ProfileInfo(_)
                | Packet::Pong
                | Packet::PartUuids => {}
                Packet::Exception(exc) => return Err(Error::Server(exc)),
                Packet::EndOfStream => {
                    return Err(Error::Protocol(
                        "stream ended before the server accepted insert data".into(),
                    ))
                }
                other => {
                    return Err(unexpected_packet(&format!("{other:?}"), "a sample block"))
                }
            }
        };

        let total = rows.len();
        for chunk in rows.chunks(INSERT_BLOCK_SIZE) {
            let block = build_insert_block(&sample, chunk)?;
            self.send_data(&block, "").await?;
            self.flush().await?;
        }
        self.send_data(&Block::empty(), "").await?;
        self.flush().await?;

        loop {
            match self.recv().await? {
                Packet::EndOfStream => break,
                Packet::Progress(p) => self.last_query.progress.increment(&p),
                Packet::ProfileInfo(info) => self.last_query.profile_info = Some(info),
                Packet::Log(block) => debug!(rows = block.n_rows(), "server log"),
                Packet::Exception(exc) => return Err(Error::Server(exc)),
                _ => {}
            }
        }

        Ok(QueryResult {
            columns: sample.columns_with_types(),
            rows: Vec::new(),
            rowcount: total as i64,
        })
    }
}

/// Shape caller rows into a block matching the server's sample schema.
fn build_insert_block(sample: &Block, rows: &[Vec<Value>]) -> Result<Block> {
    let n_columns = sample.n_columns();
    let mut block = Block::new();
    for (i, column) in sample.columns.iter().enumerate() {
        let mut data = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != n_columns {
                return Err(Error::InvalidArgument(format!(
                    "row has {} values, table has {} columns",
                    row.len(),
                    n_columns
                )));
            }
            data.push(row[i].clone());
        }
        block.push_column(column.name.clone(), column.type_name.clone(), data);
    }
    Ok(block)
}

/// Read a (possibly nested) server exception chain.
async fn read_exception<R: tokio::io::AsyncRead + Unpin + Send>(
    input: &mut InputStream<'_, R>,
) -> Result<ServerException> {
    let mut chain = Vec::new();
    loop {
        let code = input.read_i32().await?;
        let name = input.read_str().await?;
        let message = input.read_str().await?;
        let stack_trace = input.read_str().await?;
        let has_nested = input.read_u8().await? != 0;
        chain.push(ServerException {
            code,
            name,
            message,
            stack_trace,
            nested: None,
        });
        if !has_nested {
            break;
        }
    }
    let mut exc = chain.pop().ok_or_else(|| Error::Protocol("empty exception".into()))?;
    while let Some(mut outer) = chain.pop() {
        outer.nested = Some(Box::new(exc));
        exc = outer;
    }
    Ok(exc)
}

/// Lazily pulled blocks of a streaming SELECT.
pub struct BlockStream<'a> {
    conn: &'a mut Connection,
    done: bool,
    columns: Vec<(String, String)>,
}

impl BlockStream<'_> {
    /// Column headers, known after the first (header) block arrives.
    pub fn columns(&self) -> &[(String, String)] {
        &self.columns
    }

    /// Next non-empty data block, or `None` at end of stream. Side
    /// packets are consumed transparently.
    pub async fn next_block(&mut self) -> Result<Option<Block>> {
        if self.done {
            return Ok(None);
        }
        loop {
            match self.conn.recv().await {
                Ok(Packet::Data(block)) => {
                    if block.n_columns() > 0 && self.columns.is_empty() {
                        self.columns = block.columns_with_types();
                    }
                    if block.n_rows() > 0 {
                        return Ok(Some(block));
                    }
                }
                Ok(Packet::Progress(p)) => self.conn.last_query.progress.increment(&p),
                Ok(Packet::ProfileInfo(info)) => self.conn.last_query.profile_info = Some(info),
                Ok(Packet::Totals(block)) => self.conn.last_query.totals = Some(block),
                Ok(Packet::Extremes(block)) => self.conn.last_query.extremes = Some(block),
                Ok(Packet::Log(block)) => debug!(rows = block.n_rows(), "server log"),
                Ok(Packet::ProfileEvents(_))
                | Ok(Packet::TableColumns { .. })
                | Ok(Packet::Pong)
                | Ok(Packet::PartUuids) => {}
                Ok(Packet::Exception(exc)) => {
                    self.done = true;
                    self.conn.busy = false;
                    return Err(Error::Server(exc));
                }
                Ok(Packet::EndOfStream) => {
                    self.done = true;
                    self.conn.busy = false;
                    return Ok(None);
                }
                Err(e) => {
                    self.done = true;
                    return Err(e);
                }
            }
        }
    }

    /// Cancel the query and drain the stream.
    pub async fn cancel(&mut self) -> Result<()> {
        if !self.done {
            self.conn.cancel().await?;
            self.done = true;
        }
        Ok(())
    }
}

impl Drop for BlockStream<'_> {
    fn drop(&mut self) {
        if !self.done && !self.conn.closed {
            // The connection still has an in-flight query; it stays busy
            // until cancelled, and a pool will discard it on release.
            warn!("block stream dropped mid-query; connection left busy");
        }
    }
}
