//! In-process server speaking the native wire format over loopback,
//! built from the crate's own reader/writer primitives. Canned behavior
//! is keyed off the incoming SQL text.

use std::net::SocketAddr;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};

use chdriver::protocol::block::{Block, ColumnCtx};
use chdriver::protocol::io::{BufferedReader, BufferedWriter, InputStream};
use chdriver::protocol::{
    ServerPacket, CLIENT_REVISION, DBMS_MIN_REVISION_WITH_DISTRIBUTED_DEPTH,
    DBMS_MIN_REVISION_WITH_INITIAL_QUERY_START_TIME, DBMS_MIN_REVISION_WITH_INTERSERVER_SECRET,
    DBMS_MIN_REVISION_WITH_OPENTELEMETRY, DBMS_MIN_REVISION_WITH_PARALLEL_REPLICAS,
    DBMS_MIN_REVISION_WITH_QUOTA_KEY_IN_CLIENT_INFO, DBMS_MIN_REVISION_WITH_VERSION_PATCH,
};
use chdriver::{Result, Value};

/// The revision the fake server reports; equal to the client's, so the
/// negotiated revision exercises every gate this driver implements.
pub const REVISION: u64 = CLIENT_REVISION;

type Reader = BufferedReader<ReadHalf<TcpStream>>;
type Writer = BufferedWriter<WriteHalf<TcpStream>>;

pub struct FakeServer {
    pub addr: SocketAddr,
}

impl FakeServer {
    /// Bind a loopback listener and serve connections until the test
    /// runtime shuts down.
    pub async fn spawn() -> FakeServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let _ = handle(stream).await;
                });
            }
        });
        FakeServer { addr }
    }
}

async fn handle(stream: TcpStream) -> Result<()> {
    let (r, w) = tokio::io::split(stream);
    let mut reader = BufferedReader::new(r);
    let mut writer = BufferedWriter::new(w);

    read_client_hello(&mut reader).await?;
    write_server_hello(&mut writer).await?;

    loop {
        let code = InputStream::plain(&mut reader).read_varint().await?;
        match code {
            // Ping
            4 => {
                writer.write_varint(ServerPacket::Pong as u64).await?;
                writer.flush().await?;
            }
            // Query
            1 => {
                let sql = read_query(&mut reader).await?;
                read_data_packet(&mut reader).await?; // external-tables terminator
                respond(&mut reader, &mut writer, &sql).await?;
            }
            // Cancel: the canned queries have already run to completion,
            // so there is nothing left to interrupt.
            3 => {}
            _ => break,
        }
    }
    Ok(())
}

async fn read_client_hello(reader: &mut Reader) -> Result<()> {
    let mut input = InputStream::plain(reader);
    let packet = input.read_varint().await?;
    assert_eq!(packet, 0, "expected client Hello");
    let _client_name = input.read_str().await?;
    let _major = input.read_varint().await?;
    let _minor = input.read_varint().await?;
    let revision = input.read_varint().await?;
    assert_eq!(revision, CLIENT_REVISION);
    let _database = input.read_str().await?;
    let _user = input.read_str().await?;
    let _password = input.read_str().await?;
    Ok(())
}

async fn write_server_hello(writer: &mut Writer) -> Result<()> {
    writer.write_varint(ServerPacket::Hello as u64).await?;
    writer.write_str("ClickHouse").await?;
    writer.write_varint(23).await?;
    writer.write_varint(8).await?;
    writer.write_varint(REVISION).await?;
    writer.write_str("UTC").await?;
    writer.write_str("fake").await?;
    writer.write_varint(3).await?;
    writer.flush().await
}

/// Parse a Query packet after its id byte, mirroring what the client
/// serializes field for field, and return the SQL text.
async fn read_query(reader: &mut Reader) -> Result<String> {
    let mut input = InputStream::plain(reader);
    let _query_id = input.read_str().await?;

    // ClientInfo
    let query_kind = input.read_u8().await?;
    if query_kind != 0 {
        let _initial_user = input.read_str().await?;
        let _initial_query_id = input.read_str().await?;
        let _initial_address = input.read_str().await?;
        if REVISION >= DBMS_MIN_REVISION_WITH_INITIAL_QUERY_START_TIME {
            let _ = input.read_u64().await?;
        }
        let _interface = input.read_u8().await?;
        let _os_user = input.read_str().await?;
        let _hostname = input.read_str().await?;
        let _client_name = input.read_str().await?;
        let _ = input.read_varint().await?;
        let _ = input.read_varint().await?;
        let _ = input.read_varint().await?;
        if REVISION >= DBMS_MIN_REVISION_WITH_QUOTA_KEY_IN_CLIENT_INFO {
            let _quota_key = input.read_str().await?;
        }
        if REVISION >= DBMS_MIN_REVISION_WITH_DISTRIBUTED_DEPTH {
            let _ = input.read_varint().await?;
        }
        if REVISION >= DBMS_MIN_REVISION_WITH_VERSION_PATCH {
            let _ = input.read_varint().await?;
        }
        if REVISION >= DBMS_MIN_REVISION_WITH_OPENTELEMETRY {
            let _ = input.read_u8().await?;
        }
        if REVISION >= DBMS_MIN_REVISION_WITH_PARALLEL_REPLICAS {
            let _ = input.read_varint().await?;
            let _ = input.read_varint().await?;
            let _ = input.read_varint().await?;
        }
    }

    // Settings, stringly serialized, empty-name terminated.
    loop {
        let name = input.read_str().await?;
        if name.is_empty() {
            break;
        }
        let _flags = input.read_u8().await?;
        let _value = input.read_str().await?;
    }

    if REVISION >= DBMS_MIN_REVISION_WITH_INTERSERVER_SECRET {
        let _secret = input.read_str().await?;
    }
    let _stage = input.read_varint().await?;
    let _compression = input.read_varint().await?;
    input.read_str().await
}

/// Read one client Data packet (its id has not been consumed yet).
async fn read_data_packet(reader: &mut Reader) -> Result<Block> {
    let mut input = InputStream::plain(reader);
    let packet = input.read_varint().await?;
    assert_eq!(packet, 2, "expected client Data");
    let _table_name = input.read_str().await?;
    let ctx = ColumnCtx::new(None);
    Block::read(&mut input, REVISION, &ctx).await
}

async fn write_data_block(writer: &mut Writer, block: &Block) -> Result<()> {
    writer.write_varint(ServerPacket::Data as u64).await?;
    writer.write_str("").await?;
    block.write(writer, REVISION).await?;
    writer.flush().await
}

async fn write_end_of_stream(writer: &mut Writer) -> Result<()> {
    writer.write_varint(ServerPacket::EndOfStream as u64).await?;
    writer.flush().await
}

async fn write_progress(writer: &mut Writer, rows: u64, bytes: u64) -> Result<()> {
    writer.write_varint(ServerPacket::Progress as u64).await?;
    writer.write_varint(rows).await?;
    writer.write_varint(bytes).await?;
    writer.write_varint(rows).await?; // total_rows
    writer.write_varint(0).await?; // written_rows
    writer.write_varint(0).await?; // written_bytes
    writer.flush().await
}

async fn write_exception(writer: &mut Writer) -> Result<()> {
    writer.write_varint(ServerPacket::Exception as u64).await?;
    writer.write_i32(60).await?;
    writer.write_str("DB::Exception").await?;
    writer.write_str("Table default.missing does not exist").await?;
    writer.write_str("<stack>").await?;
    writer.write_u8(0).await?;
    writer.flush().await
}

fn select_one_header() -> Block {
    let mut block = Block::new();
    block.push_column("1", "UInt8", vec![]);
    block
}

async fn respond(reader: &mut Reader, writer: &mut Writer, sql: &str) -> Result<()> {
    if sql.starts_with("INSERT") {
        // Announce the target schema, collect blocks until the empty
        // terminator, acknowledge with progress.
        let mut sample = Block::new();
        sample.push_column("id", "UInt64", vec![]);
        sample.push_column("name", "String", vec![]);
        write_data_block(writer, &sample).await?;

        loop {
            let block = read_data_packet(reader).await?;
            if block.n_rows() == 0 {
                break;
            }
        }
        write_end_of_stream(writer).await
    } else if sql.contains("error") {
        write_exception(writer).await
    } else if sql.contains("close") {
        // Simulate a server crash mid-query.
        Err(chdriver::Error::Connection("simulated crash".into()))
    } else if sql.contains("nothing") {
        write_data_block(writer, &select_one_header()).await?;
        write_end_of_stream(writer).await
    } else if sql.contains("slow") {
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        write_end_of_stream(writer).await
    } else {
        // Default: behave like `SELECT 1`.
        write_data_block(writer, &select_one_header()).await?;
        write_progress(writer, 1, 1).await?;
        let mut data = select_one_header();
        data.columns[0].data = vec![Value::UInt8(1)];
        write_data_block(writer, &data).await?;
        write_end_of_stream(writer).await
    }
}
