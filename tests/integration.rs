//! End-to-end scenarios against the in-process fake server, plus
//! `#[ignore]`-tagged cases for a real server on localhost:9000.

mod common;

use std::time::Duration;

use chdriver::{
    ConnectOptions, Connection, Cursor, DictCursor, Error, Pool, PoolOptions, Value,
};
use common::FakeServer;

fn options(server: &FakeServer) -> ConnectOptions {
    ConnectOptions::new(server.addr.ip().to_string())
        .port(server.addr.port())
        .send_receive_timeout(Duration::from_secs(5))
        .connect_timeout(Duration::from_secs(5))
}

async fn connect(server: &FakeServer) -> Connection {
    let mut conn = Connection::new(options(server));
    conn.open().await.unwrap();
    conn
}

#[tokio::test]
async fn open_is_idempotent() {
    let server = FakeServer::spawn().await;
    let mut conn = connect(&server).await;
    assert!(conn.opened());
    conn.open().await.unwrap();
    assert!(conn.opened());
    let info = conn.server_info().unwrap().clone();
    assert_eq!(info.name, "ClickHouse");
    assert_eq!(info.timezone.as_deref(), Some("UTC"));

    conn.close().await.unwrap();
    assert!(conn.closed());
    conn.close().await.unwrap();
    assert!(matches!(conn.open().await.unwrap_err(), Error::Closed));
}

#[tokio::test]
async fn ping_pong() {
    let server = FakeServer::spawn().await;
    let mut conn = connect(&server).await;
    assert!(conn.ping().await);
    assert!(conn.ping().await);
    conn.close().await.unwrap();
    assert!(!conn.ping().await);
}

#[tokio::test]
async fn select_one_fetchone() {
    let server = FakeServer::spawn().await;
    let mut conn = connect(&server).await;
    let mut cursor = Cursor::new(&mut conn);
    cursor.execute("SELECT 1", None).await.unwrap();
    assert_eq!(cursor.description(), &[("1".to_string(), "UInt8".to_string())]);
    assert_eq!(cursor.rowcount(), 1);
    assert_eq!(cursor.fetchone().await.unwrap(), Some(vec![Value::UInt8(1)]));
    assert_eq!(cursor.fetchone().await.unwrap(), None);
}

#[tokio::test]
async fn select_one_dict_cursor() {
    let server = FakeServer::spawn().await;
    let mut conn = connect(&server).await;
    let mut cursor = DictCursor::new(&mut conn);
    cursor.execute("SELECT 1", None).await.unwrap();
    let rows = cursor.fetchall().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].len(), 1);
    assert_eq!(rows[0]["1"], Value::UInt8(1));
}

#[tokio::test]
async fn zero_row_result_terminates() {
    let server = FakeServer::spawn().await;
    let mut conn = connect(&server).await;
    let mut cursor = Cursor::new(&mut conn);
    cursor.execute("SELECT nothing", None).await.unwrap();
    assert_eq!(cursor.rowcount(), 0);

    // Iteration over an empty result must stop immediately.
    let mut steps = 0;
    while let Some(_row) = cursor.fetchone().await.unwrap() {
        steps += 1;
        assert!(steps < 2, "iteration over empty result did not halt");
    }
    assert_eq!(steps, 0);
}

#[tokio::test]
async fn bulk_insert_reports_written_rows() {
    let server = FakeServer::spawn().await;
    let mut conn = connect(&server).await;
    let rows: Vec<Vec<Value>> = (0..500)
        .map(|i| vec![Value::UInt64(i), Value::String(format!("row-{i}"))])
        .collect();
    let result = conn
        .execute("INSERT INTO t (id, name) VALUES", Some(rows))
        .await
        .unwrap();
    assert_eq!(result.rowcount, 500);
    assert_eq!(
        result.columns,
        vec![
            ("id".to_string(), "UInt64".to_string()),
            ("name".to_string(), "String".to_string())
        ]
    );
    // The connection is immediately reusable.
    let again = conn.execute("SELECT 1", None).await.unwrap();
    assert_eq!(again.rows, vec![vec![Value::UInt8(1)]]);
}

#[tokio::test]
async fn insert_rejects_ragged_rows() {
    let server = FakeServer::spawn().await;
    let mut conn = connect(&server).await;
    let rows = vec![vec![Value::UInt64(1)]]; // schema has two columns
    let err = conn
        .execute("INSERT INTO t (id, name) VALUES", Some(rows))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    // The insert died mid-conversation; the connection is unusable.
    assert!(conn.closed());
}

#[tokio::test]
async fn streaming_blocks() {
    let server = FakeServer::spawn().await;
    let mut conn = connect(&server).await;
    let mut stream = conn.execute_iter("SELECT 1").await.unwrap();
    let block = stream.next_block().await.unwrap().unwrap();
    assert_eq!(block.n_rows(), 1);
    assert_eq!(block.columns[0].data, vec![Value::UInt8(1)]);
    assert!(stream.next_block().await.unwrap().is_none());
    // Terminated stream reports None forever, and the connection is free.
    assert!(stream.next_block().await.unwrap().is_none());
    drop(stream);
    assert!(!conn.busy());
    conn.execute("SELECT 1", None).await.unwrap();
}

#[tokio::test]
async fn dropped_stream_leaves_connection_busy_until_cancel() {
    let server = FakeServer::spawn().await;
    let mut conn = connect(&server).await;
    {
        let stream = conn.execute_iter("SELECT 1").await.unwrap();
        drop(stream);
    }
    assert!(conn.busy());
    assert!(matches!(
        conn.execute("SELECT 1", None).await.unwrap_err(),
        Error::Busy
    ));

    // Cancel drains the abandoned stream and frees the connection.
    conn.cancel().await.unwrap();
    assert!(!conn.busy());
    conn.execute("SELECT 1", None).await.unwrap();
}

#[tokio::test]
async fn server_exception_keeps_connection_usable() {
    let server = FakeServer::spawn().await;
    let mut conn = connect(&server).await;
    let err = conn.execute("SELECT error", None).await.unwrap_err();
    match err {
        Error::Server(exc) => {
            assert_eq!(exc.code, 60);
            assert_eq!(exc.name, "DB::Exception");
        }
        other => panic!("expected a server exception, got {other:?}"),
    }
    assert!(!conn.closed());
    let result = conn.execute("SELECT 1", None).await.unwrap();
    assert_eq!(result.rows, vec![vec![Value::UInt8(1)]]);
}

#[tokio::test]
async fn progress_accumulates_and_resets() {
    let server = FakeServer::spawn().await;
    let mut conn = connect(&server).await;
    conn.execute("SELECT 1", None).await.unwrap();
    assert_eq!(conn.last_query().progress.rows, 1);
    conn.reset_state();
    assert_eq!(conn.last_query().progress.rows, 0);
}

#[tokio::test]
async fn mid_query_socket_close_poisons_connection() {
    let server = FakeServer::spawn().await;
    let mut conn = connect(&server).await;
    let err = conn.execute("SELECT close", None).await.unwrap_err();
    assert!(err.is_fatal(), "expected a fatal error, got {err:?}");
    assert!(conn.closed());
}

#[tokio::test]
async fn pool_startup_and_shutdown() {
    let server = FakeServer::spawn().await;
    let pool = Pool::new(options(&server), PoolOptions::default().minsize(2).maxsize(4)).unwrap();
    pool.startup().await.unwrap();
    assert_eq!(pool.size().await, 2);
    assert_eq!(pool.freesize().await, 2);

    pool.shutdown().await;
    pool.shutdown().await; // idempotent
    assert_eq!(pool.size().await, 0);
    assert!(matches!(pool.acquire().await.unwrap_err(), Error::PoolClosed));
}

#[tokio::test]
async fn pool_roundtrip_through_guard() {
    let server = FakeServer::spawn().await;
    let pool = Pool::new(options(&server), PoolOptions::default().minsize(1).maxsize(2)).unwrap();
    pool.startup().await.unwrap();

    {
        let mut conn = pool.acquire().await.unwrap();
        let result = conn.execute("SELECT 1", None).await.unwrap();
        assert_eq!(result.rows.len(), 1);
    }
    // Give the spawned release a beat to land.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.freesize().await, 1);
    assert_eq!(pool.size().await, 1);
}

#[tokio::test]
async fn pool_blocks_third_acquirer_and_wakes_it_fifo() {
    let server = FakeServer::spawn().await;
    let pool = Pool::new(options(&server), PoolOptions::default().minsize(1).maxsize(2)).unwrap();
    pool.startup().await.unwrap();

    let first = pool.acquire().await.unwrap();
    let _second = pool.acquire().await.unwrap();
    assert_eq!(pool.size().await, 2);

    let waiter_pool = pool.clone();
    let waiter = tokio::spawn(async move {
        let conn = waiter_pool.acquire().await.unwrap();
        conn.opened()
    });

    // The third acquire must be parked while both slots are taken.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!waiter.is_finished());

    first.release().await;
    let woke = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter was not woken by the release")
        .unwrap();
    assert!(woke);
}

#[tokio::test]
async fn pool_discards_poisoned_connection_on_release() {
    let server = FakeServer::spawn().await;
    let pool = Pool::new(options(&server), PoolOptions::default().minsize(1).maxsize(2)).unwrap();
    pool.startup().await.unwrap();
    assert_eq!(pool.size().await, 1);

    {
        let mut conn = pool.acquire().await.unwrap();
        let err = conn.execute("SELECT close", None).await.unwrap_err();
        assert!(err.is_fatal());
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    // The dead connection was discarded, shrinking the pool.
    assert_eq!(pool.size().await, 0);

    // The pool recovers by dialing a fresh connection.
    let mut conn = pool.acquire().await.unwrap();
    conn.execute("SELECT 1", None).await.unwrap();
}

#[tokio::test]
async fn receive_timeout_poisons_connection() {
    let server = FakeServer::spawn().await;
    let mut opts = options(&server);
    opts.send_receive_timeout = Duration::from_millis(200);
    let mut conn = Connection::new(opts);
    conn.open().await.unwrap();

    let err = conn.execute("SELECT slow", None).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(conn.closed());
}

/// Literal end-to-end scenario against a real server. Run with
/// `cargo test --test integration -- --ignored` when one listens on
/// localhost:9000.
#[tokio::test]
#[ignore = "requires a ClickHouse server on localhost:9000"]
async fn all_types_against_real_server() {
    use chrono::NaiveDate;
    use chrono::TimeZone;
    use std::net::{Ipv4Addr, Ipv6Addr};

    let mut conn = Connection::from_dsn("clickhouse://default@localhost:9000/default").unwrap();
    conn.open().await.unwrap();

    conn.execute("DROP TABLE IF EXISTS chdriver_all_types", None)
        .await
        .unwrap();
    conn.execute(
        "CREATE TABLE chdriver_all_types (\
             id UInt64, dec Decimal(9, 0), d Date, dt DateTime('UTC'), \
             f Float64, u UUID, s String, v4 IPv4, v6 IPv6\
         ) ENGINE = Memory",
        None,
    )
    .await
    .unwrap();

    let row = vec![
        Value::UInt64(1),
        Value::Decimal {
            mantissa: 1,
            scale: 0,
        },
        Value::Date(NaiveDate::from_ymd_opt(2020, 8, 8).unwrap()),
        Value::DateTime(
            chrono_tz::Tz::UTC
                .with_ymd_and_hms(2020, 8, 8, 0, 0, 0)
                .unwrap(),
        ),
        Value::Float64(1.0),
        Value::Uuid("59e182c4-545d-4f30-8b32-cefea2d0d5ba".parse().unwrap()),
        Value::String("1".into()),
        Value::Ipv4(Ipv4Addr::new(0, 0, 0, 0)),
        Value::Ipv6(Ipv6Addr::UNSPECIFIED),
    ];
    let result = conn
        .execute(
            "INSERT INTO chdriver_all_types VALUES",
            Some(vec![row.clone()]),
        )
        .await
        .unwrap();
    assert_eq!(result.rowcount, 1);

    let mut cursor = Cursor::new(&mut conn);
    cursor
        .execute("SELECT * FROM chdriver_all_types ORDER BY id", None)
        .await
        .unwrap();
    let fetched = cursor.fetchone().await.unwrap().unwrap();
    assert_eq!(fetched, row);
    assert_eq!(cursor.fetchone().await.unwrap(), None);
}
