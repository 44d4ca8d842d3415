//! Streaming result set tests against the in-process server.
//!
//! Run: `cargo test --test rows`

mod common;

use common::MockServer;
use pretty_assertions::assert_eq;
use qail_ch::driver::CursorState;
use qail_ch::{ChError, ChResult, ChRow, QueryContext, Row, Value};
use std::time::Duration;

#[derive(Debug, PartialEq)]
struct Event {
    id: u64,
    name: String,
}

impl ChRow for Event {
    fn columns() -> &'static [&'static str] {
        &["id", "name"]
    }

    fn to_values(&self) -> Vec<Value> {
        vec![Value::UInt64(self.id), Value::String(self.name.clone())]
    }

    fn from_row(row: &Row) -> ChResult<Self> {
        Ok(Self {
            id: row.try_get_by_name("id")?,
            name: row.try_get_by_name("name")?,
        })
    }
}

fn seed(server: &MockServer, rows: u64) {
    server.create_table("events", &[("name", "String"), ("id", "UInt64")]);
    let data: Vec<Vec<Value>> = (1..=rows)
        .map(|i| vec![Value::String(format!("e{}", i)), Value::UInt64(i)])
        .collect();
    server.insert_rows("events", &data);
}

#[tokio::test]
async fn test_streams_across_blocks() -> ChResult<()> {
    let server = MockServer::start().await;
    seed(&server, 5);
    let driver = server.driver();

    let mut rows = driver.query("SELECT * FROM events").await?;
    assert_eq!(rows.state(), CursorState::Idle);
    assert_eq!(rows.columns(), ["name", "id"]);
    assert_eq!(rows.column_types()[1].to_string(), "UInt64");

    let mut ids = Vec::new();
    while rows.next().await {
        let (name, id): (String, u64) = rows.scan()?;
        assert_eq!(name, format!("e{}", id));
        ids.push(id);
    }
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert!(rows.err().is_none());
    assert_eq!(rows.state(), CursorState::Exhausted);
    assert!(!rows.next().await);

    // The lease is back before the end of stream is observed.
    assert_eq!(driver.stats().active, 0);
    assert_eq!(driver.stats().idle, 1);
    Ok(())
}

#[tokio::test]
async fn test_mid_stream_exception() -> ChResult<()> {
    let server = MockServer::start().await;
    let driver = server.driver();

    let mut rows = driver.query("SELECT throwIf(x > 2) FROM t").await?;
    let mut seen = 0;
    while rows.next().await {
        seen += 1;
    }
    assert_eq!(seen, 3);
    assert_eq!(rows.state(), CursorState::Errored);
    assert_eq!(rows.err().and_then(ChError::server_code), Some(395));
    assert_eq!(rows.scan::<(u64,)>().unwrap_err().server_code(), Some(395));

    // A server exception leaves the connection usable.
    rows.close().await;
    assert_eq!(driver.stats().idle, 1);
    assert_eq!(driver.stats().total_discarded, 0);
    Ok(())
}

#[tokio::test]
async fn test_early_close_cancels_and_reuses_connection() -> ChResult<()> {
    let server = MockServer::start().await;
    let driver = server.driver();

    let mut rows = driver
        .query("SELECT number FROM numbers(1000000)")
        .await?;
    for expected in 0..5u64 {
        assert!(rows.next().await);
        assert_eq!(rows.scan::<(u64,)>()?.0, expected);
    }
    rows.close().await;
    rows.close().await;
    assert_eq!(rows.state(), CursorState::Closed);
    assert!(!rows.next().await);
    assert!(matches!(rows.current_row(), Err(ChError::SessionClosed)));

    let stats = driver.stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.total_discarded, 0);

    driver.exec("SELECT 1").await?;
    assert_eq!(driver.stats().total_created, 1);
    Ok(())
}

#[tokio::test]
async fn test_dropped_cursor_releases_lease() -> ChResult<()> {
    let server = MockServer::start().await;
    let driver = server.driver_with(server.config().max_connections(1));

    let mut rows = driver
        .query("SELECT number FROM numbers(1000000)")
        .await?;
    assert!(rows.next().await);
    drop(rows);

    // The only slot comes back once the background task has drained.
    let ctx = QueryContext::new().timeout(Duration::from_secs(3));
    driver.ping_with(&ctx).await?;
    Ok(())
}

#[tokio::test]
async fn test_deadline_cancels_running_query() -> ChResult<()> {
    let server = MockServer::start().await;
    let driver = server.driver();

    let ctx = QueryContext::new().timeout(Duration::from_millis(50));
    let mut rows = driver.query_with(&ctx, "SELECT sleep(3)").await?;
    assert!(!rows.next().await);
    assert!(matches!(rows.err(), Some(ChError::DeadlineExceeded)));

    // The server acknowledged the cancel, so the connection was kept.
    rows.close().await;
    assert_eq!(server.cancels(), 1);
    assert_eq!(driver.stats().idle, 1);
    Ok(())
}

#[tokio::test]
async fn test_totals() -> ChResult<()> {
    let server = MockServer::start().await;
    seed(&server, 3);
    let driver = server.driver();

    let mut rows = driver.query("SELECT * FROM events WITH TOTALS").await?;
    let mut count = 0;
    while rows.next().await {
        count += 1;
    }
    assert_eq!(count, 3);
    let totals = rows.totals().expect("totals row");
    assert_eq!(totals.get_u64_by_name("id"), Some(3));

    let mut plain = driver.query("SELECT * FROM events").await?;
    while plain.next().await {}
    assert!(plain.totals().is_none());
    Ok(())
}

#[tokio::test]
async fn test_query_row_and_fetch_all() -> ChResult<()> {
    let server = MockServer::start().await;
    server.create_table("empty", &[("id", "UInt64")]);
    seed(&server, 4);
    let driver = server.driver();

    assert!(matches!(
        driver.query_row("SELECT * FROM empty").await,
        Err(ChError::NoRows)
    ));

    let count = driver.query_row("SELECT count() FROM events").await?;
    assert_eq!(count.get_u64(0), Some(4));

    let first = driver.query_row("SELECT * FROM events").await?;
    assert_eq!(first.get_string_by_name("name").as_deref(), Some("e1"));

    let all = driver.fetch_all("SELECT * FROM events").await?;
    assert_eq!(all.len(), 4);
    assert_eq!(all[3].try_get::<u64>(1)?, 4);

    assert_eq!(
        driver
            .query("SELECT * FROM missing")
            .await
            .unwrap_err()
            .server_code(),
        Some(60)
    );
    assert_eq!(driver.stats().active, 0);
    Ok(())
}

#[tokio::test]
async fn test_select_structs() -> ChResult<()> {
    let server = MockServer::start().await;
    seed(&server, 2);
    let driver = server.driver();

    let events: Vec<Event> = driver.select("SELECT * FROM events").await?;
    assert_eq!(
        events,
        vec![
            Event {
                id: 1,
                name: "e1".to_string()
            },
            Event {
                id: 2,
                name: "e2".to_string()
            },
        ]
    );

    // Structs map by name, so the table's column order does not matter.
    let mut batch = driver.prepare_batch("INSERT INTO events").await?;
    batch.append_struct(&Event {
        id: 9,
        name: "e9".to_string(),
    })?;
    batch.send().await?;
    let row = driver.query_row("SELECT count() FROM events").await?;
    assert_eq!(row.get_u64(0), Some(3));
    Ok(())
}

#[tokio::test]
async fn test_settings_and_parameters_reach_the_server() -> ChResult<()> {
    let server = MockServer::start().await;
    let driver = server.driver_with(server.config().setting("max_threads", "2"));

    let ctx = QueryContext::new()
        .query_id("q-1")
        .setting("max_threads", "8")
        .setting("max_block_size", "1000")
        .parameter("name", "O'Brien")
        .parameter("path", "C:\\tmp");
    let row = driver.query_row_with(&ctx, "SELECT params").await?;
    assert_eq!(row.get_string_by_name("name").as_deref(), Some("O'Brien"));
    assert_eq!(row.get_string_by_name("path").as_deref(), Some("C:\\tmp"));

    let query = server.last_query().expect("query recorded");
    assert_eq!(query.id, "q-1");
    let setting = |name: &str| {
        query
            .settings
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };
    assert_eq!(setting("max_threads").as_deref(), Some("8"));
    assert_eq!(setting("max_block_size").as_deref(), Some("1000"));
    assert_eq!(
        query.settings.iter().filter(|(k, _)| k == "max_threads").count(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_async_insert_settings() -> ChResult<()> {
    let server = MockServer::start().await;
    server.create_table("t", &[("id", "UInt64")]);
    let driver = server.driver();

    driver.async_insert("INSERT INTO t VALUES (1)", true).await?;
    let query = server.last_query().expect("query recorded");
    assert!(
        query
            .settings
            .contains(&("async_insert".to_string(), "1".to_string()))
    );
    assert!(
        query
            .settings
            .contains(&("wait_for_async_insert".to_string(), "1".to_string()))
    );
    assert_eq!(driver.stats().idle, 1);
    Ok(())
}

#[tokio::test]
async fn test_server_version_and_compression() -> ChResult<()> {
    let server = MockServer::start().await;
    seed(&server, 3);
    let driver = server.driver_with(
        server
            .config()
            .compression(qail_ch::Compression::Lz4),
    );

    let hello = driver.server_version().await?;
    assert_eq!(hello.display_name, "mock-clickhouse");
    assert_eq!(hello.version(), "24.8.1");

    let all = driver.fetch_all("SELECT * FROM events").await?;
    assert_eq!(all.len(), 3);

    let mut batch = driver.prepare_batch("INSERT INTO events").await?;
    batch.append(&("e4", 4u64))?;
    batch.send().await?;
    assert_eq!(server.table_rows("events"), 4);
    Ok(())
}

#[tokio::test]
async fn test_dynamic_columns_request_flattened_layout() -> ChResult<()> {
    const FLATTENED: &str = "output_format_native_use_flattened_dynamic_and_json_serialization";
    let server = MockServer::start().await;
    server.create_table("dyn", &[("id", "UInt64"), ("any", "Dynamic")]);
    server.insert_rows(
        "dyn",
        &[
            vec![Value::UInt64(1), Value::Int64(-5)],
            vec![Value::UInt64(2), Value::String("x".into())],
            vec![Value::UInt64(3), Value::Null],
        ],
    );
    let driver = server.driver();

    let rows = driver.fetch_all("SELECT * FROM dyn").await?;
    let values: Vec<Value> = rows
        .iter()
        .map(|r| r.get(1).cloned().unwrap_or(Value::Null))
        .collect();
    assert_eq!(
        values,
        vec![Value::Int64(-5), Value::String("x".into()), Value::Null]
    );

    let query = server.last_query().expect("query recorded");
    assert_eq!(query.hints, vec![(FLATTENED.to_string(), "1".to_string())]);
    assert!(query.settings.iter().all(|(k, _)| k != FLATTENED));

    // An explicit setting replaces the hint and is sent as a regular setting.
    let ctx = QueryContext::new().setting(FLATTENED, "0");
    let err = driver.fetch_all_with(&ctx, "SELECT * FROM dyn").await.unwrap_err();
    assert_eq!(err.server_code(), Some(48));
    let query = server.last_query().expect("query recorded");
    assert!(query.hints.is_empty());
    assert!(query.settings.contains(&(FLATTENED.to_string(), "0".to_string())));
    Ok(())
}
