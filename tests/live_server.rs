//! Integration tests for qail-ch against a real ClickHouse server.
//!
//! Start one with `docker run -p 9000:9000 clickhouse/clickhouse-server`.
//! Run: `cargo test --test live_server -- --nocapture --ignored`

use qail_ch::protocol::Compression;
use qail_ch::{ChDriver, ChResult, QueryContext};
use std::time::Duration;

const DSN: &str = "clickhouse://default@localhost:9000/default?dial_timeout=5s";

async fn connect() -> ChResult<ChDriver> {
    ChDriver::connect_url(DSN).await
}

#[tokio::test]
#[ignore = "Requires ClickHouse on localhost:9000 - run with --ignored"]
async fn test_live_handshake() -> ChResult<()> {
    let driver = connect().await?;
    let hello = driver.server_version().await?;
    println!("connected to {} {}", hello.display_name, hello.version());
    driver.ping().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "Requires ClickHouse on localhost:9000 - run with --ignored"]
async fn test_live_batch_round_trip() -> ChResult<()> {
    let driver = ChDriver::builder()
        .host("localhost")
        .compression(Compression::Lz4)
        .connect()
        .await?;
    driver.exec("DROP TABLE IF EXISTS qail_ch_live").await?;
    driver
        .exec(
            "CREATE TABLE qail_ch_live (id UInt64, name LowCardinality(String), \
             tags Array(String), score Nullable(Float64)) ENGINE = Memory",
        )
        .await?;

    let mut batch = driver.prepare_batch("INSERT INTO qail_ch_live").await?;
    for i in 0..10_000u64 {
        let score = (i % 2 == 0).then_some(i as f64 / 10.0);
        batch.append(&(i, if i % 3 == 0 { "a" } else { "b" }, vec!["x", "y"], score))?;
        if i % 4_000 == 3_999 {
            batch.flush().await?;
        }
    }
    batch.send().await?;

    let count = driver.query_row("SELECT count() FROM qail_ch_live").await?;
    assert_eq!(count.get_u64(0), Some(10_000));

    let mut rows = driver
        .query("SELECT id, name, tags, score FROM qail_ch_live ORDER BY id LIMIT 3")
        .await?;
    while rows.next().await {
        let (id, name, tags, score): (u64, String, Vec<String>, Option<f64>) = rows.scan()?;
        println!("{} {} {:?} {:?}", id, name, tags, score);
    }
    assert!(rows.err().is_none());

    driver.exec("DROP TABLE qail_ch_live").await?;
    Ok(())
}

#[tokio::test]
#[ignore = "Requires ClickHouse on localhost:9000 - run with --ignored"]
async fn test_live_mid_stream_exception() -> ChResult<()> {
    let driver = connect().await?;
    let mut rows = driver
        .query("SELECT throwIf(number = 100000, 'boom') FROM system.numbers LIMIT 200000")
        .await?;
    while rows.next().await {}
    assert_eq!(rows.err().and_then(|e| e.server_code()), Some(395));
    Ok(())
}

#[tokio::test]
#[ignore = "Requires ClickHouse on localhost:9000 - run with --ignored"]
async fn test_live_deadline() -> ChResult<()> {
    let driver = connect().await?;
    let ctx = QueryContext::new().timeout(Duration::from_millis(200));
    let mut rows = driver.query_with(&ctx, "SELECT sleep(3)").await?;
    assert!(!rows.next().await);
    assert!(rows.err().is_some_and(|e| e.is_cancellation()));
    rows.close().await;

    driver.ping().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "Requires ClickHouse on localhost:9000 - run with --ignored"]
async fn test_live_parameters() -> ChResult<()> {
    let driver = connect().await?;
    let ctx = QueryContext::new().parameter("who", "O'Brien");
    let row = driver
        .query_row_with(&ctx, "SELECT {who:String} AS who")
        .await?;
    assert_eq!(row.get_string(0).as_deref(), Some("O'Brien"));
    Ok(())
}
