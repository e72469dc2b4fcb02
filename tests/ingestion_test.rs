use mockito::{Matcher, Server};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use streakbot::backfill::{CandleAgent, ConsistencyReport};
use streakbot::db::{CandleStore, MemoryStore};
use streakbot::*;

const H: i64 = 3_600_000;
const CANDLES_PATH: &str = "/api/v2/spot/market/history-candles";

fn current_hour() -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    now - now % H
}

fn row(open_time: i64, close: &str) -> Value {
    json!([open_time.to_string(), "0.0600", "0.0650", "0.0590", close, "500000", "30000", "30000"])
}

fn page(rows: Vec<Value>) -> String {
    json!({"code": "00000", "msg": "success", "requestTime": 0, "data": rows}).to_string()
}

async fn agent(url: String, store: Arc<MemoryStore>) -> CandleAgent<MemoryStore> {
    let client = MarketDataClient::new(url, "DOGEUSDT", Interval::Hour1, Duration::ZERO).unwrap();
    CandleAgent::new(client, store).await.unwrap()
}

#[tokio::test]
async fn test_agent_registers_its_symbol() {
    let server = Server::new_async().await;
    let store = Arc::new(MemoryStore::new());
    agent(server.url(), store.clone()).await;

    assert_eq!(store.list_symbols().await.unwrap(), vec!["DOGEUSDT".to_string()]);
}

#[tokio::test]
async fn test_seed_then_sync_is_idempotent() {
    let mut server = Server::new_async().await;
    let store = Arc::new(MemoryStore::new());
    let agent = agent(server.url(), store.clone()).await;
    let hour = current_hour();

    server
        .mock("GET", CANDLES_PATH)
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("symbol".into(), "DOGEUSDT".into()),
            Matcher::UrlEncoded("granularity".into(), "1h".into()),
        ]))
        .with_status(200)
        .with_body(page(vec![
            row(hour - 3 * H, "0.0610"),
            row(hour - 2 * H, "0.0620"),
            row(hour - H, "0.0630"),
        ]))
        .create_async()
        .await;

    assert_eq!(agent.seed(2, 100).await.unwrap(), 3);
    // A second seed does nothing once data exists
    assert_eq!(agent.seed(2, 100).await.unwrap(), 0);
    // Sync re-reads the same bars; nothing new is inserted
    assert_eq!(agent.sync(100).await.unwrap(), 0);

    let stored = store.load_candles("DOGEUSDT", Interval::Hour1).await.unwrap();
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[0].open_time, hour - 3 * H);
    assert_eq!(stored[2].close, 0.0630);
}

#[tokio::test]
async fn test_sync_refreshes_the_forming_bar() {
    let mut server = Server::new_async().await;
    let store = Arc::new(MemoryStore::new());
    let agent = agent(server.url(), store.clone()).await;
    let hour = current_hour();

    let forming = Candle {
        open_time: hour - H,
        symbol: "DOGEUSDT".to_string(),
        interval_ms: H,
        open: 0.0600,
        high: 0.0615,
        low: 0.0590,
        close: 0.0610,
        base_volume: 1000.0,
        usdt_volume: 61.0,
        quote_volume: 61.0,
    };
    store.save_candles(&[forming]).await.unwrap();

    server
        .mock("GET", CANDLES_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(page(vec![row(hour - H, "0.0645"), row(hour, "0.0650")]))
        .create_async()
        .await;

    assert_eq!(agent.sync(100).await.unwrap(), 1);

    let newest = store
        .newest_candle("DOGEUSDT", Interval::Hour1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(newest.open_time, hour);

    let stored = store.load_candles("DOGEUSDT", Interval::Hour1).await.unwrap();
    assert_eq!(stored[0].close, 0.0645);
}

#[tokio::test]
async fn test_empty_series_fetches_nothing() {
    let mut server = Server::new_async().await;
    let store = Arc::new(MemoryStore::new());
    let agent = agent(server.url(), store.clone()).await;

    let never = server
        .mock("GET", CANDLES_PATH)
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    assert!(agent.fetch_past_candles(1, 0, 100).await.unwrap().is_empty());
    assert!(agent.fetch_future_candles(100).await.unwrap().is_empty());
    assert_eq!(agent.save_to_db(&[]).await.unwrap(), 0);

    never.assert_async().await;
}

#[tokio::test]
async fn test_unavailable_exchange_seeds_nothing() {
    let mut server = Server::new_async().await;
    let store = Arc::new(MemoryStore::new());
    let agent = agent(server.url(), store.clone()).await;

    server
        .mock("GET", CANDLES_PATH)
        .match_query(Matcher::Any)
        .with_status(429)
        .with_body(r#"{"code":"429","msg":"Too Many Requests"}"#)
        .create_async()
        .await;

    assert_eq!(agent.seed(1, 100).await.unwrap(), 0);
    assert!(store
        .newest_candle("DOGEUSDT", Interval::Hour1)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_consistency_reports_the_first_gap() {
    let mut server = Server::new_async().await;
    let store = Arc::new(MemoryStore::new());
    let agent = agent(server.url(), store.clone()).await;
    let hour = current_hour();

    server
        .mock("GET", CANDLES_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(page(vec![
            row(hour - 5 * H, "0.0610"),
            row(hour - 4 * H, "0.0610"),
            row(hour - H, "0.0610"),
        ]))
        .create_async()
        .await;
    agent.seed(1, 100).await.unwrap();

    assert_eq!(
        agent.check_candles_consistency().await.unwrap(),
        ConsistencyReport::Gap {
            previous_open_time: hour - 4 * H,
            next_open_time: hour - H,
        }
    );
}
