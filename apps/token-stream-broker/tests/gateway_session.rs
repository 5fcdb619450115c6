//! Gateway Session Tests
//!
//! End-to-end through the consumer WebSocket: attach on connect, JSON
//! requests, pushed data, protocol errors and detach on close.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use token_stream_broker::application::services::spawn;
use token_stream_broker::infrastructure::gateway::{GatewayState, serve};
use token_stream_broker::{
    Broker, FeedEvent, PriceUpdate, Topic, Trade, TradeEvent, TradeSide, UpstreamControl,
    UpstreamEvent,
};

const WAIT: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Default)]
struct LastFilter(Arc<Mutex<BTreeSet<Topic>>>);

impl UpstreamControl for LastFilter {
    fn set_filter(&self, topics: BTreeSet<Topic>) {
        *self.0.lock() = topics;
    }
}

impl LastFilter {
    async fn wait_for(&self, expected: &BTreeSet<Topic>) {
        tokio::time::timeout(WAIT, async {
            while *self.0.lock() != *expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("filter never became {expected:?}"));
    }
}

struct Harness {
    addr: SocketAddr,
    filter: LastFilter,
    events: mpsc::Sender<UpstreamEvent>,
    cancel: CancellationToken,
}

async fn start() -> Harness {
    let filter = LastFilter::default();
    let (event_tx, event_rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();

    let broker = Broker::new(filter.clone(), Topic::new("REF"), 20);
    let (handle, _task) = spawn(broker, event_rx, cancel.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, GatewayState::new(handle, 16, cancel.clone())));

    Harness {
        addr,
        filter,
        events: event_tx,
        cancel,
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    ws
}

async fn send(ws: &mut Client, json: &str) {
    ws.send(Message::Text(json.into())).await.unwrap();
}

async fn recv(ws: &mut Client) -> serde_json::Value {
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("no message from gateway")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

fn trade_on(topic: &str, id: &str) -> UpstreamEvent {
    UpstreamEvent::Feed(FeedEvent::Trade(TradeEvent {
        topic: Topic::new(topic),
        trade: Trade {
            id: id.to_string(),
            price: Decimal::new(125, 2),
            amount: Decimal::from(40),
            timestamp_ms: 1_700_000_000_000,
            side: TradeSide::Sell,
            external_ref: id.to_string(),
        },
    }))
}

fn price_on(topic: &str, price: i64) -> UpstreamEvent {
    UpstreamEvent::Feed(FeedEvent::Price(PriceUpdate {
        topic: Topic::new(topic),
        price: Decimal::from(price),
        change_percent_24h: Decimal::ZERO,
    }))
}

#[tokio::test]
async fn consumer_lifecycle_over_websocket() {
    let harness = start().await;
    let mut ws = connect(harness.addr).await;

    let status = recv(&mut ws).await;
    assert_eq!(status["type"], "status");
    assert_eq!(status["status"], "disconnected");

    send(&mut ws, r#"{"type":"subscribe","topic":"X","kind":"trade-feed"}"#).await;
    let expected: BTreeSet<Topic> = [Topic::new("X")].into_iter().collect();
    harness.filter.wait_for(&expected).await;

    harness.events.send(trade_on("X", "0xabc")).await.unwrap();
    let data = recv(&mut ws).await;
    assert_eq!(data["type"], "data");
    assert_eq!(data["kind"], "trade-feed");
    assert_eq!(data["data"]["topic"], "X");
    assert_eq!(data["data"]["trades"][0]["id"], "0xabc");
    assert_eq!(data["data"]["trades"][0]["side"], "sell");
    assert_eq!(data["data"]["trades"][0]["price"], 1.25);
    assert_eq!(data["data"]["trades"][0]["externalRef"], "0xabc");
    assert_eq!(data["data"]["trades"][0]["timestampMs"], 1_700_000_000_000_i64);
    assert!(data["data"]["timestampMs"].as_i64().unwrap() > 0);

    send(&mut ws, r#"{"type":"ping"}"#).await;
    let pong = recv(&mut ws).await;
    assert_eq!(pong["type"], "pong");
    assert!(pong["timestampMs"].as_i64().unwrap() > 0);

    send(&mut ws, r#"{"type":"subscribe","topic":""}"#).await;
    let error = recv(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert!(
        error["message"]
            .as_str()
            .unwrap()
            .starts_with("invalid request")
    );

    ws.close(None).await.unwrap();
    harness.filter.wait_for(&BTreeSet::new()).await;

    harness.cancel.cancel();
}

#[tokio::test]
async fn sessions_share_one_upstream_topic() {
    let harness = start().await;
    let mut first = connect(harness.addr).await;
    let mut second = connect(harness.addr).await;
    recv(&mut first).await;
    recv(&mut second).await;

    for ws in [&mut first, &mut second] {
        send(ws, r#"{"type":"subscribe","topic":"X","kind":"price"}"#).await;
        // Requests are handled in order, so the pong confirms the subscribe.
        send(ws, r#"{"type":"ping"}"#).await;
        assert_eq!(recv(ws).await["type"], "pong");
    }
    let shared: BTreeSet<Topic> = [Topic::new("REF"), Topic::new("X")].into_iter().collect();
    harness.filter.wait_for(&shared).await;

    // One consumer leaving keeps the topic and the feed for the other.
    first.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*harness.filter.0.lock(), shared);

    harness.events.send(price_on("X", 3)).await.unwrap();
    let data = recv(&mut second).await;
    assert_eq!(data["type"], "data");
    assert_eq!(data["kind"], "price");
    assert_eq!(data["data"]["topic"], "X");
    assert_eq!(data["data"]["price"], 3.0);
    assert_eq!(data["data"]["derivedCrossRate"], 0.0);

    send(&mut second, r#"{"type":"unsubscribe","topic":"X"}"#).await;
    harness.filter.wait_for(&BTreeSet::new()).await;

    harness.cancel.cancel();
}
