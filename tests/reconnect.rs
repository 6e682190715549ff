//! Recovery behaviour of the broker driver against the in-memory broker.
//!
//! All tests run on a paused clock so backoff delays elapse instantly.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::{sleep, timeout};
use tokio_test::{assert_err, assert_ok};

use resilient_notifier::{
    BrokerDriver, ConnectionState, DriverOptions, Error, ExchangeKind, MemoryBroker,
    NOTIFICATIONS_CHANNEL, ReconnectPolicy, notifier_with,
};

// ============================================================================
// Helpers
// ============================================================================

const BACKOFF: Duration = Duration::from_millis(100);

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("resilient_notifier=debug")
        .with_test_writer()
        .try_init();
}

fn setup() -> (Arc<MemoryBroker>, BrokerDriver) {
    init_logging();
    let broker = MemoryBroker::new();
    let driver = BrokerDriver::builder()
        .url("amqp://memory:5672")
        .reconnect(ReconnectPolicy::fixed(BACKOFF))
        .transport(broker.transport())
        .build()
        .expect("driver should build");
    (broker, driver)
}

async fn wait_for_state(driver: &BrokerDriver, target: ConnectionState) {
    let mut rx = driver.watch_state();
    timeout(Duration::from_secs(60), rx.wait_for(|s| *s == target))
        .await
        .expect("state change timed out")
        .expect("state sender dropped");
}

fn collector() -> (Arc<Mutex<Vec<Value>>>, impl Fn(Value) + Send + Sync + 'static) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    (received, move |msg| sink.lock().push(msg))
}

// ============================================================================
// Recovery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_handler_survives_broker_restart_exactly_once() {
    let (broker, driver) = setup();
    driver.connect().await.unwrap();
    driver
        .create_channel(NOTIFICATIONS_CHANNEL, ExchangeKind::Fanout)
        .await
        .unwrap();

    let (received, handler) = collector();
    driver
        .subscribe(NOTIFICATIONS_CHANNEL, Arc::new(handler))
        .await
        .unwrap();

    broker.restart();
    assert_eq!(driver.state(), ConnectionState::Reconnecting);

    wait_for_state(&driver, ConnectionState::Connected).await;

    assert_eq!(driver.generation(), 2);
    assert_eq!(broker.exchange_names(), vec![NOTIFICATIONS_CHANNEL.to_string()]);
    assert_eq!(broker.queue_count(NOTIFICATIONS_CHANNEL), 1);

    assert_ok!(driver.publish(NOTIFICATIONS_CHANNEL, &json!({"a": 1})).await);
    assert_eq!(received.lock().clone(), vec![json!({"a": 1})]);
    assert_eq!(driver.handler_count(NOTIFICATIONS_CHANNEL), 1);
}

#[tokio::test(start_paused = true)]
async fn test_channel_set_is_recreated_with_kinds() -> anyhow::Result<()> {
    let (broker, driver) = setup();
    driver.connect().await?;
    driver.create_channel("alpha", ExchangeKind::Fanout).await?;
    driver.create_channel("beta", ExchangeKind::Fanout).await?;
    driver.create_channel("gamma", ExchangeKind::Direct).await?;
    let before = driver.channel_names();

    broker.restart();
    wait_for_state(&driver, ConnectionState::Connected).await;

    assert_eq!(driver.channel_names(), before);
    assert_eq!(broker.exchange_names(), before);
    assert_eq!(broker.exchange_kind("gamma"), Some(ExchangeKind::Direct));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_replay_keeps_order_without_duplicates() {
    let (broker, driver) = setup();
    driver.connect().await.unwrap();
    driver.create_channel("events", ExchangeKind::Fanout).await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    for id in 1..=3 {
        let order = Arc::clone(&order);
        driver
            .subscribe("events", Arc::new(move |_| order.lock().push(id)))
            .await
            .unwrap();
    }

    for _ in 0..4 {
        broker.drop_connections("link reset");
        wait_for_state(&driver, ConnectionState::Connected).await;
    }

    assert_eq!(driver.handler_count("events"), 3);
    assert_eq!(broker.queue_count("events"), 3);

    driver.publish("events", &json!("tick")).await.unwrap();
    assert_eq!(order.lock().clone(), vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_retries_until_broker_returns() {
    let (broker, driver) = setup();
    driver.connect().await.unwrap();
    driver.create_channel("events", ExchangeKind::Fanout).await.unwrap();
    let (received, handler) = collector();
    driver.subscribe("events", Arc::new(handler)).await.unwrap();

    broker.set_reachable(false);
    broker.drop_connections("broker down");
    sleep(BACKOFF * 10).await;

    assert_eq!(driver.state(), ConnectionState::Reconnecting);
    assert!(broker.connect_attempts() > 3);

    let err = assert_err!(driver.subscribe("events", Arc::new(|_| {})).await);
    assert!(matches!(err, Error::NotConnected));
    assert_eq!(driver.handler_count("events"), 1);

    broker.set_reachable(true);
    wait_for_state(&driver, ConnectionState::Connected).await;

    driver.publish("events", &json!({"back": true})).await.unwrap();
    assert_eq!(received.lock().clone(), vec![json!({"back": true})]);
}

#[tokio::test(start_paused = true)]
async fn test_quick_errors_schedule_one_reconnect() {
    let (broker, driver) = setup();
    driver.connect().await.unwrap();

    broker.emit_error("first failure");
    broker.emit_error("second failure");
    assert_eq!(driver.state(), ConnectionState::Reconnecting);

    wait_for_state(&driver, ConnectionState::Connected).await;
    sleep(BACKOFF * 5).await;

    assert_eq!(broker.connect_attempts(), 2);
    assert_eq!(broker.live_connections(), 1);
    assert_eq!(driver.generation(), 2);
    assert_eq!(driver.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_error_on_live_link_replaces_connection() {
    let (broker, driver) = setup();
    driver.connect().await.unwrap();
    driver
        .create_channel(NOTIFICATIONS_CHANNEL, ExchangeKind::Fanout)
        .await
        .unwrap();
    let (received, handler) = collector();
    driver
        .subscribe(NOTIFICATIONS_CHANNEL, Arc::new(handler))
        .await
        .unwrap();

    broker.emit_error("heartbeat missed");
    wait_for_state(&driver, ConnectionState::Connected).await;

    assert_eq!(broker.live_connections(), 1);
    assert_eq!(broker.queue_count(NOTIFICATIONS_CHANNEL), 1);

    driver.publish(NOTIFICATIONS_CHANNEL, &json!({"a": 1})).await.unwrap();
    assert_eq!(received.lock().clone(), vec![json!({"a": 1})]);
}

#[tokio::test(start_paused = true)]
async fn test_channel_close_on_live_link_delivers_once() {
    let (broker, driver) = setup();
    driver.connect().await.unwrap();
    driver.create_channel("events", ExchangeKind::Fanout).await.unwrap();
    let (received, handler) = collector();
    driver.subscribe("events", Arc::new(handler)).await.unwrap();

    broker.close_channels();

    let err = assert_err!(driver.publish("events", &json!(1)).await);
    assert!(matches!(err, Error::ChannelClosed { .. }));
    wait_for_state(&driver, ConnectionState::Connected).await;

    assert_eq!(broker.live_connections(), 1);
    assert_eq!(broker.queue_count("events"), 1);

    driver.publish("events", &json!(2)).await.unwrap();
    assert_eq!(received.lock().clone(), vec![json!(2)]);
}

#[tokio::test(start_paused = true)]
async fn test_publish_on_closed_channel_starts_recovery() {
    let (broker, driver) = setup();
    driver.connect().await.unwrap();
    driver.create_channel("events", ExchangeKind::Fanout).await.unwrap();
    let (received, handler) = collector();
    driver.subscribe("events", Arc::new(handler)).await.unwrap();

    broker.sever_connections();

    let err = assert_err!(driver.publish("events", &json!(1)).await);
    assert!(matches!(err, Error::ChannelClosed { .. }));
    assert_eq!(driver.state(), ConnectionState::Reconnecting);

    let err = assert_err!(driver.publish("events", &json!(2)).await);
    assert!(matches!(err, Error::ChannelClosed { .. }));

    wait_for_state(&driver, ConnectionState::Connected).await;
    assert_eq!(broker.connect_attempts(), 2);

    driver.publish("events", &json!(3)).await.unwrap();
    assert_eq!(received.lock().clone(), vec![json!(3)]);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_connect_uses_one_loop() {
    let (broker, driver) = setup();
    broker.set_reachable(false);

    let first = driver.clone();
    let second = driver.clone();
    let waiter = tokio::spawn(async move { second.connect().await });
    let connector = tokio::spawn(async move { first.connect().await });

    sleep(BACKOFF * 3).await;
    broker.set_reachable(true);

    assert_ok!(connector.await.unwrap());
    assert_ok!(waiter.await.unwrap());
    assert_eq!(broker.live_connections(), 1);
    assert_eq!(driver.generation(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_prevents_reconnect() {
    let (broker, driver) = setup();
    driver.connect().await.unwrap();
    driver.create_channel("events", ExchangeKind::Fanout).await.unwrap();

    driver.close().await.unwrap();
    sleep(BACKOFF * 10).await;

    assert_eq!(driver.state(), ConnectionState::Closed);
    assert_eq!(broker.connect_attempts(), 1);
    let err = assert_err!(driver.publish("events", &json!(1)).await);
    assert!(matches!(err, Error::ChannelNotFound { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_close_stops_running_retry_loop() {
    let (broker, driver) = setup();
    driver.connect().await.unwrap();

    broker.set_reachable(false);
    broker.drop_connections("broker down");
    sleep(BACKOFF * 3).await;

    driver.close().await.unwrap();
    let attempts = broker.connect_attempts();
    broker.set_reachable(true);
    sleep(BACKOFF * 10).await;

    assert_eq!(broker.connect_attempts(), attempts);
    assert_eq!(broker.live_connections(), 0);
    assert_eq!(driver.state(), ConnectionState::Closed);
}

// ============================================================================
// Notifier
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_notifier_survives_restart() -> anyhow::Result<()> {
    init_logging();
    let broker = MemoryBroker::new();
    let options = DriverOptions::new("amqp://memory:5672")
        .with_reconnect(ReconnectPolicy::fixed(BACKOFF));
    let notifier = notifier_with(broker.transport(), options)?;

    notifier.init().await?;
    let (received, handler) = collector();
    notifier.receive(handler).await?;

    broker.restart();
    wait_for_state(notifier.pubsub().driver(), ConnectionState::Connected).await;

    notifier.notify(&json!({"a": 1})).await?;
    assert_eq!(received.lock().clone(), vec![json!({"a": 1})]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_notify_without_channel_does_not_escape() {
    init_logging();
    let broker = MemoryBroker::new();
    let notifier = notifier_with(broker.transport(), DriverOptions::default()).unwrap();

    let result = notifier.notify(&json!({"a": 1})).await;
    assert!(matches!(result, Err(Error::ChannelNotFound { .. })));
}
