//! Brokerless recovery walkthrough.
//!
//! Demonstrates:
//! - Wiring a notifier to the in-memory broker
//! - A broker restart wiping every exchange and queue
//! - The driver reconnecting and replaying the handler
//!
//! Usage:
//!   cargo run --example memory_roundtrip
//!   cargo run --example memory_roundtrip -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use common::Args;
use resilient_notifier::{
    ConnectionState, DriverOptions, Error, MemoryBroker, ReconnectPolicy, Result, notifier_with,
};

// ============================================================================
// Constants
// ============================================================================

const BACKOFF: Duration = Duration::from_millis(250);

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run().await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    println!("=== Memory Round Trip ===\n");

    // ========================================================================
    // Setup
    // ========================================================================

    let broker = MemoryBroker::new();
    let options =
        DriverOptions::new("amqp://memory:5672").with_reconnect(ReconnectPolicy::fixed(BACKOFF));
    let notifier = notifier_with(broker.transport(), options)?;
    let driver = notifier.pubsub().driver().clone();

    notifier.init().await?;
    notifier
        .receive(|message| println!("    [Handler] {message}"))
        .await?;
    println!("[Setup] ✓ Subscribed to '{}'\n", notifier.channel());

    // ========================================================================
    // Before restart
    // ========================================================================

    println!("[1] Notify before restart...");
    notifier.notify(&json!({"step": 1})).await?;
    println!();

    // ========================================================================
    // Restart
    // ========================================================================

    println!("[2] Restarting broker (refusing connections for a moment)...");
    broker.set_reachable(false);
    broker.restart();
    println!("    State: {}", driver.state());

    tokio::time::sleep(BACKOFF * 3).await;
    broker.set_reachable(true);

    let mut state = driver.watch_state();
    timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .map_err(|_| Error::connection("reconnect timed out"))?
    .map_err(|_| Error::DriverClosed)?;

    println!(
        "    ✓ {} after {} attempts (generation {})\n",
        driver.state(),
        broker.connect_attempts(),
        driver.generation()
    );

    // ========================================================================
    // After restart
    // ========================================================================

    println!("[3] Notify after restart...");
    notifier.notify("plain text survives too").await?;
    println!();

    driver.close().await?;
    println!("=== Done ===");
    Ok(())
}
