//! Notification sender.
//!
//! Sends one notification and exits. Without an argument a JSON object is
//! sent; with one, the argument is sent as plain text.
//!
//! Usage:
//!   cargo run --example notify
//!   cargo run --example notify -- "deploy finished"

mod common;

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Value, json};

use common::Args;
use resilient_notifier::{Result, notifier_factory};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== Notify ===\n");

    let notifier = notifier_factory()?;
    notifier.init().await?;

    let message = match args.message {
        Some(text) => Value::String(text),
        None => json!({"event": "demo", "source": "notify"}),
    };

    notifier.notify(&message).await?;
    println!("[Sent] {message}");

    notifier.pubsub().driver().close().await
}
