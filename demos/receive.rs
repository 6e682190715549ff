//! Notification receiver.
//!
//! Demonstrates:
//! - Building a notifier from `AMQP_*` environment variables
//! - Registering a handler on the notifications channel
//! - Surviving broker restarts while waiting
//!
//! Usage:
//!   cargo run --example receive
//!   cargo run --example receive -- --debug
//!   AMQP_URL=amqp://localhost:5672 cargo run --example receive

mod common;

// ============================================================================
// Imports
// ============================================================================

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
    println!("=== Receive ===\n");

    let notifier = notifier_factory()?;
    println!("[Setup] Connecting to {}...", notifier.pubsub().driver().options().url);
    notifier.init().await?;

    notifier
        .receive(|message| println!("[Received] {message}"))
        .await?;
    println!("        ✓ Listening on '{}'\n", notifier.channel());
    println!("Restart the broker to watch the handler come back.");

    common::wait_for_exit(args.no_wait).await;
    notifier.pubsub().driver().close().await
}
