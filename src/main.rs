//! challenger - optimistic price-feed watchdog agent
//!
//! Monitors ScribeOptimistic feed contracts and challenges optimistic
//! pokes whose Schnorr signatures fail on-chain verification.

use challenger::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
