//! Challenger - optimistic price-feed watchdog agent
//!
//! Watches ScribeOptimistic feed contracts for `OpPoked` events, verifies
//! their Schnorr signatures on-chain, and races to challenge invalid pokes
//! before the challenge window closes.

pub mod challenger;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod feed;
pub mod fee;
pub mod filter;
pub mod keys;
pub mod metrics;
pub mod rpc;
pub mod types;

// Re-export the main types for convenience
pub use challenger::Challenger;
pub use error::ClientError;
pub use events::{PokeEvent, SuccessfulChallengeEvent};
pub use feed::{FeedProvider, RpcFeedProvider};
pub use rpc::{EthClient, HttpClient};
