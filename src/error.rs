//! Semantic error kinds for chain and feed operations
//!
//! Everything a tick does funnels into one of these; the challenger loop
//! logs and counts them but never dies on them.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport or RPC-layer failure. Recovered by retrying at the next tick.
    #[error("network error: {0}")]
    Network(String),

    /// The endpoint has no block at the requested height.
    #[error("block {0} not found")]
    BlockNotFound(u64),

    /// A read-only call hit a contract revert.
    #[error("execution reverted: {0}")]
    Revert(String),

    /// The node refused the transaction (nonce, funds, gas).
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// A log or call return did not match the declared ABI.
    #[error("decode error: {0}")]
    Decode(String),

    /// No usable receipt appeared within the confirmation window.
    #[error("no receipt within {0:?}")]
    ConfirmationTimeout(Duration),

    /// Shutdown was requested while the operation was in flight.
    #[error("operation cancelled")]
    Cancelled,
}
