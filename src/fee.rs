//! Gas fee calculation utilities
//!
//! Handles the fee fields of outgoing challenge transactions for both
//! legacy and EIP-1559 policies, and the gas-limit headroom applied on
//! top of node estimates.

use anyhow::{bail, Result};
use std::fmt;
use std::str::FromStr;

/// Gas-fee estimation policy selected with `--tx-type`.
///
/// `None` leaves fee selection to the node's reported gas price, which is
/// the same wire shape as `Legacy`; the two differ only in intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxType {
    Legacy,
    Eip1559,
    #[default]
    None,
}

impl TxType {
    /// True when the policy produces an EIP-1559 (type 2) transaction.
    pub fn is_eip1559(self) -> bool {
        matches!(self, TxType::Eip1559)
    }
}

impl FromStr for TxType {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(TxType::Legacy),
            "eip1559" => Ok(TxType::Eip1559),
            "" | "none" => Ok(TxType::None),
            other => bail!("Unknown transaction type: {other}. Have to be legacy, eip1559 or none"),
        }
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxType::Legacy => write!(f, "legacy"),
            TxType::Eip1559 => write!(f, "eip1559"),
            TxType::None => write!(f, "none"),
        }
    }
}

/// Fee fields resolved for an outgoing transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeEstimate {
    Legacy {
        gas_price: u128,
    },
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

/// Compute the EIP-1559 fee caps from the current base fee and a priority
/// tip: `max_fee = 2 * base_fee + priority`.
pub fn eip1559_fee_caps(base_fee: u128, priority_fee: u128) -> FeeEstimate {
    FeeEstimate::Eip1559 {
        max_fee_per_gas: base_fee.saturating_mul(2).saturating_add(priority_fee),
        max_priority_fee_per_gas: priority_fee,
    }
}

/// Effective gas price an EIP-1559 transaction ends up paying:
/// `min(max_fee, base_fee + max_priority_fee)`.
pub fn effective_gas_price(max_fee: u128, base_fee: u128, max_priority_fee: u128) -> u128 {
    max_fee.min(base_fee.saturating_add(max_priority_fee))
}

/// Multiply a node gas estimate by the 1.25 headroom factor.
pub fn with_headroom(gas_estimate: u64) -> u64 {
    gas_estimate.saturating_add(gas_estimate / 4)
}
