//! Runtime configuration
//!
//! Validates the `run` command options into the configuration the agent
//! starts with. All violations here are fatal startup errors.

use crate::cli::RunOptions;
use crate::fee::TxType;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Where the signing key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// Raw private key hex, with or without 0x prefix.
    SecretKey(String),
    /// Encrypted keystore file plus its decryption password.
    Keystore { path: PathBuf, password: String },
}

/// Validated agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Feed contract addresses to monitor, one pipeline each.
    pub addresses: Vec<Address>,
    /// Public HTTP RPC endpoint.
    pub rpc_url: String,
    /// Optional private-relay endpoint; enables the dual-endpoint
    /// submission path.
    pub flashbot_rpc_url: Option<String>,
    /// Optional push endpoint hint. Accepted as metadata only; the agent
    /// polls.
    pub subscription_url: Option<String>,
    /// Chain id enforced on submitted transactions; queried from the RPC
    /// when unset.
    pub chain_id: Option<u64>,
    /// Scan cursor seed. `None` derives a lookback window on the first tick.
    pub from_block: Option<u64>,
    /// Gas-fee estimation policy.
    pub tx_type: TxType,
    /// Signing key material.
    pub key: KeySource,
}

impl Config {
    /// Validate `run` options into a [`Config`].
    pub fn from_run_options(opts: &RunOptions) -> Result<Self> {
        if opts.addresses.is_empty() {
            anyhow::bail!("Please provide at least one address using `--addresses` flag");
        }
        let addresses = opts
            .addresses
            .iter()
            .map(|raw| parse_address(raw))
            .collect::<Result<Vec<_>>>()?;

        if opts.rpc_url.trim().is_empty() {
            anyhow::bail!("Please provide Rpc URL using `--rpc-url` flag");
        }

        let key = resolve_key_source(opts)?;
        let tx_type: TxType = opts.tx_type.parse()?;

        Ok(Self {
            addresses,
            rpc_url: opts.rpc_url.clone(),
            flashbot_rpc_url: opts.flashbot_rpc_url.clone(),
            subscription_url: opts.subscription_url.clone(),
            chain_id: opts.chain_id,
            from_block: (opts.from_block != 0).then_some(opts.from_block),
            tx_type,
            key,
        })
    }
}

fn resolve_key_source(opts: &RunOptions) -> Result<KeySource> {
    match (&opts.secret_key, &opts.keystore) {
        (Some(_), Some(_)) => {
            anyhow::bail!("Provide either `--secret-key` or `--keystore`, not both")
        }
        (Some(secret), None) => Ok(KeySource::SecretKey(secret.clone())),
        (None, Some(path)) => {
            let password = match (&opts.password, &opts.password_file) {
                (Some(password), _) => password.clone(),
                (None, Some(file)) => fs::read_to_string(file)
                    .with_context(|| format!("failed to read password file: {file:?}"))?
                    .trim_end()
                    .to_string(),
                (None, None) => anyhow::bail!(
                    "please provide password using `--password` or `--password-file` flag"
                ),
            };
            Ok(KeySource::Keystore {
                path: path.clone(),
                password,
            })
        }
        (None, None) => {
            anyhow::bail!("please provide key using `--secret-key` or `--keystore` flag")
        }
    }
}

/// Pad an odd-length hex string with a leading zero.
fn pad_hex_string(s: &str) -> String {
    if s.is_empty() {
        return s.to_string();
    }
    if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    }
}

/// Parse an address from a hex string, with or without 0x prefix.
fn parse_address(s: &str) -> Result<Address> {
    let trimmed = s.trim();
    let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let trimmed = pad_hex_string(trimmed);
    let bytes = hex::decode(&trimmed)
        .with_context(|| format!("Failed to parse given address {s}"))?;
    if bytes.len() != 20 {
        anyhow::bail!(
            "Address must be 20 bytes (40 hex chars), got {} bytes",
            bytes.len()
        );
    }
    Ok(Address::from_slice(&bytes))
}
