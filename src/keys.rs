//! Signing key material
//!
//! Loads the challenger's private key from a raw hex secret or an
//! encrypted keystore file.

use crate::config::KeySource;
use alloy_signer_local::PrivateKeySigner;
use anyhow::{Context, Result};
use std::path::Path;

/// Load the signer described by the validated key source.
pub fn load_signer(source: &KeySource) -> Result<PrivateKeySigner> {
    match source {
        KeySource::SecretKey(raw) => signer_from_secret_key(raw),
        KeySource::Keystore { path, password } => signer_from_keystore(path, password),
    }
}

/// Parse a raw private key in hex, with or without a 0x prefix.
pub fn signer_from_secret_key(raw: &str) -> Result<PrivateKeySigner> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(trimmed).context("Invalid hex in secret key")?;
    PrivateKeySigner::from_slice(&bytes).context("Invalid secret key")
}

/// Decrypt an encrypted keystore file with the given password.
pub fn signer_from_keystore(path: &Path, password: &str) -> Result<PrivateKeySigner> {
    if path.is_dir() {
        anyhow::bail!("keystore file is a directory");
    }
    PrivateKeySigner::decrypt_keystore(path, password)
        .with_context(|| format!("Failed to decrypt keystore file {:?}", path))
}
