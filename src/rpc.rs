//! JSON-RPC client for Ethereum nodes
//!
//! Provides the chain access surface the challenger consumes: block and log
//! reads, read-only calls, and locally signed transaction submission.

use crate::error::ClientError;
use crate::fee::{self, FeeEstimate, TxType};
use crate::types::{parse_hex_u128, parse_hex_u64, Block, Log, Receipt};
use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, Bytes, TxKind, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::future::Future;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// Priority fee used when the endpoint cannot suggest one (1 gwei).
const DEFAULT_PRIORITY_FEE_WEI: u128 = 1_000_000_000;

/// Chain access surface consumed by the feed provider.
///
/// Every operation takes the shutdown token and returns
/// [`ClientError::Cancelled`] promptly once it fires, so an in-flight tick
/// does not outlive a shutdown request.
#[async_trait]
pub trait EthClient: Send + Sync {
    /// Latest block number known to the endpoint.
    async fn latest_block(&self, cancel: &CancellationToken) -> Result<u64, ClientError>;

    /// Header fields of the block at `number`.
    async fn block_by_number(
        &self,
        cancel: &CancellationToken,
        number: u64,
    ) -> Result<Block, ClientError>;

    /// Logs emitted by `address` with the given topic0. Both range ends are
    /// inclusive; an empty list is a valid success.
    async fn get_logs(
        &self,
        cancel: &CancellationToken,
        address: Address,
        topic0: B256,
        from: u64,
        to: u64,
    ) -> Result<Vec<Log>, ClientError>;

    /// Read-only invocation of `to` at the latest block.
    async fn call(
        &self,
        cancel: &CancellationToken,
        to: Address,
        calldata: Vec<u8>,
    ) -> Result<Vec<u8>, ClientError>;

    /// Sign a transaction invoking `to` with `calldata` and submit it.
    async fn send_transaction(
        &self,
        cancel: &CancellationToken,
        to: Address,
        calldata: Vec<u8>,
    ) -> Result<B256, ClientError>;

    /// Receipt for `tx_hash`, or `None` while the transaction is unmined.
    async fn transaction_receipt(
        &self,
        cancel: &CancellationToken,
        tx_hash: B256,
    ) -> Result<Option<Receipt>, ClientError>;

    /// Configured signing address(es). Used only to label metrics. Reads the
    /// locally bound signer, so it never suspends and carries no token.
    fn accounts(&self) -> Vec<Address>;
}

/// Race an RPC operation against shutdown.
pub async fn race_cancel<T, F>(cancel: &CancellationToken, operation: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(ClientError::Cancelled),
        result = operation => result,
    }
}

/// Outcome of a raw JSON-RPC exchange, before semantic classification.
enum RpcFailure {
    /// The HTTP round trip or response framing failed.
    Transport(String),
    /// The node answered with a JSON-RPC error object.
    Node { code: i64, message: String },
}

impl RpcFailure {
    fn network(self) -> ClientError {
        match self {
            RpcFailure::Transport(msg) => ClientError::Network(msg),
            RpcFailure::Node { code, message } => {
                ClientError::Network(format!("RPC error {code}: {message}"))
            }
        }
    }
}

fn is_revert_message(message: &str) -> bool {
    message.to_ascii_lowercase().contains("revert")
}

fn block_tag(number: u64) -> String {
    format!("0x{number:x}")
}

/// JSON-RPC client bound to one endpoint and one signing key.
pub struct HttpClient {
    client: reqwest::Client,
    url: String,
    signer: PrivateKeySigner,
    tx_type: TxType,
    chain_id: OnceCell<u64>,
}

impl HttpClient {
    /// Create a new client. When `chain_id` is `None` the endpoint is asked
    /// once (`eth_chainId`) on first use and the answer is cached.
    pub fn new(
        url: String,
        signer: PrivateKeySigner,
        tx_type: TxType,
        chain_id: Option<u64>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            signer,
            tx_type,
            chain_id: OnceCell::new_with(chain_id),
        }
    }

    /// Make a JSON-RPC call.
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcFailure> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|err| RpcFailure::Transport(format!("Failed to send RPC request: {err}")))?;

        let body: Value = response
            .json()
            .await
            .map_err(|err| RpcFailure::Transport(format!("Failed to parse RPC response: {err}")))?;

        if let Some(error) = body.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown RPC error")
                .to_string();
            return Err(RpcFailure::Node { code, message });
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| RpcFailure::Transport("RPC response missing 'result' field".into()))
    }

    async fn request_hex_u64(&self, method: &str, params: Value) -> Result<u64, ClientError> {
        let result = self.request(method, params).await.map_err(RpcFailure::network)?;
        let raw = result
            .as_str()
            .ok_or_else(|| ClientError::Decode(format!("{method} result is not a string")))?;
        parse_hex_u64(raw).map_err(|err| ClientError::Decode(format!("{method} result: {err}")))
    }

    async fn request_hex_u128(&self, method: &str, params: Value) -> Result<u128, ClientError> {
        let result = self.request(method, params).await.map_err(RpcFailure::network)?;
        let raw = result
            .as_str()
            .ok_or_else(|| ClientError::Decode(format!("{method} result is not a string")))?;
        parse_hex_u128(raw).map_err(|err| ClientError::Decode(format!("{method} result: {err}")))
    }

    /// Chain id used for signing, queried from the endpoint on first use
    /// unless one was configured.
    async fn chain_id(&self) -> Result<u64, ClientError> {
        self.chain_id
            .get_or_try_init(|| async { self.request_hex_u64("eth_chainId", json!([])).await })
            .await
            .copied()
    }

    async fn nonce(&self, address: Address) -> Result<u64, ClientError> {
        self.request_hex_u64(
            "eth_getTransactionCount",
            json!([format!("0x{:x}", address), "latest"]),
        )
        .await
    }

    async fn estimate_gas(&self, to: Address, calldata: &[u8]) -> Result<u64, ClientError> {
        self.request_hex_u64(
            "eth_estimateGas",
            json!([{
                "from": format!("0x{:x}", self.signer.address()),
                "to": format!("0x{:x}", to),
                "data": format!("0x{}", hex::encode(calldata)),
            }]),
        )
        .await
    }

    /// Resolve the fee fields for an outgoing transaction per the configured
    /// policy.
    async fn estimate_fees(&self) -> Result<FeeEstimate, ClientError> {
        if !self.tx_type.is_eip1559() {
            let gas_price = self.request_hex_u128("eth_gasPrice", json!([])).await?;
            return Ok(FeeEstimate::Legacy { gas_price });
        }

        let priority_fee = match self
            .request_hex_u128("eth_maxPriorityFeePerGas", json!([]))
            .await
        {
            Ok(fee) => fee,
            Err(err) => {
                tracing::debug!(
                    "eth_maxPriorityFeePerGas unavailable ({err}), using default priority fee"
                );
                DEFAULT_PRIORITY_FEE_WEI
            }
        };

        let latest = self
            .request("eth_getBlockByNumber", json!(["latest", false]))
            .await
            .map_err(RpcFailure::network)?;
        let block: Block = serde_json::from_value(latest)
            .map_err(|err| ClientError::Decode(format!("Failed to deserialize block: {err}")))?;
        let base_fee = block.base_fee_per_gas.ok_or_else(|| {
            ClientError::Rejected("eip1559 fee estimation: endpoint reports no baseFeePerGas".into())
        })?;

        Ok(fee::eip1559_fee_caps(base_fee, priority_fee))
    }

    /// Build, sign, and EIP-2718-encode a transaction.
    fn sign_raw_transaction(
        &self,
        chain_id: u64,
        nonce: u64,
        gas_limit: u64,
        fees: FeeEstimate,
        to: Address,
        calldata: Vec<u8>,
    ) -> Result<Vec<u8>, ClientError> {
        let envelope: TxEnvelope = match fees {
            FeeEstimate::Legacy { gas_price } => {
                let tx = TxLegacy {
                    chain_id: Some(chain_id),
                    nonce,
                    gas_price,
                    gas_limit,
                    to: TxKind::Call(to),
                    value: U256::ZERO,
                    input: Bytes::from(calldata),
                };
                let signature = self
                    .signer
                    .sign_hash_sync(&tx.signature_hash())
                    .map_err(|err| ClientError::Rejected(format!("signing failed: {err}")))?;
                tx.into_signed(signature).into()
            }
            FeeEstimate::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let tx = TxEip1559 {
                    chain_id,
                    nonce,
                    gas_limit,
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                    to: TxKind::Call(to),
                    value: U256::ZERO,
                    access_list: Default::default(),
                    input: Bytes::from(calldata),
                };
                let signature = self
                    .signer
                    .sign_hash_sync(&tx.signature_hash())
                    .map_err(|err| ClientError::Rejected(format!("signing failed: {err}")))?;
                tx.into_signed(signature).into()
            }
        };

        let mut raw = Vec::with_capacity(envelope.encode_2718_len());
        envelope.encode_2718(&mut raw);
        Ok(raw)
    }
}

#[async_trait]
impl EthClient for HttpClient {
    async fn latest_block(&self, cancel: &CancellationToken) -> Result<u64, ClientError> {
        race_cancel(cancel, self.request_hex_u64("eth_blockNumber", json!([]))).await
    }

    async fn block_by_number(
        &self,
        cancel: &CancellationToken,
        number: u64,
    ) -> Result<Block, ClientError> {
        race_cancel(cancel, async {
            let result = self
                .request("eth_getBlockByNumber", json!([block_tag(number), false]))
                .await
                .map_err(RpcFailure::network)?;
            if result.is_null() {
                return Err(ClientError::BlockNotFound(number));
            }
            serde_json::from_value(result)
                .map_err(|err| ClientError::Decode(format!("Failed to deserialize block: {err}")))
        })
        .await
    }

    async fn get_logs(
        &self,
        cancel: &CancellationToken,
        address: Address,
        topic0: B256,
        from: u64,
        to: u64,
    ) -> Result<Vec<Log>, ClientError> {
        race_cancel(cancel, async {
            let result = self
                .request(
                    "eth_getLogs",
                    json!([{
                        "address": format!("0x{:x}", address),
                        "fromBlock": block_tag(from),
                        "toBlock": block_tag(to),
                        "topics": [format!("0x{:x}", topic0)],
                    }]),
                )
                .await
                .map_err(RpcFailure::network)?;
            serde_json::from_value(result)
                .map_err(|err| ClientError::Decode(format!("Failed to deserialize logs: {err}")))
        })
        .await
    }

    async fn call(
        &self,
        cancel: &CancellationToken,
        to: Address,
        calldata: Vec<u8>,
    ) -> Result<Vec<u8>, ClientError> {
        race_cancel(cancel, async {
            let result = self
                .request(
                    "eth_call",
                    json!([{
                        "to": format!("0x{:x}", to),
                        "data": format!("0x{}", hex::encode(&calldata)),
                    }, "latest"]),
                )
                .await
                .map_err(|failure| match failure {
                    // EIP-1474 reserves code 3 for execution errors.
                    RpcFailure::Node { code, message }
                        if code == 3 || is_revert_message(&message) =>
                    {
                        ClientError::Revert(message)
                    }
                    other => other.network(),
                })?;
            let raw = result
                .as_str()
                .ok_or_else(|| ClientError::Decode("eth_call result is not a string".into()))?;
            let raw = raw.strip_prefix("0x").unwrap_or(raw);
            hex::decode(raw).map_err(|err| ClientError::Decode(format!("eth_call result: {err}")))
        })
        .await
    }

    async fn send_transaction(
        &self,
        cancel: &CancellationToken,
        to: Address,
        calldata: Vec<u8>,
    ) -> Result<B256, ClientError> {
        race_cancel(cancel, async {
            let chain_id = self.chain_id().await?;
            let nonce = self.nonce(self.signer.address()).await?;
            let gas_limit = fee::with_headroom(self.estimate_gas(to, &calldata).await?);
            let fees = self.estimate_fees().await?;
            let raw = self.sign_raw_transaction(chain_id, nonce, gas_limit, fees, to, calldata)?;

            let result = self
                .request(
                    "eth_sendRawTransaction",
                    json!([format!("0x{}", hex::encode(raw))]),
                )
                .await
                .map_err(|failure| match failure {
                    RpcFailure::Node { message, .. } => ClientError::Rejected(message),
                    transport => transport.network(),
                })?;
            let raw_hash = result.as_str().ok_or_else(|| {
                ClientError::Decode("eth_sendRawTransaction result is not a string".into())
            })?;
            let raw_hash = raw_hash.strip_prefix("0x").unwrap_or(raw_hash);
            let bytes = hex::decode(raw_hash)
                .map_err(|err| ClientError::Decode(format!("transaction hash: {err}")))?;
            if bytes.len() != 32 {
                return Err(ClientError::Decode(format!(
                    "Expected 32 bytes for transaction hash, got {}",
                    bytes.len()
                )));
            }
            Ok(B256::from_slice(&bytes))
        })
        .await
    }

    async fn transaction_receipt(
        &self,
        cancel: &CancellationToken,
        tx_hash: B256,
    ) -> Result<Option<Receipt>, ClientError> {
        race_cancel(cancel, async {
            let result = self
                .request(
                    "eth_getTransactionReceipt",
                    json!([format!("0x{:x}", tx_hash)]),
                )
                .await
                .map_err(RpcFailure::network)?;
            if result.is_null() {
                return Ok(None);
            }
            serde_json::from_value(result)
                .map(Some)
                .map_err(|err| ClientError::Decode(format!("Failed to deserialize receipt: {err}")))
        })
        .await
    }

    fn accounts(&self) -> Vec<Address> {
        vec![self.signer.address()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(tx_type: TxType) -> HttpClient {
        HttpClient::new(
            "http://127.0.0.1:8545".to_string(),
            PrivateKeySigner::random(),
            tx_type,
            Some(1),
        )
    }

    #[test]
    fn test_revert_classification() {
        assert!(is_revert_message("execution reverted: stale message"));
        assert!(is_revert_message("Revert"));
        assert!(!is_revert_message("connection reset by peer"));
    }

    #[test]
    fn test_block_tag_formatting() {
        assert_eq!(block_tag(0), "0x0");
        assert_eq!(block_tag(255), "0xff");
    }

    #[test]
    fn test_sign_raw_transaction_eip1559_type_byte() {
        let client = test_client(TxType::Eip1559);
        let raw = client
            .sign_raw_transaction(
                1,
                0,
                100_000,
                FeeEstimate::Eip1559 {
                    max_fee_per_gas: 22_000_000_000,
                    max_priority_fee_per_gas: 2_000_000_000,
                },
                Address::ZERO,
                vec![0x01, 0x02],
            )
            .unwrap();
        assert_eq!(raw[0], 0x02);
    }

    #[test]
    fn test_sign_raw_transaction_legacy_is_rlp_list() {
        let client = test_client(TxType::Legacy);
        let raw = client
            .sign_raw_transaction(
                1,
                0,
                100_000,
                FeeEstimate::Legacy {
                    gas_price: 20_000_000_000,
                },
                Address::ZERO,
                vec![],
            )
            .unwrap();
        // Legacy transactions are bare RLP lists, no type byte.
        assert!(raw[0] >= 0xc0);
    }

    #[test]
    fn test_accounts_returns_signer_address() {
        let client = test_client(TxType::None);
        let accounts = client.accounts();
        assert_eq!(accounts, vec![client.signer.address()]);
    }

    #[tokio::test]
    async fn test_race_cancel_interrupts_pending_operation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), ClientError> = race_cancel(&cancel, std::future::pending()).await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }
}
