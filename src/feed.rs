//! Feed-semantic operations over the chain client
//!
//! Challenge period reads, ranged event fetches, on-chain signature
//! validation, and challenge submission with an optional private-relay
//! first try.

use crate::error::ClientError;
use crate::events::{
    self, constructPokeMessageCall, isAcceptableSchnorrSignatureNowCall, opChallengeCall,
    opChallengePeriodCall, PokeEvent, SuccessfulChallengeEvent, OP_POKED_TOPIC0,
    OP_POKE_CHALLENGED_TOPIC0,
};
use crate::rpc::EthClient;
use crate::types::{Block, Receipt};
use alloy_primitives::{Address, B256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long a submitted challenge may stay unmined before the submission
/// path gives up on it.
pub const TX_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Receipt polling cadence, roughly one slot.
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(12);

/// Per-feed operations the challenger loop drives.
///
/// Every operation takes the shutdown token and threads it into each
/// underlying RPC call, so a pipeline mid-tick observes shutdown promptly.
#[async_trait]
pub trait FeedProvider: Send + Sync {
    /// Latest block number on the public endpoint.
    async fn latest_block(&self, cancel: &CancellationToken) -> Result<u64, ClientError>;

    /// Header fields of the block at `number`.
    async fn block_by_number(
        &self,
        cancel: &CancellationToken,
        number: u64,
    ) -> Result<Block, ClientError>;

    /// The feed's challenge window in seconds (`opChallengePeriod`).
    async fn challenge_period(
        &self,
        cancel: &CancellationToken,
        feed: Address,
    ) -> Result<u16, ClientError>;

    /// `OpPoked` events on `feed` within the inclusive block range.
    async fn pokes_in_range(
        &self,
        cancel: &CancellationToken,
        feed: Address,
        from: u64,
        to: u64,
    ) -> Result<Vec<PokeEvent>, ClientError>;

    /// `OpPokeChallengedSuccessfully` events on `feed` within the inclusive
    /// block range.
    async fn successful_challenges_in_range(
        &self,
        cancel: &CancellationToken,
        feed: Address,
        from: u64,
        to: u64,
    ) -> Result<Vec<SuccessfulChallengeEvent>, ClientError>;

    /// Verify the poke's Schnorr signature on-chain.
    async fn is_poke_signature_valid(
        &self,
        cancel: &CancellationToken,
        feed: Address,
        poke: &PokeEvent,
    ) -> Result<bool, ClientError>;

    /// Challenge the poke via `opChallenge` and return the mined transaction
    /// hash.
    async fn challenge_poke(
        &self,
        cancel: &CancellationToken,
        feed: Address,
        poke: &PokeEvent,
    ) -> Result<B256, ClientError>;

    /// The signing address, for metrics labels. Reads local state only, so
    /// it carries no token.
    fn sender(&self) -> Address;
}

/// [`FeedProvider`] backed by JSON-RPC clients: one public endpoint and an
/// optional private relay that gets the first try at challenge submission.
pub struct RpcFeedProvider<C> {
    client: Arc<C>,
    relay: Option<Arc<C>>,
    confirm_timeout: Duration,
    receipt_poll_interval: Duration,
}

impl<C: EthClient> RpcFeedProvider<C> {
    pub fn new(client: Arc<C>, relay: Option<Arc<C>>) -> Self {
        Self {
            client,
            relay,
            confirm_timeout: TX_CONFIRM_TIMEOUT,
            receipt_poll_interval: RECEIPT_POLL_INTERVAL,
        }
    }

    async fn construct_poke_message(
        &self,
        cancel: &CancellationToken,
        feed: Address,
        poke: &PokeEvent,
    ) -> Result<B256, ClientError> {
        let calldata = constructPokeMessageCall {
            pokeData: poke.poke.clone(),
        }
        .abi_encode();
        let ret = self.client.call(cancel, feed, calldata).await?;
        let decoded = constructPokeMessageCall::abi_decode_returns(&ret, true)
            .map_err(|err| ClientError::Decode(format!("constructPokeMessage result: {err}")))?;
        Ok(decoded._0)
    }

    async fn is_signature_acceptable(
        &self,
        cancel: &CancellationToken,
        feed: Address,
        poke: &PokeEvent,
        message: B256,
    ) -> Result<bool, ClientError> {
        let calldata = isAcceptableSchnorrSignatureNowCall {
            message,
            schnorrData: poke.schnorr.clone(),
        }
        .abi_encode();
        let ret = self.client.call(cancel, feed, calldata).await?;
        let decoded = isAcceptableSchnorrSignatureNowCall::abi_decode_returns(&ret, true)
            .map_err(|err| {
                ClientError::Decode(format!("isAcceptableSchnorrSignatureNow result: {err}"))
            })?;
        Ok(decoded._0)
    }

    /// Submit the challenge on `client` and wait for its receipt.
    async fn submit_and_confirm(
        &self,
        client: &C,
        feed: Address,
        calldata: &[u8],
        cancel: &CancellationToken,
    ) -> Result<B256, ClientError> {
        let tx_hash = client.send_transaction(cancel, feed, calldata.to_vec()).await?;
        debug!("opChallenge transaction submitted: 0x{tx_hash:x}");

        let receipt = wait_for_confirmation(
            client,
            tx_hash,
            self.confirm_timeout,
            self.receipt_poll_interval,
            cancel,
        )
        .await?;
        if !receipt.is_success() {
            warn!("opChallenge transaction 0x{tx_hash:x} was mined but reverted");
        }
        Ok(receipt.transaction_hash)
    }
}

#[async_trait]
impl<C: EthClient> FeedProvider for RpcFeedProvider<C> {
    async fn latest_block(&self, cancel: &CancellationToken) -> Result<u64, ClientError> {
        self.client.latest_block(cancel).await
    }

    async fn block_by_number(
        &self,
        cancel: &CancellationToken,
        number: u64,
    ) -> Result<Block, ClientError> {
        self.client.block_by_number(cancel, number).await
    }

    async fn challenge_period(
        &self,
        cancel: &CancellationToken,
        feed: Address,
    ) -> Result<u16, ClientError> {
        let calldata = opChallengePeriodCall {}.abi_encode();
        let ret = self.client.call(cancel, feed, calldata).await?;
        let decoded = opChallengePeriodCall::abi_decode_returns(&ret, true)
            .map_err(|err| ClientError::Decode(format!("opChallengePeriod result: {err}")))?;
        Ok(decoded._0)
    }

    async fn pokes_in_range(
        &self,
        cancel: &CancellationToken,
        feed: Address,
        from: u64,
        to: u64,
    ) -> Result<Vec<PokeEvent>, ClientError> {
        let logs = self
            .client
            .get_logs(cancel, feed, OP_POKED_TOPIC0, from, to)
            .await?;
        let mut pokes = Vec::with_capacity(logs.len());
        for log in &logs {
            match events::decode_poke(log) {
                Ok(poke) => pokes.push(poke),
                Err(err) => warn!("Failed to decode OpPoked event: {err}"),
            }
        }
        Ok(pokes)
    }

    async fn successful_challenges_in_range(
        &self,
        cancel: &CancellationToken,
        feed: Address,
        from: u64,
        to: u64,
    ) -> Result<Vec<SuccessfulChallengeEvent>, ClientError> {
        let logs = self
            .client
            .get_logs(cancel, feed, OP_POKE_CHALLENGED_TOPIC0, from, to)
            .await?;
        let mut challenges = Vec::with_capacity(logs.len());
        for log in &logs {
            match events::decode_challenge(log) {
                Ok(challenge) => challenges.push(challenge),
                Err(err) => warn!("Failed to decode OpPokeChallengedSuccessfully event: {err}"),
            }
        }
        Ok(challenges)
    }

    async fn is_poke_signature_valid(
        &self,
        cancel: &CancellationToken,
        feed: Address,
        poke: &PokeEvent,
    ) -> Result<bool, ClientError> {
        let message = self.construct_poke_message(cancel, feed, poke).await?;
        self.is_signature_acceptable(cancel, feed, poke, message).await
    }

    async fn challenge_poke(
        &self,
        cancel: &CancellationToken,
        feed: Address,
        poke: &PokeEvent,
    ) -> Result<B256, ClientError> {
        let calldata = opChallengeCall {
            schnorrData: poke.schnorr.clone(),
        }
        .abi_encode();

        if let Some(relay) = &self.relay {
            match self
                .submit_and_confirm(relay.as_ref(), feed, &calldata, cancel)
                .await
            {
                Ok(tx_hash) => return Ok(tx_hash),
                // A cancelled wait is shutdown, not a relay failure.
                Err(ClientError::Cancelled) => return Err(ClientError::Cancelled),
                Err(err) => {
                    warn!("Private relay submission failed ({err}), falling back to public endpoint");
                }
            }
        }

        self.submit_and_confirm(self.client.as_ref(), feed, &calldata, cancel)
            .await
    }

    fn sender(&self) -> Address {
        self.client
            .accounts()
            .first()
            .copied()
            .unwrap_or(Address::ZERO)
    }
}

/// Poll for the receipt of `tx_hash` until it is usable, the confirmation
/// window elapses, or shutdown is requested.
pub async fn wait_for_confirmation<C>(
    client: &C,
    tx_hash: B256,
    confirm_timeout: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<Receipt, ClientError>
where
    C: EthClient + ?Sized,
{
    let deadline = tokio::time::Instant::now() + confirm_timeout;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                return Err(ClientError::ConfirmationTimeout(confirm_timeout))
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }

        match client.transaction_receipt(cancel, tx_hash).await {
            Ok(Some(receipt)) if receipt.is_confirmed() => return Ok(receipt),
            Ok(_) => debug!("Transaction 0x{tx_hash:x} is not yet confirmed"),
            Err(ClientError::Cancelled) => return Err(ClientError::Cancelled),
            Err(err) => warn!("Failed to get transaction receipt for 0x{tx_hash:x}: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{OpPoked, PokeData, SchnorrData};
    use crate::types::Log;
    use alloy_primitives::{address, b256, Bytes};
    use alloy_sol_types::SolEvent;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const FEED: Address = address!("891e368fe81cba2ac6f6cc4b98e684c106e2ef4f");

    #[derive(Default)]
    struct MockEthClient {
        latest: u64,
        blocks: HashMap<u64, Block>,
        logs: Vec<Log>,
        call_responses: HashMap<[u8; 4], Vec<u8>>,
        send_error: Option<String>,
        tx_hash: B256,
        receipts: HashMap<B256, Receipt>,
        signer_accounts: Vec<Address>,
        calls: Mutex<Vec<[u8; 4]>>,
        sends: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl EthClient for MockEthClient {
        async fn latest_block(&self, _cancel: &CancellationToken) -> Result<u64, ClientError> {
            Ok(self.latest)
        }

        async fn block_by_number(
            &self,
            _cancel: &CancellationToken,
            number: u64,
        ) -> Result<Block, ClientError> {
            self.blocks
                .get(&number)
                .cloned()
                .ok_or(ClientError::BlockNotFound(number))
        }

        async fn get_logs(
            &self,
            _cancel: &CancellationToken,
            _address: Address,
            topic0: B256,
            from: u64,
            to: u64,
        ) -> Result<Vec<Log>, ClientError> {
            Ok(self
                .logs
                .iter()
                .filter(|log| {
                    log.topics.first() == Some(&topic0)
                        && log.block_number >= from
                        && log.block_number <= to
                })
                .cloned()
                .collect())
        }

        async fn call(
            &self,
            _cancel: &CancellationToken,
            _to: Address,
            calldata: Vec<u8>,
        ) -> Result<Vec<u8>, ClientError> {
            let mut selector = [0u8; 4];
            selector.copy_from_slice(&calldata[..4]);
            self.calls.lock().unwrap().push(selector);
            self.call_responses
                .get(&selector)
                .cloned()
                .ok_or_else(|| ClientError::Revert("unexpected call".into()))
        }

        async fn send_transaction(
            &self,
            cancel: &CancellationToken,
            _to: Address,
            calldata: Vec<u8>,
        ) -> Result<B256, ClientError> {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            self.sends.lock().unwrap().push(calldata);
            match &self.send_error {
                Some(message) => Err(ClientError::Rejected(message.clone())),
                None => Ok(self.tx_hash),
            }
        }

        async fn transaction_receipt(
            &self,
            _cancel: &CancellationToken,
            tx_hash: B256,
        ) -> Result<Option<Receipt>, ClientError> {
            Ok(self.receipts.get(&tx_hash).cloned())
        }

        fn accounts(&self) -> Vec<Address> {
            self.signer_accounts.clone()
        }
    }

    fn sample_poke(block_number: u64) -> PokeEvent {
        PokeEvent {
            block_number,
            caller: address!("1f7acda376ef37ec371235a094113df9cb4efee1"),
            op_feed: FEED,
            schnorr: SchnorrData {
                signature: b256!(
                    "00000000000000000000000000000000000000000000000000000000000000aa"
                ),
                commitment: Address::ZERO,
                signersBlob: Bytes::from(vec![0x01]),
            },
            poke: PokeData { val: 42, age: 7 },
        }
    }

    fn word(value: u64) -> Vec<u8> {
        let mut word = vec![0u8; 32];
        word[24..].copy_from_slice(&value.to_be_bytes());
        word
    }

    fn confirmed_receipt(tx_hash: B256) -> Receipt {
        Receipt {
            transaction_hash: tx_hash,
            status: Some(1),
            block_number: Some(100),
            gas_used: None,
        }
    }

    fn fast_provider(
        client: Arc<MockEthClient>,
        relay: Option<Arc<MockEthClient>>,
    ) -> RpcFeedProvider<MockEthClient> {
        RpcFeedProvider {
            client,
            relay,
            confirm_timeout: Duration::from_millis(50),
            receipt_poll_interval: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_challenge_period_decoding() {
        let mut client = MockEthClient::default();
        client
            .call_responses
            .insert(opChallengePeriodCall::SELECTOR, word(0x257));
        let provider = RpcFeedProvider::new(Arc::new(client), None);

        let period = provider
            .challenge_period(&CancellationToken::new(), FEED)
            .await
            .unwrap();
        assert_eq!(period, 599);
    }

    #[tokio::test]
    async fn test_pokes_in_range_drops_malformed_logs() {
        let event = OpPoked {
            caller: address!("1f7acda376ef37ec371235a094113df9cb4efee1"),
            opFeed: FEED,
            schnorrData: SchnorrData {
                signature: B256::ZERO,
                commitment: Address::ZERO,
                signersBlob: Bytes::new(),
            },
            pokeData: PokeData { val: 1, age: 2 },
        };
        let log_data = event.encode_log_data();
        let valid = Log {
            address: FEED,
            topics: log_data.topics().to_vec(),
            data: log_data.data.to_vec(),
            block_number: 100,
        };
        let mut malformed = valid.clone();
        malformed.data.truncate(8);
        malformed.block_number = 101;

        let client = MockEthClient {
            logs: vec![valid, malformed],
            ..Default::default()
        };
        let provider = RpcFeedProvider::new(Arc::new(client), None);

        let pokes = provider
            .pokes_in_range(&CancellationToken::new(), FEED, 0, 200)
            .await
            .unwrap();
        assert_eq!(pokes.len(), 1);
        assert_eq!(pokes[0].block_number, 100);
    }

    #[tokio::test]
    async fn test_signature_validation_issues_both_calls_in_order() {
        let digest = word(0xbeef);
        let mut client = MockEthClient::default();
        client
            .call_responses
            .insert(constructPokeMessageCall::SELECTOR, digest);
        client
            .call_responses
            .insert(isAcceptableSchnorrSignatureNowCall::SELECTOR, word(1));
        let client = Arc::new(client);
        let provider = RpcFeedProvider::new(Arc::clone(&client), None);

        let valid = provider
            .is_poke_signature_valid(&CancellationToken::new(), FEED, &sample_poke(100))
            .await
            .unwrap();
        assert!(valid);
        assert_eq!(
            *client.calls.lock().unwrap(),
            vec![
                constructPokeMessageCall::SELECTOR,
                isAcceptableSchnorrSignatureNowCall::SELECTOR,
            ]
        );
    }

    #[tokio::test]
    async fn test_signature_validation_error_propagates() {
        // No call responses programmed: constructPokeMessage reverts.
        let provider = RpcFeedProvider::new(Arc::new(MockEthClient::default()), None);

        let result = provider
            .is_poke_signature_valid(&CancellationToken::new(), FEED, &sample_poke(100))
            .await;
        assert!(matches!(result, Err(ClientError::Revert(_))));
    }

    #[tokio::test]
    async fn test_challenge_without_relay_uses_public_endpoint() {
        let tx_hash = b256!("00000000000000000000000000000000000000000000000000000000000000c1");
        let mut client = MockEthClient {
            tx_hash,
            ..Default::default()
        };
        client.receipts.insert(tx_hash, confirmed_receipt(tx_hash));
        let client = Arc::new(client);
        let provider = fast_provider(Arc::clone(&client), None);

        let mined = provider
            .challenge_poke(&CancellationToken::new(), FEED, &sample_poke(100))
            .await
            .unwrap();
        assert_eq!(mined, tx_hash);
        assert_eq!(client.sends.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_relay_rejection_falls_back_to_public_once() {
        let tx_hash = b256!("00000000000000000000000000000000000000000000000000000000000000c2");
        let relay = Arc::new(MockEthClient {
            send_error: Some("nonce too low".into()),
            ..Default::default()
        });
        let mut public = MockEthClient {
            tx_hash,
            ..Default::default()
        };
        public.receipts.insert(tx_hash, confirmed_receipt(tx_hash));
        let public = Arc::new(public);
        let provider = fast_provider(Arc::clone(&public), Some(Arc::clone(&relay)));

        let mined = provider
            .challenge_poke(&CancellationToken::new(), FEED, &sample_poke(100))
            .await
            .unwrap();
        assert_eq!(mined, tx_hash);
        assert_eq!(relay.sends.lock().unwrap().len(), 1);
        assert_eq!(public.sends.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_relay_confirmation_timeout_falls_back_to_public() {
        let relay_hash = b256!("00000000000000000000000000000000000000000000000000000000000000d1");
        let public_hash = b256!("00000000000000000000000000000000000000000000000000000000000000d2");
        // Relay accepts the transaction but its receipt never shows up.
        let relay = Arc::new(MockEthClient {
            tx_hash: relay_hash,
            ..Default::default()
        });
        let mut public = MockEthClient {
            tx_hash: public_hash,
            ..Default::default()
        };
        public
            .receipts
            .insert(public_hash, confirmed_receipt(public_hash));
        let public = Arc::new(public);
        let provider = fast_provider(Arc::clone(&public), Some(Arc::clone(&relay)));

        let mined = provider
            .challenge_poke(&CancellationToken::new(), FEED, &sample_poke(100))
            .await
            .unwrap();
        assert_eq!(mined, public_hash);
        assert_eq!(public.sends.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_wait_does_not_trigger_fallback() {
        let relay = Arc::new(MockEthClient {
            tx_hash: b256!("00000000000000000000000000000000000000000000000000000000000000e1"),
            ..Default::default()
        });
        let public = Arc::new(MockEthClient::default());
        let provider = fast_provider(Arc::clone(&public), Some(Arc::clone(&relay)));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = provider
            .challenge_poke(&cancel, FEED, &sample_poke(100))
            .await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert!(public.sends.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sender_falls_back_to_zero_address() {
        let provider = RpcFeedProvider::new(Arc::new(MockEthClient::default()), None);
        assert_eq!(provider.sender(), Address::ZERO);
    }
}
