//! Feed contract ABI and event codec
//!
//! Declares the slice of the optimistic feed contract the challenger talks
//! to, and decodes raw logs into the two event kinds the pipeline correlates.

use crate::error::ClientError;
use crate::types::Log;
use alloy_primitives::{b256, Address, B256};
use alloy_sol_types::{sol, SolEvent};

sol! {
    /// Price update payload carried by a poke.
    #[derive(Debug, PartialEq, Eq)]
    struct PokeData {
        uint128 val;
        uint32 age;
    }

    /// Aggregated Schnorr signature bundle. Passed through opaquely; the
    /// challenger never interprets it beyond ABI framing.
    #[derive(Debug, PartialEq, Eq)]
    struct SchnorrData {
        bytes32 signature;
        address commitment;
        bytes signersBlob;
    }

    function opChallengePeriod() external view returns (uint16);

    function constructPokeMessage(PokeData pokeData) external view returns (bytes32);

    function isAcceptableSchnorrSignatureNow(bytes32 message, SchnorrData schnorrData)
        external
        view
        returns (bool);

    function opChallenge(SchnorrData schnorrData) external;

    #[derive(Debug)]
    event OpPoked(
        address indexed caller,
        address indexed opFeed,
        SchnorrData schnorrData,
        PokeData pokeData
    );

    #[derive(Debug)]
    event OpPokeChallengedSuccessfully(address indexed challenger, bytes data);
}

/// keccak256("OpPoked(address,address,(bytes32,address,bytes),(uint128,uint32))")
pub const OP_POKED_TOPIC0: B256 =
    b256!("b9dc937c5e394d0c8f76e0e324500b88251b4c909ddc56232df10e2ea42b3c63");

/// Topic0 of the `OpPokeChallengedSuccessfully` event.
pub const OP_POKE_CHALLENGED_TOPIC0: B256 = OpPokeChallengedSuccessfully::SIGNATURE_HASH;

/// An `OpPoked` event observed on a feed, positioned by block number.
#[derive(Debug, Clone)]
pub struct PokeEvent {
    pub block_number: u64,
    pub caller: Address,
    pub op_feed: Address,
    pub schnorr: SchnorrData,
    pub poke: PokeData,
}

/// An `OpPokeChallengedSuccessfully` event observed on a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessfulChallengeEvent {
    pub block_number: u64,
    pub challenger: Address,
}

/// Decode an `OpPoked` log into a [`PokeEvent`].
///
/// Rejects logs whose topic0 does not match the event signature or whose
/// indexed/data sections are malformed.
pub fn decode_poke(log: &Log) -> Result<PokeEvent, ClientError> {
    let decoded = OpPoked::decode_raw_log(log.topics.iter().copied(), &log.data, true)
        .map_err(|err| ClientError::Decode(format!("OpPoked log: {err}")))?;
    Ok(PokeEvent {
        block_number: log.block_number,
        caller: decoded.caller,
        op_feed: decoded.opFeed,
        schnorr: decoded.schnorrData,
        poke: decoded.pokeData,
    })
}

/// Decode an `OpPokeChallengedSuccessfully` log into a [`SuccessfulChallengeEvent`].
pub fn decode_challenge(log: &Log) -> Result<SuccessfulChallengeEvent, ClientError> {
    let decoded =
        OpPokeChallengedSuccessfully::decode_raw_log(log.topics.iter().copied(), &log.data, true)
            .map_err(|err| {
                ClientError::Decode(format!("OpPokeChallengedSuccessfully log: {err}"))
            })?;
    Ok(SuccessfulChallengeEvent {
        block_number: log.block_number,
        challenger: decoded.challenger,
    })
}
