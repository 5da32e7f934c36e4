//! Correlation of pokes with successful challenges
//!
//! A poke that is immediately followed in the merged event stream by an
//! `OpPokeChallengedSuccessfully` event was already handled by someone else
//! and must not be challenged again.

use crate::events::{PokeEvent, SuccessfulChallengeEvent};

/// Merge view over the two event kinds, keyed by block number.
enum FeedEvent {
    Poke(PokeEvent),
    Success(SuccessfulChallengeEvent),
}

impl FeedEvent {
    fn block_number(&self) -> u64 {
        match self {
            FeedEvent::Poke(poke) => poke.block_number,
            FeedEvent::Success(success) => success.block_number,
        }
    }
}

/// Return the pokes from `pokes` that still require a challenge, given the
/// successful challenges observed in the same block range.
///
/// Both inputs are expected in the block-ascending order the log fetch
/// returns them in; the merge re-sorts defensively. The sort is stable and
/// keyed by block number only, and successes are appended after pokes, so a
/// success sharing a block with a poke sorts after it and suppresses it.
pub fn unchallenged(
    pokes: Vec<PokeEvent>,
    successes: Vec<SuccessfulChallengeEvent>,
) -> Vec<PokeEvent> {
    if successes.is_empty() {
        return pokes;
    }
    if pokes.is_empty() {
        return Vec::new();
    }

    // A lone poke preceded by any stale success is treated as already
    // handled, even when the success cannot refer to it.
    if pokes.len() == 1 {
        let lone = &pokes[0];
        if successes
            .iter()
            .any(|success| success.block_number < lone.block_number)
        {
            return Vec::new();
        }
        return pokes;
    }

    let mut merged: Vec<FeedEvent> = Vec::with_capacity(pokes.len() + successes.len());
    merged.extend(pokes.into_iter().map(FeedEvent::Poke));
    merged.extend(successes.into_iter().map(FeedEvent::Success));
    merged.sort_by_key(FeedEvent::block_number);

    // A poke survives unless the next merged event is a success.
    let keep: Vec<bool> = (0..merged.len())
        .map(|i| match &merged[i] {
            FeedEvent::Success(_) => false,
            FeedEvent::Poke(_) => !matches!(merged.get(i + 1), Some(FeedEvent::Success(_))),
        })
        .collect();

    merged
        .into_iter()
        .zip(keep)
        .filter_map(|(event, keep)| match event {
            FeedEvent::Poke(poke) if keep => Some(poke),
            _ => None,
        })
        .collect()
}
