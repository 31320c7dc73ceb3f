#![forbid(unsafe_code)]

//! Checkpoint compaction.
//!
//! After every push the retained list is brought back under budget by
//! folding its oldest entries into one synthetic checkpoint whose payload is
//! the composed effect of everything folded. Nothing needed to reconstruct a
//! reachable state is ever dropped.
//!
//! # Algorithm
//!
//! ```text
//! entries:  [ e0 | e1 | e2 | e3 | e4 | e5 ]      max_undo_steps = 3
//!                     ^keep_from          ^newest
//!
//! fold:     [ C(e0,e1) | e2 | e3 | e4 | e5 ]    index_offset += 1
//! ```
//!
//! 1. Walk backwards from the newest entry, charging each entry against the
//!    step budget (unless it is free) and the byte budget. The walk stops at
//!    `keep_from`, the oldest entry that stays individually addressable.
//! 2. Fold `entries[..keep_from]` into a checkpoint.
//! 3. While the list is still over the byte ceiling and holds more than one
//!    entry, fold the checkpoint together with its successor.
//!
//! # Invariants
//!
//! 1. The list never becomes empty.
//! 2. Retained bytes exceed the ceiling only if a single entry remains.
//! 3. `positions_folded` equals the reduction in list length, so the logical
//!    position `index_offset + index` is unchanged.

use crate::composer::Composer;
use crate::config::HistoryConfig;
use crate::entry::Entry;

/// Result of one compaction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Compaction {
    /// Number of fold operations performed.
    pub folds: usize,
    /// Logical positions that stopped being individually addressable.
    pub positions_folded: usize,
}

impl Compaction {
    /// True if the pass changed nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.folds == 0
    }
}

/// Sum of byte estimates across `entries`.
#[must_use]
pub fn total_bytes<P>(entries: &[Entry<P>]) -> usize {
    entries
        .iter()
        .fold(0usize, |acc, e| acc.saturating_add(e.memory_estimate_bytes()))
}

/// Index of the oldest entry that must stay individually addressable,
/// treating the last entry as the newest.
///
/// Returns 0 for an empty or single-entry list.
#[must_use]
pub fn keep_from<P>(entries: &[Entry<P>], config: &HistoryConfig) -> usize {
    let Some(newest) = entries.last() else {
        return 0;
    };
    let mut keep_from = entries.len() - 1;
    let mut remaining_steps = config.max_undo_steps;
    let mut remaining_bytes =
        config.total_threshold_bytes as i128 - newest.memory_estimate_bytes() as i128;

    while keep_from > 0 {
        keep_from -= 1;
        let bytes = entries[keep_from].memory_estimate_bytes() as i128;

        if config.is_free(entries[keep_from].memory_estimate_bytes()) {
            remaining_bytes -= bytes;
            continue;
        }

        if remaining_steps == 0 || remaining_bytes - bytes < 0 {
            keep_from += 1;
            break;
        }

        remaining_bytes -= bytes;
        remaining_steps -= 1;
    }

    keep_from
}

/// Fold `entries[..count]` into a single checkpoint at the front.
///
/// The checkpoint takes the timestamp of the newest folded entry and the
/// composer's estimate for the composed payload. The anchor hint passed to
/// the composer is the index of the last folded payload. `count < 2` is a
/// no-op: a single entry is already its own checkpoint.
pub fn fold_prefix<P, C>(mut entries: Vec<Entry<P>>, count: usize, composer: &C) -> Vec<Entry<P>>
where
    C: Composer<P> + ?Sized,
{
    let count = count.min(entries.len());
    if count < 2 {
        return entries;
    }

    let rest = entries.split_off(count);
    let folded = entries;

    let timestamp_ms = folded[count - 1].timestamp_ms();
    let data = {
        let payloads: Vec<&P> = folded.iter().map(Entry::data).collect();
        composer.compose(&payloads, Some(count - 1))
    };
    let bytes = composer.estimate_bytes(&data);

    tracing::debug!(
        target: "history.compact",
        folded = count,
        checkpoint_bytes = bytes,
        "folded entries into checkpoint"
    );

    let mut rebuilt = Vec::with_capacity(rest.len() + 1);
    rebuilt.push(Entry::checkpoint(timestamp_ms, bytes, data));
    rebuilt.extend(rest);
    rebuilt
}

/// Bring `entries` under the budgets in `config`.
///
/// The last entry is treated as the newest; callers truncate any redo tail
/// before compacting.
pub fn compact<P, C>(
    mut entries: Vec<Entry<P>>,
    config: &HistoryConfig,
    composer: &C,
) -> (Vec<Entry<P>>, Compaction)
where
    C: Composer<P> + ?Sized,
{
    let mut stats = Compaction::default();
    let mut keep = keep_from(&entries, config);

    let _span = tracing::debug_span!(
        "history.compact",
        retained = entries.len(),
        keep_from = keep,
    )
    .entered();

    loop {
        if keep >= 2 {
            let before = entries.len();
            entries = fold_prefix(entries, keep, composer);
            stats.folds += 1;
            stats.positions_folded += before - entries.len();
        }

        if entries.len() > 1 && total_bytes(&entries) > config.total_threshold_bytes {
            keep = 2;
            continue;
        }
        break;
    }

    let bytes = total_bytes(&entries);
    if bytes > config.total_threshold_bytes {
        tracing::debug!(
            target: "history.compact",
            bytes,
            threshold = config.total_threshold_bytes,
            "single entry exceeds byte ceiling"
        );
    }

    (entries, stats)
}
